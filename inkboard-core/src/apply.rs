//! Edit application engine.
//!
//! `apply` plays an edit forward against a scene and `cancel` plays its
//! inverse. Both are synchronous and touch only the shapes named by the
//! edit, so `cancel(apply(scene, e), e)` restores every field `e` touched.
//! Missing shapes are logged and skipped rather than aborting the edit.
//!
//! Paint order is restored for `Add` and `Modify`. A `Remove` does not record
//! where its shapes sat, so cancelling it puts them back on top, in the order
//! the edit lists them. Every participant cancels the same way and their
//! scenes keep the same order.

use crate::edit::Edit;
use crate::scene::SceneStore;
use crate::shape::{Shape, ShapeId};

/// What an `apply`/`cancel` call actually did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    /// Shapes inserted, removed or updated.
    pub touched: Vec<ShapeId>,
    /// Shapes the edit referenced but the scene did not contain.
    pub skipped: Vec<ShapeId>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Play `edit` forward.
pub fn apply<S: SceneStore + ?Sized>(scene: &mut S, edit: &Edit) -> ApplyReport {
    let mut report = ApplyReport::default();
    match edit {
        Edit::Add { shape, .. } => insert(scene, shape, &mut report),
        Edit::Remove { id, shapes } => {
            for shape in shapes {
                if scene.remove_shape(&shape.id).is_some() {
                    report.touched.push(shape.id.clone());
                } else {
                    log::warn!("remove {id}: shape {} not found, skipping", shape.id);
                    report.skipped.push(shape.id.clone());
                }
            }
        }
        Edit::Modify { id, current, .. } => overwrite(scene, id.as_str(), current, &mut report),
    }
    report
}

/// Play the inverse of `edit`. Shapes restored from a `Remove` are painted
/// on top.
pub fn cancel<S: SceneStore + ?Sized>(scene: &mut S, edit: &Edit) -> ApplyReport {
    let mut report = ApplyReport::default();
    match edit {
        Edit::Add { id, shape } => {
            if scene.remove_shape(&shape.id).is_some() {
                report.touched.push(shape.id.clone());
            } else {
                log::warn!("cancel add {id}: shape {} not found, skipping", shape.id);
                report.skipped.push(shape.id.clone());
            }
        }
        Edit::Remove { shapes, .. } => {
            for shape in shapes {
                insert(scene, shape, &mut report);
            }
        }
        Edit::Modify { id, initial, .. } => overwrite(scene, id.as_str(), initial, &mut report),
    }
    report
}

fn insert<S: SceneStore + ?Sized>(scene: &mut S, shape: &Shape, report: &mut ApplyReport) {
    scene.insert_shape(shape.clone());
    report.touched.push(shape.id.clone());
}

fn overwrite<S: SceneStore + ?Sized>(
    scene: &mut S,
    edit_id: &str,
    snapshots: &[Shape],
    report: &mut ApplyReport,
) {
    for snapshot in snapshots {
        match scene.update_shape(&snapshot.id, snapshot) {
            Ok(()) => report.touched.push(snapshot.id.clone()),
            Err(e) => {
                log::warn!("modify {edit_id}: {e}, skipping");
                report.skipped.push(snapshot.id.clone());
            }
        }
    }
}
