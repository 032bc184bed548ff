//! Live segment streaming for shapes that are still being drawn.
//!
//! A stroke is framed as `Start(shape) → Update(delta)* → End(shape_id)`.
//! Only deltas travel while the pointer moves; `End` promotes the accumulated
//! shape into a committed `Add` edit whose id the drawer chose, so every
//! participant records the same edit.
//!
//! Segments can arrive for shapes we never saw start (reordering across a
//! reconnect). Those are abandoned and reported as [`SegmentOutcome::PullNeeded`]
//! so the caller fetches the canonical shape instead of guessing.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::edit::{Edit, EditId};
use crate::scene::SceneStore;
use crate::shape::{Rect, Shape, ShapeId};

/// Incremental change to a shape in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SegmentDelta {
    /// Flat `x, y` pairs appended to the stroke.
    AddPoints(Vec<f32>),
    /// Attach the shape to another one.
    Connect(ShapeId),
    /// Replace the bounding geometry.
    Bounds(Rect),
}

/// One framed segment message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Segment {
    Start { shape: Shape },
    Update { shape_id: ShapeId, delta: SegmentDelta },
    End { shape_id: ShapeId, edit_id: EditId },
}

impl Segment {
    pub fn shape_id(&self) -> &ShapeId {
        match self {
            Segment::Start { shape } => &shape.id,
            Segment::Update { shape_id, .. } | Segment::End { shape_id, .. } => shape_id,
        }
    }

    /// Merge an update delta into `shape`.
    pub fn merge_delta(shape: &mut Shape, delta: &SegmentDelta) {
        match delta {
            SegmentDelta::AddPoints(coords) => shape.append_points(coords),
            SegmentDelta::Connect(other) => shape.connect(other.clone()),
            SegmentDelta::Bounds(bounds) => shape.bounds = *bounds,
        }
    }
}

/// Result of feeding one segment to a [`SegmentTracker`].
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOutcome {
    /// The scene was updated; nothing else to do.
    Applied,
    /// The stroke finished; record this `Add` in history.
    Commit(Edit),
    /// The segment referenced an unknown shape and was abandoned. The caller
    /// should issue a pull.
    PullNeeded(ShapeId),
    /// Dropped without effect (trailing update of an abandoned stroke).
    Ignored,
}

/// Applies inbound segments to a scene and tracks strokes in flight.
#[derive(Debug, Default)]
pub struct SegmentTracker {
    open: HashSet<ShapeId>,
    abandoned: HashSet<ShapeId>,
}

impl SegmentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strokes started but not yet ended.
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn is_open(&self, id: &ShapeId) -> bool {
        self.open.contains(id)
    }

    pub fn handle<S: SceneStore + ?Sized>(&mut self, scene: &mut S, segment: Segment) -> SegmentOutcome {
        match segment {
            Segment::Start { shape } => {
                self.abandoned.remove(&shape.id);
                self.open.insert(shape.id.clone());
                scene.insert_shape(shape);
                SegmentOutcome::Applied
            }
            Segment::Update { shape_id, delta } => {
                if self.abandoned.contains(&shape_id) {
                    return SegmentOutcome::Ignored;
                }
                let Some(existing) = scene.find_shape(&shape_id) else {
                    log::warn!("segment update for unknown shape {shape_id}, abandoning stroke");
                    self.open.remove(&shape_id);
                    self.abandoned.insert(shape_id.clone());
                    return SegmentOutcome::PullNeeded(shape_id);
                };
                let mut shape = existing.clone();
                Segment::merge_delta(&mut shape, &delta);
                match scene.update_shape(&shape_id, &shape) {
                    Ok(()) => SegmentOutcome::Applied,
                    Err(e) => {
                        log::warn!("segment update failed: {e}");
                        SegmentOutcome::Ignored
                    }
                }
            }
            Segment::End { shape_id, edit_id } => {
                self.open.remove(&shape_id);
                let was_abandoned = self.abandoned.remove(&shape_id);
                match scene.find_shape(&shape_id) {
                    Some(shape) if !was_abandoned => SegmentOutcome::Commit(Edit::Add {
                        id: edit_id,
                        shape: shape.clone(),
                    }),
                    _ => {
                        log::warn!("segment end for unknown shape {shape_id}, pulling");
                        SegmentOutcome::PullNeeded(shape_id)
                    }
                }
            }
        }
    }

    /// The shape was committed by other means (a relayed push or a pull);
    /// it no longer belongs to an open stroke.
    pub fn release(&mut self, id: &ShapeId) -> bool {
        self.open.remove(id)
    }

    /// Drop every open stroke from the scene and ignore the rest of its
    /// segments. A later `End` asks for a pull instead of committing.
    pub fn abandon_open<S: SceneStore + ?Sized>(&mut self, scene: &mut S) -> Vec<ShapeId> {
        let dropped = self.remove_open(scene);
        self.abandoned.extend(dropped.iter().cloned());
        dropped
    }

    /// Forget every stroke in flight (disconnect or reset). Skeletons of
    /// uncommitted strokes are removed from the scene.
    pub fn clear<S: SceneStore + ?Sized>(&mut self, scene: &mut S) -> Vec<ShapeId> {
        let dropped = self.remove_open(scene);
        self.abandoned.clear();
        dropped
    }

    fn remove_open<S: SceneStore + ?Sized>(&mut self, scene: &mut S) -> Vec<ShapeId> {
        let dropped: Vec<ShapeId> = self.open.drain().collect();
        for id in &dropped {
            if scene.remove_shape(id).is_some() {
                log::debug!("dropped unfinished stroke {id}");
            }
        }
        dropped
    }
}
