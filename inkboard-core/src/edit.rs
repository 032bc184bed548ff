//! The edit model: one self-contained, invertible mutation of the board.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shape::{Shape, ShapeId};

/// Globally unique edit identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EditId(pub String);

impl EditId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EditId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EditId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EditId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EditId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A single board mutation.
///
/// Every variant stores full shape snapshots, so the inverse never needs to
/// consult the scene.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Edit {
    Add {
        id: EditId,
        shape: Shape,
    },
    Remove {
        id: EditId,
        shapes: Vec<Shape>,
    },
    Modify {
        id: EditId,
        initial: Vec<Shape>,
        current: Vec<Shape>,
    },
}

impl Edit {
    pub fn add(shape: Shape) -> Self {
        Edit::Add { id: EditId::new(), shape }
    }

    pub fn remove(shapes: Vec<Shape>) -> Self {
        Edit::Remove { id: EditId::new(), shapes }
    }

    /// `initial` and `current` are matched by shape id.
    pub fn modify(initial: Vec<Shape>, current: Vec<Shape>) -> Self {
        Edit::Modify { id: EditId::new(), initial, current }
    }

    pub fn id(&self) -> &EditId {
        match self {
            Edit::Add { id, .. } | Edit::Remove { id, .. } | Edit::Modify { id, .. } => id,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Edit::Add { .. } => "add",
            Edit::Remove { .. } => "remove",
            Edit::Modify { .. } => "modify",
        }
    }

    /// Ids of every shape this edit touches.
    pub fn shape_ids(&self) -> Vec<ShapeId> {
        match self {
            Edit::Add { shape, .. } => vec![shape.id.clone()],
            Edit::Remove { shapes, .. } => shapes.iter().map(|s| s.id.clone()).collect(),
            Edit::Modify { current, .. } => current.iter().map(|s| s.id.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{Rect, ShapeKind};

    fn shape(id: &str) -> Shape {
        Shape::with_id(id, ShapeKind::Rect, Rect::new(0.0, 0.0, 1.0, 1.0))
    }

    #[test]
    fn test_fresh_ids_are_unique() {
        let a = Edit::add(shape("r1"));
        let b = Edit::add(shape("r1"));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_shape_ids() {
        let e = Edit::remove(vec![shape("a"), shape("b")]);
        assert_eq!(e.shape_ids(), vec![ShapeId::from("a"), ShapeId::from("b")]);
        assert_eq!(e.kind_name(), "remove");
    }

    #[test]
    fn test_modify_reports_current_shapes() {
        let mut moved = shape("a");
        moved.bounds.x = 50.0;
        let e = Edit::modify(vec![shape("a")], vec![moved]);
        assert_eq!(e.shape_ids(), vec![ShapeId::from("a")]);
        assert_eq!(e.kind_name(), "modify");
    }
}
