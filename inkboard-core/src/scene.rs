//! Scene store contract and an in-memory implementation.
//!
//! The rendering surface is external; the engine talks to it only through
//! [`SceneStore`]. [`Scene`] is a plain in-memory store used by headless
//! clients, the relay's tests, and property checks.

use std::collections::HashMap;

use crate::error::CoreError;
use crate::shape::{Rect, Shape, ShapeId};

/// Operations the sync engine needs from a scene.
pub trait SceneStore {
    fn find_shape(&self, id: &ShapeId) -> Option<&Shape>;

    /// Insert `shape`, replacing any shape with the same id.
    fn insert_shape(&mut self, shape: Shape);

    fn remove_shape(&mut self, id: &ShapeId) -> Option<Shape>;

    /// Overwrite the mutable fields of shape `id` with those of `fields`.
    fn update_shape(&mut self, id: &ShapeId, fields: &Shape) -> Result<(), CoreError>;

    /// Shape ids in paint order.
    fn shape_ids(&self) -> Vec<ShapeId>;

    fn clear(&mut self);

    fn contains(&self, id: &ShapeId) -> bool {
        self.find_shape(id).is_some()
    }
}

/// In-memory scene keeping shapes in insertion (paint) order.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    shapes: HashMap<ShapeId, Shape>,
    order: Vec<ShapeId>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Shapes in paint order.
    pub fn shapes(&self) -> impl Iterator<Item = &Shape> {
        self.order.iter().filter_map(|id| self.shapes.get(id))
    }

    /// Id of the top-most shape.
    pub fn last_shape_id(&self) -> Option<&ShapeId> {
        self.order.last()
    }

    /// Bounding box of everything on the board, used to size the canvas.
    pub fn extent(&self) -> Option<Rect> {
        self.shapes()
            .map(|s| s.bounds)
            .reduce(|acc, b| acc.union(&b))
    }
}

/// Two scenes are equal when they hold the same shapes, regardless of order.
/// Compare [`SceneStore::shape_ids`] when paint order matters.
impl PartialEq for Scene {
    fn eq(&self, other: &Self) -> bool {
        self.shapes == other.shapes
    }
}

impl SceneStore for Scene {
    fn find_shape(&self, id: &ShapeId) -> Option<&Shape> {
        self.shapes.get(id)
    }

    fn insert_shape(&mut self, shape: Shape) {
        let id = shape.id.clone();
        if self.shapes.insert(id.clone(), shape).is_none() {
            self.order.push(id);
        }
    }

    fn remove_shape(&mut self, id: &ShapeId) -> Option<Shape> {
        let shape = self.shapes.remove(id)?;
        self.order.retain(|o| o != id);
        Some(shape)
    }

    fn update_shape(&mut self, id: &ShapeId, fields: &Shape) -> Result<(), CoreError> {
        let shape = self
            .shapes
            .get_mut(id)
            .ok_or_else(|| CoreError::ShapeNotFound(id.clone()))?;
        shape.assign_fields(fields);
        Ok(())
    }

    fn shape_ids(&self) -> Vec<ShapeId> {
        self.order.clone()
    }

    fn clear(&mut self) {
        self.shapes.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::ShapeKind;

    fn rect(id: &str, x: f32) -> Shape {
        Shape::with_id(id, ShapeKind::Rect, Rect::new(x, 0.0, 10.0, 10.0))
    }

    #[test]
    fn test_insert_preserves_order() {
        let mut scene = Scene::new();
        scene.insert_shape(rect("a", 0.0));
        scene.insert_shape(rect("b", 20.0));
        scene.insert_shape(rect("a", 5.0));

        assert_eq!(scene.shape_ids(), vec![ShapeId::from("a"), ShapeId::from("b")]);
        assert_eq!(scene.find_shape(&"a".into()).unwrap().bounds.x, 5.0);
        assert_eq!(scene.last_shape_id(), Some(&ShapeId::from("b")));
    }

    #[test]
    fn test_update_missing_shape() {
        let mut scene = Scene::new();
        let err = scene.update_shape(&"nope".into(), &rect("x", 0.0)).unwrap_err();
        assert_eq!(err, CoreError::ShapeNotFound("nope".into()));
    }

    #[test]
    fn test_extent() {
        let mut scene = Scene::new();
        assert!(scene.extent().is_none());
        scene.insert_shape(rect("a", 0.0));
        scene.insert_shape(rect("b", 90.0));
        assert_eq!(scene.extent(), Some(Rect::new(0.0, 0.0, 100.0, 10.0)));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut scene = Scene::new();
        scene.insert_shape(rect("a", 0.0));
        scene.insert_shape(rect("b", 0.0));
        assert!(scene.remove_shape(&"a".into()).is_some());
        assert!(scene.remove_shape(&"a".into()).is_none());
        assert_eq!(scene.len(), 1);
        scene.clear();
        assert!(scene.is_empty());
    }
}
