//! Shape records as seen by the sync engine.
//!
//! The scene store owns shapes; the engine only needs enough of each record
//! to rebuild or invert an edit, so a `Shape` is a plain value that can be
//! snapshotted into an [`Edit`](crate::Edit) and replayed later.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally unique shape identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShapeId(pub String);

impl ShapeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ShapeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ShapeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShapeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ShapeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Axis-aligned bounding box in board coordinates.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Smallest rect covering both `self` and `other`.
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Rect {
            x,
            y,
            width: self.right().max(other.right()) - x,
            height: self.bottom().max(other.bottom()) - y,
        }
    }

    /// Grow to include the point `(px, py)`.
    pub fn include_point(&mut self, px: f32, py: f32) {
        let x = self.x.min(px);
        let y = self.y.min(py);
        self.width = self.right().max(px) - x;
        self.height = self.bottom().max(py) - y;
        self.x = x;
        self.y = y;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeKind {
    Rect,
    Ellipse,
    Line,
    Arrow,
    Pencil,
    Text,
}

/// A drawable record on the board.
///
/// `points` is a flat list of `x, y` pairs. Every field except `id` is
/// mutable and is overwritten wholesale by a `Modify` edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub id: ShapeId,
    pub kind: ShapeKind,
    pub bounds: Rect,
    pub points: Vec<f32>,
    /// Shapes this one is attached to (arrow endpoints, labels).
    pub connected: Vec<ShapeId>,
    pub stroke_color: String,
    pub stroke_width: f32,
    pub text: Option<String>,
}

impl Shape {
    /// Create a shape with a fresh id.
    pub fn new(kind: ShapeKind, bounds: Rect) -> Self {
        Self::with_id(ShapeId::new(), kind, bounds)
    }

    pub fn with_id(id: impl Into<ShapeId>, kind: ShapeKind, bounds: Rect) -> Self {
        Self {
            id: id.into(),
            kind,
            bounds,
            points: Vec::new(),
            connected: Vec::new(),
            stroke_color: "#000000".to_string(),
            stroke_width: 1.0,
            text: None,
        }
    }

    /// Zero-length skeleton used when a stroke starts at `(x, y)`.
    pub fn skeleton(id: impl Into<ShapeId>, kind: ShapeKind, x: f32, y: f32) -> Self {
        Self::with_id(id, kind, Rect::new(x, y, 0.0, 0.0))
    }

    /// Number of `(x, y)` pairs in `points`.
    pub fn point_count(&self) -> usize {
        self.points.len() / 2
    }

    /// Append flat `x, y` pairs, growing the bounds to cover them.
    ///
    /// A trailing odd coordinate is ignored.
    pub fn append_points(&mut self, coords: &[f32]) {
        for pair in coords.chunks_exact(2) {
            if self.points.is_empty() && self.bounds.width == 0.0 && self.bounds.height == 0.0 {
                self.bounds.x = pair[0];
                self.bounds.y = pair[1];
            } else {
                self.bounds.include_point(pair[0], pair[1]);
            }
            self.points.extend_from_slice(pair);
        }
    }

    /// Record an attachment to another shape. Duplicates are ignored.
    pub fn connect(&mut self, other: ShapeId) {
        if !self.connected.contains(&other) {
            self.connected.push(other);
        }
    }

    /// Overwrite every mutable field with the values from `fields`.
    pub fn assign_fields(&mut self, fields: &Shape) {
        self.kind = fields.kind;
        self.bounds = fields.bounds;
        self.points = fields.points.clone();
        self.connected = fields.connected.clone();
        self.stroke_color = fields.stroke_color.clone();
        self.stroke_width = fields.stroke_width;
        self.text = fields.text.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_points_grows_bounds() {
        let mut shape = Shape::skeleton("s1", ShapeKind::Pencil, 0.0, 0.0);
        shape.append_points(&[4.0, 5.0, -2.0, 10.0]);

        assert_eq!(shape.point_count(), 2);
        assert_eq!(shape.bounds.x, -2.0);
        assert_eq!(shape.bounds.y, 5.0);
        assert_eq!(shape.bounds.right(), 4.0);
        assert_eq!(shape.bounds.bottom(), 10.0);
    }

    #[test]
    fn test_append_points_ignores_trailing_coordinate() {
        let mut shape = Shape::skeleton("s1", ShapeKind::Pencil, 1.0, 1.0);
        shape.append_points(&[2.0, 2.0, 7.0]);
        assert_eq!(shape.points, vec![2.0, 2.0]);
    }

    #[test]
    fn test_connect_dedupes() {
        let mut arrow = Shape::skeleton("a", ShapeKind::Arrow, 0.0, 0.0);
        arrow.connect(ShapeId::from("r1"));
        arrow.connect(ShapeId::from("r1"));
        assert_eq!(arrow.connected.len(), 1);
    }

    #[test]
    fn test_assign_fields_keeps_id() {
        let mut a = Shape::with_id("a", ShapeKind::Rect, Rect::new(0.0, 0.0, 10.0, 10.0));
        let mut b = Shape::with_id("b", ShapeKind::Ellipse, Rect::new(5.0, 5.0, 1.0, 1.0));
        b.text = Some("hi".into());

        a.assign_fields(&b);
        assert_eq!(a.id, ShapeId::from("a"));
        assert_eq!(a.kind, ShapeKind::Ellipse);
        assert_eq!(a.text.as_deref(), Some("hi"));
    }

    #[test]
    fn test_rect_union() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, -5.0, 10.0, 5.0);
        let u = a.union(&b);
        assert_eq!(u, Rect::new(0.0, -5.0, 15.0, 15.0));
    }
}
