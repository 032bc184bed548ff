//! # inkboard-core: edit model and history for a shared drawing board
//!
//! Everything here is synchronous and transport-agnostic:
//!
//! ```text
//! gesture ──► Edit ──► apply(scene) ──► History.current
//!                                          │ undo(id) / redo(id)
//!                                          ▼
//!                                    History.undone
//! ```
//!
//! ## Modules
//!
//! - [`shape`]: shape records and geometry
//! - [`scene`]: the `SceneStore` contract plus an in-memory `Scene`
//! - [`edit`]: self-contained, invertible `Edit`s
//! - [`apply`]: edit application engine (`apply` / `cancel`)
//! - [`history`]: id-addressed undo/redo
//! - [`segment`]: live stroke streaming

pub mod apply;
pub mod edit;
pub mod error;
pub mod history;
pub mod scene;
pub mod segment;
pub mod shape;

pub use apply::{apply, cancel, ApplyReport};
pub use edit::{Edit, EditId};
pub use error::CoreError;
pub use history::{History, HistoryList};
pub use scene::{Scene, SceneStore};
pub use segment::{Segment, SegmentDelta, SegmentOutcome, SegmentTracker};
pub use shape::{Rect, Shape, ShapeId, ShapeKind};
