use thiserror::Error;

use crate::edit::EditId;
use crate::shape::ShapeId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Shape not found: {0}")]
    ShapeNotFound(ShapeId),
    #[error("Stale reference to edit {0}")]
    StaleReference(EditId),
    #[error("Edit {0} is present in both current and undone")]
    DuplicateAcrossLists(EditId),
}
