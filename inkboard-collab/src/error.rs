use inkboard_core::{CoreError, EditId, ShapeId};
use thiserror::Error;

use crate::protocol::{InfoAction, ProtocolError};
use crate::room::RoomMode;

/// Errors surfaced by the client session and transport.
///
/// Stale references and malformed frames are recovered locally; the others
/// reach the application through `SessionObserver::on_error`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("No such room: {0}")]
    NoSuchRoom(String),
    #[error("Timed out after {attempts} connection attempts")]
    TimeOut { attempts: u32 },
    #[error("Edit {0} is already in history")]
    DuplicateEdit(EditId),
    #[error("Stale reference: {0}")]
    StaleReference(String),
    #[error("Out-of-order segment for shape {0}")]
    OutOfOrderSegment(ShapeId),
    #[error("Malformed message: {0}")]
    MalformedMessage(ProtocolError),
    #[error("Unauthorized: {0} requires write access")]
    Unauthorized(&'static str),
    #[error("Server rejected {action:?}: {reason}")]
    ServerRejected { action: InfoAction, reason: String },
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Reconciliation failed: {0}")]
    Reconciliation(#[from] CoreError),
    #[error("Cannot {action} while in {from:?} mode")]
    InvalidTransition { from: RoomMode, action: &'static str },
}

impl From<ProtocolError> for SessionError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::ConnectionClosed => SessionError::ConnectionClosed,
            other => SessionError::MalformedMessage(other),
        }
    }
}

impl SessionError {
    /// Whether the session recovers from this on its own.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::StaleReference(_)
                | SessionError::OutOfOrderSegment(_)
                | SessionError::MalformedMessage(_)
        )
    }
}
