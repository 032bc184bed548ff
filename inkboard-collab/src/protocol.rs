//! Wire protocol between board clients and the relay.
//!
//! Every frame is one externally tagged envelope, `{ <MessageType>: payload }`,
//! encoded by a [`Codec`](crate::codec::Codec). The default codec writes a
//! single version byte followed by the bincode body:
//!
//! ```text
//! ┌─────────┬────────────────────────────────────┐
//! │ version │ bincode(ClientMessage | ServerMessage) │
//! │ 1 byte  │ variable                           │
//! └─────────┴────────────────────────────────────┘
//! ```

use inkboard_core::{Edit, EditId, HistoryList, Segment};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::{BincodeCodec, Codec};

/// Schema version written in front of every binary frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// `Info` payload when a join targets a room that does not exist.
pub const NO_SUCH_ROOM: &str = "NoSuchRoom";
/// `Info` payload when a write is attempted without write authority.
pub const UNAUTHORIZED: &str = "Unauthorized";
/// `Info` payload when a room already holds its maximum number of peers.
pub const ROOM_FULL: &str = "RoomFull";
/// `Info` payload when a frame could not be decoded.
pub const MALFORMED: &str = "MalformedMessage";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UndoRedoAction {
    Undo,
    Redo,
}

/// Write role granted by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Author,
    Coop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfoStatus {
    Ok,
    Error,
}

/// Which request an `Info` message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfoAction {
    Join,
    Auth,
    Push,
    PushSegment,
    Pull,
    UndoRedo,
    Empty,
    SetSize,
    SetTitle,
    Invite,
    Decode,
}

/// Per-list answer to a pull.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListDiff {
    /// Edits the server has that the client lacks, in server order.
    pub to_create: Vec<Edit>,
    /// Ids the client holds that the server no longer considers valid.
    pub to_delete: Vec<EditId>,
}

impl ListDiff {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullData {
    pub current: ListDiff,
    pub undone: ListDiff,
}

impl PullData {
    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.undone.is_empty()
    }
}

/// Board-level settings shared by everyone in a room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardMeta {
    pub size: Option<(f32, f32)>,
    pub title: Option<String>,
}

impl BoardMeta {
    /// Messages that bring a late joiner up to date.
    pub fn announce(&self) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        if let Some((width, height)) = self.size {
            out.push(ServerMessage::SizeData { width, height });
        }
        if let Some(title) = &self.title {
            out.push(ServerMessage::TitleData { title: title.clone() });
        }
        out
    }
}

/// Client → server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Enter a room. A private id proves author authority (and creates the
    /// room if it does not exist yet).
    Join { room_id: String, private_id: Option<String> },
    /// Commit edits. Silent pushes are stored but not relayed.
    Push { edits: Vec<Edit>, silent: bool },
    PushSegment(Segment),
    /// Id manifests of the client's history lists.
    Pull { current: Vec<EditId>, undone: Vec<EditId> },
    UndoRedo { action: UndoRedoAction, id: EditId },
    /// Clear one list on the server's copy.
    Empty { scope: HistoryList },
    SetSize { width: f32, height: f32 },
    SetTitle { title: String },
    /// Present an invite id (or private id) for write authority.
    Auth { token: String },
    /// Ask the relay for a fresh invite id. Author only.
    Invite,
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Join { .. } => "Join",
            ClientMessage::Push { .. } => "Push",
            ClientMessage::PushSegment(_) => "PushSegment",
            ClientMessage::Pull { .. } => "Pull",
            ClientMessage::UndoRedo { .. } => "UndoRedo",
            ClientMessage::Empty { .. } => "Empty",
            ClientMessage::SetSize { .. } => "SetSize",
            ClientMessage::SetTitle { .. } => "SetTitle",
            ClientMessage::Auth { .. } => "Auth",
            ClientMessage::Invite => "Invite",
        }
    }

    /// Whether the message changes shared room state and therefore needs
    /// write authority.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            ClientMessage::Push { .. }
                | ClientMessage::PushSegment(_)
                | ClientMessage::UndoRedo { .. }
                | ClientMessage::Empty { .. }
                | ClientMessage::SetSize { .. }
                | ClientMessage::SetTitle { .. }
                | ClientMessage::Invite
        )
    }

    pub fn info_action(&self) -> InfoAction {
        match self {
            ClientMessage::Join { .. } => InfoAction::Join,
            ClientMessage::Push { .. } => InfoAction::Push,
            ClientMessage::PushSegment(_) => InfoAction::PushSegment,
            ClientMessage::Pull { .. } => InfoAction::Pull,
            ClientMessage::UndoRedo { .. } => InfoAction::UndoRedo,
            ClientMessage::Empty { .. } => InfoAction::Empty,
            ClientMessage::SetSize { .. } => InfoAction::SetSize,
            ClientMessage::SetTitle { .. } => InfoAction::SetTitle,
            ClientMessage::Auth { .. } => InfoAction::Auth,
            ClientMessage::Invite => InfoAction::Invite,
        }
    }

    /// Serialize to the default binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        BincodeCodec.encode(self)
    }

    /// Deserialize from the default binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        BincodeCodec.decode(bytes)
    }
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    PushData { edits: Vec<Edit> },
    PushSegmentData(Segment),
    UndoRedoData { action: UndoRedoAction, id: EditId },
    EmptyData { scope: HistoryList },
    SizeData { width: f32, height: f32 },
    TitleData { title: String },
    PullData(PullData),
    /// Diagnostic or error signal about a previous request.
    Info {
        status: InfoStatus,
        action: InfoAction,
        payload: String,
    },
    Authed { role: Role },
    /// A peer left the room.
    QuitData { peer_id: Uuid },
    InviteData { invite_id: String },
}

impl ServerMessage {
    pub fn info_ok(action: InfoAction, payload: impl Into<String>) -> Self {
        ServerMessage::Info {
            status: InfoStatus::Ok,
            action,
            payload: payload.into(),
        }
    }

    pub fn info_error(action: InfoAction, payload: impl Into<String>) -> Self {
        ServerMessage::Info {
            status: InfoStatus::Error,
            action,
            payload: payload.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::PushData { .. } => "PushData",
            ServerMessage::PushSegmentData(_) => "PushSegmentData",
            ServerMessage::UndoRedoData { .. } => "UndoRedoData",
            ServerMessage::EmptyData { .. } => "EmptyData",
            ServerMessage::SizeData { .. } => "SizeData",
            ServerMessage::TitleData { .. } => "TitleData",
            ServerMessage::PullData(_) => "PullData",
            ServerMessage::Info { .. } => "Info",
            ServerMessage::Authed { .. } => "Authed",
            ServerMessage::QuitData { .. } => "QuitData",
            ServerMessage::InviteData { .. } => "InviteData",
        }
    }

    /// Whether this is the relay acknowledging our join.
    pub fn is_join_ack(&self) -> bool {
        matches!(
            self,
            ServerMessage::Info { status: InfoStatus::Ok, action: InfoAction::Join, .. }
        )
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        BincodeCodec.encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        BincodeCodec.decode(bytes)
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    UnsupportedVersion(u8),
    EmptyFrame,
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::UnsupportedVersion(v) => write!(f, "Unsupported protocol version: {v}"),
            Self::EmptyFrame => write!(f, "Empty frame"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
