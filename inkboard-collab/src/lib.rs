//! # inkboard-collab: real-time sharing for inkboard boards
//!
//! Clients edit optimistically and stream edits through a relay, which keeps
//! the canonical history of each room and answers pulls.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket       ┌─────────────┐
//! │ Session     │ ◄─────────────────► │ SyncServer  │
//! │ + SyncClient│   /room/<id>        │ (relay)     │
//! └──────┬──────┘                     └──────┬──────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌─────────────┐                     ┌─────────────┐
//! │ History     │ ── Pull ──────────► │ RoomLog     │
//! │ + Scene     │ ◄── PullData ────── │ (authority) │
//! └─────────────┘                     └──────┬──────┘
//!                                            │
//!                                    ┌───────┴───────┐
//!                                    │ BroadcastGroup│
//!                                    │ (fan-out)     │
//!                                    └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: client/server message envelopes
//! - [`codec`]: pluggable wire codecs (bincode, JSON)
//! - [`room`]: room access state machine
//! - [`session`]: client engine: local edits, inbound dispatch, strokes
//! - [`pull`]: reconciliation against the relay
//! - [`connection`] / [`backoff`]: connection lifecycle and retry policy
//! - [`client`]: WebSocket transport task
//! - [`relay`] / [`broadcast`] / [`server`]: the relay

pub mod backoff;
pub mod broadcast;
pub mod client;
pub mod codec;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod pull;
pub mod relay;
pub mod room;
pub mod server;
pub mod session;

// Re-exports for convenience
pub use backoff::{BackoffPolicy, LinearBackoff};
pub use broadcast::{BroadcastGroup, BroadcastStats, RelayFrame, RoomManager};
pub use client::{ClientConfig, ClientHandle, SyncClient, SyncEvent};
pub use codec::{default_codec, BincodeCodec, Codec, JsonCodec, WireCodec};
pub use connection::{ConnectionMachine, ConnectionState, OutboundQueue, RetryDecision};
pub use error::SessionError;
pub use protocol::{
    BoardMeta, ClientMessage, InfoAction, InfoStatus, ListDiff, ProtocolError, PullData, Role,
    ServerMessage, UndoRedoAction,
};
pub use pull::{apply_pull, diff_list, PullReport, PullRequest};
pub use relay::{Dispatch, Peer, RelayState, RoomLog};
pub use room::{RoomAccess, RoomCredentials, RoomMode, SendGate};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use session::{LogObserver, MessageSink, Session, SessionContext, SessionObserver};
