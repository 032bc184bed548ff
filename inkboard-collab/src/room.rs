//! Room access state machine.
//!
//! ```text
//!            begin_share            room_created
//!   Local ───────────────► SharedPending ───────────► Author
//!     │
//!     │ join(private id)                          ──► Author
//!     │ join(no private id)                       ──► Viewer
//!     │ join_with_invite ──► Viewer (pending) ──┬──► Coop    (invite_accepted)
//!     │                                         └──► Viewer  (invite_rejected)
//!     │                     Author ──► Viewer    (private_id_refused)
//!     ◄──────────────────────── leave ─────────────── any
//! ```
//!
//! Only `Author` and `Coop` forward local edits. The check happens before a
//! message reaches the transport; the relay still has the final word.

use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::protocol::{ClientMessage, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomMode {
    /// No room; edits stay local.
    Local,
    /// Local edits exist and a room is being created for them.
    SharedPending,
    /// Holds the private id: full write authority and sharing control.
    Author,
    /// Holds a validated invite: write authority, no sharing control.
    Coop,
    /// Read-only.
    Viewer,
}

/// What the session should do with an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendGate {
    Forward,
    /// Keep it local; nothing is shared yet.
    Hold,
}

/// What the transport needs to (re)enter a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomCredentials {
    pub room_id: String,
    pub private_id: Option<String>,
    pub invite: Option<String>,
}

impl RoomCredentials {
    pub fn viewer(room_id: impl Into<String>) -> Self {
        Self { room_id: room_id.into(), private_id: None, invite: None }
    }

    pub fn author(room_id: impl Into<String>, private_id: impl Into<String>) -> Self {
        Self { room_id: room_id.into(), private_id: Some(private_id.into()), invite: None }
    }

    pub fn invited(room_id: impl Into<String>, invite: impl Into<String>) -> Self {
        Self { room_id: room_id.into(), private_id: None, invite: Some(invite.into()) }
    }

    /// Handshake sent on every (re)connect: `Join`, then `Auth` when an
    /// invite is held.
    pub fn handshake(&self) -> Vec<ClientMessage> {
        let mut out = vec![ClientMessage::Join {
            room_id: self.room_id.clone(),
            private_id: self.private_id.clone(),
        }];
        if let Some(token) = &self.invite {
            out.push(ClientMessage::Auth { token: token.clone() });
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomAccess {
    mode: RoomMode,
    public_id: Option<String>,
    private_id: Option<String>,
    pending_invite: Option<String>,
}

impl Default for RoomAccess {
    fn default() -> Self {
        Self::local()
    }
}

impl RoomAccess {
    pub fn local() -> Self {
        Self {
            mode: RoomMode::Local,
            public_id: None,
            private_id: None,
            pending_invite: None,
        }
    }

    pub fn mode(&self) -> RoomMode {
        self.mode
    }

    pub fn public_id(&self) -> Option<&str> {
        self.public_id.as_deref()
    }

    pub fn private_id(&self) -> Option<&str> {
        self.private_id.as_deref()
    }

    pub fn pending_invite(&self) -> Option<&str> {
        self.pending_invite.as_deref()
    }

    pub fn is_shared(&self) -> bool {
        self.public_id.is_some()
    }

    pub fn can_edit(&self) -> bool {
        self.mode != RoomMode::Viewer
    }

    pub fn can_broadcast(&self) -> bool {
        matches!(self.mode, RoomMode::Author | RoomMode::Coop)
    }

    pub fn can_manage_sharing(&self) -> bool {
        self.mode == RoomMode::Author
    }

    fn require(&self, wanted: RoomMode, action: &'static str) -> Result<(), SessionError> {
        if self.mode == wanted {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition { from: self.mode, action })
        }
    }

    /// First share action on a local board. The ids name the room that is
    /// about to be created from the local history.
    pub fn begin_share(
        &mut self,
        public_id: impl Into<String>,
        private_id: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.require(RoomMode::Local, "share")?;
        self.public_id = Some(public_id.into());
        self.private_id = Some(private_id.into());
        self.mode = RoomMode::SharedPending;
        Ok(())
    }

    /// The relay acknowledged the room for a pending share; we are its author.
    pub fn room_created(&mut self) -> Result<(), SessionError> {
        self.require(RoomMode::SharedPending, "finish sharing")?;
        self.mode = RoomMode::Author;
        Ok(())
    }

    /// Open an existing room, as author when the private id is known.
    pub fn join(&mut self, public_id: impl Into<String>, private_id: Option<String>) -> Result<(), SessionError> {
        self.require(RoomMode::Local, "join a room")?;
        self.public_id = Some(public_id.into());
        self.mode = if private_id.is_some() { RoomMode::Author } else { RoomMode::Viewer };
        self.private_id = private_id;
        Ok(())
    }

    /// Open a room through an invite. Read-only until the relay validates it.
    pub fn join_with_invite(
        &mut self,
        public_id: impl Into<String>,
        invite_id: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.require(RoomMode::Local, "join with an invite")?;
        self.public_id = Some(public_id.into());
        self.pending_invite = Some(invite_id.into());
        self.mode = RoomMode::Viewer;
        Ok(())
    }

    /// The relay granted a role in response to `Auth`.
    pub fn authed(&mut self, role: Role) {
        self.pending_invite = None;
        self.mode = match role {
            Role::Author => RoomMode::Author,
            Role::Coop => RoomMode::Coop,
        };
    }

    pub fn invite_accepted(&mut self) {
        self.authed(Role::Coop);
    }

    pub fn invite_rejected(&mut self) {
        log::warn!("invite for room {:?} rejected, continuing as viewer", self.public_id);
        self.pending_invite = None;
        self.mode = RoomMode::Viewer;
    }

    /// The relay refused our private id on `Join`. A pending share has no
    /// room to fall back to; a joining author keeps reading as a viewer.
    pub fn private_id_refused(&mut self) -> RoomMode {
        match self.mode {
            RoomMode::SharedPending => self.leave(),
            RoomMode::Author => {
                log::warn!("private id for room {:?} refused, continuing as viewer", self.public_id);
                self.private_id = None;
                self.mode = RoomMode::Viewer;
            }
            _ => {}
        }
        self.mode
    }

    pub fn leave(&mut self) {
        *self = Self::local();
    }

    /// Credentials for the current room, if any.
    pub fn credentials(&self) -> Option<RoomCredentials> {
        Some(RoomCredentials {
            room_id: self.public_id.clone()?,
            private_id: self.private_id.clone(),
            invite: self.pending_invite.clone(),
        })
    }

    /// Decide what to do with an outbound message.
    pub fn gate(&self, msg: &ClientMessage) -> Result<SendGate, SessionError> {
        if !msg.is_mutating() {
            return Ok(if self.is_shared() { SendGate::Forward } else { SendGate::Hold });
        }
        match self.mode {
            RoomMode::Author | RoomMode::Coop => Ok(SendGate::Forward),
            RoomMode::Local | RoomMode::SharedPending => Ok(SendGate::Hold),
            RoomMode::Viewer => Err(SessionError::Unauthorized(msg.kind())),
        }
    }
}
