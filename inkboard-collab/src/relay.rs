//! Canonical room state kept by the relay.
//!
//! [`RelayState::handle`] is a pure function of the current rooms, the
//! sending peer and one message: it returns what to send back to the peer and
//! what to fan out to the rest of the room. The socket plumbing lives in
//! [`server`](crate::server).

use std::collections::{HashMap, HashSet};

use inkboard_core::{Edit, EditId, History, HistoryList};
use uuid::Uuid;

use crate::protocol::{
    BoardMeta, ClientMessage, InfoAction, PullData, Role, ServerMessage, UndoRedoAction,
    NO_SUCH_ROOM, UNAUTHORIZED,
};
use crate::pull::diff_list;

/// One room's authoritative log.
#[derive(Debug, Clone)]
pub struct RoomLog {
    private_id: String,
    invites: HashSet<String>,
    history: History,
    meta: BoardMeta,
}

impl RoomLog {
    pub fn new(private_id: impl Into<String>) -> Self {
        Self {
            private_id: private_id.into(),
            invites: HashSet::new(),
            history: History::new(),
            meta: BoardMeta::default(),
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn meta(&self) -> &BoardMeta {
        &self.meta
    }

    /// Store committed edits. Returns the ones that were new.
    pub fn push(&mut self, edits: Vec<Edit>) -> Vec<Edit> {
        let mut stored = Vec::with_capacity(edits.len());
        for edit in edits {
            // A re-pushed undone edit moves back to current.
            self.history.remove_last(HistoryList::Undone, edit.id());
            if self.history.push(edit.clone()) {
                stored.push(edit);
            }
        }
        stored
    }

    /// Move `id` between lists. Returns `false` for an id the log does not
    /// hold in the source list.
    pub fn undo_redo(&mut self, action: UndoRedoAction, id: &EditId) -> bool {
        let (from, to) = match action {
            UndoRedoAction::Undo => (HistoryList::Current, HistoryList::Undone),
            UndoRedoAction::Redo => (HistoryList::Undone, HistoryList::Current),
        };
        match self.history.remove_last(from, id) {
            Some(edit) => {
                self.history.append(to, edit);
                true
            }
            None => false,
        }
    }

    pub fn empty(&mut self, scope: HistoryList) {
        self.history.clear(scope);
    }

    pub fn pull(&self, current: &[EditId], undone: &[EditId]) -> PullData {
        PullData {
            current: diff_list(self.history.current(), current),
            undone: diff_list(self.history.undone(), undone),
        }
    }

    pub fn issue_invite(&mut self) -> String {
        let invite = Uuid::new_v4().to_string();
        self.invites.insert(invite.clone());
        invite
    }

    /// Role granted for a token, if any.
    pub fn authorize(&self, token: &str) -> Option<Role> {
        if token == self.private_id {
            Some(Role::Author)
        } else if self.invites.contains(token) {
            Some(Role::Coop)
        } else {
            None
        }
    }
}

/// A connected client as the relay sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: Uuid,
    pub room: Option<String>,
    /// `None` means read-only.
    pub role: Option<Role>,
}

impl Peer {
    pub fn new(id: Uuid) -> Self {
        Self { id, room: None, role: None }
    }

    pub fn can_write(&self) -> bool {
        self.role.is_some()
    }
}

/// Outcome of one inbound message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dispatch {
    /// Sent to the originating peer only.
    pub reply: Vec<ServerMessage>,
    /// Sent to every other peer in the room.
    pub broadcast: Vec<ServerMessage>,
}

impl Dispatch {
    fn reply(msg: ServerMessage) -> Self {
        Self { reply: vec![msg], broadcast: Vec::new() }
    }

    fn broadcast(msg: ServerMessage) -> Self {
        Self { reply: Vec::new(), broadcast: vec![msg] }
    }
}

#[derive(Debug, Default)]
pub struct RelayState {
    rooms: HashMap<String, RoomLog>,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room(&self, room_id: &str) -> Option<&RoomLog> {
        self.rooms.get(room_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn handle(&mut self, peer: &mut Peer, msg: ClientMessage) -> Dispatch {
        log::trace!("peer {} sent {}", peer.id, msg.kind());
        match msg {
            ClientMessage::Join { room_id, private_id } => self.join(peer, room_id, private_id),
            ClientMessage::Auth { token } => self.auth(peer, &token),
            ClientMessage::Pull { current, undone } => match self.joined_room(peer) {
                Some(room) => Dispatch::reply(ServerMessage::PullData(room.pull(&current, &undone))),
                None => Dispatch::reply(ServerMessage::info_error(InfoAction::Pull, NO_SUCH_ROOM)),
            },
            other => self.mutate(peer, other),
        }
    }

    fn joined_room(&self, peer: &Peer) -> Option<&RoomLog> {
        self.rooms.get(peer.room.as_deref()?)
    }

    fn join(&mut self, peer: &mut Peer, room_id: String, private_id: Option<String>) -> Dispatch {
        let role = match (self.rooms.get(&room_id), private_id) {
            (Some(room), Some(token)) => match room.authorize(&token) {
                Some(Role::Author) => Some(Role::Author),
                _ => {
                    log::warn!("peer {} presented a bad private id for room {room_id}", peer.id);
                    return Dispatch::reply(ServerMessage::info_error(InfoAction::Join, UNAUTHORIZED));
                }
            },
            (Some(_), None) => None,
            (None, Some(token)) => {
                log::info!("room {room_id} created by peer {}", peer.id);
                self.rooms.insert(room_id.clone(), RoomLog::new(token));
                Some(Role::Author)
            }
            (None, None) => {
                log::info!("peer {} asked for unknown room {room_id}", peer.id);
                return Dispatch::reply(ServerMessage::info_error(InfoAction::Join, NO_SUCH_ROOM));
            }
        };

        let mut reply = vec![ServerMessage::info_ok(InfoAction::Join, room_id.clone())];
        if let Some(role) = role {
            reply.push(ServerMessage::Authed { role });
        }
        if let Some(room) = self.rooms.get(&room_id) {
            reply.extend(room.meta().announce());
        }
        log::info!("peer {} joined room {room_id} as {:?}", peer.id, role);
        peer.room = Some(room_id);
        peer.role = role;
        Dispatch { reply, broadcast: Vec::new() }
    }

    fn auth(&mut self, peer: &mut Peer, token: &str) -> Dispatch {
        let Some(room) = self.joined_room(peer) else {
            return Dispatch::reply(ServerMessage::info_error(InfoAction::Auth, NO_SUCH_ROOM));
        };
        match room.authorize(token) {
            Some(role) => {
                peer.role = Some(role);
                Dispatch::reply(ServerMessage::Authed { role })
            }
            None => Dispatch::reply(ServerMessage::info_error(InfoAction::Auth, UNAUTHORIZED)),
        }
    }

    fn mutate(&mut self, peer: &Peer, msg: ClientMessage) -> Dispatch {
        let action = msg.info_action();
        let Some(room) = peer.room.as_deref().and_then(|id| self.rooms.get_mut(id)) else {
            return Dispatch::reply(ServerMessage::info_error(action, NO_SUCH_ROOM));
        };
        if !peer.can_write() {
            log::debug!("rejecting {} from read-only peer {}", msg.kind(), peer.id);
            return Dispatch::reply(ServerMessage::info_error(action, UNAUTHORIZED));
        }

        match msg {
            ClientMessage::Push { edits, silent } => {
                let stored = room.push(edits);
                if silent || stored.is_empty() {
                    Dispatch::default()
                } else {
                    Dispatch::broadcast(ServerMessage::PushData { edits: stored })
                }
            }
            ClientMessage::PushSegment(segment) => {
                Dispatch::broadcast(ServerMessage::PushSegmentData(segment))
            }
            ClientMessage::UndoRedo { action, id } => {
                if room.undo_redo(action, &id) {
                    Dispatch::broadcast(ServerMessage::UndoRedoData { action, id })
                } else {
                    log::warn!("{action:?} of unknown edit {id} from peer {}", peer.id);
                    Dispatch::default()
                }
            }
            ClientMessage::Empty { scope } => {
                room.empty(scope);
                Dispatch::broadcast(ServerMessage::EmptyData { scope })
            }
            ClientMessage::SetSize { width, height } => {
                room.meta.size = Some((width, height));
                Dispatch::broadcast(ServerMessage::SizeData { width, height })
            }
            ClientMessage::SetTitle { title } => {
                room.meta.title = Some(title.clone());
                Dispatch::broadcast(ServerMessage::TitleData { title })
            }
            ClientMessage::Invite => {
                if peer.role != Some(Role::Author) {
                    return Dispatch::reply(ServerMessage::info_error(action, UNAUTHORIZED));
                }
                Dispatch::reply(ServerMessage::InviteData { invite_id: room.issue_invite() })
            }
            ClientMessage::Join { .. } | ClientMessage::Auth { .. } | ClientMessage::Pull { .. } => {
                Dispatch::default()
            }
        }
    }

    /// A peer disconnected. Rooms outlive their peers.
    pub fn leave(&mut self, peer: &Peer) -> Option<(String, ServerMessage)> {
        let room = peer.room.clone()?;
        log::info!("peer {} left room {room}", peer.id);
        Some((room, ServerMessage::QuitData { peer_id: peer.id }))
    }
}
