//! The client-side synchronization engine.
//!
//! A [`Session`] owns everything one board client needs (history, scene,
//! room access, board metadata and an optional transport) and is driven from
//! a single task:
//!
//! ```text
//! local gesture ──► Session::apply_edit / stroke API ──► MessageSink
//! SyncEvent     ──► Session::handle_event ──► History / scene / observer
//! ```
//!
//! Nothing here blocks or awaits; the transport lives in
//! [`client`](crate::client).

use std::collections::HashSet;
use std::time::Duration;

use inkboard_core::{
    apply, cancel, ApplyReport, CoreError, Edit, EditId, History, HistoryList, Scene, SceneStore,
    Segment, SegmentDelta, SegmentOutcome, SegmentTracker, Shape, ShapeId, ShapeKind,
};

use crate::client::{ClientHandle, SyncEvent};
use crate::error::SessionError;
use crate::protocol::{
    BoardMeta, ClientMessage, InfoAction, InfoStatus, ServerMessage, UndoRedoAction, NO_SUCH_ROOM, UNAUTHORIZED,
};
use crate::pull::{apply_pull, PullRequest};
use crate::room::{RoomAccess, RoomCredentials, RoomMode, SendGate};

/// Where outbound messages go.
pub trait MessageSink {
    fn send(&self, msg: ClientMessage) -> Result<(), SessionError>;

    /// Point the transport at another room.
    fn join_room(&self, room: RoomCredentials) -> Result<(), SessionError>;
}

/// Application hooks. Every method defaults to a no-op.
pub trait SessionObserver {
    fn on_open(&mut self) {}
    fn on_message(&mut self, _msg: &ServerMessage) {}
    fn on_error(&mut self, _err: &SessionError) {}
    fn on_close(&mut self) {}
    fn on_retry(&mut self, _attempt: u32, _delay: Duration) {}
    fn on_reconnect(&mut self) {}
    fn on_invite(&mut self, _invite_id: &str) {}
}

/// Logs lifecycle events and errors.
#[derive(Debug, Default)]
pub struct LogObserver;

impl SessionObserver for LogObserver {
    fn on_open(&mut self) {
        log::info!("session connected");
    }

    fn on_error(&mut self, err: &SessionError) {
        if err.is_recoverable() {
            log::warn!("session: {err}");
        } else {
            log::error!("session: {err}");
        }
    }

    fn on_close(&mut self) {
        log::info!("session closed");
    }

    fn on_retry(&mut self, attempt: u32, delay: Duration) {
        log::info!("reconnecting (attempt {attempt}) in {delay:?}");
    }

    fn on_invite(&mut self, invite_id: &str) {
        log::info!("invite issued: {invite_id}");
    }
}

/// Explicit per-board state. No globals.
pub struct SessionContext<S, K> {
    pub history: History,
    pub scene: S,
    pub transport: Option<K>,
    pub room: RoomAccess,
    pub meta: BoardMeta,
}

pub struct Session<S: SceneStore = Scene, K: MessageSink = ClientHandle> {
    ctx: SessionContext<S, K>,
    segments: SegmentTracker,
    /// Strokes this client is drawing.
    local_strokes: HashSet<ShapeId>,
    pull_pending: bool,
    observer: Box<dyn SessionObserver>,
}

impl<S: SceneStore, K: MessageSink> Session<S, K> {
    /// A local board with no room and no transport.
    pub fn new(scene: S) -> Self {
        Self {
            ctx: SessionContext {
                history: History::new(),
                scene,
                transport: None,
                room: RoomAccess::local(),
                meta: BoardMeta::default(),
            },
            segments: SegmentTracker::new(),
            local_strokes: HashSet::new(),
            pull_pending: false,
            observer: Box::new(LogObserver),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn attach(&mut self, transport: K) {
        self.ctx.transport = Some(transport);
    }

    pub fn detach(&mut self) -> Option<K> {
        self.ctx.transport.take()
    }

    pub fn context(&self) -> &SessionContext<S, K> {
        &self.ctx
    }

    pub fn history(&self) -> &History {
        &self.ctx.history
    }

    pub fn scene(&self) -> &S {
        &self.ctx.scene
    }

    pub fn room(&self) -> &RoomAccess {
        &self.ctx.room
    }

    pub fn meta(&self) -> &BoardMeta {
        &self.ctx.meta
    }

    pub fn is_pull_pending(&self) -> bool {
        self.pull_pending
    }

    fn ensure_can_edit(&self, action: &'static str) -> Result<(), SessionError> {
        if self.ctx.room.can_edit() {
            Ok(())
        } else {
            Err(SessionError::Unauthorized(action))
        }
    }

    /// Route a message through the room gate to the transport.
    pub fn send(&mut self, msg: ClientMessage) -> Result<(), SessionError> {
        match self.ctx.room.gate(&msg)? {
            SendGate::Hold => {
                log::trace!("holding {} locally", msg.kind());
                Ok(())
            }
            SendGate::Forward => match &self.ctx.transport {
                Some(transport) => transport.send(msg),
                None => {
                    log::debug!("no transport attached, {} not sent", msg.kind());
                    Ok(())
                }
            },
        }
    }

    // --- local edits ---

    /// Apply a local edit, record it and broadcast it.
    pub fn apply_edit(&mut self, edit: Edit) -> Result<ApplyReport, SessionError> {
        self.ensure_can_edit("Push")?;
        let id = edit.id();
        if self.ctx.history.contains(HistoryList::Current, id)
            || self.ctx.history.contains(HistoryList::Undone, id)
        {
            return Err(SessionError::DuplicateEdit(id.clone()));
        }
        let report = apply(&mut self.ctx.scene, &edit);
        self.commit(edit, false)?;
        Ok(report)
    }

    /// Revert an edit on the scene only, e.g. an aborted gesture preview.
    /// History and peers are not involved.
    pub fn cancel_edit(&mut self, edit: &Edit) -> ApplyReport {
        cancel(&mut self.ctx.scene, edit)
    }

    fn commit(&mut self, edit: Edit, silent: bool) -> Result<(), SessionError> {
        let had_redo = self.ctx.history.can_redo();
        if !self.ctx.history.push(edit.clone()) {
            return Ok(());
        }
        self.send(ClientMessage::Push { edits: vec![edit], silent })?;
        if had_redo {
            self.rebase()?;
        }
        Ok(())
    }

    pub fn undo(&mut self, id: Option<&EditId>) -> Result<Option<Edit>, SessionError> {
        self.ensure_can_edit("UndoRedo")?;
        let Some(edit) = self.ctx.history.undo(&mut self.ctx.scene, id) else {
            return Ok(None);
        };
        self.send(ClientMessage::UndoRedo {
            action: UndoRedoAction::Undo,
            id: edit.id().clone(),
        })?;
        Ok(Some(edit))
    }

    pub fn redo(&mut self, id: Option<&EditId>) -> Result<Option<Edit>, SessionError> {
        self.ensure_can_edit("UndoRedo")?;
        let Some(edit) = self.ctx.history.redo(&mut self.ctx.scene, id) else {
            return Ok(None);
        };
        self.send(ClientMessage::UndoRedo {
            action: UndoRedoAction::Redo,
            id: edit.id().clone(),
        })?;
        Ok(Some(edit))
    }

    /// Drop the redo branch here and on the relay.
    pub fn rebase(&mut self) -> Result<(), SessionError> {
        self.ensure_can_edit("Empty")?;
        self.ctx.history.rebase();
        self.send(ClientMessage::Empty { scope: HistoryList::Undone })
    }

    /// Start a new, empty board.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        self.ensure_can_edit("Empty")?;
        self.ctx.scene.clear();
        self.ctx.history.reset();
        self.segments.clear(&mut self.ctx.scene);
        self.local_strokes.clear();
        self.send(ClientMessage::Empty { scope: HistoryList::Current })?;
        self.send(ClientMessage::Empty { scope: HistoryList::Undone })
    }

    pub fn set_size(&mut self, width: f32, height: f32) -> Result<(), SessionError> {
        self.ensure_can_edit("SetSize")?;
        self.ctx.meta.size = Some((width, height));
        self.send(ClientMessage::SetSize { width, height })
    }

    pub fn set_title(&mut self, title: impl Into<String>) -> Result<(), SessionError> {
        self.ensure_can_edit("SetTitle")?;
        let title = title.into();
        self.ctx.meta.title = Some(title.clone());
        self.send(ClientMessage::SetTitle { title })
    }

    // --- strokes ---

    /// Start drawing a shape at `(x, y)` and announce it to peers.
    pub fn begin_stroke(&mut self, kind: ShapeKind, x: f32, y: f32) -> Result<ShapeId, SessionError> {
        self.ensure_can_edit("PushSegment")?;
        let shape = Shape::skeleton(ShapeId::new(), kind, x, y);
        let id = shape.id.clone();
        self.ctx.scene.insert_shape(shape.clone());
        self.local_strokes.insert(id.clone());
        self.send(ClientMessage::PushSegment(Segment::Start { shape }))?;
        Ok(id)
    }

    pub fn extend_stroke(&mut self, id: &ShapeId, delta: SegmentDelta) -> Result<(), SessionError> {
        if !self.local_strokes.contains(id) {
            return Err(SessionError::OutOfOrderSegment(id.clone()));
        }
        let mut shape = self
            .ctx
            .scene
            .find_shape(id)
            .cloned()
            .ok_or_else(|| CoreError::ShapeNotFound(id.clone()))?;
        Segment::merge_delta(&mut shape, &delta);
        self.ctx.scene.update_shape(id, &shape)?;
        self.send(ClientMessage::PushSegment(Segment::Update { shape_id: id.clone(), delta }))
    }

    /// Commit the stroke as an `Add`. The relay stores it from a silent
    /// push; peers build the same edit from the `End` segment.
    pub fn finish_stroke(&mut self, id: &ShapeId) -> Result<Edit, SessionError> {
        if !self.local_strokes.remove(id) {
            return Err(SessionError::OutOfOrderSegment(id.clone()));
        }
        let shape = self
            .ctx
            .scene
            .find_shape(id)
            .cloned()
            .ok_or_else(|| CoreError::ShapeNotFound(id.clone()))?;
        let edit = Edit::add(shape);
        self.commit(edit.clone(), true)?;
        self.send(ClientMessage::PushSegment(Segment::End {
            shape_id: id.clone(),
            edit_id: edit.id().clone(),
        }))?;
        Ok(edit)
    }

    // --- rooms ---

    /// Turn this local board into a shared room we author.
    pub fn share(&mut self, public_id: impl Into<String>, private_id: impl Into<String>) -> Result<(), SessionError> {
        self.ctx.room.begin_share(public_id, private_id)?;
        self.join_transport()
    }

    /// Open an existing room, as author when `private_id` is known.
    pub fn join(&mut self, public_id: impl Into<String>, private_id: Option<String>) -> Result<(), SessionError> {
        self.ctx.room.join(public_id, private_id)?;
        self.join_transport()
    }

    pub fn join_with_invite(&mut self, public_id: impl Into<String>, invite_id: impl Into<String>) -> Result<(), SessionError> {
        self.ctx.room.join_with_invite(public_id, invite_id)?;
        self.join_transport()
    }

    fn join_transport(&mut self) -> Result<(), SessionError> {
        match (&self.ctx.transport, self.ctx.room.credentials()) {
            (Some(transport), Some(room)) => transport.join_room(room),
            _ => Ok(()),
        }
    }

    /// Go back to a local board. Returns the transport so the caller can
    /// shut it down.
    pub fn leave(&mut self) -> Option<K> {
        self.ctx.room.leave();
        self.segments.clear(&mut self.ctx.scene);
        self.pull_pending = false;
        self.detach()
    }

    pub fn request_invite(&mut self) -> Result<(), SessionError> {
        if !self.ctx.room.can_manage_sharing() {
            return Err(SessionError::Unauthorized("Invite"));
        }
        self.send(ClientMessage::Invite)
    }

    /// Ask the relay for the diff against our history.
    pub fn request_pull(&mut self) -> Result<(), SessionError> {
        if !self.ctx.room.is_shared() {
            return Ok(());
        }
        self.pull_pending = true;
        self.send(PullRequest::from_history(&self.ctx.history).into_message())
    }

    fn pull_once(&mut self) {
        if self.pull_pending {
            log::debug!("pull already in flight");
            return;
        }
        if let Err(e) = self.request_pull() {
            self.observer.on_error(&e);
        }
    }

    // --- inbound ---

    pub fn handle_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Open => self.observer.on_open(),
            SyncEvent::Joined => {
                if let Err(e) = self.on_joined() {
                    self.observer.on_error(&e);
                }
            }
            SyncEvent::Message(msg) => {
                self.observer.on_message(&msg);
                self.handle_server_message(msg);
            }
            SyncEvent::Retry { attempt, delay } => self.observer.on_retry(attempt, delay),
            SyncEvent::Reconnected => {
                // Strokes in flight were cut; the pull after the join brings
                // back the ones that were committed.
                self.segments.clear(&mut self.ctx.scene);
                self.observer.on_reconnect();
            }
            SyncEvent::Error(e) => self.observer.on_error(&e),
            SyncEvent::Closed => {
                self.segments.clear(&mut self.ctx.scene);
                self.pull_pending = false;
                self.observer.on_close();
            }
        }
    }

    fn on_joined(&mut self) -> Result<(), SessionError> {
        if self.ctx.room.mode() == RoomMode::SharedPending {
            self.ctx.room.room_created()?;
            // Seed the new room with the local board.
            self.ctx.history.rebase();
            let edits = self.ctx.history.current().to_vec();
            if !edits.is_empty() {
                log::info!("seeding room with {} edits", edits.len());
                self.send(ClientMessage::Push { edits, silent: true })?;
            }
            if let Some((width, height)) = self.ctx.meta.size {
                self.send(ClientMessage::SetSize { width, height })?;
            }
            if let Some(title) = self.ctx.meta.title.clone() {
                self.send(ClientMessage::SetTitle { title })?;
            }
        }
        self.pull_pending = false;
        self.request_pull()
    }

    pub fn handle_server_message(&mut self, msg: ServerMessage) {
        log::trace!("inbound {}", msg.kind());
        match msg {
            ServerMessage::PushData { edits } => self.on_push(edits),
            ServerMessage::PushSegmentData(segment) => {
                match self.segments.handle(&mut self.ctx.scene, segment) {
                    SegmentOutcome::Applied | SegmentOutcome::Ignored => {}
                    SegmentOutcome::Commit(edit) => {
                        self.ctx.history.push(edit);
                    }
                    SegmentOutcome::PullNeeded(shape_id) => {
                        self.observer.on_error(&SessionError::OutOfOrderSegment(shape_id));
                        self.pull_once();
                    }
                }
            }
            ServerMessage::UndoRedoData { action, id } => {
                let done = match action {
                    UndoRedoAction::Undo => self.ctx.history.undo(&mut self.ctx.scene, Some(&id)),
                    UndoRedoAction::Redo => self.ctx.history.redo(&mut self.ctx.scene, Some(&id)),
                };
                if done.is_none() {
                    self.observer.on_error(&SessionError::StaleReference(id.to_string()));
                }
            }
            ServerMessage::EmptyData { scope } => {
                if scope == HistoryList::Current {
                    for edit in self.ctx.history.current().iter().rev() {
                        cancel(&mut self.ctx.scene, edit);
                    }
                }
                self.ctx.history.clear(scope);
            }
            ServerMessage::SizeData { width, height } => self.ctx.meta.size = Some((width, height)),
            ServerMessage::TitleData { title } => self.ctx.meta.title = Some(title),
            ServerMessage::PullData(data) => {
                self.pull_pending = false;
                for edit in &data.current.to_create {
                    self.release_strokes(edit);
                }
                match apply_pull(&mut self.ctx.history, &mut self.ctx.scene, &data) {
                    Ok(report) => log::debug!("pull: {report:?}"),
                    Err(e) => self.observer.on_error(&e),
                }
            }
            ServerMessage::Info { status: InfoStatus::Ok, action, payload } => {
                log::debug!("relay ok for {action:?}: {payload}");
            }
            ServerMessage::Info { status: InfoStatus::Error, action, payload } => {
                let err = match action {
                    InfoAction::Join if payload == NO_SUCH_ROOM => SessionError::NoSuchRoom(
                        self.ctx.room.public_id().unwrap_or_default().to_string(),
                    ),
                    InfoAction::Join if payload == UNAUTHORIZED => {
                        if self.ctx.room.private_id_refused() == RoomMode::Viewer {
                            if let Err(e) = self.join_transport() {
                                self.observer.on_error(&e);
                            }
                        }
                        SessionError::Unauthorized("Join")
                    }
                    InfoAction::Auth => {
                        self.ctx.room.invite_rejected();
                        SessionError::ServerRejected { action, reason: payload }
                    }
                    InfoAction::PushSegment => {
                        // Our stroke never reached peers.
                        self.local_strokes.clear();
                        SessionError::ServerRejected { action, reason: payload }
                    }
                    _ => SessionError::ServerRejected { action, reason: payload },
                };
                self.observer.on_error(&err);
            }
            ServerMessage::Authed { role } => self.ctx.room.authed(role),
            ServerMessage::QuitData { peer_id } => {
                log::info!("peer {peer_id} left the room");
                // Segments carry no sender; strokes that are still live come
                // back through a pull when they end.
                self.segments.abandon_open(&mut self.ctx.scene);
            }
            ServerMessage::InviteData { invite_id } => self.observer.on_invite(&invite_id),
        }
    }

    fn on_push(&mut self, edits: Vec<Edit>) {
        for edit in edits {
            let id = edit.id();
            if self.ctx.history.contains(HistoryList::Current, id)
                || self.ctx.history.contains(HistoryList::Undone, id)
            {
                log::debug!("already have edit {id}, skipping");
                continue;
            }
            self.release_strokes(&edit);
            apply(&mut self.ctx.scene, &edit);
            self.ctx.history.push(edit);
        }
    }

    fn release_strokes(&mut self, edit: &Edit) {
        for id in edit.shape_ids() {
            self.segments.release(&id);
        }
    }
}

impl<K: MessageSink> Session<Scene, K> {
    /// Resize the board so every shape fits.
    pub fn fit_to_content(&mut self) -> Result<(), SessionError> {
        match self.ctx.scene.extent() {
            Some(extent) => self.set_size(extent.right(), extent.bottom()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::protocol::{ListDiff, PullData, Role};
    use inkboard_core::Rect;

    #[derive(Clone, Default)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<ClientMessage>>>,
        joins: Arc<Mutex<Vec<RoomCredentials>>>,
    }

    impl RecordingSink {
        fn take(&self) -> Vec<ClientMessage> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    impl MessageSink for RecordingSink {
        fn send(&self, msg: ClientMessage) -> Result<(), SessionError> {
            self.sent.lock().unwrap().push(msg);
            Ok(())
        }

        fn join_room(&self, room: RoomCredentials) -> Result<(), SessionError> {
            self.joins.lock().unwrap().push(room);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingObserver {
        errors: Arc<Mutex<Vec<SessionError>>>,
        invites: Arc<Mutex<Vec<String>>>,
    }

    impl SessionObserver for RecordingObserver {
        fn on_error(&mut self, err: &SessionError) {
            self.errors.lock().unwrap().push(err.clone());
        }

        fn on_invite(&mut self, invite_id: &str) {
            self.invites.lock().unwrap().push(invite_id.to_string());
        }
    }

    type TestSession = Session<Scene, RecordingSink>;

    fn session_as(private_id: Option<&str>) -> (TestSession, RecordingSink, RecordingObserver) {
        let sink = RecordingSink::default();
        let observer = RecordingObserver::default();
        let mut session = TestSession::new(Scene::new()).with_observer(Box::new(observer.clone()));
        session.attach(sink.clone());
        session.join("board", private_id.map(str::to_string)).unwrap();
        sink.take();
        (session, sink, observer)
    }

    fn rect_add(edit_id: &str, shape_id: &str) -> Edit {
        Edit::Add {
            id: edit_id.into(),
            shape: Shape::with_id(shape_id, ShapeKind::Rect, Rect::new(0.0, 0.0, 5.0, 5.0)),
        }
    }

    fn pulls(sent: &[ClientMessage]) -> usize {
        sent.iter().filter(|m| matches!(m, ClientMessage::Pull { .. })).count()
    }

    #[test]
    fn test_local_board_keeps_edits_local() {
        let sink = RecordingSink::default();
        let mut session = TestSession::new(Scene::new());
        session.attach(sink.clone());

        session.apply_edit(rect_add("e1", "r1")).unwrap();
        assert!(session.scene().contains(&"r1".into()));
        assert_eq!(session.history().current().len(), 1);
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_author_edit_undo_and_rebase() {
        let (mut session, sink, _) = session_as(Some("secret"));
        session.apply_edit(rect_add("e1", "r1")).unwrap();
        session.apply_edit(rect_add("e2", "r2")).unwrap();
        assert_eq!(sink.take().len(), 2);

        let undone = session.undo(Some(&"e1".into())).unwrap().unwrap();
        assert_eq!(undone.id().as_str(), "e1");
        assert!(!session.scene().contains(&"r1".into()));
        assert!(session.scene().contains(&"r2".into()));
        assert_eq!(
            sink.take(),
            vec![ClientMessage::UndoRedo { action: UndoRedoAction::Undo, id: "e1".into() }]
        );

        // A fresh edit after an undo drops the redo branch everywhere.
        session.apply_edit(rect_add("e3", "r3")).unwrap();
        assert!(session.history().undone().is_empty());
        let sent = sink.take();
        assert!(matches!(sent[0], ClientMessage::Push { silent: false, .. }));
        assert_eq!(sent[1], ClientMessage::Empty { scope: HistoryList::Undone });

        assert_eq!(session.redo(None).unwrap(), None);
    }

    #[test]
    fn test_viewer_cannot_edit() {
        let (mut session, sink, _) = session_as(None);
        assert_eq!(session.room().mode(), RoomMode::Viewer);
        let err = session.apply_edit(rect_add("e1", "r1")).unwrap_err();
        assert_eq!(err, SessionError::Unauthorized("Push"));
        assert!(session.scene().is_empty());
        assert!(session.history().is_empty());
        assert!(session.begin_stroke(ShapeKind::Pencil, 0.0, 0.0).is_err());
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_remote_push_is_deduplicated() {
        let (mut session, _, _) = session_as(None);
        let push = ServerMessage::PushData { edits: vec![rect_add("e1", "r1")] };
        session.handle_server_message(push.clone());
        session.handle_server_message(push);
        assert_eq!(session.history().current().len(), 1);
        assert_eq!(session.scene().len(), 1);
    }

    #[test]
    fn test_remote_stroke_commits_one_add() {
        let (mut session, _, _) = session_as(None);
        let shape = Shape::skeleton("s1", ShapeKind::Pencil, 1.0, 1.0);
        session.handle_server_message(ServerMessage::PushSegmentData(Segment::Start { shape }));
        session.handle_server_message(ServerMessage::PushSegmentData(Segment::Update {
            shape_id: "s1".into(),
            delta: SegmentDelta::AddPoints(vec![4.0, 5.0]),
        }));
        session.handle_server_message(ServerMessage::PushSegmentData(Segment::End {
            shape_id: "s1".into(),
            edit_id: "e9".into(),
        }));

        let current = session.history().current();
        assert_eq!(current.len(), 1);
        let Edit::Add { id, shape } = &current[0] else {
            panic!("expected Add, got {:?}", current[0]);
        };
        assert_eq!(id.as_str(), "e9");
        assert!(shape.points.windows(2).any(|w| w == [4.0, 5.0]));
    }

    #[test]
    fn test_orphan_segments_pull_once() {
        let (mut session, sink, observer) = session_as(None);
        session.handle_server_message(ServerMessage::PushSegmentData(Segment::Update {
            shape_id: "ghost".into(),
            delta: SegmentDelta::AddPoints(vec![1.0, 1.0]),
        }));
        session.handle_server_message(ServerMessage::PushSegmentData(Segment::Update {
            shape_id: "ghost".into(),
            delta: SegmentDelta::AddPoints(vec![2.0, 2.0]),
        }));
        session.handle_server_message(ServerMessage::PushSegmentData(Segment::End {
            shape_id: "ghost".into(),
            edit_id: "e1".into(),
        }));

        assert_eq!(pulls(&sink.take()), 1);
        assert!(session.is_pull_pending());
        assert!(session.history().is_empty());
        assert!(observer
            .errors
            .lock()
            .unwrap()
            .contains(&SessionError::OutOfOrderSegment("ghost".into())));

        session.handle_server_message(ServerMessage::PullData(PullData::default()));
        assert!(!session.is_pull_pending());
    }

    #[test]
    fn test_local_stroke_message_sequence() {
        let (mut session, sink, _) = session_as(Some("secret"));
        let id = session.begin_stroke(ShapeKind::Pencil, 0.0, 0.0).unwrap();
        session.extend_stroke(&id, SegmentDelta::AddPoints(vec![3.0, 4.0])).unwrap();
        let edit = session.finish_stroke(&id).unwrap();

        let sent = sink.take();
        assert_eq!(sent.len(), 4);
        assert!(matches!(&sent[0], ClientMessage::PushSegment(Segment::Start { .. })));
        assert!(matches!(&sent[1], ClientMessage::PushSegment(Segment::Update { .. })));
        assert_eq!(sent[2], ClientMessage::Push { edits: vec![edit.clone()], silent: true });
        assert_eq!(
            sent[3],
            ClientMessage::PushSegment(Segment::End { shape_id: id.clone(), edit_id: edit.id().clone() })
        );
        assert_eq!(session.history().ids(HistoryList::Current), vec![edit.id().clone()]);

        assert_eq!(
            session.finish_stroke(&id).unwrap_err(),
            SessionError::OutOfOrderSegment(id)
        );
    }

    #[test]
    fn test_share_seeds_room_on_join() {
        let sink = RecordingSink::default();
        let mut session = TestSession::new(Scene::new());
        session.attach(sink.clone());
        session.apply_edit(rect_add("e1", "r1")).unwrap();
        session.set_title("Offsite").unwrap();

        session.share("pub", "priv").unwrap();
        assert_eq!(session.room().mode(), RoomMode::SharedPending);
        assert_eq!(
            sink.joins.lock().unwrap().clone(),
            vec![RoomCredentials::author("pub", "priv")]
        );

        session.handle_event(SyncEvent::Joined);
        assert_eq!(session.room().mode(), RoomMode::Author);
        let sent = sink.take();
        assert_eq!(
            sent[0],
            ClientMessage::Push { edits: vec![rect_add("e1", "r1")], silent: true }
        );
        assert!(sent.contains(&ClientMessage::SetTitle { title: "Offsite".into() }));
        assert_eq!(pulls(&sent), 1);
    }

    #[test]
    fn test_remote_empty_current_clears_scene() {
        let (mut session, _, _) = session_as(None);
        session.handle_server_message(ServerMessage::PushData {
            edits: vec![rect_add("e1", "r1"), rect_add("e2", "r2")],
        });
        session.handle_server_message(ServerMessage::EmptyData { scope: HistoryList::Current });
        assert!(session.scene().is_empty());
        assert!(session.history().current().is_empty());
    }

    #[test]
    fn test_remote_undo_redo() {
        let (mut session, sink, observer) = session_as(None);
        session.handle_server_message(ServerMessage::PushData { edits: vec![rect_add("e1", "r1")] });
        session.handle_server_message(ServerMessage::UndoRedoData { action: UndoRedoAction::Undo, id: "e1".into() });
        assert!(session.scene().is_empty());
        session.handle_server_message(ServerMessage::UndoRedoData { action: UndoRedoAction::Redo, id: "e1".into() });
        assert!(session.scene().contains(&"r1".into()));
        // Remote undo/redo is never echoed.
        assert!(sink.take().is_empty());

        session.handle_server_message(ServerMessage::UndoRedoData { action: UndoRedoAction::Redo, id: "e1".into() });
        assert_eq!(
            observer.errors.lock().unwrap().last(),
            Some(&SessionError::StaleReference("e1".into()))
        );
    }

    #[test]
    fn test_invite_flow() {
        let sink = RecordingSink::default();
        let observer = RecordingObserver::default();
        let mut session = TestSession::new(Scene::new()).with_observer(Box::new(observer.clone()));
        session.attach(sink.clone());

        session.join_with_invite("pub", "bogus").unwrap();
        assert_eq!(session.room().mode(), RoomMode::Viewer);
        session.handle_server_message(ServerMessage::info_error(InfoAction::Auth, "Unauthorized"));
        assert_eq!(session.room().mode(), RoomMode::Viewer);
        assert!(session.room().pending_invite().is_none());
        assert_eq!(observer.errors.lock().unwrap().len(), 1);

        let (mut author, author_sink, author_observer) = session_as(Some("secret"));
        author.request_invite().unwrap();
        assert_eq!(author_sink.take(), vec![ClientMessage::Invite]);
        author.handle_server_message(ServerMessage::InviteData { invite_id: "inv-1".into() });
        assert_eq!(author_observer.invites.lock().unwrap().clone(), vec!["inv-1".to_string()]);

        let mut coop = TestSession::new(Scene::new());
        coop.join_with_invite("board", "inv-1").unwrap();
        coop.handle_server_message(ServerMessage::Authed { role: Role::Coop });
        assert_eq!(coop.room().mode(), RoomMode::Coop);
        assert_eq!(coop.request_invite(), Err(SessionError::Unauthorized("Invite")));
    }

    #[test]
    fn test_pull_data_is_applied() {
        let (mut session, _, _) = session_as(None);
        session.handle_server_message(ServerMessage::PullData(PullData {
            current: ListDiff { to_create: vec![rect_add("e1", "r1")], to_delete: vec![] },
            undone: ListDiff::default(),
        }));
        assert!(session.scene().contains(&"r1".into()));
        assert_eq!(session.history().ids(HistoryList::Current), vec![EditId::from("e1")]);
    }

    #[test]
    fn test_reset_and_meta() {
        let (mut session, sink, _) = session_as(Some("secret"));
        session.apply_edit(rect_add("e1", "r1")).unwrap();
        session.set_size(640.0, 480.0).unwrap();
        session.handle_server_message(ServerMessage::TitleData { title: "Remote".into() });
        assert_eq!(session.meta().title.as_deref(), Some("Remote"));
        sink.take();

        session.reset().unwrap();
        assert!(session.scene().is_empty());
        assert!(session.history().is_empty());
        assert_eq!(
            sink.take(),
            vec![
                ClientMessage::Empty { scope: HistoryList::Current },
                ClientMessage::Empty { scope: HistoryList::Undone },
            ]
        );
        assert_eq!(session.meta().size, Some((640.0, 480.0)));

        session.apply_edit(rect_add("e2", "r2")).unwrap();
        session.fit_to_content().unwrap();
        assert_eq!(session.meta().size, Some((5.0, 5.0)));
    }

    #[test]
    fn test_leave_detaches_transport() {
        let (mut session, _, _) = session_as(Some("secret"));
        assert!(session.leave().is_some());
        assert_eq!(session.room().mode(), RoomMode::Local);
        assert!(session.context().transport.is_none());
    }

    fn start_segment(id: &str) -> ServerMessage {
        ServerMessage::PushSegmentData(Segment::Start {
            shape: Shape::skeleton(id, ShapeKind::Pencil, 1.0, 1.0),
        })
    }

    #[test]
    fn test_reconnect_drops_unfinished_remote_stroke() {
        let (mut session, _, _) = session_as(None);
        session.handle_server_message(start_segment("s1"));
        assert!(session.scene().contains(&"s1".into()));

        session.handle_event(SyncEvent::Reconnected);
        session.handle_event(SyncEvent::Joined);
        session.handle_server_message(ServerMessage::PullData(PullData::default()));

        assert!(session.history().current().is_empty());
        assert!(!session.scene().contains(&"s1".into()));
    }

    #[test]
    fn test_pulled_stroke_survives_reconnect() {
        let (mut session, _, _) = session_as(None);
        session.handle_server_message(start_segment("s1"));
        let committed = Edit::Add {
            id: "e1".into(),
            shape: Shape::skeleton("s1", ShapeKind::Pencil, 1.0, 1.0),
        };
        session.handle_server_message(ServerMessage::PullData(PullData {
            current: ListDiff { to_create: vec![committed], to_delete: vec![] },
            undone: ListDiff::default(),
        }));

        session.handle_event(SyncEvent::Closed);
        assert!(session.scene().contains(&"s1".into()));
        assert_eq!(session.history().current().len(), 1);
    }

    #[test]
    fn test_quit_abandons_open_strokes() {
        let (mut session, sink, _) = session_as(None);
        session.handle_server_message(start_segment("s1"));
        session.handle_server_message(ServerMessage::QuitData { peer_id: uuid::Uuid::new_v4() });
        assert!(!session.scene().contains(&"s1".into()));

        // A stroke that was still live finishes through a pull.
        session.handle_server_message(ServerMessage::PushSegmentData(Segment::End {
            shape_id: "s1".into(),
            edit_id: "e1".into(),
        }));
        assert!(session.history().current().is_empty());
        assert_eq!(pulls(&sink.take()), 1);
    }

    #[test]
    fn test_refused_private_id_falls_back_to_viewer() {
        let (mut session, sink, observer) = session_as(Some("wrong"));
        assert_eq!(session.room().mode(), RoomMode::Author);

        session.handle_server_message(ServerMessage::info_error(InfoAction::Join, UNAUTHORIZED));
        assert_eq!(session.room().mode(), RoomMode::Viewer);
        assert!(observer.errors.lock().unwrap().contains(&SessionError::Unauthorized("Join")));
        assert_eq!(sink.joins.lock().unwrap().last(), Some(&RoomCredentials::viewer("board")));

        let err = session.apply_edit(rect_add("e1", "r1")).unwrap_err();
        assert_eq!(err, SessionError::Unauthorized("Push"));
        assert!(session.scene().is_empty());
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_duplicate_edit_leaves_scene_untouched() {
        let (mut session, sink, _) = session_as(Some("secret"));
        session.apply_edit(rect_add("e1", "r1")).unwrap();
        sink.take();

        let err = session.apply_edit(rect_add("e1", "r2")).unwrap_err();
        assert_eq!(err, SessionError::DuplicateEdit("e1".into()));
        assert!(!session.scene().contains(&"r2".into()));
        assert_eq!(session.history().current().len(), 1);
        assert!(sink.take().is_empty());

        // Undone ids count too.
        session.undo(None).unwrap();
        assert!(session.apply_edit(rect_add("e1", "r3")).is_err());
        assert!(!session.scene().contains(&"r3".into()));
    }
}
