//! WebSocket transport for a board session.
//!
//! [`SyncClient::connect`] spawns one task that owns the socket, the
//! outbound queue and the reconnect timer. The application talks to it
//! through a [`ClientHandle`] and receives [`SyncEvent`]s on a bounded
//! channel:
//!
//! ```text
//!  Session ──ClientHandle──► commands ──► transport task ──► socket
//!     ▲                                        │
//!     └──────────── SyncEvent (mpsc) ◄─────────┘
//! ```
//!
//! On every (re)connect the task sends `Join` (and `Auth` for invites)
//! before replaying messages queued while the socket was down.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::backoff::{BackoffPolicy, LinearBackoff};
use crate::codec::{default_codec, WireCodec};
use crate::connection::{ConnectionMachine, ConnectionState, OutboundQueue, RetryDecision};
use crate::error::SessionError;
use crate::protocol::{ClientMessage, InfoAction, InfoStatus, ServerMessage, NO_SUCH_ROOM, UNAUTHORIZED};
use crate::room::RoomCredentials;
use crate::session::MessageSink;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL; the room path is appended.
    pub server_url: String,
    pub connect_timeout: Duration,
    /// Messages held while disconnected.
    pub queue_capacity: usize,
    pub event_capacity: usize,
    pub backoff: Arc<dyn BackoffPolicy>,
    /// Wire format; must match the relay's.
    pub codec: Arc<dyn WireCodec>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9090".to_string(),
            connect_timeout: Duration::from_secs(5),
            queue_capacity: 10_000,
            event_capacity: 256,
            backoff: Arc::new(LinearBackoff::default()),
            codec: default_codec(),
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: impl BackoffPolicy + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    pub fn with_codec(mut self, codec: impl WireCodec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    pub fn room_url(&self, room_id: &str) -> String {
        format!("{}/room/{}", self.server_url.trim_end_matches('/'), room_id)
    }
}

/// Events emitted by the transport task.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Socket established (join not yet acknowledged).
    Open,
    /// The relay accepted our join.
    Joined,
    Message(ServerMessage),
    /// Connection lost; retrying after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Socket re-established after a drop.
    Reconnected,
    Error(SessionError),
    /// The task stopped. No further events follow.
    Closed,
}

#[derive(Debug)]
enum ClientCommand {
    Send(ClientMessage),
    Join(RoomCredentials),
    Disconnect,
}

/// Cheap, cloneable handle to the transport task.
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<ClientCommand>,
    state: Arc<RwLock<ConnectionState>>,
}

impl ClientHandle {
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Stop the transport. Local history and scene are untouched.
    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.command(ClientCommand::Disconnect)
    }

    /// Leave the current room (if any) and join another one.
    pub fn join_room(&self, room: RoomCredentials) -> Result<(), SessionError> {
        self.command(ClientCommand::Join(room))
    }

    fn command(&self, cmd: ClientCommand) -> Result<(), SessionError> {
        self.commands.send(cmd).map_err(|_| SessionError::ConnectionClosed)
    }
}

impl MessageSink for ClientHandle {
    fn send(&self, msg: ClientMessage) -> Result<(), SessionError> {
        self.command(ClientCommand::Send(msg))
    }

    fn join_room(&self, room: RoomCredentials) -> Result<(), SessionError> {
        ClientHandle::join_room(self, room)
    }
}

pub struct SyncClient;

impl SyncClient {
    /// Spawn the transport and start dialing `room`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(config: ClientConfig, room: RoomCredentials) -> (ClientHandle, mpsc::Receiver<SyncEvent>) {
        Self::spawn(config, Some(room))
    }

    /// Spawn the transport without a room. It stays disconnected until
    /// [`ClientHandle::join_room`]; messages sent meanwhile are queued.
    pub fn idle(config: ClientConfig) -> (ClientHandle, mpsc::Receiver<SyncEvent>) {
        Self::spawn(config, None)
    }

    fn spawn(config: ClientConfig, room: Option<RoomCredentials>) -> (ClientHandle, mpsc::Receiver<SyncEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity);
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));

        let task = TransportTask {
            machine: ConnectionMachine::new(config.backoff.clone()),
            queue: OutboundQueue::new(config.queue_capacity),
            config,
            room,
            commands: cmd_rx,
            events: event_tx,
            state: state.clone(),
        };
        tokio::spawn(task.run());

        (ClientHandle { commands: cmd_tx, state }, event_rx)
    }
}

/// Why an open socket stopped being driven.
enum Exit {
    Dropped,
    Rejected,
    SwitchRoom,
    Disconnect,
}

struct TransportTask {
    config: ClientConfig,
    room: Option<RoomCredentials>,
    machine: ConnectionMachine,
    queue: OutboundQueue,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    events: mpsc::Sender<SyncEvent>,
    state: Arc<RwLock<ConnectionState>>,
}

impl TransportTask {
    async fn run(mut self) {
        if self.room.is_some() || self.wait_for_join().await {
            self.machine.connect();
            self.publish().await;
            self.connection_loop().await;
        }
        self.machine.closed();
        self.publish().await;
        self.emit(SyncEvent::Closed).await;
    }

    async fn connection_loop(&mut self) {
        loop {
            if let Some(ws) = self.dial().await {
                let reconnected = self.machine.opened();
                self.publish().await;
                self.emit(SyncEvent::Open).await;
                if reconnected {
                    log::info!("Reconnected to {}", self.config.server_url);
                    self.emit(SyncEvent::Reconnected).await;
                }

                match self.drive(ws).await {
                    Exit::Dropped => {}
                    Exit::SwitchRoom => {
                        self.machine.closed();
                        self.machine.connect();
                        self.publish().await;
                        continue;
                    }
                    Exit::Rejected => {
                        if self.wait_for_join().await {
                            continue;
                        }
                        return;
                    }
                    Exit::Disconnect => return,
                }
            }

            match self.machine.failed() {
                RetryDecision::Retry { attempt, delay } => {
                    self.publish().await;
                    log::warn!("Connection lost, retry {attempt} in {delay:?}");
                    self.emit(SyncEvent::Retry { attempt, delay }).await;
                    if !self.backoff(delay).await {
                        return;
                    }
                }
                RetryDecision::GiveUp { attempts } => {
                    self.publish().await;
                    log::error!("Giving up after {attempts} reconnect attempts");
                    self.emit(SyncEvent::Error(SessionError::TimeOut { attempts })).await;
                    if !self.wait_for_join().await {
                        return;
                    }
                }
            }
        }
    }

    async fn dial(&self) -> Option<WsStream> {
        let room = self.room.as_ref()?;
        let url = self.config.room_url(&room.room_id);
        log::debug!("Dialing {url}");
        match tokio::time::timeout(self.config.connect_timeout, tokio_tungstenite::connect_async(&url)).await {
            Ok(Ok((ws, _))) => Some(ws),
            Ok(Err(e)) => {
                log::warn!("Connect to {url} failed: {e}");
                None
            }
            Err(_) => {
                log::warn!("Connect to {url} timed out after {:?}", self.config.connect_timeout);
                None
            }
        }
    }

    /// Run one open socket until it drops or we are told to stop.
    async fn drive(&mut self, ws: WsStream) -> Exit {
        let (mut sink, mut stream) = ws.split();
        let codec = self.config.codec.clone();

        let handshake = self.room.as_ref().map(RoomCredentials::handshake).unwrap_or_default();
        for msg in &handshake {
            if let Err(e) = write(&mut sink, codec.as_ref(), msg).await {
                log::warn!("Handshake failed: {e}");
                return Exit::Dropped;
            }
        }

        let pending = self.queue.drain();
        if !pending.is_empty() {
            log::info!("Replaying {} queued messages", pending.len());
        }
        let mut pending = pending.into_iter();
        while let Some(msg) = pending.next() {
            if let Err(e) = write(&mut sink, codec.as_ref(), &msg).await {
                log::warn!("Replay interrupted: {e}");
                self.queue.enqueue(msg);
                for rest in pending {
                    self.queue.enqueue(rest);
                }
                return Exit::Dropped;
            }
        }

        loop {
            tokio::select! {
                frame = stream.next() => {
                    match frame {
                        Some(Ok(frame @ (Message::Binary(_) | Message::Text(_)))) => match codec.decode_server(&frame.into_data()) {
                            Ok(msg) => {
                                if let Some(exit) = self.on_server_message(msg).await {
                                    let _ = sink.close().await;
                                    return exit;
                                }
                            }
                            Err(e) => {
                                log::warn!("Dropping undecodable frame: {e}");
                                self.emit(SyncEvent::Error(e.into())).await;
                            }
                        },
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Server closed the connection");
                            return Exit::Dropped;
                        }
                        Some(Err(e)) => {
                            log::warn!("WebSocket error: {e}");
                            return Exit::Dropped;
                        }
                        _ => {}
                    }
                }

                cmd = self.commands.recv() => {
                    match cmd {
                        Some(ClientCommand::Send(msg)) => {
                            if let Err(e) = write(&mut sink, codec.as_ref(), &msg).await {
                                log::warn!("Send failed, queueing {}: {e}", msg.kind());
                                self.queue.enqueue(msg);
                                return Exit::Dropped;
                            }
                        }
                        Some(ClientCommand::Join(room)) => {
                            log::info!("Switching to room {}", room.room_id);
                            self.room = Some(room);
                            let _ = sink.close().await;
                            return Exit::SwitchRoom;
                        }
                        Some(ClientCommand::Disconnect) | None => {
                            let _ = sink.close().await;
                            return Exit::Disconnect;
                        }
                    }
                }
            }
        }
    }

    /// Returns `Some` when the socket should be closed.
    async fn on_server_message(&mut self, msg: ServerMessage) -> Option<Exit> {
        if msg.is_join_ack() {
            self.machine.joined();
            self.publish().await;
            self.emit(SyncEvent::Joined).await;
            return None;
        }
        if let ServerMessage::Info { status: InfoStatus::Error, action: InfoAction::Join, payload } = &msg {
            let room_id = self.room.as_ref().map(|r| r.room_id.clone()).unwrap_or_default();
            if payload == NO_SUCH_ROOM {
                log::warn!("Relay has no room {room_id}");
                self.machine.rejected();
                self.publish().await;
                self.emit(SyncEvent::Error(SessionError::NoSuchRoom(room_id))).await;
                return Some(Exit::Rejected);
            }
            if payload == UNAUTHORIZED {
                // The session decides which credentials to retry with.
                log::warn!("Relay refused our private id for room {room_id}");
                self.machine.rejected();
                self.publish().await;
                self.emit(SyncEvent::Message(msg)).await;
                return Some(Exit::Rejected);
            }
        }
        self.emit(SyncEvent::Message(msg)).await;
        None
    }

    /// Sleep before the next dial while still accepting commands. Returns
    /// `false` if the task should stop.
    async fn backoff(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                cmd = self.commands.recv() => match cmd {
                    Some(ClientCommand::Send(msg)) => {
                        self.queue.enqueue(msg);
                    }
                    Some(ClientCommand::Join(room)) => {
                        self.room = Some(room);
                        return true;
                    }
                    Some(ClientCommand::Disconnect) | None => return false,
                },
            }
        }
    }

    /// Park until the application names a room. Returns `false` if the
    /// task should stop.
    async fn wait_for_join(&mut self) -> bool {
        while let Some(cmd) = self.commands.recv().await {
            match cmd {
                ClientCommand::Send(msg) => {
                    self.queue.enqueue(msg);
                }
                ClientCommand::Join(room) => {
                    self.room = Some(room);
                    self.machine.connect();
                    self.publish().await;
                    return true;
                }
                ClientCommand::Disconnect => return false,
            }
        }
        false
    }

    async fn publish(&self) {
        *self.state.write().await = self.machine.state();
    }

    async fn emit(&self, event: SyncEvent) {
        if self.events.send(event).await.is_err() {
            log::debug!("Event receiver dropped");
        }
    }
}

async fn write(sink: &mut WsSink, codec: &dyn WireCodec, msg: &ClientMessage) -> Result<(), SessionError> {
    let frame = codec.frame(codec.encode_client(msg)?)?;
    sink.send(frame)
        .await
        .map_err(|_| SessionError::ConnectionClosed)
}
