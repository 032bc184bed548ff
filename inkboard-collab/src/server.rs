//! WebSocket relay with room-based routing.
//!
//! ```text
//! Client A ──┐                       ┌── RelayState (RoomLog per room)
//!            ├── ws://host/room/<id> ┤
//! Client B ──┘                       └── RoomManager ── BroadcastGroup
//!                                                           │
//!                                              ┌────────────┼────────────┐
//!                                              ▼            ▼            ▼
//!                                          Client A     Client B     Client C
//! ```
//!
//! Each connection runs one task. Inbound frames go through
//! [`RelayState::handle`]; replies are written straight back and broadcasts
//! go through the room's [`BroadcastGroup`]. Room logs stay in memory for the
//! lifetime of the process.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, RelayFrame, RoomManager};
use crate::codec::{default_codec, JsonCodec, WireCodec};
use crate::protocol::{ClientMessage, InfoAction, ServerMessage, MALFORMED, NO_SUCH_ROOM, ROOM_FULL};
use crate::relay::{Peer, RelayState};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_peers_per_room: usize,
    /// Frames buffered per peer before a slow peer starts losing them.
    pub broadcast_capacity: usize,
    /// Wire format; clients must use the same one.
    pub codec: Arc<dyn WireCodec>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_peers_per_room: 100,
            broadcast_capacity: 256,
            codec: default_codec(),
        }
    }
}

impl ServerConfig {
    pub fn with_codec(mut self, codec: impl WireCodec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Defaults overridden by `INKBOARD_BIND`, `INKBOARD_MAX_PEERS`,
    /// `INKBOARD_BROADCAST_CAPACITY` and `INKBOARD_CODEC` (`bincode` or `json`).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = lookup("INKBOARD_BIND") {
            config.bind_addr = addr;
        }
        if let Some(n) = parse_var(&lookup, "INKBOARD_MAX_PEERS") {
            config.max_peers_per_room = n;
        }
        if let Some(n) = parse_var(&lookup, "INKBOARD_BROADCAST_CAPACITY") {
            config.broadcast_capacity = n;
        }
        match lookup("INKBOARD_CODEC").as_deref() {
            None | Some("bincode") => {}
            Some("json") => config.codec = Arc::new(JsonCodec),
            Some(other) => log::warn!("ignoring INKBOARD_CODEC={other:?}: expected bincode or json"),
        }
        config
    }
}

fn parse_var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    let raw = lookup(key)?;
    match raw.parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            log::warn!("ignoring {key}={raw:?}: expected a positive integer");
            None
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub malformed_messages: u64,
}

/// Room id from a `/room/<id>` request path.
pub fn room_from_path(path: &str) -> Option<String> {
    let id = path.strip_prefix("/room/")?.trim_end_matches('/');
    if id.is_empty() || id.contains('/') {
        None
    } else {
        Some(id.to_string())
    }
}

pub struct SyncServer {
    config: ServerConfig,
    state: Arc<RwLock<RelayState>>,
    room_manager: Arc<RoomManager>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    pub fn new(config: ServerConfig) -> Self {
        let room_manager = Arc::new(RoomManager::new(config.broadcast_capacity));
        Self {
            config,
            state: Arc::new(RwLock::new(RelayState::new())),
            room_manager,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        log::info!("Relay listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let state = self.state.clone();
            let room_manager = self.room_manager.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, state, room_manager, stats, config).await
                {
                    log::error!("Peer {addr} dropped: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        state: Arc<RwLock<RelayState>>,
        room_manager: Arc<RoomManager>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), BoxError> {
        let mut path_room = None;
        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            match room_from_path(req.uri().path()) {
                Some(room) => {
                    path_room = Some(room);
                    Ok(resp)
                }
                None => {
                    let mut refusal = ErrorResponse::new(Some("expected /room/<id>".to_string()));
                    *refusal.status_mut() = StatusCode::NOT_FOUND;
                    Err(refusal)
                }
            }
        })
        .await?;
        let Some(path_room) = path_room else {
            return Ok(());
        };
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let codec = config.codec.as_ref();

        let mut peer = Peer::new(Uuid::new_v4());
        log::info!("Peer {} connected from {addr} for room {path_room}", peer.id);
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut group: Option<Arc<BroadcastGroup>> = None;
        let mut broadcast_rx: Option<broadcast::Receiver<Arc<RelayFrame>>> = None;

        // Socket failures end the loop; cleanup below always runs.
        let result: Result<(), BoxError> = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(frame @ (Message::Binary(_) | Message::Text(_)))) => {
                            let data = frame.into_data();
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += data.len() as u64;
                            }

                            let msg = match codec.decode_client(&data) {
                                    Ok(msg) => msg,
                                    Err(e) => {
                                        log::warn!("Undecodable frame from {addr}: {e}");
                                        stats.write().await.malformed_messages += 1;
                                        let info = ServerMessage::info_error(InfoAction::Decode, MALFORMED);
                                        ws_sender.send(codec.frame(codec.encode_server(&info)?)?).await?;
                                        continue;
                                    }
                                };

                                if let ClientMessage::Join { room_id, .. } = &msg {
                                    let refusal = if *room_id != path_room {
                                        log::warn!("Peer {} asked for {room_id} on a {path_room} connection", peer.id);
                                        Some(NO_SUCH_ROOM)
                                    } else if peer.room.as_deref() != Some(room_id.as_str())
                                        && Self::room_is_full(&room_manager, room_id, config.max_peers_per_room).await
                                    {
                                        Some(ROOM_FULL)
                                    } else {
                                        None
                                    };
                                    if let Some(reason) = refusal {
                                        let info = ServerMessage::info_error(InfoAction::Join, reason);
                                        ws_sender.send(codec.frame(codec.encode_server(&info)?)?).await?;
                                        continue;
                                    }
                                }

                                let joined_before = peer.room.clone();
                                let dispatch = state.write().await.handle(&mut peer, msg);

                                if peer.room != joined_before {
                                    if let (Some(old), Some(old_room)) = (group.take(), joined_before) {
                                        old.remove_peer(&peer.id).await;
                                        room_manager.remove_if_empty(&old_room).await;
                                    }
                                    if let Some(room) = &peer.room {
                                        let joined = room_manager.get_or_create(room).await;
                                        broadcast_rx = Some(joined.add_peer(peer.id).await);
                                        group = Some(joined);
                                    }
                                }

                                for reply in &dispatch.reply {
                                    ws_sender.send(codec.frame(codec.encode_server(reply)?)?).await?;
                                }
                                if let Some(g) = &group {
                                    for out in &dispatch.broadcast {
                                        g.broadcast(peer.id, out, codec)?;
                                    }
                                }
                            }

                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Peer {addr} disconnected");
                                break;
                            }

                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }

                            Some(Err(e)) => {
                                log::error!("Socket error from peer {addr}: {e}");
                                break;
                            }

                            _ => {}
                        }
                    }

                    frame = async {
                        match broadcast_rx.as_mut() {
                            Some(rx) => rx.recv().await,
                            // Not in a room yet
                            None => std::future::pending().await,
                        }
                    } => {
                        match frame {
                            Ok(frame) => {
                                if frame.sender != peer.id {
                                    ws_sender.send(codec.frame(frame.bytes.clone())?).await?;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                log::warn!("Peer {} lagged by {n} frames", peer.id);
                                if let Some(g) = &group {
                                    g.record_dropped(n);
                                }
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
            Ok::<(), BoxError>(())
        }
        .await;

        if let Some(g) = group {
            g.remove_peer(&peer.id).await;
            if let Some((room, quit)) = state.write().await.leave(&peer) {
                if let Err(e) = g.broadcast(peer.id, &quit, codec) {
                    log::warn!("Could not announce departure of {}: {e}", peer.id);
                }
                room_manager.remove_if_empty(&room).await;
            }
        }
        stats.write().await.active_connections -= 1;

        result
    }

    async fn room_is_full(room_manager: &RoomManager, room_id: &str, max_peers: usize) -> bool {
        match room_manager.get(room_id).await {
            Some(group) => group.peer_count().await >= max_peers,
            None => false,
        }
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn room_manager(&self) -> &Arc<RoomManager> {
        &self.room_manager
    }

    pub async fn room_count(&self) -> usize {
        self.state.read().await.room_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_binds_localhost() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.max_peers_per_room, 100);
        assert_eq!(config.broadcast_capacity, 256);
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("INKBOARD_BIND", "0.0.0.0:7000"),
            ("INKBOARD_MAX_PEERS", "8"),
            ("INKBOARD_BROADCAST_CAPACITY", "lots"),
        ]
        .into_iter()
        .collect();
        let config = ServerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.bind_addr, "0.0.0.0:7000");
        assert_eq!(config.max_peers_per_room, 8);
        // Unparseable values fall back to the default.
        assert_eq!(config.broadcast_capacity, 256);
        assert!(!config.codec.text_frames());

        let json = ServerConfig::from_lookup(|k| (k == "INKBOARD_CODEC").then(|| "json".to_string()));
        assert!(json.codec.text_frames());
    }

    #[test]
    fn test_room_from_path() {
        assert_eq!(room_from_path("/room/abc"), Some("abc".to_string()));
        assert_eq!(room_from_path("/room/abc/"), Some("abc".to_string()));
        assert_eq!(room_from_path("/room/"), None);
        assert_eq!(room_from_path("/room/a/b"), None);
        assert_eq!(room_from_path("/abc"), None);
    }

    #[tokio::test]
    async fn test_fresh_relay_has_no_traffic() {
        let server = SyncServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(server.room_count().await, 0);
        assert_eq!(server.room_manager().room_count().await, 0);
    }
}
