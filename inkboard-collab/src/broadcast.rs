//! Fan-out of encoded frames to the peers of a room.
//!
//! Each room owns one tokio broadcast channel. A frame is encoded once and
//! shared by `Arc`; every peer task filters out frames it sent itself.
//! Lagging receivers lose the oldest frames and recover with a pull.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::codec::WireCodec;
use crate::protocol::{ProtocolError, ServerMessage};

/// One encoded message and the peer that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFrame {
    pub sender: Uuid,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
}

/// Lock-free counters read through [`BroadcastGroup::stats`].
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }
}

/// Broadcast group for a single room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<RelayFrame>>,
    peers: Arc<RwLock<HashSet<Uuid>>>,
    capacity: usize,
    atomic_stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    /// `capacity` is the number of frames buffered per peer before a slow
    /// peer starts losing frames.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            peers: Arc::new(RwLock::new(HashSet::new())),
            capacity,
            atomic_stats: Arc::new(AtomicBroadcastStats::new()),
        }
    }

    pub async fn add_peer(&self, peer_id: Uuid) -> broadcast::Receiver<Arc<RelayFrame>> {
        self.peers.write().await.insert(peer_id);
        self.sender.subscribe()
    }

    pub async fn remove_peer(&self, peer_id: &Uuid) -> bool {
        self.peers.write().await.remove(peer_id)
    }

    /// Encode `msg` once and hand it to every subscriber. Returns the number
    /// of receivers, the sender's own included.
    pub fn broadcast(&self, sender: Uuid, msg: &ServerMessage, codec: &dyn WireCodec) -> Result<usize, ProtocolError> {
        let bytes = codec.encode_server(msg)?;
        Ok(self.broadcast_raw(Arc::new(RelayFrame { sender, bytes })))
    }

    pub fn broadcast_raw(&self, frame: Arc<RelayFrame>) -> usize {
        let count = self.sender.send(frame).unwrap_or(0);
        self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Record frames a lagging receiver skipped.
    pub fn record_dropped(&self, n: u64) {
        self.atomic_stats.messages_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn has_peer(&self, peer_id: &Uuid) -> bool {
        self.peers.read().await.contains(peer_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            active_peers: self.peers.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Maps room ids to their broadcast groups.
///
/// Groups exist only while peers are connected; the room's log is kept by
/// [`RelayState`](crate::relay::RelayState) independently.
pub struct RoomManager {
    rooms: Arc<RwLock<HashMap<String, Arc<BroadcastGroup>>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            default_capacity,
        }
    }

    pub async fn get(&self, room_id: &str) -> Option<Arc<BroadcastGroup>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    pub async fn get_or_create(&self, room_id: &str) -> Arc<BroadcastGroup> {
        // Fast path: read lock
        if let Some(group) = self.get(room_id).await {
            return group;
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(BroadcastGroup::new(self.default_capacity)))
            .clone()
    }

    pub async fn remove_if_empty(&self, room_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(group) = rooms.get(room_id) {
            if group.peer_count().await == 0 {
                rooms.remove(room_id);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_peer_join_and_leave() {
        let group = BroadcastGroup::new(16);
        let peer = Uuid::new_v4();

        let _rx = group.add_peer(peer).await;
        assert_eq!(group.peer_count().await, 1);
        assert!(group.has_peer(&peer).await);

        assert!(group.remove_peer(&peer).await);
        assert_eq!(group.peer_count().await, 0);
        assert!(!group.remove_peer(&peer).await);
    }

    #[tokio::test]
    async fn test_fan_out_carries_sender() {
        let group = BroadcastGroup::new(16);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut rx_alice = group.add_peer(alice).await;
        let mut rx_bob = group.add_peer(bob).await;

        let msg = ServerMessage::TitleData { title: "Plan".into() };
        let codec = crate::codec::default_codec();
        assert_eq!(group.broadcast(alice, &msg, codec.as_ref()).unwrap(), 2);

        // Both receive; the sender id lets alice's task skip its own frame.
        let own = rx_alice.recv().await.unwrap();
        assert_eq!(own.sender, alice);
        let frame = rx_bob.recv().await.unwrap();
        assert_eq!(codec.decode_server(&frame.bytes).unwrap(), msg);
    }

    #[tokio::test]
    async fn test_stats_and_lag() {
        let group = BroadcastGroup::new(2);
        let peer = Uuid::new_v4();
        let mut rx = group.add_peer(peer).await;

        for i in 0..4u8 {
            group.broadcast_raw(Arc::new(RelayFrame { sender: Uuid::nil(), bytes: vec![i] }));
        }
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => group.record_dropped(n),
            other => panic!("expected lag, got {other:?}"),
        }

        let stats = group.stats().await;
        assert_eq!(stats.messages_sent, 4);
        assert_eq!(stats.messages_dropped, 2);
        assert_eq!(stats.active_peers, 1);
        assert_eq!(group.capacity(), 2);
    }

    #[tokio::test]
    async fn test_groups_are_keyed_by_room() {
        let manager = RoomManager::new(16);
        let a = manager.get_or_create("room").await;
        let b = manager.get_or_create("room").await;
        assert!(Arc::ptr_eq(&a, &b));
        manager.get_or_create("other").await;
        assert_eq!(manager.room_count().await, 2);
    }

    #[tokio::test]
    async fn test_empty_groups_are_dropped() {
        let manager = RoomManager::new(16);
        let group = manager.get_or_create("room").await;
        let peer = Uuid::new_v4();
        let _rx = group.add_peer(peer).await;

        assert!(!manager.remove_if_empty("room").await);
        group.remove_peer(&peer).await;
        assert!(manager.remove_if_empty("room").await);
        assert!(manager.get("room").await.is_none());
    }
}
