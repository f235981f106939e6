//! Room fan-out with backpressure.
//!
//! Uses tokio broadcast channels for O(1) send to all members of a room.
//! Each connection gets an independent receiver that buffers up to
//! `capacity` encoded frames; a lagging receiver skips ahead and logs.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{Frame, ProtocolError, RoomId};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub active_members: usize,
}

/// A broadcast group for a single room.
///
/// Every connection joined to the room, including the one whose intent
/// caused the event, receives each frame.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<String>>,

    /// Connection id -> remote address
    members: RwLock<HashMap<Uuid, SocketAddr>>,

    capacity: usize,

    /// Lock-free on the send path
    messages_sent: AtomicU64,
}

impl BroadcastGroup {
    /// `capacity` is how many frames a member may fall behind before it
    /// starts skipping.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            members: RwLock::new(HashMap::new()),
            capacity,
            messages_sent: AtomicU64::new(0),
        }
    }

    /// Add a connection and return its receiver.
    pub async fn add_member(&self, conn_id: Uuid, addr: SocketAddr) -> broadcast::Receiver<Arc<String>> {
        let mut members = self.members.write().await;
        members.insert(conn_id, addr);
        self.sender.subscribe()
    }

    pub async fn remove_member(&self, conn_id: &Uuid) -> Option<SocketAddr> {
        self.members.write().await.remove(conn_id)
    }

    /// Encode once and fan out. Returns the number of receivers reached.
    pub fn broadcast(&self, frame: &Frame) -> Result<usize, ProtocolError> {
        let encoded = frame.encode()?;
        Ok(self.broadcast_raw(Arc::new(encoded)))
    }

    /// Fan out pre-encoded text.
    pub fn broadcast_raw(&self, encoded: Arc<String>) -> usize {
        let count = self.sender.send(encoded).unwrap_or(0);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn has_member(&self, conn_id: &Uuid) -> bool {
        self.members.read().await.contains_key(conn_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            active_members: self.members.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Maps room ids to broadcast groups so rooms never see each other's frames.
pub struct RoomManager {
    rooms: RwLock<HashMap<RoomId, Arc<BroadcastGroup>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Get or create the group for a room.
    pub async fn get_or_create(&self, room_id: &RoomId) -> Arc<BroadcastGroup> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(room_id) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_id.clone())
            .or_insert_with(|| Arc::new(BroadcastGroup::new(self.default_capacity)))
            .clone()
    }

    pub async fn get(&self, room_id: &RoomId) -> Option<Arc<BroadcastGroup>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Drop the group once its last member has left.
    pub async fn remove_if_empty(&self, room_id: &RoomId) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(room_id) {
            if room.member_count().await == 0 {
                rooms.remove(room_id);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_rooms(&self) -> Vec<RoomId> {
        self.rooms.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn room(id: &str) -> RoomId {
        RoomId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_group_add_remove() {
        let group = BroadcastGroup::new(16);
        let conn = Uuid::new_v4();

        let _rx = group.add_member(conn, addr()).await;
        assert_eq!(group.member_count().await, 1);
        assert!(group.has_member(&conn).await);

        assert_eq!(group.remove_member(&conn).await, Some(addr()));
        assert_eq!(group.member_count().await, 0);
    }

    #[tokio::test]
    async fn test_fan_out_includes_every_member() {
        let group = BroadcastGroup::new(16);
        let mut rx1 = group.add_member(Uuid::new_v4(), addr()).await;
        let mut rx2 = group.add_member(Uuid::new_v4(), addr()).await;

        let frame = Frame::new("timer_deleted", &"t1").unwrap();
        assert_eq!(group.broadcast(&frame).unwrap(), 2);

        let wire = frame.encode().unwrap();
        assert_eq!(*rx1.recv().await.unwrap(), wire);
        assert_eq!(*rx2.recv().await.unwrap(), wire);

        let stats = group.stats().await;
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.active_members, 2);
    }

    #[tokio::test]
    async fn test_lagging_member_skips() {
        let group = BroadcastGroup::new(2);
        let mut rx = group.add_member(Uuid::new_v4(), addr()).await;

        for i in 0..5 {
            group.broadcast_raw(Arc::new(format!("m{i}")));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert_eq!(*rx.recv().await.unwrap(), "m3");
    }

    #[tokio::test]
    async fn test_room_manager_isolates_rooms() {
        let manager = RoomManager::new(16);

        let r1 = manager.get_or_create(&room("R1")).await;
        let again = manager.get_or_create(&room("R1")).await;
        let r2 = manager.get_or_create(&room("R2")).await;

        assert!(Arc::ptr_eq(&r1, &again));
        assert!(!Arc::ptr_eq(&r1, &r2));
        assert_eq!(manager.room_count().await, 2);
        assert!(manager.active_rooms().await.contains(&room("R2")));
    }

    #[tokio::test]
    async fn test_room_manager_cleanup() {
        let manager = RoomManager::new(16);
        let group = manager.get_or_create(&room("R1")).await;
        let conn = Uuid::new_v4();
        let _rx = group.add_member(conn, addr()).await;

        assert!(!manager.remove_if_empty(&room("R1")).await);

        group.remove_member(&conn).await;
        assert!(manager.remove_if_empty(&room("R1")).await);
        assert!(manager.get(&room("R1")).await.is_none());
    }
}
