//! WebSocket authority server with room-based routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐                    ┌── ticker (every tick_interval)
//!            ├── intents ──► Authority (rooms, timers) ──► BroadcastGroup ──► Client A
//! Client B ──┘                                                            └──► Client B
//! ```
//!
//! Intents from all connections are serialized through one lock on the
//! authority, and the resulting frames are broadcast while that lock is
//! held, so every member of a room observes the same event order.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::authority::Authority;
use crate::broadcast::{BroadcastGroup, RoomManager};
use crate::protocol::{Frame, Intent, ProtocolError, RoomId};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// How often running timers advance; each tick adds this many seconds
    pub tick_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3001".to_string(),
            broadcast_capacity: 256,
            tick_interval: Duration::from_millis(100),
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
}

/// State shared by every connection task.
#[derive(Clone)]
struct Shared {
    authority: Arc<Mutex<Authority>>,
    room_manager: Arc<RoomManager>,
    stats: Arc<RwLock<ServerStats>>,
}

/// The room a connection is currently in.
struct JoinedRoom {
    room_id: RoomId,
    group: Arc<BroadcastGroup>,
    rx: broadcast::Receiver<Arc<String>>,
}

/// The authority server.
pub struct AuthorityServer {
    config: ServerConfig,
    shared: Shared,
}

impl AuthorityServer {
    pub fn new(config: ServerConfig) -> Self {
        let room_manager = Arc::new(RoomManager::new(config.broadcast_capacity));
        Self {
            config,
            shared: Shared {
                authority: Arc::new(Mutex::new(Authority::new())),
                room_manager,
                stats: Arc::new(RwLock::new(ServerStats::default())),
            },
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind to the configured address and serve forever.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        log::info!("Timer authority listening on {}", listener.local_addr()?);

        let ticker = tokio::spawn(Self::run_ticker(
            self.shared.clone(),
            self.config.tick_interval,
        ));

        let result = loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => break Err(e.into()),
            };
            log::debug!("New TCP connection from {addr}");

            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, shared).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        };

        ticker.abort();
        result
    }

    /// Advance running timers on a fixed cadence and broadcast the counts.
    async fn run_ticker(shared: Shared, tick_interval: Duration) {
        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let step = tick_interval.as_secs_f64();

        loop {
            interval.tick().await;

            let mut authority = shared.authority.lock().await;
            let frames = match authority.tick(step) {
                Ok(frames) => frames,
                Err(e) => {
                    log::error!("Tick failed: {e}");
                    continue;
                }
            };
            for (room_id, frame) in frames {
                if let Some(group) = shared.room_manager.get(&room_id).await {
                    if let Err(e) = group.broadcast(&frame) {
                        log::error!("Failed to broadcast tick for room {room_id}: {e}");
                    }
                }
            }
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        shared: Shared,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let conn_id = Uuid::new_v4();

        log::info!("WebSocket connection {conn_id} established from {addr}");
        {
            let mut s = shared.stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut joined: Option<JoinedRoom> = None;

        let outcome = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                {
                                    let mut s = shared.stats.write().await;
                                    s.total_messages += 1;
                                    s.total_bytes += text.len() as u64;
                                }

                                let intent = match Frame::decode(text.as_str()).and_then(|f| Intent::from_frame(&f)) {
                                    Ok(intent) => intent,
                                    Err(e) => {
                                        log::warn!("Ignoring message from {addr}: {e}");
                                        continue;
                                    }
                                };

                                if let Some(reply) = Self::handle_intent(intent, conn_id, addr, &shared, &mut joined).await? {
                                    ws_sender.send(Message::Text(reply.encode()?.into())).await?;
                                }
                            }

                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                break;
                            }

                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }

                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }

                            _ => {}
                        }
                    }

                    msg = async {
                        match joined.as_mut() {
                            Some(room) => Self::next_room_frame(conn_id, room, &shared).await,
                            // Not in a room yet: wait forever
                            None => std::future::pending().await,
                        }
                    } => {
                        match msg? {
                            Some(text) => {
                                ws_sender.send(Message::Text(String::clone(&text).into())).await?;
                            }
                            None => joined = None,
                        }
                    }
                }
            }
            Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
        }
        .await;

        if let Some(room) = joined.take() {
            Self::leave(conn_id, room, &shared).await;
        }
        {
            let mut s = shared.stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
            s.active_rooms = shared.room_manager.room_count().await;
        }

        outcome
    }

    /// Apply one intent. Returns a frame to send to this connection only.
    async fn handle_intent(
        intent: Intent,
        conn_id: Uuid,
        addr: SocketAddr,
        shared: &Shared,
        joined: &mut Option<JoinedRoom>,
    ) -> Result<Option<Frame>, Box<dyn std::error::Error + Send + Sync>> {
        match intent {
            Intent::JoinRoom(room_id) => {
                if let Some(previous) = joined.take() {
                    Self::leave(conn_id, previous, shared).await;
                }

                // Subscribe before taking the snapshot so no broadcast falls
                // between the two.
                let mut authority = shared.authority.lock().await;
                let group = shared.room_manager.get_or_create(&room_id).await;
                let rx = group.add_member(conn_id, addr).await;
                let snapshot = authority.open_room(&room_id)?;
                drop(authority);

                log::info!("Connection {conn_id} joined room {room_id}");
                *joined = Some(JoinedRoom { room_id, group, rx });
                shared.stats.write().await.active_rooms = shared.room_manager.room_count().await;
                Ok(Some(snapshot))
            }

            Intent::LeaveRoom(room_id) => {
                match joined.take() {
                    Some(room) if room.room_id == room_id => Self::leave(conn_id, room, shared).await,
                    other => {
                        log::debug!("Connection {conn_id} asked to leave {room_id} but is not in it");
                        *joined = other;
                    }
                }
                Ok(None)
            }

            intent => {
                let Some(room) = joined.as_ref().filter(|r| &r.room_id == intent.room_id()) else {
                    log::debug!(
                        "Connection {conn_id} sent `{}` for room {} it has not joined",
                        intent.event_name(),
                        intent.room_id()
                    );
                    return Ok(None);
                };

                let mut authority = shared.authority.lock().await;
                if let Some(frame) = authority.apply(&intent)? {
                    room.group.broadcast(&frame)?;
                }
                Ok(None)
            }
        }
    }

    /// Next frame to forward from the connection's room, or `None` once the
    /// room's group is gone. A receiver that lagged has lost frames for
    /// good, so it is resubscribed and sent a fresh snapshot instead.
    async fn next_room_frame(
        conn_id: Uuid,
        room: &mut JoinedRoom,
        shared: &Shared,
    ) -> Result<Option<Arc<String>>, ProtocolError> {
        match room.rx.recv().await {
            Ok(text) => Ok(Some(text)),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::warn!(
                    "Connection {conn_id} lagged by {n} frames in room {}; resending snapshot",
                    room.room_id
                );
                // Broadcasts happen under this lock, so nothing falls between
                // the new subscription and the snapshot.
                let mut authority = shared.authority.lock().await;
                room.rx = room.rx.resubscribe();
                let snapshot = authority.open_room(&room.room_id)?;
                Ok(Some(Arc::new(snapshot.encode()?)))
            }
            Err(broadcast::error::RecvError::Closed) => Ok(None),
        }
    }

    async fn leave(conn_id: Uuid, room: JoinedRoom, shared: &Shared) {
        // Serialized with joins so a group is never dropped while being joined.
        let _authority = shared.authority.lock().await;
        room.group.remove_member(&conn_id).await;
        drop(room.rx);
        if shared.room_manager.remove_if_empty(&room.room_id).await {
            log::debug!("Broadcast group for room {} closed (empty)", room.room_id);
        }
        log::info!("Connection {conn_id} left room {}", room.room_id);
        shared.stats.write().await.active_rooms = shared.room_manager.room_count().await;
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.shared.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TimerSnapshot;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:3001");
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.tick_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_server_custom_config() {
        let config = ServerConfig {
            bind_addr: "0.0.0.0:8080".to_string(),
            broadcast_capacity: 32,
            tick_interval: Duration::from_millis(250),
        };
        let server = AuthorityServer::new(config);
        assert_eq!(server.bind_addr(), "0.0.0.0:8080");
        assert_eq!(server.config().tick_interval, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = AuthorityServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.active_rooms, 0);
    }

    #[tokio::test]
    async fn test_lagged_member_resynced_with_snapshot() {
        let server = AuthorityServer::new(ServerConfig {
            broadcast_capacity: 2,
            ..ServerConfig::default()
        });
        let shared = &server.shared;
        let room_id = RoomId::new("R1").unwrap();
        let conn_id = Uuid::new_v4();

        let group = shared.room_manager.get_or_create(&room_id).await;
        let rx = group.add_member(conn_id, "127.0.0.1:4000".parse().unwrap()).await;

        // Four broadcasts into a capacity of two, the delete among the lost ones.
        let mut authority = shared.authority.lock().await;
        authority.open_room(&room_id).unwrap();
        for _ in 0..3 {
            let created = authority
                .apply(&Intent::CreateTimer { room_id: room_id.clone() })
                .unwrap()
                .unwrap();
            group.broadcast(&created).unwrap();
        }
        let deleted_id = authority.timers(&room_id)[0].timer_id.clone();
        let deleted = authority
            .apply(&Intent::DeleteTimer {
                room_id: room_id.clone(),
                timer_id: deleted_id.clone(),
            })
            .unwrap()
            .unwrap();
        group.broadcast(&deleted).unwrap();
        drop(authority);

        let mut room = JoinedRoom { room_id, group, rx };
        let text = AuthorityServer::next_room_frame(conn_id, &mut room, shared)
            .await
            .unwrap()
            .unwrap();
        let frame = Frame::decode(text.as_str()).unwrap();
        assert_eq!(frame.event, "all_timers");
        let snapshot: Vec<TimerSnapshot> = frame.payload().unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|t| t.timer_id != deleted_id));

        // The new subscription carries later broadcasts as usual.
        room.group.broadcast_raw(Arc::new("next".to_string()));
        let text = AuthorityServer::next_room_frame(conn_id, &mut room, shared)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*text, "next");
    }
}
