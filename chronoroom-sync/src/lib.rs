//! # chronoroom-sync: room-scoped shared timers over WebSocket
//!
//! Clients join a room and observe a set of timers whose truth lives in one
//! authority process. Each client keeps a projection of the room that is
//! rebuilt from the authority's snapshot on join and patched by every
//! broadcast afterwards.
//!
//! ## Architecture
//!
//! ```text
//! user intent ──► TimerClient ──► Router (outbound) ──► Session ──► authority
//!                                                                     │
//! projection ◄── Router (dispatch table) ◄── SessionEvent::Frame ◄────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire frames, payload shapes, intents
//! - [`session`]: WebSocket session with reconnect, and the [`Channel`] seam
//! - [`membership`]: single-room join/leave state machine
//! - [`projection`]: per-room timer mirror with field-level patches
//! - [`optimistic`]: local-first note edits
//! - [`router`]: inbound dispatch table, outbound intent encoding
//! - [`client`]: the [`TimerClient`] facade
//! - [`authority`], [`broadcast`], [`server`]: reference authority server

pub mod protocol;
pub mod session;
pub mod membership;
pub mod projection;
pub mod optimistic;
pub mod router;
pub mod client;
pub mod authority;
pub mod broadcast;
pub mod server;

// Re-exports for convenience
pub use protocol::{event, Frame, Intent, ProtocolError, RoomId, TimerId};
pub use session::{
    Channel, ConnectionState, RecordingChannel, Session, SessionConfig, SessionError,
    SessionEvent, SessionHandle,
};
pub use membership::{ActionError, Membership};
pub use projection::{Timer, TimerProjection};
pub use router::{Dispatch, IgnoreReason, Reducer, Router};
pub use client::TimerClient;
pub use authority::{Authority, AuthorityTimer};
pub use broadcast::{BroadcastGroup, BroadcastStats, RoomManager};
pub use server::{AuthorityServer, ServerConfig, ServerStats};
