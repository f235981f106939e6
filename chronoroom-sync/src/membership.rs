//! Room membership: at most one joined room per client.
//!
//! ```text
//!            join(room)
//! NotJoined ───────────► Joined(room)
//!     ▲                      │
//!     └──────── leave() ─────┘   (projection cleared)
//! ```

use thiserror::Error;

use crate::projection::TimerProjection;
use crate::protocol::RoomId;

/// Rejected user actions. Nothing is sent and no state changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("room id must not be empty")]
    EmptyRoomId,
    #[error("already joined room `{0}`")]
    AlreadyJoined(RoomId),
    #[error("not in a room")]
    NotJoined,
}

/// Membership state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Membership {
    #[default]
    NotJoined,
    Joined(RoomId),
}

impl Membership {
    /// The joined room, if any.
    pub fn room(&self) -> Option<&RoomId> {
        match self {
            Membership::Joined(room_id) => Some(room_id),
            Membership::NotJoined => None,
        }
    }

    pub fn is_joined(&self) -> bool {
        matches!(self, Membership::Joined(_))
    }

    /// The joined room, or `ActionError::NotJoined`.
    pub fn require_room(&self) -> Result<&RoomId, ActionError> {
        self.room().ok_or(ActionError::NotJoined)
    }

    /// Move to `Joined(room)`. Only valid from `NotJoined`.
    ///
    /// Population of the projection waits for the authority's snapshot.
    pub fn join(&mut self, room: &str) -> Result<RoomId, ActionError> {
        if let Membership::Joined(current) = self {
            return Err(ActionError::AlreadyJoined(current.clone()));
        }
        let room_id = RoomId::new(room).ok_or(ActionError::EmptyRoomId)?;
        *self = Membership::Joined(room_id.clone());
        log::info!("Joined room {room_id}");
        Ok(room_id)
    }

    /// Move to `NotJoined` and clear the projection. Only valid from `Joined`.
    pub fn leave(&mut self, projection: &mut TimerProjection) -> Result<RoomId, ActionError> {
        match std::mem::take(self) {
            Membership::Joined(room_id) => {
                projection.clear();
                log::info!("Left room {room_id}");
                Ok(room_id)
            }
            Membership::NotJoined => Err(ActionError::NotJoined),
        }
    }
}
