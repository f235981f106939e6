//! Room timer client: membership, projection and routing over one channel.
//!
//! All actions and inbound events run to completion on the caller's task,
//! so projection mutations are serialized without locks. Running state and
//! counts change only when the authority broadcasts them; note edits are
//! echoed locally first.

use crate::membership::{ActionError, Membership};
use crate::optimistic;
use crate::projection::TimerProjection;
use crate::protocol::{event, Frame, Intent, RoomId, TimerId};
use crate::router::{self, Dispatch, IgnoreReason, Router};
use crate::session::{Channel, SessionEvent};

/// The client.
pub struct TimerClient<C: Channel> {
    channel: C,
    membership: Membership,
    projection: TimerProjection,
    router: Router,
    /// Set by every join until the authority's snapshot lands. Events that
    /// arrive before it may belong to a room this client has left.
    awaiting_snapshot: bool,
}

impl<C: Channel> TimerClient<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            membership: Membership::default(),
            projection: TimerProjection::new(),
            router: Router::new(),
            awaiting_snapshot: false,
        }
    }

    // ── Read side ───────────────────────────────────────────────────

    pub fn projection(&self) -> &TimerProjection {
        &self.projection
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    pub fn room(&self) -> Option<&RoomId> {
        self.membership.room()
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    // ── Actions ─────────────────────────────────────────────────────

    /// Join a room. The projection is populated by the authority's
    /// `all_timers` reply, not here.
    pub fn join_room(&mut self, room: &str) -> Result<(), ActionError> {
        let room_id = self.membership.join(room)?;
        self.awaiting_snapshot = true;
        self.send(Intent::JoinRoom(room_id));
        Ok(())
    }

    /// Leave the joined room and clear the projection.
    pub fn leave_room(&mut self) -> Result<(), ActionError> {
        let room_id = self.membership.leave(&mut self.projection)?;
        self.awaiting_snapshot = false;
        self.send(Intent::LeaveRoom(room_id));
        Ok(())
    }

    pub fn create_timer(&mut self) -> Result<(), ActionError> {
        let room_id = self.membership.require_room()?.clone();
        self.send(Intent::CreateTimer { room_id });
        Ok(())
    }

    pub fn resume(&mut self, timer_id: &TimerId) -> Result<(), ActionError> {
        let room_id = self.membership.require_room()?.clone();
        self.send(Intent::ResumeTimer {
            room_id,
            timer_id: timer_id.clone(),
        });
        Ok(())
    }

    pub fn stop(&mut self, timer_id: &TimerId) -> Result<(), ActionError> {
        let room_id = self.membership.require_room()?.clone();
        self.send(Intent::StopTimer {
            room_id,
            timer_id: timer_id.clone(),
        });
        Ok(())
    }

    pub fn reset(&mut self, timer_id: &TimerId) -> Result<(), ActionError> {
        let room_id = self.membership.require_room()?.clone();
        self.send(Intent::ResetTimer {
            room_id,
            timer_id: timer_id.clone(),
        });
        Ok(())
    }

    pub fn delete(&mut self, timer_id: &TimerId) -> Result<(), ActionError> {
        let room_id = self.membership.require_room()?.clone();
        self.send(Intent::DeleteTimer {
            room_id,
            timer_id: timer_id.clone(),
        });
        Ok(())
    }

    /// Edit a note optimistically: the projection shows the new text at once.
    pub fn edit_note(&mut self, timer_id: &TimerId, note: impl Into<String>) -> Result<(), ActionError> {
        let intent =
            optimistic::edit_note(&self.membership, &mut self.projection, timer_id, note.into())?;
        self.send(intent);
        Ok(())
    }

    fn send(&mut self, intent: Intent) {
        if let Err(e) = router::send_intent(&mut self.channel, &intent) {
            log::error!("Failed to send `{}`: {e}", intent.event_name());
        }
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Apply one inbound frame. Until the snapshot that follows a join,
    /// only the snapshot itself is applied.
    pub fn handle_frame(&mut self, frame: &Frame) -> Dispatch {
        let is_snapshot = frame.event == event::ALL_TIMERS;
        if self.awaiting_snapshot
            && !is_snapshot
            && self.membership.is_joined()
            && self.router.reducer(&frame.event).is_some()
        {
            log::debug!("Ignoring `{}` until the room snapshot arrives", frame.event);
            return Dispatch::Ignored(IgnoreReason::AwaitingSnapshot);
        }

        let outcome = self
            .router
            .dispatch(&self.membership, &mut self.projection, frame);
        if is_snapshot && outcome.is_applied() {
            self.awaiting_snapshot = false;
        }
        outcome
    }

    /// Whether a join is still waiting for its `all_timers` snapshot.
    pub fn is_awaiting_snapshot(&self) -> bool {
        self.awaiting_snapshot && self.membership.is_joined()
    }

    /// Decode and apply one inbound text message.
    pub fn handle_text(&mut self, text: &str) -> Dispatch {
        match Frame::decode(text) {
            Ok(frame) => self.handle_frame(&frame),
            Err(e) => {
                log::warn!("Dropping undecodable message: {e}");
                Dispatch::Ignored(IgnoreReason::Malformed(e))
            }
        }
    }

    /// React to a session event. On every connection, the first one
    /// included, the joined room is (re-)joined so the authority sends its
    /// snapshot; a join made while offline was dropped by the channel.
    pub fn handle_session_event(&mut self, event: SessionEvent) -> Option<Dispatch> {
        match event {
            SessionEvent::Frame(frame) => Some(self.handle_frame(&frame)),
            SessionEvent::Connected | SessionEvent::Reconnected => {
                self.rejoin();
                None
            }
            SessionEvent::Disconnected => {
                if let Some(room_id) = self.membership.room() {
                    log::warn!("Disconnected while in room {room_id}; projection may be stale");
                }
                None
            }
        }
    }

    /// Re-send the join for the current room, if any.
    pub fn rejoin(&mut self) {
        if let Some(room_id) = self.membership.room().cloned() {
            log::info!("Re-joining room {room_id}");
            self.awaiting_snapshot = true;
            self.send(Intent::JoinRoom(room_id));
        }
    }
}

impl<C: Channel> std::fmt::Debug for TimerClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerClient")
            .field("membership", &self.membership)
            .field("timers", &self.projection.len())
            .finish()
    }
}
