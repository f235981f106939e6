//! Event router: inbound dispatch table and outbound intent sending.
//!
//! Inbound events are looked up by name in a fixed table of reducers. Each
//! reducer decodes its own payload shape and touches only the fields its
//! event addresses:
//!
//! | Event           | Payload                               | Effect         |
//! |-----------------|---------------------------------------|----------------|
//! | `all_timers`    | `[{timerId, count, isRunning?, note?}]` | replace all  |
//! | `timer_created` | `{timerId, count, note?}`             | insert         |
//! | `timer_update`  | `{timerId, count}`                    | patch count    |
//! | `timer_status`  | `{timerId, isRunning}`                | patch status   |
//! | `timer_deleted` | `timerId`                             | remove         |
//! | `note_updated`  | `{timerId, note}`                     | patch note     |

use std::collections::HashMap;

use crate::membership::Membership;
use crate::projection::{Timer, TimerProjection};
use crate::protocol::{
    event, Frame, Intent, NoteUpdated, ProtocolError, TimerCreated, TimerId, TimerSnapshot,
    TimerStatus, TimerUpdate,
};
use crate::session::Channel;

/// A pure state transition over the projection for one event name.
pub type Reducer = fn(&mut TimerProjection, &Frame) -> Result<(), ProtocolError>;

/// Why an inbound frame left the projection untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum IgnoreReason {
    /// No room is joined; late events for a left room land here.
    NotJoined,
    /// Joined, but the room's `all_timers` has not arrived yet.
    AwaitingSnapshot,
    UnknownEvent,
    Malformed(ProtocolError),
}

/// Outcome of dispatching one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Applied,
    Ignored(IgnoreReason),
}

impl Dispatch {
    pub fn is_applied(&self) -> bool {
        matches!(self, Dispatch::Applied)
    }

    /// `Ok(true)` if applied, `Ok(false)` if ignored, `Err` if malformed.
    pub fn into_result(self) -> Result<bool, ProtocolError> {
        match self {
            Dispatch::Applied => Ok(true),
            Dispatch::Ignored(IgnoreReason::Malformed(e)) => Err(e),
            Dispatch::Ignored(_) => Ok(false),
        }
    }
}

fn reduce_all_timers(projection: &mut TimerProjection, frame: &Frame) -> Result<(), ProtocolError> {
    let entries: Vec<TimerSnapshot> = frame.payload()?;
    projection.replace_all(entries.into_iter().map(Timer::from));
    Ok(())
}

fn reduce_timer_created(projection: &mut TimerProjection, frame: &Frame) -> Result<(), ProtocolError> {
    let created: TimerCreated = frame.payload()?;
    if let Some(previous) = projection.insert(created.into()) {
        log::debug!("timer_created replaced existing timer {}", previous.timer_id);
    }
    Ok(())
}

fn reduce_timer_update(projection: &mut TimerProjection, frame: &Frame) -> Result<(), ProtocolError> {
    let update: TimerUpdate = frame.payload()?;
    if !projection.patch_count(&update.timer_id, update.count) {
        log::trace!("timer_update for unknown timer {}", update.timer_id);
    }
    Ok(())
}

fn reduce_timer_status(projection: &mut TimerProjection, frame: &Frame) -> Result<(), ProtocolError> {
    let status: TimerStatus = frame.payload()?;
    if !projection.patch_status(&status.timer_id, status.is_running) {
        log::debug!("timer_status for unknown timer {}", status.timer_id);
    }
    Ok(())
}

fn reduce_timer_deleted(projection: &mut TimerProjection, frame: &Frame) -> Result<(), ProtocolError> {
    let timer_id: TimerId = frame.payload()?;
    projection.remove(&timer_id);
    Ok(())
}

fn reduce_note_updated(projection: &mut TimerProjection, frame: &Frame) -> Result<(), ProtocolError> {
    let updated: NoteUpdated = frame.payload()?;
    if !projection.patch_note(&updated.timer_id, updated.note.unwrap_or_default()) {
        log::debug!("note_updated for unknown timer {}", updated.timer_id);
    }
    Ok(())
}

/// Inbound dispatch table.
#[derive(Debug, Clone)]
pub struct Router {
    table: HashMap<&'static str, Reducer>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        let mut table: HashMap<&'static str, Reducer> = HashMap::with_capacity(6);
        table.insert(event::ALL_TIMERS, reduce_all_timers);
        table.insert(event::TIMER_CREATED, reduce_timer_created);
        table.insert(event::TIMER_UPDATE, reduce_timer_update);
        table.insert(event::TIMER_STATUS, reduce_timer_status);
        table.insert(event::TIMER_DELETED, reduce_timer_deleted);
        table.insert(event::NOTE_UPDATED, reduce_note_updated);
        Self { table }
    }

    /// Reducer registered for an event name.
    pub fn reducer(&self, event_name: &str) -> Option<Reducer> {
        self.table.get(event_name).copied()
    }

    /// Apply one inbound frame. Membership is checked before any reducer
    /// runs; a malformed payload leaves the projection untouched.
    pub fn dispatch(
        &self,
        membership: &Membership,
        projection: &mut TimerProjection,
        frame: &Frame,
    ) -> Dispatch {
        let Some(reducer) = self.reducer(&frame.event) else {
            log::debug!("Ignoring unknown event `{}`", frame.event);
            return Dispatch::Ignored(IgnoreReason::UnknownEvent);
        };

        if !membership.is_joined() {
            log::debug!("Ignoring `{}` while not in a room", frame.event);
            return Dispatch::Ignored(IgnoreReason::NotJoined);
        }

        match reducer(projection, frame) {
            Ok(()) => Dispatch::Applied,
            Err(e) => {
                log::warn!("Dropping inbound event: {e}");
                Dispatch::Ignored(IgnoreReason::Malformed(e))
            }
        }
    }
}

/// Encode an intent and hand it to the channel.
pub fn send_intent<C: Channel + ?Sized>(channel: &mut C, intent: &Intent) -> Result<(), ProtocolError> {
    let frame = intent.to_frame()?;
    log::debug!("-> {} ({})", frame.event, intent.room_id());
    channel.send(frame);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RoomId;
    use crate::session::RecordingChannel;
    use serde_json::json;

    fn joined() -> Membership {
        Membership::Joined(RoomId::new("R1").unwrap())
    }

    fn frame(event: &str, data: serde_json::Value) -> Frame {
        Frame {
            event: event.to_string(),
            data,
        }
    }

    fn seeded() -> TimerProjection {
        let router = Router::new();
        let mut projection = TimerProjection::new();
        router.dispatch(
            &joined(),
            &mut projection,
            &frame(
                "all_timers",
                json!([
                    { "timerId": "t1", "count": 5, "isRunning": false, "note": "x" },
                    { "timerId": "t2", "count": 1 }
                ]),
            ),
        );
        projection
    }

    #[test]
    fn test_table_covers_inbound_events() {
        let router = Router::new();
        for name in [
            event::ALL_TIMERS,
            event::TIMER_CREATED,
            event::TIMER_UPDATE,
            event::TIMER_STATUS,
            event::TIMER_DELETED,
            event::NOTE_UPDATED,
        ] {
            assert!(router.reducer(name).is_some(), "missing reducer for {name}");
        }
        assert!(router.reducer(event::JOIN_ROOM).is_none());
    }

    #[test]
    fn test_snapshot_applies_defaults() {
        let projection = seeded();
        let t2 = projection.get(&TimerId::from("t2")).unwrap();
        assert!(!t2.is_running);
        assert_eq!(t2.note, "");
        assert_eq!(t2.count, 1.0);
    }

    #[test]
    fn test_update_patches_count_only() {
        let router = Router::new();
        let mut projection = seeded();

        let outcome = router.dispatch(
            &joined(),
            &mut projection,
            &frame("timer_update", json!({ "timerId": "t1", "count": 9 })),
        );

        assert!(outcome.is_applied());
        let t1 = projection.get(&TimerId::from("t1")).unwrap();
        assert_eq!(t1.count, 9.0);
        assert!(!t1.is_running);
        assert_eq!(t1.note, "x");
    }

    #[test]
    fn test_created_inserts_paused_timer() {
        let router = Router::new();
        let mut projection = seeded();

        router.dispatch(
            &joined(),
            &mut projection,
            &frame("timer_created", json!({ "timerId": "t3", "count": 0 })),
        );

        let t3 = projection.get(&TimerId::from("t3")).unwrap();
        assert!(!t3.is_running);
        assert_eq!(t3.note, "");
    }

    #[test]
    fn test_deleted_takes_bare_id() {
        let router = Router::new();
        let mut projection = seeded();

        let outcome = router.dispatch(&joined(), &mut projection, &frame("timer_deleted", json!("t1")));
        assert!(outcome.is_applied());
        assert!(!projection.contains(&TimerId::from("t1")));

        // Second delete is a no-op that still counts as handled.
        let before = projection.clone();
        router.dispatch(&joined(), &mut projection, &frame("timer_deleted", json!("t1")));
        assert_eq!(projection, before);
    }

    #[test]
    fn test_status_for_ghost_leaves_projection_unchanged() {
        let router = Router::new();
        let mut projection = seeded();
        let before = projection.clone();

        router.dispatch(
            &joined(),
            &mut projection,
            &frame("timer_status", json!({ "timerId": "ghost", "isRunning": true })),
        );

        assert_eq!(projection, before);
    }

    #[test]
    fn test_events_ignored_when_not_joined() {
        let router = Router::new();
        let mut projection = TimerProjection::new();

        let outcome = router.dispatch(
            &Membership::NotJoined,
            &mut projection,
            &frame("timer_created", json!({ "timerId": "late", "count": 0 })),
        );

        assert_eq!(outcome, Dispatch::Ignored(IgnoreReason::NotJoined));
        assert!(projection.is_empty());
    }

    #[test]
    fn test_malformed_payload_dropped() {
        let router = Router::new();
        let mut projection = seeded();
        let before = projection.clone();

        let outcome = router.dispatch(
            &joined(),
            &mut projection,
            &frame("timer_update", json!({ "timerId": "t1", "count": "soon" })),
        );

        assert!(matches!(
            outcome,
            Dispatch::Ignored(IgnoreReason::Malformed(ProtocolError::MalformedPayload { .. }))
        ));
        assert_eq!(projection, before);
    }

    #[test]
    fn test_unknown_event_ignored() {
        let router = Router::new();
        let mut projection = seeded();
        let outcome = router.dispatch(&joined(), &mut projection, &frame("confetti", json!({})));
        assert_eq!(outcome, Dispatch::Ignored(IgnoreReason::UnknownEvent));
    }

    #[test]
    fn test_authoritative_note_overrides_optimistic() {
        let router = Router::new();
        let mut projection = seeded();
        projection.patch_note(&TimerId::from("t1"), "draft");

        router.dispatch(
            &joined(),
            &mut projection,
            &frame("note_updated", json!({ "timerId": "t1", "note": "final" })),
        );

        assert_eq!(projection.get(&TimerId::from("t1")).unwrap().note, "final");
    }

    #[test]
    fn test_send_intent_encodes_frame() {
        let mut channel = RecordingChannel::default();
        let intent = Intent::ResetTimer {
            room_id: RoomId::new("R1").unwrap(),
            timer_id: TimerId::from("t1"),
        };

        send_intent(&mut channel, &intent).unwrap();

        assert_eq!(channel.sent.len(), 1);
        assert_eq!(channel.sent[0].event, "reset_timer");
        assert_eq!(channel.sent[0].data, json!({ "roomId": "R1", "timerId": "t1" }));
    }
}
