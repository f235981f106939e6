//! In-memory timer authority: the single writer of timer truth per room.
//!
//! Applies client intents in the order the server hands them over and
//! produces the broadcast frame each one causes. Rooms are created on first
//! join and live as long as the process; nothing is persisted.

use std::collections::HashMap;

use uuid::Uuid;

use crate::protocol::{
    event, Frame, Intent, NoteUpdated, ProtocolError, RoomId, TimerCreated, TimerId,
    TimerSnapshot, TimerStatus, TimerUpdate,
};

/// Authoritative timer state.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorityTimer {
    pub timer_id: TimerId,
    pub count: f64,
    pub is_running: bool,
    pub note: String,
}

impl AuthorityTimer {
    fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            timer_id: self.timer_id.clone(),
            count: self.count,
            is_running: Some(self.is_running),
            note: Some(self.note.clone()),
        }
    }
}

/// Timers of one room, in creation order.
#[derive(Debug, Default)]
struct RoomTimers {
    timers: Vec<AuthorityTimer>,
}

impl RoomTimers {
    fn find_mut(&mut self, timer_id: &TimerId) -> Option<&mut AuthorityTimer> {
        self.timers.iter_mut().find(|t| &t.timer_id == timer_id)
    }
}

/// All rooms known to this authority.
#[derive(Debug, Default)]
pub struct Authority {
    rooms: HashMap<RoomId, RoomTimers>,
}

impl Authority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure the room exists and return its `all_timers` snapshot frame.
    pub fn open_room(&mut self, room_id: &RoomId) -> Result<Frame, ProtocolError> {
        let room = self.rooms.entry(room_id.clone()).or_default();
        let snapshot: Vec<TimerSnapshot> = room.timers.iter().map(AuthorityTimer::snapshot).collect();
        Frame::new(event::ALL_TIMERS, &snapshot)
    }

    /// Apply a room-scoped intent. Returns the frame to broadcast to the
    /// room, or `None` when the intent changes nothing (unknown room or
    /// timer, or a membership intent handled by the server).
    pub fn apply(&mut self, intent: &Intent) -> Result<Option<Frame>, ProtocolError> {
        let Some(room) = self.rooms.get_mut(intent.room_id()) else {
            log::debug!("`{}` for unknown room {}", intent.event_name(), intent.room_id());
            return Ok(None);
        };

        let frame = match intent {
            Intent::JoinRoom(_) | Intent::LeaveRoom(_) => None,

            Intent::CreateTimer { room_id } => {
                let timer = AuthorityTimer {
                    timer_id: TimerId::new(Uuid::new_v4().to_string()),
                    count: 0.0,
                    is_running: false,
                    note: String::new(),
                };
                log::info!("Created timer {} in room {room_id}", timer.timer_id);
                let created = TimerCreated {
                    timer_id: timer.timer_id.clone(),
                    count: timer.count,
                    note: Some(timer.note.clone()),
                };
                room.timers.push(timer);
                Some(Frame::new(event::TIMER_CREATED, &created)?)
            }

            Intent::ResumeTimer { timer_id, .. } | Intent::StopTimer { timer_id, .. } => {
                let is_running = matches!(intent, Intent::ResumeTimer { .. });
                match room.find_mut(timer_id) {
                    Some(timer) => {
                        timer.is_running = is_running;
                        let status = TimerStatus {
                            timer_id: timer_id.clone(),
                            is_running,
                        };
                        Some(Frame::new(event::TIMER_STATUS, &status)?)
                    }
                    None => None,
                }
            }

            Intent::ResetTimer { timer_id, .. } => match room.find_mut(timer_id) {
                Some(timer) => {
                    timer.count = 0.0;
                    let update = TimerUpdate {
                        timer_id: timer_id.clone(),
                        count: 0.0,
                    };
                    Some(Frame::new(event::TIMER_UPDATE, &update)?)
                }
                None => None,
            },

            Intent::DeleteTimer { timer_id, .. } => {
                let before = room.timers.len();
                room.timers.retain(|t| &t.timer_id != timer_id);
                if room.timers.len() < before {
                    Some(Frame::new(event::TIMER_DELETED, timer_id)?)
                } else {
                    None
                }
            }

            Intent::UpdateNote { timer_id, note, .. } => match room.find_mut(timer_id) {
                Some(timer) => {
                    timer.note = note.clone();
                    let updated = NoteUpdated {
                        timer_id: timer_id.clone(),
                        note: Some(note.clone()),
                    };
                    Some(Frame::new(event::NOTE_UPDATED, &updated)?)
                }
                None => None,
            },
        };

        if frame.is_none() {
            log::debug!("`{}` changed nothing in room {}", intent.event_name(), intent.room_id());
        }
        Ok(frame)
    }

    /// Advance every running timer by `step` seconds and return one
    /// `timer_update` per advanced timer.
    pub fn tick(&mut self, step: f64) -> Result<Vec<(RoomId, Frame)>, ProtocolError> {
        let mut frames = Vec::new();
        for (room_id, room) in &mut self.rooms {
            for timer in room.timers.iter_mut().filter(|t| t.is_running) {
                // Millisecond precision keeps repeated float steps from drifting.
                timer.count = ((timer.count + step) * 1000.0).round() / 1000.0;
                let update = TimerUpdate {
                    timer_id: timer.timer_id.clone(),
                    count: timer.count,
                };
                frames.push((room_id.clone(), Frame::new(event::TIMER_UPDATE, &update)?));
            }
        }
        Ok(frames)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Timers of a room in creation order.
    pub fn timers(&self, room_id: &RoomId) -> &[AuthorityTimer] {
        self.rooms
            .get(room_id)
            .map(|room| room.timers.as_slice())
            .unwrap_or(&[])
    }
}
