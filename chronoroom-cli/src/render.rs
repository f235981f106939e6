//! Plain-text rendering of a room's projection.

use std::fmt::Write;

use chronoroom_sync::{event, RoomId, Timer, TimerProjection};

/// Short id shown in listings; long enough to stay unique in practice.
const SHORT_ID_LEN: usize = 8;

pub fn timer_line(timer: &Timer) -> String {
    let id = timer.timer_id.as_str();
    let short = id.get(..SHORT_ID_LEN).unwrap_or(id);
    let state = if timer.is_running { "running" } else { "paused" };
    let mut line = format!("{short:<width$}  {:>9.1} s  {state:<7}", timer.count, width = SHORT_ID_LEN);
    if !timer.note.is_empty() {
        let _ = write!(line, "  {}", timer.note);
    }
    line
}

/// Whether an applied event warrants printing the room again. Count ticks
/// arrive many times a second and only show up on `list`.
pub fn redraws_on(event_name: &str) -> bool {
    event_name != event::TIMER_UPDATE
}

pub fn room_view(room: Option<&RoomId>, projection: &TimerProjection) -> String {
    let Some(room) = room else {
        return "not in a room (use `join <room>`)".to_string();
    };

    let mut out = format!("room {room}: {} timer(s)", projection.len());
    for timer in projection.sorted() {
        out.push('\n');
        out.push_str("  ");
        out.push_str(&timer_line(timer));
    }
    out
}
