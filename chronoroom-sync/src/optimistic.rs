//! Optimistic note edits.
//!
//! A local note edit is written into the projection immediately and sent to
//! the authority as `update_note`. No pending state is kept: whatever the
//! authority later broadcasts in `note_updated` overwrites the local value.
//! Counts and run state are never edited optimistically.

use crate::membership::{ActionError, Membership};
use crate::projection::TimerProjection;
use crate::protocol::{Intent, TimerId};

/// Apply a local note edit and return the intent to send.
///
/// The local patch is skipped for timers the projection does not know, but
/// the intent is still produced.
pub(crate) fn edit_note(
    membership: &Membership,
    projection: &mut TimerProjection,
    timer_id: &TimerId,
    note: String,
) -> Result<Intent, ActionError> {
    let room_id = membership.require_room()?.clone();

    if !projection.patch_note(timer_id, note.as_str()) {
        log::debug!("Note edit for unknown timer {timer_id}; sending without local echo");
    }

    Ok(Intent::UpdateNote {
        room_id,
        timer_id: timer_id.clone(),
        note,
    })
}
