//! JSON wire protocol for room-scoped timer events.
//!
//! Wire format (one WebSocket text message per event):
//! ```text
//! {"event": "timer_update", "data": {"timerId": "a", "count": 12.4}}
//!  └─ event name ──────────┘ └─ payload (shape fixed per event) ──┘
//! ```
//!
//! Payload field names are camelCase. `join_room`, `leave_room` and
//! `timer_deleted` carry a bare id string instead of an object.

use std::fmt;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Event names used on the wire.
pub mod event {
    // authority -> client
    pub const ALL_TIMERS: &str = "all_timers";
    pub const TIMER_CREATED: &str = "timer_created";
    pub const TIMER_UPDATE: &str = "timer_update";
    pub const TIMER_STATUS: &str = "timer_status";
    pub const TIMER_DELETED: &str = "timer_deleted";
    pub const NOTE_UPDATED: &str = "note_updated";

    // client -> authority
    pub const JOIN_ROOM: &str = "join_room";
    pub const LEAVE_ROOM: &str = "leave_room";
    pub const CREATE_TIMER: &str = "create_timer";
    pub const RESUME_TIMER: &str = "resume_timer";
    pub const STOP_TIMER: &str = "stop_timer";
    pub const RESET_TIMER: &str = "reset_timer";
    pub const DELETE_TIMER: &str = "delete_timer";
    pub const UPDATE_NOTE: &str = "update_note";
}

/// Authority-assigned timer identity, opaque to the client.
///
/// Accepted on the wire as a string or an integer; always held as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TimerId(String);

impl TimerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TimerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TimerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl<'de> Deserialize<'de> for TimerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Signed(i64),
            Unsigned(u64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => TimerId(s),
            RawId::Signed(n) => TimerId(n.to_string()),
            RawId::Unsigned(n) => TimerId(n.to_string()),
        })
    }
}

/// Room identifier. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Returns `None` for an empty identifier.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RoomId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        RoomId::new(raw).ok_or_else(|| D::Error::custom("room id must not be empty"))
    }
}

/// Lenient count decoding: a JSON number, or a string holding a finite
/// decimal number.
fn deserialize_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawCount {
        Number(f64),
        Text(String),
    }

    match RawCount::deserialize(deserializer)? {
        RawCount::Number(n) => Ok(n),
        RawCount::Text(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .ok_or_else(|| D::Error::custom(format!("count {s:?} is not a number"))),
    }
}

// ── Inbound payloads (authority -> client) ─────────────────────────

/// One element of the `all_timers` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub timer_id: TimerId,
    #[serde(default, deserialize_with = "deserialize_count")]
    pub count: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_running: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// `timer_created` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerCreated {
    pub timer_id: TimerId,
    #[serde(default, deserialize_with = "deserialize_count")]
    pub count: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// `timer_update` payload (periodic tick or reset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerUpdate {
    pub timer_id: TimerId,
    #[serde(deserialize_with = "deserialize_count")]
    pub count: f64,
}

/// `timer_status` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerStatus {
    pub timer_id: TimerId,
    pub is_running: bool,
}

/// `note_updated` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteUpdated {
    pub timer_id: TimerId,
    #[serde(default)]
    pub note: Option<String>,
}

// ── Outbound payloads (client -> authority) ────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomRef {
    room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimerRef {
    room_id: RoomId,
    timer_id: TimerId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NoteEdit {
    room_id: RoomId,
    timer_id: TimerId,
    note: String,
}

/// A user intent, sent to the authority as exactly one named event.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    JoinRoom(RoomId),
    LeaveRoom(RoomId),
    CreateTimer { room_id: RoomId },
    ResumeTimer { room_id: RoomId, timer_id: TimerId },
    StopTimer { room_id: RoomId, timer_id: TimerId },
    ResetTimer { room_id: RoomId, timer_id: TimerId },
    DeleteTimer { room_id: RoomId, timer_id: TimerId },
    UpdateNote { room_id: RoomId, timer_id: TimerId, note: String },
}

impl Intent {
    /// Wire event name for this intent.
    pub fn event_name(&self) -> &'static str {
        match self {
            Intent::JoinRoom(_) => event::JOIN_ROOM,
            Intent::LeaveRoom(_) => event::LEAVE_ROOM,
            Intent::CreateTimer { .. } => event::CREATE_TIMER,
            Intent::ResumeTimer { .. } => event::RESUME_TIMER,
            Intent::StopTimer { .. } => event::STOP_TIMER,
            Intent::ResetTimer { .. } => event::RESET_TIMER,
            Intent::DeleteTimer { .. } => event::DELETE_TIMER,
            Intent::UpdateNote { .. } => event::UPDATE_NOTE,
        }
    }

    /// Room the intent is scoped to.
    pub fn room_id(&self) -> &RoomId {
        match self {
            Intent::JoinRoom(room_id) | Intent::LeaveRoom(room_id) => room_id,
            Intent::CreateTimer { room_id }
            | Intent::ResumeTimer { room_id, .. }
            | Intent::StopTimer { room_id, .. }
            | Intent::ResetTimer { room_id, .. }
            | Intent::DeleteTimer { room_id, .. }
            | Intent::UpdateNote { room_id, .. } => room_id,
        }
    }

    /// Encode as a frame with the fixed payload shape of its event.
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let name = self.event_name();
        match self {
            Intent::JoinRoom(room_id) | Intent::LeaveRoom(room_id) => Frame::new(name, room_id),
            Intent::CreateTimer { room_id } => Frame::new(
                name,
                &RoomRef {
                    room_id: room_id.clone(),
                },
            ),
            Intent::ResumeTimer { room_id, timer_id }
            | Intent::StopTimer { room_id, timer_id }
            | Intent::ResetTimer { room_id, timer_id }
            | Intent::DeleteTimer { room_id, timer_id } => Frame::new(
                name,
                &TimerRef {
                    room_id: room_id.clone(),
                    timer_id: timer_id.clone(),
                },
            ),
            Intent::UpdateNote {
                room_id,
                timer_id,
                note,
            } => Frame::new(
                name,
                &NoteEdit {
                    room_id: room_id.clone(),
                    timer_id: timer_id.clone(),
                    note: note.clone(),
                },
            ),
        }
    }

    /// Decode an intent frame received by the authority.
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        let timer_ref = |frame: &Frame| frame.payload::<TimerRef>().map(|r| (r.room_id, r.timer_id));

        match frame.event.as_str() {
            event::JOIN_ROOM => Ok(Intent::JoinRoom(frame.payload()?)),
            event::LEAVE_ROOM => Ok(Intent::LeaveRoom(frame.payload()?)),
            event::CREATE_TIMER => {
                let RoomRef { room_id } = frame.payload()?;
                Ok(Intent::CreateTimer { room_id })
            }
            event::RESUME_TIMER => {
                let (room_id, timer_id) = timer_ref(frame)?;
                Ok(Intent::ResumeTimer { room_id, timer_id })
            }
            event::STOP_TIMER => {
                let (room_id, timer_id) = timer_ref(frame)?;
                Ok(Intent::StopTimer { room_id, timer_id })
            }
            event::RESET_TIMER => {
                let (room_id, timer_id) = timer_ref(frame)?;
                Ok(Intent::ResetTimer { room_id, timer_id })
            }
            event::DELETE_TIMER => {
                let (room_id, timer_id) = timer_ref(frame)?;
                Ok(Intent::DeleteTimer { room_id, timer_id })
            }
            event::UPDATE_NOTE => {
                let NoteEdit {
                    room_id,
                    timer_id,
                    note,
                } = frame.payload()?;
                Ok(Intent::UpdateNote {
                    room_id,
                    timer_id,
                    note,
                })
            }
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}

/// One named event on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    /// Event payload; absent on the wire decodes as `null`.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Frame {
    /// Build a frame from any serializable payload.
    pub fn new(event: impl Into<String>, data: &impl Serialize) -> Result<Self, ProtocolError> {
        let data = serde_json::to_value(data)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self {
            event: event.into(),
            data,
        })
    }

    /// Serialize to the JSON text wire format.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from the JSON text wire format.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    /// Parse the payload into the shape expected for this event.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        T::deserialize(&self.data).map_err(|e| ProtocolError::MalformedPayload {
            event: self.event.clone(),
            reason: e.to_string(),
        })
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("malformed `{event}` payload: {reason}")]
    MalformedPayload { event: String, reason: String },
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
    #[error("connection closed")]
    ConnectionClosed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn room(id: &str) -> RoomId {
        RoomId::new(id).unwrap()
    }

    #[test]
    fn test_room_id_rejects_empty() {
        assert!(RoomId::new("").is_none());
        assert_eq!(RoomId::new("R1").unwrap().as_str(), "R1");
    }

    #[test]
    fn test_room_id_deserialize_rejects_empty() {
        assert!(serde_json::from_value::<RoomId>(json!("")).is_err());
        assert_eq!(serde_json::from_value::<RoomId>(json!("R1")).unwrap(), room("R1"));
    }

    #[test]
    fn test_timer_id_accepts_integer() {
        let id: TimerId = serde_json::from_value(json!(1700000000123u64)).unwrap();
        assert_eq!(id.as_str(), "1700000000123");

        let id: TimerId = serde_json::from_value(json!("abc")).unwrap();
        assert_eq!(id, TimerId::from("abc"));
    }

    #[test]
    fn test_decode_frame_without_data() {
        let frame = Frame::decode(r#"{"event":"all_timers"}"#).unwrap();
        assert_eq!(frame.event, event::ALL_TIMERS);
        assert!(frame.data.is_null());
    }

    #[test]
    fn test_decode_invalid_text() {
        assert!(matches!(
            Frame::decode("not json"),
            Err(ProtocolError::Deserialization(_))
        ));
    }

    #[test]
    fn test_count_coerced_from_string() {
        let frame = Frame::decode(
            r#"{"event":"timer_update","data":{"timerId":"a","count":"12.4"}}"#,
        )
        .unwrap();
        let update: TimerUpdate = frame.payload().unwrap();
        assert_eq!(update.count, 12.4);
    }

    #[test]
    fn test_count_rejects_garbage_and_non_finite() {
        for bad in ["twelve", "NaN", "inf"] {
            let frame = Frame {
                event: event::TIMER_UPDATE.into(),
                data: json!({ "timerId": "a", "count": bad }),
            };
            assert!(matches!(
                frame.payload::<TimerUpdate>(),
                Err(ProtocolError::MalformedPayload { .. })
            ));
        }
    }

    #[test]
    fn test_snapshot_optional_fields_default() {
        let entry: TimerSnapshot =
            serde_json::from_value(json!({ "timerId": "a", "isRunning": null })).unwrap();
        assert_eq!(entry.count, 0.0);
        assert_eq!(entry.is_running, None);
        assert_eq!(entry.note, None);
    }

    #[test]
    fn test_join_intent_carries_bare_room_id() {
        let frame = Intent::JoinRoom(room("R1")).to_frame().unwrap();
        assert_eq!(frame.event, "join_room");
        assert_eq!(frame.data, json!("R1"));
    }

    #[test]
    fn test_timer_intents_payload_shape() {
        let intent = Intent::StopTimer {
            room_id: room("R1"),
            timer_id: TimerId::from("t1"),
        };
        let frame = intent.to_frame().unwrap();
        assert_eq!(frame.event, "stop_timer");
        assert_eq!(frame.data, json!({ "roomId": "R1", "timerId": "t1" }));

        let note = Intent::UpdateNote {
            room_id: room("R1"),
            timer_id: TimerId::from("t1"),
            note: "tea".into(),
        };
        assert_eq!(
            note.to_frame().unwrap().data,
            json!({ "roomId": "R1", "timerId": "t1", "note": "tea" })
        );

        let create = Intent::CreateTimer { room_id: room("R1") };
        assert_eq!(create.to_frame().unwrap().data, json!({ "roomId": "R1" }));
    }

    #[test]
    fn test_intent_decoded_by_authority() {
        let intent = Intent::UpdateNote {
            room_id: room("R1"),
            timer_id: TimerId::from("t1"),
            note: "boil eggs".into(),
        };
        let wire = intent.to_frame().unwrap().encode().unwrap();
        let decoded = Intent::from_frame(&Frame::decode(&wire).unwrap()).unwrap();
        assert_eq!(decoded, intent);
        assert_eq!(decoded.room_id(), &room("R1"));
    }

    #[test]
    fn test_intent_from_unknown_event() {
        let frame = Frame {
            event: "launch_rocket".into(),
            data: serde_json::Value::Null,
        };
        assert_eq!(
            Intent::from_frame(&frame),
            Err(ProtocolError::UnknownEvent("launch_rocket".into()))
        );
    }

    #[test]
    fn test_join_with_empty_room_is_malformed() {
        let frame = Frame {
            event: event::JOIN_ROOM.into(),
            data: json!(""),
        };
        assert!(matches!(
            Intent::from_frame(&frame),
            Err(ProtocolError::MalformedPayload { .. })
        ));
    }
}
