//! JSON wire protocol for canvas synchronization.
//!
//! Every frame is a UTF-8 JSON object whose `type` field names the event;
//! the remaining fields are the payload:
//! ```text
//! → {"type":"join","roomId":"r1","displayName":"Ada"}
//! → {"type":"stroke_end","points":[{"x":0,"y":0}],"color":"#000000","width":4,"tool":"brush"}
//! ← {"type":"operation_committed","operation":{"id":1,"authorId":"…","committedAt":1700000000000,…}}
//! ```
//!
//! Field names are part of the contract with existing clients and must not
//! change. Inbound events are [`ClientMessage`], outbound events are
//! [`ServerMessage`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Connection identifier assigned by the authority on accept.
pub type ParticipantId = Uuid;

/// Room-local, strictly increasing operation id.
pub type OperationId = u64;

/// Unix epoch milliseconds.
pub type Timestamp = i64;

/// Current authority time.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

// ───────────────────────────────────────────────────────────────────
// Canvas data model
// ───────────────────────────────────────────────────────────────────

/// Canvas coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Drawing tool used for a stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Brush,
    Eraser,
}

/// Operation kinds. Only finished strokes are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Draw,
}

/// Visual style of a stroke, shared by committed and in-progress paths.
#[derive(Debug, Clone, PartialEq)]
pub struct StrokeStyle {
    pub color: String,
    pub width: f64,
    pub tool: Tool,
}

impl StrokeStyle {
    pub fn new(color: impl Into<String>, width: f64, tool: Tool) -> Self {
        Self {
            color: color.into(),
            width,
            tool,
        }
    }
}

/// A committed drawing operation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: OperationId,
    pub author_id: ParticipantId,
    pub committed_at: Timestamp,
    pub kind: OperationKind,
    pub points: Vec<Point>,
    pub color: String,
    pub stroke_width: f64,
    pub tool: Tool,
}

impl Operation {
    pub fn style(&self) -> StrokeStyle {
        StrokeStyle::new(self.color.clone(), self.stroke_width, self.tool)
    }
}

/// A finished stroke as submitted by `stroke_end`, before it has an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeDraft {
    pub points: Vec<Point>,
    pub color: String,
    pub width: f64,
    pub tool: Tool,
}

impl StrokeDraft {
    pub fn new(points: Vec<Point>, style: &StrokeStyle) -> Self {
        Self {
            points,
            color: style.color.clone(),
            width: style.width,
            tool: style.tool,
        }
    }

    pub fn style(&self) -> StrokeStyle {
        StrokeStyle::new(self.color.clone(), self.width, self.tool)
    }

    /// Boundary validation applied before a draft may be committed.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.points.is_empty() {
            return Err(ProtocolError::InvalidPayload(
                "stroke must contain at least one point".into(),
            ));
        }
        if !self.points.iter().all(Point::is_finite) {
            return Err(ProtocolError::InvalidPayload(
                "stroke points must be finite".into(),
            ));
        }
        if !self.width.is_finite() || self.width <= 0.0 {
            return Err(ProtocolError::InvalidPayload(format!(
                "stroke width must be positive, got {}",
                self.width
            )));
        }
        if !is_hex_color(&self.color) {
            return Err(ProtocolError::InvalidPayload(format!(
                "color must be #RRGGBB, got {:?}",
                self.color
            )));
        }
        Ok(())
    }
}

/// `#RRGGBB` check.
pub fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}

/// A connected participant as seen by every member of the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub assigned_color: String,
    pub joined_at: Timestamp,
}

/// Per-room counters exposed by the stats query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub participant_count: usize,
    pub operation_count: usize,
}

/// Process-level health/stats snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub room_count: usize,
    pub per_room: BTreeMap<String, RoomStats>,
}

// ───────────────────────────────────────────────────────────────────
// Wire messages
// ───────────────────────────────────────────────────────────────────

/// Participant → authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Join {
        room_id: String,
        #[serde(default)]
        display_name: String,
    },
    StrokeStart {
        x: f64,
        y: f64,
        color: String,
        width: f64,
        tool: Tool,
    },
    StrokeMove {
        x: f64,
        y: f64,
    },
    StrokeEnd(StrokeDraft),
    Undo,
    CursorMove {
        x: f64,
        y: f64,
    },
    Stats,
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::StrokeStart { .. } => "stroke_start",
            Self::StrokeMove { .. } => "stroke_move",
            Self::StrokeEnd(_) => "stroke_end",
            Self::Undo => "undo",
            Self::CursorMove { .. } => "cursor_move",
            Self::Stats => "stats",
        }
    }
}

/// Authority → participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    FullSync {
        participant_id: ParticipantId,
        operations: Vec<Operation>,
        participants: Vec<Participant>,
    },
    ParticipantJoined {
        participant_id: ParticipantId,
        participant: Participant,
        participants: Vec<Participant>,
    },
    ParticipantLeft {
        participant_id: ParticipantId,
        participant: Participant,
        participants: Vec<Participant>,
    },
    OperationCommitted {
        operation: Operation,
    },
    OperationRemoved {
        operation_id: OperationId,
    },
    CursorUpdate {
        participant_id: ParticipantId,
        x: f64,
        y: f64,
    },
    StrokeStart {
        author_id: ParticipantId,
        x: f64,
        y: f64,
        color: String,
        width: f64,
        tool: Tool,
    },
    StrokeMove {
        author_id: ParticipantId,
        x: f64,
        y: f64,
    },
    Stats(RegistryStats),
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    /// Ephemeral events may be dropped under backpressure; everything
    /// else is authoritative and must be delivered.
    pub fn is_ephemeral(&self) -> bool {
        matches!(
            self,
            Self::CursorUpdate { .. } | Self::StrokeStart { .. } | Self::StrokeMove { .. }
        )
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidPayload(String),
    NotJoined,
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidPayload(e) => write!(f, "Invalid payload: {e}"),
            Self::NotJoined => write!(f, "Not joined to a room"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
