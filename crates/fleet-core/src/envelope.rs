//! # Feed Envelope Codec
//!
//! Message types for the live fleet feed.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Live Feed Messages                               │
//! │                                                                         │
//! │  SERVER ───► CLIENT                                                    │
//! │  ──────────────────                                                    │
//! │  connection             { status, message }        on accept           │
//! │  location_update        { data: LocationUpdate }   per GPS fix         │
//! │  batch_location_update  { data: { updates, count } }                   │
//! │  heartbeat              { }                        liveness only       │
//! │  pong                   { }                        reply to ping       │
//! │  subscribed             { message }                reply to subscribe  │
//! │                                                                         │
//! │  CLIENT ───► SERVER                                                    │
//! │  ──────────────────                                                    │
//! │  ping                   { timestamp }                                  │
//! │  subscribe              { }                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Every frame is a JSON object tagged by `type`:
//! ```json
//! { "type": "location_update", "timestamp": "2024-01-01T00:00:00.000Z",
//!   "data": { "truck_id": "TRK-001", "coordinates": { "lat": -1.29, "lon": 36.82 },
//!             "timestamp": "2024-01-01T00:00:00.000Z" } }
//! ```
//!
//! Unknown `type` values decode to [`FeedMessage::Unknown`] so the server can
//! add message types without breaking older clients.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::types::{BatchLocationUpdate, LocationUpdate};

// =============================================================================
// Message Kind
// =============================================================================

/// The `type` values this client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Connection confirmation / status text.
    Connection,
    /// A single location update.
    LocationUpdate,
    /// Several location updates.
    BatchLocationUpdate,
    /// Liveness only.
    Heartbeat,
    /// Reply to a client ping.
    Pong,
    /// Reply to a client subscribe request.
    Subscribed,
}

impl MessageKind {
    /// Looks up a wire `type` value. Returns `None` for unknown types.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "connection" => Some(MessageKind::Connection),
            "location_update" => Some(MessageKind::LocationUpdate),
            "batch_location_update" => Some(MessageKind::BatchLocationUpdate),
            "heartbeat" => Some(MessageKind::Heartbeat),
            "pong" => Some(MessageKind::Pong),
            "subscribed" => Some(MessageKind::Subscribed),
            _ => None,
        }
    }

    /// Returns the wire `type` value.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Connection => "connection",
            MessageKind::LocationUpdate => "location_update",
            MessageKind::BatchLocationUpdate => "batch_location_update",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Pong => "pong",
            MessageKind::Subscribed => "subscribed",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// A decoded inbound frame before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Wire `type` value.
    #[serde(rename = "type")]
    pub kind: String,

    /// Server send time (ISO-8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Type-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Machine-readable status (connection messages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Envelope {
    /// Creates an envelope with only a type and timestamp.
    pub fn new(kind: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Envelope {
            kind: kind.into(),
            timestamp: Some(timestamp.into()),
            data: None,
            status: None,
            message: None,
        }
    }

    /// Attaches a data payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Decodes an envelope from JSON text.
    pub fn from_json(text: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decodes an envelope from an already-parsed JSON value.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        Ok(Envelope::deserialize(value)?)
    }

    /// Serializes the envelope to JSON text.
    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string(self).map_err(|e| CoreError::SerializationFailed(e.to_string()))
    }

    /// Returns the message kind, or `None` if the type is unknown.
    pub fn message_kind(&self) -> Option<MessageKind> {
        MessageKind::parse(&self.kind)
    }

    /// Classifies the envelope and decodes its payload.
    pub fn into_message(self) -> CoreResult<FeedMessage> {
        let Some(kind) = self.message_kind() else {
            return Ok(FeedMessage::Unknown(self.kind));
        };

        match kind {
            MessageKind::Connection => Ok(FeedMessage::Connection {
                status: self.status,
                message: self.message,
            }),
            MessageKind::LocationUpdate => {
                let update = decode_data::<LocationUpdate>(kind, self.data)?;
                Ok(FeedMessage::LocationUpdate(update))
            }
            MessageKind::BatchLocationUpdate => {
                let batch = decode_data::<BatchLocationUpdate>(kind, self.data)?;
                Ok(FeedMessage::BatchLocationUpdate(batch))
            }
            MessageKind::Heartbeat => Ok(FeedMessage::Heartbeat),
            MessageKind::Pong => Ok(FeedMessage::Pong),
            MessageKind::Subscribed => Ok(FeedMessage::Subscribed {
                message: self.message,
            }),
        }
    }
}

fn decode_data<T: for<'de> Deserialize<'de>>(kind: MessageKind, data: Option<Value>) -> CoreResult<T> {
    let data = data.ok_or_else(|| CoreError::MissingPayload {
        kind: kind.to_string(),
    })?;
    serde_json::from_value(data).map_err(|e| CoreError::InvalidPayload {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

// =============================================================================
// Feed Message
// =============================================================================

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Connection status from the server.
    Connection {
        status: Option<String>,
        message: Option<String>,
    },

    /// A single truck position.
    LocationUpdate(LocationUpdate),

    /// Several truck positions.
    BatchLocationUpdate(BatchLocationUpdate),

    /// Liveness only.
    Heartbeat,

    /// Reply to a client ping.
    Pong,

    /// Reply to a client subscribe request.
    Subscribed { message: Option<String> },

    /// A type this client does not know. Carries the raw type name.
    Unknown(String),
}

impl FeedMessage {
    /// Returns the human-readable status text of a connection message.
    ///
    /// Prefers `message` and falls back to `status`.
    pub fn status_text(&self) -> Option<&str> {
        match self {
            FeedMessage::Connection { status, message } => {
                message.as_deref().or(status.as_deref())
            }
            _ => None,
        }
    }

    /// Returns the wire name of the message type.
    pub fn type_name(&self) -> &str {
        match self {
            FeedMessage::Connection { .. } => MessageKind::Connection.as_str(),
            FeedMessage::LocationUpdate(_) => MessageKind::LocationUpdate.as_str(),
            FeedMessage::BatchLocationUpdate(_) => MessageKind::BatchLocationUpdate.as_str(),
            FeedMessage::Heartbeat => MessageKind::Heartbeat.as_str(),
            FeedMessage::Pong => MessageKind::Pong.as_str(),
            FeedMessage::Subscribed { .. } => MessageKind::Subscribed.as_str(),
            FeedMessage::Unknown(kind) => kind.as_str(),
        }
    }
}

// =============================================================================
// Client Messages
// =============================================================================

/// Messages the client sends to the feed server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export)]
pub enum ClientMessage {
    /// Keepalive; the server answers with `pong`.
    Ping { timestamp: String },

    /// Ask for updates from every truck; the server answers with `subscribed`.
    Subscribe,
}

impl ClientMessage {
    /// Creates a ping stamped with the current time.
    pub fn ping() -> Self {
        Self::ping_at(Utc::now())
    }

    /// Creates a ping stamped with the given time.
    pub fn ping_at(at: DateTime<Utc>) -> Self {
        ClientMessage::Ping {
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Serializes to JSON text.
    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string(self).map_err(|e| CoreError::SerializationFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_location_update_envelope() {
        let envelope = Envelope::from_value(&json!({
            "type": "location_update",
            "data": {
                "truck_id": "T1",
                "coordinates": {"lat": 1, "lon": 2},
                "timestamp": "t0"
            }
        }))
        .unwrap();
        assert!(envelope.timestamp.is_none());

        match envelope.into_message().unwrap() {
            FeedMessage::LocationUpdate(update) => {
                assert_eq!(update.truck_id, "T1");
                assert_eq!(update.coordinates.lat, 1.0);
                assert_eq!(update.coordinates.lon, 2.0);
                assert_eq!(update.timestamp, "t0");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_batch_envelope_keeps_order() {
        let message = Envelope::from_json(
            r#"{"type":"batch_location_update","timestamp":"2024-01-01T00:00:00Z",
                "data":{"updates":[
                    {"truck_id":"T1","coordinates":{"lat":1,"lon":1},"timestamp":"t0"},
                    {"truck_id":"T2","coordinates":{"lat":2,"lon":2},"timestamp":"t1"}
                ],"count":2}}"#,
        )
        .unwrap()
        .into_message()
        .unwrap();

        let FeedMessage::BatchLocationUpdate(batch) = message else {
            panic!("expected batch");
        };
        let ids: Vec<_> = batch.updates.iter().map(|u| u.truck_id.as_str()).collect();
        assert_eq!(ids, ["T1", "T2"]);
        assert_eq!(batch.count, 2);
    }

    #[test]
    fn test_connection_status_text() {
        let message = Envelope::from_value(&json!({
            "type": "connection",
            "status": "connected",
            "message": "Connected to fleet live updates",
            "timestamp": "2024-01-01T00:00:00.000Z"
        }))
        .unwrap()
        .into_message()
        .unwrap();
        assert_eq!(message.status_text(), Some("Connected to fleet live updates"));

        let message = Envelope::from_value(&json!({"type": "connection", "status": "connected"}))
            .unwrap()
            .into_message()
            .unwrap();
        assert_eq!(message.status_text(), Some("connected"));
        assert_eq!(FeedMessage::Heartbeat.status_text(), None);
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let message = Envelope::from_json(r#"{"type":"route_eta","data":{"eta":5}}"#)
            .unwrap()
            .into_message()
            .unwrap();
        assert_eq!(message, FeedMessage::Unknown("route_eta".into()));
        assert_eq!(message.type_name(), "route_eta");
    }

    #[test]
    fn test_missing_and_invalid_payloads() {
        let err = Envelope::from_json(r#"{"type":"location_update"}"#)
            .unwrap()
            .into_message()
            .unwrap_err();
        assert!(matches!(err, CoreError::MissingPayload { .. }));

        let err = Envelope::from_json(r#"{"type":"location_update","data":{"truck_id":7}}"#)
            .unwrap()
            .into_message()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPayload { .. }));
    }

    #[test]
    fn test_envelope_requires_type() {
        assert!(Envelope::from_json(r#"{"data":{}}"#).is_err());
        assert!(Envelope::from_json("[1,2,3]").is_err());
    }

    #[test]
    fn test_heartbeat_and_replies() {
        let heartbeat = Envelope::new("heartbeat", "2024-01-01T00:00:00Z");
        assert_eq!(heartbeat.into_message().unwrap(), FeedMessage::Heartbeat);

        let pong = Envelope::from_json(r#"{"type":"pong","timestamp":"x"}"#).unwrap();
        assert_eq!(pong.message_kind(), Some(MessageKind::Pong));
        assert_eq!(pong.into_message().unwrap(), FeedMessage::Pong);
    }

    #[test]
    fn test_client_messages() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let ping = ClientMessage::ping_at(at).to_json().unwrap();
        assert_eq!(ping, r#"{"type":"ping","timestamp":"2024-01-01T00:00:00.000Z"}"#);

        let subscribe = ClientMessage::Subscribe.to_json().unwrap();
        assert_eq!(subscribe, r#"{"type":"subscribe"}"#);
    }

    #[test]
    fn test_message_kind_names() {
        for kind in [
            MessageKind::Connection,
            MessageKind::LocationUpdate,
            MessageKind::BatchLocationUpdate,
            MessageKind::Heartbeat,
            MessageKind::Pong,
            MessageKind::Subscribed,
        ] {
            assert_eq!(MessageKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::parse("ping"), None);
    }
}
