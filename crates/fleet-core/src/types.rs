//! # Domain Types
//!
//! Core domain types shared by the feed and the dashboard.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │ LocationUpdate  │   │  Coordinates    │   │ BatchLocationUpdate │   │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────────  │   │
//! │  │  truck_id       │──►│  lat (f64)      │   │  updates [..]       │   │
//! │  │  coordinates    │   │  lon (f64)      │   │  count              │   │
//! │  │  timestamp      │   └─────────────────┘   └─────────────────────┘   │
//! │  │  speed_kmh?     │                                                    │
//! │  │  heading?       │   ┌─────────────────────────────────────────┐     │
//! │  └─────────────────┘   │ ConnectionState                          │     │
//! │                        │ disconnected │ connecting │ connected │   │     │
//! │                        │ reconnecting                             │     │
//! │                        └─────────────────────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Timestamps stay as the strings the server sent. The feed never rejects an
//! update because its timestamp is not ISO-8601; [`LocationUpdate::recorded_at`]
//! parses on demand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the live feed connection.
///
/// Exactly one state is active at a time. The reconnecting channel is the
/// only writer; everything else reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ConnectionState {
    /// Not connected. Initial state, and terminal once retries are exhausted.
    #[default]
    Disconnected,
    /// A transport is being opened.
    Connecting,
    /// The transport is open and messages flow.
    Connected,
    /// Waiting out the backoff delay before the next attempt.
    Reconnecting,
}

impl ConnectionState {
    /// Returns true if messages can be sent right now.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Returns the lowercase wire name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Coordinates
// =============================================================================

/// GPS position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Coordinates {
    /// Latitude, -90..=90.
    pub lat: f64,
    /// Longitude, -180..=180.
    pub lon: f64,
}

impl Coordinates {
    /// Creates a coordinate pair.
    pub const fn new(lat: f64, lon: f64) -> Self {
        Coordinates { lat, lon }
    }

    /// Returns true if both components are finite and within range.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

// =============================================================================
// Location Update
// =============================================================================

/// One truck's reported position.
///
/// The server may attach extra fields to `data`; they are ignored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LocationUpdate {
    /// Truck identifier (e.g. "TRK-001").
    pub truck_id: String,

    /// Reported position.
    pub coordinates: Coordinates,

    /// When the position was recorded, as sent by the server.
    pub timestamp: String,

    /// Ground speed in km/h.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub speed_kmh: Option<f64>,

    /// Heading in degrees clockwise from north.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub heading: Option<f64>,
}

impl LocationUpdate {
    /// Creates an update without speed or heading.
    pub fn new(truck_id: impl Into<String>, coordinates: Coordinates, timestamp: impl Into<String>) -> Self {
        LocationUpdate {
            truck_id: truck_id.into(),
            coordinates,
            timestamp: timestamp.into(),
            speed_kmh: None,
            heading: None,
        }
    }

    /// Sets the ground speed.
    pub fn with_speed(mut self, speed_kmh: f64) -> Self {
        self.speed_kmh = Some(speed_kmh);
        self
    }

    /// Sets the heading.
    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    /// Parses `timestamp` as RFC 3339, if it is one.
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }
}

// =============================================================================
// Batch Location Update
// =============================================================================

/// Several location updates delivered in one frame.
///
/// `count` is advisory; `updates` is authoritative.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BatchLocationUpdate {
    /// Updates in server order.
    #[serde(default)]
    pub updates: Vec<LocationUpdate>,

    /// Number of updates the server claims to have sent.
    #[serde(default)]
    pub count: u32,
}

impl BatchLocationUpdate {
    /// Returns the update that arrived last, which wins the cache.
    pub fn latest(&self) -> Option<&LocationUpdate> {
        self.updates.last()
    }

    /// Returns true if the batch carries no updates.
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}
