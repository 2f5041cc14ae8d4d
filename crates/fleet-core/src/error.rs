//! # Error Types
//!
//! Decode errors for the feed's wire vocabulary.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  fleet-core errors (this file)                                         │
//! │  └── CoreError        - Envelope / payload decode failures             │
//! │                                                                         │
//! │  fleet-feed errors (separate crate)                                    │
//! │  └── FeedError        - Config, transport and channel failures         │
//! │                                                                         │
//! │  Flow: CoreError → logged by the feed adapter, never surfaced to UI    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for fleet-core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while decoding feed messages.
///
/// None of these are fatal: the feed adapter logs them and keeps listening.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The frame is not a JSON object with a string `type` field.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// A message type that requires `data` arrived without it.
    #[error("Missing data payload for '{kind}' message")]
    MissingPayload { kind: String },

    /// The `data` payload does not match the shape its type requires.
    #[error("Invalid '{kind}' payload: {reason}")]
    InvalidPayload { kind: String, reason: String },

    /// Outbound message could not be serialized.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::InvalidEnvelope(err.to_string())
    }
}
