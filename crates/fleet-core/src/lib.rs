//! # fleet-core: Pure Domain Types for the Fleet Live Feed
//!
//! This crate holds everything the live truck-location feed needs to *talk
//! about* without ever touching a socket: the domain types, the connection
//! state vocabulary and the wire envelope codec.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Fleet Dashboard Architecture                       │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Dashboard (browser, TypeScript)                    │   │
//! │  │    Fleet Map ──► Tracking Panel ──► Connection Badge            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ ts-rs bindings                         │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ fleet-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐  ┌───────────────┐  ┌───────────────┐      │   │
//! │  │   │    types      │  │   envelope    │  │    error      │      │   │
//! │  │   │ LocationUpdate│  │ Envelope      │  │  CoreError    │      │   │
//! │  │   │ ConnectionSt. │  │ FeedMessage   │  │               │      │   │
//! │  │   └───────────────┘  └───────────────┘  └───────────────┘      │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO SOCKETS • NO TIMERS • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 fleet-feed (Connection Layer)                   │   │
//! │  │          Reconnecting channel, typed location feed              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Location updates, coordinates, connection state
//! - [`envelope`] - Inbound envelope decoding and outbound client messages
//! - [`error`] - Decode error types
//!
//! ## Example Usage
//!
//! ```rust
//! use fleet_core::envelope::{Envelope, FeedMessage};
//!
//! let json = r#"{"type":"location_update","timestamp":"2024-01-01T00:00:00Z",
//!     "data":{"truck_id":"TRK-001","coordinates":{"lat":-1.29,"lon":36.82},
//!     "timestamp":"2024-01-01T00:00:00Z"}}"#;
//!
//! let message = Envelope::from_json(json).unwrap().into_message().unwrap();
//! match message {
//!     FeedMessage::LocationUpdate(update) => assert_eq!(update.truck_id, "TRK-001"),
//!     other => panic!("unexpected message: {other:?}"),
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod envelope;
pub mod error;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use envelope::{ClientMessage, Envelope, FeedMessage, MessageKind};
pub use error::{CoreError, CoreResult};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Path of the live fleet feed, appended to the API base URL.
pub const FEED_PATH: &str = "/api/fleet/live";
