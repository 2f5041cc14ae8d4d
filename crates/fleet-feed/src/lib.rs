//! # fleet-feed: Live Fleet Feed Client
//!
//! Keeps the dashboard's live truck-location feed connected and typed.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Feed Client Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 LocationFeed (Typed Feed Adapter)                │  │
//! │  │                                                                  │  │
//! │  │  Classifies envelopes, caches the last location, republishes    │  │
//! │  │  typed events to FeedObservers                                   │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ ChannelObserver                         │
//! │  ┌────────────────────────────┴─────────────────────────────────────┐  │
//! │  │                 ReconnectingChannel (actor task)                 │  │
//! │  │                                                                  │  │
//! │  │  State machine, exponential backoff with ±25 % jitter,          │  │
//! │  │  generation-tagged transports, irrevocable teardown              │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ Connector / Socket                      │
//! │  ┌────────────────────────────┴─────────────────────────────────────┐  │
//! │  │                 WebSocketConnector (tokio-tungstenite)           │  │
//! │  │                                                                  │  │
//! │  │  Handshake timeout, protocol pings, close-frame bookkeeping     │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`channel`] - Reconnecting channel, its handle and observer trait
//! - [`config`] - Feed configuration (endpoint, backoff)
//! - [`error`] - Feed error types
//! - [`feed`] - Typed location feed
//! - [`observer`] - Observer registry and subscriptions
//! - [`reconnect`] - Backoff policy and schedule
//! - [`transport`] - Connector trait and WebSocket implementation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fleet_feed::{FeedConfig, LocationFeed};
//!
//! let config = FeedConfig::load_or_default(None);
//! let feed = LocationFeed::from_config(&config)?
//!     .observer(Arc::new(MapView::default()))
//!     .spawn()?;
//!
//! if let Some(update) = feed.last_location() {
//!     println!("{} at {:?}", update.truck_id, update.coordinates);
//! }
//! feed.shutdown().await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod channel;
pub mod config;
pub mod error;
pub mod feed;
pub mod observer;
pub mod reconnect;
pub mod transport;

#[cfg(test)]
mod mock;

// =============================================================================
// Re-exports
// =============================================================================

pub use channel::{
    ChannelConfig, ChannelHandle, ChannelObserver, ChannelStatus, Payload, ReconnectingChannel,
    ReconnectingChannelBuilder,
};
pub use config::FeedConfig;
pub use error::{FeedError, FeedResult};
pub use feed::{FeedObserver, LocationFeed, LocationFeedBuilder};
pub use observer::Subscription;
pub use reconnect::{ReconnectPolicy, ReconnectSchedule};
pub use transport::{Connector, Socket, SocketPeer, WebSocketConnector};

pub use fleet_core::ConnectionState;
