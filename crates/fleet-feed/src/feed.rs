//! # Location Feed
//!
//! Typed view of the live fleet feed on top of a [`ReconnectingChannel`].
//!
//! ## Message Routing
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  channel on_message(payload)                                            │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  Envelope::from_value ──► into_message                                  │
//! │        │                                                                │
//! │        ├── connection             → status text cached                  │
//! │        ├── location_update        → last location, on_location_update   │
//! │        ├── batch_location_update  → last element cached,                │
//! │        │                            on_batch_location_update (non-empty)│
//! │        ├── heartbeat/pong/subscribed → debug log                        │
//! │        └── unknown / malformed    → warn, dropped                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Connection lifecycle is entirely the channel's; the feed only republishes
//! it as `on_connection_status_change`.

use std::sync::Arc;
use std::time::Duration;

use fleet_core::{ClientMessage, ConnectionState, Envelope, FeedMessage, LocationUpdate};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::channel::{
    ChannelConfig, ChannelHandle, ChannelObserver, ChannelStatus, Payload, ReconnectingChannel,
    ReconnectingChannelBuilder,
};
use crate::config::FeedConfig;
use crate::error::{FeedError, FeedResult};
use crate::observer::{Observers, Subscription};
use crate::transport::Connector;

/// Callbacks for typed feed events. All default to no-ops.
#[allow(unused_variables)]
pub trait FeedObserver: Send + Sync {
    fn on_location_update(&self, update: &LocationUpdate) {}

    fn on_batch_location_update(&self, updates: &[LocationUpdate]) {}

    fn on_connection_status_change(&self, state: ConnectionState) {}

    fn on_reconnecting(&self, attempt: u32, delay: Duration) {}

    fn on_max_attempts_reached(&self) {}
}

struct FeedShared {
    last_location: watch::Sender<Option<LocationUpdate>>,
    status_text: watch::Sender<Option<String>>,
    observers: Observers<dyn FeedObserver>,
    cancel: CancellationToken,
}

impl FeedShared {
    fn notify(&self, f: impl Fn(&dyn FeedObserver)) {
        for observer in self.observers.snapshot() {
            if self.cancel.is_cancelled() {
                return;
            }
            f(observer.as_ref());
        }
    }
}

/// Channel observer that classifies envelopes for the feed.
struct FeedRouter {
    shared: Arc<FeedShared>,
}

impl FeedRouter {
    fn route(&self, payload: &Payload) {
        let Some(value) = payload.as_json() else {
            warn!(text = payload.as_text().unwrap_or_default(), "Ignoring non-JSON feed message");
            return;
        };

        let message = match Envelope::from_value(value).and_then(Envelope::into_message) {
            Ok(message) => message,
            Err(e) => {
                let err = FeedError::from(e);
                warn!(error = %err, "Ignoring malformed feed message");
                return;
            }
        };

        match &message {
            FeedMessage::Connection { .. } => {
                let text = message.status_text().map(str::to_string);
                debug!(status = ?text, "Feed connection status");
                self.shared.status_text.send_replace(text);
            }
            FeedMessage::LocationUpdate(update) => {
                debug!(truck_id = %update.truck_id, "Location update");
                self.shared.last_location.send_replace(Some(update.clone()));
                self.shared.notify(|o| o.on_location_update(update));
            }
            FeedMessage::BatchLocationUpdate(batch) => {
                let Some(latest) = batch.latest() else {
                    debug!("Ignoring empty location batch");
                    return;
                };
                debug!(count = batch.updates.len(), truck_id = %latest.truck_id, "Batch location update");
                self.shared.last_location.send_replace(Some(latest.clone()));
                self.shared.notify(|o| o.on_batch_location_update(&batch.updates));
            }
            FeedMessage::Heartbeat | FeedMessage::Pong | FeedMessage::Subscribed { .. } => {
                debug!(kind = message.type_name(), "Feed liveness message");
            }
            FeedMessage::Unknown(kind) => {
                warn!(%kind, "Ignoring unknown feed message type");
            }
        }
    }
}

impl ChannelObserver for FeedRouter {
    fn on_connect(&self) {
        self.shared
            .notify(|o| o.on_connection_status_change(ConnectionState::Connected));
    }

    fn on_disconnect(&self, _reason: &str) {
        self.shared.status_text.send_replace(None);
        self.shared
            .notify(|o| o.on_connection_status_change(ConnectionState::Disconnected));
    }

    fn on_error(&self, error: &FeedError) {
        debug!(error = %error, "Feed channel error");
    }

    fn on_message(&self, payload: &Payload) {
        if self.shared.cancel.is_cancelled() {
            return;
        }
        self.route(payload);
    }

    fn on_reconnecting(&self, attempt: u32, delay: Duration) {
        self.shared.notify(|o| o.on_reconnecting(attempt, delay));
    }

    fn on_max_attempts_reached(&self) {
        self.shared.notify(|o| o.on_max_attempts_reached());
    }
}

// =============================================================================
// Location Feed
// =============================================================================

/// The live truck-location feed.
///
/// Dropping it tears the underlying channel down.
pub struct LocationFeed {
    channel: ReconnectingChannel,
    shared: Arc<FeedShared>,
}

impl LocationFeed {
    /// Starts building a feed for `url` with the default feed profile.
    pub fn builder(url: Url) -> LocationFeedBuilder {
        LocationFeedBuilder {
            channel: ReconnectingChannel::builder(url),
            observers: Vec::new(),
        }
    }

    /// Builds a feed from loaded configuration.
    pub fn from_config(config: &FeedConfig) -> FeedResult<LocationFeedBuilder> {
        Ok(Self::builder(config.feed_url()?)
            .config(config.channel_config())
            .connector(config.connector()))
    }

    pub fn connect(&self) {
        self.channel.connect();
    }

    pub fn disconnect(&self) {
        self.channel.disconnect();
    }

    /// Sends a raw or structured message. False if not connected.
    pub fn send(&self, payload: impl Into<Payload>) -> bool {
        self.channel.send(payload)
    }

    /// Sends a timestamped `ping`; the server answers with `pong`.
    pub fn ping(&self) -> bool {
        self.channel.send_json(&ClientMessage::ping())
    }

    /// Asks the server for every truck's updates.
    pub fn subscribe_all(&self) -> bool {
        self.channel.send_json(&ClientMessage::Subscribe)
    }

    /// Most recent location seen, from a single or batched update.
    pub fn last_location(&self) -> Option<LocationUpdate> {
        self.shared.last_location.borrow().clone()
    }

    /// Receiver that sees every new last location.
    pub fn watch_location(&self) -> watch::Receiver<Option<LocationUpdate>> {
        self.shared.last_location.subscribe()
    }

    /// Status text from the server's last `connection` message.
    pub fn connection_status_text(&self) -> Option<String> {
        self.shared.status_text.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.channel.state()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.channel.reconnect_attempts()
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.channel.reconnect_delay()
    }

    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.channel.watch_status()
    }

    /// Registers an observer until the subscription is dropped.
    pub fn subscribe(&self, observer: Arc<dyn FeedObserver>) -> Subscription {
        self.shared.observers.subscribe(observer)
    }

    /// The underlying channel.
    pub fn channel(&self) -> ChannelHandle {
        self.channel.handle()
    }

    pub fn teardown(&self) {
        self.channel.teardown();
    }

    /// Tears down and waits for the channel task to finish.
    pub async fn shutdown(self) {
        self.channel.shutdown().await;
    }
}

/// Builder for [`LocationFeed`].
pub struct LocationFeedBuilder {
    channel: ReconnectingChannelBuilder,
    observers: Vec<Arc<dyn FeedObserver>>,
}

impl LocationFeedBuilder {
    /// Overrides the feed's reconnect profile.
    pub fn config(mut self, config: ChannelConfig) -> Self {
        self.channel = self.channel.config(config);
        self
    }

    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.channel = self.channel.connector(connector);
        self
    }

    /// Registers an observer for the lifetime of the feed.
    pub fn observer(mut self, observer: Arc<dyn FeedObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Spawns the underlying channel.
    pub fn spawn(self) -> FeedResult<LocationFeed> {
        let cancel = CancellationToken::new();
        let observers = Observers::new();
        for observer in self.observers {
            observers.attach(observer);
        }

        let shared = Arc::new(FeedShared {
            last_location: watch::channel(None).0,
            status_text: watch::channel(None).0,
            observers,
            cancel: cancel.clone(),
        });
        let router = Arc::new(FeedRouter {
            shared: Arc::clone(&shared),
        });

        let channel = self.channel.observer(router).cancellation(cancel).spawn()?;
        Ok(LocationFeed { channel, shared })
    }
}
