//! # Fleet Feed Monitor
//!
//! Tails the live fleet feed and logs every truck position.
//!
//! ```text
//! feed-monitor [path/to/feed.toml]
//!
//! RUST_LOG=fleet_feed=debug feed-monitor     # show channel transitions
//! FLEET_API_URL=https://fleet.example.com feed-monitor
//! ```
//!
//! The monitor always connects. `auto_connect` only decides whether the
//! channel dials on spawn or on the explicit `connect` below, so
//! `FLEET_AUTO_CONNECT=false` changes nothing observable here.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use fleet_core::{ConnectionState, LocationUpdate};
use fleet_feed::{FeedConfig, FeedObserver, LocationFeed};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Logs feed events.
struct LogObserver;

impl FeedObserver for LogObserver {
    fn on_location_update(&self, update: &LocationUpdate) {
        info!(
            truck_id = %update.truck_id,
            lat = update.coordinates.lat,
            lon = update.coordinates.lon,
            speed_kmh = ?update.speed_kmh,
            heading = ?update.heading,
            "Location update"
        );
    }

    fn on_batch_location_update(&self, updates: &[LocationUpdate]) {
        info!(count = updates.len(), "Batch location update");
        for update in updates {
            debug!(
                truck_id = %update.truck_id,
                lat = update.coordinates.lat,
                lon = update.coordinates.lon,
                "Batched position"
            );
        }
    }

    fn on_connection_status_change(&self, state: ConnectionState) {
        info!(%state, "Feed connection changed");
    }

    fn on_reconnecting(&self, attempt: u32, delay: Duration) {
        warn!(attempt, delay_ms = delay.as_millis() as u64, "Feed reconnecting");
    }

    fn on_max_attempts_reached(&self) {
        warn!("Feed gave up reconnecting");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = FeedConfig::load(config_path).context("failed to load feed config")?;
    info!(url = %config.feed_url()?, "Starting feed monitor");

    let feed = LocationFeed::from_config(&config)?
        .observer(Arc::new(LogObserver))
        .spawn()
        .context("failed to start feed")?;
    if !config.reconnect.auto_connect {
        debug!("auto_connect is off; connecting explicitly");
        feed.connect();
    }

    let mut keepalive = config.keepalive().map(|period| {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });
    let mut status = feed.watch_status();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("failed to listen for Ctrl-C")?;
                info!("Shutting down");
                break;
            }

            _ = next_tick(&mut keepalive) => {
                if feed.state().is_connected() && !feed.ping() {
                    debug!("Keepalive ping not sent");
                }
            }

            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                debug!(
                    state = %current.state,
                    attempts = current.reconnect_attempts,
                    delay_ms = current.reconnect_delay.as_millis() as u64,
                    "Channel status"
                );
            }
        }
    }

    if let Some(update) = feed.last_location() {
        info!(truck_id = %update.truck_id, timestamp = %update.timestamp, "Last location seen");
    }
    feed.shutdown().await;
    Ok(())
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
