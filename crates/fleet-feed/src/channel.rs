//! # Reconnecting Channel
//!
//! One logical full-duplex connection that survives network interruption.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ┌────────────┐   connect()    ┌────────────┐   opened   ┌───────────┐ │
//! │  │Disconnected│ ─────────────► │ Connecting │ ─────────► │ Connected │ │
//! │  └────────────┘                └─────┬──────┘            └─────┬─────┘ │
//! │     ▲   ▲   ▲                        │                         │       │
//! │     │   │   │ clean close            │ dial failed /           │       │
//! │     │   │   └────────────────────────┤ abnormal close          │       │
//! │     │   │                            ▼                         │       │
//! │     │   │  max attempts      ┌──────────────┐  abnormal close  │       │
//! │     │   └─────────────────── │ Reconnecting │ ◄────────────────┘       │
//! │     │                        └──────┬───────┘                          │
//! │     │                               │ backoff timer fires              │
//! │     │                               └──────────► Connecting            │
//! │     │                                                                  │
//! │     └──── disconnect() from any state (close 1000, no retry)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Task Layout
//! A single actor task owns the state. Handles talk to it through a command
//! queue and read its published [`ChannelStatus`]; only `send` and `teardown`
//! touch the live socket directly. Each transport attempt carries a
//! generation number so events from a replaced socket are dropped unread.
//!
//! ## Usage
//! ```rust,ignore
//! let channel = ReconnectingChannel::builder(url)
//!     .config(ChannelConfig::default())
//!     .observer(Arc::new(MyObserver))
//!     .spawn()?;
//!
//! channel.send(r#"{"type":"ping"}"#);
//! channel.shutdown().await;
//! ```

use std::future::pending;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use fleet_core::ConnectionState;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{FeedError, FeedResult};
use crate::observer::{Observers, Subscription};
use crate::reconnect::{ReconnectPolicy, ReconnectSchedule};
use crate::transport::{CloseInfo, Connector, Frame, Socket, SocketEvent, WebSocketConnector};

/// Close reason sent on manual disconnect.
pub const DISCONNECT_REASON: &str = "Client disconnected";

/// Close reason sent on teardown.
pub const TEARDOWN_REASON: &str = "Channel torn down";

/// Close reason sent to a transport that is being replaced.
pub const REPLACED_REASON: &str = "Reconnecting";

// =============================================================================
// Configuration
// =============================================================================

/// Reconnect behaviour of a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Cap on the un-jittered delay.
    pub max_delay: Duration,

    /// Retries before giving up (0 = never give up).
    pub max_attempts: u32,

    /// Backoff growth factor.
    pub multiplier: f64,

    /// Start connecting as soon as the channel is spawned.
    pub auto_connect: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 0,
            multiplier: 2.0,
            auto_connect: true,
        }
    }
}

impl ChannelConfig {
    /// The backoff curve described by this config.
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            multiplier: self.multiplier,
        }
    }

    /// Validates the config.
    pub fn validate(&self) -> FeedResult<()> {
        self.policy().validate()
    }
}

// =============================================================================
// Payload
// =============================================================================

/// A message body travelling through the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Structured JSON. Serialized to text on send.
    Json(Value),

    /// Raw text, sent as-is. Inbound frames that are not JSON arrive as this.
    Text(String),
}

impl Payload {
    /// Parses an inbound frame, falling back to raw text.
    pub fn parse(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Text(text),
        }
    }

    /// Returns the JSON value, if this is structured.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Text(_) => None,
        }
    }

    /// Returns the raw text, if this is unstructured.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Json(_) => None,
            Payload::Text(text) => Some(text),
        }
    }

    /// Wire text for this payload.
    pub fn into_text(self) -> String {
        match self {
            Payload::Json(value) => value.to_string(),
            Payload::Text(text) => text,
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

// =============================================================================
// Status and Observers
// =============================================================================

/// Snapshot published after every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelStatus {
    pub state: ConnectionState,
    /// Consecutive failed or dropped attempts since the last success.
    pub reconnect_attempts: u32,
    /// Delay of the pending reconnect. Zero unless reconnecting.
    pub reconnect_delay: Duration,
}

/// Callbacks for channel lifecycle events.
///
/// Invoked on the channel's task, in registration order. Keep them short; the
/// channel processes nothing else while one runs.
#[allow(unused_variables)]
pub trait ChannelObserver: Send + Sync {
    fn on_connect(&self) {}

    fn on_disconnect(&self, reason: &str) {}

    fn on_error(&self, error: &FeedError) {}

    fn on_message(&self, payload: &Payload) {}

    fn on_reconnecting(&self, attempt: u32, delay: Duration) {}

    fn on_max_attempts_reached(&self) {}
}

// =============================================================================
// Channel Handle
// =============================================================================

enum Command {
    Connect,
    Disconnect,
}

struct Shared {
    url: Url,
    status: watch::Sender<ChannelStatus>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    observers: Observers<dyn ChannelObserver>,
    cancel: CancellationToken,
}

impl Shared {
    fn set_outbound(&self, outbound: Option<mpsc::UnboundedSender<Frame>>) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = outbound;
    }

    fn take_outbound(&self) -> Option<mpsc::UnboundedSender<Frame>> {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Cloneable handle to a running channel.
///
/// Commands return immediately; observe their effect through
/// [`ChannelHandle::watch_status`] or observers.
#[derive(Clone)]
pub struct ChannelHandle {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ChannelHandle {
    /// Starts a fresh connection attempt with the retry counter at zero.
    ///
    /// Re-enables automatic reconnection, cancels a pending retry and closes
    /// any socket already open.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Closes the connection and stops retrying until the next `connect`.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    fn command(&self, command: Command) {
        if self.shared.cancel.is_cancelled() {
            return;
        }
        let _ = self.commands.send(command);
    }

    /// Sends a payload. Returns false if not connected or the write failed.
    pub fn send(&self, payload: impl Into<Payload>) -> bool {
        match self.try_send(payload) {
            Ok(()) => true,
            Err(e) => {
                debug!(url = %self.shared.url, error = %e, "Dropping outbound message");
                false
            }
        }
    }

    /// Like [`ChannelHandle::send`], but says why nothing was sent.
    pub fn try_send(&self, payload: impl Into<Payload>) -> FeedResult<()> {
        if self.shared.cancel.is_cancelled() {
            return Err(FeedError::TornDown);
        }
        if !self.state().is_connected() {
            return Err(FeedError::NotConnected);
        }

        let text = payload.into().into_text();
        let outbound = self.shared.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = outbound.as_ref().ok_or(FeedError::NotConnected)?;
        tx.send(Frame::Text(text)).map_err(|_| FeedError::Disconnected)
    }

    /// Serializes a value to JSON and sends it.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> bool {
        match serde_json::to_value(value).map_err(FeedError::from) {
            Ok(value) => self.send(Payload::Json(value)),
            Err(e) => {
                warn!(error = %e, "Failed to serialize outbound message");
                false
            }
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.status.borrow().state
    }

    /// Consecutive failed attempts since the last success.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.status.borrow().reconnect_attempts
    }

    /// Delay of the pending reconnect.
    pub fn reconnect_delay(&self) -> Duration {
        self.shared.status.borrow().reconnect_delay
    }

    /// Full status snapshot.
    pub fn status(&self) -> ChannelStatus {
        *self.shared.status.borrow()
    }

    /// Receiver that sees every status change.
    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.shared.status.subscribe()
    }

    /// Registers an observer until the subscription is dropped.
    pub fn subscribe(&self, observer: Arc<dyn ChannelObserver>) -> Subscription {
        self.shared.observers.subscribe(observer)
    }

    /// The endpoint this channel connects to.
    pub fn url(&self) -> &Url {
        &self.shared.url
    }

    /// Returns true once the channel has been torn down.
    pub fn is_torn_down(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Permanently stops the channel.
    ///
    /// Closes the live socket with code 1000. No observer runs afterwards and
    /// the published status is frozen. Idempotent.
    pub fn teardown(&self) {
        if self.shared.cancel.is_cancelled() {
            return;
        }
        self.shared.cancel.cancel();
        if let Some(outbound) = self.shared.take_outbound() {
            let _ = outbound.send(Frame::close(TEARDOWN_REASON));
        }
        info!(url = %self.shared.url, "Channel torn down");
    }
}

// =============================================================================
// Reconnecting Channel
// =============================================================================

/// Owner of a channel task. Dropping it tears the channel down.
pub struct ReconnectingChannel {
    handle: ChannelHandle,
    task: Option<JoinHandle<()>>,
}

impl ReconnectingChannel {
    /// Starts building a channel for `url`.
    pub fn builder(url: Url) -> ReconnectingChannelBuilder {
        ReconnectingChannelBuilder {
            url,
            config: ChannelConfig::default(),
            connector: None,
            observers: Vec::new(),
            cancel: None,
        }
    }

    /// Returns a cloneable handle. Handles do not keep the channel alive.
    pub fn handle(&self) -> ChannelHandle {
        self.handle.clone()
    }

    /// Tears down and waits for the background task to finish.
    pub async fn shutdown(mut self) {
        self.handle.teardown();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Deref for ReconnectingChannel {
    type Target = ChannelHandle;

    fn deref(&self) -> &ChannelHandle {
        &self.handle
    }
}

impl Drop for ReconnectingChannel {
    fn drop(&mut self) {
        self.handle.teardown();
    }
}

/// Builder for [`ReconnectingChannel`].
pub struct ReconnectingChannelBuilder {
    url: Url,
    config: ChannelConfig,
    connector: Option<Arc<dyn Connector>>,
    observers: Vec<Arc<dyn ChannelObserver>>,
    cancel: Option<CancellationToken>,
}

impl ReconnectingChannelBuilder {
    pub fn config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default [`WebSocketConnector`].
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Registers an observer for the lifetime of the channel.
    ///
    /// Observers added here see the very first auto-connect.
    pub fn observer(mut self, observer: Arc<dyn ChannelObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Uses `token` as the teardown signal, so layers above can share it.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Validates the configuration and spawns the channel task.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(self) -> FeedResult<ReconnectingChannel> {
        self.config.validate()?;
        if !matches!(self.url.scheme(), "ws" | "wss") {
            return Err(FeedError::InvalidUrl(format!(
                "expected a ws:// or wss:// URL, got {}",
                self.url
            )));
        }

        let observers = Observers::new();
        for observer in self.observers {
            observers.attach(observer);
        }

        let (status, _) = watch::channel(ChannelStatus::default());
        let shared = Arc::new(Shared {
            url: self.url,
            status,
            outbound: Mutex::new(None),
            observers,
            cancel: self.cancel.unwrap_or_else(CancellationToken::new),
        });

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WebSocketConnector::default()));

        let actor = ChannelActor {
            shared: Arc::clone(&shared),
            connector,
            schedule: ReconnectSchedule::new(self.config.policy()),
            max_attempts: self.config.max_attempts,
            state: ConnectionState::Disconnected,
            should_reconnect: false,
            generation: 0,
            link: None,
            timer: None,
            commands: commands_rx,
            events_tx,
            events_rx,
        };

        let task = tokio::spawn(actor.run(self.config.auto_connect));

        Ok(ReconnectingChannel {
            handle: ChannelHandle {
                shared,
                commands: commands_tx,
            },
            task: Some(task),
        })
    }
}

// =============================================================================
// Channel Actor
// =============================================================================

enum LinkEvent {
    Opened(mpsc::UnboundedSender<Frame>),
    DialFailed(FeedError),
    Socket(SocketEvent),
}

/// The transport attempt currently owned by the actor.
struct Link {
    generation: u64,
    task: JoinHandle<()>,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
}

struct ChannelActor {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    schedule: ReconnectSchedule,
    max_attempts: u32,
    state: ConnectionState,
    should_reconnect: bool,
    generation: u64,
    link: Option<Link>,
    timer: Option<Pin<Box<Sleep>>>,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<(u64, LinkEvent)>,
    events_rx: mpsc::UnboundedReceiver<(u64, LinkEvent)>,
}

impl ChannelActor {
    async fn run(mut self, auto_connect: bool) {
        info!(url = %self.shared.url, auto_connect, "Channel starting");

        if auto_connect {
            self.connect();
        }

        loop {
            tokio::select! {
                biased;

                _ = self.shared.cancel.cancelled() => break,

                command = self.commands.recv() => match command {
                    Some(Command::Connect) => self.connect(),
                    Some(Command::Disconnect) => self.disconnect(),
                    None => break,
                },

                Some((generation, event)) = self.events_rx.recv() => {
                    self.handle_link_event(generation, event);
                }

                _ = wait_timer(&mut self.timer) => {
                    self.timer = None;
                    debug!(attempt = self.schedule.attempts(), "Reconnect timer fired");
                    let delay = self.shared.status.borrow().reconnect_delay;
                    self.open_link(delay);
                }
            }
        }

        self.release_outbound();
        if let Some(link) = self.link.take() {
            link.task.abort();
        }
        debug!(url = %self.shared.url, "Channel stopped");
    }

    /// Closes a socket still published after cancellation. Whichever of this
    /// and `teardown` takes the sender sends the close frame.
    fn release_outbound(&self) {
        if let Some(outbound) = self.shared.take_outbound() {
            let _ = outbound.send(Frame::close(TEARDOWN_REASON));
        }
    }

    fn connect(&mut self) {
        self.should_reconnect = true;
        self.timer = None;
        self.schedule.reset();
        self.open_link(Duration::ZERO);
    }

    fn disconnect(&mut self) {
        let previous = self.state;
        self.should_reconnect = false;
        self.timer = None;
        self.close_link(DISCONNECT_REASON);
        self.schedule.reset();
        self.publish(ConnectionState::Disconnected, Duration::ZERO);

        if previous != ConnectionState::Disconnected {
            info!(url = %self.shared.url, "Disconnected by client");
            self.notify(|o| o.on_disconnect(DISCONNECT_REASON));
        }
    }

    /// Replaces any current transport with a fresh attempt.
    ///
    /// `delay` is the backoff that led here; zero for a manual connect.
    fn open_link(&mut self, delay: Duration) {
        self.close_link(REPLACED_REASON);

        self.generation += 1;
        let generation = self.generation;
        self.publish(ConnectionState::Connecting, delay);

        debug!(url = %self.shared.url, generation, "Opening transport");
        let dial = self.connector.connect(&self.shared.url);
        let task = tokio::spawn(drive_link(dial, generation, self.events_tx.clone()));
        self.link = Some(Link {
            generation,
            task,
            outbound: None,
        });
    }

    /// Detaches the current transport, closing it if it is open.
    fn close_link(&mut self, reason: &str) {
        if let Some(link) = self.link.take() {
            if let Some(outbound) = link.outbound {
                let _ = outbound.send(Frame::close(reason));
            }
            link.task.abort();
        }
        self.shared.set_outbound(None);
    }

    fn handle_link_event(&mut self, generation: u64, event: LinkEvent) {
        if self.link.as_ref().map(|link| link.generation) != Some(generation) {
            debug!(generation, current = self.generation, "Ignoring event from replaced transport");
            return;
        }

        match event {
            LinkEvent::Opened(outbound) => {
                self.shared.set_outbound(Some(outbound.clone()));
                // A teardown that ran before the store above never saw this socket.
                if self.shared.cancel.is_cancelled() {
                    self.release_outbound();
                    return;
                }
                if let Some(link) = self.link.as_mut() {
                    link.outbound = Some(outbound);
                }
                self.schedule.reset();
                self.publish(ConnectionState::Connected, Duration::ZERO);
                info!(url = %self.shared.url, generation, "Connected");
                self.notify(|o| o.on_connect());
            }
            LinkEvent::DialFailed(err) => {
                warn!(url = %self.shared.url, error = %err, "Connection attempt failed");
                self.link = None;
                self.notify(|o| o.on_error(&err));
                self.after_close(false);
            }
            LinkEvent::Socket(SocketEvent::Message(text)) => {
                let payload = Payload::parse(text);
                self.notify(|o| o.on_message(&payload));
            }
            LinkEvent::Socket(SocketEvent::Error(message)) => {
                warn!(url = %self.shared.url, error = %message, "Transport error");
                let err = FeedError::WebSocketError(message);
                self.notify(|o| o.on_error(&err));
            }
            LinkEvent::Socket(SocketEvent::Closed(close)) => {
                self.link = None;
                self.shared.set_outbound(None);
                let reason = close.describe();
                info!(code = close.code, clean = close.clean, %reason, "Transport closed");
                self.notify(|o| o.on_disconnect(&reason));
                self.after_close(close.clean);
            }
        }
    }

    fn after_close(&mut self, clean: bool) {
        if clean || !self.should_reconnect {
            self.publish(ConnectionState::Disconnected, Duration::ZERO);
        } else {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.max_attempts > 0 && self.schedule.attempts() >= self.max_attempts {
            warn!(
                url = %self.shared.url,
                max_attempts = self.max_attempts,
                "Max reconnection attempts reached"
            );
            self.schedule.reset();
            self.publish(ConnectionState::Disconnected, Duration::ZERO);
            self.notify(|o| o.on_max_attempts_reached());
            return;
        }

        let (attempt, delay) = self.schedule.next_attempt();
        self.publish(ConnectionState::Reconnecting, delay);
        info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
        self.notify(|o| o.on_reconnecting(attempt, delay));
        self.timer = Some(Box::pin(sleep(delay)));
    }

    fn publish(&mut self, state: ConnectionState, delay: Duration) {
        if self.shared.cancel.is_cancelled() {
            return;
        }
        self.state = state;
        self.shared.status.send_replace(ChannelStatus {
            state,
            reconnect_attempts: self.schedule.attempts(),
            reconnect_delay: delay,
        });
    }

    fn notify(&self, f: impl Fn(&dyn ChannelObserver)) {
        for observer in self.shared.observers.snapshot() {
            if self.shared.cancel.is_cancelled() {
                return;
            }
            f(observer.as_ref());
        }
    }
}

/// Runs one transport attempt, forwarding its events tagged with `generation`.
async fn drive_link(
    dial: BoxFuture<'static, FeedResult<Socket>>,
    generation: u64,
    events: mpsc::UnboundedSender<(u64, LinkEvent)>,
) {
    let Socket {
        outbound,
        mut inbound,
    } = match dial.await {
        Ok(socket) => socket,
        Err(err) => {
            let _ = events.send((generation, LinkEvent::DialFailed(err)));
            return;
        }
    };

    if events.send((generation, LinkEvent::Opened(outbound))).is_err() {
        return;
    }

    while let Some(event) = inbound.recv().await {
        let last = matches!(event, SocketEvent::Closed(_));
        if events.send((generation, LinkEvent::Socket(event))).is_err() || last {
            return;
        }
    }

    let close = CloseInfo::abnormal("Transport ended without a close frame");
    let _ = events.send((generation, LinkEvent::Socket(SocketEvent::Closed(close))));
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConnector, PendingDial};
    use crate::transport::SocketPeer;
    use serde_json::json;
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Connect,
        Disconnect(String),
        Error(String),
        Message(Payload),
        Reconnecting(u32, Duration),
        MaxAttempts,
    }

    struct Recorder(mpsc::UnboundedSender<Event>);

    impl Recorder {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Arc::new(Recorder(tx)), rx)
        }
    }

    impl ChannelObserver for Recorder {
        fn on_connect(&self) {
            let _ = self.0.send(Event::Connect);
        }
        fn on_disconnect(&self, reason: &str) {
            let _ = self.0.send(Event::Disconnect(reason.to_string()));
        }
        fn on_error(&self, error: &FeedError) {
            let _ = self.0.send(Event::Error(error.to_string()));
        }
        fn on_message(&self, payload: &Payload) {
            let _ = self.0.send(Event::Message(payload.clone()));
        }
        fn on_reconnecting(&self, attempt: u32, delay: Duration) {
            let _ = self.0.send(Event::Reconnecting(attempt, delay));
        }
        fn on_max_attempts_reached(&self) {
            let _ = self.0.send(Event::MaxAttempts);
        }
    }

    struct Harness {
        channel: ReconnectingChannel,
        dials: mpsc::UnboundedReceiver<PendingDial>,
        events: mpsc::UnboundedReceiver<Event>,
    }

    fn url() -> Url {
        Url::parse("ws://fleet.test/api/fleet/live").unwrap()
    }

    fn spawn(config: ChannelConfig) -> Harness {
        let (connector, dials) = MockConnector::new();
        let (recorder, events) = Recorder::new();
        let channel = ReconnectingChannel::builder(url())
            .config(config)
            .connector(connector)
            .observer(recorder)
            .spawn()
            .unwrap();
        Harness {
            channel,
            dials,
            events,
        }
    }

    impl Harness {
        async fn dial(&mut self) -> PendingDial {
            self.dials.recv().await.unwrap()
        }

        async fn connected(&mut self) -> SocketPeer {
            let peer = self.dial().await.accept();
            assert_eq!(self.events.recv().await, Some(Event::Connect));
            peer
        }

        /// Accepts the next dial and waits for `on_connect`, counting the
        /// retries scheduled on the way.
        async fn connected_after_failures(&mut self, failures: usize) -> SocketPeer {
            let peer = self.dial().await.accept();
            let mut seen = 0;
            loop {
                match self.events.recv().await {
                    Some(Event::Connect) => break,
                    Some(Event::Reconnecting(..)) => seen += 1,
                    Some(Event::Error(_)) => {}
                    other => panic!("unexpected event: {other:?}"),
                }
            }
            assert_eq!(seen, failures);
            peer
        }

        async fn wait_state(&self, state: ConnectionState) -> ChannelStatus {
            *self
                .channel
                .watch_status()
                .wait_for(|s| s.state == state)
                .await
                .unwrap()
        }

        /// Lets a long stretch of virtual time pass and checks nothing dialed.
        async fn assert_quiet(&mut self) {
            sleep(Duration::from_secs(120)).await;
            assert!(self.dials.try_recv().is_err(), "unexpected connection attempt");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_connect() {
        let mut h = spawn(ChannelConfig::default());

        let dial = h.dial().await;
        assert_eq!(dial.url, url());
        assert_eq!(h.channel.state(), ConnectionState::Connecting);

        let _peer = dial.accept();
        assert_eq!(h.events.recv().await, Some(Event::Connect));
        let status = h.channel.status();
        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(status.reconnect_attempts, 0);
        assert_eq!(status.reconnect_delay, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_connect_when_auto_connect_disabled() {
        let mut h = spawn(ChannelConfig {
            auto_connect: false,
            ..Default::default()
        });

        h.assert_quiet().await;
        assert_eq!(h.channel.state(), ConnectionState::Disconnected);

        h.channel.connect();
        let _peer = h.connected().await;
        assert_eq!(h.channel.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_close_does_not_reconnect() {
        let mut h = spawn(ChannelConfig::default());
        let peer = h.connected().await;

        peer.close(1000, "server shutdown");
        assert_eq!(h.events.recv().await, Some(Event::Disconnect("server shutdown".into())));
        h.wait_state(ConnectionState::Disconnected).await;

        h.assert_quiet().await;
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abnormal_close_schedules_one_reconnect() {
        let policy = ReconnectPolicy::default();
        let mut h = spawn(ChannelConfig::default());
        let peer = h.connected().await;

        peer.close(1006, "");
        assert_eq!(
            h.events.recv().await,
            Some(Event::Disconnect("Connection closed (code 1006)".into()))
        );
        let delay = match h.events.recv().await {
            Some(Event::Reconnecting(1, delay)) => delay,
            other => panic!("unexpected event: {other:?}"),
        };
        let (low, high) = policy.jitter_bounds(1);
        assert!(delay >= low && delay <= high, "{delay:?}");

        let status = h.channel.status();
        assert_eq!(status.state, ConnectionState::Reconnecting);
        assert_eq!(status.reconnect_attempts, 1);
        assert_eq!(status.reconnect_delay, delay);

        let started = Instant::now();
        let _dial = h.dial().await;
        let waited = started.elapsed();
        assert!(waited >= delay && waited <= delay + Duration::from_millis(1), "{waited:?}");
        assert_eq!(h.channel.state(), ConnectionState::Connecting);
        assert_eq!(h.channel.reconnect_attempts(), 1);

        h.assert_quiet().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_reconnect_resets_counter() {
        let mut h = spawn(ChannelConfig::default());
        h.dial().await.reject("refused");
        h.dial().await.reject("refused");
        let _peer = h.connected_after_failures(2).await;

        assert_eq!(h.channel.reconnect_attempts(), 0);
        assert_eq!(h.channel.reconnect_delay(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dial_failure_reports_error_then_reconnects() {
        let mut h = spawn(ChannelConfig::default());
        h.dial().await.reject("connection refused");

        match h.events.recv().await {
            Some(Event::Error(message)) => assert!(message.contains("connection refused")),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(h.events.recv().await, Some(Event::Reconnecting(1, _))));
        assert_eq!(h.channel.state(), ConnectionState::Reconnecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_socket_error_alone_does_not_reconnect() {
        let mut h = spawn(ChannelConfig::default());
        let peer = h.connected().await;

        peer.error("frame too large");
        assert!(matches!(h.events.recv().await, Some(Event::Error(_))));
        assert_eq!(h.channel.state(), ConnectionState::Connected);
        h.assert_quiet().await;

        peer.close(1006, "reset");
        assert_eq!(h.events.recv().await, Some(Event::Disconnect("reset".into())));
        assert!(matches!(h.events.recv().await, Some(Event::Reconnecting(1, _))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_end_without_close_is_abnormal() {
        let mut h = spawn(ChannelConfig::default());
        let peer = h.connected().await;

        drop(peer);
        assert!(matches!(h.events.recv().await, Some(Event::Disconnect(_))));
        assert!(matches!(h.events.recv().await, Some(Event::Reconnecting(1, _))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_reconnecting_cancels_timer() {
        let mut h = spawn(ChannelConfig::default());
        let peer = h.connected().await;

        peer.close(1006, "reset");
        h.wait_state(ConnectionState::Reconnecting).await;

        assert!(h.channel.reconnect_delay() > Duration::ZERO);

        let started = Instant::now();
        h.channel.connect();
        let dial = h.dial().await;
        assert_eq!(started.elapsed(), Duration::ZERO);
        let status = h.channel.status();
        assert_eq!(status.state, ConnectionState::Connecting);
        assert_eq!(status.reconnect_attempts, 0);
        assert_eq!(status.reconnect_delay, Duration::ZERO);

        let _peer = dial.accept();
        h.wait_state(ConnectionState::Connected).await;
        h.assert_quiet().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_replaces_live_transport() {
        let mut h = spawn(ChannelConfig::default());
        let mut old = h.connected().await;

        h.channel.connect();
        assert_eq!(old.next_frame().await, Some(Frame::close(REPLACED_REASON)));
        let new = h.dial().await.accept();
        h.wait_state(ConnectionState::Connected).await;

        // The replaced socket is detached; nothing it says reaches observers.
        old.send_text("stale");
        old.close(1006, "gone");
        new.send_text("fresh");
        assert_eq!(h.events.recv().await, Some(Event::Connect));
        assert_eq!(
            h.events.recv().await,
            Some(Event::Message(Payload::Text("fresh".into())))
        );
        assert_eq!(h.channel.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_attempts_reached_once() {
        let mut h = spawn(ChannelConfig {
            max_attempts: 3,
            ..Default::default()
        });

        // Initial attempt plus three retries.
        for _ in 0..4 {
            h.dial().await.reject("refused");
        }
        h.wait_state(ConnectionState::Disconnected).await;

        let mut reconnecting = 0;
        let mut reached = 0;
        while let Ok(event) = h.events.try_recv() {
            match event {
                Event::Reconnecting(..) => reconnecting += 1,
                Event::MaxAttempts => reached += 1,
                _ => {}
            }
        }
        assert_eq!(reconnecting, 3);
        assert_eq!(reached, 1);

        let status = h.channel.status();
        assert_eq!(status.reconnect_attempts, 0);
        assert_eq!(status.reconnect_delay, Duration::ZERO);
        h.assert_quiet().await;
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_only_when_connected() {
        let mut h = spawn(ChannelConfig {
            auto_connect: false,
            ..Default::default()
        });
        assert!(!h.channel.send("early"));

        h.channel.connect();
        let mut peer = h.connected().await;
        assert!(h.channel.send("hello"));
        assert!(h.channel.send_json(&json!({"type": "subscribe"})));
        assert_eq!(peer.next_frame().await, Some(Frame::Text("hello".into())));
        assert_eq!(
            peer.next_frame().await,
            Some(Frame::Text(r#"{"type":"subscribe"}"#.into()))
        );
        assert!(peer.frames.try_recv().is_err());

        peer.close(1006, "reset");
        h.wait_state(ConnectionState::Reconnecting).await;
        assert!(!h.channel.send("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_send_reports_reason() {
        let mut h = spawn(ChannelConfig {
            auto_connect: false,
            ..Default::default()
        });
        assert!(matches!(h.channel.try_send("early"), Err(FeedError::NotConnected)));

        h.channel.connect();
        let mut peer = h.connected().await;
        h.channel.try_send("hello").unwrap();
        assert_eq!(peer.next_frame().await, Some(Frame::Text("hello".into())));

        h.channel.teardown();
        assert!(matches!(h.channel.try_send("late"), Err(FeedError::TornDown)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_payload_parsing() {
        let mut h = spawn(ChannelConfig::default());
        let peer = h.connected().await;

        peer.send_text(r#"{"type":"heartbeat"}"#);
        peer.send_text("not json");
        assert_eq!(
            h.events.recv().await,
            Some(Event::Message(Payload::Json(json!({"type": "heartbeat"}))))
        );
        assert_eq!(
            h.events.recv().await,
            Some(Event::Message(Payload::Text("not json".into())))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_closes_and_stops_retrying() {
        let mut h = spawn(ChannelConfig::default());
        let mut peer = h.connected().await;

        h.channel.disconnect();
        assert_eq!(peer.next_frame().await, Some(Frame::close(DISCONNECT_REASON)));
        assert_eq!(
            h.events.recv().await,
            Some(Event::Disconnect(DISCONNECT_REASON.into()))
        );
        assert_eq!(h.channel.state(), ConnectionState::Disconnected);

        // A late close from the server changes nothing.
        peer.close(1006, "late");
        h.assert_quiet().await;
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_reconnecting_cancels_timer() {
        let mut h = spawn(ChannelConfig::default());
        h.dial().await.reject("refused");
        h.wait_state(ConnectionState::Reconnecting).await;

        h.channel.disconnect();
        let status = h.wait_state(ConnectionState::Disconnected).await;
        assert_eq!(status.reconnect_attempts, 0);
        h.assert_quiet().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_with_pending_timer() {
        let mut h = spawn(ChannelConfig::default());
        h.dial().await.reject("refused");
        h.wait_state(ConnectionState::Reconnecting).await;
        while h.events.try_recv().is_ok() {}

        h.channel.teardown();
        assert!(h.channel.is_torn_down());
        h.assert_quiet().await;

        assert!(h.events.try_recv().is_err());
        assert_eq!(h.channel.state(), ConnectionState::Reconnecting);
        h.channel.connect();
        h.assert_quiet().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_closes_live_transport() {
        let mut h = spawn(ChannelConfig::default());
        let mut peer = h.connected().await;

        h.channel.teardown();
        assert_eq!(peer.next_frame().await, Some(Frame::close(TEARDOWN_REASON)));

        peer.send_text("in flight");
        peer.close(1006, "gone");
        h.assert_quiet().await;
        assert!(h.events.try_recv().is_err());
        assert!(!h.channel.send("after"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_dial_keeps_backoff_delay() {
        let mut h = spawn(ChannelConfig::default());
        h.dial().await.reject("refused");
        let delay = h.wait_state(ConnectionState::Reconnecting).await.reconnect_delay;

        let _dial = h.dial().await;
        let status = h.channel.status();
        assert_eq!(status.state, ConnectionState::Connecting);
        assert_eq!(status.reconnect_attempts, 1);
        assert_eq!(status.reconnect_delay, delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_token_cancel_closes_live_transport() {
        let (connector, mut dials) = MockConnector::new();
        let token = CancellationToken::new();
        let channel = ReconnectingChannel::builder(url())
            .connector(connector)
            .cancellation(token.clone())
            .spawn()
            .unwrap();
        let mut peer = dials.recv().await.unwrap().accept();
        channel
            .watch_status()
            .wait_for(|s| s.state.is_connected())
            .await
            .unwrap();

        token.cancel();
        assert_eq!(peer.next_frame().await, Some(Frame::close(TEARDOWN_REASON)));
        assert!(channel.is_torn_down());
        assert!(!channel.send("after"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_tears_down() {
        let Harness {
            channel,
            mut dials,
            ..
        } = spawn(ChannelConfig::default());
        let mut peer = dials.recv().await.unwrap().accept();
        channel
            .watch_status()
            .wait_for(|s| s.state.is_connected())
            .await
            .unwrap();

        let handle = channel.handle();
        drop(channel);
        assert!(handle.is_torn_down());
        assert_eq!(peer.next_frame().await, Some(Frame::close(TEARDOWN_REASON)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_joins_task() {
        let mut h = spawn(ChannelConfig::default());
        let _peer = h.connected().await;
        let handle = h.channel.handle();
        h.channel.shutdown().await;
        assert!(handle.is_torn_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_runtime_subscription() {
        let mut h = spawn(ChannelConfig::default());
        let (extra, mut extra_events) = Recorder::new();
        let subscription = h.channel.subscribe(extra);

        let peer = h.connected().await;
        assert_eq!(extra_events.recv().await, Some(Event::Connect));

        drop(subscription);
        peer.send_text("x");
        assert!(matches!(h.events.recv().await, Some(Event::Message(_))));
        assert!(extra_events.try_recv().is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(ChannelConfig::default().validate().is_ok());
        let config = ChannelConfig {
            max_delay: Duration::from_millis(10),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_config_error());
    }

    #[tokio::test]
    async fn test_rejects_non_websocket_url() {
        let (connector, _dials) = MockConnector::new();
        let result = ReconnectingChannel::builder(Url::parse("http://fleet.test").unwrap())
            .connector(connector)
            .spawn();
        assert!(matches!(result, Err(FeedError::InvalidUrl(_))));
    }
}
