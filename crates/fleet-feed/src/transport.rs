//! # Feed Transport
//!
//! Connectors that open one full-duplex text socket per call.
//!
//! ## Socket Plumbing
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   ReconnectingChannel            Socket               pump task        │
//! │   ───────────────────     ─────────────────────    ────────────────    │
//! │                                                                         │
//! │   send(payload) ──────►  outbound: Frame    ──────► ws.send(Text)       │
//! │   teardown/replace ───►  Frame::Close       ──────► ws.send(Close) ─┐   │
//! │                                                                     │   │
//! │   on_message    ◄──────  inbound: Message   ◄────── ws.next(Text)   │   │
//! │   on_error      ◄──────  inbound: Error     ◄────── read/write err  │   │
//! │   schedule      ◄──────  inbound: Closed    ◄────── close / EOF ◄───┘   │
//! │                                                                         │
//! │   Every Error is followed by exactly one Closed; Closed is always the  │
//! │   last event of a socket.                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{FeedError, FeedResult};

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Reserved code for a connection that ended without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

// =============================================================================
// Frames and Events
// =============================================================================

/// Outbound instruction for a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text message.
    Text(String),

    /// Close the socket with the given code and reason. Nothing is sent after.
    Close { code: u16, reason: String },
}

impl Frame {
    /// Creates a normal-closure frame.
    pub fn close(reason: impl Into<String>) -> Self {
        Frame::Close {
            code: CLOSE_NORMAL,
            reason: reason.into(),
        }
    }
}

/// How a socket ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
    /// True only for a close frame with code 1000.
    pub clean: bool,
}

impl CloseInfo {
    /// Close info for a received close frame.
    pub fn from_code(code: u16, reason: impl Into<String>) -> Self {
        CloseInfo {
            code,
            reason: reason.into(),
            clean: code == CLOSE_NORMAL,
        }
    }

    /// Close info for a connection lost without a close frame.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        CloseInfo {
            code: CLOSE_ABNORMAL,
            reason: reason.into(),
            clean: false,
        }
    }

    /// Human-readable reason, falling back to the code.
    pub fn describe(&self) -> String {
        if self.reason.is_empty() {
            format!("Connection closed (code {})", self.code)
        } else {
            self.reason.clone()
        }
    }
}

/// Inbound event from a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A text message arrived.
    Message(String),

    /// The socket reported an error. A `Closed` event follows.
    Error(String),

    /// The socket is gone. Always the last event.
    Closed(CloseInfo),
}

// =============================================================================
// Socket
// =============================================================================

/// An open socket, as seen by the channel.
#[derive(Debug)]
pub struct Socket {
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub inbound: mpsc::UnboundedReceiver<SocketEvent>,
}

/// The far side of a [`Socket`], driven by a connector.
#[derive(Debug)]
pub struct SocketPeer {
    pub frames: mpsc::UnboundedReceiver<Frame>,
    pub events: mpsc::UnboundedSender<SocketEvent>,
}

impl Socket {
    /// Creates a connected socket/peer pair.
    pub fn pair() -> (Socket, SocketPeer) {
        let (outbound, frames) = mpsc::unbounded_channel();
        let (events, inbound) = mpsc::unbounded_channel();
        (Socket { outbound, inbound }, SocketPeer { frames, events })
    }
}

impl SocketPeer {
    /// Delivers a text message to the channel. Returns false if it is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.events.send(SocketEvent::Message(text.into())).is_ok()
    }

    /// Reports an error without closing.
    pub fn error(&self, message: impl Into<String>) -> bool {
        self.events.send(SocketEvent::Error(message.into())).is_ok()
    }

    /// Closes the socket with the given code and reason.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.events
            .send(SocketEvent::Closed(CloseInfo::from_code(code, reason)))
            .is_ok()
    }

    /// Waits for the next frame the channel sends.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens sockets to a URL.
///
/// The returned future must not borrow the connector; the channel drives it
/// from its own task and may drop it at any point.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &Url) -> BoxFuture<'static, FeedResult<Socket>>;
}

// =============================================================================
// WebSocket Connector
// =============================================================================

/// Connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    /// Maximum time for the TCP/TLS/upgrade handshake.
    pub connect_timeout: Duration,

    /// Interval between protocol-level pings. Zero disables them.
    pub ping_interval: Duration,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        WebSocketConnector {
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self, url: &Url) -> BoxFuture<'static, FeedResult<Socket>> {
        let target = url.to_string();
        let connect_timeout = self.connect_timeout;
        let ping_interval = self.ping_interval;

        Box::pin(async move {
            let ws = match timeout(connect_timeout, connect_async(target.as_str())).await {
                Ok(Ok((ws, response))) => {
                    debug!(url = %target, status = ?response.status(), "WebSocket handshake complete");
                    ws
                }
                Ok(Err(e)) => return Err(FeedError::from(e)),
                Err(_) => return Err(FeedError::Timeout(connect_timeout.as_secs())),
            };

            let (socket, peer) = Socket::pair();
            tokio::spawn(pump(ws, peer, ping_interval));
            Ok(socket)
        })
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bridges one WebSocket to its [`SocketPeer`] until either side closes.
async fn pump(ws: WsStream, peer: SocketPeer, ping_interval: Duration) {
    let SocketPeer { mut frames, events } = peer;
    let (mut write, mut read) = ws.split();

    let mut ping = (!ping_interval.is_zero()).then(|| {
        let mut ticker = interval_at(Instant::now() + ping_interval, ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    let fail = |events: &mpsc::UnboundedSender<SocketEvent>, message: String| {
        let _ = events.send(SocketEvent::Error(message.clone()));
        let _ = events.send(SocketEvent::Closed(CloseInfo::abnormal(message)));
    };

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(Frame::Text(text)) => {
                    if let Err(e) = write.send(WsMessage::Text(text.into())).await {
                        warn!(error = %e, "WebSocket write failed");
                        fail(&events, e.to_string());
                        return;
                    }
                }
                Some(Frame::Close { code, reason }) => {
                    debug!(code, %reason, "Closing WebSocket");
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    let _ = write.send(WsMessage::Close(Some(frame))).await;
                    return;
                }
                None => {
                    // Every sender dropped: the channel let go of this socket.
                    let _ = write.send(WsMessage::Close(None)).await;
                    return;
                }
            },

            message = read.next() => match message {
                Some(Ok(WsMessage::Text(text))) => {
                    if events.send(SocketEvent::Message(text.as_str().to_owned())).is_err() {
                        let _ = write.send(WsMessage::Close(None)).await;
                        return;
                    }
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    if let Err(e) = write.send(WsMessage::Pong(data)).await {
                        fail(&events, e.to_string());
                        return;
                    }
                }
                Some(Ok(WsMessage::Pong(_))) => {
                    debug!("Received pong");
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let info = match frame {
                        Some(frame) => CloseInfo::from_code(u16::from(frame.code), frame.reason.as_str()),
                        None => CloseInfo::from_code(1005, ""),
                    };
                    info!(code = info.code, reason = %info.reason, "Server closed WebSocket");
                    let _ = events.send(SocketEvent::Closed(info));
                    return;
                }
                Some(Ok(WsMessage::Binary(_))) => {
                    warn!("Ignoring binary WebSocket message");
                }
                Some(Ok(WsMessage::Frame(_))) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket read failed");
                    fail(&events, e.to_string());
                    return;
                }
                None => {
                    let _ = events.send(SocketEvent::Closed(CloseInfo::abnormal("Connection lost")));
                    return;
                }
            },

            _ = next_ping(&mut ping) => {
                if let Err(e) = write.send(WsMessage::Ping(Vec::new().into())).await {
                    fail(&events, e.to_string());
                    return;
                }
                debug!("Sent ping");
            }
        }
    }
}

async fn next_ping(ping: &mut Option<Interval>) {
    match ping {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
