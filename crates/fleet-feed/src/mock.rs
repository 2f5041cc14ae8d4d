//! In-memory connector for driving the channel state machine in tests.

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::error::{FeedError, FeedResult};
use crate::transport::{Connector, Socket, SocketPeer};

/// A connection attempt waiting for the test to decide its outcome.
pub(crate) struct PendingDial {
    pub url: Url,
    reply: oneshot::Sender<FeedResult<Socket>>,
}

impl PendingDial {
    /// Opens the socket and returns the server side of it.
    pub fn accept(self) -> SocketPeer {
        let (socket, peer) = Socket::pair();
        let _ = self.reply.send(Ok(socket));
        peer
    }

    /// Fails the attempt.
    pub fn reject(self, reason: &str) {
        let _ = self
            .reply
            .send(Err(FeedError::ConnectionFailed(reason.to_string())));
    }
}

/// Connector that hands every attempt to the test as a [`PendingDial`].
pub(crate) struct MockConnector {
    dials: mpsc::UnboundedSender<PendingDial>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingDial>) {
        let (dials, rx) = mpsc::unbounded_channel();
        (MockConnector { dials }, rx)
    }
}

impl Connector for MockConnector {
    fn connect(&self, url: &Url) -> BoxFuture<'static, FeedResult<Socket>> {
        let (reply, outcome) = oneshot::channel();
        let _ = self.dials.send(PendingDial {
            url: url.clone(),
            reply,
        });
        Box::pin(async move {
            outcome
                .await
                .unwrap_or_else(|_| Err(FeedError::ConnectionFailed("dial dropped".into())))
        })
    }
}
