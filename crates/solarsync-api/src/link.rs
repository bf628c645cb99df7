// ── Duplex link abstraction ──
//
// A `Link` is one established session on the event channel: a typed
// outbound sender, a typed inbound receiver, and a cancellation token
// that tears the underlying transport down. The connection manager only
// ever sees `Link`s; how frames reach the wire is the connector's business.

use std::future::Future;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::wire::{ClientMessage, ServerEvent};

/// Opens sessions on the event channel.
///
/// Each call performs one connection attempt. Retry, backoff, and timeouts
/// belong to the caller; implementations must not retry internally.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = Result<Link, Error>> + Send;
}

/// The local end of an established session.
///
/// Dropping the link cancels its transport.
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    inbound: mpsc::UnboundedReceiver<ServerEvent>,
    cancel: CancellationToken,
}

impl Link {
    pub fn new(
        outbound: mpsc::UnboundedSender<ClientMessage>,
        inbound: mpsc::UnboundedReceiver<ServerEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            outbound,
            inbound,
            cancel,
        }
    }

    /// Create a link wired to an in-process [`RemoteEnd`].
    ///
    /// Used by tests and by hosts that feed events from another source.
    pub fn in_memory() -> (Self, RemoteEnd) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let remote = RemoteEnd {
            events: in_tx,
            messages: out_rx,
            cancel: cancel.clone(),
        };
        (Self::new(out_tx, in_rx, cancel), remote)
    }

    /// Queue a control message for the transport.
    pub fn send(&self, msg: ClientMessage) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::LinkClosed);
        }
        self.outbound.send(msg).map_err(|_| Error::LinkClosed)
    }

    /// Next inbound event. `None` once the transport has gone away.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            evt = self.inbound.recv() => evt,
        }
    }

    /// Tear the transport down.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The far side of an in-memory [`Link`].
#[derive(Debug)]
pub struct RemoteEnd {
    events: mpsc::UnboundedSender<ServerEvent>,
    messages: mpsc::UnboundedReceiver<ClientMessage>,
    cancel: CancellationToken,
}

impl RemoteEnd {
    /// Push an inbound event to the link. Returns `false` if the link is gone.
    pub fn push(&self, event: ServerEvent) -> bool {
        !self.cancel.is_cancelled() && self.events.send(event).is_ok()
    }

    /// Next control message the link sent, if one is queued.
    pub fn try_next_message(&mut self) -> Option<ClientMessage> {
        self.messages.try_recv().ok()
    }

    /// Wait for the next control message. `None` once the link is dropped
    /// and the queue is drained.
    pub async fn next_message(&mut self) -> Option<ClientMessage> {
        self.messages.recv().await
    }

    /// Drain every control message queued so far.
    pub fn drain_messages(&mut self) -> Vec<ClientMessage> {
        std::iter::from_fn(|| self.messages.try_recv().ok()).collect()
    }

    /// Whether the local end has torn the session down.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the local end has torn the session down.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }
}
