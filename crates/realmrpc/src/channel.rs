//! # In-process duplex channel
//!
//! Two connected endpoints over tokio mpsc channels. Each `post` performs a
//! structured clone, so the receiving realm never shares a live buffer with
//! the sender.
//!
//! Every endpoint also exposes an [`Inbox`]: a posting handle that anyone can
//! use to drop a message into that endpoint's queue under their own origin,
//! the way any frame can post to a window. This is how foreign traffic reaches
//! a realm, and why receivers check `Envelope::source`.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::trace;

use crate::buffer::Transferable;
use crate::clone::structured_clone;
use crate::message::Message;
use crate::transport;
use crate::transport::Envelope;
use crate::transport::Origin;
use crate::transport::Transport;

/// Channel behaviour shared by both endpoints of a pair.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Accept transfer lists. When false, every payload is copied.
    pub transfer: bool,
    /// Upper bound on bytes copied (not transferred) per message.
    pub max_clone_bytes: Option<usize>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { transfer: true, max_clone_bytes: None }
    }
}

/// One end of an in-process duplex channel.
pub struct DuplexChannel {
    origin: Origin,
    peer_origin: Origin,
    config: ChannelConfig,
    tx: mpsc::UnboundedSender<Envelope>,
    own_tx: mpsc::WeakUnboundedSender<Envelope>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Envelope>>>,
}

impl DuplexChannel {
    /// Creates a pair of endpoints connected to each other.
    ///
    /// Messages posted on `a` are received by `b` and vice versa.
    pub fn pair() -> (Self, Self) {
        Self::pair_with(ChannelConfig::default())
    }

    pub fn pair_with(config: ChannelConfig) -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let origin_a = Origin::fresh();
        let origin_b = Origin::fresh();

        let a = Self {
            origin: origin_a,
            peer_origin: origin_b,
            config: config.clone(),
            own_tx: tx_a.downgrade(),
            tx: tx_b,
            rx: Arc::new(Mutex::new(rx_a)),
        };

        let b = Self {
            origin: origin_b,
            peer_origin: origin_a,
            config,
            own_tx: a.tx.downgrade(),
            tx: tx_a,
            rx: Arc::new(Mutex::new(rx_b)),
        };

        (a, b)
    }

    /// A handle for posting into this endpoint's own queue.
    pub fn inbox(&self) -> Inbox {
        Inbox { tx: self.own_tx.clone(), config: self.config.clone() }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn deliver(
        tx: &mpsc::UnboundedSender<Envelope>,
        config: &ChannelConfig,
        source: Origin,
        message: Message,
        transfer: Vec<Transferable>,
    ) -> transport::Result<()> {
        if !config.transfer && !transfer.is_empty() {
            return Err(transport::Error::TransferUnsupported);
        }
        if tx.is_closed() {
            return Err(transport::Error::ConnectionLost("Channel closed".into()));
        }
        let kind = message.msg_type();
        let message = structured_clone(message, &transfer, config.max_clone_bytes).inspect_err(|e| {
            debug!(source = %source, kind = %kind, error = %e, "message could not be cloned");
        })?;
        trace!(source = %source, kind = %kind, transferred = transfer.len(), "delivering message");
        tx.send(Envelope { source, message })
            .map_err(|_| transport::Error::ConnectionLost("Channel closed".into()))
    }
}

#[async_trait::async_trait]
impl Transport for DuplexChannel {
    fn origin(&self) -> Origin {
        self.origin
    }

    fn peer_origin(&self) -> Origin {
        self.peer_origin
    }

    fn supports_transfer(&self) -> bool {
        self.config.transfer
    }

    async fn post(&self, message: Message, transfer: Vec<Transferable>) -> transport::Result<()> {
        Self::deliver(&self.tx, &self.config, self.origin, message, transfer)
    }

    async fn recv(&self) -> transport::Result<Option<Envelope>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}

/// Posts into a specific endpoint's queue under an arbitrary origin.
#[derive(Clone)]
pub struct Inbox {
    tx: mpsc::WeakUnboundedSender<Envelope>,
    config: ChannelConfig,
}

impl Inbox {
    pub fn post_from(
        &self,
        source: Origin,
        message: Message,
        transfer: Vec<Transferable>,
    ) -> transport::Result<()> {
        let tx = self
            .tx
            .upgrade()
            .ok_or_else(|| transport::Error::ConnectionLost("Endpoint dropped".into()))?;
        DuplexChannel::deliver(&tx, &self.config, source, message, transfer)
    }
}
