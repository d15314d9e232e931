//! # Transport Abstraction
//!
//! A minimal, async interface for moving messages between realms.
//!
//! ## Philosophy
//!
//! - **Message-Oriented**: The Transport moves whole `Message`s plus a transfer
//!   list. It knows nothing about calls, registries or correlation.
//! - **Fire-and-Forget**: `post` returns once the message is queued for the
//!   peer. Request/response pairing is built on top, not defined here.
//! - **Stamped Sources**: Every delivered envelope names the origin that posted
//!   it, so receivers can discard traffic that did not come from their peer.

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::buffer::Transferable;
use crate::clone;
use crate::message::Message;

/// Identity of a message source.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct Origin(pub u64);

static NEXT_ORIGIN: AtomicU64 = AtomicU64::new(1);

impl Origin {
    /// Allocates an origin that no other endpoint in this process uses.
    pub fn fresh() -> Self {
        Self(NEXT_ORIGIN.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "origin-{}", self.0)
    }
}

/// A delivered message and the origin that posted it.
#[derive(Debug)]
pub struct Envelope {
    pub source: Origin,
    pub message: Message,
}

/// Errors that occur while posting or receiving.
#[derive(Debug, Clone)]
pub enum Error {
    /// The peer endpoint is gone.
    ConnectionLost(String),
    /// The message could not be cloned as constructed.
    DataClone(clone::Error),
    /// A transfer list was supplied to a transport that only copies.
    TransferUnsupported,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::DataClone(e) => write!(f, "Data clone error: {}", e),
            Self::TransferUnsupported => write!(f, "Transport does not support transfer lists"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DataClone(e) => Some(e),
            _ => None,
        }
    }
}

impl From<clone::Error> for Error {
    fn from(e: clone::Error) -> Self {
        Self::DataClone(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// One end of a realm-to-realm message channel.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The origin stamped on everything this end posts.
    fn origin(&self) -> Origin;

    /// The origin of the intended peer; anything else is foreign.
    fn peer_origin(&self) -> Origin;

    /// Whether `post` accepts a non-empty transfer list.
    fn supports_transfer(&self) -> bool {
        true
    }

    /// Clones `message` into the peer realm, moving everything in `transfer`.
    ///
    /// # invariants
    /// - On `Err`, nothing in `transfer` has been detached.
    /// - Messages posted from one end arrive in posting order.
    async fn post(&self, message: Message, transfer: Vec<Transferable>) -> Result<()>;

    /// Waits for the next delivered envelope. `Ok(None)` means the channel closed.
    async fn recv(&self) -> Result<Option<Envelope>>;
}
