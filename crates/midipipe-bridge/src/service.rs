//! The structured side of the bridge.
//!
//! A [`MidiService`] is a platform MIDI system that hands out discrete
//! messages through callbacks and accepts them in batches. The bridge only
//! needs enumeration, one input connection, one output connection and
//! removal notifications.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use midipipe_codec::BatchSink;
use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// Produces messages (the bridge reads from it).
    Source,
    /// Consumes messages (the bridge writes to it).
    Destination,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => f.write_str("source"),
            Self::Destination => f.write_str("destination"),
        }
    }
}

/// A named source or destination exposed by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub index: usize,
    pub name: String,
    pub kind: EndpointKind,
}

/// Called with the bytes of each message received from the service.
pub type InputCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// Called when the service reports a change to a watched endpoint.
pub type NotificationCallback = Box<dyn FnMut(Notification) + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    EndpointRemoved(Endpoint),
}

/// A connection handle plus the endpoint it is attached to.
///
/// `endpoint` is `None` when the backend published a virtual endpoint of its
/// own instead of connecting to an existing one.
pub struct Opened<T> {
    pub handle: T,
    pub endpoint: Option<Endpoint>,
}

/// Shared cancellation flag for a notification subscription.
#[derive(Debug, Clone, Default)]
pub struct Subscription {
    cancelled: Arc<AtomicBool>,
}

impl Subscription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Operations the bridge consumes from a structured MIDI transport.
pub trait MidiService {
    /// Keeps the input connection open until dropped.
    type Input;
    /// Accepts batches from the byte-to-service worker thread.
    type Output: BatchSink + Send + 'static;

    /// Endpoints of one kind, in index order.
    fn endpoints(&self, kind: EndpointKind) -> Result<Vec<Endpoint>>;

    /// Start delivering messages from source `index` (or from a virtual
    /// destination when `None`) to `callback`.
    fn open_input(&self, index: Option<usize>, callback: InputCallback)
        -> Result<Opened<Self::Input>>;

    /// Open a batch sink to destination `index` (or a virtual source when `None`).
    fn open_output(&self, index: Option<usize>) -> Result<Opened<Self::Output>>;

    /// Report removal of any endpoint in `watched` to `notify`.
    ///
    /// Delivery stops once the returned subscription is cancelled.
    fn subscribe(
        &self,
        watched: Vec<Endpoint>,
        notify: NotificationCallback,
    ) -> Result<Subscription>;
}
