//! Bounded delivery batches for the structured side.
//!
//! Messages are packed into a batch until the next one would overflow its
//! capacity; the batch is then handed to a [`BatchSink`] and a fresh one is
//! started. Packed size mirrors a packet-list layout: a fixed list header
//! plus, per message, a fixed packet header and the message bytes.

use tracing::trace;

use crate::error::{CodecError, Result};
use crate::message::Message;

/// Packed size of an empty batch.
pub const LIST_HEADER_SIZE: usize = 4;

/// Per-message overhead inside a batch (timestamp + length).
pub const PACKET_HEADER_SIZE: usize = 10;

/// Default packed capacity of one batch.
pub const DEFAULT_BATCH_CAPACITY: usize = 2048;

/// Timestamp meaning "deliver now".
pub const IMMEDIATE: u64 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Upper bound on the packed size of one batch. Default: 2048.
    pub capacity: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BATCH_CAPACITY,
        }
    }
}

impl BatchConfig {
    /// Longest message that fits in an empty batch.
    pub fn max_message_len(&self) -> usize {
        self.capacity.saturating_sub(LIST_HEADER_SIZE + PACKET_HEADER_SIZE)
    }
}

/// One timestamped message in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub timestamp: u64,
    pub message: Message,
}

impl Packet {
    /// Bytes this packet occupies once packed.
    pub fn packed_size(&self) -> usize {
        PACKET_HEADER_SIZE + self.message.len()
    }
}

/// An ordered group of packets delivered together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    packets: Vec<Packet>,
    packed_len: usize,
    capacity: usize,
}

impl Batch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            packets: Vec::new(),
            packed_len: LIST_HEADER_SIZE,
            capacity,
        }
    }

    /// Whether `message` can be added without exceeding capacity.
    pub fn fits(&self, message: &Message) -> bool {
        self.packed_len + PACKET_HEADER_SIZE + message.len() <= self.capacity
    }

    /// Append a message. The caller checks [`Batch::fits`] first.
    pub fn push(&mut self, timestamp: u64, message: Message) {
        let packet = Packet { timestamp, message };
        self.packed_len += packet.packed_size();
        self.packets.push(packet);
    }

    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    /// Message bytes in order, without timestamps.
    pub fn messages(&self) -> impl Iterator<Item = &Message> + '_ {
        self.packets.iter().map(|p| &p.message)
    }

    pub fn packed_size(&self) -> usize {
        self.packed_len
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    fn clear(&mut self) {
        self.packets.clear();
        self.packed_len = LIST_HEADER_SIZE;
    }
}

/// Receiver of completed batches, typically a MIDI service output port.
pub trait BatchSink {
    fn send_batch(&mut self, batch: &Batch) -> Result<()>;
}

impl<S: BatchSink + ?Sized> BatchSink for &mut S {
    fn send_batch(&mut self, batch: &Batch) -> Result<()> {
        (**self).send_batch(batch)
    }
}

impl<S: BatchSink + ?Sized> BatchSink for Box<S> {
    fn send_batch(&mut self, batch: &Batch) -> Result<()> {
        (**self).send_batch(batch)
    }
}

/// Accumulates messages and flushes full batches to a sink.
pub struct MessageBatcher<S> {
    sink: S,
    batch: Batch,
}

impl<S: BatchSink> MessageBatcher<S> {
    pub fn new(sink: S) -> Self {
        Self::with_config(sink, BatchConfig::default())
    }

    pub fn with_config(sink: S, config: BatchConfig) -> Self {
        Self {
            sink,
            batch: Batch::with_capacity(config.capacity),
        }
    }

    /// Add a message for immediate delivery.
    ///
    /// If it does not fit, the pending batch is sent first. A message that
    /// would not fit even into an empty batch is rejected.
    pub fn append(&mut self, message: Message) -> Result<()> {
        let size = LIST_HEADER_SIZE + PACKET_HEADER_SIZE + message.len();
        if size > self.batch.capacity() {
            return Err(CodecError::MessageTooLarge {
                size,
                capacity: self.batch.capacity(),
            });
        }
        if !self.batch.fits(&message) {
            self.flush()?;
        }
        self.batch.push(IMMEDIATE, message);
        Ok(())
    }

    /// Send the pending batch, if it holds anything.
    pub fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        trace!(
            packets = self.batch.len(),
            packed = self.batch.packed_size(),
            "sending batch"
        );
        let sent = self.sink.send_batch(&self.batch);
        self.batch.clear();
        sent
    }

    /// Flush and return the sink.
    pub fn finish(mut self) -> Result<S> {
        self.flush()?;
        Ok(self.sink)
    }

    /// Messages waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}
