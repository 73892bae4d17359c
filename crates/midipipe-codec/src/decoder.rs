use bytes::{BufMut, BytesMut};
use tracing::trace;

use crate::message::{classify, Message, Status, SYSEX_END, SYSEX_START};

/// Default upper bound for one emitted sysex fragment.
pub const DEFAULT_MAX_SYSEX_FRAGMENT: usize = 1024;

/// Configuration for the byte stream decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DecoderConfig {
    /// A system-exclusive message longer than this is emitted in fragments
    /// of at most this many bytes. Default: 1024.
    pub max_sysex_fragment: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_sysex_fragment: DEFAULT_MAX_SYSEX_FRAGMENT,
        }
    }
}

/// Parser state carried from one chunk to the next.
///
/// Invariants: `accumulated <= expected_len()` whenever a length is known,
/// and while `in_sysex` is set there is no running status (`pending_status`
/// is 0 and nothing is accumulated). [`ByteStreamDecoder::from_state`]
/// restores these on snapshots that break them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DecoderState {
    /// Running-status register; 0 when no status has been seen.
    pub pending_status: u8,
    /// Bytes of the in-progress fixed-length message.
    pub accumulator: [u8; 3],
    /// How many bytes of `accumulator` are filled.
    pub accumulated: usize,
    /// A system-exclusive message is open.
    pub in_sysex: bool,
    /// Sysex bytes collected since the last emitted fragment.
    pub sysex: BytesMut,
}

impl DecoderState {
    /// Total length of messages started by the running status.
    pub fn expected_len(&self) -> Option<usize> {
        if self.pending_status & 0x80 == 0 {
            return None;
        }
        match classify(self.pending_status) {
            Status::Fixed(len) => Some(len),
            _ => None,
        }
    }

    /// Bytes collected for the in-progress message.
    pub fn accumulator(&self) -> &[u8] {
        &self.accumulator[..self.accumulated.min(self.accumulator.len())]
    }

    /// Bring an arbitrary snapshot back within the invariants.
    fn normalize(&mut self) {
        if self.in_sysex || self.expected_len().is_none() {
            self.pending_status = 0;
            self.accumulated = 0;
        }
        if !self.in_sysex {
            self.sysex.clear();
        }
        if let Some(len) = self.expected_len() {
            self.accumulated = self.accumulated.clamp(1, len);
            self.accumulator[0] = self.pending_status;
        }
    }

    /// True when input ended in the middle of a message.
    pub fn has_partial(&self) -> bool {
        if self.in_sysex {
            return !self.sysex.is_empty();
        }
        match self.expected_len() {
            Some(len) => self.accumulated > 0 && self.accumulated < len,
            None => false,
        }
    }
}

/// Up to two messages produced by a single input byte.
///
/// Two only happens when a status byte implicitly closes an open sysex and
/// is itself a complete one-byte message.
enum Emit {
    Nothing,
    One(Message),
    Two(Message, Message),
}

/// Streaming decoder from a raw MIDI byte stream to discrete messages.
///
/// Input may be split at any byte boundary: feeding a stream in one call or
/// in many yields the same messages in the same order.
#[derive(Debug, Clone, Default)]
pub struct ByteStreamDecoder {
    state: DecoderState,
    config: DecoderConfig,
}

impl ByteStreamDecoder {
    /// Create a decoder with default configuration.
    pub fn new() -> Self {
        Self::with_config(DecoderConfig::default())
    }

    /// Create a decoder with explicit configuration.
    pub fn with_config(config: DecoderConfig) -> Self {
        Self::from_state(DecoderState::default(), config)
    }

    /// Resume decoding from a state snapshot.
    ///
    /// An inconsistent snapshot is normalized: a running status that is not
    /// a fixed-length status byte is dropped, and the accumulator is clamped
    /// to the status byte's message length.
    pub fn from_state(mut state: DecoderState, config: DecoderConfig) -> Self {
        let config = DecoderConfig {
            max_sysex_fragment: config.max_sysex_fragment.max(1),
        };
        state.normalize();
        Self { state, config }
    }

    /// Current parser state.
    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    /// Consume the decoder and return its state.
    pub fn into_state(self) -> DecoderState {
        self.state
    }

    /// Forget all state, as when the stream is reopened.
    pub fn reset(&mut self) {
        self.state = DecoderState::default();
    }

    /// Decode one chunk lazily.
    ///
    /// The returned iterator consumes the chunk as it is advanced; drain it
    /// before feeding the next chunk.
    pub fn feed<'a>(&'a mut self, chunk: &'a [u8]) -> Messages<'a> {
        Messages {
            decoder: self,
            chunk,
            pos: 0,
            deferred: None,
        }
    }

    /// Decode one chunk and collect every completed message.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Message> {
        self.feed(chunk).collect()
    }

    fn push(&mut self, byte: u8) -> Emit {
        if byte & 0x80 == 0 {
            return self.push_data(byte);
        }

        match classify(byte) {
            Status::RealTime => Emit::One(Message::single(byte)),
            Status::Undefined => {
                trace!(byte, "skipping undefined status byte");
                // Ends an open sysex like any other non-real-time status.
                self.close_sysex().map_or(Emit::Nothing, Emit::One)
            }
            _ if self.state.in_sysex && byte == SYSEX_END => {
                self.state.sysex.put_u8(byte);
                self.state.in_sysex = false;
                Emit::One(self.take_sysex())
            }
            status => {
                let closed = self.close_sysex();
                let started = self.start(byte, status);
                match (closed, started) {
                    (Some(sysex), Some(message)) => Emit::Two(sysex, message),
                    (Some(message), None) | (None, Some(message)) => Emit::One(message),
                    (None, None) => Emit::Nothing,
                }
            }
        }
    }

    fn push_data(&mut self, byte: u8) -> Emit {
        let state = &mut self.state;
        if state.in_sysex {
            state.sysex.put_u8(byte);
            if state.sysex.len() >= self.config.max_sysex_fragment {
                return Emit::One(self.take_sysex());
            }
            return Emit::Nothing;
        }

        let Some(len) = state.expected_len() else {
            // No status byte yet: stream prefix or data after a sysex.
            return Emit::Nothing;
        };

        if state.accumulated == len {
            if len == 1 {
                return Emit::Nothing;
            }
            // Running status: the previous message is complete, start a new
            // one with the implied status byte.
            state.accumulator[0] = state.pending_status;
            state.accumulated = 1;
        }

        state.accumulator[state.accumulated] = byte;
        state.accumulated += 1;

        if state.accumulated == len {
            return Emit::One(Message::copy_from_slice(state.accumulator()));
        }
        Emit::Nothing
    }

    fn start(&mut self, byte: u8, status: Status) -> Option<Message> {
        let state = &mut self.state;
        match status {
            Status::SysexStart => {
                state.pending_status = 0;
                state.accumulated = 0;
                state.in_sysex = true;
                state.sysex.clear();
                state.sysex.put_u8(SYSEX_START);
                None
            }
            Status::Fixed(len) => {
                state.pending_status = byte;
                state.accumulator[0] = byte;
                state.accumulated = 1;
                (len == 1).then(|| Message::single(byte))
            }
            Status::RealTime | Status::Undefined => None,
        }
    }

    /// A new status byte ends an unterminated sysex.
    fn close_sysex(&mut self) -> Option<Message> {
        if !self.state.in_sysex {
            return None;
        }
        self.state.in_sysex = false;
        if self.state.sysex.is_empty() {
            return None;
        }
        trace!(
            len = self.state.sysex.len(),
            "sysex closed by status byte without terminator"
        );
        Some(self.take_sysex())
    }

    fn take_sysex(&mut self) -> Message {
        Message::new(self.state.sysex.split().freeze())
    }
}

/// Messages decoded from one chunk, produced as the iterator advances.
pub struct Messages<'a> {
    decoder: &'a mut ByteStreamDecoder,
    chunk: &'a [u8],
    pos: usize,
    deferred: Option<Message>,
}

impl Iterator for Messages<'_> {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        if let Some(message) = self.deferred.take() {
            return Some(message);
        }
        while let Some(&byte) = self.chunk.get(self.pos) {
            self.pos += 1;
            match self.decoder.push(byte) {
                Emit::Nothing => continue,
                Emit::One(message) => return Some(message),
                Emit::Two(first, second) => {
                    self.deferred = Some(second);
                    return Some(first);
                }
            }
        }
        None
    }
}
