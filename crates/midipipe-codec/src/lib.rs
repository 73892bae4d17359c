//! MIDI wire codec for the byte side of the bridge.
//!
//! This is the core of midipipe. It converts between the raw MIDI byte
//! stream carried over a pipe and discrete messages:
//! - [`ByteStreamDecoder`] rebuilds messages from arbitrarily chunked input,
//!   keeping running status, real-time interleaving and sysex framing across
//!   calls
//! - [`MessageBatcher`] packs messages into bounded delivery batches
//! - [`MessageWriter`] writes messages back out in canonical form, blocking
//!   until every byte is accepted

pub mod batch;
pub mod decoder;
pub mod error;
pub mod message;
pub mod reader;
pub mod writer;

pub use batch::{
    Batch, BatchConfig, BatchSink, MessageBatcher, Packet, DEFAULT_BATCH_CAPACITY, IMMEDIATE,
    LIST_HEADER_SIZE, PACKET_HEADER_SIZE,
};
pub use decoder::{
    ByteStreamDecoder, DecoderConfig, DecoderState, Messages, DEFAULT_MAX_SYSEX_FRAGMENT,
};
pub use error::{CodecError, Result};
pub use message::{classify, Message, MessageKind, Status, SYSEX_END, SYSEX_START};
pub use reader::{MessageReader, DEFAULT_READ_CHUNK};
pub use writer::{encode, write_all, MessageWriter};
