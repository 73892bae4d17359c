use std::io::{ErrorKind, Read};

use tracing::debug;

use crate::decoder::{ByteStreamDecoder, DecoderConfig};
use crate::error::{CodecError, Result};
use crate::message::Message;

/// Bytes requested from the source per read.
pub const DEFAULT_READ_CHUNK: usize = 1024;

/// Reads raw MIDI bytes from any `Read` stream and decodes them.
///
/// Partial messages are carried between reads; callers get whatever
/// complete messages each read produced.
pub struct MessageReader<R> {
    inner: R,
    decoder: ByteStreamDecoder,
    chunk: Vec<u8>,
}

impl<R: Read> MessageReader<R> {
    /// Create a new message reader with default configuration.
    pub fn new(inner: R) -> Self {
        Self::with_config(inner, DEFAULT_READ_CHUNK, DecoderConfig::default())
    }

    /// Create a new message reader with explicit chunk size and decoder configuration.
    pub fn with_config(inner: R, chunk_size: usize, config: DecoderConfig) -> Self {
        Self {
            inner,
            decoder: ByteStreamDecoder::with_config(config),
            chunk: vec![0u8; chunk_size.max(1)],
        }
    }

    /// Read one chunk (blocking) and return the messages it completed.
    ///
    /// The returned list may be empty when the chunk only extended a partial
    /// message. Returns `Ok(None)` at end of stream; an incomplete trailing
    /// message is discarded.
    pub fn read_messages(&mut self) -> Result<Option<Vec<Message>>> {
        loop {
            let read = match self.inner.read(&mut self.chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(CodecError::Io(err)),
            };

            if read == 0 {
                if self.decoder.state().has_partial() {
                    debug!(
                        state = ?self.decoder.state(),
                        "end of stream inside a message, discarding partial"
                    );
                }
                return Ok(None);
            }

            return Ok(Some(self.decoder.decode(&self.chunk[..read])));
        }
    }

    /// Borrow the decoder.
    pub fn decoder(&self) -> &ByteStreamDecoder {
        &self.decoder
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> R {
        self.inner
    }
}
