/// Errors that can occur while decoding, batching or encoding MIDI messages.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A single message does not fit into an empty delivery batch.
    #[error("message too large for a delivery batch ({size} bytes packed, capacity {capacity})")]
    MessageTooLarge { size: usize, capacity: usize },

    /// The structured-transport sink rejected a batch.
    #[error("batch delivery failed: {0}")]
    Delivery(String),

    /// An I/O error occurred on the byte side.
    #[error("codec I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The byte sink accepted zero bytes.
    #[error("byte sink closed")]
    SinkClosed,
}

impl CodecError {
    /// Wrap a structured-transport send failure.
    pub fn delivery(err: impl std::fmt::Display) -> Self {
        Self::Delivery(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;
