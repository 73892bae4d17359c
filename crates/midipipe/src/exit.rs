use std::fmt;

use midipipe_bridge::BridgeError;
use midipipe_codec::CodecError;
use midipipe_transport::TransportError;

// A bridge either ends cleanly or fails; there is no finer split.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(FAILURE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    CliError::failure(format!("{context}: {err}"))
}

pub fn bridge_error(err: BridgeError) -> CliError {
    match err {
        // Already names the failing service operation.
        BridgeError::Service { .. } => CliError::failure(err.to_string()),
        BridgeError::Codec(CodecError::Io(source)) => {
            CliError::failure(format!("byte stream I/O failed: {source}"))
        }
        BridgeError::Codec(CodecError::SinkClosed) => {
            CliError::failure("byte stream write failed: sink closed")
        }
        BridgeError::Codec(other) => CliError::failure(format!("MIDI delivery failed: {other}")),
        other => CliError::failure(format!("bridge failed: {other}")),
    }
}
