use crate::service::EndpointKind;

/// Errors that can occur while running a bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Decoding, batching or writing MIDI bytes failed.
    #[error(transparent)]
    Codec(#[from] midipipe_codec::CodecError),

    /// A MIDI service call failed. `op` names the operation.
    #[error("{op} failed: {message}")]
    Service { op: &'static str, message: String },

    /// The requested endpoint index does not exist.
    #[error("no {kind} endpoint with index {index}")]
    NoSuchEndpoint { kind: EndpointKind, index: usize },

    /// The backend cannot publish its own endpoints on this platform.
    #[error("virtual {0} endpoints are not supported on this platform")]
    VirtualUnsupported(EndpointKind),

    /// Neither a byte source nor a byte sink was supplied.
    #[error("nothing to bridge: no byte source and no byte sink")]
    NothingToBridge,

    /// The worker thread could not be started.
    #[error("failed to start worker thread: {0}")]
    Worker(std::io::Error),
}

impl BridgeError {
    /// Wrap a backend failure for operation `op`.
    pub fn service(op: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Service {
            op,
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
