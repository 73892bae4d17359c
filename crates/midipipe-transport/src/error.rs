use std::os::raw::c_int;

/// Errors that can occur while setting up or using byte-side descriptors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// `pipe(2)` failed.
    #[error("failed to create pipe: {0}")]
    Pipe(std::io::Error),

    /// Updating the close-on-exec flag of a descriptor failed.
    #[error("failed to update FD_CLOEXEC on descriptor {fd}: {source}")]
    CloseOnExec { fd: c_int, source: std::io::Error },

    /// An inherited descriptor number does not refer to an open descriptor.
    #[error("descriptor {fd} is not open: {source}")]
    BadDescriptor { fd: c_int, source: std::io::Error },

    /// Moving a pipe end out of the way of a child slot failed.
    #[error("failed to relocate descriptor {fd}: {source}")]
    Relocate { fd: c_int, source: std::io::Error },

    /// Both child slots name the same descriptor number.
    #[error("child input and output slots both use descriptor {0}")]
    SlotConflict(c_int),

    /// Neither direction was requested for the child.
    #[error("no byte direction requested for the child")]
    NoDirection,

    /// Spawning the child process failed.
    #[error("{program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// An I/O error occurred on a pipe end.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
