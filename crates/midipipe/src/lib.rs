//! Bridge a platform MIDI service to raw MIDI byte pipes.
//!
//! midipipe turns the discrete, callback-driven messages of a MIDI service
//! into the plain MIDI wire stream on a pipe (and back), so that any program
//! reading or writing bytes can take part in MIDI routing.
//!
//! # Crate Structure
//!
//! - [`transport`]: Pipe ends and child descriptor wiring (unix)
//! - [`codec`]: Streaming wire decoder, batching and encoder
//! - [`bridge`]: MIDI service abstraction and the duplex bridge

/// Re-export transport types.
pub mod transport {
    pub use midipipe_transport::*;
}

/// Re-export codec types.
pub mod codec {
    pub use midipipe_codec::*;
}

/// Re-export bridge types.
pub mod bridge {
    pub use midipipe_bridge::*;
}
