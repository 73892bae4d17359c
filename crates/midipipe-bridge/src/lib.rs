//! Duplex MIDI bridge.
//!
//! Connects a structured MIDI service (discrete messages, callbacks,
//! batched sends) to a raw MIDI byte stream. The service is abstracted
//! behind [`MidiService`]; [`MidirService`] is the bundled backend.

pub mod bridge;
pub mod error;
#[cfg(feature = "midir")]
pub mod midir_service;
pub mod service;

pub use bridge::{BridgeConfig, Direction, DuplexBridge, Shutdown, StopHandle};
pub use error::{BridgeError, Result};
#[cfg(feature = "midir")]
pub use midir_service::{MidirInput, MidirOutput, MidirService, DEFAULT_POLL_INTERVAL};
pub use service::{
    Endpoint, EndpointKind, InputCallback, MidiService, Notification, NotificationCallback,
    Opened, Subscription,
};
