//! Discrete MIDI messages and status byte classification.
//!
//! Only what framing needs is interpreted here: how long a message started
//! by a given status byte is, and whether a byte belongs to the real-time
//! class that may interrupt anything.

use bytes::Bytes;

/// Opens a system-exclusive message.
pub const SYSEX_START: u8 = 0xF0;

/// Terminates a system-exclusive message.
pub const SYSEX_END: u8 = 0xF7;

/// First system real-time status byte (0xF8..=0xFF).
pub const REAL_TIME_START: u8 = 0xF8;

/// What a status byte starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// A message of fixed total length (status byte included).
    Fixed(usize),
    /// A system-exclusive message, terminated by [`SYSEX_END`].
    SysexStart,
    /// A single-byte real-time message that never touches running status.
    RealTime,
    /// 0xF4 / 0xF5: reserved, dropped without effect.
    Undefined,
}

/// Classify a status byte (high bit set).
pub fn classify(status: u8) -> Status {
    debug_assert!(status & 0x80 != 0, "not a status byte: {status:#04x}");
    match status {
        0x80..=0xBF | 0xE0..=0xEF => Status::Fixed(3),
        0xC0..=0xDF => Status::Fixed(2),
        SYSEX_START => Status::SysexStart,
        0xF1 | 0xF3 => Status::Fixed(2),
        0xF2 => Status::Fixed(3),
        0xF4 | 0xF5 => Status::Undefined,
        0xF6 | SYSEX_END => Status::Fixed(1),
        _ => Status::RealTime,
    }
}

/// Broad category of a decoded message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Channel,
    SystemCommon,
    SysEx,
    /// A sysex fragment that does not start with [`SYSEX_START`].
    SysExContinuation,
    RealTime,
}

/// A discrete MIDI message in canonical wire form.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Message {
    bytes: Bytes,
}

impl Message {
    /// Wrap bytes that already form one message.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Copy a message out of a borrowed slice.
    pub fn copy_from_slice(bytes: &[u8]) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(bytes),
        }
    }

    /// A one-byte message (real-time, tune request, stray EOX).
    pub fn single(status: u8) -> Self {
        Self::copy_from_slice(&[status])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Leading status byte, if the message has one.
    pub fn status(&self) -> Option<u8> {
        self.bytes.first().copied().filter(|b| b & 0x80 != 0)
    }

    pub fn kind(&self) -> MessageKind {
        match self.status() {
            None => MessageKind::SysExContinuation,
            Some(SYSEX_START) => MessageKind::SysEx,
            Some(0x80..=0xEF) => MessageKind::Channel,
            Some(b) if b >= REAL_TIME_START => MessageKind::RealTime,
            Some(_) if self.bytes.len() == 1 && self.bytes[0] == SYSEX_END => {
                MessageKind::SysExContinuation
            }
            Some(_) => MessageKind::SystemCommon,
        }
    }
}

impl AsRef<[u8]> for Message {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for Message {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&'static [u8]> for Message {
    fn from(bytes: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_message_lengths() {
        assert_eq!(classify(0x80), Status::Fixed(3));
        assert_eq!(classify(0x9F), Status::Fixed(3));
        assert_eq!(classify(0xA0), Status::Fixed(3));
        assert_eq!(classify(0xB5), Status::Fixed(3));
        assert_eq!(classify(0xC0), Status::Fixed(2));
        assert_eq!(classify(0xDF), Status::Fixed(2));
        assert_eq!(classify(0xE3), Status::Fixed(3));
    }

    #[test]
    fn system_common_lengths() {
        assert_eq!(classify(0xF0), Status::SysexStart);
        assert_eq!(classify(0xF1), Status::Fixed(2));
        assert_eq!(classify(0xF2), Status::Fixed(3));
        assert_eq!(classify(0xF3), Status::Fixed(2));
        assert_eq!(classify(0xF6), Status::Fixed(1));
        assert_eq!(classify(0xF7), Status::Fixed(1));
    }

    #[test]
    fn reserved_and_real_time() {
        assert_eq!(classify(0xF4), Status::Undefined);
        assert_eq!(classify(0xF5), Status::Undefined);
        for b in 0xF8..=0xFF {
            assert_eq!(classify(b), Status::RealTime);
        }
    }

    #[test]
    fn message_kinds() {
        assert_eq!(Message::from(vec![0x90, 0x40, 0x7F]).kind(), MessageKind::Channel);
        assert_eq!(Message::single(0xF8).kind(), MessageKind::RealTime);
        assert_eq!(Message::from(vec![0xF2, 0x00, 0x10]).kind(), MessageKind::SystemCommon);
        assert_eq!(Message::from(vec![0xF0, 0x7E, 0xF7]).kind(), MessageKind::SysEx);
        assert_eq!(Message::from(vec![0x01, 0x02]).kind(), MessageKind::SysExContinuation);
        assert_eq!(Message::single(0xF7).kind(), MessageKind::SysExContinuation);
    }

    #[test]
    fn status_is_none_for_data_bytes() {
        assert_eq!(Message::from(vec![0x01, 0xF7]).status(), None);
        assert_eq!(Message::from(vec![0xC3, 0x05]).status(), Some(0xC3));
    }
}
