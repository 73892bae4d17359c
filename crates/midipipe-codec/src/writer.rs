use std::io::{ErrorKind, Write};

use tracing::trace;

use crate::error::{CodecError, Result};
use crate::message::Message;

/// Canonical wire form of a message.
///
/// Messages already hold their wire bytes; running status is never applied
/// on output, so each message is written with its own status byte.
pub fn encode(message: &Message) -> &[u8] {
    message.as_bytes()
}

/// Write `bytes` completely, retrying short and interrupted writes.
///
/// A sink that accepts zero bytes is treated as closed.
pub fn write_all<W: Write + ?Sized>(sink: &mut W, bytes: &[u8]) -> Result<()> {
    let mut offset = 0usize;
    while offset < bytes.len() {
        match sink.write(&bytes[offset..]) {
            Ok(0) => return Err(CodecError::SinkClosed),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
            Err(err) => return Err(CodecError::Io(err)),
        }
    }
    Ok(())
}

/// Writes messages to any `Write` stream.
pub struct MessageWriter<W> {
    inner: W,
}

impl<W: Write> MessageWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one message (blocking until every byte is accepted).
    pub fn write_message(&mut self, message: &Message) -> Result<()> {
        trace!(len = message.len(), kind = ?message.kind(), "writing message");
        write_all(&mut self.inner, encode(message))?;
        self.flush()
    }

    /// Write several messages in order, flushing once at the end.
    pub fn write_messages<'a>(
        &mut self,
        messages: impl IntoIterator<Item = &'a Message>,
    ) -> Result<()> {
        for message in messages {
            write_all(&mut self.inner, encode(message))?;
        }
        self.flush()
    }

    /// Write bytes that did not come from the decoder, unchanged.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        write_all(&mut self.inner, bytes)?;
        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(CodecError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn writes_message_bytes_unchanged() {
        let mut writer = MessageWriter::new(Cursor::new(Vec::<u8>::new()));
        writer
            .write_message(&Message::from(vec![0x90, 0x40, 0x7F]))
            .unwrap();
        assert_eq!(writer.into_inner().into_inner(), vec![0x90, 0x40, 0x7F]);
    }

    #[test]
    fn consecutive_messages_keep_their_status_bytes() {
        let mut writer = MessageWriter::new(Cursor::new(Vec::<u8>::new()));
        let messages = [
            Message::from(vec![0x90, 0x40, 0x7F]),
            Message::from(vec![0x90, 0x41, 0x7F]),
            Message::single(0xF8),
        ];
        writer.write_messages(&messages).unwrap();
        assert_eq!(
            writer.into_inner().into_inner(),
            vec![0x90, 0x40, 0x7F, 0x90, 0x41, 0x7F, 0xF8]
        );
    }

    #[test]
    fn short_writes_are_completed() {
        let sink = ShortWriter {
            max: 5,
            calls: Vec::new(),
            data: Vec::new(),
        };
        let mut writer = MessageWriter::new(sink);
        let sysex = Message::from(vec![0xF0, 1, 2, 3, 4, 5, 6, 7, 8, 0xF7]);
        writer.write_message(&sysex).unwrap();

        let sink = writer.into_inner();
        assert_eq!(sink.calls, vec![10, 5]);
        assert_eq!(sink.data, sysex.as_bytes());
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = MessageWriter::new(sink);

        writer.write_message(&Message::single(0xFE)).unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn handles_interrupted_write_and_flush() {
        let sink = InterruptedWriteThenFlush {
            wrote_once: false,
            flush_interrupted: false,
            data: Vec::new(),
        };
        let mut writer = MessageWriter::new(sink);
        writer.write_raw(&[0xC0, 0x05]).unwrap();
        assert_eq!(writer.into_inner().data, vec![0xC0, 0x05]);
    }

    #[test]
    fn handles_would_block_write() {
        let sink = WouldBlockOnce {
            blocked: false,
            data: Vec::new(),
        };
        let mut writer = MessageWriter::new(sink);
        writer.write_raw(&[0xB0, 0x07, 0x64]).unwrap();
        assert_eq!(writer.into_inner().data, vec![0xB0, 0x07, 0x64]);
    }

    #[test]
    fn sink_closed_when_write_returns_zero() {
        let mut writer = MessageWriter::new(ZeroWriter);
        let err = writer.write_message(&Message::single(0xF8)).unwrap_err();
        assert!(matches!(err, CodecError::SinkClosed));
    }

    #[test]
    fn broken_pipe_is_io_error() {
        let mut writer = MessageWriter::new(BrokenWriter);
        let err = writer.write_message(&Message::single(0xF8)).unwrap_err();
        assert!(matches!(err, CodecError::Io(ref e) if e.kind() == ErrorKind::BrokenPipe));
    }

    #[test]
    fn accessors_and_into_inner() {
        let mut writer = MessageWriter::new(Cursor::new(Vec::<u8>::new()));
        let _ = writer.get_ref();
        let _ = writer.get_mut();
        let _inner = writer.into_inner();
    }

    struct ShortWriter {
        max: usize,
        calls: Vec<usize>,
        data: Vec<u8>,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.calls.push(buf.len());
            let n = buf.len().min(self.max);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct InterruptedWriteThenFlush {
        wrote_once: bool,
        flush_interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedWriteThenFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.wrote_once {
                self.wrote_once = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_interrupted {
                self.flush_interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            Ok(())
        }
    }

    struct WouldBlockOnce {
        blocked: bool,
        data: Vec<u8>,
    }

    impl Write for WouldBlockOnce {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.blocked {
                self.blocked = true;
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
