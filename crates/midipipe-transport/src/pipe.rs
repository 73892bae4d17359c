use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use tracing::debug;

use crate::error::{Result, TransportError};

/// The readable end of a byte conduit.
///
/// Owns its descriptor; dropping the end closes it, which is what lets the
/// writer on the other side observe a broken pipe (and the reader on the
/// other side of the paired [`WriteEnd`] observe end-of-stream).
pub struct ReadEnd {
    file: File,
}

/// The writable end of a byte conduit.
pub struct WriteEnd {
    file: File,
}

/// Create a pipe. Both ends are close-on-exec.
pub fn pipe() -> Result<(ReadEnd, WriteEnd)> {
    let fds = raw_pipe()?;

    // SAFETY: the pipe call succeeded, so both descriptors are open and owned by nobody else.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

    debug!(read_fd = fds[0], write_fd = fds[1], "created pipe");
    Ok((ReadEnd::from(read), WriteEnd::from(write)))
}

// pipe2 sets the flag atomically, so a concurrent fork elsewhere in the
// process cannot inherit the ends.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn raw_pipe() -> Result<[libc::c_int; 2]> {
    let mut fds: [libc::c_int; 2] = [-1, -1];
    // SAFETY: `fds` is a valid, writable two-element array as required by pipe2(2).
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if rc != 0 {
        return Err(TransportError::Pipe(io::Error::last_os_error()));
    }
    Ok(fds)
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn raw_pipe() -> Result<[libc::c_int; 2]> {
    let mut fds: [libc::c_int; 2] = [-1, -1];
    // SAFETY: `fds` is a valid, writable two-element array as required by pipe(2).
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(TransportError::Pipe(io::Error::last_os_error()));
    }
    for fd in fds {
        if let Err(err) = set_cloexec(fd, true) {
            // SAFETY: both descriptors were just created and are not shared yet.
            unsafe {
                libc::close(fds[0]);
                libc::close(fds[1]);
            }
            return Err(err);
        }
    }
    Ok(fds)
}

/// Set or clear `FD_CLOEXEC` on a descriptor.
pub(crate) fn set_cloexec(fd: RawFd, enabled: bool) -> Result<()> {
    set_cloexec_raw(fd, enabled).map_err(|source| TransportError::CloseOnExec { fd, source })
}

/// Allocation-free variant, usable between fork and exec.
pub(crate) fn set_cloexec_raw(fd: RawFd, enabled: bool) -> io::Result<()> {
    // SAFETY: fcntl(2) with F_GETFD/F_SETFD only reads and writes descriptor flags.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        let flags = if enabled {
            flags | libc::FD_CLOEXEC
        } else {
            flags & !libc::FD_CLOEXEC
        };
        if libc::fcntl(fd, libc::F_SETFD, flags) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Check that `fd` refers to an open descriptor.
fn check_open(fd: RawFd) -> Result<()> {
    // SAFETY: F_GETFD has no side effects.
    let rc = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if rc < 0 {
        return Err(TransportError::BadDescriptor {
            fd,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Duplicate `fd` onto the lowest free descriptor `>= min`, close-on-exec.
fn relocate(fd: &OwnedFd, min: RawFd) -> Result<OwnedFd> {
    let raw = fd.as_raw_fd();
    // SAFETY: F_DUPFD_CLOEXEC returns a new descriptor or -1; `raw` stays open
    // for the duration of the call because `fd` is borrowed.
    let moved = unsafe { libc::fcntl(raw, libc::F_DUPFD_CLOEXEC, min) };
    if moved < 0 {
        return Err(TransportError::Relocate {
            fd: raw,
            source: io::Error::last_os_error(),
        });
    }
    debug!(from = raw, to = moved, "relocated descriptor");
    // SAFETY: `moved` was just returned by fcntl and is owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(moved) })
}

/// Adopt one inherited descriptor for both directions, as for a socket.
///
/// The write side gets its own duplicate so each end closes independently.
///
/// # Safety
///
/// `fd` must not be owned by anything else in this process.
pub unsafe fn adopt_shared(fd: RawFd) -> Result<(ReadEnd, WriteEnd)> {
    let read = ReadEnd::adopt_raw(fd)?;
    let owned = read.into_owned();
    let dup = relocate(&owned, 0)?;
    Ok((ReadEnd::from(owned), WriteEnd::from(dup)))
}

macro_rules! pipe_end {
    ($name:ident) => {
        impl $name {
            /// Adopt a descriptor inherited from the parent process.
            ///
            /// # Safety
            ///
            /// `fd` must not be owned by anything else in this process; the
            /// returned end closes it on drop.
            pub unsafe fn adopt_raw(fd: RawFd) -> Result<Self> {
                check_open(fd)?;
                Ok(Self::from(OwnedFd::from_raw_fd(fd)))
            }

            /// Move this end to the lowest free descriptor `>= min`.
            pub fn relocate_above(self, min: RawFd) -> Result<Self> {
                let owned = OwnedFd::from(self.file);
                let moved = relocate(&owned, min)?;
                Ok(Self::from(moved))
            }

            /// Give up the typed wrapper and return the owned descriptor.
            pub fn into_owned(self) -> OwnedFd {
                OwnedFd::from(self.file)
            }
        }

        impl From<OwnedFd> for $name {
            fn from(fd: OwnedFd) -> Self {
                Self {
                    file: File::from(fd),
                }
            }
        }

        impl AsRawFd for $name {
            fn as_raw_fd(&self) -> RawFd {
                self.file.as_raw_fd()
            }
        }

        impl AsFd for $name {
            fn as_fd(&self) -> BorrowedFd<'_> {
                self.file.as_fd()
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("fd", &self.file.as_raw_fd())
                    .finish()
            }
        }
    };
}

pipe_end!(ReadEnd);
pipe_end!(WriteEnd);

impl Read for ReadEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for WriteEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloexec_set(fd: RawFd) -> bool {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        assert!(flags >= 0);
        flags & libc::FD_CLOEXEC != 0
    }

    #[test]
    fn pipe_carries_bytes_and_signals_eof() {
        let (mut read, mut write) = pipe().unwrap();

        write.write_all(&[0x90, 0x40, 0x7F]).unwrap();
        drop(write);

        let mut out = Vec::new();
        read.read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![0x90, 0x40, 0x7F]);
    }

    #[test]
    fn pipe_ends_are_close_on_exec() {
        let (read, write) = pipe().unwrap();
        assert!(cloexec_set(read.as_raw_fd()));
        assert!(cloexec_set(write.as_raw_fd()));
    }

    #[test]
    fn set_cloexec_can_clear_flag() {
        let (read, _write) = pipe().unwrap();
        set_cloexec(read.as_raw_fd(), false).unwrap();
        assert!(!cloexec_set(read.as_raw_fd()));
    }

    #[test]
    fn relocate_moves_above_minimum() {
        let (read, mut write) = pipe().unwrap();

        let mut moved = read.relocate_above(100).unwrap();
        assert!(moved.as_raw_fd() >= 100);
        assert!(cloexec_set(moved.as_raw_fd()));

        write.write_all(b"x").unwrap();
        let mut buf = [0u8; 1];
        moved.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"x");
    }

    #[test]
    fn adopt_rejects_invalid_descriptor() {
        let err = unsafe { ReadEnd::adopt_raw(-1) }.unwrap_err();
        assert!(matches!(err, TransportError::BadDescriptor { fd: -1, .. }));
    }

    #[test]
    fn adopt_shared_gives_independent_ends() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let raw_fd = std::os::fd::IntoRawFd::into_raw_fd(left);

        let (mut read, mut write) = unsafe { adopt_shared(raw_fd) }.unwrap();
        assert_ne!(read.as_raw_fd(), write.as_raw_fd());
        assert!(cloexec_set(write.as_raw_fd()));

        let mut right = right;
        write.write_all(&[0xF8]).unwrap();
        let mut buf = [0u8; 1];
        right.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0xF8]);

        drop(write);
        right.write_all(&[0xFE]).unwrap();
        read.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0xFE]);
    }

    #[test]
    fn adopt_takes_ownership_of_open_descriptor() {
        let (read, mut write) = pipe().unwrap();
        let raw = read.into_owned();
        let raw_fd = std::os::fd::IntoRawFd::into_raw_fd(raw);

        let mut adopted = unsafe { ReadEnd::adopt_raw(raw_fd) }.unwrap();
        write.write_all(b"ok").unwrap();
        drop(write);

        let mut out = String::new();
        adopted.read_to_string(&mut out).unwrap();
        assert_eq!(out, "ok");
    }
}
