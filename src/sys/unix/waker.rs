//! The self-wakeup descriptor used by the event dispatcher.
//!
//! Any thread may write to it to unblock a dispatcher parked in `poll(2)`;
//! only the dispatcher's own thread reads it. Backed by `eventfd(2)` where
//! the system provides it and by a pipe elsewhere.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

/// Waker backed by `eventfd`.
///
/// `eventfd` is effectively a 64 bit counter. All writes must be of 8 bytes
/// (64 bits) and are added to the count; reads reset the count to 0. A single
/// read therefore drains any number of accumulated wakeups.
#[cfg(any(target_os = "linux", target_os = "android"))]
#[derive(Debug)]
pub(crate) struct Waker {
    fd: File,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl Waker {
    pub(crate) fn new() -> io::Result<Waker> {
        let flags = libc::EFD_CLOEXEC | libc::EFD_NONBLOCK;
        let fd = syscall!(eventfd(0, flags))?;

        let file = unsafe { File::from_raw_fd(fd) };
        Ok(Waker { fd: file })
    }

    #[allow(clippy::unused_io_amount)] // Don't care about partial writes.
    pub(crate) fn wake(&self) -> io::Result<()> {
        let buf: [u8; 8] = 1u64.to_ne_bytes();
        match (&self.fd).write(&buf) {
            Ok(_) => Ok(()),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                // Writing only blocks if the counter is about to overflow.
                // Reset the counter to 0 and wake again.
                self.drain();
                self.wake()
            }
            Err(err) => Err(err),
        }
    }

    /// Empty the counter. Called by the owning thread once per dispatcher
    /// iteration, whether or not the waker descriptor polled ready.
    #[allow(clippy::unused_io_amount)] // Don't care about partial reads.
    pub(crate) fn drain(&self) {
        let mut buf: [u8; 8] = 0u64.to_ne_bytes();
        // If no wakeup is pending the read returns `WouldBlock`, which can
        // safely be ignored.
        let _ = (&self.fd).read(&mut buf);
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Waker backed by a unix pipe.
///
/// Controls both ends of the pipe and empties it if writing (waking) fails.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
#[derive(Debug)]
pub(crate) struct Waker {
    sender: File,
    receiver: File,
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
impl Waker {
    pub(crate) fn new() -> io::Result<Waker> {
        let mut fds = [-1; 2];
        syscall!(pipe(fds.as_mut_ptr()))?;

        // Put both ends into non-blocking, close-on-exec mode.
        for fd in &fds {
            let flags = syscall!(fcntl(*fd, libc::F_GETFL))?;
            syscall!(fcntl(*fd, libc::F_SETFL, flags | libc::O_NONBLOCK))?;
            let flags = syscall!(fcntl(*fd, libc::F_GETFD))?;
            syscall!(fcntl(*fd, libc::F_SETFD, flags | libc::FD_CLOEXEC))?;
        }

        let receiver = unsafe { File::from_raw_fd(fds[0]) };
        let sender = unsafe { File::from_raw_fd(fds[1]) };
        Ok(Waker { sender, receiver })
    }

    pub(crate) fn wake(&self) -> io::Result<()> {
        match (&self.sender).write(&[1]) {
            Ok(_) => Ok(()),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                // The reading end is full so we'll empty the buffer and try
                // again.
                self.drain();
                self.wake()
            }
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => self.wake(),
            Err(err) => Err(err),
        }
    }

    /// Empty the pipe's buffer. All accumulated wakeup bytes are read in one
    /// pass so a subsequent poll does not spuriously return.
    pub(crate) fn drain(&self) {
        let mut buf = [0; 4096];
        loop {
            match (&self.receiver).read(&mut buf) {
                Ok(n) if n > 0 => continue,
                _ => return,
            }
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.receiver.as_raw_fd()
    }
}
