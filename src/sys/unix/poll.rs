use std::fmt::{self, Debug, Formatter};
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};
use std::{convert::TryInto, io};

/// Transparent wrapper around `libc::pollfd`, used to support `Debug` derives
/// without adding the `extra_traits` feature of `libc`.
#[repr(transparent)]
#[derive(Clone)]
pub(crate) struct PollFd(libc::pollfd);

impl PollFd {
    pub(crate) fn new(fd: RawFd, events: libc::c_short) -> PollFd {
        PollFd(libc::pollfd {
            fd,
            events,
            revents: 0,
        })
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.0.fd
    }

    pub(crate) fn revents(&self) -> libc::c_short {
        self.0.revents
    }
}

impl Debug for PollFd {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("pollfd")
            .field("fd", &self.0.fd)
            .field("events", &self.0.events)
            .field("revents", &self.0.revents)
            .finish()
    }
}

/// Block on `poll(2)` until at least one descriptor is ready or the timeout
/// expires. `None` means wait forever.
///
/// A wakeup by a signal restarts the call with the timeout recomputed against
/// the original deadline, so callers observe either readiness or expiry.
pub(crate) fn poll(fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize> {
    let deadline = timeout.map(|timeout| Instant::now() + timeout);

    loop {
        // Convert the timeout to milliseconds, rounding up to a whole
        // millisecond so a short wait does not turn into a busy loop.
        let timeout_ms = deadline
            .map(|deadline| {
                let timeout = deadline.saturating_duration_since(Instant::now());

                let mut ms: u64 = timeout.as_millis().try_into().unwrap_or(u64::MAX);
                if Duration::from_millis(ms) < timeout {
                    ms = ms.saturating_add(1);
                }
                ms.try_into().unwrap_or(i32::MAX)
            })
            .unwrap_or(-1);

        let res = syscall!(poll(
            fds.as_mut_ptr() as *mut libc::pollfd,
            fds.len() as libc::nfds_t,
            timeout_ms,
        ));

        match res {
            Ok(num_events) => break Ok(num_events as usize),
            Err(ref e)
                if e.raw_os_error() == Some(libc::EINTR)
                    || e.raw_os_error() == Some(libc::EAGAIN) =>
            {
                if deadline.map_or(false, |deadline| deadline <= Instant::now()) {
                    break Ok(0);
                }
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}
