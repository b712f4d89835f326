#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use self::unix::{poll, PollFd, Waker};

#[cfg(not(unix))]
compile_error!("evio only supports Unix targets with poll(2)");
