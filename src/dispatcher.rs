use std::collections::HashMap;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use log::{error, trace, warn};

use crate::notifier::{NotifierInner, NotifierType};
use crate::sys;
use crate::thread::ThreadData;
use crate::timer::TimerInner;

static NEXT_TIMER_SEQ: AtomicU64 = AtomicU64::new(1);

/// Per-thread reactor multiplexing descriptor readiness and timer expiry.
///
/// One dispatcher belongs to each [`Thread`]; started threads run it from
/// their event loop, the main thread's is driven by the application through
/// [`process_events`]. Event sources ([`EventNotifier`], [`Timer`]) register
/// with the dispatcher of the thread they belong to; registration from a
/// foreign thread is a caller bug.
///
/// [`Thread`]: crate::Thread
/// [`EventNotifier`]: crate::EventNotifier
/// [`Timer`]: crate::Timer
/// [`process_events`]: EventDispatcher::process_events
pub struct EventDispatcher {
    owner: Weak<ThreadData>,
    state: Mutex<State>,
    waker: sys::Waker,
    processing: AtomicBool,
}

struct State {
    /// At most one registered notifier per (fd, event type).
    notifiers: HashMap<RawFd, [Option<Weak<NotifierInner>>; 3]>,
    /// Sorted by deadline ascending, ties broken by registration order.
    timers: Vec<TimerEntry>,
}

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    timer: Weak<TimerInner>,
}

impl EventDispatcher {
    pub(crate) fn new(owner: Weak<ThreadData>) -> EventDispatcher {
        let waker = match sys::Waker::new() {
            Ok(waker) => waker,
            Err(err) => {
                error!("failed to create the dispatcher wakeup descriptor: {}", err);
                panic!("event dispatcher cannot function without a wakeup descriptor");
            }
        };

        EventDispatcher {
            owner,
            state: Mutex::new(State {
                notifiers: HashMap::new(),
                timers: Vec::new(),
            }),
            waker,
            processing: AtomicBool::new(false),
        }
    }

    /// Run one reactor iteration: block until at least one descriptor is
    /// ready, a timer expires or [`interrupt`] is called, then emit the
    /// signals of every expired timer and every ready, still-registered and
    /// still-enabled notifier.
    ///
    /// Expired timers fire before descriptor events, so a timeout guarding a
    /// conditional wait is observed even when both become ready together. A
    /// notifier disabled or unregistered by an earlier slot in the same
    /// iteration does not fire.
    ///
    /// [`interrupt`]: EventDispatcher::interrupt
    pub fn process_events(&self) {
        if !self.is_owner_current() {
            error!("process_events called from a thread that does not own the dispatcher");
            return;
        }
        if self.processing.swap(true, Ordering::AcqRel) {
            trace!("process_events entered recursively");
        }

        let (mut pollfds, timeout) = self.prepare_poll();

        match sys::poll(&mut pollfds, timeout) {
            Ok(_) => {
                self.process_timers();
                // Drained unconditionally so a subsequent poll does not
                // spuriously return.
                self.waker.drain();
                self.process_notifiers(&pollfds[1..]);
            }
            Err(err) => error!("poll failed: {}", err),
        }

        self.processing.store(false, Ordering::Release);
    }

    /// Unblock the dispatcher if it is parked in [`process_events`].
    /// Callable from any thread; redundant wakeups are drained in one pass.
    ///
    /// [`process_events`]: EventDispatcher::process_events
    pub fn interrupt(&self) {
        if let Err(err) = self.waker.wake() {
            warn!("failed to interrupt dispatcher: {}", err);
        }
    }

    /// Record `notifier` for its (fd, type) pair. A duplicate registration is
    /// logged and ignored.
    pub(crate) fn register_event_notifier(&self, notifier: &Arc<NotifierInner>) {
        debug_assert!(self.is_owner_current());

        let mut state = self.state.lock().unwrap();
        let slots = state.notifiers.entry(notifier.fd()).or_default();
        let slot = &mut slots[notifier.kind().index()];
        if slot.as_ref().and_then(Weak::upgrade).is_some() {
            error!(
                "a {:?} notifier is already registered for fd {}",
                notifier.kind(),
                notifier.fd()
            );
            return;
        }
        *slot = Some(Arc::downgrade(notifier));
    }

    /// Clear `notifier`'s (fd, type) slot. Safe to call from a slot handler
    /// while `process_events` is iterating; the removal takes effect for the
    /// current iteration.
    pub(crate) fn unregister_event_notifier(&self, notifier: &Arc<NotifierInner>) {
        let mut state = self.state.lock().unwrap();
        let Some(slots) = state.notifiers.get_mut(&notifier.fd()) else {
            return;
        };
        let slot = &mut slots[notifier.kind().index()];
        if let Some(weak) = slot {
            if std::ptr::eq(weak.as_ptr(), Arc::as_ptr(notifier)) {
                *slot = None;
            }
        }
        if slots.iter().all(Option::is_none) {
            state.notifiers.remove(&notifier.fd());
        }
    }

    /// Insert `timer` with its current deadline, keeping the timer list
    /// sorted by deadline ascending with ties broken by registration order.
    /// Returns the registration sequence number.
    pub(crate) fn register_timer(&self, timer: &Arc<TimerInner>) -> u64 {
        debug_assert!(self.is_owner_current());

        let deadline = match timer.deadline() {
            Some(deadline) => deadline,
            None => return 0,
        };
        let seq = NEXT_TIMER_SEQ.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock().unwrap();
        let pos = state
            .timers
            .iter()
            .position(|entry| (entry.deadline, entry.seq) > (deadline, seq))
            .unwrap_or(state.timers.len());
        state.timers.insert(
            pos,
            TimerEntry {
                deadline,
                seq,
                timer: Arc::downgrade(timer),
            },
        );
        seq
    }

    /// Remove every entry for `timer`.
    pub(crate) fn unregister_timer(&self, timer: &Arc<TimerInner>) {
        let mut state = self.state.lock().unwrap();
        state
            .timers
            .retain(|entry| !std::ptr::eq(entry.timer.as_ptr(), Arc::as_ptr(timer)));
    }

    /// Build the poll set: one entry for the wakeup descriptor, one per
    /// watched fd with the union of its watched events, and the timeout to
    /// the earliest timer deadline. Dead registrations are pruned.
    fn prepare_poll(&self) -> (Vec<sys::PollFd>, Option<Duration>) {
        let owner = self.owner.upgrade();
        let mut state = self.state.lock().unwrap();

        let mut pollfds = Vec::with_capacity(state.notifiers.len() + 1);
        pollfds.push(sys::PollFd::new(self.waker.as_raw_fd(), libc::POLLIN));

        state.notifiers.retain(|fd, slots| {
            let mut events = 0;
            for kind in NotifierType::ALL {
                let slot = &mut slots[kind.index()];
                if slot.is_none() {
                    continue;
                }
                // Prune registrations whose notifier is gone, torn down or
                // re-homed to another thread.
                let watched = slot
                    .as_ref()
                    .and_then(Weak::upgrade)
                    .and_then(|inner| inner.object())
                    .map_or(false, |object| {
                        object.is_alive()
                            && owner
                                .as_ref()
                                .map_or(false, |owner| Arc::ptr_eq(&object.thread(), owner))
                    });
                if watched {
                    events |= kind.poll_events();
                } else {
                    *slot = None;
                }
            }
            if events == 0 {
                return false;
            }
            pollfds.push(sys::PollFd::new(*fd, events));
            true
        });

        state
            .timers
            .retain(|entry| entry.timer.strong_count() > 0);
        let now = Instant::now();
        let timeout = state
            .timers
            .first()
            .map(|entry| entry.deadline.saturating_duration_since(now));

        (pollfds, timeout)
    }

    /// Fire every timer whose deadline has passed. The expired entries are
    /// detached from the canonical list before any signal is emitted, so a
    /// handler restarting its timer re-inserts it without re-firing in this
    /// iteration.
    fn process_timers(&self) {
        let now = Instant::now();
        let expired: Vec<TimerEntry> = {
            let mut state = self.state.lock().unwrap();
            let split = state
                .timers
                .iter()
                .position(|entry| entry.deadline > now)
                .unwrap_or(state.timers.len());
            state.timers.drain(..split).collect()
        };

        for entry in expired {
            let timer = match entry.timer.upgrade() {
                Some(timer) => timer,
                None => continue,
            };
            // Stop, restart or a thread move invalidates the sequence number
            // the entry was registered under.
            if timer.active_seq() != entry.seq {
                continue;
            }
            let object = match timer.object() {
                Some(object) => object,
                None => continue,
            };
            if !object.is_alive() || !self.owns(&object.thread()) {
                continue;
            }
            if !timer.clear_running() {
                continue;
            }
            timer.emit_timeout();
        }
    }

    /// Emit `activated` for every ready descriptor entry, in poll return
    /// order. The registration is fetched again per emission so removals and
    /// disables made by earlier slots in this iteration are honoured.
    fn process_notifiers(&self, pollfds: &[sys::PollFd]) {
        for pfd in pollfds {
            let revents = pfd.revents();
            if revents == 0 {
                continue;
            }

            for kind in NotifierType::ALL {
                if revents & kind.ready_events() == 0 {
                    continue;
                }

                let notifier = {
                    let state = self.state.lock().unwrap();
                    state
                        .notifiers
                        .get(&pfd.fd())
                        .and_then(|slots| slots[kind.index()].as_ref())
                        .and_then(Weak::upgrade)
                };
                let Some(notifier) = notifier else {
                    continue;
                };
                if notifier.kind() != kind || !notifier.is_enabled() {
                    continue;
                }
                let Some(object) = notifier.object() else {
                    continue;
                };
                if !object.is_alive() || !self.owns(&object.thread()) {
                    continue;
                }

                notifier.emit_activated();
            }
        }
    }

    fn is_owner_current(&self) -> bool {
        self.owner.upgrade().map_or(false, |data| data.is_current())
    }

    fn owns(&self, thread: &Arc<ThreadData>) -> bool {
        self.owner
            .upgrade()
            .map_or(false, |data| Arc::ptr_eq(thread, &data))
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("processing", &self.processing.load(Ordering::Acquire))
            .finish()
    }
}
