use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use std::time::{Duration, Instant};

use log::{error, trace};

use crate::bound::{self, ConnectionType};
use crate::message::MessageType;
use crate::object::{Object, ObjectCore};
use crate::signal::Signal;

/// Single-shot timer.
///
/// The timer is started with [`start`] and emits the [`timeout`] signal once
/// when it expires. It can be stopped with [`stop`] and restarted at any
/// time, including from within its own timeout handler: [`is_running`] flips
/// to `false` before the signal is emitted.
///
/// A deadline at or before the current time expires on the next dispatcher
/// iteration of the timer's thread.
///
/// Timers run in the thread they belong to and must be started and stopped
/// from it; attempts from another thread are rejected and logged.
///
/// [`start`]: Timer::start
/// [`timeout`]: Timer::timeout
/// [`stop`]: Timer::stop
/// [`is_running`]: Timer::is_running
pub struct Timer {
    object: Object,
    inner: Arc<TimerInner>,
}

pub(crate) struct TimerInner {
    running: AtomicBool,
    /// Sequence number of the live dispatcher registration; entries recorded
    /// under an older number are stale and must not fire.
    active_seq: AtomicU64,
    deadline: Mutex<Option<Instant>>,
    timeout: Signal<()>,
    object: Weak<ObjectCore>,
}

impl Timer {
    /// Create a timer affine to the current thread.
    pub fn new() -> Timer {
        Timer::build(Object::new())
    }

    /// Create a timer owned by `parent`.
    pub fn with_parent(parent: &Object) -> Timer {
        Timer::build(Object::with_parent(parent))
    }

    fn build(object: Object) -> Timer {
        let inner = Arc::new(TimerInner {
            running: AtomicBool::new(false),
            active_seq: AtomicU64::new(0),
            deadline: Mutex::new(None),
            timeout: Signal::new(),
            object: Arc::downgrade(object.core()),
        });

        // A running timer follows its object across threads: drop the stale
        // registration and queue a re-registration, with the deadline
        // preserved, for the destination loop.
        let hook_inner = Arc::downgrade(&inner);
        let hook_core = Arc::downgrade(object.core());
        object.set_message_handler(move |msg| {
            if msg.message_type() != MessageType::ThreadMove {
                return;
            }
            let inner = match hook_inner.upgrade() {
                Some(inner) => inner,
                None => return,
            };
            if !inner.is_running() {
                return;
            }
            TimerInner::unregister(&inner);
            if let Some(core) = hook_core.upgrade() {
                let inner = Arc::downgrade(&inner);
                bound::activate(
                    &core,
                    ConnectionType::Queued,
                    Box::new(move || {
                        if let Some(inner) = inner.upgrade() {
                            TimerInner::register(&inner);
                        }
                    }),
                );
            }
        });

        let teardown_inner = Arc::downgrade(&inner);
        object.core().set_teardown_hook(Box::new(move || {
            if let Some(inner) = teardown_inner.upgrade() {
                if inner.is_running() {
                    TimerInner::unregister(&inner);
                }
            }
        }));

        Timer { object, inner }
    }

    /// Start or restart the timer to expire after `duration`.
    pub fn start(&self, duration: Duration) {
        self.start_at(Instant::now() + duration);
    }

    /// Start or restart the timer with an absolute `deadline`.
    ///
    /// If the timer is already running it is stopped and restarted.
    pub fn start_at(&self, deadline: Instant) {
        let object = match self.inner.object.upgrade() {
            Some(object) => object,
            None => return,
        };
        if !object.is_alive() {
            return;
        }
        if !object.thread().is_current() {
            error!("timers can only be started from their thread");
            return;
        }

        *self.inner.deadline.lock().unwrap() = Some(deadline);
        trace!("starting timer with deadline {:?}", deadline);

        if self.inner.is_running() {
            TimerInner::unregister(&self.inner);
        }
        TimerInner::register(&self.inner);
    }

    /// Stop the timer.
    ///
    /// After this function returns the timer is guaranteed not to emit
    /// [`timeout`]. If the timer is not running this is a no-op.
    ///
    /// [`timeout`]: Timer::timeout
    pub fn stop(&self) {
        if !self.inner.is_running() {
            return;
        }
        let object = match self.inner.object.upgrade() {
            Some(object) => object,
            None => return,
        };
        if !object.thread().is_current() {
            error!("timers can only be stopped from their thread");
            return;
        }

        TimerInner::unregister(&self.inner);
    }

    /// Check if the timer is running.
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Retrieve the deadline of the last start, if any.
    pub fn deadline(&self) -> Option<Instant> {
        *self.inner.deadline.lock().unwrap()
    }

    /// Signal emitted when the timer expires.
    pub fn timeout(&self) -> &Signal<()> {
        &self.inner.timeout
    }

    /// Move the timer to `target`. A running timer is transparently
    /// re-registered with the destination thread's dispatcher, with its
    /// deadline preserved.
    pub fn move_to_thread(&self, target: &crate::Thread) {
        self.object.move_to_thread(target);
    }

    /// Schedule destruction on the timer's thread.
    pub fn delete_later(self) {
        crate::object::delete_later(self);
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("running", &self.is_running())
            .field("deadline", &self.deadline())
            .finish()
    }
}

impl Default for Timer {
    fn default() -> Timer {
        Timer::new()
    }
}

impl AsRef<Object> for Timer {
    fn as_ref(&self) -> &Object {
        &self.object
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if self.inner.is_running() {
            TimerInner::unregister(&self.inner);
        }
    }
}

impl TimerInner {
    fn register(self: &Arc<Self>) {
        let object = match self.object.upgrade() {
            Some(object) => object,
            None => return,
        };
        if !object.is_alive() {
            return;
        }
        let thread = object.thread();
        let seq = thread.dispatcher().register_timer(self);
        if seq == 0 {
            return;
        }
        self.active_seq.store(seq, Ordering::Release);
        self.running.store(true, Ordering::Release);
    }

    fn unregister(self: &Arc<Self>) {
        self.running.store(false, Ordering::Release);
        self.active_seq.store(0, Ordering::Release);
        if let Some(object) = self.object.upgrade() {
            object.thread().dispatcher().unregister_timer(self);
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Flip `running` to `false`, reporting whether the timer was running.
    /// Done before the timeout emission so a handler may restart the timer.
    pub(crate) fn clear_running(&self) -> bool {
        self.running.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn active_seq(&self) -> u64 {
        self.active_seq.load(Ordering::Acquire)
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        *self.deadline.lock().unwrap()
    }

    pub(crate) fn object(&self) -> Option<Arc<ObjectCore>> {
        self.object.upgrade()
    }

    pub(crate) fn emit_timeout(&self) {
        self.timeout.emit(());
    }
}
