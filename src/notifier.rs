use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use log::error;

use crate::bound::{self, ConnectionType};
use crate::message::MessageType;
use crate::object::{Object, ObjectCore};
use crate::signal::Signal;

/// Type of file descriptor event to listen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierType {
    /// Data is available to be read from the file descriptor.
    Read,
    /// Data can be written to the file descriptor.
    Write,
    /// An exceptional condition occurred on the file descriptor.
    Exception,
}

impl NotifierType {
    pub(crate) const ALL: [NotifierType; 3] =
        [NotifierType::Read, NotifierType::Write, NotifierType::Exception];

    pub(crate) fn index(self) -> usize {
        match self {
            NotifierType::Read => 0,
            NotifierType::Write => 1,
            NotifierType::Exception => 2,
        }
    }

    /// Events requested from `poll(2)`.
    pub(crate) fn poll_events(self) -> libc::c_short {
        match self {
            NotifierType::Read => libc::POLLIN,
            NotifierType::Write => libc::POLLOUT,
            NotifierType::Exception => libc::POLLPRI,
        }
    }

    /// Returned events that activate a notifier of this type. Hangup and
    /// error conditions are reported through read and write readiness so a
    /// closed peer does not spin the poll loop unobserved.
    pub(crate) fn ready_events(self) -> libc::c_short {
        match self {
            NotifierType::Read => libc::POLLIN | libc::POLLHUP | libc::POLLERR,
            NotifierType::Write => libc::POLLOUT | libc::POLLERR,
            NotifierType::Exception => libc::POLLPRI,
        }
    }
}

/// Notify of activity on a file descriptor.
///
/// The notifier is created with the file descriptor to monitor and the type
/// of event, and is enabled by default. While enabled it emits the
/// [`activated`] signal from its thread's dispatcher whenever an event of the
/// monitored type occurs on the descriptor.
///
/// To listen to multiple event types on the same descriptor, create multiple
/// notifiers. Registering two notifiers of the same type for the same
/// descriptor on one thread is an error, logged and ignored.
///
/// The notifier does not own the descriptor; the caller keeps it open for as
/// long as the notifier watches it.
///
/// [`activated`]: EventNotifier::activated
pub struct EventNotifier {
    object: Object,
    inner: Arc<NotifierInner>,
}

pub(crate) struct NotifierInner {
    fd: RawFd,
    kind: NotifierType,
    enabled: AtomicBool,
    activated: Signal<()>,
    object: Weak<ObjectCore>,
}

impl EventNotifier {
    /// Create a notifier for `fd`, affine to the current thread, enabled.
    pub fn new(fd: RawFd, kind: NotifierType) -> EventNotifier {
        EventNotifier::build(fd, kind, Object::new())
    }

    /// Create a notifier owned by `parent`, enabled.
    pub fn with_parent(fd: RawFd, kind: NotifierType, parent: &Object) -> EventNotifier {
        EventNotifier::build(fd, kind, Object::with_parent(parent))
    }

    fn build(fd: RawFd, kind: NotifierType, object: Object) -> EventNotifier {
        let inner = Arc::new(NotifierInner {
            fd,
            kind,
            enabled: AtomicBool::new(false),
            activated: Signal::new(),
            object: Arc::downgrade(object.core()),
        });

        // When the notifier's object is re-homed, unregister on the spot and
        // queue a re-enable that runs once the destination loop takes over,
        // preserving the thread ownership of both dispatchers' state.
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
            if !inner.is_enabled() {
                return;
            }
            NotifierInner::set_enabled(&inner, false);
            if let Some(core) = hook_core.upgrade() {
                let inner = Arc::downgrade(&inner);
                bound::activate(
                    &core,
                    ConnectionType::Queued,
                    Box::new(move || {
                        if let Some(inner) = inner.upgrade() {
                            NotifierInner::set_enabled(&inner, true);
                        }
                    }),
                );
            }
        });

        let teardown_inner = Arc::downgrade(&inner);
        object.core().set_teardown_hook(Box::new(move || {
            if let Some(inner) = teardown_inner.upgrade() {
                NotifierInner::set_enabled(&inner, false);
            }
        }));

        let notifier = EventNotifier { object, inner };
        notifier.set_enabled(true);
        notifier
    }

    /// Retrieve the file descriptor being monitored.
    pub fn fd(&self) -> RawFd {
        self.inner.fd
    }

    /// Retrieve the type of event being monitored.
    pub fn notifier_type(&self) -> NotifierType {
        self.inner.kind
    }

    /// Check whether the notifier is enabled.
    pub fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    /// Enable or disable the notifier. A disabled notifier ignores events and
    /// does not emit [`activated`]. Must be called on the notifier's thread.
    ///
    /// [`activated`]: EventNotifier::activated
    pub fn set_enabled(&self, enable: bool) {
        NotifierInner::set_enabled(&self.inner, enable);
    }

    /// Signal emitted when the monitored event occurs on the descriptor.
    pub fn activated(&self) -> &Signal<()> {
        &self.inner.activated
    }

    /// Move the notifier to `target`. An enabled notifier transparently
    /// re-registers with the destination thread's dispatcher.
    pub fn move_to_thread(&self, target: &crate::Thread) {
        self.object.move_to_thread(target);
    }

    /// Schedule destruction on the notifier's thread.
    pub fn delete_later(self) {
        crate::object::delete_later(self);
    }
}

impl std::fmt::Debug for EventNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventNotifier")
            .field("fd", &self.inner.fd)
            .field("type", &self.inner.kind)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl AsRef<Object> for EventNotifier {
    fn as_ref(&self) -> &Object {
        &self.object
    }
}

impl Drop for EventNotifier {
    fn drop(&mut self) {
        NotifierInner::set_enabled(&self.inner, false);
    }
}

impl NotifierInner {
    fn set_enabled(self: &Arc<Self>, enable: bool) {
        if self.enabled.load(Ordering::Acquire) == enable {
            return;
        }
        let object = match self.object.upgrade() {
            Some(object) => object,
            None => return,
        };
        if enable && !object.is_alive() {
            return;
        }
        let thread = object.thread();
        if !thread.is_current() {
            error!("notifiers can only be enabled or disabled from their thread");
            return;
        }

        self.enabled.store(enable, Ordering::Release);

        let dispatcher = thread.dispatcher();
        if enable {
            dispatcher.register_event_notifier(self);
        } else {
            dispatcher.unregister_event_notifier(self);
        }
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn kind(&self) -> NotifierType {
        self.kind
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn object(&self) -> Option<Arc<ObjectCore>> {
        self.object.upgrade()
    }

    pub(crate) fn emit_activated(&self) {
        self.activated.emit(());
    }
}
