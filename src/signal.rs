use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::bound::{self, ConnectionType};
use crate::object::{Object, ObjectCore};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a single signal/slot connection, returned by the `connect`
/// family and usable with [`Signal::disconnect_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> ConnectionId {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A multicast connection point over a fixed argument type.
///
/// A signal maintains an ordered list of bound slots and invokes every one of
/// them on [`emit`]. Slots bound to an [`Object`] receiver follow the
/// receiver's [`ConnectionType`] policy, so emission transparently crosses
/// threads through the receiver's mailbox. Slots without a receiver are always
/// invoked synchronously in the emitting thread.
///
/// No duplicate detection is performed: connecting the same slot twice fires
/// it twice. Cloning a `Signal` yields a handle sharing the same connection
/// list.
///
/// Emission iterates over a snapshot of the connection list, so a slot may
/// freely disconnect itself or others, or destroy its receiver; disconnections
/// affect the canonical list but not the snapshot being iterated. A slot whose
/// receiver was destroyed between snapshot and activation is not invoked.
/// Destruction of a receiver concurrently with an emission from another thread
/// is the caller's responsibility to avoid.
///
/// [`emit`]: Signal::emit
pub struct Signal<T = ()> {
    inner: Arc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Signal<T> {
        Signal {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SignalInner<T> {
    slots: Mutex<Vec<Connection<T>>>,
}

/// Trait object through which an [`ObjectCore`] severs its connections on
/// teardown without knowing the signal's argument type.
pub(crate) trait SignalBackref: Send + Sync {
    fn disconnect_object(&self, object: u64);
}

struct Receiver {
    id: u64,
    core: Weak<ObjectCore>,
}

struct Connection<T> {
    id: ConnectionId,
    receiver: Option<Receiver>,
    policy: ConnectionType,
    slot: Slot<T>,
}

enum Slot<T> {
    Closure(Arc<dyn Fn(T) + Send + Sync>),
    Function(fn(T)),
}

impl<T> Slot<T> {
    fn call(&self, args: T) {
        match self {
            Slot::Closure(f) => f(args),
            Slot::Function(f) => f(args),
        }
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Slot<T> {
        match self {
            Slot::Closure(f) => Slot::Closure(Arc::clone(f)),
            Slot::Function(f) => Slot::Function(*f),
        }
    }
}

impl<T> Clone for Connection<T> {
    fn clone(&self) -> Connection<T> {
        Connection {
            id: self.id,
            receiver: self.receiver.as_ref().map(|r| Receiver {
                id: r.id,
                core: Weak::clone(&r.core),
            }),
            policy: self.policy,
            slot: self.slot.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Connection<T> {
    fn activate(&self, args: T) {
        match &self.receiver {
            Some(receiver) => {
                let core = match receiver.core.upgrade() {
                    Some(core) => core,
                    None => return,
                };
                if !core.is_alive() {
                    return;
                }
                let slot = self.slot.clone();
                bound::activate(&core, self.policy, Box::new(move || slot.call(args)));
            }
            None => self.slot.call(args),
        }
    }
}

impl<T: Clone + Send + 'static> Signal<T> {
    /// Create a signal with no connections.
    pub fn new() -> Signal<T> {
        Signal {
            inner: Arc::new(SignalInner {
                slots: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Connect a slot bound to `receiver` with the [`Auto`] policy.
    ///
    /// The slot runs on `receiver`'s thread whenever that differs from the
    /// emitting thread, and synchronously otherwise.
    ///
    /// [`Auto`]: ConnectionType::Auto
    pub fn connect<F>(&self, receiver: &Object, slot: F) -> ConnectionId
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.connect_with(receiver, ConnectionType::Auto, slot)
    }

    /// Connect a slot bound to `receiver` with an explicit delivery policy.
    pub fn connect_with<F>(&self, receiver: &Object, ct: ConnectionType, slot: F) -> ConnectionId
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let core = receiver.core();
        core.add_signal_backref(self.backref());
        self.push(Connection {
            id: ConnectionId::next(),
            receiver: Some(Receiver {
                id: core.id(),
                core: Arc::downgrade(core),
            }),
            policy: ct,
            slot: Slot::Closure(Arc::new(slot)),
        })
    }

    /// Connect a slot with no receiver object. Delivery is always [`Direct`].
    ///
    /// [`Direct`]: ConnectionType::Direct
    pub fn connect_free<F>(&self, slot: F) -> ConnectionId
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.push(Connection {
            id: ConnectionId::next(),
            receiver: None,
            policy: ConnectionType::Direct,
            slot: Slot::Closure(Arc::new(slot)),
        })
    }

    /// Connect a plain function. Delivery is always [`Direct`], and the
    /// connection can later be removed with [`disconnect_fn`].
    ///
    /// [`Direct`]: ConnectionType::Direct
    /// [`disconnect_fn`]: Signal::disconnect_fn
    pub fn connect_fn(&self, slot: fn(T)) -> ConnectionId {
        self.push(Connection {
            id: ConnectionId::next(),
            receiver: None,
            policy: ConnectionType::Direct,
            slot: Slot::Function(slot),
        })
    }

    fn push(&self, connection: Connection<T>) -> ConnectionId {
        let id = connection.id;
        self.inner.slots.lock().unwrap().push(connection);
        id
    }

    /// Emit the signal, invoking every connected slot with `args`.
    pub fn emit(&self, args: T) {
        // Snapshot the connection list: a slot may disconnect itself or
        // others, or destroy its receiver, while the emission is in progress.
        let snapshot: Vec<Connection<T>> = self.inner.slots.lock().unwrap().clone();
        for connection in &snapshot {
            connection.activate(args.clone());
        }
    }

    /// Remove every connection.
    pub fn disconnect_all(&self) {
        let removed = std::mem::take(&mut *self.inner.slots.lock().unwrap());
        for connection in &removed {
            self.drop_backref(connection);
        }
    }

    /// Remove every connection whose receiver is `receiver`.
    pub fn disconnect(&self, receiver: &Object) {
        let id = receiver.core().id();
        let removed = self.remove(|c| matches!(&c.receiver, Some(r) if r.id == id));
        for connection in &removed {
            self.drop_backref(connection);
        }
    }

    /// Remove the connection identified by `id`, if still present.
    pub fn disconnect_id(&self, id: ConnectionId) {
        let removed = self.remove(|c| c.id == id);
        for connection in &removed {
            self.drop_backref(connection);
        }
    }

    /// Remove every connection made with [`connect_fn`] for `slot`.
    ///
    /// [`connect_fn`]: Signal::connect_fn
    pub fn disconnect_fn(&self, slot: fn(T)) {
        self.remove(|c| matches!(&c.slot, Slot::Function(f) if *f == slot));
    }

    fn remove(&self, mut filter: impl FnMut(&Connection<T>) -> bool) -> Vec<Connection<T>> {
        let mut slots = self.inner.slots.lock().unwrap();
        let mut removed = Vec::new();
        slots.retain(|c| {
            if filter(c) {
                removed.push(c.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    fn drop_backref(&self, connection: &Connection<T>) {
        if let Some(receiver) = &connection.receiver {
            if let Some(core) = receiver.core.upgrade() {
                core.remove_signal_backref(Arc::as_ptr(&self.inner) as *const ());
            }
        }
    }

    fn backref(&self) -> Weak<dyn SignalBackref> {
        let inner: Arc<SignalInner<T>> = Arc::clone(&self.inner);
        let inner: Arc<dyn SignalBackref> = inner;
        Arc::downgrade(&inner)
    }
}

impl<T: Clone + Send + 'static> Default for Signal<T> {
    fn default() -> Signal<T> {
        Signal::new()
    }
}

impl<T> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("connections", &self.inner.slots.lock().unwrap().len())
            .finish()
    }
}

impl<T: 'static> SignalBackref for SignalInner<T> {
    fn disconnect_object(&self, object: u64) {
        self.slots
            .lock()
            .unwrap()
            .retain(|c| !matches!(&c.receiver, Some(r) if r.id == object));
    }
}

impl<T> Drop for SignalInner<T> {
    fn drop(&mut self) {
        // Clear the receivers' back-links so torn-down objects do not keep
        // scanning a dead signal.
        let slots = std::mem::take(self.slots.get_mut().unwrap());
        let ptr = self as *const SignalInner<T> as *const ();
        for connection in &slots {
            if let Some(receiver) = &connection.receiver {
                if let Some(core) = receiver.core.upgrade() {
                    core.remove_signal_backref(ptr);
                }
            }
        }
    }
}
