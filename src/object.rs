use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::error;

use crate::bound::{self, ConnectionType};
use crate::message::{Kind, Message};
use crate::signal::SignalBackref;
use crate::thread::{Thread, ThreadData};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Base entity of the object model.
///
/// An `Object` has a thread affinity: the thread it was created on (or later
/// moved to with [`move_to_thread`]), on which its bound slots and message
/// handlers run. It may own children, torn down with it in reverse
/// registration order, and it tracks every [`Signal`] holding a connection
/// bound to it so those connections are severed on destruction.
///
/// Dropping an `Object` tears it down: its remaining mailbox messages are
/// discarded, its signal connections are disconnected, and its children are
/// torn down, all before `drop` returns. Dropping must happen on the object's
/// own thread when messages may still be pending; from a foreign thread use
/// [`delete_later`], which ships the object to its thread and drops it there.
///
/// Components with richer behaviour ([`Timer`], [`EventNotifier`]) embed an
/// `Object` rather than deriving from one.
///
/// [`move_to_thread`]: Object::move_to_thread
/// [`Signal`]: crate::Signal
/// [`Timer`]: crate::Timer
/// [`EventNotifier`]: crate::EventNotifier
pub struct Object {
    core: Arc<ObjectCore>,
}

/// Shared identity record behind an [`Object`] handle.
///
/// Signals, mailboxes and dispatchers hold `Weak` references to the core and
/// re-check `alive` at activation time, which turns use-after-destruction
/// into a skipped delivery.
pub(crate) struct ObjectCore {
    id: u64,
    alive: AtomicBool,
    thread: Mutex<Arc<ThreadData>>,
    pending: AtomicUsize,
    parent: Mutex<Weak<ObjectCore>>,
    /// Children in registration order. Owning references: a child's core
    /// outlives its user-facing handle while the parent is alive.
    children: Mutex<Vec<Arc<ObjectCore>>>,
    /// Signals holding at least one connection bound to this object, one
    /// entry per connection.
    signals: Mutex<Vec<Weak<dyn SignalBackref>>>,
    handler: Mutex<Option<MessageHandler>>,
    teardown_hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

impl Object {
    /// Create an object affine to the current thread.
    pub fn new() -> Object {
        Object {
            core: ObjectCore::new(ThreadData::current()),
        }
    }

    /// Create an object owned by `parent`.
    ///
    /// The child shares the parent's thread affinity and is torn down with
    /// it. Must be called on the parent's thread.
    pub fn with_parent(parent: &Object) -> Object {
        let parent_core = parent.core();
        let thread = parent_core.thread();
        debug_assert!(
            thread.is_current(),
            "children must be attached on the parent's thread"
        );

        let core = ObjectCore::new(thread);
        *core.parent.lock().unwrap() = Arc::downgrade(parent_core);
        parent_core.children.lock().unwrap().push(Arc::clone(&core));
        Object { core }
    }

    /// Invoke `func` on this object's thread according to `ct`.
    ///
    /// With [`Queued`] the call returns immediately and `func` runs when the
    /// object's event loop dispatches messages; with [`Blocking`] the call
    /// additionally waits for `func` to complete.
    ///
    /// [`Queued`]: ConnectionType::Queued
    /// [`Blocking`]: ConnectionType::Blocking
    pub fn invoke<F>(&self, ct: ConnectionType, func: F)
    where
        F: FnOnce() + Send + 'static,
    {
        bound::activate(&self.core, ct, Box::new(func));
    }

    /// Post a message to this object's mailbox.
    pub fn post_message(&self, msg: Message) {
        let thread = self.core.thread();
        thread.post(msg, &self.core);
    }

    /// Install the handler invoked for [`ThreadMove`] and [`User`] messages
    /// delivered to this object, replacing any previous handler.
    ///
    /// [`ThreadMove`]: crate::MessageType::ThreadMove
    /// [`User`]: crate::MessageType::User
    pub fn set_message_handler<F>(&self, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.core.set_message_hook(Arc::new(handler));
    }

    /// Move this object and all its descendants to `target`.
    ///
    /// Only legal from the object's current thread and for objects without a
    /// parent; violations are logged and ignored. Messages already posted to
    /// the subtree are transferred to the destination mailbox, and each moved
    /// object then receives a [`ThreadMove`] message on the new thread.
    ///
    /// [`ThreadMove`]: crate::MessageType::ThreadMove
    pub fn move_to_thread(&self, target: &Thread) {
        let source = self.core.thread();
        if !source.is_current() {
            error!("objects can only be moved from their own thread");
            return;
        }
        if self.core.parent.lock().unwrap().upgrade().is_some() {
            error!("objects with a parent cannot be moved to another thread");
            return;
        }

        let target_data = target.data();
        if Arc::ptr_eq(&source, target_data) {
            return;
        }

        let subtree = self.core.collect_subtree();
        let ids: HashSet<u64> = subtree.iter().map(|core| core.id()).collect();

        ThreadData::transfer_messages(&source, target_data, &ids);

        for core in &subtree {
            core.set_thread(Arc::clone(target_data));
        }
        for core in &subtree {
            target_data.post(Message::thread_move(), core);
        }
    }

    /// Schedule this object for destruction on its own thread.
    ///
    /// Equivalent to the free function [`delete_later`]; provided as a method
    /// for call-chaining convenience.
    pub fn delete_later(self) {
        delete_later(self);
    }

    pub(crate) fn core(&self) -> &Arc<ObjectCore> {
        &self.core
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.core.id())
            .field("alive", &self.core.is_alive())
            .finish()
    }
}

impl Default for Object {
    fn default() -> Object {
        Object::new()
    }
}

impl AsRef<Object> for Object {
    fn as_ref(&self) -> &Object {
        self
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        self.core.teardown();
    }
}

/// Schedule `object` for destruction on its affinity thread.
///
/// The object is shipped to its thread inside a deferred-deletion message and
/// dropped there when the thread's event loop dispatches it. This is the only
/// safe way to destroy an object from a foreign thread. No slot bound to the
/// object fires after the message is processed.
pub fn delete_later<T>(object: T)
where
    T: AsRef<Object> + Send + 'static,
{
    let core = Arc::clone(object.as_ref().core());
    let thread = core.thread();
    thread.post(Message::deferred_delete(Box::new(object)), &core);
}

impl ObjectCore {
    fn new(thread: Arc<ThreadData>) -> Arc<ObjectCore> {
        Arc::new(ObjectCore {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            alive: AtomicBool::new(true),
            thread: Mutex::new(thread),
            pending: AtomicUsize::new(0),
            parent: Mutex::new(Weak::new()),
            children: Mutex::new(Vec::new()),
            signals: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
            teardown_hook: Mutex::new(None),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn thread(&self) -> Arc<ThreadData> {
        Arc::clone(&self.thread.lock().unwrap())
    }

    pub(crate) fn set_thread(&self, thread: Arc<ThreadData>) {
        *self.thread.lock().unwrap() = thread;
    }

    pub(crate) fn pending_add(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn pending_sub(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn add_signal_backref(&self, signal: Weak<dyn SignalBackref>) {
        self.signals.lock().unwrap().push(signal);
    }

    /// Remove one back-link entry for the signal at `ptr`, matching the one
    /// connection that was just disconnected.
    pub(crate) fn remove_signal_backref(&self, ptr: *const ()) {
        let mut signals = self.signals.lock().unwrap();
        if let Some(pos) = signals
            .iter()
            .position(|weak| weak.as_ptr() as *const () == ptr)
        {
            signals.swap_remove(pos);
        }
    }

    pub(crate) fn set_message_hook(&self, handler: MessageHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    pub(crate) fn set_teardown_hook(&self, hook: Box<dyn FnOnce() + Send>) {
        *self.teardown_hook.lock().unwrap() = Some(hook);
    }

    /// Deliver a dispatched message to the installed handler, outside any
    /// internal lock.
    pub(crate) fn handle_message(&self, msg: &Message) {
        debug_assert!(matches!(
            msg.kind,
            Kind::ThreadMove | Kind::User(_)
        ));
        let handler = self.handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(msg);
        }
    }

    /// Tear the object down: run the component teardown hook, sever signal
    /// connections, purge undelivered messages, detach from the parent and
    /// tear down children in reverse registration order. Idempotent.
    pub(crate) fn teardown(self: &Arc<Self>) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }

        debug_assert!(
            self.thread().is_current() || self.pending.load(Ordering::Acquire) == 0,
            "object destroyed on a foreign thread with messages pending"
        );

        if let Some(hook) = self.teardown_hook.lock().unwrap().take() {
            hook();
        }

        let signals = std::mem::take(&mut *self.signals.lock().unwrap());
        for weak in signals {
            if let Some(signal) = weak.upgrade() {
                signal.disconnect_object(self.id);
            }
        }

        if self.pending.load(Ordering::Acquire) > 0 {
            self.thread().remove_messages(self);
        }

        if let Some(parent) = self.parent.lock().unwrap().upgrade() {
            parent
                .children
                .lock()
                .unwrap()
                .retain(|child| !Arc::ptr_eq(child, self));
        }

        let mut children = std::mem::take(&mut *self.children.lock().unwrap());
        while let Some(child) = children.pop() {
            child.teardown();
        }
    }

    /// The object and all its descendants, parents before children.
    pub(crate) fn collect_subtree(self: &Arc<Self>) -> Vec<Arc<ObjectCore>> {
        let mut subtree = vec![Arc::clone(self)];
        let mut next = 0;
        while next < subtree.len() {
            let children = subtree[next].children.lock().unwrap().clone();
            subtree.extend(children);
            next += 1;
        }
        subtree
    }
}
