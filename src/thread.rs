use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use log::{error, warn};

use crate::dispatcher::EventDispatcher;
use crate::message::{Kind, Message, MessageType};
use crate::object::ObjectCore;
use crate::signal::Signal;

thread_local! {
    static CURRENT: RefCell<Option<Arc<ThreadData>>> = const { RefCell::new(None) };
}

static MAIN: OnceLock<Thread> = OnceLock::new();

/// A thread of execution running an event loop.
///
/// Each `Thread` owns an [`EventDispatcher`] and a mailbox of pending
/// [`Message`]s. Once started, the worker alternates between draining the
/// mailbox and running one dispatcher iteration, until [`exit`] is called.
/// Objects created on the thread (or moved to it) have their slots and
/// message handlers run there.
///
/// The process's initial thread is represented by the [`Thread::main`]
/// singleton, which owns no worker: its event loop is driven by the
/// application, typically by calling [`dispatch_messages`] and
/// [`EventDispatcher::process_events`] in a loop.
///
/// [`exit`]: Thread::exit
/// [`dispatch_messages`]: Thread::dispatch_messages
/// [`EventDispatcher::process_events`]: crate::EventDispatcher::process_events
pub struct Thread {
    data: Arc<ThreadData>,
    joiner: Mutex<Option<thread::JoinHandle<()>>>,
    finished: Signal<()>,
}

/// Per-thread record shared between the `Thread` handle, the objects affine
/// to the thread and any thread posting messages to it.
pub(crate) struct ThreadData {
    dispatcher: EventDispatcher,
    mailbox: Mutex<VecDeque<Message>>,
    running: AtomicBool,
    exit: AtomicBool,
    exit_code: AtomicI32,
    done: Mutex<bool>,
    done_cv: Condvar,
}

impl Thread {
    /// Create a thread. The worker does not run until [`start`] is called.
    ///
    /// [`start`]: Thread::start
    pub fn new() -> Thread {
        Thread::adopt(ThreadData::new_arc())
    }

    fn adopt(data: Arc<ThreadData>) -> Thread {
        Thread {
            data,
            joiner: Mutex::new(None),
            finished: Signal::new(),
        }
    }

    /// Retrieve the singleton representing the process's initial thread.
    ///
    /// The instance is installed lazily, bound to the first thread that
    /// touches the library.
    pub fn main() -> &'static Thread {
        // Ensure the calling thread has a record; the first record created
        // process-wide is installed as the main thread.
        ThreadData::current();
        MAIN.get().expect("main thread is installed on first access")
    }

    /// Retrieve the OS identifier of the calling thread.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn current_id() -> u64 {
        (unsafe { libc::syscall(libc::SYS_gettid) }) as u64
    }

    /// Retrieve the OS identifier of the calling thread.
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub fn current_id() -> u64 {
        (unsafe { libc::pthread_self() }) as usize as u64
    }

    /// Launch the worker. Does nothing if the thread is already running.
    pub fn start(&self) {
        let mut joiner = self.joiner.lock().unwrap();
        if self.data.running.load(Ordering::Acquire) {
            warn!("thread is already running");
            return;
        }
        // Reap a previous run so the thread can be restarted.
        if let Some(handle) = joiner.take() {
            let _ = handle.join();
        }

        self.data.exit.store(false, Ordering::Release);
        self.data.exit_code.store(0, Ordering::Release);
        *self.data.done.lock().unwrap() = false;
        self.data.running.store(true, Ordering::Release);

        let data = Arc::clone(&self.data);
        let finished = self.finished.clone();
        match thread::Builder::new().spawn(move || Thread::run(data, finished)) {
            Ok(handle) => *joiner = Some(handle),
            Err(err) => {
                error!("failed to start thread: {}", err);
                self.data.running.store(false, Ordering::Release);
                *self.data.done.lock().unwrap() = true;
            }
        }
    }

    fn run(data: Arc<ThreadData>, finished: Signal<()>) {
        CURRENT.with(|current| *current.borrow_mut() = Some(Arc::clone(&data)));

        Thread::exec(&data);

        data.running.store(false, Ordering::Release);
        finished.emit(());

        CURRENT.with(|current| current.borrow_mut().take());

        let mut done = data.done.lock().unwrap();
        *done = true;
        data.done_cv.notify_all();
    }

    /// The event loop: drain the mailbox, run one dispatcher iteration,
    /// repeat until an exit is requested.
    fn exec(data: &Arc<ThreadData>) -> i32 {
        while !data.exit.load(Ordering::Acquire) {
            data.dispatch_messages(None);
            data.dispatcher.process_events();
        }

        // Messages posted before the exit request are still delivered in the
        // terminating iteration.
        data.dispatch_messages(None);
        data.exit_code.load(Ordering::Acquire)
    }

    /// Request the event loop to terminate with `code`.
    ///
    /// The request is observed at the top of the next loop iteration; the
    /// dispatcher is interrupted so an in-progress poll returns promptly.
    pub fn exit(&self, code: i32) {
        self.data.exit_code.store(code, Ordering::Release);
        self.data.exit.store(true, Ordering::Release);
        self.data.dispatcher.interrupt();
    }

    /// Wait for the thread to terminate, at most `timeout` (`None` waits
    /// forever). Returns `true` if the thread terminated within the window.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        {
            let mut done = self.data.done.lock().unwrap();
            match timeout {
                None => {
                    while !*done {
                        done = self.data.done_cv.wait(done).unwrap();
                    }
                }
                Some(timeout) => {
                    let deadline = Instant::now() + timeout;
                    while !*done {
                        let now = Instant::now();
                        if now >= deadline {
                            return false;
                        }
                        let (guard, _) = self
                            .data
                            .done_cv
                            .wait_timeout(done, deadline - now)
                            .unwrap();
                        done = guard;
                    }
                }
            }
        }

        if let Some(handle) = self.joiner.lock().unwrap().take() {
            let _ = handle.join();
        }
        true
    }

    /// Check if the worker is running.
    pub fn is_running(&self) -> bool {
        self.data.running.load(Ordering::Acquire)
    }

    /// Signal emitted by the worker when the event loop returns, before
    /// [`wait`] observers unblock.
    ///
    /// [`wait`]: Thread::wait
    pub fn finished(&self) -> &Signal<()> {
        &self.finished
    }

    /// Retrieve the thread's event dispatcher.
    pub fn event_dispatcher(&self) -> &EventDispatcher {
        &self.data.dispatcher
    }

    /// Deliver queued messages addressed to objects on this thread,
    /// optionally restricted to one message type.
    ///
    /// Called automatically by the event loop of started threads; for the
    /// main thread it is the application's responsibility.
    pub fn dispatch_messages(&self, filter: Option<MessageType>) {
        self.data.dispatch_messages(filter);
    }

    pub(crate) fn data(&self) -> &Arc<ThreadData> {
        &self.data
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("running", &self.is_running())
            .finish()
    }
}

impl Default for Thread {
    fn default() -> Thread {
        Thread::new()
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        if self.data.running.load(Ordering::Acquire) {
            warn!("thread handle dropped while the worker is running");
        }
    }
}

impl ThreadData {
    fn new_arc() -> Arc<ThreadData> {
        Arc::new_cyclic(|weak| ThreadData {
            dispatcher: EventDispatcher::new(weak.clone()),
            mailbox: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(false),
            exit: AtomicBool::new(false),
            exit_code: AtomicI32::new(0),
            done: Mutex::new(true),
            done_cv: Condvar::new(),
        })
    }

    /// Retrieve the calling thread's record, creating it on first use. The
    /// first record created process-wide becomes the main thread's.
    pub(crate) fn current() -> Arc<ThreadData> {
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            if let Some(data) = current.as_ref() {
                return Arc::clone(data);
            }
            let data = ThreadData::new_arc();
            *current = Some(Arc::clone(&data));
            let _ = MAIN.set(Thread::adopt(Arc::clone(&data)));
            data
        })
    }

    /// Check whether the calling thread is the one this record belongs to.
    ///
    /// Read without creating a record: a thread unknown to the runtime is
    /// never the owner.
    pub(crate) fn is_current(&self) -> bool {
        CURRENT.with(|current| {
            current
                .borrow()
                .as_ref()
                .map_or(false, |data| std::ptr::eq(Arc::as_ptr(data), self))
        })
    }

    pub(crate) fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Append a message to the mailbox and wake the dispatcher. Callable from
    /// any thread.
    pub(crate) fn post(&self, mut msg: Message, receiver: &Arc<ObjectCore>) {
        msg.receiver = Arc::downgrade(receiver);
        {
            let mut mailbox = self.mailbox.lock().unwrap();
            receiver.pending_add();
            mailbox.push_back(msg);
        }
        self.dispatcher.interrupt();
    }

    /// Splice the mailbox out and deliver each message whose receiver is
    /// still alive, in post order. Messages not matching `filter` are
    /// requeued ahead of newer traffic.
    pub(crate) fn dispatch_messages(&self, filter: Option<MessageType>) {
        if !self.is_current() {
            error!("messages can only be dispatched from the mailbox's own thread");
            return;
        }

        let mut queue = std::mem::take(&mut *self.mailbox.lock().unwrap());
        let mut kept = VecDeque::new();
        while let Some(mut msg) = queue.pop_front() {
            if filter.map_or(false, |wanted| msg.message_type() != wanted) {
                kept.push_back(msg);
                continue;
            }

            let receiver = match msg.receiver.upgrade() {
                Some(receiver) => receiver,
                None => continue,
            };
            receiver.pending_sub();
            if !receiver.is_alive() {
                continue;
            }

            ThreadData::deliver(&receiver, &mut msg);
        }

        if !kept.is_empty() {
            let mut mailbox = self.mailbox.lock().unwrap();
            while let Some(msg) = mailbox.pop_front() {
                kept.push_back(msg);
            }
            *mailbox = kept;
        }
    }

    fn deliver(receiver: &Arc<ObjectCore>, msg: &mut Message) {
        match &mut msg.kind {
            Kind::Invoke { call, semaphore } => {
                if let Some(call) = call.take() {
                    call();
                }
                if let Some(semaphore) = semaphore.take() {
                    semaphore.release(1);
                }
            }
            Kind::DeferredDelete { object } => {
                // Dropping the payload tears the receiver down, inline, on
                // its own thread.
                drop(object.take());
            }
            Kind::ThreadMove | Kind::User(_) => receiver.handle_message(msg),
        }
    }

    /// Remove every undelivered message addressed to `receiver`. Called by
    /// object teardown before the receiver becomes unreachable.
    pub(crate) fn remove_messages(&self, receiver: &Arc<ObjectCore>) {
        let removed: Vec<Message> = {
            let mut mailbox = self.mailbox.lock().unwrap();
            let mut kept = VecDeque::with_capacity(mailbox.len());
            let mut removed = Vec::new();
            while let Some(msg) = mailbox.pop_front() {
                if std::ptr::eq(msg.receiver.as_ptr(), Arc::as_ptr(receiver)) {
                    receiver.pending_sub();
                    removed.push(msg);
                } else {
                    kept.push_back(msg);
                }
            }
            *mailbox = kept;
            removed
        };
        // Dropped outside the lock: an Invoke message releases its blocking
        // sender's semaphore on drop.
        drop(removed);
    }

    /// Move messages addressed to the objects in `subtree` from `source`'s
    /// mailbox to `target`'s, preserving post order.
    pub(crate) fn transfer_messages(
        source: &Arc<ThreadData>,
        target: &Arc<ThreadData>,
        subtree: &HashSet<u64>,
    ) {
        debug_assert!(!Arc::ptr_eq(source, target));

        {
            let (mut src, mut dst) = ThreadData::lock_pair(source, target);
            let mut kept = VecDeque::with_capacity(src.len());
            while let Some(msg) = src.pop_front() {
                let moved = msg
                    .receiver
                    .upgrade()
                    .map_or(false, |core| subtree.contains(&core.id()));
                if moved {
                    dst.push_back(msg);
                } else {
                    kept.push_back(msg);
                }
            }
            *src = kept;
        }

        target.dispatcher.interrupt();
    }

    /// Lock two mailboxes in address order so concurrent thread moves cannot
    /// deadlock. Returns the guards as (a, b).
    fn lock_pair<'a>(
        a: &'a ThreadData,
        b: &'a ThreadData,
    ) -> (
        MutexGuard<'a, VecDeque<Message>>,
        MutexGuard<'a, VecDeque<Message>>,
    ) {
        if (a as *const ThreadData as usize) < (b as *const ThreadData as usize) {
            let ga = a.mailbox.lock().unwrap();
            let gb = b.mailbox.lock().unwrap();
            (ga, gb)
        } else {
            let gb = b.mailbox.lock().unwrap();
            let ga = a.mailbox.lock().unwrap();
            (ga, gb)
        }
    }
}
