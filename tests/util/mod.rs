// Not all functions are used by all tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use evio::{ConnectionType, Object, Semaphore, Thread};

pub fn init() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}

pub fn assert_sync<T: Sync>() {}
pub fn assert_send<T: Send>() {}

/// A started worker thread with an anchor object living on it, used to run
/// closures on the worker and to tear it down at the end of a test.
pub struct Worker {
    pub thread: Arc<Thread>,
    pub anchor: Object,
}

impl Worker {
    pub fn start() -> Worker {
        init();
        let thread = Arc::new(Thread::new());
        thread.start();
        let anchor = Object::new();
        anchor.move_to_thread(&thread);
        Worker { thread, anchor }
    }

    /// Run `f` on the worker and wait for it to complete.
    pub fn run<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.anchor.invoke(ConnectionType::Blocking, f);
    }

    /// The worker's OS thread id.
    pub fn tid(&self) -> u64 {
        let tid = Arc::new(Mutex::new(0));
        let slot = Arc::clone(&tid);
        self.run(move || *slot.lock().unwrap() = Thread::current_id());
        let tid = *tid.lock().unwrap();
        tid
    }

    pub fn stop(self) {
        self.thread.exit(0);
        assert!(self.thread.wait(Some(Duration::from_secs(5))));
    }
}

/// Counter observable across threads, paired with a semaphore signalled on
/// every increment.
#[derive(Default)]
pub struct Hits {
    count: AtomicUsize,
    sem: Semaphore,
}

impl Hits {
    pub fn new() -> Arc<Hits> {
        Arc::new(Hits::default())
    }

    pub fn hit(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.sem.release(1);
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait until `n` increments happened in total.
    pub fn wait(&self, n: usize) {
        self.sem.acquire(n);
        self.sem.release(n);
    }
}
