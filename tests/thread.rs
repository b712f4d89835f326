use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use evio::{delete_later, ConnectionType, Object, Signal, Thread};

mod util;

use util::{assert_send, assert_sync, init, Hits, Worker};

#[test]
fn is_send_and_sync() {
    assert_send::<Thread>();
    assert_sync::<Thread>();
}

#[test]
fn cross_thread_queued_invoke_runs_on_receiver_thread() {
    let worker = Worker::start();
    let worker_tid = worker.tid();
    assert_ne!(worker_tid, Thread::current_id());

    let object = Object::new();
    object.move_to_thread(&worker.thread);

    let hits = Hits::new();
    let seen_tid = Arc::new(AtomicU64::new(0));

    let invoke_hits = Arc::clone(&hits);
    let invoke_tid = Arc::clone(&seen_tid);
    object.invoke(ConnectionType::Queued, move || {
        invoke_tid.store(Thread::current_id(), Ordering::SeqCst);
        invoke_hits.hit();
    });

    hits.wait(1);
    assert_eq!(hits.count(), 1);
    assert_eq!(seen_tid.load(Ordering::SeqCst), worker_tid);

    drop(object);
    worker.stop();
}

#[test]
fn blocking_invoke_completes_before_returning() {
    let worker = Worker::start();

    let object = Object::new();
    object.move_to_thread(&worker.thread);

    let hits = Arc::new(AtomicUsize::new(0));
    let invoke_hits = Arc::clone(&hits);
    object.invoke(ConnectionType::Blocking, move || {
        invoke_hits.fetch_add(1, Ordering::SeqCst);
    });

    // The slot has run by the time the blocking invocation returns.
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    drop(object);
    worker.stop();
}

#[test]
fn queued_emissions_cross_threads() {
    let worker = Worker::start();
    let worker_tid = worker.tid();

    let receiver = Object::new();
    receiver.move_to_thread(&worker.thread);

    let signal: Signal<u32> = Signal::new();
    let hits = Hits::new();
    let slot_hits = Arc::clone(&hits);
    signal.connect(&receiver, move |value| {
        assert_eq!(value, 7);
        assert_eq!(Thread::current_id(), worker_tid);
        slot_hits.hit();
    });

    signal.emit(7);
    hits.wait(1);

    drop(receiver);
    worker.stop();
}

#[test]
fn messages_from_one_sender_arrive_in_post_order() {
    let worker = Worker::start();

    let object = Object::new();
    object.move_to_thread(&worker.thread);

    let order = Arc::new(Mutex::new(Vec::new()));
    let hits = Hits::new();

    for seq in 0..100u32 {
        let order = Arc::clone(&order);
        let hits = Arc::clone(&hits);
        object.invoke(ConnectionType::Queued, move || {
            order.lock().unwrap().push(seq);
            hits.hit();
        });
    }

    hits.wait(100);
    let order = order.lock().unwrap();
    assert_eq!(*order, (0..100).collect::<Vec<_>>());

    drop(object);
    worker.stop();
}

#[test]
fn exit_terminates_the_loop() {
    init();

    let thread = Thread::new();
    thread.start();
    assert!(thread.is_running());

    thread.exit(0);
    assert!(thread.wait(Some(Duration::from_secs(5))));
    assert!(!thread.is_running());
}

#[test]
fn wait_times_out_while_the_loop_runs() {
    init();

    let thread = Thread::new();
    thread.start();

    assert!(!thread.wait(Some(Duration::from_millis(50))));
    assert!(thread.is_running());

    thread.exit(0);
    assert!(thread.wait(None));
}

#[test]
fn finished_is_emitted_by_the_worker() {
    init();

    let thread = Thread::new();
    let hits = Hits::new();
    let slot_hits = Arc::clone(&hits);
    thread.finished().connect_free(move |()| slot_hits.hit());

    thread.start();
    thread.exit(0);
    assert!(thread.wait(Some(Duration::from_secs(5))));
    hits.wait(1);
    assert_eq!(hits.count(), 1);
}

#[test]
fn delete_later_from_a_foreign_thread() {
    let worker = Worker::start();

    let object = Object::new();
    object.move_to_thread(&worker.thread);

    let signal: Signal<()> = Signal::new();
    let hits = Hits::new();
    let slot_hits = Arc::clone(&hits);
    signal.connect(&object, move |()| slot_hits.hit());

    signal.emit(());
    hits.wait(1);

    // Destroy the object from this thread; the teardown runs on the worker.
    delete_later(object);
    // Once a blocking round-trip completes, the deferred-deletion message has
    // been dispatched.
    worker.run(|| {});

    signal.emit(());
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(hits.count(), 1);

    worker.stop();
}

#[test]
fn objects_with_a_parent_cannot_move() {
    let worker = Worker::start();

    let parent = Object::new();
    let child = Object::with_parent(&parent);
    child.move_to_thread(&worker.thread);

    // The move was rejected: an Auto invocation still runs synchronously on
    // this thread.
    let tid = Arc::new(AtomicU64::new(0));
    let invoke_tid = Arc::clone(&tid);
    child.invoke(ConnectionType::Auto, move || {
        invoke_tid.store(Thread::current_id(), Ordering::SeqCst);
    });
    assert_eq!(tid.load(Ordering::SeqCst), Thread::current_id());

    worker.stop();
}

#[test]
fn moves_are_rejected_from_foreign_threads() {
    let worker = Worker::start();
    let other = Worker::start();
    let worker_tid = worker.tid();

    let object = Object::new();
    object.move_to_thread(&worker.thread);

    // This thread no longer owns the object, so a second move is rejected.
    object.move_to_thread(&other.thread);

    let tid = Arc::new(AtomicU64::new(0));
    let hits = Hits::new();
    let invoke_tid = Arc::clone(&tid);
    let invoke_hits = Arc::clone(&hits);
    object.invoke(ConnectionType::Queued, move || {
        invoke_tid.store(Thread::current_id(), Ordering::SeqCst);
        invoke_hits.hit();
    });
    hits.wait(1);
    assert_eq!(tid.load(Ordering::SeqCst), worker_tid);

    drop(object);
    worker.stop();
    other.stop();
}

#[test]
fn subtree_moves_with_its_root() {
    let worker = Worker::start();
    let worker_tid = worker.tid();

    let parent = Object::new();
    let child = Object::with_parent(&parent);
    parent.move_to_thread(&worker.thread);

    let tid = Arc::new(AtomicU64::new(0));
    let hits = Hits::new();
    let invoke_tid = Arc::clone(&tid);
    let invoke_hits = Arc::clone(&hits);
    child.invoke(ConnectionType::Queued, move || {
        invoke_tid.store(Thread::current_id(), Ordering::SeqCst);
        invoke_hits.hit();
    });
    hits.wait(1);
    assert_eq!(tid.load(Ordering::SeqCst), worker_tid);

    drop(child);
    drop(parent);
    worker.stop();
}
