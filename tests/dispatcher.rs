use std::sync::Arc;
use std::time::{Duration, Instant};

use evio::{ConnectionType, EventDispatcher, Object, Thread};

mod util;

use util::{assert_send, assert_sync, init, Hits, Worker};

#[test]
fn is_send_and_sync() {
    assert_send::<EventDispatcher>();
    assert_sync::<EventDispatcher>();
}

#[test]
fn interrupt_unblocks_a_parked_dispatcher() {
    init();

    let thread = Thread::new();
    thread.start();

    // Give the worker time to park in poll with nothing to watch.
    std::thread::sleep(Duration::from_millis(50));

    // exit() interrupts the dispatcher; the loop observes the request and
    // terminates well before any poll timeout could.
    let started = Instant::now();
    thread.exit(0);
    assert!(thread.wait(Some(Duration::from_secs(5))));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn spurious_interrupts_are_drained() {
    let worker = Worker::start();

    for _ in 0..16 {
        worker.thread.event_dispatcher().interrupt();
    }

    // The loop keeps functioning: a queued invocation still gets through.
    let hits = Hits::new();
    let object = Object::new();
    object.move_to_thread(&worker.thread);
    let invoke_hits = Arc::clone(&hits);
    object.invoke(ConnectionType::Queued, move || invoke_hits.hit());
    hits.wait(1);

    drop(object);
    worker.stop();
}

#[test]
fn process_events_is_rejected_off_thread() {
    let worker = Worker::start();

    // Logged and ignored; the worker's dispatcher state is untouched and the
    // loop stays healthy.
    worker.thread.event_dispatcher().process_events();

    let hits = Hits::new();
    let run_hits = Arc::clone(&hits);
    worker.run(move || run_hits.hit());
    assert_eq!(hits.count(), 1);

    worker.stop();
}
