use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use evio::{EventNotifier, NotifierType, Object, Thread};

mod util;

use util::{Hits, Worker};

fn pipe() -> (RawFd, RawFd) {
    let mut fds = [0; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    (fds[0], fds[1])
}

fn write_byte(fd: RawFd) {
    assert_eq!(unsafe { libc::write(fd, [1u8].as_ptr() as *const _, 1) }, 1);
}

fn read_byte(fd: RawFd) {
    let mut buf = [0u8];
    assert_eq!(unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, 1) }, 1);
}

fn close(fd: RawFd) {
    unsafe { libc::close(fd) };
}

type Held = Arc<Mutex<Vec<(EventNotifier, Object)>>>;

fn held() -> Held {
    Arc::new(Mutex::new(Vec::new()))
}

#[test]
fn readable_descriptor_activates_the_notifier() {
    let worker = Worker::start();
    let (r, w) = pipe();
    let holder = held();
    let hits = Hits::new();

    let run_holder = Arc::clone(&holder);
    let run_hits = Arc::clone(&hits);
    worker.run(move || {
        let notifier = EventNotifier::new(r, NotifierType::Read);
        assert!(notifier.is_enabled());
        let receiver = Object::new();
        let slot_hits = Arc::clone(&run_hits);
        notifier.activated().connect(&receiver, move |()| {
            read_byte(r);
            slot_hits.hit();
        });
        run_holder.lock().unwrap().push((notifier, receiver));
    });

    write_byte(w);
    hits.wait(1);

    // Level-triggered: with the byte consumed there is nothing left to
    // observe, so the notifier stays quiet.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(hits.count(), 1);

    write_byte(w);
    hits.wait(2);

    let run_holder = Arc::clone(&holder);
    worker.run(move || run_holder.lock().unwrap().clear());
    worker.stop();
    close(r);
    close(w);
}

#[test]
fn notifier_disabled_by_a_sibling_slot_does_not_fire() {
    let worker = Worker::start();
    let (r1, w1) = pipe();
    let (r2, w2) = pipe();
    let holder = held();
    let hits = Hits::new();

    // Both descriptors are readable before the first poll iteration.
    write_byte(w1);
    write_byte(w2);

    let run_holder = Arc::clone(&holder);
    let run_hits = Arc::clone(&hits);
    worker.run(move || {
        let mut held = run_holder.lock().unwrap();
        for (index, fd) in [r1, r2].into_iter().enumerate() {
            let notifier = EventNotifier::new(fd, NotifierType::Read);
            let receiver = Object::new();
            let slot_hits = Arc::clone(&run_hits);
            let siblings = Arc::clone(&run_holder);
            notifier.activated().connect(&receiver, move |()| {
                read_byte(fd);
                // Disable the other notifier; if it has not fired yet in
                // this iteration, it must not fire at all.
                let siblings = siblings.lock().unwrap();
                siblings[1 - index].0.set_enabled(false);
                slot_hits.hit();
            });
            held.push((notifier, receiver));
        }
    });

    hits.wait(1);
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(hits.count(), 1);

    // Re-enable the loser; its byte is still pending, so it fires now.
    let run_holder = Arc::clone(&holder);
    worker.run(move || {
        for (notifier, _) in run_holder.lock().unwrap().iter() {
            if !notifier.is_enabled() {
                notifier.set_enabled(true);
            }
        }
    });

    hits.wait(2);
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(hits.count(), 2);

    let run_holder = Arc::clone(&holder);
    worker.run(move || run_holder.lock().unwrap().clear());
    worker.stop();
    for fd in [r1, w1, r2, w2] {
        close(fd);
    }
}

#[test]
fn duplicate_registration_is_rejected() {
    let worker = Worker::start();
    let (r, w) = pipe();
    let holder = held();
    let hits = Hits::new();

    let run_holder = Arc::clone(&holder);
    let run_hits = Arc::clone(&hits);
    worker.run(move || {
        let mut held = run_holder.lock().unwrap();

        let first = EventNotifier::new(r, NotifierType::Read);
        let receiver = Object::new();
        let slot_hits = Arc::clone(&run_hits);
        first.activated().connect(&receiver, move |()| {
            read_byte(r);
            slot_hits.hit();
        });
        held.push((first, receiver));

        // Second notifier for the same (fd, type) pair: logged and ignored.
        let second = EventNotifier::new(r, NotifierType::Read);
        let receiver = Object::new();
        let slot_hits = Arc::clone(&run_hits);
        second.activated().connect(&receiver, move |()| {
            slot_hits.hit();
        });
        held.push((second, receiver));
    });

    write_byte(w);
    hits.wait(1);
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(hits.count(), 1);

    let run_holder = Arc::clone(&holder);
    worker.run(move || run_holder.lock().unwrap().clear());
    worker.stop();
    close(r);
    close(w);
}

#[test]
fn disabled_notifier_ignores_events() {
    let worker = Worker::start();
    let (r, w) = pipe();
    let holder = held();
    let hits = Hits::new();

    let run_holder = Arc::clone(&holder);
    let run_hits = Arc::clone(&hits);
    worker.run(move || {
        let notifier = EventNotifier::new(r, NotifierType::Read);
        notifier.set_enabled(false);
        assert!(!notifier.is_enabled());
        let receiver = Object::new();
        let slot_hits = Arc::clone(&run_hits);
        notifier.activated().connect(&receiver, move |()| {
            read_byte(r);
            slot_hits.hit();
        });
        run_holder.lock().unwrap().push((notifier, receiver));
    });

    write_byte(w);
    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(hits.count(), 0);

    let run_holder = Arc::clone(&holder);
    worker.run(move || {
        run_holder.lock().unwrap()[0].0.set_enabled(true);
    });
    hits.wait(1);

    let run_holder = Arc::clone(&holder);
    worker.run(move || run_holder.lock().unwrap().clear());
    worker.stop();
    close(r);
    close(w);
}

#[test]
fn enabled_notifier_follows_its_object_across_threads() {
    let first = Worker::start();
    let second = Worker::start();
    let first_tid = first.tid();
    let second_tid = second.tid();

    let (r, w) = pipe();
    let holder: Arc<Mutex<Vec<EventNotifier>>> = Arc::new(Mutex::new(Vec::new()));
    let hits = Hits::new();
    let seen_tid = Arc::new(AtomicU64::new(0));

    let run_holder = Arc::clone(&holder);
    let run_hits = Arc::clone(&hits);
    let run_tid = Arc::clone(&seen_tid);
    first.run(move || {
        let notifier = EventNotifier::new(r, NotifierType::Read);
        let slot_hits = Arc::clone(&run_hits);
        let slot_tid = run_tid;
        notifier.activated().connect_free(move |()| {
            read_byte(r);
            slot_tid.store(Thread::current_id(), Ordering::SeqCst);
            slot_hits.hit();
        });
        run_holder.lock().unwrap().push(notifier);
    });

    write_byte(w);
    hits.wait(1);
    assert_eq!(seen_tid.load(Ordering::SeqCst), first_tid);

    // Re-home the notifier; it transparently re-registers with the
    // destination dispatcher.
    let run_holder = Arc::clone(&holder);
    let target = Arc::clone(&second.thread);
    first.run(move || {
        run_holder.lock().unwrap()[0].move_to_thread(&target);
    });
    // A round-trip through the destination loop guarantees the queued
    // re-enable has run.
    second.run(|| {});

    write_byte(w);
    hits.wait(2);
    assert_eq!(seen_tid.load(Ordering::SeqCst), second_tid);

    let run_holder = Arc::clone(&holder);
    second.run(move || run_holder.lock().unwrap().clear());
    first.stop();
    second.stop();
    close(r);
    close(w);
}
