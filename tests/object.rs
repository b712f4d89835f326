use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use evio::{ConnectionType, Message, Object, Signal};

mod util;

use util::init;

#[test]
fn direct_invoke_runs_synchronously() {
    init();

    let object = Object::new();
    let hits = Arc::new(AtomicUsize::new(0));

    let invoke_hits = Arc::clone(&hits);
    object.invoke(ConnectionType::Direct, move || {
        invoke_hits.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // Auto on the object's own thread is direct as well.
    let invoke_hits = Arc::clone(&hits);
    object.invoke(ConnectionType::Auto, move || {
        invoke_hits.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn parent_teardown_severs_child_connections() {
    init();

    let parent = Object::new();
    let child = Object::with_parent(&parent);
    let grandchild = Object::with_parent(&child);

    let signal: Signal<()> = Signal::new();
    let hits = Arc::new(AtomicUsize::new(0));
    for receiver in [&child, &grandchild] {
        let hits = Arc::clone(&hits);
        signal.connect(receiver, move |()| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
    }

    signal.emit(());
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    // Destroying the parent tears down the whole subtree before returning.
    drop(parent);
    signal.emit(());
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn dropping_a_child_detaches_it_from_the_parent() {
    init();

    let parent = Object::new();
    let child = Object::with_parent(&parent);

    let signal: Signal<()> = Signal::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let slot_hits = Arc::clone(&hits);
    signal.connect(&parent, move |()| {
        slot_hits.fetch_add(1, Ordering::SeqCst);
    });

    drop(child);
    drop(parent);

    signal.emit(());
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn registered_user_types_are_unique() {
    init();

    let first = Message::register_type();
    let second = Message::register_type();
    assert_ne!(first, second);
    assert!(first >= 1000);

    let msg = Message::user(first);
    assert_eq!(msg.message_type(), evio::MessageType::User(first));
}
