//! evio is a lightweight object and event runtime for building
//! multi-threaded reactive systems.
//!
//! It provides a per-thread event loop multiplexing file descriptor readiness
//! and timer expiry over `poll(2)`, an object model with parent/child
//! ownership and thread affinity, typed multicast [`Signal`]s with
//! configurable synchronous or cross-thread queued delivery, and
//! affinity-based message passing between threads.
//!
//! # Usage
//!
//! Applications construct [`Object`]s, wire [`Signal`]s to slots, start
//! [`Thread`]s and submit work by emitting signals, by invoking closures
//! through [`Object::invoke`], or by registering [`EventNotifier`]s and
//! [`Timer`]s. Each started thread loops between draining its mailbox and
//! running one [`EventDispatcher`] iteration; slots bound to an object run on
//! that object's thread.
//!
//! ```no_run
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//!
//! use evio::{Object, Signal, Thread};
//!
//! let worker = Thread::new();
//! worker.start();
//!
//! // An object affine to the current thread, and one handed to the worker.
//! let receiver = Object::new();
//! receiver.move_to_thread(&worker);
//!
//! let hits = Arc::new(AtomicU32::new(0));
//! let signal: Signal<u32> = Signal::new();
//!
//! // The slot runs on `worker`, because that is where `receiver` lives.
//! let slot_hits = Arc::clone(&hits);
//! signal.connect(&receiver, move |value| {
//!     slot_hits.fetch_add(value, Ordering::SeqCst);
//! });
//!
//! signal.emit(2);
//!
//! worker.exit(0);
//! worker.wait(None);
//! ```
//!
//! # Threading model
//!
//! Every object belongs to exactly one thread at a time. Emission resolves
//! the [`ConnectionType`] policy against the receiver's thread: same-thread
//! delivery is a plain call, cross-thread delivery enqueues a message on the
//! receiver's mailbox and interrupts its dispatcher. Objects are destroyed on
//! their own thread, either by dropping them there or with [`delete_later`]
//! from anywhere.
//!
//! # Portability
//!
//! evio runs on Unix systems providing `poll(2)`. The dispatcher's wakeup
//! descriptor uses `eventfd(2)` where available and a pipe elsewhere.

#![deny(missing_docs)]
#![deny(missing_debug_implementations)]

mod sys;

mod bound;
mod dispatcher;
mod message;
mod notifier;
mod object;
mod signal;
mod sync;
mod thread;
mod timer;

pub use crate::bound::ConnectionType;
pub use crate::dispatcher::EventDispatcher;
pub use crate::message::{Message, MessageType};
pub use crate::notifier::{EventNotifier, NotifierType};
pub use crate::object::{delete_later, Object};
pub use crate::signal::{ConnectionId, Signal};
pub use crate::sync::Semaphore;
pub use crate::thread::Thread;
pub use crate::timer::Timer;
