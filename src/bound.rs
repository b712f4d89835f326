use std::sync::Arc;

use crate::message::Message;
use crate::object::ObjectCore;
use crate::sync::Semaphore;

/// Connection type for asynchronous communication.
///
/// Describes the possible types of delivery between a sender and a receiver.
/// It applies to [`Signal::emit`] and [`Object::invoke`].
///
/// [`Signal::emit`]: crate::Signal::emit
/// [`Object::invoke`]: crate::Object::invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    /// If the sender and the receiver live in the same thread,
    /// [`Direct`] is used. Otherwise [`Queued`] is used.
    ///
    /// [`Direct`]: ConnectionType::Direct
    /// [`Queued`]: ConnectionType::Queued
    Auto,
    /// The receiver is invoked immediately and synchronously in the sender's
    /// thread.
    Direct,
    /// The receiver is invoked asynchronously in its thread when control
    /// returns to the thread's event loop. The sender proceeds without
    /// waiting for the invocation to complete.
    Queued,
    /// If the sender and the receiver live in the same thread, this is
    /// equivalent to [`Direct`]. Otherwise, the receiver is invoked
    /// asynchronously in its thread and the sender blocks until the receiver
    /// signals the completion of the invocation.
    ///
    /// [`Direct`]: ConnectionType::Direct
    Blocking,
}

/// Deliver a one-shot invocation to `receiver` according to `ct`.
///
/// This is the single activation entry point shared by signal emission and
/// [`Object::invoke`]. The receiver's thread affinity is read without a lock
/// held across the delivery; re-homing an object concurrently with activations
/// targeting it is a caller bug.
///
/// [`Object::invoke`]: crate::Object::invoke
pub(crate) fn activate(
    receiver: &Arc<ObjectCore>,
    ct: ConnectionType,
    call: Box<dyn FnOnce() + Send>,
) {
    let thread = receiver.thread();

    let resolved = match ct {
        ConnectionType::Auto => {
            if thread.is_current() {
                ConnectionType::Direct
            } else {
                ConnectionType::Queued
            }
        }
        ConnectionType::Blocking if thread.is_current() => ConnectionType::Direct,
        other => other,
    };

    match resolved {
        ConnectionType::Auto | ConnectionType::Direct => call(),
        ConnectionType::Queued => {
            thread.post(Message::invoke(call, None), receiver);
        }
        ConnectionType::Blocking => {
            let semaphore = Arc::new(Semaphore::new(0));
            thread.post(
                Message::invoke(call, Some(Arc::clone(&semaphore))),
                receiver,
            );
            semaphore.acquire(1);
        }
    }
}
