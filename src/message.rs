use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use crate::object::ObjectCore;
use crate::sync::Semaphore;

/// First message type value available to applications.
const USER_TYPE_BASE: u32 = 1000;

static NEXT_USER_TYPE: AtomicU32 = AtomicU32::new(USER_TYPE_BASE);

/// The type of a [`Message`], usable as a dispatch filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// A queued slot or method invocation.
    Invoke,
    /// Notification that the receiver was re-homed to another thread.
    ThreadMove,
    /// Deferred destruction of the receiver on its own thread.
    DeferredDelete,
    /// An application-defined message, tagged with a value from
    /// [`Message::register_type`].
    User(u32),
}

/// A unit deliverable into an object's mailbox.
///
/// Messages are posted with [`Object::post_message`] (or internally by queued
/// signal delivery, [`delete_later`] and thread moves) and handed to the
/// receiver's message handler when its thread's event loop dispatches them.
///
/// [`Object::post_message`]: crate::Object::post_message
/// [`delete_later`]: crate::delete_later
pub struct Message {
    pub(crate) kind: Kind,
    /// Set when the message is enqueued.
    pub(crate) receiver: Weak<ObjectCore>,
}

pub(crate) enum Kind {
    Invoke {
        call: Option<Box<dyn FnOnce() + Send>>,
        /// Completion semaphore for blocking delivery. Released after the
        /// invocation runs, or on drop if the message never gets delivered,
        /// so a blocked sender is not stranded by receiver teardown.
        semaphore: Option<Arc<Semaphore>>,
    },
    ThreadMove,
    DeferredDelete {
        object: Option<Box<dyn Any + Send>>,
    },
    User(u32),
}

impl Message {
    /// Create an application-defined message. `tag` is normally obtained from
    /// [`Message::register_type`].
    pub fn user(tag: u32) -> Message {
        Message {
            kind: Kind::User(tag),
            receiver: Weak::new(),
        }
    }

    /// Reserve and return a new unique user message type.
    pub fn register_type() -> u32 {
        NEXT_USER_TYPE.fetch_add(1, Ordering::Relaxed)
    }

    /// Retrieve the message type.
    pub fn message_type(&self) -> MessageType {
        match self.kind {
            Kind::Invoke { .. } => MessageType::Invoke,
            Kind::ThreadMove => MessageType::ThreadMove,
            Kind::DeferredDelete { .. } => MessageType::DeferredDelete,
            Kind::User(tag) => MessageType::User(tag),
        }
    }

    pub(crate) fn invoke(
        call: Box<dyn FnOnce() + Send>,
        semaphore: Option<Arc<Semaphore>>,
    ) -> Message {
        Message {
            kind: Kind::Invoke {
                call: Some(call),
                semaphore,
            },
            receiver: Weak::new(),
        }
    }

    pub(crate) fn thread_move() -> Message {
        Message {
            kind: Kind::ThreadMove,
            receiver: Weak::new(),
        }
    }

    pub(crate) fn deferred_delete(object: Box<dyn Any + Send>) -> Message {
        Message {
            kind: Kind::DeferredDelete {
                object: Some(object),
            },
            receiver: Weak::new(),
        }
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        // An Invoke message destroyed before delivery still completes its
        // blocking sender.
        if let Kind::Invoke {
            semaphore: Some(semaphore),
            ..
        } = &self.kind
        {
            semaphore.release(1);
        }
    }
}

impl Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("type", &self.message_type())
            .finish()
    }
}
