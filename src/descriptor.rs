// src/descriptor.rs

//! Virtual descriptor plumbing consumed by the epoll core.
//!
//! A virtual descriptor is a simulator-managed I/O handle whose readiness
//! is driven by simulated events rather than the kernel. The epoll core
//! needs only the pieces defined here: the status bits, a stable handle,
//! and listener registration for status changes. Concrete descriptor
//! types embed a [`DescriptorBase`] and expose it through the
//! [`Descriptor`] trait; the epoll instance itself is such a type, which
//! is what makes nesting one epoll inside another work.

use bitflags::bitflags;
use log::trace;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Stable identifier of a descriptor within its owning process.
pub type DescriptorHandle = i32;

bitflags! {
    /// Current status of a virtual descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Status: u8 {
        /// The descriptor is initialized and operational.
        const ACTIVE = 1 << 0;
        /// The descriptor has data available to read.
        const READABLE = 1 << 1;
        /// The descriptor can accept writes.
        const WRITABLE = 1 << 2;
        /// The descriptor has been closed by its owner.
        const CLOSED = 1 << 3;
    }
}

/// Receiver of descriptor status-change callbacks.
///
/// Listeners are invoked synchronously from
/// [`DescriptorBase::adjust_status`] whenever a status bit actually
/// flips. A listener must not re-enter `control` for the watch that the
/// change belongs to.
pub trait StatusListener {
    fn status_changed(&self, handle: DescriptorHandle);
}

/// State embedded in every virtual descriptor.
///
/// Listeners are held as non-owning `Weak` references keyed by pointer
/// identity, so a descriptor never keeps its watchers alive and the
/// watcher/descriptor relation stays acyclic even though each side can
/// reach the other.
pub struct DescriptorBase {
    handle: DescriptorHandle,
    status: Cell<Status>,
    listeners: RefCell<Vec<(usize, Weak<dyn StatusListener>)>>,
}

impl DescriptorBase {
    pub fn new(handle: DescriptorHandle) -> Self {
        Self {
            handle,
            status: Cell::new(Status::empty()),
            listeners: RefCell::new(Vec::new()),
        }
    }

    pub fn handle(&self) -> DescriptorHandle {
        self.handle
    }

    pub fn status(&self) -> Status {
        self.status.get()
    }

    /// Set or clear the given status bits, notifying every live listener
    /// if the effective status actually changed.
    pub fn adjust_status(&self, bits: Status, on: bool) {
        let old = self.status.get();
        let mut status = old;
        status.set(bits, on);
        if status == old {
            return;
        }
        self.status.set(status);
        trace!(
            "descriptor {}: status {:?} -> {:?}",
            self.handle,
            old,
            status
        );

        // Snapshot before invoking callbacks: a listener may unsubscribe
        // (or subscribe) while being notified. Dead entries are pruned on
        // the way through.
        let mut live = Vec::new();
        self.listeners.borrow_mut().retain(|(_, weak)| match weak.upgrade() {
            Some(listener) => {
                live.push(listener);
                true
            }
            None => false,
        });
        for listener in live {
            listener.status_changed(self.handle);
        }
    }

    /// Subscribe `listener` to status changes. Subscribing the same
    /// listener twice is a no-op.
    pub fn add_listener(&self, listener: &Rc<dyn StatusListener>) {
        let key = listener_key(listener);
        let mut listeners = self.listeners.borrow_mut();
        if listeners.iter().any(|(k, _)| *k == key) {
            return;
        }
        listeners.push((key, Rc::downgrade(listener)));
    }

    /// Remove `listener` from the subscription list, by identity.
    pub fn remove_listener(&self, listener: &Rc<dyn StatusListener>) {
        let key = listener_key(listener);
        self.listeners.borrow_mut().retain(|(k, _)| *k != key);
    }
}

/// A simulator object that an epoll instance can watch.
pub trait Descriptor {
    /// The embedded descriptor state.
    fn base(&self) -> &DescriptorBase;
}

fn listener_key(listener: &Rc<dyn StatusListener>) -> usize {
    Rc::as_ptr(listener) as *const () as usize
}
