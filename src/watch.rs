// src/watch.rs

//! Per-(epoll, descriptor) subscription records and the readiness
//! evaluator.

use crate::descriptor::{Descriptor, DescriptorHandle, Status};
use crate::event::{Event, EventFlags};
use bitflags::bitflags;
use std::cell::Cell;
use std::rc::Rc;

bitflags! {
    /// Cached view of one watch.
    ///
    /// The status- and subscription-derived bits are rebuilt from fresh
    /// inputs on every [`Watch::refresh`]; the sticky bits survive
    /// refreshes and are owned by the collection and deletion paths.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct WatchFlags: u16 {
        /// The watched descriptor is initialized and operational.
        const ACTIVE = 1 << 0;
        /// The watched descriptor is readable.
        const READABLE = 1 << 1;
        /// The subscription asks for read events.
        const WAITING_READ = 1 << 2;
        /// Readability flipped since the last collection.
        const READ_CHANGED = 1 << 3;
        /// The watched descriptor is writable.
        const WRITABLE = 1 << 4;
        /// The subscription asks for write events.
        const WAITING_WRITE = 1 << 5;
        /// Writability flipped since the last collection.
        const WRITE_CHANGED = 1 << 6;
        /// The watched descriptor is closed.
        const CLOSED = 1 << 7;
        /// The watch is still present in its owner's table. Cleared on
        /// DEL so a sweep that still holds a reference skips the record
        /// instead of paying O(n) removal from an in-flight iteration.
        const WATCHING = 1 << 8;
        /// Edge-triggered reporting requested.
        const EDGE = 1 << 9;
        /// An edge-triggered event was delivered and nothing has changed
        /// since.
        const EDGE_REPORTED = 1 << 10;
        /// One-shot reporting requested.
        const ONESHOT = 1 << 11;
        /// The one-shot event was delivered; suppress until the next MOD.
        const ONESHOT_REPORTED = 1 << 12;
    }
}

/// Flags that survive a refresh.
const STICKY: WatchFlags = WatchFlags::READ_CHANGED
    .union(WatchFlags::WRITE_CHANGED)
    .union(WatchFlags::WATCHING)
    .union(WatchFlags::EDGE_REPORTED)
    .union(WatchFlags::ONESHOT_REPORTED);

/// One watched descriptor inside one epoll instance.
///
/// The watch strongly owns its descriptor; the owning table strongly owns
/// the watch. A sweep may hold an extra reference across a deferred
/// notification, which is why deletion is a flag (`WATCHING`) rather than
/// eager destruction.
pub(crate) struct Watch {
    descriptor: Rc<dyn Descriptor>,
    subscription: Cell<Event>,
    flags: Cell<WatchFlags>,
}

impl Watch {
    pub(crate) fn new(descriptor: Rc<dyn Descriptor>, subscription: Event) -> Self {
        Self {
            descriptor,
            subscription: Cell::new(subscription),
            flags: Cell::new(WatchFlags::empty()),
        }
    }

    pub(crate) fn descriptor(&self) -> &Rc<dyn Descriptor> {
        &self.descriptor
    }

    pub(crate) fn handle(&self) -> DescriptorHandle {
        self.descriptor.base().handle()
    }

    pub(crate) fn is_watching(&self) -> bool {
        self.flags.get().contains(WatchFlags::WATCHING)
    }

    pub(crate) fn set_watching(&self, on: bool) {
        let mut flags = self.flags.get();
        flags.set(WatchFlags::WATCHING, on);
        self.flags.set(flags);
    }

    /// Replace the subscription and re-arm edge/one-shot reporting, as a
    /// MOD operation requires.
    pub(crate) fn set_subscription(&self, subscription: Event) {
        self.subscription.set(subscription);
        let mut flags = self.flags.get();
        flags.remove(WatchFlags::EDGE_REPORTED | WatchFlags::ONESHOT_REPORTED);
        self.flags.set(flags);
    }

    /// Rebuild the status- and subscription-derived flags from fresh
    /// inputs, preserving the sticky ones. Observed transitions of the
    /// readable/writable bits are latched into the change flags here, so
    /// a flip is captured even when the evaluator is the only observer.
    fn refresh(&self) {
        let old = self.flags.get();
        let mut flags = old & STICKY;

        let status = self.descriptor.base().status();
        flags.set(WatchFlags::ACTIVE, status.contains(Status::ACTIVE));
        flags.set(WatchFlags::READABLE, status.contains(Status::READABLE));
        flags.set(WatchFlags::WRITABLE, status.contains(Status::WRITABLE));
        flags.set(WatchFlags::CLOSED, status.contains(Status::CLOSED));

        let interest = self.subscription.get().flags;
        flags.set(WatchFlags::WAITING_READ, interest.contains(EventFlags::IN));
        flags.set(WatchFlags::WAITING_WRITE, interest.contains(EventFlags::OUT));
        flags.set(WatchFlags::EDGE, interest.contains(EventFlags::ET));
        flags.set(WatchFlags::ONESHOT, interest.contains(EventFlags::ONESHOT));

        if old.contains(WatchFlags::READABLE) != flags.contains(WatchFlags::READABLE) {
            flags.insert(WatchFlags::READ_CHANGED);
        }
        if old.contains(WatchFlags::WRITABLE) != flags.contains(WatchFlags::WRITABLE) {
            flags.insert(WatchFlags::WRITE_CHANGED);
        }

        self.flags.set(flags);
    }

    /// Decide whether this watch currently has a reportable event.
    ///
    /// Level-triggered mode reports any candidate; edge-triggered mode
    /// reports a candidate only when its level changed, except that the
    /// first event after ADD/MOD is always delivered; one-shot suppresses
    /// everything after the first delivery until the next MOD.
    pub(crate) fn is_ready(&self) -> bool {
        self.refresh();
        let flags = self.flags.get();

        // Closed, uninitialized, or lazily deleted: never reportable.
        if flags.contains(WatchFlags::CLOSED)
            || !flags.contains(WatchFlags::ACTIVE)
            || !flags.contains(WatchFlags::WATCHING)
        {
            return false;
        }

        let has_read = flags.contains(WatchFlags::READABLE | WatchFlags::WAITING_READ);
        let has_write = flags.contains(WatchFlags::WRITABLE | WatchFlags::WAITING_WRITE);

        let mut ready = if flags.contains(WatchFlags::EDGE) {
            (has_read
                && (flags.contains(WatchFlags::READ_CHANGED)
                    || !flags.contains(WatchFlags::EDGE_REPORTED)))
                || (has_write
                    && (flags.contains(WatchFlags::WRITE_CHANGED)
                        || !flags.contains(WatchFlags::EDGE_REPORTED)))
        } else {
            has_read || has_write
        };

        if ready && flags.contains(WatchFlags::ONESHOT | WatchFlags::ONESHOT_REPORTED) {
            ready = false;
        }

        ready
    }

    /// Build the event to report for a ready watch and update the sticky
    /// reporting state: the change bits are consumed, and edge/one-shot
    /// delivery is latched.
    ///
    /// Both ready directions merge into the single reported event.
    pub(crate) fn collect_event(&self) -> Event {
        let mut flags = self.flags.get();

        let mut reported = EventFlags::empty();
        if flags.contains(WatchFlags::READABLE | WatchFlags::WAITING_READ) {
            reported |= EventFlags::IN;
        }
        if flags.contains(WatchFlags::WRITABLE | WatchFlags::WAITING_WRITE) {
            reported |= EventFlags::OUT;
        }
        if flags.contains(WatchFlags::EDGE) {
            reported |= EventFlags::ET;
        }

        flags.remove(WatchFlags::READ_CHANGED | WatchFlags::WRITE_CHANGED);
        if flags.contains(WatchFlags::EDGE) {
            flags.insert(WatchFlags::EDGE_REPORTED);
        }
        if flags.contains(WatchFlags::ONESHOT) {
            flags.insert(WatchFlags::ONESHOT_REPORTED);
        }
        self.flags.set(flags);

        Event::new(reported, self.subscription.get().data)
    }
}
