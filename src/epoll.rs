// src/epoll.rs

//! The virtual epoll instance: watch bookkeeping, readiness notification
//! scheduling, and event collection.
//!
//! One `Epoll` belongs to exactly one process on one simulated host.
//! Readiness of watched virtual descriptors arrives through status-change
//! callbacks; descriptors the simulator does not virtualize are delegated
//! to a kernel epoll instance (see [`crate::os`]). Three flags drive the
//! notification state machine:
//!
//! - `SCHEDULED`: a notify task sits in the scheduler queue. At most one
//!   exists at any time.
//! - `NOTIFYING`: the process continuation is running on behalf of this
//!   epoll. Checks made while it runs return immediately; the post-
//!   continuation check re-arms if events remain.
//! - `CLOSED`: the application closed the epoll. Finalization happens
//!   right away when nothing is scheduled, otherwise when the in-flight
//!   task observes the flag.

use crate::descriptor::{
    Descriptor, DescriptorBase, DescriptorHandle, Status, StatusListener,
};
use crate::error::ControlError;
use crate::event::{ControlOp, Event};
use crate::os::OsMultiplexer;
use crate::sim::{Host, Process, Scheduler, Task, NOTIFY_DELAY};
use crate::table::WatchTable;
use crate::watch::Watch;
use bitflags::bitflags;
use log::{debug, log_enabled, trace, warn, Level};
use std::cell::{Cell, RefCell};
use std::fmt::Write as _;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};

bitflags! {
    /// Notification state of one epoll instance.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct EpollFlags: u8 {
        /// A notify task is queued with the scheduler.
        const SCHEDULED = 1 << 0;
        /// The process continuation is currently running.
        const NOTIFYING = 1 << 1;
        /// The application closed the epoll; finalize once unscheduled.
        const CLOSED = 1 << 2;
    }
}

/// A virtualized epoll descriptor.
///
/// Create with [`Epoll::new`]; drive with [`Epoll::control`],
/// [`Epoll::collect_events`], [`Epoll::control_os`], and [`Epoll::close`].
/// Watched descriptors call back through the [`StatusListener`] impl.
pub struct Epoll {
    /// The epoll is itself a descriptor, permanently active, whose
    /// readable bit exposes nested readiness to a parent epoll.
    base: DescriptorBase,
    flags: Cell<EpollFlags>,
    watching: RefCell<WatchTable>,
    /// Kernel instance for OS passthrough. `None` when creation failed;
    /// taken (and thereby closed) on finalization.
    os: RefCell<Option<OsMultiplexer>>,
    owner: Rc<dyn Process>,
    scheduler: Rc<dyn Scheduler>,
    host: Rc<dyn Host>,
    finalized: Cell<bool>,
    self_ref: Weak<Epoll>,
}

impl Epoll {
    /// Create an epoll descriptor owned by `process` on `host`.
    ///
    /// Creation happens as the result of an application syscall, so the
    /// calling process is the owner. Failure to create the kernel
    /// passthrough instance is tolerated: virtual multiplexing still
    /// works, and OS operations report the failure.
    pub fn new(
        handle: DescriptorHandle,
        process: Rc<dyn Process>,
        scheduler: Rc<dyn Scheduler>,
        host: Rc<dyn Host>,
    ) -> Rc<Self> {
        let os = match OsMultiplexer::new() {
            Ok(os) => Some(os),
            Err(err) => {
                warn!("epoll {}: failed to create OS multiplexer: {}", handle, err);
                None
            }
        };

        let epoll = Rc::new_cyclic(|self_ref| Epoll {
            base: DescriptorBase::new(handle),
            flags: Cell::new(EpollFlags::empty()),
            watching: RefCell::new(WatchTable::new()),
            os: RefCell::new(os),
            owner: process,
            scheduler,
            host,
            finalized: Cell::new(false),
            self_ref: self_ref.clone(),
        });

        // The epoll descriptor itself can always be polled.
        epoll.base.adjust_status(Status::ACTIVE, true);

        epoll
    }

    pub fn handle(&self) -> DescriptorHandle {
        self.base.handle()
    }

    /// Register, update, or remove interest in a virtual descriptor.
    pub fn control(
        &self,
        op: ControlOp,
        descriptor: Rc<dyn Descriptor>,
        event: Event,
    ) -> Result<(), ControlError> {
        let handle = descriptor.base().handle();
        debug!("epoll {}: {} descriptor {}", self.handle(), op, handle);

        match op {
            ControlOp::Add => {
                if self.watching.borrow().get(handle).is_some() {
                    return Err(ControlError::AlreadyExists);
                }

                let watch = Rc::new(Watch::new(Rc::clone(&descriptor), event));
                watch.set_watching(true);
                self.watching.borrow_mut().insert(handle, watch);

                // The new child must tell us about status changes.
                descriptor.base().add_listener(&self.as_listener());

                // The watched descriptor may already be ready.
                self.check();
            }
            ControlOp::Mod => {
                let watch = self
                    .watching
                    .borrow()
                    .get(handle)
                    .cloned()
                    .ok_or(ControlError::NotFound)?;
                assert!(watch.is_watching(), "modified watch is not in the table");

                // New subscription; edge/one-shot latches re-arm.
                watch.set_subscription(event);

                self.check();
            }
            ControlOp::Del => {
                let watch = self
                    .watching
                    .borrow_mut()
                    .remove(handle)
                    .ok_or(ControlError::NotFound)?;

                // Lazy deletion: a sweep still holding this watch sees
                // WATCHING cleared and skips it; the record is freed when
                // the last reference drops.
                watch.set_watching(false);
                watch.descriptor().base().remove_listener(&self.as_listener());
            }
        }

        Ok(())
    }

    /// Forward a control operation to the kernel multiplexer for a raw OS
    /// file descriptor the application owns. Errors carry the kernel
    /// errno unmodified.
    pub fn control_os(&self, op: ControlOp, fd: RawFd, event: Event) -> io::Result<()> {
        debug!("epoll {}: {} OS fd {}", self.handle(), op, fd);
        match self.os.borrow().as_ref() {
            Some(os) => os.ctl(op, fd, event),
            None => Err(io::Error::from_raw_os_error(libc::EBADF)),
        }
    }

    /// Collect pending events into `events`: ready virtual watches first,
    /// then — if space remains — kernel events from the passthrough
    /// multiplexer, appended verbatim.
    ///
    /// Returns the number of events written. A failed kernel wait is
    /// logged and swallowed: the virtual events are already in the buffer
    /// at that point. An empty buffer collects nothing and never touches
    /// the kernel.
    pub fn collect_events(&self, events: &mut [Event]) -> usize {
        let mut count = 0;

        {
            let table = self.watching.borrow();
            for watch in table.iter() {
                if count >= events.len() {
                    break;
                }
                if watch.is_ready() {
                    events[count] = watch.collect_event();
                    count += 1;
                }
            }
        }

        if count < events.len() {
            if let Some(os) = self.os.borrow().as_ref() {
                match os.wait(&mut events[count..]) {
                    Ok(n) => count += n,
                    Err(err) => {
                        warn!("epoll {}: OS event wait failed: {}", self.handle(), err);
                    }
                }
            }
        }

        debug!("epoll {}: collected {} events", self.handle(), count);

        // Consuming events may have cleared our own readability, or left
        // more to report.
        self.check();

        count
    }

    /// Application-facing close. Marks the instance closed; teardown
    /// happens now, or — when a notify task is queued or the continuation
    /// is running on our behalf — once the notify frame observes the
    /// flag.
    pub fn close(&self) {
        self.flags.set(self.flags.get() | EpollFlags::CLOSED);

        if !self
            .flags
            .get()
            .intersects(EpollFlags::SCHEDULED | EpollFlags::NOTIFYING)
        {
            self.finalize();
        }
    }

    /// Stop every watched descriptor from notifying this epoll. Called
    /// from finalization, and by host teardown when a whole descriptor
    /// table goes away.
    pub fn clear_watch_listeners(&self) {
        let listener = self.as_listener();
        for watch in self.watching.borrow().iter() {
            watch.descriptor().base().remove_listener(&listener);
        }
    }

    /// Tear down: detach from every watched descriptor, drop all watches
    /// (and with them their descriptor references), close the kernel
    /// multiplexer, and release the host's table entry. Idempotent.
    fn finalize(&self) {
        if self.finalized.replace(true) {
            return;
        }

        debug!("epoll {}: finalizing", self.handle());

        self.clear_watch_listeners();
        self.watching.borrow_mut().clear();

        // Dropping the kernel instance closes its fd.
        self.os.borrow_mut().take();

        self.host.close_descriptor(self.handle());
    }

    /// Re-derive readiness and arm a notification if one is needed.
    ///
    /// Returns immediately while closed or while the continuation runs:
    /// in both cases the needed re-check happens shortly (after close
    /// finalization, or when `try_notify` re-checks after the
    /// continuation returns).
    fn check(&self) {
        if self
            .flags
            .get()
            .intersects(EpollFlags::CLOSED | EpollFlags::NOTIFYING)
        {
            return;
        }

        let ready = self.has_ready_watch() || self.os_has_pending();

        // A parent epoll observes our readiness through the descriptor
        // bit.
        self.base.adjust_status(Status::READABLE, ready);

        // Re-read the flags: adjusting our status can run listener
        // callbacks that re-enter this epoll.
        if ready
            && !self.flags.get().contains(EpollFlags::SCHEDULED)
            && self.owner.wants_notify(self.handle())
        {
            let epoll = self.self_rc();
            let task = Task::new(move || epoll.try_notify());
            if self.scheduler.schedule(task, NOTIFY_DELAY) {
                self.flags.set(self.flags.get() | EpollFlags::SCHEDULED);
            }
        }
    }

    /// Deferred notification task.
    fn try_notify(&self) {
        // The scheduler just handed the task back; nothing is queued now.
        self.flags.set(self.flags.get() - EpollFlags::SCHEDULED);

        // A close that raced the queued task finalizes here.
        if self.flags.get().contains(EpollFlags::CLOSED) || !self.owner.is_running() {
            self.finalize();
            return;
        }

        // Arbitrary control operations and status changes may have
        // happened since scheduling; re-evaluate from scratch.
        if !(self.has_ready_watch() || self.os_has_pending()) {
            return;
        }

        assert!(
            self.owner.wants_notify(self.handle()),
            "notify ran for an epoll the process does not poll"
        );

        if log_enabled!(Level::Debug) {
            debug!(
                "epoll {}: child readiness before continuation:{}",
                self.handle(),
                self.children_status()
            );
        }

        // The continuation may re-enter control or collect_events on this
        // very epoll. NOTIFYING turns the checks those trigger into
        // no-ops, breaking what would otherwise be unbounded recursion
        // when continuation I/O changes descriptor status.
        self.flags.set(self.flags.get() | EpollFlags::NOTIFYING);
        self.owner.resume();
        self.flags.set(self.flags.get() - EpollFlags::NOTIFYING);

        // A close from inside the continuation was deferred to us.
        if self.flags.get().contains(EpollFlags::CLOSED) {
            self.finalize();
            return;
        }

        if log_enabled!(Level::Debug) {
            debug!(
                "epoll {}: child readiness after continuation:{}",
                self.handle(),
                self.children_status()
            );
        }

        // Re-arm if events remain.
        self.check();
    }

    fn has_ready_watch(&self) -> bool {
        self.watching.borrow().iter().any(|watch| watch.is_ready())
    }

    fn os_has_pending(&self) -> bool {
        self.os.borrow().as_ref().is_some_and(|os| os.has_pending())
    }

    /// Handles of all watched children, ready ones marked with `!`.
    fn children_status(&self) -> String {
        let mut out = String::new();
        for watch in self.watching.borrow().iter() {
            let marker = if watch.is_ready() { "!" } else { "" };
            let _ = write!(out, " {}{}", watch.handle(), marker);
        }
        out
    }

    fn self_rc(&self) -> Rc<Epoll> {
        self.self_ref.upgrade().expect("epoll is still referenced")
    }

    fn as_listener(&self) -> Rc<dyn StatusListener> {
        self.self_rc()
    }
}

impl Descriptor for Epoll {
    fn base(&self) -> &DescriptorBase {
        &self.base
    }
}

impl StatusListener for Epoll {
    /// Inbound callback from a watched descriptor whose status changed.
    fn status_changed(&self, handle: DescriptorHandle) {
        // We only subscribe to descriptors we watch, and DEL
        // unsubscribes, so an unknown handle here is a wiring bug.
        assert!(
            self.watching.borrow().get(handle).is_some(),
            "status change for descriptor {} not watched by epoll {}",
            handle,
            self.handle()
        );

        trace!(
            "epoll {}: status changed on descriptor {}",
            self.handle(),
            handle
        );

        self.check();
    }
}
