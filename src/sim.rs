// src/sim.rs

//! Interfaces to the surrounding simulation: the owning process, the host
//! descriptor table, and the event scheduler.
//!
//! The epoll core never blocks; the only deferred work it creates is the
//! notification task it hands to the [`Scheduler`]. Everything else runs
//! synchronously inside the host's execution turn.

use crate::descriptor::DescriptorHandle;

/// Virtual time, in simulation ticks.
pub type SimTime = u64;

/// Delay at which readiness notifications are delivered to the process.
pub const NOTIFY_DELAY: SimTime = 1;

/// A deferred unit of work handed to the simulation scheduler.
///
/// The closure owns whatever it needs to run (the epoll core captures an
/// `Rc` of the instance being notified); dropping an unexecuted task
/// releases those references.
pub struct Task(Box<dyn FnOnce()>);

impl Task {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Task(Box::new(f))
    }

    /// Execute the task, consuming it.
    pub fn run(self) {
        (self.0)()
    }
}

/// The simulation event scheduler.
pub trait Scheduler {
    /// Queue `task` to run after `delay` ticks of virtual time. Returns
    /// `false` if the simulation is shutting down and the task was not
    /// queued (the task is dropped, releasing whatever it owned).
    fn schedule(&self, task: Task, delay: SimTime) -> bool;
}

/// The application process that owns an epoll instance.
pub trait Process {
    /// Whether the process currently wants readiness notifications for
    /// the given epoll handle.
    fn wants_notify(&self, epoll_handle: DescriptorHandle) -> bool;

    /// Whether the process is still running.
    fn is_running(&self) -> bool;

    /// Run the process until it voluntarily yields. The process is
    /// expected to call back into the epoll (`collect_events`, further
    /// `control` operations) synchronously from here, or not at all.
    fn resume(&self);
}

/// The host that owns the process descriptor table.
pub trait Host {
    /// Remove `handle` from the descriptor table, dropping the table's
    /// reference to the descriptor.
    fn close_descriptor(&self, handle: DescriptorHandle);
}
