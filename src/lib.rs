// src/lib.rs

//! Virtualized event-notification multiplexing for a discrete-event
//! network simulator.
//!
//! Applications running under the simulator perform I/O on *virtual*
//! descriptors whose readiness is driven by simulated time rather than
//! the kernel. This crate reproduces the semantics such applications
//! expect from `epoll(7)` — level- and edge-triggered readiness, one-shot
//! arming, batched event collection — on top of those descriptors, while
//! transparently delegating any real OS descriptors the application also
//! owns to a kernel epoll instance.
//!
//! The interesting part is the notification state machine: status-change
//! callbacks from watched descriptors, pending kernel events, and control
//! operations from the application all feed a single deferred
//! notification task per epoll instance, with lazy watch deletion and
//! re-entrancy through the application continuation. See [`Epoll`].
//!
//! The surrounding simulation plugs in through small traits: the owning
//! [`Process`], the [`Host`] descriptor table, and the event
//! [`Scheduler`]. Watched objects implement [`Descriptor`] by embedding a
//! [`DescriptorBase`]; an [`Epoll`] is itself a descriptor, so epoll
//! instances nest.

mod descriptor;
mod epoll;
mod error;
mod event;
mod os;
mod sim;
mod table;
mod watch;

pub use descriptor::{Descriptor, DescriptorBase, DescriptorHandle, Status, StatusListener};
pub use epoll::Epoll;
pub use error::ControlError;
pub use event::{ControlOp, Event, EventFlags};
pub use sim::{Host, Process, Scheduler, SimTime, Task, NOTIFY_DELAY};
