// src/event.rs

//! Application-visible interest and event types.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Interest and readiness bits for one subscription or reported event.
    ///
    /// The bit values are numerically identical to the kernel's `EPOLL*`
    /// constants so that events collected from the OS passthrough
    /// multiplexer translate verbatim.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventFlags: u32 {
        /// Readable (`EPOLLIN`).
        const IN = libc::EPOLLIN as u32;
        /// Writable (`EPOLLOUT`).
        const OUT = libc::EPOLLOUT as u32;
        /// Urgent data (`EPOLLPRI`). Only ever reported by the OS side.
        const PRI = libc::EPOLLPRI as u32;
        /// Error condition (`EPOLLERR`). Only ever reported by the OS side.
        const ERR = libc::EPOLLERR as u32;
        /// Peer hangup (`EPOLLHUP`). Only ever reported by the OS side.
        const HUP = libc::EPOLLHUP as u32;
        /// Edge-triggered reporting (`EPOLLET`).
        const ET = libc::EPOLLET as u32;
        /// One-shot reporting (`EPOLLONESHOT`).
        const ONESHOT = libc::EPOLLONESHOT as u32;
    }
}

/// One epoll subscription, or one reported event.
///
/// `data` is an opaque cookie chosen by the application at registration
/// time and handed back verbatim with every reported event, exactly like
/// the `data` union of `struct epoll_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub flags: EventFlags,
    pub data: u64,
}

impl Event {
    pub fn new(flags: EventFlags, data: u64) -> Self {
        Self { flags, data }
    }
}

/// Selector for [`Epoll::control`](crate::Epoll::control) and
/// [`Epoll::control_os`](crate::Epoll::control_os).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ControlOp {
    Add = libc::EPOLL_CTL_ADD,
    Mod = libc::EPOLL_CTL_MOD,
    Del = libc::EPOLL_CTL_DEL,
}

impl fmt::Display for ControlOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ControlOp::Add => "EPOLL_CTL_ADD",
            ControlOp::Mod => "EPOLL_CTL_MOD",
            ControlOp::Del => "EPOLL_CTL_DEL",
        })
    }
}
