// src/os.rs

//! Kernel epoll passthrough, using raw `libc` FFI calls.
//!
//! Applications under simulation may legitimately own real OS file
//! descriptors alongside their virtual ones. Each virtual epoll instance
//! owns one kernel epoll instance and forwards control operations for
//! such descriptors to it; event collection drains it with a zero
//! timeout after the virtual sweep.
//!
//! The readiness *oracle* ([`OsMultiplexer::has_pending`]) answers "does
//! the kernel instance have events right now?" without consuming
//! anything: it probes through a temporary epoll instance that is torn
//! down on every call, so no state lingers in the real multiplexer.

use crate::event::{ControlOp, Event, EventFlags};
use log::{debug, trace, warn};
use std::io;
use std::os::unix::io::RawFd;

/// Kernel epoll instance backing one virtual epoll.
#[derive(Debug)]
pub(crate) struct OsMultiplexer {
    epoll_fd: RawFd,
}

impl OsMultiplexer {
    pub(crate) fn new() -> io::Result<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd == -1 {
            return Err(io::Error::last_os_error());
        }
        debug!("OS multiplexer created with epoll fd {}", epoll_fd);
        Ok(Self { epoll_fd })
    }

    /// Forward a control operation for a raw OS descriptor. Errors carry
    /// the kernel errno unmodified.
    pub(crate) fn ctl(&self, op: ControlOp, fd: RawFd, event: Event) -> io::Result<()> {
        let mut raw = libc::epoll_event {
            events: event.flags.bits(),
            u64: event.data,
        };
        if unsafe { libc::epoll_ctl(self.epoll_fd, op as libc::c_int, fd, &mut raw) } == -1 {
            return Err(io::Error::last_os_error());
        }
        trace!(
            "{} fd {} on OS epoll fd {} (interest {:?})",
            op,
            fd,
            self.epoll_fd,
            event.flags
        );
        Ok(())
    }

    /// Collect pending kernel events into the front of `out` with a zero
    /// timeout. Returns the number of events written.
    pub(crate) fn wait(&self, out: &mut [Event]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }

        let mut raw = vec![libc::epoll_event { events: 0, u64: 0 }; out.len()];
        let n = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                raw.as_mut_ptr(),
                out.len() as libc::c_int,
                0,
            )
        };
        if n == -1 {
            return Err(io::Error::last_os_error());
        }

        let n = n as usize;
        for (slot, event) in out[..n].iter_mut().zip(&raw[..n]) {
            // Kernel events pass through verbatim, unknown bits included.
            *slot = Event::new(EventFlags::from_bits_retain(event.events), event.u64);
        }
        Ok(n)
    }

    /// Nonblocking peek: does the kernel instance currently have pending
    /// events? Nothing is consumed.
    pub(crate) fn has_pending(&self) -> bool {
        let probe = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if probe == -1 {
            warn!(
                "failed to create probe epoll instance: {}",
                io::Error::last_os_error()
            );
            return false;
        }

        // The kernel instance reads as readable when it holds events.
        let mut interest = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: 0,
        };
        let mut ready = false;
        if unsafe { libc::epoll_ctl(probe, libc::EPOLL_CTL_ADD, self.epoll_fd, &mut interest) }
            == 0
        {
            let mut pending = libc::epoll_event { events: 0, u64: 0 };
            if unsafe { libc::epoll_wait(probe, &mut pending, 1, 0) } > 0 {
                ready = true;
            }
            unsafe {
                libc::epoll_ctl(probe, libc::EPOLL_CTL_DEL, self.epoll_fd, std::ptr::null_mut());
            }
        }
        unsafe { libc::close(probe) };

        ready
    }
}

impl Drop for OsMultiplexer {
    fn drop(&mut self) {
        if unsafe { libc::close(self.epoll_fd) } == -1 {
            warn!(
                "failed to close OS epoll fd {}: {}",
                self.epoll_fd,
                io::Error::last_os_error()
            );
        } else {
            trace!("closed OS epoll fd {}", self.epoll_fd);
        }
    }
}
