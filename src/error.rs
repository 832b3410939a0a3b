//! Error types for the virtual epoll core.

use thiserror::Error;

/// Error returned by [`Epoll::control`](crate::Epoll::control).
///
/// These mirror the `EEXIST`/`ENOENT` results of the kernel interface:
/// registering a descriptor twice fails, and modifying or removing a
/// descriptor that was never registered fails.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    /// ADD for a descriptor that is already registered with this epoll.
    #[error("descriptor is already registered with this epoll")]
    AlreadyExists,

    /// MOD or DEL for a descriptor that is not registered with this epoll.
    #[error("descriptor is not registered with this epoll")]
    NotFound,
}
