// The polling backend abstraction: `sev_impl_*` in the original client was
// swapped at compile time between an epoll and a select implementation.
// `PollBackend` is that seam in Rust form.

use std::ops::{BitOr, BitOrAssign};
use std::time::Duration;

/// Readiness/interest flags, mirroring `SEV_N`/`SEV_R`/`SEV_W` from the
/// original client: a plain bitmask, `NONE` reserved for "no interest".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u8);

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READABLE: Interest = Interest(1);
    pub const WRITABLE: Interest = Interest(2);

    pub fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn remove(self, other: Interest) -> Interest {
        Interest(self.0 & !other.0)
    }
}

impl BitOr for Interest {
    type Output = Interest;
    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

/// One fd that came back ready from a poll, with which directions fired.
#[derive(Debug, Clone, Copy)]
pub struct ReadyEvent {
    pub fd: i32,
    pub interest: Interest,
}

/// A polling backend: register/unregister interest in fds, then block for
/// up to `timeout` collecting which ones are ready.
pub trait PollBackend: Send {
    /// Register or update interest for `fd`. Idempotent: calling it again
    /// with a different `interest` replaces the registration (matches the
    /// original's `EPOLL_CTL_ADD`-vs-`EPOLL_CTL_MOD` dance).
    fn add(&mut self, fd: i32, interest: Interest) -> std::io::Result<()>;

    /// Clear the given interest bits for `fd`. Fully unregisters the fd
    /// once no bits remain.
    fn del(&mut self, fd: i32, interest: Interest);

    /// Block for up to `timeout` (or forever if `None`) and return the set
    /// of fds that became ready. `max_fd` bounds backends (like `select`)
    /// that need to know the highest fd in use.
    fn poll(&mut self, max_fd: i32, timeout: Option<Duration>) -> std::io::Result<Vec<ReadyEvent>>;
}
