// Linux epoll backend: a direct translation of the original's
// `sev_impl_create`/`sev_impl_add`/`sev_impl_del`/`sev_impl_poll` for the
// `HAVE_EPOLL` branch, using raw `libc` calls rather than a polling crate —
// this is the hard engineering the reactor abstraction exists to show.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use super::backend::{Interest, PollBackend, ReadyEvent};

pub struct EpollBackend {
    epfd: i32,
    registered: HashMap<i32, Interest>,
    event_buf: Vec<libc::epoll_event>,
}

impl EpollBackend {
    pub fn new(capacity: usize) -> io::Result<Self> {
        // SAFETY: epoll_create1 with no flags is always safe to call.
        let epfd = unsafe { libc::epoll_create1(0) };
        if epfd == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epfd,
            registered: HashMap::new(),
            event_buf: vec![unsafe { std::mem::zeroed() }; capacity.max(16)],
        })
    }

    fn to_epoll_events(interest: Interest) -> u32 {
        let mut events = 0u32;
        if interest.contains(Interest::READABLE) {
            events |= libc::EPOLLIN as u32;
        }
        if interest.contains(Interest::WRITABLE) {
            events |= libc::EPOLLOUT as u32;
        }
        events
    }
}

impl Drop for EpollBackend {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}

impl PollBackend for EpollBackend {
    fn add(&mut self, fd: i32, interest: Interest) -> io::Result<()> {
        let existing = self.registered.get(&fd).copied().unwrap_or(Interest::NONE);
        let combined = existing | interest;
        let mut ee = libc::epoll_event {
            events: Self::to_epoll_events(combined),
            u64: fd as u64,
        };
        let op = if existing.is_none() {
            libc::EPOLL_CTL_ADD
        } else {
            libc::EPOLL_CTL_MOD
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ee) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        self.registered.insert(fd, combined);
        Ok(())
    }

    fn del(&mut self, fd: i32, interest: Interest) {
        let existing = self.registered.get(&fd).copied().unwrap_or(Interest::NONE);
        let remaining = existing.remove(interest);

        if remaining.is_none() {
            unsafe {
                libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut());
            }
            self.registered.remove(&fd);
            return;
        }

        let mut ee = libc::epoll_event {
            events: Self::to_epoll_events(remaining),
            u64: fd as u64,
        };
        unsafe {
            libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut ee);
        }
        self.registered.insert(fd, remaining);
    }

    fn poll(&mut self, _max_fd: i32, timeout: Option<Duration>) -> io::Result<Vec<ReadyEvent>> {
        let timeout_ms = match timeout {
            Some(d) => d.as_millis() as i32,
            None => -1,
        };

        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                self.event_buf.as_mut_ptr(),
                self.event_buf.len() as i32,
                timeout_ms,
            )
        };
        if n == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }

        let mut ready = Vec::with_capacity(n as usize);
        for ee in &self.event_buf[..n as usize] {
            let mut interest = Interest::NONE;
            if ee.events & (libc::EPOLLIN as u32) != 0 {
                interest |= Interest::READABLE;
            }
            if ee.events & (libc::EPOLLOUT as u32 | libc::EPOLLERR as u32 | libc::EPOLLHUP as u32) != 0 {
                interest |= Interest::WRITABLE;
            }
            ready.push(ReadyEvent {
                fd: ee.u64 as i32,
                interest,
            });
        }
        Ok(ready)
    }
}
