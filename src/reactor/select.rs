// Portable select(2) backend, the non-epoll branch of the original's
// `sev_impl_*` split. Scans `0..=max_fd` the same way the original does.

use std::collections::HashSet;
use std::io;
use std::mem::MaybeUninit;
use std::time::Duration;

use super::backend::{Interest, PollBackend, ReadyEvent};

pub struct SelectBackend {
    readable: HashSet<i32>,
    writable: HashSet<i32>,
}

impl SelectBackend {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            readable: HashSet::new(),
            writable: HashSet::new(),
        })
    }

    fn build_fd_set(fds: &HashSet<i32>) -> libc::fd_set {
        let mut set = unsafe { MaybeUninit::<libc::fd_set>::zeroed().assume_init() };
        unsafe { libc::FD_ZERO(&mut set) };
        for &fd in fds {
            unsafe { libc::FD_SET(fd, &mut set) };
        }
        set
    }
}

impl PollBackend for SelectBackend {
    fn add(&mut self, fd: i32, interest: Interest) -> io::Result<()> {
        if interest.contains(Interest::READABLE) {
            self.readable.insert(fd);
        }
        if interest.contains(Interest::WRITABLE) {
            self.writable.insert(fd);
        }
        Ok(())
    }

    fn del(&mut self, fd: i32, interest: Interest) {
        if interest.contains(Interest::READABLE) {
            self.readable.remove(&fd);
        }
        if interest.contains(Interest::WRITABLE) {
            self.writable.remove(&fd);
        }
    }

    fn poll(&mut self, max_fd: i32, timeout: Option<Duration>) -> io::Result<Vec<ReadyEvent>> {
        if max_fd < 0 {
            if let Some(d) = timeout {
                std::thread::sleep(d);
            }
            return Ok(Vec::new());
        }

        let mut rset = Self::build_fd_set(&self.readable);
        let mut wset = Self::build_fd_set(&self.writable);

        let mut tv;
        let tv_ptr = match timeout {
            Some(d) => {
                tv = libc::timeval {
                    tv_sec: d.as_secs() as libc::time_t,
                    tv_usec: d.subsec_micros() as libc::suseconds_t,
                };
                &mut tv as *mut libc::timeval
            }
            None => std::ptr::null_mut(),
        };

        let rc = unsafe {
            libc::select(
                max_fd + 1,
                &mut rset,
                &mut wset,
                std::ptr::null_mut(),
                tv_ptr,
            )
        };
        if rc == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }

        let mut ready = Vec::new();
        if rc > 0 {
            for fd in 0..=max_fd {
                let mut interest = Interest::NONE;
                if self.readable.contains(&fd) && unsafe { libc::FD_ISSET(fd, &rset) } {
                    interest |= Interest::READABLE;
                }
                if self.writable.contains(&fd) && unsafe { libc::FD_ISSET(fd, &wset) } {
                    interest |= Interest::WRITABLE;
                }
                if !interest.is_none() {
                    ready.push(ReadyEvent { fd, interest });
                }
            }
        }
        Ok(ready)
    }
}
