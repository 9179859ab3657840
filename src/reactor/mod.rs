// The event reactor: a single-threaded fd-readiness/timer dispatch loop.
//
// Structurally this is a straight port of the original `sev_pool`/
// `sev_dispatch` (see `examples/original_source/src/sev.c`): a fixed-size
// per-fd event table, a ready-event scratch buffer filled by the backend
// each tick, a min-heap timer wheel, and one dispatch loop that runs cron,
// then due timers, then one poll-and-dispatch pass, until told to stop.

mod backend;
mod epoll;
mod select;
mod timer;

pub use backend::{Interest, PollBackend, ReadyEvent};
pub use timer::TimerId;

use std::time::Duration;

use timer::TimerHeap;

#[cfg(target_os = "linux")]
fn make_backend(capacity: usize) -> std::io::Result<Box<dyn PollBackend>> {
    Ok(Box::new(epoll::EpollBackend::new(capacity)?))
}

#[cfg(not(target_os = "linux"))]
fn make_backend(_capacity: usize) -> std::io::Result<Box<dyn PollBackend>> {
    Ok(Box::new(select::SelectBackend::new()?))
}

pub type FileProc = Box<dyn FnMut(&mut Reactor, i32, Interest) + Send>;

/// A registered fd's read and/or write handlers.
struct Handlers {
    read: Option<FileProc>,
    write: Option<FileProc>,
    /// True when `read` and `write` were registered as the *same* handler —
    /// needed to reproduce the original's dedup rule (`event->read ==
    /// event->write`) without comparing trait-object pointers, which Rust
    /// doesn't let us do reliably across `Box<dyn Fn>`.
    same_handler: bool,
}

/// The event reactor. Owns the backend, the per-fd handler table, and the
/// timer heap; `dispatch` runs the core loop until `stop` is called.
pub struct Reactor {
    backend: Box<dyn PollBackend>,
    handlers: Vec<Option<Handlers>>,
    max_fd: i32,
    timers: TimerHeap,
    cron: Option<Box<dyn FnMut(&mut Reactor) + Send>>,
    done: bool,
}

impl Reactor {
    pub fn create(size: usize) -> std::io::Result<Self> {
        let backend = make_backend(size)?;
        let mut handlers = Vec::with_capacity(size);
        handlers.resize_with(size, || None);
        Ok(Self {
            backend,
            handlers,
            max_fd: -1,
            timers: TimerHeap::new(),
            cron: None,
            done: false,
        })
    }

    fn ensure_capacity(&mut self, fd: i32) {
        let needed = fd as usize + 1;
        if needed > self.handlers.len() {
            self.handlers.resize_with(needed, || None);
        }
    }

    /// Register interest in `fd`. `read`/`write` may be the same closure
    /// pointer-for-pointer in the caller's intent (the driver always passes
    /// the identical callback for both when it wants dedup); callers signal
    /// that by passing `same_handler = true`.
    pub fn add_fd(
        &mut self,
        fd: i32,
        interest: Interest,
        read: Option<FileProc>,
        write: Option<FileProc>,
        same_handler: bool,
    ) -> std::io::Result<()> {
        self.ensure_capacity(fd);
        self.backend.add(fd, interest)?;

        let slot = &mut self.handlers[fd as usize];
        let entry = slot.get_or_insert_with(|| Handlers {
            read: None,
            write: None,
            same_handler: false,
        });
        entry.same_handler = same_handler;
        if read.is_some() {
            entry.read = read;
        }
        if write.is_some() {
            entry.write = write;
        }

        if fd > self.max_fd {
            self.max_fd = fd;
        }
        Ok(())
    }

    pub fn del_fd(&mut self, fd: i32, interest: Interest) {
        if (fd as usize) >= self.handlers.len() {
            return;
        }
        self.backend.del(fd, interest);
        if let Some(entry) = &mut self.handlers[fd as usize] {
            if interest.contains(Interest::READABLE) {
                entry.read = None;
            }
            if interest.contains(Interest::WRITABLE) {
                entry.write = None;
            }
            if entry.read.is_none() && entry.write.is_none() {
                self.handlers[fd as usize] = None;
            }
        }
        if fd == self.max_fd {
            while self.max_fd > 0 && self.handlers[self.max_fd as usize].is_none() {
                self.max_fd -= 1;
            }
            if self.handlers.get(self.max_fd as usize).map(Option::is_none).unwrap_or(true) {
                self.max_fd = -1;
            }
        }
    }

    pub fn add_timer(&mut self, timeout: Duration, proc: timer::TimerProc) -> TimerId {
        self.timers.add(timeout, proc)
    }

    pub fn del_timer(&mut self, id: TimerId) -> bool {
        self.timers.del(id)
    }

    pub fn set_cron(&mut self, cron: Box<dyn FnMut(&mut Reactor) + Send>) {
        self.cron = Some(cron);
    }

    pub fn stop(&mut self) {
        self.done = true;
    }

    /// Run cron, then fire all due timers, then one poll-and-dispatch pass,
    /// repeating until `stop()` is called. `poll_timeout` bounds each pass
    /// when there are no pending timers to shorten it.
    pub fn dispatch(&mut self, poll_timeout: Duration) {
        self.done = false;
        while !self.done {
            if let Some(mut cron) = self.cron.take() {
                cron(self);
                self.cron = Some(cron);
            }

            self.timers.process_due();

            let timeout = match self.timers.next_due_in() {
                Some(d) => d.min(poll_timeout),
                None => poll_timeout,
            };

            self.process_event(timeout);
        }
    }

    fn process_event(&mut self, timeout: Duration) {
        if self.max_fd < 0 {
            std::thread::sleep(timeout.min(Duration::from_millis(50)));
            return;
        }

        let ready = match self.backend.poll(self.max_fd, Some(timeout)) {
            Ok(r) => r,
            Err(_) => return,
        };

        for ev in ready {
            let fd = ev.fd;
            if (fd as usize) >= self.handlers.len() {
                continue;
            }

            let (mut read_proc, mut write_proc, same_handler) = {
                let Some(entry) = &mut self.handlers[fd as usize] else {
                    continue;
                };
                (entry.read.take(), entry.write.take(), entry.same_handler)
            };

            let mut read_ran = false;
            if ev.interest.contains(Interest::READABLE) {
                if let Some(proc) = &mut read_proc {
                    proc(self, fd, ev.interest);
                    read_ran = true;
                }
            }
            if ev.interest.contains(Interest::WRITABLE) && (!read_ran || !same_handler) {
                if let Some(proc) = &mut write_proc {
                    proc(self, fd, ev.interest);
                }
            }

            if let Some(entry) = &mut self.handlers[fd as usize] {
                if entry.read.is_none() {
                    entry.read = read_proc;
                }
                if entry.write.is_none() {
                    entry.write = write_proc;
                }
            }
        }
    }
}
