// The HTTP multiplexing driver: bridges libcurl's multi socket-action
// interface onto the Reactor, the same way the original client's `io.c`
// bridged a `CURLM*` handle onto `sev_pool` (see
// `examples/original_source/src/io.c`'s `etcd_io_multi_*` family and
// `sev_impl.c`'s fd-readiness callbacks). libcurl is this crate's concrete
// "batch HTTP engine": `curl::multi::Multi` plays the role `CURLM*` played
// in the original, and its socket/timer callbacks play the role of
// `curl_multi_socket_action`'s driving callbacks.
//
// A transfer's life cycle is CREATED (added to `Multi` in `submit`) →
// ATTACHED (its fds are registered on the reactor by the socket callback) →
// some number of I/O ticks → COMPLETED (libcurl posts a message) →
// REPORTED (its completion closure runs) → RELEASED (`Multi::remove2` gives
// the `Easy2` back and drops it). `drain_messages` performs the
// COMPLETED→REPORTED→RELEASED steps for everything libcurl reports ready,
// every single time the driver is given a chance to run — never only on a
// subset of ticks — matching the original's "drain after every
// notification" rule.

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use curl::easy::{Easy2, Handler, WriteError};
use curl::multi::{Easy2Handle, Events, Multi, Socket};

use crate::config::ParseDepth;
use crate::error::{ClientError, ClientResult};
use crate::json_parser;
use crate::reactor::{Interest, Reactor, TimerId};
use crate::request::{Method, Request};
use crate::response::Response;

/// The special fd libcurl uses in `curl_multi_socket_action` to mean "no
/// actual socket, this call is just the app's timer firing".
const CURL_SOCKET_TIMEOUT: Socket = -1;

/// Upper bound on a response body, matching the original client's
/// `ETCD_DATA_BUFSIZE` (`examples/original_source/src/response.h`: `1024 *
/// 4`). A body landing exactly on the bound is accepted; anything past it
/// is truncated and reported as [`ClientError::Protocol`] (§8's boundary
/// behavior) instead of silently growing without limit.
pub const MAX_BODY_BYTES: usize = 1024 * 4;

pub type Completion = Box<dyn FnOnce(ClientResult<Response>) + Send>;

/// Returns the interest bits `add_fd`'s OR-only semantics would otherwise
/// leave stuck: whichever of readable/writable the new mask no longer
/// wants. Empty when the new mask is a superset of (or equal to) whatever
/// was there before.
fn dropped_interest(new_interest: Interest) -> Interest {
    (Interest::READABLE | Interest::WRITABLE).remove(new_interest)
}

/// Accumulates one transfer's body and response headers as libcurl feeds
/// them in. Kept deliberately dumb: all the parsing happens afterward in
/// `json_parser`, once the full body is in hand. Caps the body at
/// [`MAX_BODY_BYTES`]; bytes past that point are dropped and `truncated` is
/// set instead of growing the buffer unboundedly.
#[derive(Default)]
struct Collector {
    body: Vec<u8>,
    headers: http::HeaderMap,
    truncated: bool,
}

impl Handler for Collector {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        if self.truncated {
            // Already over the bound; keep accepting bytes (returning
            // fewer than `data.len()` would abort the transfer with a
            // write error) but stop growing the buffer.
            return Ok(data.len());
        }
        let remaining = MAX_BODY_BYTES.saturating_sub(self.body.len());
        if data.len() > remaining {
            self.body.extend_from_slice(&data[..remaining]);
            self.truncated = true;
        } else {
            self.body.extend_from_slice(data);
        }
        Ok(data.len())
    }

    fn header(&mut self, data: &[u8]) -> bool {
        if let Ok(line) = std::str::from_utf8(data) {
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some((name, value)) = line.split_once(':') {
                if let (Ok(name), Ok(value)) = (
                    http::HeaderName::from_bytes(name.trim().as_bytes()),
                    http::HeaderValue::from_str(value.trim()),
                ) {
                    self.headers.insert(name, value);
                }
            }
        }
        true
    }
}

struct PendingTransfer {
    handle: Easy2Handle<Collector>,
    depth: ParseDepth,
    completion: Completion,
}

struct DriverState {
    multi: Multi,
    /// Valid once `Driver::attach` has run, for the rest of the worker
    /// thread's lifetime. See the safety note on [`DriverCell`].
    reactor: *mut Reactor,
    transfers: HashMap<u64, PendingTransfer>,
    next_id: u64,
    curl_timer: Option<TimerId>,
    /// Lets timer callbacks (which only receive a [`TimerId`], not this
    /// state) get back to it without the reference cycle a strong `Arc`
    /// would create.
    self_weak: Weak<DriverCell>,
}

// SAFETY: a `Driver` is built, attached, and driven exclusively from the
// one worker thread that owns the `Reactor` it's attached to (see
// `client.rs`). Nothing here is ever touched from a second thread; the Send
// bound only exists because `Reactor::FileProc` and `Multi`'s callback
// setters require it structurally.
unsafe impl Send for DriverState {}

struct DriverCell(UnsafeCell<DriverState>);
unsafe impl Send for DriverCell {}
unsafe impl Sync for DriverCell {}

impl DriverCell {
    /// SAFETY: see the note on `DriverState`'s `Send` impl — every access
    /// happens on the single thread that owns this driver, so handing out
    /// an exclusive reference from a shared one is sound in practice even
    /// though the compiler can't see it.
    #[allow(clippy::mut_from_ref)]
    unsafe fn get(&self) -> &mut DriverState {
        &mut *self.0.get()
    }
}

/// Bridges a `curl::multi::Multi` onto a [`Reactor`]. Construct one,
/// `attach` it to the reactor that will drive it, then `submit` requests;
/// the reactor's dispatch loop does the rest.
pub struct Driver {
    state: Arc<DriverCell>,
}

impl Driver {
    pub fn new() -> ClientResult<Self> {
        let state = Arc::new_cyclic(|weak| {
            DriverCell(UnsafeCell::new(DriverState {
                multi: Multi::new(),
                reactor: std::ptr::null_mut(),
                transfers: HashMap::new(),
                next_id: 1,
                curl_timer: None,
                self_weak: weak.clone(),
            }))
        });

        let socket_state = state.clone();
        let timer_state = state.clone();

        // SAFETY: nothing else has a reference to `state` yet.
        let inner = unsafe { state.get() };

        inner.multi.socket_function(move |socket, events, _user_data| {
            // SAFETY: this only fires synchronously inside `Multi::action`,
            // which this driver only calls from its own worker thread.
            let driver_state = unsafe { socket_state.get() };
            let mut interest = Interest::NONE;
            if events.input() {
                interest |= Interest::READABLE;
            }
            if events.output() {
                interest |= Interest::WRITABLE;
            }

            let reactor = unsafe { &mut *driver_state.reactor };
            if events.remove() || interest.is_none() {
                reactor.del_fd(socket, Interest::READABLE | Interest::WRITABLE);
                return;
            }

            // `add_fd` only ever OR's new interest into the existing
            // registration; it never narrows it. libcurl routinely narrows
            // a socket's mask (e.g. IN|OUT during connect/send down to
            // IN-only once the request body is sent and only the response
            // is pending), so the direction it no longer wants has to be
            // dropped explicitly or it stays registered forever. On a
            // level-triggered backend a writable-but-idle socket reports
            // ready every poll, busy-spinning the loop.
            let dropped = dropped_interest(interest);
            if !dropped.is_none() {
                reactor.del_fd(socket, dropped);
            }

            let run_state = socket_state.clone();
            let proc = Box::new(move |reactor: &mut Reactor, fd: i32, interest: Interest| {
                let _ = reactor;
                // SAFETY: see above.
                let driver_state = unsafe { run_state.get() };
                Driver::run_socket_action(driver_state, fd as Socket, interest);
            });
            let _ = reactor.add_fd(socket, interest, Some(proc.clone_box()), Some(proc), true);
        })?;

        inner.multi.timer_function(move |timeout| {
            // SAFETY: see above.
            let driver_state = unsafe { timer_state.get() };
            Driver::reschedule_timer(driver_state, timeout);
            true
        })?;

        Ok(Self { state })
    }

    /// Attach this driver to the reactor that will drive it. Must be called
    /// once, on the reactor's own thread, before that reactor's fd/timer
    /// registrations for this driver's transfers can be relied upon, and
    /// before the reactor is moved (the driver keeps a raw pointer to it).
    pub fn attach(&self, reactor: &mut Reactor) {
        // SAFETY: single-threaded setup, no concurrent access possible yet.
        let state = unsafe { self.state.get() };
        state.reactor = reactor as *mut Reactor;
    }

    /// Begin a transfer. Kicks libcurl's socket-action state machine once
    /// immediately (CREATED→ATTACHED), so a transfer whose connection can
    /// complete without ever blocking on I/O still gets reported.
    ///
    /// If the transfer can't even be set up (a malformed URL, libcurl
    /// rejecting an option, the engine refusing the attach), this logs and
    /// drops the request without invoking `completion` — matching the
    /// original driver's "attach failed → destroy response and log"
    /// contract, which never routes that failure through the normal
    /// per-transfer completion path.
    pub fn submit(&self, request: &Request, depth: ParseDepth, completion: Completion) {
        // SAFETY: see `DriverState`'s `Send` impl note.
        let state = unsafe { self.state.get() };

        let easy = match Driver::build_easy(request) {
            Ok(easy) => easy,
            Err(err) => {
                tracing::error!(url = %request.url, error = %err, "failed to configure transfer");
                return;
            }
        };

        let handle = match state.multi.add2(easy) {
            Ok(handle) => handle,
            Err(err) => {
                tracing::error!(url = %request.url, error = %err, "failed to attach transfer to HTTP engine");
                return;
            }
        };

        let id = state.next_id;
        state.next_id += 1;
        state.transfers.insert(
            id,
            PendingTransfer {
                handle,
                depth,
                completion,
            },
        );

        Driver::run_socket_action(state, CURL_SOCKET_TIMEOUT, Interest::NONE);
    }

    fn build_easy(request: &Request) -> ClientResult<Easy2<Collector>> {
        let mut easy = Easy2::new(Collector::default());
        easy.url(&request.url)?;
        easy.connect_timeout(request.connect_timeout)?;
        easy.timeout(request.timeout)?;
        easy.tcp_keepalive(request.keepalive)?;
        // A conservative default: never silently reuse a pooled connection
        // across transfers with potentially different certs/keepalive needs.
        easy.fresh_connect(true)?;
        easy.follow_location(true)?;

        match request.method {
            Method::Get => {
                easy.get(true)?;
            }
            Method::Delete => {
                easy.custom_request("DELETE")?;
            }
            Method::Put => {
                easy.post(true)?;
                easy.custom_request("PUT")?;
                if let Some(body) = &request.body {
                    easy.post_fields_copy(body.as_bytes())?;
                }
            }
            Method::Post => {
                easy.post(true)?;
                if let Some(body) = &request.body {
                    easy.post_fields_copy(body.as_bytes())?;
                }
            }
        }

        if let Some(cert) = &request.certfile {
            easy.ssl_cert(cert)?;
        }

        Ok(easy)
    }

    /// Number of transfers currently in flight (ATTACHED or still ticking).
    pub fn pending_count(&self) -> usize {
        // SAFETY: see `DriverState`'s `Send` impl note.
        unsafe { self.state.get() }.transfers.len()
    }

    fn run_socket_action(state: &mut DriverState, socket: Socket, interest: Interest) {
        let events = if socket == CURL_SOCKET_TIMEOUT {
            Events::new()
        } else {
            Events::new()
                .input(interest.contains(Interest::READABLE))
                .output(interest.contains(Interest::WRITABLE))
        };
        let _ = state.multi.action(socket, &events);
        Driver::drain_messages(state);
    }

    /// Mirrors libcurl's `CURLMOPT_TIMERFUNCTION` contract: `None` means
    /// "no timeout needed right now" (cancel whatever's scheduled); `Some`
    /// replaces any previously scheduled "curl timer" with a fresh one.
    fn reschedule_timer(state: &mut DriverState, timeout: Option<Duration>) {
        let reactor = unsafe { &mut *state.reactor };
        if let Some(id) = state.curl_timer.take() {
            reactor.del_timer(id);
        }

        let Some(delay) = timeout else {
            return;
        };

        let weak = state.self_weak.clone();
        let id = reactor.add_timer(
            delay,
            Box::new(move |_id| {
                if let Some(cell) = weak.upgrade() {
                    // SAFETY: see `DriverState`'s `Send` impl note.
                    let driver_state = unsafe { cell.get() };
                    Driver::run_socket_action(driver_state, CURL_SOCKET_TIMEOUT, Interest::NONE);
                }
            }),
        );
        state.curl_timer = Some(id);
    }

    fn drain_messages(state: &mut DriverState) {
        let DriverState {
            multi, transfers, ..
        } = state;

        let mut finished = Vec::new();
        multi.messages(|message| {
            for (id, pending) in transfers.iter() {
                if let Some(result) = message.result_for2(&pending.handle) {
                    finished.push((*id, result));
                }
            }
        });

        for (id, result) in finished {
            if let Some(pending) = state.transfers.remove(&id) {
                let PendingTransfer {
                    handle,
                    depth,
                    completion,
                } = pending;
                let outcome = Driver::finish_transfer(&state.multi, handle, depth, result);
                completion(outcome);
            }
        }
    }

    fn finish_transfer(
        multi: &Multi,
        handle: Easy2Handle<Collector>,
        depth: ParseDepth,
        result: Result<(), curl::Error>,
    ) -> ClientResult<Response> {
        let easy = multi.remove2(handle)?;

        if let Err(err) = result {
            return Err(ClientError::from(err));
        }

        let http_code = easy.response_code().ok();
        let collector = easy.get_ref();
        if collector.truncated {
            return Err(ClientError::protocol(format!(
                "response body exceeds {MAX_BODY_BYTES}-byte buffer"
            )));
        }
        let body = String::from_utf8_lossy(&collector.body).into_owned();

        let mut response = Response::new();
        response.http_code = http_code;
        json_parser::parse_headers(&mut response, &collector.headers);
        json_parser::parse_body(&mut response, &body, depth)?;
        Ok(response)
    }
}

/// Lets the socket callback register the identical handler for both read
/// and write interest (the dedup the reactor's dispatch loop relies on)
/// without requiring `FileProc` itself to be `Clone`.
trait CloneBox {
    fn clone_box(&self) -> Box<dyn FnMut(&mut Reactor, i32, Interest) + Send>;
}

impl<F> CloneBox for F
where
    F: FnMut(&mut Reactor, i32, Interest) + Send + Clone + 'static,
{
    fn clone_box(&self) -> Box<dyn FnMut(&mut Reactor, i32, Interest) + Send> {
        Box::new(self.clone())
    }
}
