// The client facade: the five etcd v2 verbs, plus the worker-thread
// lifecycle that owns the reactor/driver/queue/wake quartet.
//
// Mirrors `hietcd.c`'s `etcd_open`/`etcd_close` and its five `etcd_*` verb
// functions: one worker thread is spun up once at construction, producers
// only ever touch the request queue and the wake pipe, and shutdown drains
// in-flight transfers without firing their callbacks (see `run_worker`'s
// comment at the end of the dispatch loop).

// ACCEPTABLE: Mutex poisoning .expect() is allowed in this module (unrecoverable error)
#![allow(clippy::expect_used)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerState};
use crate::config::{ClientConfig, ParseDepth};
use crate::driver::{Completion, Driver};
use crate::error::{ClientError, ClientResult};
use crate::queue::RequestQueue;
use crate::reactor::{Interest, Reactor};
use crate::request::{Method, Request};
use crate::response::Response;
use crate::retry::RetryExecutor;
use crate::wake::{wake_channel, WakeReader, WakeWriter};

/// Hard cap on a built request URL, matching the original client's
/// fixed-size URL buffer (`HIETCD_URL_BUFSIZE`).
pub const URL_BUFSIZE: usize = 512;

const API_VERSION: &str = "v2";

/// One queued unit of work: the request plus everything the worker needs
/// to report back to the caller once it completes.
struct Job {
    request: Request,
    depth: ParseDepth,
    completion: Completion,
}

/// The startup condition variable: `Client::new` blocks on `wait` until the
/// worker thread calls `signal`, which only happens after the reactor and
/// driver are fully initialized and the wake fd is registered. Eliminates
/// the TOCTOU where an early `push` could race with reactor setup.
struct Startup {
    ready: Mutex<bool>,
    condvar: Condvar,
}

impl Startup {
    fn new() -> Self {
        Self {
            ready: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn signal(&self) {
        let mut ready = self.ready.lock().expect("startup mutex poisoned");
        *ready = true;
        self.condvar.notify_all();
    }

    fn wait(&self) {
        let mut ready = self.ready.lock().expect("startup mutex poisoned");
        while !*ready {
            ready = self.condvar.wait(ready).expect("startup condvar poisoned");
        }
    }
}

/// A handle to a running etcd v2 client. Cheap to hold, expensive to
/// construct (spawns and blocks on a worker thread) and to drop (joins it).
pub struct Client {
    config: ClientConfig,
    queue: Arc<RequestQueue<Job>>,
    wake: WakeWriter,
    done: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    circuit_breaker: Option<CircuitBreaker>,
}

impl Client {
    /// Spawn the worker thread and block until it reports readiness.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let queue: Arc<RequestQueue<Job>> = Arc::new(RequestQueue::new());
        let (wake_writer, wake_reader) = wake_channel()
            .map_err(|e| ClientError::generic(format!("wake channel setup failed: {e}")))?;
        let startup = Arc::new(Startup::new());
        let done = Arc::new(AtomicBool::new(false));
        let circuit_breaker = config.circuit_breaker();

        let worker_queue = queue.clone();
        let worker_startup = startup.clone();
        let worker_done = done.clone();

        let worker = std::thread::Builder::new()
            .name("hietcd-worker".into())
            .spawn(move || run_worker(worker_queue, wake_reader, worker_startup, worker_done))
            .map_err(|e| ClientError::generic(format!("failed to spawn worker thread: {e}")))?;

        startup.wait();

        Ok(Self {
            config,
            queue,
            wake: wake_writer,
            done,
            worker: Some(worker),
            circuit_breaker,
        })
    }

    /// Create a directory node, with an optional TTL in seconds.
    pub fn mkdir(
        &self,
        key: &str,
        ttl: Option<i64>,
        callback: impl FnOnce(ClientResult<Response>) + Send + 'static,
    ) -> ClientResult<()> {
        let query = ttl.map(|t| format!("ttl={t}"));
        let url = build_url(self.endpoint()?, key, query.as_deref())?;
        let request = self.request(url, Method::Put).with_body("dir=true");
        self.enqueue(request, callback)
    }

    /// Set a leaf key's value, with an optional TTL in seconds.
    pub fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<i64>,
        callback: impl FnOnce(ClientResult<Response>) + Send + 'static,
    ) -> ClientResult<()> {
        let url = build_url(self.endpoint()?, key, None)?;
        let mut body = format!("value={value}");
        if let Some(ttl) = ttl {
            body.push_str(&format!("&ttl={ttl}"));
        }
        let request = self.request(url, Method::Put).with_body(body);
        self.enqueue(request, callback)
    }

    /// Recursively read a key (or directory subtree).
    pub fn get(
        &self,
        key: &str,
        callback: impl FnOnce(ClientResult<Response>) + Send + 'static,
    ) -> ClientResult<()> {
        let url = build_url(self.endpoint()?, key, Some("recursive=true"))?;
        let request = self.request(url, Method::Get);
        self.enqueue(request, callback)
    }

    /// Recursively delete a key (or directory subtree).
    pub fn delete(
        &self,
        key: &str,
        callback: impl FnOnce(ClientResult<Response>) + Send + 'static,
    ) -> ClientResult<()> {
        let url = build_url(self.endpoint()?, key, Some("recursive=true"))?;
        let request = self.request(url, Method::Delete);
        self.enqueue(request, callback)
    }

    /// Long-poll for the next change under `key`.
    pub fn watch(
        &self,
        key: &str,
        callback: impl FnOnce(ClientResult<Response>) + Send + 'static,
    ) -> ClientResult<()> {
        let url = build_url(self.endpoint()?, key, Some("wait=true&recursive=true"))?;
        let request = self.request(url, Method::Get);
        self.enqueue(request, callback)
    }

    fn endpoint(&self) -> ClientResult<&str> {
        self.config
            .endpoint()
            .ok_or_else(|| ClientError::generic("no endpoint configured"))
    }

    /// Build a bare request for `url`/`method`, carrying this client's
    /// certificate path and the connection config's timeout/connect-timeout/
    /// keepalive settings through to the transfer (spec.md §5: "per-transfer
    /// timeouts ... default values from the client config").
    fn request(&self, url: String, method: Method) -> Request {
        let conn = &self.config.connection;
        Request::new(url, method)
            .with_certfile(conn.certfile.clone())
            .with_connection(
                Duration::from_secs(conn.timeout_secs as u64),
                Duration::from_secs(conn.connect_timeout_secs as u64),
                conn.keepalive,
            )
    }

    fn enqueue(
        &self,
        request: Request,
        callback: impl FnOnce(ClientResult<Response>) + Send + 'static,
    ) -> ClientResult<()> {
        self.queue.push(Job {
            request,
            depth: self.config.parsing.depth,
            completion: Box::new(callback),
        });
        self.wake
            .wake()
            .map_err(|e| ClientError::transport(format!("failed to wake worker: {e}")))
    }

    /// The circuit breaker's current state, or `None` when
    /// `config.circuit_breaker.enabled` is false (the default).
    pub fn circuit_breaker_state(&self) -> Option<CircuitBreakerState> {
        self.circuit_breaker.as_ref().map(CircuitBreaker::state)
    }

    /// Runs `verb` to completion on the *calling* thread by handing it a
    /// one-shot callback that forwards the result over a channel, then
    /// blocking on that channel. The worker thread is never blocked: it
    /// dispatches the transfer and invokes the callback exactly as it would
    /// for any other verb call. Used to compose [`RetryExecutor`]/
    /// [`CircuitBreaker`] (both of which sleep on their caller's thread)
    /// around an otherwise fire-and-forget verb in [`Self::call_resilient`].
    fn call_blocking(
        &self,
        verb: &dyn Fn(&Self, Completion) -> ClientResult<()>,
    ) -> ClientResult<Response> {
        let (tx, rx) = std::sync::mpsc::channel();
        verb(self, Box::new(move |result| {
            let _ = tx.send(result);
        }))?;
        rx.recv()
            .unwrap_or_else(|_| Err(ClientError::generic("worker dropped response channel")))
    }

    /// Runs one verb call wrapped in this client's configured
    /// [`RetryExecutor`] (`config.retry`) and, if enabled, its
    /// [`CircuitBreaker`] (`config.circuit_breaker`) — the documented entry
    /// point for composing the ambient resilience layers around a verb.
    ///
    /// The plain `mkdir`/`set`/`get`/`delete`/`watch` methods stay
    /// fire-and-forget and retry-free (spec.md §5: "no synchronous request
    /// API"); this method is the opt-in alternative for callers who want
    /// retry/circuit-breaking and are willing to block their own thread
    /// waiting for the result, same as [`Self::call_blocking`].
    ///
    /// ```no_run
    /// # use hietcd_rs::{Client, ClientConfig};
    /// # fn demo(client: &Client) -> hietcd_rs::ClientResult<()> {
    /// let response = client.call_resilient(|c, cb| c.get("/message", |r| cb(r)))?;
    /// # let _ = response;
    /// # Ok(())
    /// # }
    /// ```
    pub fn call_resilient(
        &self,
        verb: impl Fn(&Self, Completion) -> ClientResult<()>,
    ) -> ClientResult<Response> {
        let retry = RetryExecutor::new(self.config.retry_config());
        let attempt = || self.call_blocking(&verb);
        match &self.circuit_breaker {
            Some(breaker) => breaker.call(|| retry.execute(attempt)),
            None => retry.execute(attempt),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.done.store(true, Ordering::SeqCst);
        let _ = self.wake.wake();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// `"{endpoint}/{API_VERSION}/keys{key}[?{query}]"`, rejecting anything
/// past [`URL_BUFSIZE`] bytes the way the original's fixed-size URL buffer
/// would have overflowed.
fn build_url(endpoint: &str, key: &str, query: Option<&str>) -> ClientResult<String> {
    let mut url = format!("{endpoint}/{API_VERSION}/keys{key}");
    if let Some(query) = query {
        url.push('?');
        url.push_str(query);
    }
    if url.len() > URL_BUFSIZE {
        return Err(ClientError::generic(format!(
            "URL exceeds {URL_BUFSIZE}-byte bound ({} bytes): key too long",
            url.len()
        )));
    }
    Ok(url)
}

/// The worker thread's entire body: build the reactor/driver, register the
/// wake fd, signal readiness, dispatch until told to stop, then let the
/// driver drop — discarding any still-in-flight transfers without ever
/// calling their completion closures.
fn run_worker(
    queue: Arc<RequestQueue<Job>>,
    wake_reader: WakeReader,
    startup: Arc<Startup>,
    done: Arc<AtomicBool>,
) {
    let mut reactor = match Reactor::create(64) {
        Ok(reactor) => reactor,
        Err(err) => {
            tracing::error!(error = %err, "failed to create reactor; worker exiting without starting");
            startup.signal();
            return;
        }
    };

    let driver = match Driver::new() {
        Ok(driver) => Arc::new(driver),
        Err(err) => {
            tracing::error!(error = %err, "failed to create HTTP driver; worker exiting without starting");
            startup.signal();
            return;
        }
    };
    driver.attach(&mut reactor);

    let wake_fd = wake_reader.fd();
    let wake_reader = Arc::new(wake_reader);

    let handler_queue = queue.clone();
    let handler_driver = driver.clone();
    let handler_wake = wake_reader.clone();
    let wake_handler = Box::new(move |_reactor: &mut Reactor, _fd: i32, _interest: Interest| {
        // One queue pop per byte read: the invariant §4.W specifies. A
        // push writes exactly one byte; this loop reads them one at a time
        // and pops one request per byte, so a batch of pushes landing
        // before this handler runs just means the loop runs more than once
        // this tick.
        while handler_wake.read_one().unwrap_or(false) {
            if let Some(job) = handler_queue.pop() {
                handler_driver.submit(&job.request, job.depth, job.completion);
            }
        }
    });

    if let Err(err) = reactor.add_fd(wake_fd, Interest::READABLE, Some(wake_handler), None, false) {
        tracing::error!(error = %err, "failed to register wake fd; worker exiting without starting");
        startup.signal();
        return;
    }

    let cron_done = done.clone();
    reactor.set_cron(Box::new(move |r| {
        if cron_done.load(Ordering::SeqCst) {
            r.stop();
        }
    }));

    startup.signal();

    reactor.dispatch(Duration::from_millis(200));

    // `driver` and `reactor` both drop here. `Driver`'s `Multi` drops every
    // `Easy2Handle` still in `transfers` along with it; their completion
    // closures are simply never called, matching "drained without firing
    // the user callback".
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_composes_version_and_query() {
        let url = build_url("http://127.0.0.1:2379", "/message", Some("recursive=true")).expect("url");
        assert_eq!(url, "http://127.0.0.1:2379/v2/keys/message?recursive=true");
    }

    #[test]
    fn build_url_without_query_has_no_question_mark() {
        let url = build_url("http://127.0.0.1:2379", "/message", None).expect("url");
        assert_eq!(url, "http://127.0.0.1:2379/v2/keys/message");
    }

    #[test]
    fn build_url_rejects_keys_past_the_bound() {
        let huge_key = format!("/{}", "a".repeat(URL_BUFSIZE));
        let err = build_url("http://127.0.0.1:2379", &huge_key, None).unwrap_err();
        assert!(matches!(err, ClientError::Generic(_)));
    }

    #[test]
    fn client_construction_and_shutdown_does_not_hang() {
        let config = ClientConfig::default().with_endpoint("http://127.0.0.1:2379");
        let client = Client::new(config).expect("client starts");
        drop(client);
    }

    #[test]
    fn verbs_without_a_configured_endpoint_fail_synchronously() {
        let config = ClientConfig::default();
        let client = Client::new(config).expect("client starts");
        let err = client.get("/message", |_| {}).unwrap_err();
        assert!(matches!(err, ClientError::Generic(_)));
    }

    #[test]
    fn set_then_get_round_trip_against_a_loopback_stub() {
        use std::io::{Read, Write};
        use std::net::TcpListener;
        use std::sync::mpsc;

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");

        let server = std::thread::spawn(move || {
            for _ in 0..2u8 {
                let (mut stream, _) = listener.accept().expect("accept");
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let body = r#"{"action":"set","node":{"key":"/message","value":"hello","modifiedIndex":4,"createdIndex":4}}"#;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nX-Etcd-Index: 4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });

        let config = ClientConfig::default().with_endpoint(format!("http://{addr}"));
        let client = Client::new(config).expect("client starts");

        let (tx, rx) = mpsc::channel();
        let tx2 = tx.clone();
        client
            .set("/message", "hello", None, move |result| {
                let _ = tx.send(result);
            })
            .expect("set enqueues");
        let set_result = rx.recv_timeout(Duration::from_secs(5)).expect("set completes");
        assert!(set_result.is_ok(), "set failed: {set_result:?}");

        client
            .get("/message", move |result| {
                let _ = tx2.send(result);
            })
            .expect("get enqueues");
        let get_result = rx.recv_timeout(Duration::from_secs(5)).expect("get completes");
        let response = get_result.expect("get succeeds");
        assert_eq!(response.node.expect("node").value.as_deref(), Some("hello"));

        drop(client);
        server.join().expect("server thread panicked");
    }

    #[test]
    fn request_builder_carries_connection_config() {
        let mut config = ClientConfig::default().with_endpoint("http://127.0.0.1:2379");
        config.connection.timeout_secs = 7;
        config.connection.connect_timeout_secs = 2;
        config.connection.keepalive = false;
        let client = Client::new(config).expect("client starts");

        let request = client.request("http://127.0.0.1:2379/v2/keys/x".into(), Method::Get);
        assert_eq!(request.timeout, Duration::from_secs(7));
        assert_eq!(request.connect_timeout, Duration::from_secs(2));
        assert!(!request.keepalive);

        drop(client);
    }

    #[test]
    fn circuit_breaker_state_is_none_when_disabled() {
        let config = ClientConfig::default().with_endpoint("http://127.0.0.1:2379");
        let client = Client::new(config).expect("client starts");
        assert!(client.circuit_breaker_state().is_none());
        drop(client);
    }

    #[test]
    fn call_resilient_opens_circuit_breaker_after_repeated_transport_failures() {
        use std::net::TcpListener;

        // Bind then drop: guarantees a port number with nothing listening,
        // so every connect attempt fails fast with ECONNREFUSED instead of
        // timing out.
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let mut config = ClientConfig::default().with_endpoint(format!("http://{addr}"));
        config.retry.enabled = false;
        config.circuit_breaker.enabled = true;
        config.circuit_breaker.failure_threshold = 2;
        config.circuit_breaker.reset_timeout_ms = 60_000;
        let client = Client::new(config).expect("client starts");

        let _ = client.call_resilient(|c, cb| c.get("/x", move |r| cb(r)));
        assert_eq!(client.circuit_breaker_state(), Some(CircuitBreakerState::Closed));

        let _ = client.call_resilient(|c, cb| c.get("/x", move |r| cb(r)));
        assert_eq!(client.circuit_breaker_state(), Some(CircuitBreakerState::Open));

        let before = std::time::Instant::now();
        let result = client.call_resilient(|c, cb| c.get("/x", move |r| cb(r)));
        assert!(result.is_err(), "open circuit should fail the call");
        assert!(
            before.elapsed() < Duration::from_millis(200),
            "open circuit should fail fast without attempting the call"
        );

        drop(client);
    }
}
