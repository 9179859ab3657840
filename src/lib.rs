// hietcd-rs: async client for etcd v2's HTTP key-value API.
//
// A single background worker thread runs an event reactor (file-descriptor
// readiness + a timer heap), driving a libcurl-multi HTTP transfer pipeline
// fed by a cross-thread request queue. Callers enqueue a verb call from any
// thread; the worker parses the JSON response and delivers it through a
// user-supplied callback. There is no synchronous request API — see
// `client::Client` for the five verbs (`mkdir`/`set`/`get`/`delete`/`watch`).
//
// Structurally this mirrors `examples/original_source/`'s `hietcd.c`: `sev.c`
// became `reactor`, `etcd_request.h`'s intrusive queue became `queue`, the
// self-pipe in `hietcd.c` became `wake`, `io.c`'s `CURLM*` bridge became
// `driver`, and `response.c`'s yajl-based parser became `json_parser`.

pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod json_parser;
pub mod node;
pub mod queue;
pub mod reactor;
pub mod request;
pub mod response;
pub mod retry;
pub mod wake;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState};
pub use client::Client;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use node::Node;
pub use response::Response;
pub use retry::{RetryConfig, RetryExecutor};

/// Installs a default `tracing-subscriber` formatter reading
/// `RUST_LOG`/`HIETCD_LOG`, for embedders that don't already have one.
///
/// This crate itself never installs a subscriber implicitly — `tracing`
/// events are emitted regardless, and any embedding application's own
/// subscriber takes them. Call this only from a binary (or a test) that
/// wants `hietcd-rs`'s worker-thread diagnostics on stderr and has no
/// subscriber of its own. Matches the Design Notes' "explicit logger
/// interface, falling back to a process default only when none is
/// supplied" — the original C client's equivalent is `get_log_handler`'s
/// lazy-initialized `stderr` default (`examples/original_source/log.c`).
/// Safe to call more than once; only the first call takes effect.
pub fn install_default_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_env("HIETCD_LOG")
            .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_default_logging_is_idempotent() {
        install_default_logging();
        install_default_logging();
    }
}
