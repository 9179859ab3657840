// A single outbound HTTP request, as handed from the Client Facade to the
// worker thread's request queue.

use std::time::Duration;

/// HTTP method the etcd v2 API uses. `Method::Get`/`Delete` never carry a
/// body; `Put`/`Post` always do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

/// One queued unit of work: a fully-built URL, method, optional body, and
/// the client certificate path (if the client was configured with one).
///
/// `url` is capped at [`crate::client::URL_BUFSIZE`] bytes by the builders in
/// `client.rs`, matching the fixed-size URL buffer of the original client.
///
/// `timeout`/`connect_timeout`/`keepalive` default to the same values
/// [`crate::config::ConnectionConfigSection`]'s `Default` impl uses, and are
/// overridden per-request by `client.rs`'s builders from the client's
/// actual configuration — "per-transfer timeouts configured at attach time,
/// default values from the client config" (spec.md §5).
#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub method: Method,
    pub body: Option<String>,
    pub certfile: Option<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub keepalive: bool,
}

impl Request {
    pub fn new(url: impl Into<String>, method: Method) -> Self {
        Self {
            url: url.into(),
            method,
            body: None,
            certfile: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(1),
            keepalive: true,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_certfile(mut self, certfile: Option<String>) -> Self {
        self.certfile = certfile;
        self
    }

    /// Apply the client's configured request/connect timeouts and keepalive
    /// policy, overriding this request's defaults.
    pub fn with_connection(mut self, timeout: Duration, connect_timeout: Duration, keepalive: bool) -> Self {
        self.timeout = timeout;
        self.connect_timeout = connect_timeout;
        self.keepalive = keepalive;
        self
    }
}
