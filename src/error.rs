// Error types for the etcd client

use thiserror::Error;

/// Client result type
pub type ClientResult<T> = Result<T, ClientError>;

/// The five-kind error taxonomy the client reports through.
///
/// `Ok` is not represented here — success is `Ok(T)` at the `Result` level.
/// Everything that can go wrong collapses into one of the four variants
/// below, matching the response-error-code shape of the wire protocol.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Catch-all for errors local to this process: allocation failure,
    /// malformed configuration, a reactor invariant violated.
    #[error("generic error: {0}")]
    Generic(String),

    /// The request never got a well-formed HTTP response: connection
    /// refused, DNS failure, TLS handshake failure, timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// A response arrived but violated the wire contract: non-object JSON
    /// body, missing always-present field, unparseable header.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server understood the request and returned a well-formed
    /// etcd error body (`errorCode`/`message`).
    #[error("etcd error {code}: {message}")]
    Response { code: i64, message: String },
}

impl ClientError {
    pub fn generic(msg: impl Into<String>) -> Self {
        ClientError::Generic(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        ClientError::Transport(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        ClientError::Protocol(msg.into())
    }
}

impl From<curl::Error> for ClientError {
    fn from(err: curl::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

impl From<curl::MultiError> for ClientError {
    fn from(err: curl::MultiError) -> Self {
        ClientError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

/// Whether an error is transient and worth retrying under a [`crate::retry::RetryPolicy`].
///
/// Only transport failures are considered transient: a protocol error means
/// the peer sent us something we can't parse (retrying won't fix that), and
/// a response error is the server's considered answer.
pub fn is_retryable(err: &ClientError) -> bool {
    matches!(err, ClientError::Transport(_))
}
