use std::sync::Arc;

/// Result type used throughout the crate.
///
/// This is a standard Rust `Result` where the error variant is the
/// crate-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the client's public API.
///
/// Runtime failures of the delivery pipeline (network, cache) are reported as
/// [`Error::Fetch`] from explicit refresh calls and as hook events everywhere
/// else. Evaluation never returns an `Error`; it degrades to the caller's
/// default value with a diagnostic instead.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The client was constructed with invalid options (e.g., an empty SDK key
    /// or a zero poll interval). This is the only error that may occur at
    /// construction time.
    #[error("invalid client options: {0}")]
    InvalidOptions(String),

    /// A configuration fetch failed. See [`FetchError`] for the classification.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The client has been disposed and can no longer serve requests.
    #[error("client has been disposed")]
    Disposed,

    /// An I/O error (e.g., the background runtime thread failed to start).
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

/// Classified outcome of a failed configuration fetch.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FetchError {
    /// The server rejected the SDK key (HTTP 403/404). The fetcher latches
    /// this error and suppresses further transport calls.
    #[error("SDK key is invalid (server returned HTTP {status})")]
    InvalidSdkKey {
        /// HTTP status code the server answered with.
        status: u16,
    },

    /// The server returned HTTP 200 but the body could not be parsed as a
    /// configuration document.
    #[error("fetched configuration is not valid: {reason}")]
    InvalidResponseBody {
        /// Parse error rendered as text.
        reason: String,
    },

    /// The server returned HTTP 304 Not Modified although we never supplied an
    /// ETag (the local cache is empty). This is a protocol violation and must
    /// fail rather than silently produce an empty configuration.
    #[error("server returned 304 Not Modified while the local cache is empty")]
    NotModifiedWithoutCache,

    /// Any other unexpected HTTP status.
    #[error("unexpected HTTP response: {status} {reason}")]
    UnexpectedResponse {
        /// HTTP status code.
        status: u16,
        /// HTTP reason phrase, if any.
        reason: String,
    },

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The request failed on the transport level (connection, DNS, TLS).
    #[error("request failed: {0}")]
    Transport(String),

    /// The fetch was suppressed because the client is in offline mode.
    #[error("client is in offline mode, configuration fetch suppressed")]
    OfflineClient,

    /// The configuration preferences kept redirecting to new base URLs beyond
    /// the allowed number of hops.
    #[error("redirect loop detected while fetching configuration")]
    RedirectLoop,
}

impl FetchError {
    /// Return `true` if retrying later may succeed. Non-transient errors
    /// (invalid SDK key, protocol violations) will fail the same way on every
    /// attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout
            | FetchError::Transport(_)
            | FetchError::UnexpectedResponse { .. } => true,

            FetchError::InvalidSdkKey { .. }
            | FetchError::InvalidResponseBody { .. }
            | FetchError::NotModifiedWithoutCache
            | FetchError::OfflineClient
            | FetchError::RedirectLoop => false,
        }
    }
}
