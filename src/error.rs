//! Unified error type.

use std::net::SocketAddr;

use thiserror::Error;

use crate::scope::ScopeError;

/// The error type returned by mochi's fallible operations.
///
/// Application-level failures (404, 405, 422, etc.) are expressed as HTTP
/// responses, not as `Error`s, and route-registration mistakes panic at
/// setup time. This type surfaces everything in between: configuration that
/// does not validate, listener failures, shutdown that overran its scope, and
/// renderers that could not produce a body.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The listener could not be bound.
    #[error("listen {network} {addr}: {source}")]
    Bind {
        network: String,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The configured address did not resolve to a usable socket address.
    #[error("resolve address: {0}")]
    Resolve(String),

    /// A configuration value was rejected; the previous configuration stays in effect.
    #[error("config: {0}")]
    Config(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// A redirect was rendered with a status outside 201 and 300–308.
    #[error("cannot redirect with status code {0}")]
    Redirect(u16),

    #[error("server is already running")]
    AlreadyRunning,

    #[error("no server")]
    NoServer,

    /// The scope bounding a graceful shutdown finished before every
    /// connection drained.
    #[error("shutdown: {0}")]
    Shutdown(ScopeError),
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
