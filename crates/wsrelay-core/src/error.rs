use std::time::Duration;
use thiserror::Error;

/// Errors produced by the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("bind {addr} failed: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {target} failed: {source}")]
    Dial {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {target} timed out after {after:?}")]
    DialTimeout { target: String, after: Duration },

    #[error("listener {0} already started")]
    AlreadyStarted(usize),

    #[error("no listener could be started")]
    NoListeners,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type RelayResult<T> = Result<T, RelayError>;
