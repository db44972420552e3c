use std::io;

use crate::gateway::LifecycleState;

/// Failures raised by a cache store or the storage holding the stores.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("entry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("quota exceeded for store {store}: {required} bytes required, limit is {limit}")]
    QuotaExceeded {
        store: String,
        required: u64,
        limit: u64,
    },

    #[error("response for {key} with status {status} cannot be stored")]
    Unstorable { key: String, status: http::StatusCode },

    #[error("invalid store name: {0:?}")]
    InvalidStoreName(String),

    #[error("corrupt cache entry {0}")]
    Corrupt(String),
}

/// Failures raised while talking to the upstream network.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: LifecycleState,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

pub type CacheResult<T> = Result<T, CacheError>;
