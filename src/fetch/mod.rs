// Network side of the engine: the transport trait, the reqwest transport and the
// per-endpoint request deduplication layer.

mod dedup;
mod http;

pub use dedup::{PendingFetch, RequestDeduper};
pub use http::HttpFetcher;

use std::future::Future;

use thiserror::Error;

use crate::models::Sample;

/// Why a poll produced no sample. Everything except `Cancelled` counts as a failed
/// poll for retry purposes; the variant only changes the displayed message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Connection refused, DNS, TLS, reset...
    #[error("network failure: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("endpoint returned HTTP {0}")]
    BadStatus(u16),

    /// Body could not be decoded as JSON at all.
    #[error("response body is not JSON: {0}")]
    InvalidBody(String),

    /// Superseded by a newer request or torn down.
    #[error("request cancelled")]
    Cancelled,
}

impl FetchError {
    /// Short label for status text.
    pub fn label(&self) -> String {
        match self {
            FetchError::Network(_) => "network".into(),
            FetchError::Timeout => "timeout".into(),
            FetchError::BadStatus(code) => format!("HTTP {code}"),
            FetchError::InvalidBody(_) => "bad payload".into(),
            FetchError::Cancelled => "cancelled".into(),
        }
    }
}

/// Performs one GET against a target's stats endpoint and coerces the payload.
pub trait TelemetryFetcher: Send + Sync + 'static {
    fn fetch(&self, endpoint: &str) -> impl Future<Output = Result<Sample, FetchError>> + Send;
}
