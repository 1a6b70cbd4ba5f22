//! KoboldCpp API client
//!
//! HTTP access to a locally hosted KoboldCpp-compatible generation server,
//! plus the incremental decoder for its token stream.

pub mod client;
pub mod stream;

pub use client::KoboldClient;
pub use stream::{ChunkSource, StreamDecoder};

use thiserror::Error;

/// Base URL KoboldCpp listens on out of the box
pub const DEFAULT_BASE_URL: &str = "http://localhost:5001";

pub const MODEL_PATH: &str = "/api/v1/model";
pub const VERSION_PATH: &str = "/api/v1/info/version";
pub const GENERATE_PATH: &str = "/api/v1/generate";
pub const GENERATE_STREAM_PATH: &str = "/api/extra/generate/stream";

/// Errors raised while talking to the generation server
#[derive(Debug, Error)]
pub enum KoboldError {
    /// The server answered with a non-success status
    #[error("API Error ({endpoint}): {status}\nResponse: {body}")]
    Request {
        endpoint: &'static str,
        status: u16,
        body: String,
    },
    /// The response carries no body that could be read incrementally
    #[error("Streaming is not supported by this response (status {status})")]
    StreamUnsupported { status: u16 },
    /// A `data:` frame whose payload is not valid JSON
    #[error("Malformed stream frame {payload:?}: {source}")]
    MalformedFrame {
        payload: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("No results returned by {endpoint}")]
    EmptyResults { endpoint: &'static str },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KoboldError {
    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            KoboldError::Request { status, .. } | KoboldError::StreamUnsupported { status } => {
                Some(*status)
            }
            KoboldError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
