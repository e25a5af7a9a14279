//! Backend error type.

use std::fmt::Display;

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// A configured backend client could not be built. Fatal at startup.
    #[error("failed to construct {backend} client: {reason}")]
    Construction {
        backend: &'static str,
        reason: String,
    },

    #[error("{backend} request failed: {source}")]
    Request {
        backend: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{backend} returned {status}: {body}")]
    Status {
        backend: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("{backend} response could not be decoded: {reason}")]
    Decode {
        backend: &'static str,
        reason: String,
    },

    #[error("invalid service instance: {0}")]
    InvalidInstance(String),
}

impl BackendError {
    pub fn construction(backend: &'static str, reason: impl Display) -> Self {
        Self::Construction {
            backend,
            reason: reason.to_string(),
        }
    }

    pub fn decode(backend: &'static str, reason: impl Display) -> Self {
        Self::Decode {
            backend,
            reason: reason.to_string(),
        }
    }

    pub fn is_construction(&self) -> bool {
        matches!(self, Self::Construction { .. })
    }
}
