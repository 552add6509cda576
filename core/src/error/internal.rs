//! Internal error types.
//!
//! Transport failures are produced by the HTTP layer and converted into the
//! per-operation public errors at the API boundary.

use kiln_proto::ErrorBody;
use thiserror::Error;

use super::ErrorKind;

/// A non-success HTTP response from the backend
#[derive(Debug, Clone, PartialEq, Error)]
#[error("HTTP {status}: {body}")]
pub struct RemoteFailure {
    pub status: u16,
    pub body: ErrorBody,
}

impl RemoteFailure {
    pub fn kind(&self) -> ErrorKind { classify(self.status, self.body.code.as_deref()) }

    pub fn reason(&self) -> String { self.body.reason() }
}

#[derive(Debug, Error)]
pub(crate) enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("{0}")]
    Remote(RemoteFailure),
    #[error("undecodable response: {0}")]
    Decode(String),
}

impl TransportError {
    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Network(_) => ErrorKind::Network,
            TransportError::Remote(failure) => failure.kind(),
            TransportError::Decode(_) => ErrorKind::Query,
        }
    }

    pub(crate) fn reason(&self) -> String {
        match self {
            TransportError::Network(msg) | TransportError::Decode(msg) => msg.clone(),
            TransportError::Remote(failure) => failure.reason(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Map an HTTP status and backend error code onto the error taxonomy.
///
/// Backend codes are SQLSTATEs (`23505`) or gateway codes (`PGRST301`) and take precedence over the status.
pub fn classify(status: u16, code: Option<&str>) -> ErrorKind {
    match code {
        Some("PGRST301" | "PGRST302" | "42501") => return ErrorKind::Auth,
        Some("23505") => return ErrorKind::Conflict,
        Some("23502" | "23503" | "23514" | "22P02" | "22001") => return ErrorKind::Validation,
        Some("42P01" | "42703") => return ErrorKind::Query,
        Some(code) if code.starts_with("PGRST1") || code.starts_with("PGRST2") => return ErrorKind::Query,
        _ => {}
    }
    match status {
        401 | 403 => ErrorKind::Auth,
        404 => ErrorKind::NotFound,
        409 => ErrorKind::Conflict,
        422 => ErrorKind::Validation,
        408 | 429 | 500..=599 => ErrorKind::Network,
        _ => ErrorKind::Query,
    }
}
