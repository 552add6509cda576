//! Public error types for kiln.
//!
//! Every operation returns its failure as a value. Each family of operations has
//! its own error enum, and every enum maps onto the shared [`ErrorKind`] taxonomy
//! so callers can render failures without matching on every variant.

pub mod internal;

pub use internal::{classify, RemoteFailure};

pub(crate) use internal::TransportError;

use kiln_proto::RecordId;
use thiserror::Error;

/// Coarse failure taxonomy shared by all operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ErrorKind {
    /// Transport unreachable or timed out; recoverable by retrying
    Network,
    /// Invalid credentials, missing or expired session, insufficient permission
    Auth,
    /// Backend constraint violation on create/update
    Validation,
    /// Uniqueness conflict on create/update
    Conflict,
    /// The targeted identifier has no matching row
    NotFound,
    /// Malformed request, or a response that failed shape validation
    Query,
    /// Realtime subscription failure
    Channel,
}

/// Error type for read operations.
///
/// Returned from: `Table::find_all`, `find_by_id`, `count`
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetrievalError {
    #[error("network error: {0}")]
    Network(String),

    #[error("not authorized: {0}")]
    Auth(String),

    /// Malformed request or a response that could not be validated as the record type
    #[error("invalid query: {0}")]
    Query(String),
}

impl RetrievalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Query(_) => ErrorKind::Query,
        }
    }
}

impl From<TransportError> for RetrievalError {
    fn from(err: TransportError) -> Self {
        match err.kind() {
            ErrorKind::Network => Self::Network(err.reason()),
            ErrorKind::Auth => Self::Auth(err.reason()),
            _ => Self::Query(err.reason()),
        }
    }
}

impl From<RowError> for RetrievalError {
    fn from(err: RowError) -> Self { Self::Query(err.to_string()) }
}

impl From<AuthError> for RetrievalError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Network(msg) => Self::Network(msg),
            other => Self::Auth(other.to_string()),
        }
    }
}

/// Error type for write operations.
///
/// Returned from: `Table::create`, `update`, `delete`, `bulk_insert`, `bulk_update`
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MutationError {
    #[error("network error: {0}")]
    Network(String),

    #[error("not authorized: {0}")]
    Auth(String),

    /// Required field missing, check constraint, bad value
    #[error("validation failed: {0}")]
    Validation(String),

    /// Uniqueness violation
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("no row with id {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Query(String),
}

impl MutationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Query(_) => ErrorKind::Query,
        }
    }

    pub(crate) fn not_found(id: &RecordId) -> Self { Self::NotFound(id.to_string()) }
}

impl From<TransportError> for MutationError {
    fn from(err: TransportError) -> Self {
        let reason = err.reason();
        match err.kind() {
            ErrorKind::Network => Self::Network(reason),
            ErrorKind::Auth => Self::Auth(reason),
            ErrorKind::Validation => Self::Validation(reason),
            ErrorKind::Conflict => Self::Conflict(reason),
            ErrorKind::NotFound => Self::NotFound(reason),
            ErrorKind::Query | ErrorKind::Channel => Self::Query(reason),
        }
    }
}

impl From<RowError> for MutationError {
    fn from(err: RowError) -> Self { Self::Query(err.to_string()) }
}

impl From<AuthError> for MutationError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Network(msg) => Self::Network(msg),
            other => Self::Auth(other.to_string()),
        }
    }
}

/// Error type for authentication and session operations.
///
/// Returned from: `get_session`, `sign_in`, `sign_up`, `sign_out`, `refresh_session`
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AuthError {
    #[error("network error: {0}")]
    Network(String),

    /// The auth endpoint refused the request; carries its human readable reason
    #[error("{0}")]
    Rejected(String),

    #[error("not signed in")]
    NotSignedIn,

    /// The auth endpoint answered with something that is not a token bundle
    #[error("unexpected auth response: {0}")]
    Protocol(String),

    #[error("session store: {0}")]
    Store(String),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            _ => ErrorKind::Auth,
        }
    }
}

impl From<TransportError> for AuthError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network(msg) => Self::Network(msg),
            TransportError::Remote(failure) if failure.kind() == ErrorKind::Network => Self::Network(failure.reason()),
            TransportError::Remote(failure) => Self::Rejected(failure.reason()),
            TransportError::Decode(msg) => Self::Protocol(msg),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self { Self::Store(err.to_string()) }
}

/// Error type for realtime channels.
///
/// Returned from: `Client::open_channel`, `Table::subscribe`, `Table::changes`, and as stream items
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelError {
    /// No realtime connector is configured on the client
    #[error("realtime is not configured")]
    Unavailable,

    #[error("could not connect: {0}")]
    Connect(String),

    /// The server refused the join (unknown table, missing permission)
    #[error("join rejected: {0}")]
    Rejected(String),

    #[error("join timed out")]
    Timeout,

    /// The channel was closed by the server or the transport dropped
    #[error("channel closed{}", .0.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed(Option<String>),

    /// A change frame whose row failed validation. The channel stays open.
    #[error("invalid change payload: {0}")]
    InvalidPayload(String),
}

impl ChannelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connect(_) | Self::Timeout => ErrorKind::Network,
            _ => ErrorKind::Channel,
        }
    }
}

impl From<AuthError> for ChannelError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Network(msg) => Self::Connect(msg),
            other => Self::Rejected(other.to_string()),
        }
    }
}

/// Error type for object storage.
///
/// Returned from: `Bucket::upload`, `download`
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ObjectError {
    #[error("network error: {0}")]
    Network(String),

    #[error("not authorized: {0}")]
    Auth(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

impl ObjectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Auth(_) => ErrorKind::Auth,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Rejected(_) => ErrorKind::Validation,
        }
    }
}

impl From<TransportError> for ObjectError {
    fn from(err: TransportError) -> Self {
        let reason = err.reason();
        match err.kind() {
            ErrorKind::Network => Self::Network(reason),
            ErrorKind::Auth => Self::Auth(reason),
            ErrorKind::NotFound => Self::NotFound(reason),
            _ => Self::Rejected(reason),
        }
    }
}

impl From<AuthError> for ObjectError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Network(msg) => Self::Network(msg),
            other => Self::Auth(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid url {0}")]
    InvalidUrl(String),

    #[error("anon key is empty")]
    MissingKey,

    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("http client: {0}")]
    Http(String),
}

/// Failure reading or writing a persisted session
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Why a row coming off the network was not accepted as a record
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowError {
    /// The row is an error object (`{message, code, ...}`) rather than data
    #[error("error payload in place of data: {0}")]
    ErrorPayload(String),

    /// The row does not deserialize into the record type
    #[error("unexpected row shape: {0}")]
    Shape(String),

    /// The row deserialized but failed the record's own validation
    #[error("invalid row: {0}")]
    Invalid(String),
}
