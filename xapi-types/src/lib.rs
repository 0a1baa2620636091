//! Shared error taxonomy, reserved field names and the canonical dynamic
//! value type used across the schema, query, aggregation, data and patch
//! crates.
//!
//! The HTTP layer that ultimately renders these errors to clients lives
//! outside this workspace; [`Code`] only carries the *classification* an
//! outer layer needs to pick a response class, not a transport-specific
//! status type.

pub mod reserved;

use thiserror::Error;

/// The canonical dynamic value used throughout the core: documents,
/// query DSL objects, patches and aggregation parameters are all
/// `serde_json::Value`, matching the design note to pick one dynamic
/// value type and use it everywhere instead of juggling a bespoke one.
pub type Value = serde_json::Value;

pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`], used by an outer layer to map
/// failures onto a response class (e.g. 4xx vs 5xx) without this crate
/// knowing anything about HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    /// Malformed input, unknown field, type mismatch: the caller's fault.
    ClientError,
    /// Strict-mode schema rejected an undeclared field.
    MissingType,
    /// A foreign schema reference could not be resolved or loaded.
    ForeignSchema,
    /// Requested document does not exist.
    DocNotFound,
    /// Optimistic-concurrency version conflict on write.
    DocVersionConflict,
    /// Requested resource does not exist.
    NotFound,
    /// A codec invariant was violated while encoding or decoding.
    Serialisation,
    /// Transient networking failure.
    Network,
    /// Networking failure that timed out.
    NetworkTimeout,
    /// The database is not currently available.
    DatabaseNotAvailable,
    /// Internal retry signal; should never escape a retry loop.
    DatabaseModified,
    /// An operation was requested that is not valid in the current state.
    InvalidOperation,
    /// A limit configured for the operation was exceeded.
    Limit,
    /// Unexpected internal error.
    Internal,
}

impl Code {
    /// Coarse class used by an outer layer to choose a gateway/service
    /// response category (4xx-class vs 5xx-class mapping).
    pub fn class(&self) -> &'static str {
        match self {
            Code::ClientError
            | Code::MissingType
            | Code::ForeignSchema
            | Code::DocNotFound
            | Code::DocVersionConflict
            | Code::NotFound
            | Code::Limit => "client",
            Code::Network | Code::NetworkTimeout | Code::DatabaseNotAvailable => "unavailable",
            Code::Serialisation | Code::DatabaseModified | Code::InvalidOperation | Code::Internal => {
                "internal"
            }
        }
    }
}

pub trait ErrorCode {
    fn error_code(&self) -> Code;
}

/// Process-wide error taxonomy. Each kind corresponds to one
/// row of the error taxonomy table; `DatabaseModifiedError` is an
/// internal retry control signal and callers that let it escape a
/// retry loop have a bug.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    ClientError(String),

    #[error("field `{0}` has no declared type and strict mode forbids inference")]
    MissingType(String),

    #[error("foreign schema error: {0}")]
    ForeignSchema(String),

    #[error("document `{0}` not found")]
    DocNotFound(String),

    #[error("version conflict indexing document `{0}`: expected {expected}, found {found}")]
    DocVersionConflict {
        id: String,
        expected: String,
        found: String,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("serialisation error: {0}")]
    Serialisation(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("network timeout: {0}")]
    NetworkTimeout(String),

    #[error("database not available: {0}")]
    DatabaseNotAvailable(String),

    /// Internal retry signal. Never surfaced to a user.
    #[error("database modified, retry")]
    DatabaseModified,

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("limit exceeded: {0}")]
    Limit(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn client(msg: impl Into<String>) -> Self {
        Error::ClientError(msg.into())
    }
}

impl ErrorCode for Error {
    fn error_code(&self) -> Code {
        match self {
            Error::ClientError(_) => Code::ClientError,
            Error::MissingType(_) => Code::MissingType,
            Error::ForeignSchema(_) => Code::ForeignSchema,
            Error::DocNotFound(_) => Code::DocNotFound,
            Error::DocVersionConflict { .. } => Code::DocVersionConflict,
            Error::NotFound(_) => Code::NotFound,
            Error::Serialisation(_) => Code::Serialisation,
            Error::Network(_) => Code::Network,
            Error::NetworkTimeout(_) => Code::NetworkTimeout,
            Error::DatabaseNotAvailable(_) => Code::DatabaseNotAvailable,
            Error::DatabaseModified => Code::DatabaseModified,
            Error::InvalidOperation(_) => Code::InvalidOperation,
            Error::Limit(_) => Code::Limit,
            Error::Internal(_) => Code::Internal,
        }
    }
}
