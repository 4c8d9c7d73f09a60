use thiserror::Error;

/// Crate-wide error taxonomy. Handlers map every variant onto the HTTP-200
/// response envelope; only `Internal` hides its detail from the client.
#[derive(Debug, Error)]
pub enum Error {
    /// Store or broker hiccup that a retry may fix.
    #[error("transient failure: {0}")]
    Transient(String),

    /// No row for the requested key.
    #[error("no records found")]
    NotFound,

    /// Cache sentinel: the last store query returned nothing, don't re-query.
    /// Translated to `NotFound` before leaving an engine.
    #[error("empty record marker")]
    EmptyMarker,

    /// Duplicate invite, already friends, already a member, no-op update.
    #[error("{0}")]
    Conflict(String),

    /// Authorisation failure.
    #[error("{0}")]
    Forbidden(String),

    /// Parameter validation failure.
    #[error("{0}")]
    Invalid(String),

    /// Programmer error or invariant violation. Logged, surfaced generically.
    #[error("internal server error")]
    Internal(String),
}

impl Error {
    /// Whether this error means "the row does not exist", regardless of
    /// whether the answer came from the store or a cache empty marker.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound | Error::EmptyMarker)
    }

    /// Collapse the cache sentinel into `NotFound` at an engine boundary.
    pub fn into_engine(self) -> Error {
        match self {
            Error::EmptyMarker => Error::NotFound,
            other => other,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("json: {err}"))
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Transient(format!("broker: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
