use thiserror::Error;

/// Error taxonomy shared across the engine. Every fallible operation in this
/// crate returns `Result<T, Error>`; call sites that need to annotate an
/// operation name build a `Backend`/`InvalidInput` variant with that context
/// folded into the message (§7: "errors carry the failing operation").
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Error::Backend(msg.into())
    }

    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Error::NotImplemented(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Error::Cancelled(msg.into())
    }

    /// HTTP status code per the transport mapping in §7: InvalidInput→400,
    /// NotFound→404, Backend/IO→500, Cancelled→499 (non-standard but widely
    /// used nginx convention for client-cancelled requests), NotImplemented→501
    /// (watcher endpoints when the watcher is disabled, §6).
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidInput(_) => 400,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::Io(_) | Error::Backend(_) => 500,
            Error::Cancelled(_) => 499,
            Error::NotImplemented(_) => 501,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound(e.to_string()),
            other => Error::Backend(other.to_string()),
        }
    }
}

impl From<tantivy::TantivyError> for Error {
    fn from(e: tantivy::TantivyError) -> Self {
        Error::Backend(format!("tantivy: {e}"))
    }
}

impl From<tantivy::query::QueryParserError> for Error {
    fn from(e: tantivy::query::QueryParserError) -> Self {
        Error::InvalidInput(format!("query parse: {e}"))
    }
}
