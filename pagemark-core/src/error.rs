use thiserror::Error;

/// Failures reported by the remote persistence service.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    /// The `(linked_type, linked_id)` pair is not linked to this document.
    /// Retrying cannot help; only a scope reset resolves it.
    #[error("scope rejected by server: {0}")]
    ValidationRejection(String),
    #[error("network failure: {0}")]
    Network(String),
    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ApiError::ValidationRejection(_))
    }
}

/// A markup record that would be rejected by the persistence service.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MarkupError {
    #[error("invalid color {0:?}; expected #rgb or #rrggbb")]
    InvalidColor(String),
    #[error("ink stroke has {count} points; at most {max} allowed")]
    TooManyPoints { count: usize, max: usize },
    #[error("text is {len} characters; at most {max} allowed")]
    TextTooLong { len: usize, max: usize },
    #[error("{count} markups in one save; at most {max} allowed")]
    TooManyMarkups { count: usize, max: usize },
    #[error("markup {id} references page {page} but the document has {page_count} pages")]
    PageOutOfRange {
        id: String,
        page: usize,
        page_count: usize,
    },
    #[error("markup {0} has non-finite geometry")]
    NonFinite(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SaveError {
    #[error("a save is already in flight")]
    InFlight,
    #[error("markup save failed: {0}")]
    Rejected(#[source] ApiError),
    #[error("markup set is not savable: {0}")]
    Invalid(#[source] MarkupError),
    #[error("document flatten failed: {0}")]
    Flatten(#[source] ApiError),
}
