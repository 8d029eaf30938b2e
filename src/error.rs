//! Errors surfaced to the user.
//!
//! Every failing operation converts its error into an [`OcrError`] and stores
//! it in the orchestrator's single message slot, so the user always sees the
//! most recent problem.

use thiserror::Error;

/// Problems with the user's input, caught before any network call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("please select a language first")]
    NoLanguage,

    #[error("language {0:?} is not in the service's catalog")]
    UnknownLanguage(String),

    #[error("please choose a file or enter a file URL")]
    NoSource,

    #[error("please provide either a file or a file URL, not both")]
    SourceConflict,

    #[error("a request is already in progress")]
    Busy,

    #[error("there is no OCR result to export")]
    NoResult,

    #[error("already at the first batch")]
    AtFirstBatch,

    #[error("already at the last batch")]
    AtLastBatch,

    #[error("batch numbers start at 1")]
    InvalidBatchIndex,

    #[error("file type not allowed: {0:?}")]
    UnsupportedFileType(String),

    #[error("file is {size} bytes, but the service accepts at most {limit}")]
    FileTooLarge { size: usize, limit: usize },

    #[error("file URL is empty")]
    EmptyUrl,
}

/// Everything that can go wrong while processing a document.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OcrError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The language list could not be fetched. Processing stays disabled
    /// until the catalog is loaded again.
    #[error("failed to load languages: {0}")]
    CatalogUnavailable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("{message}")]
    Service { message: String },

    /// PDF export failed. The displayed text is unaffected.
    #[error("failed to generate PDF: {0}")]
    ExportFailed(String),
}

impl OcrError {
    /// Did this error come from the batch request itself (as opposed to input
    /// checking or export)?
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, OcrError::Network(_) | OcrError::Service { .. })
    }
}

/// A failure reported by an [`crate::service::OcrService`] call, before the
/// caller decides what kind of user-facing error it becomes.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ServiceFailure {
    /// The request never got a usable HTTP response.
    #[error("{0}")]
    Transport(String),

    /// The service answered with an error.
    #[error("{message}")]
    Rejected { message: String },
}

impl From<ServiceFailure> for OcrError {
    fn from(failure: ServiceFailure) -> Self {
        match failure {
            ServiceFailure::Transport(msg) => OcrError::Network(msg),
            ServiceFailure::Rejected { message } => OcrError::Service { message },
        }
    }
}

impl From<reqwest::Error> for ServiceFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceFailure::Transport(format!("request timed out: {err}"))
        } else if err.is_decode() {
            ServiceFailure::Rejected {
                message: format!("could not parse service response: {err}"),
            }
        } else {
            ServiceFailure::Transport(err.to_string())
        }
    }
}
