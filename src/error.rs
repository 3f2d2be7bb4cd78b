use thiserror::Error;

/// Failures surfaced by the store, the generation pipeline and run creation.
///
/// Run *processing* failures never appear here: they settle the run as
/// `failed` and are read back through polling.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("collection has no original source document")]
    NoSourceDocument,

    #[error("text extraction failed: {0}")]
    ExtractionFailure(String),

    #[error("completion failed: {0}")]
    CompletionFailure(String),

    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("invalid comparison: {0}")]
    InvalidComparison(String),

    #[error("run {0} has not failed and cannot be resubmitted")]
    NotResubmittable(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
