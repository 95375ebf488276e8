//! Failure modes of a single dataset transform
//!
//! Every variant is fatal for the dataset run that produced it, and for that
//! run only: the orchestrator catches them at the per-dataset boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Result type of transform engine operations
pub type TransformResult<T> = std::result::Result<T, TransformError>;

/// Reasons why a dataset could not be transformed
#[derive(Debug, Error)]
pub enum TransformError {
    /// Input archive is missing, unreadable or not a ZIP container
    #[error("archive {path} is unreadable: {reason}")]
    CorruptArchive { path: PathBuf, reason: String },

    /// Input archive is a valid container without any member
    #[error("archive {path} does not contain any member")]
    EmptyArchive { path: PathBuf },

    /// The member selection policy did not match any archive member
    #[error("archive {path} has no member matching {selection}")]
    MemberNotFound { path: PathBuf, selection: String },

    /// A record does not have the declared number of columns
    #[error("row {row} has {found} fields, but {expected} columns were declared")]
    SchemaMismatch {
        row: u64,
        expected: usize,
        found: usize,
    },

    /// A field could not be decoded under the configured text encoding
    #[error("row {row} could not be decoded: {reason}")]
    Decode { row: u64, reason: String },

    /// The delimited text framing itself is broken (e.g. unterminated quote)
    #[error("malformed delimited text: {reason}")]
    Parse { reason: String },

    /// Underlying storage rejected a write
    #[error("failed to write {path}: {reason}")]
    OutputWriteFailure { path: PathBuf, reason: String },

    /// Acquisition could not provide the input archive
    #[error("input for {dataset} is unavailable: {reason}")]
    InputUnavailable { dataset: Box<str>, reason: String },
}
//
impl TransformError {
    /// Short stable name of the error kind, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CorruptArchive { .. } => "CorruptArchive",
            Self::EmptyArchive { .. } => "EmptyArchive",
            Self::MemberNotFound { .. } => "MemberNotFound",
            Self::SchemaMismatch { .. } => "SchemaMismatch",
            Self::Decode { .. } => "Decode",
            Self::Parse { .. } => "Parse",
            Self::OutputWriteFailure { .. } => "OutputWriteFailure",
            Self::InputUnavailable { .. } => "InputUnavailable",
        }
    }

    /// Wrap a storage error that occured while producing `path`
    pub(crate) fn output(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::OutputWriteFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
