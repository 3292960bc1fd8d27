//! Error types shared by every part of the service.
//!
//! Absent records are not errors at the store level: lookups return
//! `Option`. `NotFound` is only raised by orchestration steps that cannot
//! proceed without the record.

use crate::analysis::AnalysisStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SeverityError>;

#[derive(Debug, Error)]
pub enum SeverityError {
    /// Provider input is malformed or incomplete
    #[error("Invalid source data: {0}")]
    InvalidSource(String),

    #[error("Unknown fire metadata provider: {0}")]
    UnknownProvider(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    /// Store or blob service cannot be reached, or is not provisioned
    #[error("{backend} unavailable: {reason}")]
    BackendUnavailable { backend: &'static str, reason: String },

    #[error("Cannot publish analysis {analysis_id}: {precondition}")]
    PreconditionFailed {
        analysis_id: String,
        precondition: Precondition,
    },

    #[error("Publishing failed during {step}: {reason}")]
    PublishFailed { step: &'static str, reason: String },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: AnalysisStatus,
        to: AnalysisStatus,
    },

    /// A stored item could not be mapped back to a record
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Blob store error during {operation}: {reason}")]
    BlobStore {
        operation: &'static str,
        reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SeverityError {
    pub(crate) fn publish_failed(step: &'static str, cause: impl std::fmt::Display) -> Self {
        SeverityError::PublishFailed {
            step,
            reason: cause.to_string(),
        }
    }

    pub(crate) fn blob_store(operation: &'static str, cause: impl std::fmt::Display) -> Self {
        SeverityError::BlobStore {
            operation,
            reason: cause.to_string(),
        }
    }
}

/// The publish precondition that was not met
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    NotCompleted { status: AnalysisStatus },
    MissingFireMetadata,
    EmptyAoiId,
    MissingRawRaster,
    RawRasterUnreachable { location: String },
    MissingSourceVector,
    SourceVectorUnreachable { location: String },
    /// Job-level check: every child must be COMPLETED before a job is published
    JobIncomplete { completed: usize, total: usize },
}

impl std::fmt::Display for Precondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Precondition::NotCompleted { status } => {
                write!(f, "status is {status}, expected COMPLETED")
            }
            Precondition::MissingFireMetadata => write!(f, "no fire metadata"),
            Precondition::EmptyAoiId => write!(f, "fire metadata yields an empty aoi id"),
            Precondition::MissingRawRaster => write!(f, "no raw raster location"),
            Precondition::RawRasterUnreachable { location } => {
                write!(f, "raw raster not reachable at {location}")
            }
            Precondition::MissingSourceVector => write!(f, "no source vector location"),
            Precondition::SourceVectorUnreachable { location } => {
                write!(f, "source vector not reachable at {location}")
            }
            Precondition::JobIncomplete { completed, total } => {
                write!(f, "only {completed}/{total} analyses are COMPLETED")
            }
        }
    }
}
