//! Core error types.

use thiserror::Error;

use crate::value::Value;

/// Core store errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A bucket with this name is already defined.
    #[error("bucket '{bucket}' is already defined")]
    BucketAlreadyExists {
        /// Bucket name.
        bucket: String,
    },

    /// The requested bucket is not defined.
    #[error("bucket '{bucket}' is not defined")]
    BucketNotDefined {
        /// Bucket name.
        bucket: String,
    },

    /// A bucket definition failed validation at registration time.
    #[error("invalid definition for bucket '{bucket}': {reason}")]
    InvalidDefinition {
        /// Bucket name.
        bucket: String,
        /// What was wrong with the definition.
        reason: String,
    },

    /// Schema validation rejected a record.
    #[error("schema validation failed with {} issue(s)", .issues.len())]
    Validation {
        /// Every issue found, in schema declaration order.
        issues: Vec<ValidationIssue>,
    },

    /// Unique constraint violation.
    #[error("unique constraint violated on {bucket}.{field}: duplicate value {value}")]
    UniqueConstraint {
        /// Bucket name.
        bucket: String,
        /// The unique-indexed field.
        field: String,
        /// The duplicate value.
        value: Value,
    },

    /// Optimistic concurrency conflict detected while committing a transaction.
    #[error("transaction conflict on bucket '{bucket}', key {key}")]
    TransactionConflict {
        /// Bucket the conflict occurred in.
        bucket: String,
        /// Primary key of the conflicting record.
        key: Value,
        /// The field involved, when the conflict is a unique-value collision.
        field: Option<String>,
    },

    /// Record not found (update of a missing key).
    #[error("record not found in bucket '{bucket}': {key}")]
    NotFound {
        /// Bucket name.
        bucket: String,
        /// The missing primary key.
        key: Value,
    },

    /// A query with this name is already defined.
    #[error("query '{query}' is already defined")]
    QueryAlreadyDefined {
        /// Query name.
        query: String,
    },

    /// The requested query is not defined.
    #[error("query '{query}' is not defined")]
    QueryNotDefined {
        /// Query name.
        query: String,
    },

    /// The bucket's actor is no longer running.
    #[error("bucket '{bucket}' is closed")]
    BucketClosed {
        /// Bucket name.
        bucket: String,
    },

    /// Storage adapter failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A user query function failed.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// The store has been stopped.
    #[error("store is stopped")]
    StoreStopped,
}

impl Error {
    /// The validation issues carried by a [`Error::Validation`], if any.
    pub fn validation_issues(&self) -> Option<&[ValidationIssue]> {
        match self {
            Error::Validation { issues } => Some(issues),
            _ => None,
        }
    }
}

/// A single schema validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Field the issue applies to.
    pub field: String,
    /// Human-readable description.
    pub message: String,
    /// Machine-readable issue code.
    pub code: IssueCode,
}

impl ValidationIssue {
    /// Create a new issue.
    pub fn new(field: impl Into<String>, message: impl Into<String>, code: IssueCode) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code,
        }
    }
}

/// Machine-readable validation issue codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueCode {
    /// A required field is null or absent.
    Required,
    /// The value does not match the declared type.
    Type,
    /// The value is not in the declared enum set.
    Enum,
    /// String shorter than `min_length`.
    MinLength,
    /// String longer than `max_length`.
    MaxLength,
    /// String does not match the declared pattern.
    Pattern,
    /// String does not satisfy the declared format.
    Format,
    /// Number below the inclusive minimum.
    Min,
    /// Number above the inclusive maximum.
    Max,
}

impl IssueCode {
    /// Stable string form of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCode::Required => "required",
            IssueCode::Type => "type",
            IssueCode::Enum => "enum",
            IssueCode::MinLength => "min_length",
            IssueCode::MaxLength => "max_length",
            IssueCode::Pattern => "pattern",
            IssueCode::Format => "format",
            IssueCode::Min => "min",
            IssueCode::Max => "max",
        }
    }
}

impl std::fmt::Display for IssueCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
