//! Error types for lineage assembly, translation, validation and binding

use thiserror::Error;

use crate::validate::Violations;
use crate::version::SchemaVersion;

/// Result type for lineage operations
pub type Result<T> = std::result::Result<T, LineageError>;

/// Lineage errors
#[derive(Error, Debug)]
pub enum LineageError {
    #[error("Invalid lineage: {0}")]
    InvalidLineage(String),

    #[error("Lens incomplete: no lens connects {lower} and {higher}")]
    LensIncomplete {
        lower: SchemaVersion,
        higher: SchemaVersion,
    },

    #[error("Schema version {0} does not exist in lineage")]
    SchemaNotExist(SchemaVersion),

    #[error("Type {type_name} is not assignable to the primary schema: field '{field}' {reason}")]
    NotAssignable {
        type_name: String,
        field: String,
        reason: String,
    },

    #[error("Instance is invalid: {0}")]
    SchemaInvalid(Violations),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Invalid declaration format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported declaration format {found}, expected {expected}")]
    UnsupportedFormat { found: String, expected: String },

    #[error("Lineage '{id}' not found in {source_name}")]
    SourceNotFound { id: String, source_name: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Semver error: {0}")]
    Semver(#[from] semver::Error),
}

impl LineageError {
    /// Stable message id for this error, suitable for logs and API responses
    pub fn code(&self) -> &'static str {
        match self {
            LineageError::InvalidLineage(_) => "lineage.invalid",
            LineageError::LensIncomplete { .. } => "lineage.lensIncomplete",
            LineageError::SchemaNotExist(_) => "lineage.schemaNotExist",
            LineageError::NotAssignable { .. } => "lineage.notAssignable",
            LineageError::SchemaInvalid(_) => "lineage.schemaInvalid",
            LineageError::InvalidVersion(_) => "lineage.invalidVersion",
            LineageError::InvalidFormat(_) => "lineage.invalidFormat",
            LineageError::UnsupportedFormat { .. } => "lineage.unsupportedFormat",
            LineageError::SourceNotFound { .. } => "lineage.sourceNotFound",
            LineageError::Io(_) => "lineage.io",
            LineageError::Json(_) => "lineage.json",
            LineageError::Semver(_) => "lineage.semver",
        }
    }

    /// Whether this error concerns a single call rather than the lineage itself
    pub fn is_call_local(&self) -> bool {
        matches!(
            self,
            LineageError::SchemaNotExist(_) | LineageError::SchemaInvalid(_)
        )
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        LineageError::InvalidLineage(reason.into())
    }
}
