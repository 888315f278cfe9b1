//! Error types for the database engine.

use thiserror::Error;

/// A single field-scoped validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Dotted path to the offending field, e.g. `"metadata.views"`.
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Reasons a plugin registry build can fail, per the fixed tag set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginErrorReason {
    MissingName,
    InvalidOperator,
    OperatorConflict,
    InvalidCodec,
    MissingDependencies,
    MissingIdGenerator,
}

impl std::fmt::Display for PluginErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PluginErrorReason::MissingName => "missing_name",
            PluginErrorReason::InvalidOperator => "invalid_operator",
            PluginErrorReason::OperatorConflict => "operator_conflict",
            PluginErrorReason::InvalidCodec => "invalid_codec",
            PluginErrorReason::MissingDependencies => "missing_dependencies",
            PluginErrorReason::MissingIdGenerator => "missing_id_generator",
        };
        f.write_str(s)
    }
}

/// Main error type returned by every public operation on [`crate::db::Database`].
#[derive(Error, Debug, Clone)]
pub enum DbError {
    #[error("validation failed: {0:?}")]
    Validation(Vec<ValidationIssue>),

    #[error("duplicate key for collection {collection:?}: {field} = {value}")]
    DuplicateKey {
        collection: String,
        field: String,
        value: String,
    },

    #[error("entity not found in collection {collection:?}: {id}")]
    NotFound { collection: String, id: String },

    #[error("foreign key violation on {field} = {value:?} referencing {target_collection:?}")]
    ForeignKey {
        field: String,
        value: String,
        target_collection: String,
    },

    #[error("operation error: {0}")]
    Operation(String),

    #[error("plugin {plugin:?} failed to register: {reason}")]
    Plugin {
        plugin: String,
        reason: PluginErrorReason,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
}

impl DbError {
    pub fn validation(issues: Vec<ValidationIssue>) -> Self {
        Self::Validation(issues)
    }

    pub fn single_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![ValidationIssue::new(field, message)])
    }

    /// Emit this error at the appropriate tracing level and return it, mirroring
    /// the teacher's practice of logging at collaborator failure boundaries.
    pub fn log_and_return(self) -> Self {
        match &self {
            DbError::Validation(_)
            | DbError::DuplicateKey { .. }
            | DbError::NotFound { .. }
            | DbError::ForeignKey { .. }
            | DbError::Operation(_) => tracing::warn!(error = %self, "operation rejected"),
            DbError::Plugin { .. }
            | DbError::Storage(_)
            | DbError::Serialization(_)
            | DbError::UnsupportedFormat(_) => tracing::error!(error = %self, "collaborator failure"),
        }
        self
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
