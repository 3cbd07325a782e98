//! Error types for the userworks store

use rusqlite::{ffi, ErrorCode};
use thiserror::Error;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Main error type for store operations.
///
/// Constraint failures raised by SQLite are classified into their own
/// variants so callers can tell a taken username apart from a dangling
/// author reference without inspecting engine messages.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Uniqueness violation: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("Referential integrity violation: {message}")]
    ForeignKeyViolation { message: String },

    #[error("Check constraint violated: {constraint}")]
    CheckViolation { constraint: String },

    #[error("Required column missing: {column}")]
    NotNullViolation { column: String },

    #[error("Immutable record: {message}")]
    Immutable { message: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Database connection not available")]
    ConnectionUnavailable,

    #[error("Failed to acquire DB lock")]
    Lock,

    #[error("Migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        StoreError::InvalidInput {
            message: message.into(),
        }
    }

    /// True for any engine-enforced integrity failure.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            StoreError::UniqueViolation { .. }
                | StoreError::ForeignKeyViolation { .. }
                | StoreError::CheckViolation { .. }
                | StoreError::NotNullViolation { .. }
                | StoreError::Immutable { .. }
        )
    }
}

/// Strips SQLite's fixed message prefix, leaving the constraint or column name.
fn detail(message: &str, prefix: &str) -> String {
    message
        .strip_prefix(prefix)
        .unwrap_or(message)
        .trim()
        .to_string()
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        let constraint = match &err {
            rusqlite::Error::SqliteFailure(code, message)
                if code.code == ErrorCode::ConstraintViolation =>
            {
                Some((code.extended_code, message.clone().unwrap_or_default()))
            }
            _ => None,
        };
        let Some((code, message)) = constraint else {
            return StoreError::Sqlite(err);
        };

        match code {
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                StoreError::UniqueViolation {
                    constraint: detail(&message, "UNIQUE constraint failed:"),
                }
            }
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => StoreError::ForeignKeyViolation { message },
            ffi::SQLITE_CONSTRAINT_CHECK => StoreError::CheckViolation {
                constraint: detail(&message, "CHECK constraint failed:"),
            },
            ffi::SQLITE_CONSTRAINT_NOTNULL => StoreError::NotNullViolation {
                column: detail(&message, "NOT NULL constraint failed:"),
            },
            ffi::SQLITE_CONSTRAINT_TRIGGER => StoreError::Immutable { message },
            _ => StoreError::Sqlite(err),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StoreError::Lock
    }
}
