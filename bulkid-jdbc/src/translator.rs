//! Translation of driver failures into [`JdbcError`] categories.

use bulkid_core::{JdbcError, SqlError};

/// Converts a raw driver failure into a categorised error.
pub trait SqlExceptionTranslator: Send + Sync {
    fn convert(&self, cause: SqlError, context: &str) -> JdbcError;
}

/// Classifies by SQLState class.
///
/// - `08` connection exceptions
/// - `23` integrity constraint violations
/// - `42` syntax errors and access rule violations
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardSqlExceptionTranslator;

impl SqlExceptionTranslator for StandardSqlExceptionTranslator {
    fn convert(&self, cause: SqlError, context: &str) -> JdbcError {
        let context = context.to_string();
        match cause.sql_state_class() {
            Some("08") => JdbcError::Connection { context, cause },
            Some("23") => JdbcError::ConstraintViolation { context, cause },
            Some("42") => JdbcError::Grammar { context, cause },
            _ => JdbcError::Generic { context, cause },
        }
    }
}
