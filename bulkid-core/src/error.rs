//! Error types for bulk id-table operations

use std::fmt;
use thiserror::Error;

/// A raw failure reported by the database driver for one statement or
/// connection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlError {
    /// Driver message
    pub message: String,
    /// Five character SQLState, when the driver reported one
    pub sql_state: Option<String>,
    /// Vendor specific error code
    pub vendor_code: i32,
}

impl SqlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql_state: None,
            vendor_code: 0,
        }
    }

    pub fn with_state(message: impl Into<String>, sql_state: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql_state: Some(sql_state.into()),
            vendor_code: 0,
        }
    }

    /// The two character SQLState class (`"23"` for integrity violations, ...).
    pub fn sql_state_class(&self) -> Option<&str> {
        self.sql_state
            .as_deref()
            .filter(|state| state.len() >= 2)
            .map(|state| &state[..2])
    }
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sql_state {
            Some(state) => write!(f, "{} [SQLState: {}, code: {}]", self.message, state, self.vendor_code),
            None => write!(f, "{} [code: {}]", self.message, self.vendor_code),
        }
    }
}

impl std::error::Error for SqlError {}

/// Driver failures after translation into a category the caller can act on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JdbcError {
    #[error("JDBC connection failure ({context}): {cause}")]
    Connection { context: String, cause: SqlError },

    #[error("Constraint violation ({context}): {cause}")]
    ConstraintViolation { context: String, cause: SqlError },

    #[error("SQL grammar error ({context}): {cause}")]
    Grammar { context: String, cause: SqlError },

    #[error("Could not execute JDBC work ({context}): {cause}")]
    Generic { context: String, cause: SqlError },
}

impl JdbcError {
    /// The driver failure this error was translated from.
    pub fn cause(&self) -> &SqlError {
        match self {
            JdbcError::Connection { cause, .. }
            | JdbcError::ConstraintViolation { cause, .. }
            | JdbcError::Grammar { cause, .. }
            | JdbcError::Generic { cause, .. } => cause,
        }
    }
}

/// Errors raised while resolving or building a bulk mutation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MutationError {
    #[error("Unknown entity type: {entity}")]
    UnknownEntity { entity: String },

    #[error("No id table registered for entity {entity}; was the strategy prepared?")]
    IdTableNotFound { entity: String },

    #[error("Entity {entity} has no attribute {attribute}")]
    UnknownAttribute { entity: String, attribute: String },

    #[error("Bulk update of {entity} has no assignments")]
    EmptyAssignments { entity: String },

    #[error("Invalid descriptor for entity {entity}: {reason}")]
    InvalidDescriptor { entity: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Metamodel could not be read: {reason}")]
    InvalidMetamodel { reason: String },
}

/// Master error type for bulk id-table operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BulkIdError {
    /// Untranslated failure of a data mutation statement
    #[error("SQL error: {0}")]
    Sql(#[from] SqlError),

    #[error("JDBC error: {0}")]
    Jdbc(#[from] JdbcError),

    #[error("Mutation error: {0}")]
    Mutation(#[from] MutationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for bulk id-table operations.
pub type BulkIdResult<T> = Result<T, BulkIdError>;

// =============================================================================
// TESTS
// =============================================================================
