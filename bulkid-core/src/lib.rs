//! bulkid Core - Data Types
//!
//! Pure data structures shared by the bulk id-table crates: id-table
//! definitions, entity descriptors, lifecycle enums, SQL values, errors and
//! configuration. This crate contains no database access.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod config;
pub mod entity;
pub mod enums;
pub mod error;
pub mod table;

pub use config::{BulkIdSettings, SessionFactoryOptions, TableProvisioning};
pub use entity::{AttributeMapping, EntityDescriptor, EntityTable, KeyColumn, Metamodel};
pub use enums::{
    AfterUseAction, BeforeUseAction, DdlTransactionality, DdlTransactionalityParseError,
    StrategyKind,
};
pub use error::{BulkIdError, BulkIdResult, ConfigError, JdbcError, MutationError, SqlError};
pub use table::{IdTable, IdTableColumn, QualifiedTableName, TableRole};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Name of the column partitioning shared id-table rows by session.
pub const SESSION_UID_COLUMN: &str = "hib_sess_id";

/// Identifier of one unit of work (session).
///
/// UUIDv7, so identifiers sort by the time the session was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionIdentifier(pub Uuid);

impl SessionIdentifier {
    /// Generate a fresh session identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionIdentifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

// ============================================================================
// SQL VALUES
// ============================================================================

/// A JDBC bind parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Uuid(Uuid),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<Uuid> for SqlValue {
    fn from(value: Uuid) -> Self {
        SqlValue::Uuid(value)
    }
}

/// A piece of already translated SQL with its positional (`?`) parameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl SqlFragment {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Number of `?` placeholders in the SQL text.
    pub fn placeholder_count(&self) -> usize {
        self.sql.matches('?').count()
    }
}
