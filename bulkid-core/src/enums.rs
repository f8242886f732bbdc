//! Enum types for id-table lifecycle policy

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// LIFECYCLE ACTIONS
// ============================================================================

/// What to do with the physical id table immediately before a mutation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeforeUseAction {
    /// Create the table before populating it
    Create,
    /// The table already exists
    #[default]
    None,
}

/// What to do with the physical id table immediately after a mutation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AfterUseAction {
    /// Drop the table
    Drop,
    /// Delete the rows written by this run
    Clean,
    /// Leave the table and its rows alone
    #[default]
    None,
}

// ============================================================================
// DDL TRANSACTIONALITY
// ============================================================================

/// How id-table DDL is isolated from the caller's transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DdlTransactionality {
    /// Run DDL inline on the current connection
    #[default]
    None,
    /// Run DDL on a separate logical connection
    Isolate,
    /// Run DDL on a separate logical connection inside its own transaction
    IsolateAndTransact,
}

impl DdlTransactionality {
    /// Whether the DDL must leave the caller's connection.
    pub fn is_isolated(self) -> bool {
        !matches!(self, DdlTransactionality::None)
    }

    /// Whether the isolated work runs in its own committed transaction.
    pub fn is_transacted(self) -> bool {
        matches!(self, DdlTransactionality::IsolateAndTransact)
    }

    /// Convert to the value used in configuration properties.
    pub fn as_config_str(self) -> &'static str {
        match self {
            DdlTransactionality::None => "none",
            DdlTransactionality::Isolate => "isolate",
            DdlTransactionality::IsolateAndTransact => "isolate_and_transact",
        }
    }

    /// Parse from a configuration property value. Matching ignores case.
    pub fn from_config_str(s: &str) -> Result<Self, DdlTransactionalityParseError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(DdlTransactionality::None),
            "isolate" => Ok(DdlTransactionality::Isolate),
            "isolate_and_transact" => Ok(DdlTransactionality::IsolateAndTransact),
            _ => Err(DdlTransactionalityParseError(s.to_string())),
        }
    }
}

impl fmt::Display for DdlTransactionality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_config_str())
    }
}

impl FromStr for DdlTransactionality {
    type Err = DdlTransactionalityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_config_str(s)
    }
}

/// Error when parsing an invalid DDL transaction handling value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdlTransactionalityParseError(pub String);

impl fmt::Display for DdlTransactionalityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid DDL transaction handling: {} (expected none, isolate or isolate_and_transact)",
            self.0
        )
    }
}

impl std::error::Error for DdlTransactionalityParseError {}

// ============================================================================
// STRATEGY KIND
// ============================================================================

/// Physical flavour of id table used by a table based strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Session scoped temporary tables created and dropped around each run
    LocalTemporary,
    /// Global temporary tables with database guaranteed per-session rows
    GlobalTemporary,
    /// Regular tables shared by every session, partitioned by session uid
    Persistent,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::LocalTemporary,
        StrategyKind::GlobalTemporary,
        StrategyKind::Persistent,
    ];

    /// The before-use action every strategy of this kind applies.
    pub fn before_use_action(self) -> BeforeUseAction {
        match self {
            StrategyKind::LocalTemporary => BeforeUseAction::Create,
            StrategyKind::GlobalTemporary | StrategyKind::Persistent => BeforeUseAction::None,
        }
    }

    /// The after-use action every strategy of this kind applies.
    pub fn after_use_action(self) -> AfterUseAction {
        match self {
            StrategyKind::LocalTemporary => AfterUseAction::Drop,
            StrategyKind::GlobalTemporary | StrategyKind::Persistent => AfterUseAction::Clean,
        }
    }

    /// Whether rows must be tagged with the session uid.
    pub fn needs_session_uid_column(self) -> bool {
        matches!(self, StrategyKind::Persistent)
    }

    /// Whether tables are created once at prepare time.
    pub fn creates_tables_at_prepare(self) -> bool {
        !matches!(self, StrategyKind::LocalTemporary)
    }

    /// The DDL transaction handling used when nothing is configured.
    pub fn default_ddl_transactionality(self) -> DdlTransactionality {
        DdlTransactionality::None
    }

    /// Short name used in property keys and log fields.
    pub fn as_config_str(self) -> &'static str {
        match self {
            StrategyKind::LocalTemporary => "local_temporary",
            StrategyKind::GlobalTemporary => "global_temporary",
            StrategyKind::Persistent => "persistent",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_config_str())
    }
}
