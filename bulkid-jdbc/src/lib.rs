//! bulkid JDBC - Execution Boundary and Mock Implementation
//!
//! Defines the capabilities the id-table subsystem needs from its host:
//! a connection that executes statements, a way to obtain standalone
//! connections outside any session, a delegate that runs work isolated from
//! the caller's transaction, and the execution context of the active unit
//! of work. `MockDatabase` implements all of them in memory for tests.

pub mod isolation;
pub mod logger;
pub mod mock;
pub mod translator;

pub use isolation::{acquire_connection, ConnectionGuard, JdbcIsolationDelegate};
pub use logger::SqlStatementLogger;
pub use mock::{ExecutedStatement, MockConnection, MockDatabase, MockSession, TransactionEvent};
pub use translator::{SqlExceptionTranslator, StandardSqlExceptionTranslator};

use bulkid_core::{SessionIdentifier, SqlError, SqlValue};

// ============================================================================
// CONNECTION TRAITS
// ============================================================================

/// A physical database connection.
pub trait Connection: Send {
    /// Diagnostic identifier, unique per database.
    fn id(&self) -> u64;

    /// Prepare and execute one statement, returning the affected row count.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, SqlError>;

    /// Start a transaction, leaving auto-commit mode.
    fn begin(&mut self) -> Result<(), SqlError>;

    /// Commit the current transaction.
    fn commit(&mut self) -> Result<(), SqlError>;

    /// Roll back the current transaction.
    fn rollback(&mut self) -> Result<(), SqlError>;
}

/// Obtains connections outside any session, for factory level work.
pub trait ConnectionAccess: Send + Sync {
    fn obtain_connection(&self) -> Result<Box<dyn Connection>, SqlError>;

    fn release_connection(&self, connection: Box<dyn Connection>) -> Result<(), SqlError>;
}

/// Unit of JDBC work handed to an [`IsolationDelegate`].
pub type Work<'a> = dyn FnMut(&mut dyn Connection) -> Result<(), SqlError> + 'a;

/// Runs work on a connection isolated from the caller's transaction.
pub trait IsolationDelegate {
    /// Run `work` on a separate logical connection. When `transacted`, the
    /// work runs in its own transaction that is committed on success and
    /// rolled back on failure, independently of the caller.
    fn delegate_work(&mut self, work: &mut Work<'_>, transacted: bool) -> Result<(), SqlError>;
}

/// The active unit of work a bulk mutation executes in.
pub trait ExecutionContext {
    /// Identifier of the session executing the statement.
    fn session_identifier(&self) -> SessionIdentifier;

    /// The connection already bound to the unit of work. Borrowed, never
    /// closed or committed by callers.
    fn connection(&mut self) -> &mut dyn Connection;

    fn isolation_delegate(&mut self) -> &mut dyn IsolationDelegate;

    fn statement_logger(&self) -> &SqlStatementLogger;
}
