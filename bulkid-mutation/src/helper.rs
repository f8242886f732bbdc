//! Best-effort id-table lifecycle: create, drop and clean.
//!
//! None of these operations propagate database errors. A failed CREATE
//! usually means the table already exists (another session won the race,
//! or a previous run left it behind); a failed DROP or clean leaves at most
//! an empty table or stale rows behind. Failures are logged and reported
//! through [`DdlOutcome`] so callers and tests can inspect them.

use crate::{IdTableExporter, IdTableSupport};
use bulkid_core::{
    BulkIdResult, DdlTransactionality, IdTable, SqlError, SqlValue, SESSION_UID_COLUMN,
};
use bulkid_jdbc::{
    acquire_connection, Connection, ConnectionAccess, ExecutionContext, SqlExceptionTranslator,
    SqlStatementLogger,
};
use std::sync::Arc;

// ============================================================================
// OUTCOME
// ============================================================================

/// One statement (or the surrounding isolation) that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdlFailure {
    /// `None` when the failure happened outside any statement, e.g. while
    /// obtaining the isolated connection or committing its transaction.
    pub statement: Option<String>,
    pub error: SqlError,
}

/// Result of a best-effort lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlOutcome {
    Applied,
    Failed { failures: Vec<DdlFailure> },
}

impl DdlOutcome {
    fn from_failures(failures: Vec<DdlFailure>) -> Self {
        if failures.is_empty() {
            DdlOutcome::Applied
        } else {
            DdlOutcome::Failed { failures }
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, DdlOutcome::Applied)
    }

    pub fn failures(&self) -> &[DdlFailure] {
        match self {
            DdlOutcome::Applied => &[],
            DdlOutcome::Failed { failures } => failures,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Create,
    Drop,
    Clean,
}

impl Lifecycle {
    fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Create => "create",
            Lifecycle::Drop => "drop",
            Lifecycle::Clean => "clean",
        }
    }
}

// ============================================================================
// HELPER
// ============================================================================

/// Lifecycle operations for one id table.
#[derive(Debug, Clone)]
pub struct IdTableHelper {
    table: Arc<IdTable>,
    create_statements: Vec<String>,
    drop_statements: Vec<String>,
    truncate_command: String,
}

impl IdTableHelper {
    pub fn new(table: Arc<IdTable>, support: &dyn IdTableSupport) -> Self {
        let exporter = IdTableExporter::new(support);
        Self {
            create_statements: exporter.sql_create_strings(&table),
            drop_statements: exporter.sql_drop_strings(&table),
            truncate_command: exporter.truncate_id_table_command().to_string(),
            table,
        }
    }

    pub fn table(&self) -> &Arc<IdTable> {
        &self.table
    }

    pub fn create_statements(&self) -> &[String] {
        &self.create_statements
    }

    pub fn drop_statements(&self) -> &[String] {
        &self.drop_statements
    }

    /// `delete from <table>`, scoped to one session when `session_uid` is given.
    pub fn clean_statement(&self, session_uid: Option<&str>) -> String {
        match session_uid {
            Some(_) => format!(
                "{} {} where {} = ?",
                self.truncate_command,
                self.table.qualified_name(),
                SESSION_UID_COLUMN
            ),
            None => format!("{} {}", self.truncate_command, self.table.qualified_name()),
        }
    }

    /// Create the id table within the unit of work in `ctx`.
    pub fn create_id_table(
        &self,
        ctx: &mut dyn ExecutionContext,
        ddl: DdlTransactionality,
    ) -> DdlOutcome {
        self.execute_respecting_policy(ctx, Lifecycle::Create, &self.create_statements, &[], ddl)
    }

    /// Drop the id table within the unit of work in `ctx`.
    pub fn drop_id_table(
        &self,
        ctx: &mut dyn ExecutionContext,
        ddl: DdlTransactionality,
    ) -> DdlOutcome {
        self.execute_respecting_policy(ctx, Lifecycle::Drop, &self.drop_statements, &[], ddl)
    }

    /// Delete the rows written by this unit of work.
    ///
    /// Always runs on the session's own connection: the rows were inserted
    /// by its uncommitted transaction and are invisible to any other one.
    pub fn clean_id_table_rows(
        &self,
        ctx: &mut dyn ExecutionContext,
        session_uid: Option<&str>,
    ) -> DdlOutcome {
        let statement = [self.clean_statement(session_uid)];
        let params: Vec<SqlValue> = session_uid.map(SqlValue::from).into_iter().collect();
        self.execute_respecting_policy(
            ctx,
            Lifecycle::Clean,
            &statement,
            &params,
            DdlTransactionality::None,
        )
    }

    /// Create the id table on a standalone connection, outside any session.
    pub fn create_id_table_standalone(
        &self,
        access: &dyn ConnectionAccess,
        translator: &dyn SqlExceptionTranslator,
        logger: &SqlStatementLogger,
        ddl: DdlTransactionality,
    ) -> BulkIdResult<DdlOutcome> {
        self.execute_standalone(
            access,
            translator,
            logger,
            Lifecycle::Create,
            &self.create_statements,
            ddl,
        )
    }

    /// Drop the id table on a standalone connection, outside any session.
    pub fn drop_id_table_standalone(
        &self,
        access: &dyn ConnectionAccess,
        translator: &dyn SqlExceptionTranslator,
        logger: &SqlStatementLogger,
        ddl: DdlTransactionality,
    ) -> BulkIdResult<DdlOutcome> {
        self.execute_standalone(
            access,
            translator,
            logger,
            Lifecycle::Drop,
            &self.drop_statements,
            ddl,
        )
    }

    // ===== EXECUTION =====

    fn execute_respecting_policy(
        &self,
        ctx: &mut dyn ExecutionContext,
        lifecycle: Lifecycle,
        statements: &[String],
        params: &[SqlValue],
        ddl: DdlTransactionality,
    ) -> DdlOutcome {
        let logger = *ctx.statement_logger();

        if !ddl.is_isolated() {
            let failures = self.run_statements(ctx.connection(), &logger, lifecycle, statements, params);
            return DdlOutcome::from_failures(failures);
        }

        let mut failures = Vec::new();
        let delegated = ctx.isolation_delegate().delegate_work(
            &mut |connection: &mut dyn Connection| -> Result<(), SqlError> {
                failures.extend(self.run_statements(connection, &logger, lifecycle, statements, params));
                Ok(())
            },
            ddl.is_transacted(),
        );
        if let Err(error) = delegated {
            self.log_failure(lifecycle, None, &error);
            failures.push(DdlFailure {
                statement: None,
                error,
            });
        }
        DdlOutcome::from_failures(failures)
    }

    fn execute_standalone(
        &self,
        access: &dyn ConnectionAccess,
        translator: &dyn SqlExceptionTranslator,
        logger: &SqlStatementLogger,
        lifecycle: Lifecycle,
        statements: &[String],
        ddl: DdlTransactionality,
    ) -> BulkIdResult<DdlOutcome> {
        let mut connection = acquire_connection(access, translator)?;

        if !ddl.is_transacted() {
            let failures = self.run_statements(&mut *connection, logger, lifecycle, statements, &[]);
            return Ok(DdlOutcome::from_failures(failures));
        }

        let mut failures = Vec::new();
        match connection.begin() {
            Ok(()) => {
                failures = self.run_statements(&mut *connection, logger, lifecycle, statements, &[]);
                if let Err(error) = connection.commit() {
                    self.log_failure(lifecycle, None, &error);
                    failures.push(DdlFailure {
                        statement: None,
                        error,
                    });
                }
            }
            Err(error) => {
                self.log_failure(lifecycle, None, &error);
                failures.push(DdlFailure {
                    statement: None,
                    error,
                });
            }
        }
        Ok(DdlOutcome::from_failures(failures))
    }

    /// Execute every statement, continuing past failures.
    fn run_statements(
        &self,
        connection: &mut dyn Connection,
        logger: &SqlStatementLogger,
        lifecycle: Lifecycle,
        statements: &[String],
        params: &[SqlValue],
    ) -> Vec<DdlFailure> {
        let mut failures = Vec::new();
        for sql in statements {
            logger.log_statement(sql);
            if let Err(error) = connection.execute(sql, params) {
                self.log_failure(lifecycle, Some(sql), &error);
                failures.push(DdlFailure {
                    statement: Some(sql.clone()),
                    error,
                });
            }
        }
        failures
    }

    fn log_failure(&self, lifecycle: Lifecycle, sql: Option<&str>, error: &SqlError) {
        let table = self.table.qualified_name();
        match lifecycle {
            // Expected when the table already exists
            Lifecycle::Create => tracing::debug!(
                table = %table,
                sql = sql.unwrap_or_default(),
                error = %error,
                "Unable to create id table"
            ),
            Lifecycle::Drop | Lifecycle::Clean => tracing::warn!(
                table = %table,
                operation = lifecycle.as_str(),
                sql = sql.unwrap_or_default(),
                error = %error,
                "Id table cleanup failed"
            ),
        }
    }
}
