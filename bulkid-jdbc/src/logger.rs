//! SQL statement logging.

use bulkid_core::SessionFactoryOptions;

/// Tracing target every statement is logged under.
pub const SQL_LOG_TARGET: &str = "bulkid::sql";

/// Logs SQL text before it is executed. Diagnostic only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SqlStatementLogger {
    show_sql: bool,
}

impl SqlStatementLogger {
    pub fn new(show_sql: bool) -> Self {
        Self { show_sql }
    }

    pub fn from_options(options: &SessionFactoryOptions) -> Self {
        Self::new(options.show_sql)
    }

    pub fn is_show_sql(&self) -> bool {
        self.show_sql
    }

    pub fn log_statement(&self, sql: &str) {
        if self.show_sql {
            tracing::info!(target: SQL_LOG_TARGET, "{}", sql);
        } else {
            tracing::debug!(target: SQL_LOG_TARGET, "{}", sql);
        }
    }
}
