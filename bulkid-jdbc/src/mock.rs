//! In-memory mock database for testing.
//!
//! `MockDatabase` understands just enough SQL to exercise id-table work:
//! it tracks which tables exist (CREATE of an existing table and DROP of a
//! missing one fail like a real database), keeps per-partition row counts
//! for tables filled by `insert ... select`, answers id-scoped
//! `update`/`delete` statements with the number of ids visible to the
//! caller, and records every statement with its parameters.
//!
//! Row visibility follows the table flavour:
//! - temporary tables partition rows by the owning connection's session
//! - regular tables share rows, unless a `hib_sess_id = ?` style predicate
//!   or session uid column selects a partition explicitly
//! - local temporary tables are only visible to the session that created them

use crate::{
    Connection, ConnectionAccess, ExecutionContext, IsolationDelegate, JdbcIsolationDelegate,
    SqlStatementLogger,
};
use bulkid_core::{SessionIdentifier, SqlError, SqlValue, SESSION_UID_COLUMN};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static CREATE_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*create\s+(?P<kind>(?:\w+\s+)*?)table\s+(?P<if_not_exists>if\s+not\s+exists\s+)?(?P<name>[^\s(]+)")
        .expect("CREATE pattern is valid")
});

static DROP_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*drop\s+table\s+(?P<if_exists>if\s+exists\s+)?(?P<name>[^\s;]+)")
        .expect("DROP pattern is valid")
});

static INSERT_SELECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*insert\s+into\s+(?P<table>[^\s(]+)\s*\((?P<columns>[^)]*)\)\s*select\s+.*?\s+from\s+(?P<source>[^\s,()]+)")
        .expect("INSERT pattern is valid")
});

static PARTITION_FILTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\swhere\s+(?P<partition>\w+)\s*=\s*\?\s*$")
        .expect("partition filter pattern is valid")
});

static ID_SCOPED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*(?:delete\s+from|update)\s+(?P<table>\S+)\s.*\bin\s*\(\s*select\s+[^)]*?\s+from\s+(?P<id_table>[^\s)]+)(?:\s+where\s+(?P<partition>\w+)\s*=\s*\?)?\s*\)\s*$")
        .expect("id-scoped pattern is valid")
});

static DELETE_ALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*delete\s+from\s+(?P<table>[^\s;]+)(?:\s+where\s+(?P<partition>\w+)\s*=\s*\?)?\s*$")
        .expect("DELETE pattern is valid")
});

/// Partition holding rows of regular tables written without a session uid.
const SHARED_PARTITION: &str = "*";

// ============================================================================
// RECORDED ACTIVITY
// ============================================================================

/// One statement as the mock database saw it.
#[derive(Debug, Clone)]
pub struct ExecutedStatement {
    pub connection_id: u64,
    /// Session identifier (or `standalone-N`) owning the connection
    pub owner: String,
    /// Whether the connection came from [`ConnectionAccess`] rather than a session
    pub standalone: bool,
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub executed_at: DateTime<Utc>,
    pub result: Result<u64, SqlError>,
}

impl ExecutedStatement {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    /// Case-insensitive prefix match on the SQL text.
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.sql
            .trim_start()
            .to_ascii_lowercase()
            .starts_with(&prefix.to_ascii_lowercase())
    }
}

/// Transaction demarcation on a mock connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionEvent {
    Begin,
    Commit,
    Rollback,
}

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Default)]
struct MockTable {
    temporary: bool,
    /// Row count per partition
    rows: HashMap<String, u64>,
}

#[derive(Debug)]
struct FailureRule {
    pattern: Regex,
    error: SqlError,
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct MockState {
    /// Keyed by lower-cased name, or `owner::name` for local temporary tables
    tables: HashMap<String, MockTable>,
    match_counts: HashMap<String, u64>,
    failures: Vec<FailureRule>,
    refuse_connections: Option<SqlError>,
    statements: Vec<ExecutedStatement>,
    transactions: Vec<(u64, TransactionEvent)>,
    next_connection_id: u64,
    open_standalone: usize,
}

impl MockState {
    fn next_id(&mut self) -> u64 {
        self.next_connection_id += 1;
        self.next_connection_id
    }

    fn scoped_key(owner: &str, name: &str) -> String {
        format!("{}::{}", owner, name.to_ascii_lowercase())
    }

    /// Resolve a table name as seen by `owner`: its own local temporary
    /// tables shadow global ones.
    fn resolve(&self, name: &str, owner: &str) -> Option<String> {
        let scoped = Self::scoped_key(owner, name);
        if self.tables.contains_key(&scoped) {
            return Some(scoped);
        }
        let global = name.to_ascii_lowercase();
        self.tables.contains_key(&global).then_some(global)
    }

    fn take_failure(&mut self, sql: &str) -> Option<SqlError> {
        let index = self
            .failures
            .iter()
            .position(|rule| rule.pattern.is_match(sql) && rule.remaining != Some(0))?;
        let rule = &mut self.failures[index];
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(rule.error.clone())
    }

    fn apply(&mut self, owner: &str, sql: &str, params: &[SqlValue]) -> Result<u64, SqlError> {
        if let Some(error) = self.take_failure(sql) {
            return Err(error);
        }

        if let Some(caps) = CREATE_TABLE.captures(sql) {
            let kind = caps["kind"].to_ascii_lowercase();
            let name = &caps["name"];
            let temporary = kind.contains("temp");
            let local = temporary && !kind.contains("global");
            let key = if local {
                Self::scoped_key(owner, name)
            } else {
                name.to_ascii_lowercase()
            };

            if self.tables.contains_key(&key) {
                if caps.name("if_not_exists").is_some() {
                    return Ok(0);
                }
                return Err(SqlError::with_state(
                    format!("Table \"{}\" already exists", name),
                    "42S01",
                ));
            }
            self.tables.insert(
                key,
                MockTable {
                    temporary,
                    rows: HashMap::new(),
                },
            );
            return Ok(0);
        }

        if let Some(caps) = DROP_TABLE.captures(sql) {
            let name = &caps["name"];
            return match self.resolve(name, owner) {
                Some(key) => {
                    self.tables.remove(&key);
                    Ok(0)
                }
                None if caps.name("if_exists").is_some() => Ok(0),
                None => Err(table_not_found(name)),
            };
        }

        if let Some(caps) = INSERT_SELECT.captures(sql) {
            // copying staged rows out of a known table into an application table
            if let Some(source) = self.resolve(&caps["source"], owner) {
                let explicit = PARTITION_FILTER
                    .is_match(sql)
                    .then(|| params.last())
                    .flatten()
                    .map(partition_value);
                let count = self
                    .tables
                    .get(&source)
                    .map(|table| visible_rows(table, owner, explicit))
                    .unwrap_or(0);
                return Ok(count);
            }

            let name = &caps["table"];
            let key = self.resolve(name, owner).ok_or_else(|| table_not_found(name))?;
            let first_column = caps["columns"].split(',').next().unwrap_or("").trim();
            let explicit = if first_column.eq_ignore_ascii_case(SESSION_UID_COLUMN) {
                params.first().map(partition_value)
            } else {
                None
            };
            let count = self
                .match_counts
                .get(&caps["source"].to_ascii_lowercase())
                .copied()
                .unwrap_or(0);

            if let Some(table) = self.tables.get_mut(&key) {
                let partition = partition_for(table, owner, explicit);
                *table.rows.entry(partition).or_insert(0) += count;
            }
            return Ok(count);
        }

        if let Some(caps) = ID_SCOPED.captures(sql) {
            let name = &caps["id_table"];
            let key = self.resolve(name, owner).ok_or_else(|| table_not_found(name))?;
            let explicit = caps
                .name("partition")
                .and_then(|_| params.last())
                .map(partition_value);
            let count = self
                .tables
                .get(&key)
                .map(|table| visible_rows(table, owner, explicit))
                .unwrap_or(0);
            return Ok(count);
        }

        if let Some(caps) = DELETE_ALL.captures(sql) {
            let name = &caps["table"];
            let key = self.resolve(name, owner).ok_or_else(|| table_not_found(name))?;
            let explicit = caps
                .name("partition")
                .and_then(|_| params.first())
                .map(partition_value);
            let Some(table) = self.tables.get_mut(&key) else {
                return Ok(0);
            };
            let removed = match explicit {
                Some(partition) => table.rows.remove(&partition).unwrap_or(0),
                None if table.temporary => table.rows.remove(owner).unwrap_or(0),
                None => table.rows.drain().map(|(_, count)| count).sum(),
            };
            return Ok(removed);
        }

        Ok(0)
    }
}

fn table_not_found(name: &str) -> SqlError {
    SqlError::with_state(format!("Table \"{}\" not found", name), "42S02")
}

fn partition_value(value: &SqlValue) -> String {
    match value {
        SqlValue::Text(text) => text.clone(),
        SqlValue::Uuid(uuid) => uuid.hyphenated().to_string(),
        other => format!("{:?}", other),
    }
}

fn partition_for(table: &MockTable, owner: &str, explicit: Option<String>) -> String {
    match explicit {
        Some(partition) => partition,
        None if table.temporary => owner.to_string(),
        None => SHARED_PARTITION.to_string(),
    }
}

fn visible_rows(table: &MockTable, owner: &str, explicit: Option<String>) -> u64 {
    match explicit {
        Some(partition) => table.rows.get(&partition).copied().unwrap_or(0),
        None if table.temporary => table.rows.get(owner).copied().unwrap_or(0),
        None => table.rows.values().sum(),
    }
}

// ============================================================================
// MOCK DATABASE
// ============================================================================

/// Shared in-memory database. Cloning yields another handle to the same data.
#[derive(Debug, Clone, Default)]
pub struct MockDatabase {
    state: Arc<Mutex<MockState>>,
}

impl MockDatabase {
    /// Create a new, empty mock database.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a session-bound connection owned by `owner`.
    pub fn connect(&self, owner: impl Into<String>) -> MockConnection {
        let id = self.state().next_id();
        MockConnection {
            db: self.clone(),
            id,
            owner: owner.into(),
            standalone: false,
            in_transaction: false,
        }
    }

    /// Number of rows an `insert ... select ... from <source_table>` matches.
    pub fn set_match_count(&self, source_table: &str, count: u64) {
        self.state()
            .match_counts
            .insert(source_table.to_ascii_lowercase(), count);
    }

    /// Fail every statement matching `pattern` with `error`.
    pub fn fail_matching(&self, pattern: &str, error: SqlError) -> Result<(), regex::Error> {
        self.add_failure(pattern, error, None)
    }

    /// Fail only the next statement matching `pattern`.
    pub fn fail_matching_once(&self, pattern: &str, error: SqlError) -> Result<(), regex::Error> {
        self.add_failure(pattern, error, Some(1))
    }

    fn add_failure(
        &self,
        pattern: &str,
        error: SqlError,
        remaining: Option<usize>,
    ) -> Result<(), regex::Error> {
        let pattern = Regex::new(pattern)?;
        self.state().failures.push(FailureRule {
            pattern,
            error,
            remaining,
        });
        Ok(())
    }

    /// Make [`ConnectionAccess::obtain_connection`] fail with `error`, or
    /// succeed again with `None`.
    pub fn refuse_connections(&self, error: Option<SqlError>) {
        self.state().refuse_connections = error;
    }

    /// Every statement executed so far, in order.
    pub fn statements(&self) -> Vec<ExecutedStatement> {
        self.state().statements.clone()
    }

    /// Statements whose SQL starts with `prefix`, ignoring case.
    pub fn statements_starting_with(&self, prefix: &str) -> Vec<ExecutedStatement> {
        self.state()
            .statements
            .iter()
            .filter(|s| s.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn clear_statements(&self) {
        self.state().statements.clear();
    }

    pub fn transaction_events(&self) -> Vec<(u64, TransactionEvent)> {
        self.state().transactions.clone()
    }

    /// Standalone connections obtained and not yet released.
    pub fn open_connection_count(&self) -> usize {
        self.state().open_standalone
    }

    /// Whether a table is visible to every session.
    pub fn table_exists(&self, name: &str) -> bool {
        self.state().tables.contains_key(&name.to_ascii_lowercase())
    }

    /// Whether a table is visible to `owner`, including its local temporary tables.
    pub fn table_visible_to(&self, name: &str, owner: &str) -> bool {
        self.state().resolve(name, owner).is_some()
    }

    /// Rows held by a global table in one partition (a session uid, or a
    /// session identifier for temporary tables).
    pub fn row_count(&self, table: &str, partition: &str) -> u64 {
        self.state()
            .tables
            .get(&table.to_ascii_lowercase())
            .and_then(|t| t.rows.get(partition).copied())
            .unwrap_or(0)
    }

    /// Rows held by a global table across all partitions.
    pub fn total_row_count(&self, table: &str) -> u64 {
        self.state()
            .tables
            .get(&table.to_ascii_lowercase())
            .map(|t| t.rows.values().sum())
            .unwrap_or(0)
    }

    fn execute_on(
        &self,
        connection_id: u64,
        owner: &str,
        standalone: bool,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<u64, SqlError> {
        let mut state = self.state();
        let result = state.apply(owner, sql, params);
        state.statements.push(ExecutedStatement {
            connection_id,
            owner: owner.to_string(),
            standalone,
            sql: sql.to_string(),
            params: params.to_vec(),
            executed_at: Utc::now(),
            result: result.clone(),
        });
        result
    }

    fn record_transaction(&self, connection_id: u64, event: TransactionEvent) {
        self.state().transactions.push((connection_id, event));
    }
}

impl ConnectionAccess for MockDatabase {
    fn obtain_connection(&self) -> Result<Box<dyn Connection>, SqlError> {
        let mut state = self.state();
        if let Some(error) = &state.refuse_connections {
            return Err(error.clone());
        }
        let id = state.next_id();
        state.open_standalone += 1;
        drop(state);

        Ok(Box::new(MockConnection {
            db: self.clone(),
            id,
            owner: format!("standalone-{}", id),
            standalone: true,
            in_transaction: false,
        }))
    }

    fn release_connection(&self, _connection: Box<dyn Connection>) -> Result<(), SqlError> {
        let mut state = self.state();
        state.open_standalone = state.open_standalone.saturating_sub(1);
        Ok(())
    }
}

// ============================================================================
// MOCK CONNECTION
// ============================================================================

/// A connection to a [`MockDatabase`].
#[derive(Debug)]
pub struct MockConnection {
    db: MockDatabase,
    id: u64,
    owner: String,
    standalone: bool,
    in_transaction: bool,
}

impl MockConnection {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

impl Connection for MockConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, SqlError> {
        self.db
            .execute_on(self.id, &self.owner, self.standalone, sql, params)
    }

    fn begin(&mut self) -> Result<(), SqlError> {
        if self.in_transaction {
            return Err(SqlError::with_state("Transaction already active", "25001"));
        }
        self.in_transaction = true;
        self.db.record_transaction(self.id, TransactionEvent::Begin);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SqlError> {
        if !self.in_transaction {
            return Err(SqlError::with_state("No transaction active", "25000"));
        }
        self.in_transaction = false;
        self.db.record_transaction(self.id, TransactionEvent::Commit);
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SqlError> {
        if !self.in_transaction {
            return Err(SqlError::with_state("No transaction active", "25000"));
        }
        self.in_transaction = false;
        self.db.record_transaction(self.id, TransactionEvent::Rollback);
        Ok(())
    }
}

// ============================================================================
// MOCK SESSION
// ============================================================================

/// A unit of work on a [`MockDatabase`], usable as an [`ExecutionContext`].
#[derive(Debug)]
pub struct MockSession {
    identifier: SessionIdentifier,
    connection: MockConnection,
    isolation: JdbcIsolationDelegate,
    logger: SqlStatementLogger,
}

impl MockSession {
    /// Open a session with a fresh identifier and its own connection.
    pub fn open(db: &MockDatabase) -> Self {
        let identifier = SessionIdentifier::new();
        Self {
            identifier,
            connection: db.connect(identifier.to_string()),
            isolation: JdbcIsolationDelegate::new(Arc::new(db.clone())),
            logger: SqlStatementLogger::default(),
        }
    }

    /// Identifier of the session-bound connection.
    pub fn connection_id(&self) -> u64 {
        self.connection.id
    }

    /// Partition key of this session's rows in temporary tables.
    pub fn owner(&self) -> &str {
        self.connection.owner()
    }
}

impl ExecutionContext for MockSession {
    fn session_identifier(&self) -> SessionIdentifier {
        self.identifier
    }

    fn connection(&mut self) -> &mut dyn Connection {
        &mut self.connection
    }

    fn isolation_delegate(&mut self) -> &mut dyn IsolationDelegate {
        &mut self.isolation
    }

    fn statement_logger(&self) -> &SqlStatementLogger {
        &self.logger
    }
}

// =============================================================================
// TESTS
// =============================================================================
