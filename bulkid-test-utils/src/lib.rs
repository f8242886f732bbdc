//! bulkid Test Utilities
//!
//! Shared test infrastructure for the bulk id-table workspace:
//! - Entity fixtures covering joined inheritance, secondary tables and
//!   composite keys
//! - Proptest generators for descriptors and policies
//! - Assertions over `BulkIdResult` and recorded statements
//! - Tracing setup for tests

// Re-export the mock database from its source crate
pub use bulkid_jdbc::{ExecutedStatement, MockDatabase, MockSession, TransactionEvent};

pub use bulkid_core::{
    AttributeMapping, BulkIdError, BulkIdResult, ConfigError, DdlTransactionality,
    EntityDescriptor, EntityTable, JdbcError, KeyColumn, Metamodel, MutationError,
    QualifiedTableName, SessionFactoryOptions, SqlValue, StrategyKind,
};

use tracing_subscriber::EnvFilter;

/// Install a test subscriber once per process.
///
/// Honours `RUST_LOG`, defaulting to warnings only. Output goes through the
/// libtest capture so it only shows for failing tests.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    // Another test may have installed it already
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for descriptors and lifecycle policies.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Generate a lower-case SQL identifier.
    pub fn arb_identifier() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,20}"
    }

    pub fn arb_session_uid() -> impl Strategy<Value = String> {
        any::<[u8; 16]>().prop_map(|bytes| Uuid::from_bytes(bytes).hyphenated().to_string())
    }

    pub fn arb_ddl_transactionality() -> impl Strategy<Value = DdlTransactionality> {
        prop_oneof![
            Just(DdlTransactionality::None),
            Just(DdlTransactionality::Isolate),
            Just(DdlTransactionality::IsolateAndTransact),
        ]
    }

    pub fn arb_strategy_kind() -> impl Strategy<Value = StrategyKind> {
        prop_oneof![
            Just(StrategyKind::LocalTemporary),
            Just(StrategyKind::GlobalTemporary),
            Just(StrategyKind::Persistent),
        ]
    }

    /// Generate a valid descriptor spanning 1 to 5 tables and up to 2
    /// collection tables, keyed by 1 to 3 columns, with one attribute per
    /// table.
    pub fn arb_entity_descriptor() -> impl Strategy<Value = EntityDescriptor> {
        (1usize..=5, 0usize..=2, 1usize..=3).prop_map(|(table_count, collection_count, key_count)| {
            let identifier: Vec<KeyColumn> = (0..key_count)
                .map(|k| KeyColumn::new(format!("id_{}", k), "BIGINT"))
                .collect();
            let tables: Vec<EntityTable> = (0..table_count)
                .map(|t| {
                    EntityTable::new(
                        QualifiedTableName::new(format!("t{}", t)),
                        (0..key_count).map(|k| format!("t{}_key_{}", t, k)),
                    )
                })
                .collect();
            let collection_tables = (0..collection_count)
                .map(|c| {
                    EntityTable::new(
                        QualifiedTableName::new(format!("c{}", c)),
                        (0..key_count).map(|k| format!("c{}_owner_{}", c, k)),
                    )
                })
                .collect();
            let attributes = (0..table_count)
                .map(|t| {
                    AttributeMapping::new(
                        format!("attr{}", t),
                        format!("t{}", t),
                        format!("col{}", t),
                        "INTEGER",
                    )
                })
                .collect();

            EntityDescriptor {
                name: format!("Entity{}x{}x{}", table_count, collection_count, key_count),
                identifier,
                tables,
                collection_tables,
                attributes,
            }
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built entity layouts for common mapping scenarios.

    use super::*;

    fn mapping(attribute: &str, table: &str, column: &str, sql_type: &str) -> AttributeMapping {
        AttributeMapping::new(attribute, table, column, sql_type)
    }

    /// Single table entity `Person(id)`.
    pub fn person() -> EntityDescriptor {
        EntityDescriptor {
            name: "Person".to_string(),
            identifier: vec![KeyColumn::new("id", "BIGINT")],
            tables: vec![EntityTable::new(QualifiedTableName::new("person"), ["id"])],
            collection_tables: Vec::new(),
            attributes: vec![
                mapping("name", "person", "name", "varchar(255)"),
                mapping("age", "person", "age", "INTEGER"),
            ],
        }
    }

    /// `Employee` extends `Person` with joined inheritance.
    pub fn employee() -> EntityDescriptor {
        EntityDescriptor {
            name: "Employee".to_string(),
            identifier: vec![KeyColumn::new("id", "BIGINT")],
            tables: vec![
                EntityTable::new(QualifiedTableName::new("person"), ["id"]),
                EntityTable::new(QualifiedTableName::new("employee"), ["person_id"]),
            ],
            collection_tables: Vec::new(),
            attributes: vec![
                mapping("name", "person", "name", "varchar(255)"),
                mapping("age", "person", "age", "INTEGER"),
                mapping("salary", "employee", "salary", "DECIMAL(10,2)"),
                mapping("title", "employee", "title", "varchar(255)"),
            ],
        }
    }

    /// `Manager` extends `Employee`: three joined tables.
    pub fn manager() -> EntityDescriptor {
        let mut manager = employee();
        manager.name = "Manager".to_string();
        manager
            .tables
            .push(EntityTable::new(QualifiedTableName::new("manager"), ["employee_id"]));
        manager.attributes.push(mapping("reports", "manager", "reports", "INTEGER"));
        manager
    }

    /// `Customer` in schema `crm` with a secondary details table.
    pub fn customer() -> EntityDescriptor {
        let crm = |table: &str| QualifiedTableName::new(table).with_schema(Some("crm".to_string()));
        EntityDescriptor {
            name: "Customer".to_string(),
            identifier: vec![KeyColumn::new("id", "varchar(36)")],
            tables: vec![
                EntityTable::new(crm("customer"), ["id"]),
                EntityTable::new(crm("customer_details"), ["customer_id"]),
            ],
            collection_tables: Vec::new(),
            attributes: vec![
                mapping("name", "customer", "name", "varchar(255)"),
                mapping("email", "customer_details", "email", "varchar(255)"),
            ],
        }
    }

    /// `OrderLine` keyed by `(order_id, line_no)`.
    pub fn order_line() -> EntityDescriptor {
        EntityDescriptor {
            name: "OrderLine".to_string(),
            identifier: vec![
                KeyColumn::new("order_id", "BIGINT"),
                KeyColumn::new("line_no", "INTEGER"),
            ],
            tables: vec![EntityTable::new(
                QualifiedTableName::new("order_line"),
                ["order_id", "line_no"],
            )],
            collection_tables: Vec::new(),
            attributes: vec![mapping("quantity", "order_line", "quantity", "INTEGER")],
        }
    }

    /// `Farm` with an element collection and a many-to-many join table.
    pub fn farm() -> EntityDescriptor {
        EntityDescriptor {
            name: "Farm".to_string(),
            identifier: vec![KeyColumn::new("id", "BIGINT")],
            tables: vec![EntityTable::new(QualifiedTableName::new("farm"), ["id"])],
            collection_tables: vec![
                EntityTable::new(QualifiedTableName::new("farm_accreditations"), ["farm_id"]),
                EntityTable::new(QualifiedTableName::new("farm_crops"), ["farm_id"]),
            ],
            attributes: vec![mapping("name", "farm", "name", "varchar(255)")],
        }
    }

    /// Every fixture entity except [`farm`].
    pub fn metamodel() -> Metamodel {
        let mut metamodel = Metamodel::new();
        for descriptor in [person(), employee(), manager(), customer(), order_line()] {
            if let Err(e) = metamodel.add(descriptor) {
                panic!("fixture descriptor is invalid: {}", e);
            }
        }
        metamodel
    }

    /// Options built from literal property pairs.
    pub fn options(properties: &[(&str, &str)]) -> SessionFactoryOptions {
        let lookup = |name: &str| {
            properties
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        };
        match SessionFactoryOptions::from_lookup(lookup) {
            Ok(options) => options,
            Err(e) => panic!("fixture options are invalid: {}", e),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for bulk id-table results and recorded statements.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &BulkIdResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_sql_error<T: std::fmt::Debug>(result: &BulkIdResult<T>) {
        match result {
            Err(BulkIdError::Sql(_)) => {}
            other => panic!("Expected Sql error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_connection_error<T: std::fmt::Debug>(result: &BulkIdResult<T>) {
        match result {
            Err(BulkIdError::Jdbc(JdbcError::Connection { .. })) => {}
            other => panic!("Expected connection error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_mutation_error<T: std::fmt::Debug>(result: &BulkIdResult<T>) {
        match result {
            Err(BulkIdError::Mutation(_)) => {}
            other => panic!("Expected Mutation error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &BulkIdResult<T>) {
        match result {
            Err(BulkIdError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert a statement ends by selecting from the id table of one session.
    #[track_caller]
    pub fn assert_scoped_to_session(statement: &ExecutedStatement, session_uid: &str) {
        assert!(
            statement.sql.ends_with("where hib_sess_id = ?)")
                || statement.sql.ends_with("where hib_sess_id = ?"),
            "statement is not session scoped: {}",
            statement.sql
        );
        let bound = statement.params.iter().any(|param| match param {
            SqlValue::Text(text) => text == session_uid,
            _ => false,
        });
        assert!(bound, "session uid {} not bound to: {}", session_uid, statement.sql);
    }
}
