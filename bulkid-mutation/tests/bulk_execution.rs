//! End-to-end execution of bulk statements against the mock database.

use bulkid_core::{
    BulkIdError, BulkIdResult, DdlTransactionality, EntityDescriptor, IdTable, Metamodel,
    QualifiedTableName, SqlError, SqlFragment, SqlValue, StrategyKind,
};
use bulkid_jdbc::{Connection, ExecutionContext};
use bulkid_mutation::{
    BulkDelete, BulkInsert, BulkUpdate, ExecutionListener, IdRestriction, IdTableDialect, IdTableExporter,
    StandardIdTableSupport, TableBasedStrategy,
};
use bulkid_test_utils::{assertions, fixtures, generators, init_tracing, MockDatabase, MockSession};
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// HELPERS
// ============================================================================

#[derive(Default)]
struct RecordingListener {
    before: AtomicUsize,
    after: AtomicUsize,
    saw_error: AtomicBool,
}

impl ExecutionListener for RecordingListener {
    fn before_execution(&self, _ctx: &mut dyn ExecutionContext) {
        self.before.fetch_add(1, Ordering::SeqCst);
    }

    fn after_execution(&self, _ctx: &mut dyn ExecutionContext, result: &BulkIdResult<u64>) {
        self.after.fetch_add(1, Ordering::SeqCst);
        self.saw_error.store(result.is_err(), Ordering::SeqCst);
    }
}

fn prepared(kind: StrategyKind, metamodel: &Metamodel, db: &MockDatabase) -> TableBasedStrategy {
    let mut strategy = match kind {
        StrategyKind::LocalTemporary => TableBasedStrategy::local_temporary(),
        StrategyKind::GlobalTemporary => TableBasedStrategy::global_temporary(),
        StrategyKind::Persistent => TableBasedStrategy::persistent(),
    };
    strategy
        .prepare(metamodel, &fixtures::options(&[]), db)
        .unwrap();
    strategy
}

fn restriction_for(entity: &EntityDescriptor, alias: &str) -> IdRestriction {
    IdRestriction::for_root(entity, alias).unwrap()
}

fn delete_retirees() -> BulkDelete {
    BulkDelete::new(
        "Person",
        restriction_for(&fixtures::person(), "p")
            .with_where(SqlFragment::new("p.age > ?").with_param(65_i64)),
    )
}

fn delete_employees() -> BulkDelete {
    BulkDelete::new("Employee", restriction_for(&fixtures::employee(), "e"))
}

/// Per-table statements: everything joining against an id table.
fn mutations_of(db: &MockDatabase) -> Vec<bulkid_test_utils::ExecutedStatement> {
    db.statements()
        .into_iter()
        .filter(|s| s.sql.contains(" in (select "))
        .collect()
}

// ============================================================================
// DELETE
// ============================================================================

#[test]
fn test_joined_delete_removes_dependents_first() {
    init_tracing();
    let db = MockDatabase::new();
    let metamodel = fixtures::metamodel();
    let strategy = prepared(StrategyKind::GlobalTemporary, &metamodel, &db);
    let mut session = MockSession::open(&db);
    db.set_match_count("person", 7);
    db.clear_statements();

    let count = strategy
        .build_delete_handler(&metamodel, delete_employees())
        .unwrap()
        .execute(&mut session)
        .unwrap();
    assert_eq!(count, 7);

    let sql: Vec<_> = db.statements().into_iter().map(|s| s.sql).collect();
    assert_eq!(
        sql,
        vec![
            "insert into HT_person (id) select e.id from person e".to_string(),
            "delete from employee where person_id in (select id from HT_person)".to_string(),
            "delete from person where id in (select id from HT_person)".to_string(),
            "delete from HT_person".to_string(),
        ]
    );
    assert_eq!(db.row_count("HT_person", session.owner()), 0);
}

#[test]
fn test_secondary_table_in_schema() {
    let db = MockDatabase::new();
    let metamodel = fixtures::metamodel();
    let strategy = prepared(StrategyKind::GlobalTemporary, &metamodel, &db);
    let mut session = MockSession::open(&db);
    db.set_match_count("crm.customer", 3);

    let delete = BulkDelete::new("Customer", restriction_for(&fixtures::customer(), "c"));
    let count = strategy
        .build_delete_handler(&metamodel, delete)
        .unwrap()
        .execute(&mut session)
        .unwrap();
    assert_eq!(count, 3);

    let mutations = mutations_of(&db);
    assert_eq!(
        mutations[0].sql,
        "delete from crm.customer_details where customer_id in (select id from HT_customer)"
    );
    assert_eq!(
        mutations[1].sql,
        "delete from crm.customer where id in (select id from HT_customer)"
    );
}

#[test]
fn test_composite_key_delete() {
    let db = MockDatabase::new();
    let metamodel = fixtures::metamodel();
    let strategy = prepared(StrategyKind::Persistent, &metamodel, &db);
    let mut session = MockSession::open(&db);
    db.set_match_count("order_line", 4);

    let delete = BulkDelete::new("OrderLine", restriction_for(&fixtures::order_line(), "ol"));
    let count = strategy
        .build_delete_handler(&metamodel, delete)
        .unwrap()
        .execute(&mut session)
        .unwrap();
    assert_eq!(count, 4);

    let mutations = mutations_of(&db);
    assert_eq!(mutations.len(), 1);
    assert_eq!(
        mutations[0].sql,
        "delete from order_line where (order_id, line_no) in (select order_id, line_no from HT_order_line where hib_sess_id = ?)"
    );
    assert_eq!(mutations[0].result, Ok(4));
}

#[test]
fn test_local_temporary_table_lives_for_one_execution() {
    let db = MockDatabase::new();
    let metamodel = fixtures::metamodel();
    let strategy = prepared(StrategyKind::LocalTemporary, &metamodel, &db);
    let mut session = MockSession::open(&db);
    db.set_match_count("person", 5);

    let count = strategy
        .build_delete_handler(&metamodel, delete_retirees())
        .unwrap()
        .execute(&mut session)
        .unwrap();
    assert_eq!(count, 5);

    let statements = db.statements();
    assert!(statements[0].starts_with("create local temporary table HT_person"));
    assert!(statements.last().unwrap().starts_with("drop table HT_person"));
    assert!(statements.iter().all(|s| !s.standalone && s.succeeded()));
    assert!(!db.table_visible_to("HT_person", session.owner()));

    // A second execution provisions a fresh table
    let again = strategy
        .build_delete_handler(&metamodel, delete_retirees())
        .unwrap()
        .execute(&mut session)
        .unwrap();
    assert_eq!(again, 5);
}

#[test]
fn test_where_clause_params_follow_session_uid() {
    let db = MockDatabase::new();
    let metamodel = fixtures::metamodel();
    let strategy = prepared(StrategyKind::Persistent, &metamodel, &db);
    let mut session = MockSession::open(&db);

    strategy
        .build_delete_handler(&metamodel, delete_retirees())
        .unwrap()
        .execute(&mut session)
        .unwrap();

    let insert = &db.statements_starting_with("insert into")[0];
    assert_eq!(
        insert.sql,
        "insert into HT_person (hib_sess_id, id) select ?, p.id from person p where p.age > ?"
    );
    assert_eq!(
        insert.params,
        vec![SqlValue::from(session.owner()), SqlValue::Int(65)]
    );
}

#[test]
fn test_delete_clears_collection_tables_first() {
    let db = MockDatabase::new();
    let mut metamodel = fixtures::metamodel();
    metamodel.add(fixtures::farm()).unwrap();
    let strategy = prepared(StrategyKind::GlobalTemporary, &metamodel, &db);
    let mut session = MockSession::open(&db);
    db.set_match_count("farm", 2);

    let delete = BulkDelete::new("Farm", restriction_for(&fixtures::farm(), "f"));
    let count = strategy
        .build_delete_handler(&metamodel, delete)
        .unwrap()
        .execute(&mut session)
        .unwrap();
    assert_eq!(count, 2);

    let sql: Vec<_> = mutations_of(&db).into_iter().map(|s| s.sql).collect();
    assert_eq!(
        sql,
        vec![
            "delete from farm_accreditations where farm_id in (select id from HT_farm)".to_string(),
            "delete from farm_crops where farm_id in (select id from HT_farm)".to_string(),
            "delete from farm where id in (select id from HT_farm)".to_string(),
        ]
    );
}

#[test]
fn test_nothing_matched_leaves_entity_tables_untouched() {
    let db = MockDatabase::new();
    let metamodel = fixtures::metamodel();
    let strategy = prepared(StrategyKind::Persistent, &metamodel, &db);
    let mut session = MockSession::open(&db);
    db.clear_statements();

    let count = strategy
        .build_delete_handler(&metamodel, delete_employees())
        .unwrap()
        .execute(&mut session)
        .unwrap();
    assert_eq!(count, 0);

    assert!(mutations_of(&db).is_empty());
    // the id table is still released
    let clean = &db.statements_starting_with("delete from HT_person")[0];
    assertions::assert_scoped_to_session(clean, session.owner());
}

// ============================================================================
// INSERT
// ============================================================================

fn import_staff() -> BulkInsert {
    BulkInsert::new("Employee", IdRestriction::new("staff_import s", ["s.id"]))
        .value("name", SqlFragment::new("s.name"))
        .value("salary", SqlFragment::new("?").with_param(1000_i64))
}

#[test]
fn test_insert_stages_rows_and_copies_them_into_each_table() {
    init_tracing();
    let db = MockDatabase::new();
    let metamodel = fixtures::metamodel();
    let strategy = prepared(StrategyKind::Persistent, &metamodel, &db);
    let mut session = MockSession::open(&db);
    let uid = SqlValue::from(session.owner());
    db.set_match_count("staff_import", 3);
    db.clear_statements();

    let inserted = strategy
        .build_insert_handler(&metamodel, import_staff())
        .unwrap()
        .execute(&mut session)
        .unwrap();
    assert_eq!(inserted, 3);

    let statements = db.statements();
    let sql: Vec<_> = statements.iter().map(|s| s.sql.as_str()).collect();
    assert_eq!(
        sql,
        vec![
            "insert into HTE_person (hib_sess_id, id, name, salary) select ?, s.id, s.name, ? from staff_import s",
            "insert into person (id, name) select id, name from HTE_person where hib_sess_id = ?",
            "insert into employee (person_id, salary) select id, salary from HTE_person where hib_sess_id = ?",
            "delete from HTE_person where hib_sess_id = ?",
        ]
    );
    assert_eq!(statements[0].params, vec![uid.clone(), SqlValue::Int(1000)]);
    for copy in &statements[1..3] {
        assert_eq!(copy.params, vec![uid.clone()]);
        assert_eq!(copy.result, Ok(3));
    }
    assert_eq!(db.row_count("HTE_person", session.owner()), 0);
}

#[test]
fn test_insert_with_nothing_staged_copies_nothing() {
    let db = MockDatabase::new();
    let metamodel = fixtures::metamodel();
    let strategy = prepared(StrategyKind::GlobalTemporary, &metamodel, &db);
    let mut session = MockSession::open(&db);
    db.clear_statements();

    let inserted = strategy
        .build_insert_handler(&metamodel, import_staff())
        .unwrap()
        .execute(&mut session)
        .unwrap();
    assert_eq!(inserted, 0);
    assert!(db.statements_starting_with("insert into person").is_empty());
    assert_eq!(db.statements_starting_with("delete from HTE_person").len(), 1);
}

#[test]
fn test_insert_of_unknown_attribute_fails_before_touching_the_database() {
    let db = MockDatabase::new();
    let metamodel = fixtures::metamodel();
    let strategy = prepared(StrategyKind::GlobalTemporary, &metamodel, &db);
    db.clear_statements();

    // reports belongs to Manager, not Employee
    let insert = BulkInsert::new("Employee", IdRestriction::new("staff_import s", ["s.id"]))
        .value("reports", SqlFragment::new("0"));
    assertions::assert_mutation_error(&strategy.build_insert_handler(&metamodel, insert));
    assert!(db.statements().is_empty());
}

// ============================================================================
// UPDATE
// ============================================================================

#[test]
fn test_update_touches_only_owning_tables() {
    let db = MockDatabase::new();
    let metamodel = fixtures::metamodel();
    let strategy = prepared(StrategyKind::GlobalTemporary, &metamodel, &db);
    let mut session = MockSession::open(&db);
    db.set_match_count("person", 4);

    let update = BulkUpdate::new("Manager", restriction_for(&fixtures::manager(), "m"))
        .set("salary", SqlFragment::new("salary * ?").with_param(2_i64))
        .set("name", SqlFragment::new("upper(name)"));
    let count = strategy
        .build_update_handler(&metamodel, update)
        .unwrap()
        .execute(&mut session)
        .unwrap();
    assert_eq!(count, 4);

    let mutations = mutations_of(&db);
    assert_eq!(mutations.len(), 2);
    assert_eq!(
        mutations[0].sql,
        "update person set name = upper(name) where id in (select id from HT_person)"
    );
    assert!(mutations[0].params.is_empty());
    assert_eq!(
        mutations[1].sql,
        "update employee set salary = salary * ? where person_id in (select id from HT_person)"
    );
    assert_eq!(mutations[1].params, vec![SqlValue::Int(2)]);
    assert!(mutations.iter().all(|s| s.result == Ok(4)));
}

#[test]
fn test_update_binds_session_uid_last() {
    let db = MockDatabase::new();
    let metamodel = fixtures::metamodel();
    let strategy = prepared(StrategyKind::Persistent, &metamodel, &db);
    let mut session = MockSession::open(&db);
    db.set_match_count("person", 2);

    let update = BulkUpdate::new("Person", restriction_for(&fixtures::person(), "p"))
        .set("age", SqlFragment::new("?").with_param(0_i64));
    strategy
        .build_update_handler(&metamodel, update)
        .unwrap()
        .execute(&mut session)
        .unwrap();

    let update = &db.statements_starting_with("update")[0];
    assert_eq!(
        update.params,
        vec![SqlValue::Int(0), SqlValue::from(session.owner())]
    );
    assert_eq!(update.result, Ok(2));
}

#[test]
fn test_invalid_updates_fail_before_touching_the_database() {
    let db = MockDatabase::new();
    let metamodel = fixtures::metamodel();
    let strategy = prepared(StrategyKind::GlobalTemporary, &metamodel, &db);
    db.clear_statements();

    let unknown = BulkUpdate::new("Person", restriction_for(&fixtures::person(), "p"))
        .set("salary", SqlFragment::new("0"));
    assertions::assert_mutation_error(&strategy.build_update_handler(&metamodel, unknown));

    let empty = BulkUpdate::new("Person", restriction_for(&fixtures::person(), "p"));
    assertions::assert_mutation_error(&strategy.build_update_handler(&metamodel, empty));

    assert!(db.statements().is_empty());
}

// ============================================================================
// SESSION PARTITIONING
// ============================================================================

#[test]
fn test_sessions_never_see_each_others_ids() {
    init_tracing();
    let db = MockDatabase::new();
    let metamodel = fixtures::metamodel();
    let strategy = prepared(StrategyKind::Persistent, &metamodel, &db);
    db.set_match_count("person", 2);

    let mut session_a = MockSession::open(&db);
    let mut session_b = MockSession::open(&db);
    let uid_a = session_a.owner().to_string();
    let uid_b = session_b.owner().to_string();

    // Session A has saved its ids but not yet mutated
    let handler_a = strategy
        .build_delete_handler(&metamodel, delete_retirees())
        .unwrap();
    let population = handler_a.population().clone();
    let mut params = vec![SqlValue::from(uid_a.as_str())];
    params.extend(population.params);
    session_a
        .connection()
        .execute(&population.sql, &params)
        .unwrap();
    assert_eq!(db.row_count("HT_person", &uid_a), 2);

    let count_b = strategy
        .build_delete_handler(&metamodel, delete_retirees())
        .unwrap()
        .execute(&mut session_b)
        .unwrap();
    assert_eq!(count_b, 2);
    assert_eq!(db.row_count("HT_person", &uid_a), 2);
    assert_eq!(db.row_count("HT_person", &uid_b), 0);

    for statement in db.statements().iter().filter(|s| s.owner == uid_b) {
        if statement.starts_with("insert") {
            assert_eq!(statement.params[0], SqlValue::from(uid_b.as_str()));
        } else {
            assertions::assert_scoped_to_session(statement, &uid_b);
        }
    }

    // A finishes and cleans only its own rows
    assert_eq!(handler_a.execute(&mut session_a).unwrap(), 2);
    assert_eq!(db.row_count("HT_person", &uid_a), 0);
}

// ============================================================================
// CLEANUP ON FAILURE
// ============================================================================

#[test]
fn test_after_use_action_runs_when_mutation_fails() {
    init_tracing();
    for kind in StrategyKind::ALL {
        let db = MockDatabase::new();
        let metamodel = fixtures::metamodel();
        let listener = Arc::new(RecordingListener::default());
        let mut strategy = match kind {
            StrategyKind::LocalTemporary => TableBasedStrategy::local_temporary(),
            StrategyKind::GlobalTemporary => TableBasedStrategy::global_temporary(),
            StrategyKind::Persistent => TableBasedStrategy::persistent(),
        }
        .with_listener(listener.clone());
        strategy
            .prepare(&metamodel, &fixtures::options(&[]), &db)
            .unwrap();

        let mut session = MockSession::open(&db);
        db.set_match_count("person", 3);
        let lock_timeout = SqlError::with_state("lock timeout", "40001");
        db.fail_matching_once(r"^delete from employee", lock_timeout.clone())
            .unwrap();

        let result = strategy
            .build_delete_handler(&metamodel, delete_employees())
            .unwrap()
            .execute(&mut session);
        assert_eq!(result, Err(BulkIdError::Sql(lock_timeout)));

        // The root table is never reached
        assert!(db.statements_starting_with("delete from person").is_empty());
        match kind {
            StrategyKind::LocalTemporary => {
                assert_eq!(db.statements_starting_with("drop table HT_person").len(), 1);
                assert!(!db.table_visible_to("HT_person", session.owner()));
            }
            StrategyKind::GlobalTemporary | StrategyKind::Persistent => {
                assert_eq!(db.statements_starting_with("delete from HT_person").len(), 1);
                assert_eq!(db.row_count("HT_person", session.owner()), 0);
            }
        }
        assert_eq!(listener.before.load(Ordering::SeqCst), 1);
        assert_eq!(listener.after.load(Ordering::SeqCst), 1);
        assert!(listener.saw_error.load(Ordering::SeqCst));
    }
}

#[test]
fn test_after_use_action_runs_when_population_fails() {
    let db = MockDatabase::new();
    let metamodel = fixtures::metamodel();
    let strategy = prepared(StrategyKind::Persistent, &metamodel, &db);
    let mut session = MockSession::open(&db);
    db.fail_matching_once(r"^insert into", SqlError::with_state("bad column", "42703"))
        .unwrap();

    let result = strategy
        .build_delete_handler(&metamodel, delete_retirees())
        .unwrap()
        .execute(&mut session);
    assertions::assert_sql_error(&result);

    assert!(mutations_of(&db).is_empty());
    let clean = &db.statements_starting_with("delete from HT_person")[0];
    assertions::assert_scoped_to_session(clean, session.owner());
}

#[test]
fn test_failed_cleanup_does_not_mask_success() {
    let db = MockDatabase::new();
    let metamodel = fixtures::metamodel();
    let strategy = prepared(StrategyKind::GlobalTemporary, &metamodel, &db);
    let mut session = MockSession::open(&db);
    db.set_match_count("person", 1);
    db.fail_matching(r"^delete from HT_", SqlError::with_state("disk full", "53100"))
        .unwrap();

    let count = strategy
        .build_delete_handler(&metamodel, delete_retirees())
        .unwrap()
        .execute(&mut session)
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn test_isolated_local_temporary_table_is_invisible_to_session() {
    let db = MockDatabase::new();
    let metamodel = fixtures::metamodel();
    let mut strategy = TableBasedStrategy::local_temporary()
        .with_ddl_transactionality(DdlTransactionality::Isolate);
    strategy
        .prepare(&metamodel, &fixtures::options(&[]), &db)
        .unwrap();
    let mut session = MockSession::open(&db);

    let result = strategy
        .build_delete_handler(&metamodel, delete_retirees())
        .unwrap()
        .execute(&mut session);
    match result {
        Err(BulkIdError::Sql(e)) => assert_eq!(e.sql_state.as_deref(), Some("42S02")),
        other => panic!("Expected missing table, got: {:?}", other),
    }
    assert!(db.statements_starting_with("create").iter().all(|s| s.standalone));
    assert_eq!(db.open_connection_count(), 0);
}

// ============================================================================
// EXPORTER TEXT
// ============================================================================

#[test]
fn test_exporter_text_shape() {
    let support = StandardIdTableSupport::new(IdTableDialect::standard_persistent());
    let mut table = IdTable::new(QualifiedTableName::new("T"), Arc::new(fixtures::person()));
    table.add_key_column("id", "BIGINT");

    let exporter = IdTableExporter::new(&support);
    assert_eq!(
        exporter.sql_create_strings(&table),
        vec!["create table T (id BIGINT not null) ".to_string()]
    );
    assert_eq!(exporter.sql_drop_strings(&table), vec!["drop table T".to_string()]);
}

// ============================================================================
// ROW COUNTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Deleting N matching entities spread over K tables and C collection
    /// tables reports N and issues exactly C + K id-restricted deletes,
    /// collections first and root last, or none when nothing matched.
    #[test]
    fn prop_delete_reports_population_count(
        entity in generators::arb_entity_descriptor(),
        matched in 0u64..500,
        kind in generators::arb_strategy_kind(),
    ) {
        let db = MockDatabase::new();
        let mut metamodel = Metamodel::new();
        metamodel.add(entity.clone()).unwrap();
        let strategy = prepared(kind, &metamodel, &db);
        let mut session = MockSession::open(&db);
        db.set_match_count("t0", matched);

        let delete = BulkDelete::new(entity.name.clone(), restriction_for(&entity, "r"));
        let count = strategy
            .build_delete_handler(&metamodel, delete)
            .unwrap()
            .execute(&mut session)
            .unwrap();
        prop_assert_eq!(count, matched);

        let mutations = mutations_of(&db);
        if matched == 0 {
            prop_assert!(mutations.is_empty());
            return Ok(());
        }
        let expected: Vec<_> = entity
            .collection_tables
            .iter()
            .chain(entity.tables.iter().rev())
            .collect();
        prop_assert_eq!(mutations.len(), expected.len());
        for (statement, table) in mutations.iter().zip(expected) {
            let prefix = format!("delete from {} where", table.name);
            prop_assert!(statement.sql.starts_with(&prefix));
            prop_assert!(statement.sql.contains("from HT_t0"));
            prop_assert_eq!(&statement.result, &Ok(matched));
        }
    }

    /// Updating one attribute per table issues one update per table, root
    /// first, each reporting the matched rows.
    #[test]
    fn prop_update_one_statement_per_table(
        entity in generators::arb_entity_descriptor(),
        matched in 1u64..500,
        uid_partitioned in any::<bool>(),
    ) {
        let kind = if uid_partitioned { StrategyKind::Persistent } else { StrategyKind::GlobalTemporary };
        let db = MockDatabase::new();
        let mut metamodel = Metamodel::new();
        metamodel.add(entity.clone()).unwrap();
        let strategy = prepared(kind, &metamodel, &db);
        let mut session = MockSession::open(&db);
        db.set_match_count("t0", matched);

        let mut update = BulkUpdate::new(entity.name.clone(), restriction_for(&entity, "r"));
        for mapping in entity.attributes.iter().rev() {
            update = update.set(mapping.attribute.clone(), SqlFragment::new("?").with_param(1_i64));
        }
        let count = strategy
            .build_update_handler(&metamodel, update)
            .unwrap()
            .execute(&mut session)
            .unwrap();
        prop_assert_eq!(count, matched);

        let mutations = mutations_of(&db);
        prop_assert_eq!(mutations.len(), entity.tables.len());
        for (statement, table) in mutations.iter().zip(entity.tables.iter()) {
            let prefix = format!("update {} set", table.name);
            prop_assert!(statement.sql.starts_with(&prefix));
            prop_assert_eq!(statement.params.len(), 1 + usize::from(uid_partitioned));
            prop_assert_eq!(&statement.result, &Ok(matched));
        }
    }
}
