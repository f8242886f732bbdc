//! Table based multi-table bulk id strategies.
//!
//! A strategy owns one id table and one entity table per entity type. It is
//! prepared once when
//! the session factory starts, hands out a [`MutationHandler`] for every
//! bulk statement, and is released when the factory closes.

use crate::{
    BulkDelete, BulkInsert, BulkStatement, BulkUpdate, ExecutionListener, HandlerConfig, IdTableDialect,
    IdTableHelper, IdTableSupport, MutationHandler, SessionUidSupport, StandardIdTableSupport,
};
use bulkid_core::{
    AfterUseAction, BeforeUseAction, BulkIdError, BulkIdResult, DdlTransactionality, IdTable,
    Metamodel, MutationError, SessionFactoryOptions, StrategyKind, TableRole,
};
use bulkid_jdbc::{
    ConnectionAccess, SqlExceptionTranslator, SqlStatementLogger, StandardSqlExceptionTranslator,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// REGISTRY
// ============================================================================

/// Id tables and entity tables keyed by entity name.
#[derive(Debug, Clone, Default)]
pub struct IdTableRegistry {
    tables: HashMap<String, Arc<IdTable>>,
    entity_tables: HashMap<String, Arc<IdTable>>,
}

impl IdTableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the id table or entity table of its entity, replacing any
    /// previous one of the same role.
    pub fn register(&mut self, table: Arc<IdTable>) {
        let tables = match table.role() {
            TableRole::Id => &mut self.tables,
            TableRole::Entity => &mut self.entity_tables,
        };
        tables.insert(table.entity().name.clone(), table);
    }

    pub fn get(&self, entity: &str) -> Option<&Arc<IdTable>> {
        self.tables.get(entity)
    }

    pub fn entity_table(&self, entity: &str) -> Option<&Arc<IdTable>> {
        self.entity_tables.get(entity)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<IdTable>> {
        self.tables.values()
    }

    /// Number of entities with an id table.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn clear(&mut self) {
        self.tables.clear();
        self.entity_tables.clear();
    }
}

// ============================================================================
// STRATEGY
// ============================================================================

/// Multi-table bulk id strategy backed by local temporary, global temporary
/// or persistent id tables.
///
/// The lifecycle actions and session partitioning are fixed by the
/// [`StrategyKind`]; only the dialect, the DDL transaction handling and an
/// execution listener are configurable.
pub struct TableBasedStrategy {
    kind: StrategyKind,
    support: Arc<dyn IdTableSupport>,
    translator: Arc<dyn SqlExceptionTranslator>,
    listener: Option<Arc<dyn ExecutionListener>>,
    explicit_ddl_transactionality: Option<DdlTransactionality>,
    ddl_transactionality: DdlTransactionality,
    logger: SqlStatementLogger,
    registry: IdTableRegistry,
    drop_on_release: Vec<IdTableHelper>,
}

impl TableBasedStrategy {
    pub fn new(kind: StrategyKind, support: Arc<dyn IdTableSupport>) -> Self {
        Self {
            kind,
            support,
            translator: Arc::new(StandardSqlExceptionTranslator),
            listener: None,
            explicit_ddl_transactionality: None,
            ddl_transactionality: kind.default_ddl_transactionality(),
            logger: SqlStatementLogger::default(),
            registry: IdTableRegistry::new(),
            drop_on_release: Vec::new(),
        }
    }

    /// Local temporary tables with SQL standard DDL.
    pub fn local_temporary() -> Self {
        Self::with_dialect(StrategyKind::LocalTemporary, IdTableDialect::local_temporary())
    }

    /// Global temporary tables with SQL standard DDL.
    pub fn global_temporary() -> Self {
        Self::with_dialect(StrategyKind::GlobalTemporary, IdTableDialect::global_temporary())
    }

    /// Regular tables partitioned by session uid.
    pub fn persistent() -> Self {
        Self::with_dialect(StrategyKind::Persistent, IdTableDialect::standard_persistent())
    }

    pub fn with_dialect(kind: StrategyKind, dialect: IdTableDialect) -> Self {
        Self::new(kind, Arc::new(StandardIdTableSupport::new(dialect)))
    }

    /// Override the DDL transaction handling for this strategy only.
    pub fn with_ddl_transactionality(mut self, ddl: DdlTransactionality) -> Self {
        self.explicit_ddl_transactionality = Some(ddl);
        self.ddl_transactionality = ddl;
        self
    }

    pub fn with_translator(mut self, translator: Arc<dyn SqlExceptionTranslator>) -> Self {
        self.translator = translator;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    pub fn before_use_action(&self) -> BeforeUseAction {
        self.kind.before_use_action()
    }

    pub fn after_use_action(&self) -> AfterUseAction {
        self.kind.after_use_action()
    }

    pub fn session_uid_support(&self) -> SessionUidSupport {
        if self.kind.needs_session_uid_column() {
            SessionUidSupport::Standard
        } else {
            SessionUidSupport::None
        }
    }

    /// DDL transaction handling in effect. Resolved against the factory
    /// options by [`TableBasedStrategy::prepare`].
    pub fn ddl_transactionality(&self) -> DdlTransactionality {
        self.ddl_transactionality
    }

    pub fn support(&self) -> &Arc<dyn IdTableSupport> {
        &self.support
    }

    pub fn registry(&self) -> &IdTableRegistry {
        &self.registry
    }

    pub fn id_table(&self, entity: &str) -> Option<&Arc<IdTable>> {
        self.registry.get(entity)
    }

    pub fn entity_table(&self, entity: &str) -> Option<&Arc<IdTable>> {
        self.registry.entity_table(entity)
    }

    // ===== LIFECYCLE =====

    /// Define an id table and an entity table for every entity of
    /// `metamodel`.
    ///
    /// Global temporary and persistent tables are created here on a
    /// standalone connection unless table creation is switched off. CREATE
    /// failures are tolerated; failing to obtain a connection is not, and
    /// leaves the strategy as it was before the call. Preparing again
    /// replaces every definition.
    pub fn prepare(
        &mut self,
        metamodel: &Metamodel,
        options: &SessionFactoryOptions,
        connection_access: &dyn ConnectionAccess,
    ) -> BulkIdResult<()> {
        options.validate()?;

        let ddl = self
            .explicit_ddl_transactionality
            .or(options.bulk_id.ddl_transaction_handling)
            .unwrap_or_else(|| self.kind.default_ddl_transactionality());
        let logger = SqlStatementLogger::from_options(options);

        let provisioning = options.bulk_id.provisioning(self.kind);
        let create_tables = self.kind.creates_tables_at_prepare() && provisioning.create_tables;
        let (schema, catalog) = match self.kind {
            StrategyKind::LocalTemporary => (None, None),
            StrategyKind::GlobalTemporary => {
                (options.default_schema.clone(), options.default_catalog.clone())
            }
            StrategyKind::Persistent => (options.persistent_schema(), options.persistent_catalog()),
        };
        let session_uid_support = self.session_uid_support();

        let mut definitions = Vec::with_capacity(metamodel.len());
        for entity in metamodel.entities() {
            let id_name =
                self.support
                    .generate_id_table_name(entity, schema.clone(), catalog.clone())?;
            let entity_name =
                self.support
                    .generate_entity_table_name(entity, schema.clone(), catalog.clone())?;
            definitions.push((entity, id_name, entity_name));
        }

        // An entity table stages the attributes of every entity sharing its root
        let mut staged_columns: HashMap<String, Vec<(String, String)>> = HashMap::new();
        for (entity, _, entity_name) in &definitions {
            staged_columns.entry(entity_name.render()).or_default().extend(
                entity
                    .attributes
                    .iter()
                    .map(|mapping| (mapping.attribute.clone(), mapping.sql_type.clone())),
            );
        }

        let mut registry = IdTableRegistry::new();
        let mut drop_on_release = Vec::new();
        // Entities sharing a root table share one physical id table
        let mut provisioned = HashSet::new();
        for (entity, id_name, entity_name) in definitions {
            let mut id_table = IdTable::new(id_name, Arc::clone(entity));
            let mut entity_table = IdTable::entity_table(entity_name, Arc::clone(entity));
            for table in [&mut id_table, &mut entity_table] {
                session_uid_support.add_column(table, self.support.as_ref());
                for column in &entity.identifier {
                    table.add_key_column(&column.name, &column.sql_type);
                }
            }
            let values = staged_columns.get(&entity_table.qualified_name());
            for (attribute, sql_type) in values.into_iter().flatten() {
                entity_table.add_value_column(attribute, sql_type);
            }

            for table in [id_table, entity_table] {
                let table = Arc::new(table);
                registry.register(Arc::clone(&table));
                if !provisioned.insert(table.qualified_name()) {
                    continue;
                }

                let helper = IdTableHelper::new(table, self.support.as_ref());
                if create_tables {
                    helper.create_id_table_standalone(
                        connection_access,
                        self.translator.as_ref(),
                        &logger,
                        ddl,
                    )?;
                }
                if provisioning.drop_tables {
                    drop_on_release.push(helper);
                }
            }
        }

        tracing::debug!(
            strategy = %self.kind,
            entities = registry.len(),
            tables = provisioned.len(),
            ddl = %ddl,
            "Prepared id tables"
        );
        self.ddl_transactionality = ddl;
        self.logger = logger;
        self.registry = registry;
        self.drop_on_release = drop_on_release;
        Ok(())
    }

    /// Drop the tables created at prepare time when configured to, then
    /// forget every definition.
    ///
    /// Every table is attempted. Tables that could not be dropped are kept
    /// so a later release retries them, and the first error is returned.
    pub fn release(&mut self, connection_access: &dyn ConnectionAccess) -> BulkIdResult<()> {
        self.registry.clear();

        let mut first_error: Option<BulkIdError> = None;
        let mut retained = Vec::new();
        for helper in std::mem::take(&mut self.drop_on_release) {
            match helper.drop_id_table_standalone(
                connection_access,
                self.translator.as_ref(),
                &self.logger,
                self.ddl_transactionality,
            ) {
                Ok(outcome) => tracing::debug!(
                    strategy = %self.kind,
                    table = %helper.table().qualified_name(),
                    applied = outcome.is_applied(),
                    "Released id table"
                ),
                Err(e) => {
                    tracing::warn!(
                        strategy = %self.kind,
                        table = %helper.table().qualified_name(),
                        error = %e,
                        "Unable to release id table"
                    );
                    first_error.get_or_insert(e);
                    retained.push(helper);
                }
            }
        }
        self.drop_on_release = retained;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ===== HANDLERS =====

    pub fn build_update_handler(
        &self,
        metamodel: &Metamodel,
        update: BulkUpdate,
    ) -> BulkIdResult<MutationHandler> {
        self.build_handler(metamodel, update.into())
    }

    /// Build the handler staging rows in the entity table of the inserted
    /// entity and copying them into each of its tables.
    pub fn build_insert_handler(
        &self,
        metamodel: &Metamodel,
        insert: BulkInsert,
    ) -> BulkIdResult<MutationHandler> {
        self.build_handler(metamodel, insert.into())
    }

    pub fn build_delete_handler(
        &self,
        metamodel: &Metamodel,
        delete: BulkDelete,
    ) -> BulkIdResult<MutationHandler> {
        self.build_handler(metamodel, delete.into())
    }

    /// Build the handler executing `statement` against its entity's id table,
    /// or its entity table for an insert.
    pub fn build_handler(
        &self,
        metamodel: &Metamodel,
        statement: BulkStatement,
    ) -> BulkIdResult<MutationHandler> {
        let entity = statement.entity();
        if metamodel.entity(entity).is_none() {
            return Err(MutationError::UnknownEntity {
                entity: entity.to_string(),
            }
            .into());
        }
        let table = if statement.is_insert() {
            self.registry.entity_table(entity)
        } else {
            self.registry.get(entity)
        };
        let id_table = table
            .cloned()
            .ok_or_else(|| MutationError::IdTableNotFound {
                entity: entity.to_string(),
            })?;

        MutationHandler::new(
            statement,
            id_table,
            self.support.as_ref(),
            self.handler_config(),
        )
    }

    fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            before_use_action: self.before_use_action(),
            after_use_action: self.after_use_action(),
            session_uid_support: self.session_uid_support(),
            ddl_transactionality: self.ddl_transactionality,
            listener: self.listener.clone(),
        }
    }
}

impl fmt::Debug for TableBasedStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableBasedStrategy")
            .field("kind", &self.kind)
            .field("support", &self.support)
            .field("ddl_transactionality", &self.ddl_transactionality)
            .field("id_tables", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkid_core::{
        AttributeMapping, EntityDescriptor, EntityTable, KeyColumn, QualifiedTableName, SqlError,
    };
    use bulkid_jdbc::MockDatabase;

    fn metamodel() -> Metamodel {
        let mut metamodel = Metamodel::new();
        metamodel
            .add(EntityDescriptor {
                name: "Person".to_string(),
                identifier: vec![KeyColumn::new("id", "BIGINT")],
                tables: vec![EntityTable::new(QualifiedTableName::new("person"), ["id"])],
                collection_tables: Vec::new(),
                attributes: vec![AttributeMapping::new("name", "person", "name", "varchar(255)")],
            })
            .unwrap();
        metamodel
    }

    fn refused() -> SqlError {
        SqlError::with_state("Connection refused", "08006")
    }

    #[test]
    fn test_registry_replaces_by_entity() {
        let metamodel = metamodel();
        let entity = metamodel.entity("Person").unwrap();
        let mut registry = IdTableRegistry::new();
        registry.register(Arc::new(IdTable::new(QualifiedTableName::new("HT_a"), Arc::clone(entity))));
        registry.register(Arc::new(IdTable::new(QualifiedTableName::new("HT_b"), Arc::clone(entity))));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("Person").unwrap().qualified_name(), "HT_b");
    }

    #[test]
    fn test_registry_keeps_entity_tables_apart() {
        let metamodel = metamodel();
        let entity = metamodel.entity("Person").unwrap();
        let mut registry = IdTableRegistry::new();
        registry.register(Arc::new(IdTable::new(QualifiedTableName::new("HT_person"), Arc::clone(entity))));
        registry.register(Arc::new(IdTable::entity_table(
            QualifiedTableName::new("HTE_person"),
            Arc::clone(entity),
        )));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("Person").unwrap().qualified_name(), "HT_person");
        assert_eq!(registry.entity_table("Person").unwrap().qualified_name(), "HTE_person");

        registry.clear();
        assert!(registry.entity_table("Person").is_none());
    }

    #[test]
    fn test_prepare_defines_entity_tables() {
        let db = MockDatabase::new();
        let mut strategy = TableBasedStrategy::persistent();
        strategy
            .prepare(&metamodel(), &SessionFactoryOptions::default(), &db)
            .unwrap();

        let table = strategy.entity_table("Person").unwrap();
        assert_eq!(table.role(), TableRole::Entity);
        let columns: Vec<_> = table.columns().map(|c| c.name()).collect();
        assert_eq!(columns, vec!["hib_sess_id", "id", "name"]);
        assert!(db.table_exists("HT_person"));
        assert!(db.table_exists("HTE_person"));
    }

    #[test]
    fn test_failed_prepare_leaves_no_definitions() {
        let db = MockDatabase::new();
        db.refuse_connections(Some(refused()));

        let mut strategy = TableBasedStrategy::persistent();
        assert!(strategy
            .prepare(&metamodel(), &SessionFactoryOptions::default(), &db)
            .is_err());
        assert!(strategy.registry().is_empty());
        assert!(strategy.entity_table("Person").is_none());

        let err = strategy
            .build_delete_handler(
                &metamodel(),
                BulkDelete::new("Person", crate::IdRestriction::new("person p", ["p.id"])),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            BulkIdError::Mutation(MutationError::IdTableNotFound { .. })
        ));
    }

    #[test]
    fn test_failed_prepare_keeps_previous_definitions() {
        let db = MockDatabase::new();
        let options = SessionFactoryOptions::default();
        let mut strategy = TableBasedStrategy::global_temporary();
        strategy.prepare(&metamodel(), &options, &db).unwrap();

        db.refuse_connections(Some(refused()));
        assert!(strategy.prepare(&metamodel(), &options, &db).is_err());
        assert_eq!(strategy.registry().len(), 1);
        assert!(strategy.entity_table("Person").is_some());
    }

    #[test]
    fn test_release_retries_tables_it_could_not_drop() {
        let db = MockDatabase::new();
        let mut options = SessionFactoryOptions::default();
        options.bulk_id.persistent.drop_tables = true;
        let mut strategy = TableBasedStrategy::persistent();
        strategy.prepare(&metamodel(), &options, &db).unwrap();

        db.refuse_connections(Some(refused()));
        assert!(strategy.release(&db).is_err());
        assert!(db.table_exists("HT_person"));
        assert!(db.table_exists("HTE_person"));

        db.refuse_connections(None);
        strategy.release(&db).unwrap();
        assert!(!db.table_exists("HT_person"));
        assert!(!db.table_exists("HTE_person"));
        assert_eq!(db.statements_starting_with("drop table").len(), 2);
    }

    #[test]
    fn test_explicit_ddl_wins_over_options() {
        let db = MockDatabase::new();
        let mut options = SessionFactoryOptions::default();
        options.bulk_id.ddl_transaction_handling = Some(DdlTransactionality::Isolate);

        let mut strategy = TableBasedStrategy::global_temporary()
            .with_ddl_transactionality(DdlTransactionality::IsolateAndTransact);
        strategy.prepare(&metamodel(), &options, &db).unwrap();
        assert_eq!(strategy.ddl_transactionality(), DdlTransactionality::IsolateAndTransact);
    }

    #[test]
    fn test_options_ddl_used_by_every_kind() {
        let db = MockDatabase::new();
        let mut options = SessionFactoryOptions::default();
        options.bulk_id.ddl_transaction_handling = Some(DdlTransactionality::Isolate);

        for kind in StrategyKind::ALL {
            let mut strategy = TableBasedStrategy::new(
                kind,
                Arc::new(StandardIdTableSupport::new(IdTableDialect::standard_persistent())),
            );
            strategy.prepare(&metamodel(), &options, &db).unwrap();
            assert_eq!(strategy.ddl_transactionality(), DdlTransactionality::Isolate);
        }
    }

    #[test]
    fn test_unprepared_strategy_has_no_id_table() {
        let strategy = TableBasedStrategy::persistent();
        let err = strategy
            .build_delete_handler(
                &metamodel(),
                BulkDelete::new("Person", crate::IdRestriction::new("person p", ["p.id"])),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            BulkIdError::Mutation(MutationError::IdTableNotFound { .. })
        ));
    }

    #[test]
    fn test_debug_omits_collaborators() {
        let rendered = format!("{:?}", TableBasedStrategy::local_temporary());
        assert!(rendered.contains("LocalTemporary"));
        assert!(rendered.contains(".."));
    }
}
