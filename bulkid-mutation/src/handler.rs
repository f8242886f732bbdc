//! Three-phase execution of one bulk statement through an id table.
//!
//! 1. Save the ids of every matching row into the id table with a single
//!    `insert ... select`. Inserts stage whole rows in an entity table.
//! 2. Run one statement per physical table of the entity, each restricted
//!    to the ids held in the id table. Skipped when nothing matched.
//! 3. Release the id table (drop it, or delete this session's rows).
//!
//! The per-table statements are rendered when the handler is built; only
//! the session uid is bound at execution time.

use crate::{
    Assignment, BulkStatement, IdRestriction, IdTableHelper, IdTableSupport, SessionUidSupport,
};
use bulkid_core::{
    AfterUseAction, AttributeMapping, BeforeUseAction, BulkIdResult, DdlTransactionality,
    EntityDescriptor, EntityTable, IdTable, MutationError, QualifiedTableName, SqlFragment,
    SqlValue, TableRole,
};
use bulkid_jdbc::ExecutionContext;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Callbacks around [`MutationHandler::execute`]. Both default to no-ops.
pub trait ExecutionListener: Send + Sync {
    /// Called before the id table is provisioned.
    fn before_execution(&self, _ctx: &mut dyn ExecutionContext) {}

    /// Called last, after the after-use action, whatever the result.
    fn after_execution(&self, _ctx: &mut dyn ExecutionContext, _result: &BulkIdResult<u64>) {}
}

/// Lifecycle settings a strategy injects into its handlers.
#[derive(Clone, Default)]
pub struct HandlerConfig {
    pub before_use_action: BeforeUseAction,
    pub after_use_action: AfterUseAction,
    pub session_uid_support: SessionUidSupport,
    pub ddl_transactionality: DdlTransactionality,
    pub listener: Option<Arc<dyn ExecutionListener>>,
}

impl fmt::Debug for HandlerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerConfig")
            .field("before_use_action", &self.before_use_action)
            .field("after_use_action", &self.after_use_action)
            .field("session_uid_support", &self.session_uid_support)
            .field("ddl_transactionality", &self.ddl_transactionality)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

/// A rendered statement against one physical table of the entity.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMutation {
    pub table: QualifiedTableName,
    pub sql: String,
    /// Bind values, excluding the trailing session uid
    pub params: Vec<SqlValue>,
}

// ============================================================================
// HANDLER
// ============================================================================

/// Executes one bulk UPDATE, DELETE or INSERT. Single use:
/// [`MutationHandler::execute`] consumes it.
#[derive(Debug)]
pub struct MutationHandler {
    statement: BulkStatement,
    helper: IdTableHelper,
    population: SqlFragment,
    mutations: Vec<TableMutation>,
    config: HandlerConfig,
}

impl MutationHandler {
    /// Validate `statement` against the entity behind `id_table` and render
    /// every SQL statement the execution needs.
    pub fn new(
        statement: BulkStatement,
        id_table: Arc<IdTable>,
        support: &dyn IdTableSupport,
        config: HandlerConfig,
    ) -> BulkIdResult<Self> {
        let entity = Arc::clone(id_table.entity());
        if entity.name != statement.entity() {
            return Err(MutationError::IdTableNotFound {
                entity: statement.entity().to_string(),
            }
            .into());
        }

        let invalid = |reason: String| MutationError::InvalidDescriptor {
            entity: entity.name.clone(),
            reason,
        };
        if config.session_uid_support.needs_session_uid_column()
            != id_table.session_uid_column().is_some()
        {
            return Err(invalid(format!(
                "id table {} does not match the session uid support",
                id_table.qualified_name()
            ))
            .into());
        }
        let expected_role = if statement.is_insert() {
            TableRole::Entity
        } else {
            TableRole::Id
        };
        if id_table.role() != expected_role {
            return Err(invalid(format!(
                "table {} cannot serve a bulk {}",
                id_table.qualified_name(),
                statement.kind()
            ))
            .into());
        }
        let selected = statement.restriction().id_select_expressions.len();
        if selected != entity.identifier.len() {
            return Err(invalid(format!(
                "restriction selects {} id columns but the identifier has {}",
                selected,
                entity.identifier.len()
            ))
            .into());
        }

        let id_select = id_table_select(&id_table, config.session_uid_support);
        let (population, mutations) = match &statement {
            BulkStatement::Delete(delete) => (
                population_statement(&id_table, &delete.restriction, config.session_uid_support, &[]),
                delete_mutations(&entity, &id_select),
            ),
            BulkStatement::Update(update) => (
                population_statement(&id_table, &update.restriction, config.session_uid_support, &[]),
                update_mutations(&entity, &update.assignments, &id_select)?,
            ),
            BulkStatement::Insert(insert) => {
                let staged = staged_values(&entity, &id_table, &insert.values)?;
                (
                    population_statement(
                        &id_table,
                        &insert.source,
                        config.session_uid_support,
                        &staged,
                    ),
                    insert_mutations(&entity, &id_table, &staged, config.session_uid_support),
                )
            }
        };

        Ok(Self {
            helper: IdTableHelper::new(id_table, support),
            statement,
            population,
            mutations,
            config,
        })
    }

    pub fn statement(&self) -> &BulkStatement {
        &self.statement
    }

    pub fn id_table(&self) -> &Arc<IdTable> {
        self.helper.table()
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// The `insert ... select` saving matching ids (or staging inserted
    /// rows), without the session uid.
    pub fn population(&self) -> &SqlFragment {
        &self.population
    }

    /// Per-table statements in execution order.
    pub fn mutations(&self) -> &[TableMutation] {
        &self.mutations
    }

    /// Run the statement, returning the number of matched entities, or for
    /// an insert the number of rows written to the root table.
    ///
    /// The after-use action runs even when populating or mutating fails,
    /// and the listener's `after_execution` always runs last. Errors from
    /// the population or mutation statements are returned unchanged.
    pub fn execute(self, ctx: &mut dyn ExecutionContext) -> BulkIdResult<u64> {
        if let Some(listener) = &self.config.listener {
            listener.before_execution(ctx);
        }

        let result = self.execute_phases(ctx);

        if let Some(listener) = &self.config.listener {
            listener.after_execution(ctx, &result);
        }
        result
    }

    fn execute_phases(&self, ctx: &mut dyn ExecutionContext) -> BulkIdResult<u64> {
        let session_uid = self.config.session_uid_support.extract_uid(&*ctx);

        self.perform_before_use_actions(ctx);
        let result = self
            .save_matching_ids_into_id_table(ctx, session_uid.as_deref())
            .and_then(|count| {
                if count == 0 {
                    tracing::trace!(
                        entity = %self.statement.entity(),
                        "No rows matched, skipping table mutations"
                    );
                    return Ok(0);
                }
                let affected = self.perform_mutations(ctx, session_uid.as_deref())?;
                match self.statement {
                    // rows written to the root table
                    BulkStatement::Insert(_) => Ok(affected.first().copied().unwrap_or(0)),
                    _ => Ok(count),
                }
            });
        self.perform_after_use_actions(ctx, session_uid.as_deref());

        result
    }

    // ===== PHASES =====

    fn perform_before_use_actions(&self, ctx: &mut dyn ExecutionContext) {
        if self.config.before_use_action == BeforeUseAction::Create {
            let outcome = self
                .helper
                .create_id_table(ctx, self.config.ddl_transactionality);
            tracing::trace!(
                table = %self.id_table().qualified_name(),
                applied = outcome.is_applied(),
                "Provisioned id table"
            );
        }
    }

    fn save_matching_ids_into_id_table(
        &self,
        ctx: &mut dyn ExecutionContext,
        session_uid: Option<&str>,
    ) -> BulkIdResult<u64> {
        let mut params: Vec<SqlValue> = session_uid.map(SqlValue::from).into_iter().collect();
        params.extend(self.population.params.iter().cloned());

        ctx.statement_logger().log_statement(&self.population.sql);
        let count = ctx.connection().execute(&self.population.sql, &params)?;
        tracing::trace!(
            entity = %self.statement.entity(),
            table = %self.id_table().qualified_name(),
            count,
            "Saved matching ids into id table"
        );
        Ok(count)
    }

    /// Rows affected per mutation, in execution order.
    fn perform_mutations(
        &self,
        ctx: &mut dyn ExecutionContext,
        session_uid: Option<&str>,
    ) -> BulkIdResult<Vec<u64>> {
        let mut affected_rows = Vec::with_capacity(self.mutations.len());
        for mutation in &self.mutations {
            let mut params = mutation.params.clone();
            params.extend(session_uid.map(SqlValue::from));

            ctx.statement_logger().log_statement(&mutation.sql);
            let affected = ctx.connection().execute(&mutation.sql, &params)?;
            tracing::trace!(
                kind = self.statement.kind(),
                table = %mutation.table,
                affected,
                "Applied bulk mutation to table"
            );
            affected_rows.push(affected);
        }
        Ok(affected_rows)
    }

    fn perform_after_use_actions(&self, ctx: &mut dyn ExecutionContext, session_uid: Option<&str>) {
        let outcome = match self.config.after_use_action {
            AfterUseAction::Drop => self
                .helper
                .drop_id_table(ctx, self.config.ddl_transactionality),
            AfterUseAction::Clean => self.helper.clean_id_table_rows(ctx, session_uid),
            AfterUseAction::None => return,
        };
        tracing::trace!(
            table = %self.id_table().qualified_name(),
            action = ?self.config.after_use_action,
            applied = outcome.is_applied(),
            "Released id table"
        );
    }
}

// ============================================================================
// SQL RENDERING
// ============================================================================

/// An insert value and the mapping of the attribute it is written to.
/// Staged under the attribute name, copied out to the mapped column.
struct StagedValue<'a> {
    mapping: &'a AttributeMapping,
    value: &'a SqlFragment,
}

/// `insert into <id-table> (<cols>) select [?, ]<ids>[, <values>] from <from> [where <where>]`
fn population_statement(
    id_table: &IdTable,
    restriction: &IdRestriction,
    session_uid_support: SessionUidSupport,
    staged: &[StagedValue<'_>],
) -> SqlFragment {
    let mut columns: Vec<&str> = id_table
        .session_uid_column()
        .into_iter()
        .chain(id_table.key_columns())
        .map(|column| column.name())
        .collect();
    columns.extend(staged.iter().map(|s| s.mapping.attribute.as_str()));

    let mut select_list: Vec<&str> = Vec::new();
    if session_uid_support.needs_session_uid_column() {
        select_list.push("?");
    }
    select_list.extend(restriction.id_select_expressions.iter().map(String::as_str));
    select_list.extend(staged.iter().map(|s| s.value.sql.as_str()));

    let mut fragment = SqlFragment::new(format!(
        "insert into {} ({}) select {} from {}",
        id_table.qualified_name(),
        columns.join(", "),
        select_list.join(", "),
        restriction.from_clause
    ));
    fragment
        .params
        .extend(staged.iter().flat_map(|s| s.value.params.iter().cloned()));
    if let Some(where_clause) = &restriction.where_clause {
        fragment.sql.push_str(" where ");
        fragment.sql.push_str(&where_clause.sql);
        fragment.params.extend(where_clause.params.iter().cloned());
    }
    fragment
}

/// `select <id cols> from <id-table>[ where hib_sess_id = ?]`
fn id_table_select(id_table: &IdTable, session_uid_support: SessionUidSupport) -> String {
    let columns = id_table
        .key_columns()
        .iter()
        .map(|column| column.name())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "select {} from {}{}",
        columns,
        id_table.qualified_name(),
        session_uid_support.restriction()
    )
}

/// `<key> in (<id select>)`, or `(<a>, <b>) in (...)` for composite keys.
fn id_predicate(table: &EntityTable, id_select: &str) -> String {
    match table.key_columns.as_slice() {
        [single] => format!("{} in ({})", single, id_select),
        columns => format!("({}) in ({})", columns.join(", "), id_select),
    }
}

/// One delete per table: collection tables first, then dependent tables,
/// the root last.
fn delete_mutations(entity: &EntityDescriptor, id_select: &str) -> Vec<TableMutation> {
    entity
        .collection_tables
        .iter()
        .chain(entity.tables.iter().rev())
        .map(|table| TableMutation {
            table: table.name.clone(),
            sql: format!(
                "delete from {} where {}",
                table.name,
                id_predicate(table, id_select)
            ),
            params: Vec::new(),
        })
        .collect()
}

/// One update per table owning at least one assigned attribute, root first.
fn update_mutations(
    entity: &EntityDescriptor,
    assignments: &[Assignment],
    id_select: &str,
) -> BulkIdResult<Vec<TableMutation>> {
    if assignments.is_empty() {
        return Err(MutationError::EmptyAssignments {
            entity: entity.name.clone(),
        }
        .into());
    }

    let mut resolved = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let mapping =
            entity
                .attribute(&assignment.attribute)
                .ok_or_else(|| MutationError::UnknownAttribute {
                    entity: entity.name.clone(),
                    attribute: assignment.attribute.clone(),
                })?;
        resolved.push((mapping, &assignment.value));
    }

    let mut mutations = Vec::new();
    for table in &entity.tables {
        let mut set_clauses = Vec::new();
        let mut params = Vec::new();
        for (mapping, value) in resolved.iter().filter(|(m, _)| m.table == table.name.table) {
            set_clauses.push(format!("{} = {}", mapping.column, value.sql));
            params.extend(value.params.iter().cloned());
        }
        if set_clauses.is_empty() {
            continue;
        }
        mutations.push(TableMutation {
            table: table.name.clone(),
            sql: format!(
                "update {} set {} where {}",
                table.name,
                set_clauses.join(", "),
                id_predicate(table, id_select)
            ),
            params,
        });
    }
    Ok(mutations)
}

/// Resolve an insert's values against the entity and its entity table.
fn staged_values<'a>(
    entity: &'a EntityDescriptor,
    entity_table: &IdTable,
    values: &'a [Assignment],
) -> BulkIdResult<Vec<StagedValue<'a>>> {
    let mut staged = Vec::with_capacity(values.len());
    for assignment in values {
        let mapping =
            entity
                .attribute(&assignment.attribute)
                .ok_or_else(|| MutationError::UnknownAttribute {
                    entity: entity.name.clone(),
                    attribute: assignment.attribute.clone(),
                })?;
        if entity_table.value_column(&mapping.attribute).is_none() {
            return Err(MutationError::InvalidDescriptor {
                entity: entity.name.clone(),
                reason: format!(
                    "entity table {} has no column for {}",
                    entity_table.qualified_name(),
                    mapping.attribute
                ),
            }
            .into());
        }
        staged.push(StagedValue {
            mapping,
            value: &assignment.value,
        });
    }
    Ok(staged)
}

/// One `insert ... select` from the entity table per physical table, root
/// first. Every table receives the identifier; each also receives the
/// staged values of the attributes it stores.
fn insert_mutations(
    entity: &EntityDescriptor,
    entity_table: &IdTable,
    staged: &[StagedValue<'_>],
    session_uid_support: SessionUidSupport,
) -> Vec<TableMutation> {
    entity
        .tables
        .iter()
        .map(|table| {
            let owned: Vec<&AttributeMapping> = staged
                .iter()
                .map(|s| s.mapping)
                .filter(|mapping| mapping.table == table.name.table)
                .collect();

            let mut target: Vec<&str> = table.key_columns.iter().map(String::as_str).collect();
            target.extend(owned.iter().map(|mapping| mapping.column.as_str()));
            let mut source: Vec<&str> = entity_table
                .key_columns()
                .iter()
                .map(|column| column.name())
                .collect();
            source.extend(owned.iter().map(|mapping| mapping.attribute.as_str()));

            TableMutation {
                table: table.name.clone(),
                sql: format!(
                    "insert into {} ({}) select {} from {}{}",
                    table.name,
                    target.join(", "),
                    source.join(", "),
                    entity_table.qualified_name(),
                    session_uid_support.restriction()
                ),
                params: Vec::new(),
            }
        })
        .collect()
}
