//! Dialect-specific id-table SQL commands and naming.

use bulkid_core::{BulkIdResult, EntityDescriptor, MutationError, QualifiedTableName};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Prefix of every generated id-table name.
pub const DEFAULT_TABLE_PREFIX: &str = "HT_";

/// Prefix of every generated entity-table name.
pub const DEFAULT_ENTITY_TABLE_PREFIX: &str = "HTE_";

/// Identifier length limit applied when a dialect does not say otherwise.
pub const DEFAULT_MAX_IDENTIFIER_LENGTH: usize = 30;

/// SQL type of the session uid column (a hyphenated UUID).
pub const DEFAULT_SESSION_UID_TYPE: &str = "char(36)";

/// Produces the dialect SQL text an id table is managed with.
pub trait IdTableSupport: Send + Sync + Debug {
    /// Name of the id table serving `entity`, qualified with the given
    /// schema and catalog.
    fn generate_id_table_name(
        &self,
        entity: &EntityDescriptor,
        schema: Option<String>,
        catalog: Option<String>,
    ) -> BulkIdResult<QualifiedTableName>;

    /// Name of the entity table staging bulk inserts into `entity`.
    fn generate_entity_table_name(
        &self,
        entity: &EntityDescriptor,
        schema: Option<String>,
        catalog: Option<String>,
    ) -> BulkIdResult<QualifiedTableName>;

    /// Leading keywords of the CREATE statement, e.g. `create global temporary table`.
    fn create_id_table_command(&self) -> &str;

    /// Text appended after the column list, e.g. `on commit delete rows`.
    fn create_id_table_options(&self) -> Option<&str>;

    fn drop_id_table_command(&self) -> &str;

    fn truncate_id_table_command(&self) -> &str {
        "delete from"
    }

    fn session_uid_type(&self) -> &str {
        DEFAULT_SESSION_UID_TYPE
    }
}

// ============================================================================
// DIALECT COMMAND SETS
// ============================================================================

/// The command set of one database flavour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTableDialect {
    pub create_command: String,
    #[serde(default)]
    pub create_options: Option<String>,
    pub drop_command: String,
    #[serde(default = "default_truncate_command")]
    pub truncate_command: String,
    #[serde(default = "default_session_uid_type")]
    pub session_uid_type: String,
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
    #[serde(default = "default_entity_table_prefix")]
    pub entity_table_prefix: String,
    #[serde(default = "default_max_identifier_length")]
    pub max_identifier_length: usize,
}

fn default_truncate_command() -> String {
    "delete from".to_string()
}

fn default_session_uid_type() -> String {
    DEFAULT_SESSION_UID_TYPE.to_string()
}

fn default_table_prefix() -> String {
    DEFAULT_TABLE_PREFIX.to_string()
}

fn default_entity_table_prefix() -> String {
    DEFAULT_ENTITY_TABLE_PREFIX.to_string()
}

fn default_max_identifier_length() -> usize {
    DEFAULT_MAX_IDENTIFIER_LENGTH
}

impl IdTableDialect {
    fn with_commands(create: &str, options: Option<&str>, drop: &str) -> Self {
        Self {
            create_command: create.to_string(),
            create_options: options.map(str::to_string),
            drop_command: drop.to_string(),
            truncate_command: default_truncate_command(),
            session_uid_type: default_session_uid_type(),
            table_prefix: default_table_prefix(),
            entity_table_prefix: default_entity_table_prefix(),
            max_identifier_length: DEFAULT_MAX_IDENTIFIER_LENGTH,
        }
    }

    /// Regular tables, used by the persistent strategy.
    pub fn standard_persistent() -> Self {
        Self::with_commands("create table", None, "drop table")
    }

    /// SQL standard global temporary tables.
    pub fn global_temporary() -> Self {
        Self::with_commands(
            "create global temporary table",
            Some("on commit delete rows"),
            "drop table",
        )
    }

    /// SQL standard local temporary tables.
    pub fn local_temporary() -> Self {
        Self::with_commands("create local temporary table", None, "drop table")
    }

    pub fn h2_local_temporary() -> Self {
        Self::with_commands(
            "create cached local temporary table if not exists",
            Some("on commit drop transactional"),
            "drop table if exists",
        )
    }

    pub fn postgresql_local_temporary() -> Self {
        Self::with_commands("create temporary table", Some("on commit drop"), "drop table if exists")
    }

    pub fn oracle_global_temporary() -> Self {
        Self::with_commands(
            "create global temporary table",
            Some("on commit delete rows"),
            "drop table",
        )
    }

    pub fn with_max_identifier_length(mut self, length: usize) -> Self {
        self.max_identifier_length = length;
        self
    }

    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }
}

// ============================================================================
// STANDARD SUPPORT
// ============================================================================

/// [`IdTableSupport`] driven entirely by an [`IdTableDialect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardIdTableSupport {
    dialect: IdTableDialect,
}

impl StandardIdTableSupport {
    pub fn new(dialect: IdTableDialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> &IdTableDialect {
        &self.dialect
    }

    /// `<prefix><root table>`, cut to the identifier length limit.
    fn prefixed_name(
        &self,
        prefix: &str,
        entity: &EntityDescriptor,
        schema: Option<String>,
        catalog: Option<String>,
    ) -> BulkIdResult<QualifiedTableName> {
        let root = entity.root_table().ok_or_else(|| MutationError::InvalidDescriptor {
            entity: entity.name.clone(),
            reason: "no tables".to_string(),
        })?;

        let name: String = format!("{}{}", prefix, root.name.table)
            .chars()
            .take(self.dialect.max_identifier_length)
            .collect();

        Ok(QualifiedTableName::new(name)
            .with_schema(schema)
            .with_catalog(catalog))
    }
}

impl IdTableSupport for StandardIdTableSupport {
    fn generate_id_table_name(
        &self,
        entity: &EntityDescriptor,
        schema: Option<String>,
        catalog: Option<String>,
    ) -> BulkIdResult<QualifiedTableName> {
        self.prefixed_name(&self.dialect.table_prefix, entity, schema, catalog)
    }

    fn generate_entity_table_name(
        &self,
        entity: &EntityDescriptor,
        schema: Option<String>,
        catalog: Option<String>,
    ) -> BulkIdResult<QualifiedTableName> {
        self.prefixed_name(&self.dialect.entity_table_prefix, entity, schema, catalog)
    }

    fn create_id_table_command(&self) -> &str {
        &self.dialect.create_command
    }

    fn create_id_table_options(&self) -> Option<&str> {
        self.dialect.create_options.as_deref()
    }

    fn drop_id_table_command(&self) -> &str {
        &self.dialect.drop_command
    }

    fn truncate_id_table_command(&self) -> &str {
        &self.dialect.truncate_command
    }

    fn session_uid_type(&self) -> &str {
        &self.dialect.session_uid_type
    }
}
