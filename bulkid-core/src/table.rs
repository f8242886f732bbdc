//! Id-table definitions.
//!
//! An id table is a disposable auxiliary table holding the identifiers of
//! the entities matched by a bulk statement. An entity table additionally
//! stages the attribute values of rows a bulk insert is about to write.
//! Neither takes part in the application's exported schema, so they have no
//! foreign keys; only the staged attribute values may be null.

use crate::EntityDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A table name with optional catalog and schema qualifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedTableName {
    #[serde(default)]
    pub catalog: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    pub table: String,
}

impl QualifiedTableName {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            catalog: None,
            schema: None,
            table: table.into(),
        }
    }

    pub fn with_schema(mut self, schema: Option<String>) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_catalog(mut self, catalog: Option<String>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Render as `catalog.schema.table`, omitting absent qualifiers.
    pub fn render(&self) -> String {
        let mut rendered = String::new();
        for part in [&self.catalog, &self.schema].into_iter().flatten() {
            rendered.push_str(part);
            rendered.push('.');
        }
        rendered.push_str(&self.table);
        rendered
    }
}

impl fmt::Display for QualifiedTableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// What an auxiliary table holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TableRole {
    /// Identifiers of the rows matched by an update or delete
    #[default]
    Id,
    /// Identifier and attribute values of the rows staged by an insert
    Entity,
}

/// A column of an id or entity table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdTableColumn {
    name: String,
    sql_type: String,
    nullable: bool,
}

impl IdTableColumn {
    fn new(name: impl Into<String>, sql_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql_type(&self) -> &str {
        &self.sql_type
    }

    /// Only staged attribute values of an entity table are nullable.
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }
}

/// Schema of the id (or entity) table used for one entity type.
#[derive(Debug, Clone)]
pub struct IdTable {
    name: QualifiedTableName,
    entity: Arc<EntityDescriptor>,
    role: TableRole,
    session_uid_column: Option<IdTableColumn>,
    key_columns: Vec<IdTableColumn>,
    value_columns: Vec<IdTableColumn>,
}

impl IdTable {
    /// Create an id table without columns for `entity`.
    pub fn new(name: QualifiedTableName, entity: Arc<EntityDescriptor>) -> Self {
        Self {
            name,
            entity,
            role: TableRole::Id,
            session_uid_column: None,
            key_columns: Vec::new(),
            value_columns: Vec::new(),
        }
    }

    /// Create an entity table without columns for `entity`.
    pub fn entity_table(name: QualifiedTableName, entity: Arc<EntityDescriptor>) -> Self {
        Self {
            role: TableRole::Entity,
            ..Self::new(name, entity)
        }
    }

    /// Add the column partitioning rows by session. It always renders first.
    pub fn set_session_uid_column(&mut self, name: impl Into<String>, sql_type: impl Into<String>) {
        self.session_uid_column = Some(IdTableColumn::new(name, sql_type, false));
    }

    pub fn add_key_column(&mut self, name: impl Into<String>, sql_type: impl Into<String>) {
        self.key_columns.push(IdTableColumn::new(name, sql_type, false));
    }

    /// Add a nullable column staging one attribute. Ignored for id tables
    /// and for names already present.
    pub fn add_value_column(&mut self, name: impl Into<String>, sql_type: impl Into<String>) {
        let name = name.into();
        if self.role != TableRole::Entity || self.value_column(&name).is_some() {
            return;
        }
        self.value_columns.push(IdTableColumn::new(name, sql_type, true));
    }

    pub fn role(&self) -> TableRole {
        self.role
    }

    pub fn name(&self) -> &QualifiedTableName {
        &self.name
    }

    pub fn qualified_name(&self) -> String {
        self.name.render()
    }

    pub fn entity(&self) -> &Arc<EntityDescriptor> {
        &self.entity
    }

    pub fn session_uid_column(&self) -> Option<&IdTableColumn> {
        self.session_uid_column.as_ref()
    }

    /// Columns holding the entity identifier, in identifier order.
    pub fn key_columns(&self) -> &[IdTableColumn] {
        &self.key_columns
    }

    /// Attribute columns of an entity table, empty for id tables.
    pub fn value_columns(&self) -> &[IdTableColumn] {
        &self.value_columns
    }

    pub fn value_column(&self, name: &str) -> Option<&IdTableColumn> {
        self.value_columns.iter().find(|column| column.name == name)
    }

    /// All columns in DDL order: session uid first, then key columns, then
    /// staged attribute values.
    pub fn columns(&self) -> impl Iterator<Item = &IdTableColumn> {
        self.session_uid_column
            .iter()
            .chain(self.key_columns.iter())
            .chain(self.value_columns.iter())
    }

    /// Id tables never belong to the exported application schema.
    pub fn is_exportable(&self) -> bool {
        false
    }
}
