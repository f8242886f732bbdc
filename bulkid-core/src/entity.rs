//! Entity descriptors consumed from the mapping model.
//!
//! These describe the physical layout of an entity type: the root table
//! holding its primary key, the dependent tables (joined subclass tables,
//! secondary tables) keyed by that same identifier, the collection tables
//! whose rows reference it, and which column of which table stores each
//! attribute.

use crate::{BulkIdResult, ConfigError, MutationError, QualifiedTableName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// One primary key column of an entity's root table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyColumn {
    pub name: String,
    /// Column type as the dialect renders it in DDL (`BIGINT`, `varchar(255)`, ...)
    pub sql_type: String,
}

impl KeyColumn {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
        }
    }
}

/// A physical table spanned by an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTable {
    pub name: QualifiedTableName,
    /// Columns joining this table to the entity identifier, positionally
    /// matching [`EntityDescriptor::identifier`].
    pub key_columns: Vec<String>,
}

impl EntityTable {
    pub fn new<I, S>(name: QualifiedTableName, key_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name,
            key_columns: key_columns.into_iter().map(Into::into).collect(),
        }
    }
}

/// Maps an attribute onto the column that stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMapping {
    pub attribute: String,
    /// Unqualified name of the owning table
    pub table: String,
    pub column: String,
    #[serde(default = "default_attribute_type")]
    pub sql_type: String,
}

fn default_attribute_type() -> String {
    "varchar(255)".to_string()
}

impl AttributeMapping {
    pub fn new(
        attribute: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
        sql_type: impl Into<String>,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            table: table.into(),
            column: column.into(),
            sql_type: sql_type.into(),
        }
    }
}

/// Physical layout of one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    /// Primary key columns of the root table
    pub identifier: Vec<KeyColumn>,
    /// Root table first, then dependent tables in join order
    pub tables: Vec<EntityTable>,
    /// Element collection and many-to-many join tables, keyed by columns
    /// referencing the owner's identifier
    #[serde(default)]
    pub collection_tables: Vec<EntityTable>,
    #[serde(default)]
    pub attributes: Vec<AttributeMapping>,
}

impl EntityDescriptor {
    /// The table holding the entity identifier.
    pub fn root_table(&self) -> Option<&EntityTable> {
        self.tables.first()
    }

    /// Find a table of this entity by its unqualified name.
    pub fn table(&self, table_name: &str) -> Option<&EntityTable> {
        self.tables.iter().find(|t| t.name.table == table_name)
    }

    /// Resolve an attribute to its physical column.
    pub fn attribute(&self, attribute: &str) -> Option<&AttributeMapping> {
        self.attributes.iter().find(|a| a.attribute == attribute)
    }

    /// Check the layout is usable for id-table based mutations.
    ///
    /// Validates:
    /// - at least one table and one identifier column
    /// - every table joins on exactly as many columns as the identifier has
    /// - no two entity tables share an unqualified name
    /// - every attribute points at a table of this entity
    pub fn validate(&self) -> BulkIdResult<()> {
        let invalid = |reason: String| MutationError::InvalidDescriptor {
            entity: self.name.clone(),
            reason,
        };

        if self.identifier.is_empty() {
            return Err(invalid("identifier has no columns".to_string()).into());
        }
        if self.tables.is_empty() {
            return Err(invalid("entity spans no tables".to_string()).into());
        }
        let mut seen = HashSet::new();
        for table in &self.tables {
            if !seen.insert(table.name.table.as_str()) {
                return Err(invalid(format!(
                    "table {} appears more than once; attributes could not tell the tables apart",
                    table.name
                ))
                .into());
            }
        }
        for table in self.tables.iter().chain(&self.collection_tables) {
            if table.key_columns.len() != self.identifier.len() {
                return Err(invalid(format!(
                    "table {} joins on {} columns but the identifier has {}",
                    table.name,
                    table.key_columns.len(),
                    self.identifier.len()
                ))
                .into());
            }
        }
        for mapping in &self.attributes {
            if self.table(&mapping.table).is_none() {
                return Err(invalid(format!(
                    "attribute {} is mapped to unknown table {}",
                    mapping.attribute, mapping.table
                ))
                .into());
            }
        }
        Ok(())
    }
}

// ============================================================================
// METAMODEL
// ============================================================================

/// Every entity type known to a session factory, keyed by entity name.
#[derive(Debug, Clone, Default)]
pub struct Metamodel {
    entities: BTreeMap<String, Arc<EntityDescriptor>>,
}

impl Metamodel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type, replacing any previous descriptor of that name.
    pub fn add(&mut self, descriptor: EntityDescriptor) -> BulkIdResult<Arc<EntityDescriptor>> {
        descriptor.validate()?;
        let descriptor = Arc::new(descriptor);
        self.entities
            .insert(descriptor.name.clone(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    /// Load descriptors exported by the mapping model as a JSON array.
    pub fn from_json(json: &str) -> BulkIdResult<Self> {
        let descriptors: Vec<EntityDescriptor> =
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidMetamodel {
                reason: e.to_string(),
            })?;

        let mut metamodel = Self::new();
        for descriptor in descriptors {
            metamodel.add(descriptor)?;
        }
        Ok(metamodel)
    }

    pub fn entity(&self, name: &str) -> Option<&Arc<EntityDescriptor>> {
        self.entities.get(name)
    }

    /// Entity descriptors in name order.
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
