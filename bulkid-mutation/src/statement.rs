//! Translated bulk statements handed to a strategy.
//!
//! The predicate translator resolves the HQL/JPQL restriction into SQL over
//! the entity's tables. What reaches this crate is already SQL: the FROM
//! clause, the select-list expressions yielding the root primary key, and
//! an optional WHERE fragment with its bind parameters. An insert's source
//! query has the same shape, its id expressions yielding the identifiers of
//! the new rows.

use bulkid_core::{EntityDescriptor, SqlFragment};
use serde::{Deserialize, Serialize};

/// Selection of the ids matched by a bulk statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdRestriction {
    /// Expressions yielding the root primary key, in identifier order
    pub id_select_expressions: Vec<String>,
    /// FROM clause body, without the `from` keyword
    pub from_clause: String,
    #[serde(default)]
    pub where_clause: Option<SqlFragment>,
}

impl IdRestriction {
    pub fn new<I, S>(from_clause: impl Into<String>, id_select_expressions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id_select_expressions: id_select_expressions.into_iter().map(Into::into).collect(),
            from_clause: from_clause.into(),
            where_clause: None,
        }
    }

    /// Restriction over the entity's root table under `alias`.
    ///
    /// Returns `None` for a descriptor without tables.
    pub fn for_root(entity: &EntityDescriptor, alias: &str) -> Option<Self> {
        let root = entity.root_table()?;
        Some(Self::new(
            format!("{} {}", root.name, alias),
            root.key_columns
                .iter()
                .map(|column| format!("{}.{}", alias, column)),
        ))
    }

    pub fn with_where(mut self, where_clause: SqlFragment) -> Self {
        self.where_clause = Some(where_clause);
        self
    }
}

/// `DELETE FROM <entity> WHERE ...`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkDelete {
    pub entity: String,
    pub restriction: IdRestriction,
}

impl BulkDelete {
    pub fn new(entity: impl Into<String>, restriction: IdRestriction) -> Self {
        Self {
            entity: entity.into(),
            restriction,
        }
    }
}

/// One `attribute = value` of an update's SET clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub attribute: String,
    pub value: SqlFragment,
}

impl Assignment {
    pub fn new(attribute: impl Into<String>, value: SqlFragment) -> Self {
        Self {
            attribute: attribute.into(),
            value,
        }
    }
}

/// `UPDATE <entity> SET ... WHERE ...`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkUpdate {
    pub entity: String,
    pub assignments: Vec<Assignment>,
    pub restriction: IdRestriction,
}

impl BulkUpdate {
    pub fn new(entity: impl Into<String>, restriction: IdRestriction) -> Self {
        Self {
            entity: entity.into(),
            assignments: Vec::new(),
            restriction,
        }
    }

    pub fn set(mut self, attribute: impl Into<String>, value: SqlFragment) -> Self {
        self.assignments.push(Assignment::new(attribute, value));
        self
    }
}

/// `INSERT INTO <entity> (<attributes>) SELECT ...`
///
/// Each value is an expression over the source query, positionally
/// matching the attribute it is assigned to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkInsert {
    pub entity: String,
    pub values: Vec<Assignment>,
    pub source: IdRestriction,
}

impl BulkInsert {
    pub fn new(entity: impl Into<String>, source: IdRestriction) -> Self {
        Self {
            entity: entity.into(),
            values: Vec::new(),
            source,
        }
    }

    pub fn value(mut self, attribute: impl Into<String>, value: SqlFragment) -> Self {
        self.values.push(Assignment::new(attribute, value));
        self
    }
}

/// A bulk statement of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BulkStatement {
    Update(BulkUpdate),
    Delete(BulkDelete),
    Insert(BulkInsert),
}

impl BulkStatement {
    pub fn entity(&self) -> &str {
        match self {
            BulkStatement::Update(update) => &update.entity,
            BulkStatement::Delete(delete) => &delete.entity,
            BulkStatement::Insert(insert) => &insert.entity,
        }
    }

    /// The query selecting matched ids, or an insert's source query.
    pub fn restriction(&self) -> &IdRestriction {
        match self {
            BulkStatement::Update(update) => &update.restriction,
            BulkStatement::Delete(delete) => &delete.restriction,
            BulkStatement::Insert(insert) => &insert.source,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BulkStatement::Update(_) => "update",
            BulkStatement::Delete(_) => "delete",
            BulkStatement::Insert(_) => "insert",
        }
    }

    /// Whether the statement stages rows in an entity table rather than
    /// ids in an id table.
    pub fn is_insert(&self) -> bool {
        matches!(self, BulkStatement::Insert(_))
    }
}

impl From<BulkUpdate> for BulkStatement {
    fn from(update: BulkUpdate) -> Self {
        BulkStatement::Update(update)
    }
}

impl From<BulkDelete> for BulkStatement {
    fn from(delete: BulkDelete) -> Self {
        BulkStatement::Delete(delete)
    }
}

impl From<BulkInsert> for BulkStatement {
    fn from(insert: BulkInsert) -> Self {
        BulkStatement::Insert(insert)
    }
}
