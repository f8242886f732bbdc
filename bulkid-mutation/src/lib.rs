//! bulkid Mutation - Id-Table Based Bulk Statements
//!
//! Executes HQL/JPQL bulk `UPDATE`, `DELETE` and `INSERT` statements against
//! entities that span several physical tables (joined inheritance, secondary
//! tables). The ids of every matching entity are first saved into an id
//! table, then each physical table is updated or deleted by joining against
//! those ids, and finally the id table is dropped or cleaned. Deletes clear
//! the entity's collection tables before its own tables. Inserts stage the
//! new rows in an entity table and copy them into every physical table.
//!
//! Three strategies differ in the kind of id table they use:
//!
//! | Kind | Before use | After use | Session uid column |
//! |---|---|---|---|
//! | local temporary | create | drop | no |
//! | global temporary | - | clean | no |
//! | persistent | - | clean | yes |

pub mod exporter;
pub mod handler;
pub mod helper;
pub mod session_uid;
pub mod statement;
pub mod strategy;
pub mod support;

pub use exporter::IdTableExporter;
pub use handler::{ExecutionListener, HandlerConfig, MutationHandler, TableMutation};
pub use helper::{DdlFailure, DdlOutcome, IdTableHelper};
pub use session_uid::SessionUidSupport;
pub use statement::{
    Assignment, BulkDelete, BulkInsert, BulkStatement, BulkUpdate, IdRestriction,
};
pub use strategy::{IdTableRegistry, TableBasedStrategy};
pub use support::{IdTableDialect, IdTableSupport, StandardIdTableSupport};
