//! DDL text for id tables.

use crate::IdTableSupport;
use bulkid_core::IdTable;

/// Renders CREATE and DROP statements for id tables.
#[derive(Debug, Clone, Copy)]
pub struct IdTableExporter<'a> {
    support: &'a dyn IdTableSupport,
}

impl<'a> IdTableExporter<'a> {
    pub fn new(support: &'a dyn IdTableSupport) -> Self {
        Self { support }
    }

    /// `<create-command> <name> (<col> <type> not null, ...) <options>`
    ///
    /// The separator before the options is always written, so a table
    /// without options ends in `") "`. Staged attribute columns of entity
    /// tables are written without `not null`.
    pub fn sql_create_strings(&self, table: &IdTable) -> Vec<String> {
        let columns = table
            .columns()
            .map(|column| {
                if column.is_nullable() {
                    format!("{} {}", column.name(), column.sql_type())
                } else {
                    format!("{} {} not null", column.name(), column.sql_type())
                }
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!(
            "{} {} ({}) ",
            self.support.create_id_table_command(),
            table.qualified_name(),
            columns
        );
        if let Some(options) = self.support.create_id_table_options() {
            sql.push_str(options);
        }
        vec![sql]
    }

    pub fn sql_drop_strings(&self, table: &IdTable) -> Vec<String> {
        vec![format!(
            "{} {}",
            self.support.drop_id_table_command(),
            table.qualified_name()
        )]
    }

    pub fn truncate_id_table_command(&self) -> &'a str {
        self.support.truncate_id_table_command()
    }
}
