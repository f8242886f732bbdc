//! Session partitioning of shared id tables.

use crate::IdTableSupport;
use bulkid_core::{IdTable, SESSION_UID_COLUMN};
use bulkid_jdbc::ExecutionContext;

/// Whether id-table rows carry the uid of the session that wrote them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionUidSupport {
    /// The table itself is private to the session.
    #[default]
    None,
    /// Rows are tagged with `hib_sess_id` and every access filters on it.
    Standard,
}

impl SessionUidSupport {
    pub fn needs_session_uid_column(&self) -> bool {
        matches!(self, SessionUidSupport::Standard)
    }

    pub fn column_name(&self) -> &'static str {
        SESSION_UID_COLUMN
    }

    /// Add the session uid column to `table`. No-op without partitioning.
    pub fn add_column(&self, table: &mut IdTable, support: &dyn IdTableSupport) {
        if self.needs_session_uid_column() {
            table.set_session_uid_column(SESSION_UID_COLUMN, support.session_uid_type());
        }
    }

    /// The uid to bind for the session executing in `ctx`.
    pub fn extract_uid(&self, ctx: &dyn ExecutionContext) -> Option<String> {
        match self {
            SessionUidSupport::None => None,
            SessionUidSupport::Standard => Some(ctx.session_identifier().to_string()),
        }
    }

    /// ` where hib_sess_id = ?` when partitioned, otherwise empty.
    pub fn restriction(&self) -> String {
        if self.needs_session_uid_column() {
            format!(" where {} = ?", SESSION_UID_COLUMN)
        } else {
            String::new()
        }
    }
}
