//! Standalone connections and isolated work.

use crate::{Connection, ConnectionAccess, IsolationDelegate, SqlExceptionTranslator, Work};
use bulkid_core::{BulkIdError, BulkIdResult, SqlError};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// A connection obtained through [`ConnectionAccess`], released on drop.
pub struct ConnectionGuard<'a> {
    access: &'a dyn ConnectionAccess,
    // Only `None` while being dropped
    connection: Option<Box<dyn Connection>>,
}

impl<'a> ConnectionGuard<'a> {
    pub fn new(access: &'a dyn ConnectionAccess, connection: Box<dyn Connection>) -> Self {
        Self {
            access,
            connection: Some(connection),
        }
    }
}

impl Deref for ConnectionGuard<'_> {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        match self.connection.as_deref() {
            Some(connection) => connection,
            None => unreachable!("connection is only taken on drop"),
        }
    }
}

impl DerefMut for ConnectionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.connection.as_deref_mut() {
            Some(connection) => connection,
            None => unreachable!("connection is only taken on drop"),
        }
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            let id = connection.id();
            if let Err(e) = self.access.release_connection(connection) {
                tracing::warn!(connection = id, error = %e, "Unable to release JDBC connection");
            }
        }
    }
}

/// Obtain a standalone connection, translating acquisition failures.
pub fn acquire_connection<'a>(
    access: &'a dyn ConnectionAccess,
    translator: &dyn SqlExceptionTranslator,
) -> BulkIdResult<ConnectionGuard<'a>> {
    match access.obtain_connection() {
        Ok(connection) => Ok(ConnectionGuard::new(access, connection)),
        Err(e) => Err(BulkIdError::Jdbc(
            translator.convert(e, "Unable to obtain JDBC connection"),
        )),
    }
}

/// Runs work on a fresh connection from a [`ConnectionAccess`].
#[derive(Clone)]
pub struct JdbcIsolationDelegate {
    access: Arc<dyn ConnectionAccess>,
}

impl JdbcIsolationDelegate {
    pub fn new(access: Arc<dyn ConnectionAccess>) -> Self {
        Self { access }
    }
}

impl std::fmt::Debug for JdbcIsolationDelegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JdbcIsolationDelegate").finish_non_exhaustive()
    }
}

impl IsolationDelegate for JdbcIsolationDelegate {
    fn delegate_work(&mut self, work: &mut Work<'_>, transacted: bool) -> Result<(), SqlError> {
        let access = self.access.as_ref();
        let mut connection = ConnectionGuard::new(access, access.obtain_connection()?);
        run_isolated(&mut *connection, work, transacted)
    }
}

fn run_isolated(
    connection: &mut dyn Connection,
    work: &mut Work<'_>,
    transacted: bool,
) -> Result<(), SqlError> {
    if !transacted {
        return work(&mut *connection);
    }

    connection.begin()?;
    match work(&mut *connection) {
        Ok(()) => connection.commit(),
        Err(e) => {
            if let Err(rollback) = connection.rollback() {
                tracing::warn!(
                    connection = connection.id(),
                    error = %rollback,
                    "Unable to roll back isolated transaction"
                );
            }
            Err(e)
        }
    }
}
