//! Schema versioning for the shared document database.
//!
//! The applied version is kept in `PRAGMA user_version`. Several processes
//! may open a fresh file at once, so the check and the upgrade happen inside
//! one `IMMEDIATE` transaction.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::info;

use crate::error::{Error, Result};

use super::schema::STEPS;

/// The schema version this build writes.
pub const CURRENT_VERSION: usize = STEPS.len();

/// Bring the schema up to [`CURRENT_VERSION`].
///
/// # Errors
///
/// Returns an error if a step fails or the file was written by a newer build.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let applied = schema_version(&tx)?;
    if applied > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {applied} is newer than supported version {CURRENT_VERSION}"
            ),
        });
    }

    for (index, step) in STEPS.iter().enumerate().skip(applied) {
        let version = index + 1;
        tx.execute_batch(step)?;
        tx.pragma_update(None, "user_version", stored_version(version)?)?;
        info!(version, "applied schema step");
    }

    tx.commit()?;
    Ok(())
}

/// Pragma values bind as `i64`.
fn stored_version(version: usize) -> Result<i64> {
    i64::try_from(version).map_err(|_| Error::DatabaseMigration {
        message: format!("schema version {version} out of range"),
    })
}

fn schema_version(conn: &Connection) -> Result<usize> {
    let raw: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    usize::try_from(raw).map_err(|_| Error::DatabaseMigration {
        message: format!("invalid schema version: {raw}"),
    })
}
