//! Scoped atomic units over a borrowed connection.
//!
//! # Invariants
//! - Every exit path of an atomic unit either commits or rolls back.
//! - Nested units become savepoints of the enclosing transaction.

use log::warn;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::sync::atomic::{AtomicU64, Ordering};

static SAVEPOINT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Runs `body` as one atomic unit on `conn`.
///
/// - Outside a transaction an `IMMEDIATE` transaction is opened and committed
///   when `body` returns `Ok`.
/// - Inside a transaction `body` runs under a savepoint that is released on
///   `Ok`.
/// - `Err` (or unwinding) rolls the unit back.
pub fn atomic<T, E, F>(conn: &Connection, body: F) -> Result<T, E>
where
    E: From<rusqlite::Error>,
    F: FnOnce(&Connection) -> Result<T, E>,
{
    if conn.is_autocommit() {
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        let value = body(&tx)?;
        tx.commit()?;
        return Ok(value);
    }

    let savepoint = SavepointGuard::begin(conn)?;
    let value = body(conn)?;
    savepoint.release()?;
    Ok(value)
}

struct SavepointGuard<'conn> {
    conn: &'conn Connection,
    name: String,
    released: bool,
}

impl<'conn> SavepointGuard<'conn> {
    fn begin(conn: &'conn Connection) -> rusqlite::Result<Self> {
        let name = format!("opboard_sp_{}", SAVEPOINT_SEQ.fetch_add(1, Ordering::Relaxed));
        conn.execute_batch(&format!("SAVEPOINT {name};"))?;
        Ok(Self {
            conn,
            name,
            released: false,
        })
    }

    fn release(mut self) -> rusqlite::Result<()> {
        self.conn
            .execute_batch(&format!("RELEASE {};", self.name))?;
        self.released = true;
        Ok(())
    }
}

impl Drop for SavepointGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let sql = format!("ROLLBACK TO {0}; RELEASE {0};", self.name);
        if let Err(err) = self.conn.execute_batch(&sql) {
            warn!(
                "event=savepoint_rollback module=db status=error savepoint={} error={}",
                self.name, err
            );
        }
    }
}
