//! Units of work over the storage connection.
//!
//! Unlike `rusqlite::Transaction` this wrapper borrows the connection
//! immutably, so repository code can run statements through it while the
//! statement cache and the blob store are borrowed alongside. Nesting is not
//! supported: SQLite rejects a `BEGIN` inside an open transaction.

use std::ops::Deref;

use rusqlite::Connection;

use crate::core::error::{Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    /// Deferred `BEGIN`.
    Default,
    /// Read-only unit holding a shared lock across several SELECTs.
    Selection,
    Immediate,
    /// Required for every multi-statement write.
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
    Ended,
}

/// An open transaction; dropping it while active rolls back, or ends it for
/// selection transactions.
#[derive(Debug)]
pub struct Transaction<'c> {
    conn: &'c Connection,
    kind: TransactionKind,
    state: TransactionState,
}

impl<'c> Transaction<'c> {
    pub fn begin(conn: &'c Connection, kind: TransactionKind) -> Result<Self> {
        let sql = match kind {
            TransactionKind::Default | TransactionKind::Selection => "BEGIN",
            TransactionKind::Immediate => "BEGIN IMMEDIATE",
            TransactionKind::Exclusive => "BEGIN EXCLUSIVE",
        };
        conn.execute_batch(sql).context("can't begin transaction")?;

        let tx = Self {
            conn,
            kind,
            state: TransactionState::Active,
        };
        if kind == TransactionKind::Selection {
            // A deferred BEGIN takes no lock until the first read.
            tx.conn
                .query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
                .context("can't acquire shared lock for selection")?;
        }
        Ok(tx)
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn commit(mut self) -> Result<()> {
        self.conn
            .execute_batch("COMMIT")
            .context("can't commit transaction")?;
        self.state = TransactionState::Committed;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.conn
            .execute_batch("ROLLBACK")
            .context("can't rollback transaction")?;
        self.state = TransactionState::RolledBack;
        Ok(())
    }

    /// Ends the transaction without a decision; meant for selections.
    pub fn end(mut self) -> Result<()> {
        self.conn
            .execute_batch("END")
            .context("can't end transaction")?;
        self.state = TransactionState::Ended;
        Ok(())
    }
}

impl Deref for Transaction<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state != TransactionState::Active {
            return;
        }
        let (sql, action) = if self.kind == TransactionKind::Selection {
            ("END", "end")
        } else {
            ("ROLLBACK", "roll back")
        };
        if self.kind != TransactionKind::Selection {
            log::debug!("Rolling back uncommitted {:?} transaction", self.kind);
        }
        if let Err(e) = self.conn.execute_batch(sql) {
            log::error!("Failed to {action} transaction on drop: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER)").unwrap();
        conn
    }

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_commit_persists() {
        let conn = conn();
        let tx = Transaction::begin(&conn, TransactionKind::Exclusive).unwrap();
        tx.execute("INSERT INTO t VALUES (1)", []).unwrap();
        tx.commit().unwrap();
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn test_drop_rolls_back() {
        let conn = conn();
        {
            let tx = Transaction::begin(&conn, TransactionKind::Immediate).unwrap();
            tx.execute("INSERT INTO t VALUES (1)", []).unwrap();
        }
        assert_eq!(count(&conn), 0);
        assert!(conn.is_autocommit());
    }

    #[test]
    fn test_selection_ends_on_drop() {
        let conn = conn();
        {
            let tx = Transaction::begin(&conn, TransactionKind::Selection).unwrap();
            assert_eq!(tx.state(), TransactionState::Active);
            assert_eq!(count(&tx), 0);
        }
        assert!(conn.is_autocommit());
    }

    #[test]
    fn test_nested_begin_fails() {
        let conn = conn();
        let _outer = Transaction::begin(&conn, TransactionKind::Default).unwrap();
        assert!(Transaction::begin(&conn, TransactionKind::Default).is_err());
    }
}
