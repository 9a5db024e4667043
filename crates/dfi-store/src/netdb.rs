//! Routing table connection management.
//!
//! [`NetDb`] owns a [`rusqlite::Connection`] and guarantees that migrations are
//! run before any other operation. The typed helpers are split across
//! `entries`, `seeds`, `search` and `snapshot`.

use std::path::{Path, PathBuf};

use dfi_shared::Address;
use rusqlite::Connection;

use crate::error::Result;
use crate::migrations;

pub struct NetDb {
    conn: Connection,
    local: Address,
}

impl NetDb {
    /// Open (or create) the routing table at `path` for the node `local`.
    pub fn open_at(path: &Path, local: Address) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "opening routing table");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn, local)
    }

    /// A throwaway table, for tests and tooling.
    pub fn open_in_memory(local: Address) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, local)
    }

    fn init(conn: Connection, local: Address) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_netdb_migrations(&conn)?;
        Ok(Self { conn, local })
    }

    /// Address of the node this table belongs to.
    pub fn local_address(&self) -> &Address {
        &self.local
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }

    /// Number of stored entries.
    pub fn len(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entry", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
