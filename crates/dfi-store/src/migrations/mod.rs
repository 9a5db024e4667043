//! Database migration runner.
//!
//! The routing table and the post catalogue live in separate database files,
//! each with its own ordered migration list. Each migration is guarded by the
//! `user_version` pragma so it runs exactly once.

pub mod v001_netdb;
pub mod v001_posts;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

struct Migration {
    version: u32,
    name: &'static str,
    up: fn(&Connection) -> std::result::Result<(), rusqlite::Error>,
}

const NETDB_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "v001_netdb",
    up: v001_netdb::up,
}];

const POST_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "v001_posts",
    up: v001_posts::up,
}];

pub fn run_netdb_migrations(conn: &Connection) -> Result<()> {
    run(conn, "netdb", NETDB_MIGRATIONS)
}

pub fn run_post_migrations(conn: &Connection) -> Result<()> {
    run(conn, "posts", POST_MIGRATIONS)
}

fn run(conn: &Connection, schema: &str, migrations: &[Migration]) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    let target = migrations.last().map(|m| m.version).unwrap_or(0);

    tracing::info!(
        schema,
        current_version = current,
        target_version = target,
        "checking database migrations"
    );

    for migration in migrations.iter().filter(|m| m.version > current) {
        tracing::info!(schema, "applying migration {}", migration.name);
        (migration.up)(conn).map_err(|e| StoreError::Migration(e.to_string()))?;
        conn.pragma_update(None, "user_version", migration.version)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_netdb_migrations(&conn).unwrap();
        run_netdb_migrations(&conn).unwrap();

        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name IN ('entry', 'seed', 'entry_fts')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }
}
