//! v001 -- Routing table schema.
//!
//! `entry` holds one row per known peer, `seed` the seeder/seeded edges
//! between entries, and `entry_fts` a full-text index over names and
//! descriptions keyed by `entry.id`.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Entries
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS entry (
    id              INTEGER PRIMARY KEY NOT NULL,
    address         TEXT UNIQUE NOT NULL,      -- base58check address
    name            TEXT NOT NULL,
    description     TEXT NOT NULL DEFAULT '',
    public_address  TEXT NOT NULL,
    port            INTEGER NOT NULL,
    public_key      BLOB NOT NULL,
    signature       BLOB NOT NULL,
    collection_hash BLOB NOT NULL,
    post_count      INTEGER NOT NULL DEFAULT 0,
    seed_count      INTEGER NOT NULL DEFAULT 0,
    seeding_count   INTEGER NOT NULL DEFAULT 0,
    updated         INTEGER NOT NULL DEFAULT 0,
    seen            INTEGER NOT NULL DEFAULT 0,
    seeds           BLOB NOT NULL,             -- raw 20-byte addresses, concatenated
    seeding         BLOB NOT NULL
);

-- ----------------------------------------------------------------
-- Seed edges: `seed` claims to seed content for `for_id`
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS seed (
    id     INTEGER PRIMARY KEY NOT NULL,
    seed   INTEGER NOT NULL,
    for_id INTEGER NOT NULL,

    UNIQUE (seed, for_id) ON CONFLICT REPLACE,
    FOREIGN KEY (seed) REFERENCES entry(id),
    FOREIGN KEY (for_id) REFERENCES entry(id)
);

CREATE INDEX IF NOT EXISTS idx_seed_for ON seed(for_id);

-- ----------------------------------------------------------------
-- Full-text search over entry names and descriptions
-- ----------------------------------------------------------------
CREATE VIRTUAL TABLE IF NOT EXISTS entry_fts USING fts5(name, description);
"#;

/// Apply the initial routing table migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
