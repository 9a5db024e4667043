//! v001 -- Post catalogue schema.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS post (
    id          INTEGER PRIMARY KEY NOT NULL,
    info_hash   TEXT UNIQUE NOT NULL,
    title       TEXT NOT NULL,
    size        INTEGER NOT NULL,
    file_count  INTEGER NOT NULL,
    seeders     INTEGER NOT NULL,
    leechers    INTEGER NOT NULL,
    upload_date INTEGER NOT NULL,
    tags        TEXT NOT NULL DEFAULT '',
    meta        TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_post_upload_date ON post(upload_date);

CREATE VIRTUAL TABLE IF NOT EXISTS post_fts USING fts5(title);
"#;

/// Apply the initial post catalogue migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
