//! The post catalogue served to other peers.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use dfi_shared::constants::{PIECE_SIZE, SEARCH_PAGE_SIZE};
use dfi_shared::{Datastore, DatastoreError, Piece, Post};
use rusqlite::{params, Connection};

use crate::error::{not_found, Result, StoreError};
use crate::migrations;
use crate::search::fts_phrase;

const POST_COLUMNS: &str =
    "id, info_hash, title, size, file_count, seeders, leechers, upload_date, tags, meta";

/// Popular posts are ranked among this many of the most recent.
const POPULAR_WINDOW: u32 = 10_000;

/// Suggestions are drawn from this many of the most recent posts.
const SUGGEST_WINDOW: u32 = 100_000;

const SUGGEST_LIMIT: u32 = 10;

/// rusqlite-backed [`Datastore`]. The connection sits behind a mutex so one
/// handle can be shared between sessions.
pub struct PostDb {
    conn: Mutex<Connection>,
}

impl PostDb {
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "opening post database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        migrations::run_post_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_post_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Validate and store `post`. A non-zero id is kept so mirrored
    /// catalogues reproduce the owner's piece layout; zero lets SQLite assign
    /// one. Returns the id, or `None` when a post with the same info hash
    /// already exists.
    pub fn insert_post(&self, post: &Post) -> Result<Option<i64>> {
        post.validate()?;
        let conn = self.conn()?;
        insert_post(&conn, post)
    }

    /// Insert many posts in one transaction, skipping any that fail
    /// validation. Returns how many were new.
    pub fn insert_posts(&self, posts: &[Post]) -> Result<usize> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let mut inserted = 0;
        for post in posts {
            if let Err(e) = post.validate() {
                tracing::warn!(id = post.id, "skipping invalid post: {e}");
                continue;
            }
            if insert_post(&tx, post)?.is_some() {
                inserted += 1;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn query_post(&self, id: i64) -> Result<Post> {
        self.conn()?
            .query_row(
                &format!("SELECT {POST_COLUMNS} FROM post WHERE id = ?1"),
                params![id],
                row_to_post,
            )
            .map_err(not_found)
    }

    pub fn update_seeders(&self, id: i64, seeders: u32) -> Result<bool> {
        let affected = self.conn()?.execute(
            "UPDATE post SET seeders = ?1 WHERE id = ?2",
            params![seeders, id],
        )?;
        Ok(affected > 0)
    }

    pub fn update_leechers(&self, id: i64, leechers: u32) -> Result<bool> {
        let affected = self.conn()?.execute(
            "UPDATE post SET leechers = ?1 WHERE id = ?2",
            params![leechers, id],
        )?;
        Ok(affected > 0)
    }

    fn piece(&self, id: u32, include_posts: bool) -> Result<Piece> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {POST_COLUMNS} FROM post WHERE id > ?1 ORDER BY id ASC LIMIT ?2"
        ))?;
        let start = id as i64 * PIECE_SIZE as i64;
        let rows = stmt.query_map(params![start, PIECE_SIZE as i64], row_to_post)?;

        let mut piece = Piece::new(id);
        for row in rows {
            piece.add(row?, include_posts)?;
        }
        Ok(piece)
    }

    fn page(&self, sql: &str, query: Option<&str>, limit: u32, page: u32) -> Result<Vec<Post>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let offset = page.saturating_mul(limit);

        let rows = match query {
            Some(q) => stmt.query_map(params![q, limit, offset], row_to_post)?,
            None => stmt.query_map(params![limit, offset], row_to_post)?,
        };

        let mut posts = Vec::new();
        for row in rows {
            posts.push(row?);
        }
        Ok(posts)
    }
}

fn insert_post(conn: &Connection, post: &Post) -> Result<Option<i64>> {
    let id = (post.id != 0).then_some(post.id as i64);
    let affected = conn.execute(
        "INSERT OR IGNORE INTO post (id, info_hash, title, size, file_count, seeders,
             leechers, upload_date, tags, meta)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            id,
            post.info_hash,
            post.title,
            post.size as i64,
            post.file_count,
            post.seeders,
            post.leechers,
            post.upload_date,
            post.tags,
            post.meta,
        ],
    )?;

    if affected == 0 {
        return Ok(None);
    }

    let rowid = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO post_fts (rowid, title) VALUES (?1, ?2)",
        params![rowid, post.title],
    )?;
    Ok(Some(rowid))
}

fn row_to_post(row: &rusqlite::Row<'_>) -> rusqlite::Result<Post> {
    let id: i64 = row.get(0)?;
    let size: i64 = row.get(3)?;

    Ok(Post {
        id: id.max(0) as u64,
        info_hash: row.get(1)?,
        title: row.get(2)?,
        size: size.max(0) as u64,
        file_count: row.get(4)?,
        seeders: row.get(5)?,
        leechers: row.get(6)?,
        upload_date: row.get(7)?,
        tags: row.get(8)?,
        meta: row.get(9)?,
    })
}

/// Escape `%`, `_` and `\` for a LIKE pattern.
fn like_prefix(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

impl Datastore for PostDb {
    fn query_piece(&self, id: u32, include_posts: bool) -> std::result::Result<Piece, DatastoreError> {
        Ok(self.piece(id, include_posts)?)
    }

    fn post_count(&self) -> std::result::Result<u64, DatastoreError> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COALESCE(MAX(id), 0) FROM post", [], |row| row.get(0))
            .map_err(StoreError::from)?;
        Ok(count.max(0) as u64)
    }

    fn search(&self, query: &str, page: u32) -> std::result::Result<Vec<Post>, DatastoreError> {
        let Some(phrase) = fts_phrase(query) else {
            return Ok(Vec::new());
        };

        Ok(self.page(
            "SELECT post.id, post.info_hash, post.title, post.size, post.file_count,
                    post.seeders, post.leechers, post.upload_date, post.tags, post.meta
             FROM post_fts
                 JOIN post ON post.id = post_fts.rowid
             WHERE post_fts MATCH ?1
             ORDER BY (post.seeders * 1.1) + post.leechers DESC
             LIMIT ?2 OFFSET ?3",
            Some(phrase.as_str()),
            SEARCH_PAGE_SIZE,
            page,
        )?)
    }

    fn query_recent(&self, page: u32) -> std::result::Result<Vec<Post>, DatastoreError> {
        Ok(self.page(
            &format!(
                "SELECT {POST_COLUMNS} FROM post ORDER BY upload_date DESC, id DESC LIMIT ?1 OFFSET ?2"
            ),
            None,
            SEARCH_PAGE_SIZE,
            page,
        )?)
    }

    fn query_popular(&self, page: u32) -> std::result::Result<Vec<Post>, DatastoreError> {
        Ok(self.page(
            &format!(
                "SELECT {POST_COLUMNS} FROM (
                     SELECT * FROM post ORDER BY upload_date DESC LIMIT {POPULAR_WINDOW}
                 )
                 ORDER BY seeders + leechers DESC, id ASC
                 LIMIT ?1 OFFSET ?2"
            ),
            None,
            SEARCH_PAGE_SIZE,
            page,
        )?)
    }

    fn suggest(&self, prefix: &str) -> std::result::Result<Vec<String>, DatastoreError> {
        if prefix.trim().is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT title FROM (
                     SELECT * FROM post ORDER BY upload_date DESC LIMIT {SUGGEST_WINDOW}
                 )
                 WHERE title LIKE ?1 ESCAPE '\\'
                 ORDER BY (seeders * 1.1) + leechers DESC
                 LIMIT ?2"
            ))
            .map_err(StoreError::from)?;
        let rows = stmt
            .query_map(params![like_prefix(prefix), SUGGEST_LIMIT], |row| {
                row.get::<_, String>(0)
            })
            .map_err(StoreError::from)?;

        let mut titles = Vec::new();
        for row in rows {
            titles.push(row.map_err(StoreError::from)?);
        }
        Ok(titles)
    }
}
