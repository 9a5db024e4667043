use dfi_shared::constants::SEARCH_PAGE_SIZE;
use dfi_shared::Address;
use rusqlite::params;

use crate::error::Result;
use crate::netdb::NetDb;

impl NetDb {
    /// Full-text search over entry names and descriptions, best match first.
    /// Either term may be empty; both empty yields no results.
    pub fn search_peer(&self, name: &str, desc: &str, page: u32) -> Result<Vec<Address>> {
        let mut clauses = Vec::new();
        if let Some(q) = fts_phrase(name) {
            clauses.push(format!("name : {q}"));
        }
        if let Some(q) = fts_phrase(desc) {
            clauses.push(format!("description : {q}"));
        }
        if clauses.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn().prepare(
            "SELECT entry.address FROM entry_fts
                 JOIN entry ON entry.id = entry_fts.rowid
             WHERE entry_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(
            params![
                clauses.join(" OR "),
                SEARCH_PAGE_SIZE,
                page.saturating_mul(SEARCH_PAGE_SIZE)
            ],
            |row| row.get::<_, String>(0),
        )?;

        let mut addresses = Vec::new();
        for row in rows {
            addresses.push(Address::decode(&row?)?);
        }
        Ok(addresses)
    }
}

/// Quote user input as FTS5 phrases so it is never parsed as query syntax.
pub(crate) fn fts_phrase(input: &str) -> Option<String> {
    let terms: Vec<String> = input
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(format!("({})", terms.join(" ")))
    }
}
