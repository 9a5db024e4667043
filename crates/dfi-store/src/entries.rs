use dfi_shared::constants::ADDRESS_SIZE;
use dfi_shared::{Address, Entry};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{not_found, Result};
use crate::netdb::NetDb;

const ENTRY_COLUMNS: &str = "id, address, name, description, public_address, port, public_key,
     signature, collection_hash, post_count, updated, seen, seeds, seeding";

impl NetDb {
    /// Upsert `entry` by address and return its row id.
    ///
    /// An existing row is only overwritten when the new entry's `updated` is
    /// not older. Seed edges and the search index are refreshed whenever the
    /// row is written.
    pub fn insert(&self, entry: &Entry) -> Result<i64> {
        let tx = self.conn().unchecked_transaction()?;
        let address = entry.address.encode().to_string();
        let seeds = pack_addresses(&entry.seeds);
        let seeding = pack_addresses(&entry.seeding);
        let post_count = entry.post_count as i64;
        let seed_count = entry.seeds.len() as i64;
        let seeding_count = entry.seeding.len() as i64;
        let updated = entry.updated as i64;
        let seen = entry.seen as i64;

        let values = params![
            address,
            entry.name,
            entry.desc,
            entry.public_address,
            entry.port,
            entry.public_key,
            entry.signature,
            entry.collection_hash,
            post_count,
            seed_count,
            seeding_count,
            updated,
            seen,
            seeds,
            seeding,
        ];

        tx.execute(
            "INSERT OR IGNORE INTO entry (address, name, description, public_address, port,
                 public_key, signature, collection_hash, post_count, seed_count, seeding_count,
                 updated, seen, seeds, seeding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            values,
        )?;

        let written = tx.execute(
            "UPDATE entry SET name = ?2, description = ?3, public_address = ?4, port = ?5,
                 public_key = ?6, signature = ?7, collection_hash = ?8, post_count = ?9,
                 seed_count = ?10, seeding_count = ?11, updated = ?12, seen = ?13,
                 seeds = ?14, seeding = ?15
             WHERE address = ?1 AND updated <= ?12",
            values,
        )?;

        let id: i64 = tx.query_row(
            "SELECT id FROM entry WHERE address = ?1",
            params![address],
            |row| row.get(0),
        )?;

        if written > 0 {
            link_seeds(&tx, id, entry)?;
            tx.execute("DELETE FROM entry_fts WHERE rowid = ?1", params![id])?;
            tx.execute(
                "INSERT INTO entry_fts (rowid, name, description) VALUES (?1, ?2, ?3)",
                params![id, entry.name, entry.desc],
            )?;
        } else {
            tracing::debug!(address = %entry.address, "kept newer stored entry");
        }

        tx.commit()?;
        Ok(id)
    }

    pub fn query(&self, address: &Address) -> Result<Entry> {
        self.conn()
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM entry WHERE address = ?1"),
                params![address.encode()],
                row_to_entry,
            )
            .map_err(not_found)
    }

    pub fn query_id(&self, address: &Address) -> Result<i64> {
        self.conn()
            .query_row(
                "SELECT id FROM entry WHERE address = ?1",
                params![address.encode()],
                |row| row.get(0),
            )
            .map_err(not_found)
    }

    pub(crate) fn query_by_id(&self, id: i64) -> Result<Entry> {
        self.conn()
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM entry WHERE id = ?1"),
                params![id],
                row_to_entry,
            )
            .map_err(not_found)
    }

    /// The `k` entries closest to `target` by XOR distance, nearest first.
    /// Equal distances are ordered by address bytes.
    pub fn find_closest(&self, target: &Address, k: usize) -> Result<Vec<Entry>> {
        let mut stmt = self.conn().prepare("SELECT id, address FROM entry")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut scored = Vec::new();
        for row in rows {
            let (id, text) = row?;
            match Address::decode(&text) {
                Ok(addr) => scored.push((target.xor(&addr), addr, id)),
                Err(e) => tracing::warn!(address = %text, "skipping undecodable row: {e}"),
            }
        }

        scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(_, _, id)| self.query_by_id(id))
            .collect()
    }

    /// The `count` most recently added entries, newest first.
    pub fn query_latest(&self, count: u32) -> Result<Vec<Entry>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entry ORDER BY id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![count], row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn entries(&self) -> Result<Vec<Entry>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {ENTRY_COLUMNS} FROM entry ORDER BY id ASC"))?;
        let rows = stmt.query_map([], row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Record when a peer was last online.
    pub fn set_seen(&self, address: &Address, seen: u64) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE entry SET seen = ?1 WHERE address = ?2",
            params![seen as i64, address.encode()],
        )?;
        Ok(affected > 0)
    }
}

/// Add edges for every listed seed and seeded address we already know.
fn link_seeds(conn: &Connection, id: i64, entry: &Entry) -> Result<()> {
    let mut lookup = conn.prepare_cached("SELECT id FROM entry WHERE address = ?1")?;
    let mut link = conn.prepare_cached("INSERT INTO seed (seed, for_id) VALUES (?1, ?2)")?;

    for seed in &entry.seeds {
        let seed_id: Option<i64> = lookup
            .query_row(params![seed.encode()], |row| row.get(0))
            .optional()?;
        if let Some(seed_id) = seed_id {
            link.execute(params![seed_id, id])?;
        }
    }

    for seeded in &entry.seeding {
        let for_id: Option<i64> = lookup
            .query_row(params![seeded.encode()], |row| row.get(0))
            .optional()?;
        if let Some(for_id) = for_id {
            link.execute(params![id, for_id])?;
        }
    }

    Ok(())
}

fn pack_addresses(addresses: &[Address]) -> Vec<u8> {
    let mut out = Vec::with_capacity(addresses.len() * ADDRESS_SIZE);
    for addr in addresses {
        out.extend_from_slice(addr.as_bytes());
    }
    out
}

fn unpack_addresses(column: usize, data: &[u8]) -> rusqlite::Result<Vec<Address>> {
    data.chunks(ADDRESS_SIZE)
        .map(|chunk| {
            Address::from_slice(chunk).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    column,
                    rusqlite::types::Type::Blob,
                    Box::new(e),
                )
            })
        })
        .collect()
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entry> {
    let address_str: String = row.get(1)?;
    let address = Address::decode(&address_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let post_count: i64 = row.get(9)?;
    let updated: i64 = row.get(10)?;
    let seen: i64 = row.get(11)?;
    let seeds: Vec<u8> = row.get(12)?;
    let seeding: Vec<u8> = row.get(13)?;

    Ok(Entry {
        address,
        name: row.get(2)?,
        desc: row.get(3)?,
        public_address: row.get(4)?,
        port: row.get(5)?,
        public_key: row.get(6)?,
        signature: row.get(7)?,
        collection_hash: row.get(8)?,
        post_count: post_count.max(0) as u64,
        updated: updated.max(0) as u64,
        seen: seen.max(0) as u64,
        seeds: unpack_addresses(12, &seeds)?,
        seeding: unpack_addresses(13, &seeding)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{entry_named, resign};

    fn db() -> NetDb {
        NetDb::open_in_memory(Address::random()).unwrap()
    }

    #[test]
    fn insert_and_query() {
        let db = db();
        let (_, entry) = entry_named("alice");

        let id = db.insert(&entry).unwrap();
        assert!(id > 0);
        assert_eq!(db.len().unwrap(), 1);

        let stored = db.query(&entry.address).unwrap();
        assert_eq!(stored, entry);
        assert!(stored.verify().is_ok());
        assert_eq!(db.query_id(&entry.address).unwrap(), id);
    }

    #[test]
    fn query_missing_is_not_found() {
        let db = db();
        assert!(matches!(
            db.query(&Address::random()),
            Err(crate::StoreError::NotFound)
        ));
    }

    #[test]
    fn older_entry_does_not_replace() {
        let db = db();
        let (id, mut entry) = entry_named("alice");
        entry.updated = 1_000;
        resign(&id, &mut entry);
        db.insert(&entry).unwrap();

        let mut older = entry.clone();
        older.name = "old alice".into();
        older.updated = 500;
        resign(&id, &mut older);
        db.insert(&older).unwrap();
        assert_eq!(db.query(&entry.address).unwrap().name, "alice");

        let mut newer = entry.clone();
        newer.name = "new alice".into();
        newer.updated = 2_000;
        resign(&id, &mut newer);
        let row = db.insert(&newer).unwrap();
        assert_eq!(db.query(&entry.address).unwrap(), newer);
        assert_eq!(row, db.query_id(&entry.address).unwrap());
        assert_eq!(db.len().unwrap(), 1);
    }

    #[test]
    fn find_closest_sorted_by_distance() {
        let db = db();
        for i in 0..30 {
            let (_, entry) = entry_named(&format!("peer{i}"));
            db.insert(&entry).unwrap();
        }

        let target = Address::random();
        let closest = db.find_closest(&target, 20).unwrap();
        assert_eq!(closest.len(), 20);

        for pair in closest.windows(2) {
            assert!(target.xor(&pair[0].address) <= target.xor(&pair[1].address));
        }

        // nothing left out is nearer than the furthest returned
        let furthest = target.xor(&closest[19].address);
        for entry in db.entries().unwrap() {
            if !closest.contains(&entry) {
                assert!(target.xor(&entry.address) >= furthest);
            }
        }
    }

    #[test]
    fn find_closest_returns_fewer_when_small() {
        let db = db();
        for i in 0..3 {
            db.insert(&entry_named(&format!("peer{i}")).1).unwrap();
        }
        assert_eq!(db.find_closest(&Address::random(), 20).unwrap().len(), 3);

        let empty = NetDb::open_in_memory(Address::random()).unwrap();
        assert!(empty.find_closest(&Address::random(), 20).unwrap().is_empty());
    }

    #[test]
    fn latest_is_newest_first() {
        let db = db();
        for i in 0..25 {
            db.insert(&entry_named(&format!("peer{i}")).1).unwrap();
        }

        let latest = db.query_latest(20).unwrap();
        assert_eq!(latest.len(), 20);
        assert_eq!(latest[0].name, "peer24");
        assert_eq!(latest[19].name, "peer5");
    }

    #[test]
    fn seen_updates_in_place() {
        let db = db();
        let (_, entry) = entry_named("alice");
        db.insert(&entry).unwrap();

        assert!(db.set_seen(&entry.address, 1234).unwrap());
        assert_eq!(db.query(&entry.address).unwrap().seen, 1234);
        assert!(!db.set_seen(&Address::random(), 1).unwrap());
    }
}
