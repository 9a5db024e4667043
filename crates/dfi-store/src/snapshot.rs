//! Routing table snapshots for fast restarts.

use std::path::Path;

use dfi_shared::{Address, Entry};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::netdb::NetDb;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct TableSnapshot {
    version: u32,
    local: Address,
    entries: Vec<Entry>,
}

impl NetDb {
    /// Write every stored entry to `path`.
    pub fn save_table(&self, path: &Path) -> Result<usize> {
        let snapshot = TableSnapshot {
            version: SNAPSHOT_VERSION,
            local: self.local_address().clone(),
            entries: self.entries()?,
        };

        let data =
            bincode::serialize(&snapshot).map_err(|e| StoreError::Snapshot(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // written beside the target, then renamed into place
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, path)?;

        tracing::info!(path = %path.display(), count = snapshot.entries.len(), "saved routing table");
        Ok(snapshot.entries.len())
    }

    /// Insert every entry of the snapshot at `path` that still verifies.
    /// Returns how many were loaded.
    pub fn load_table(&self, path: &Path) -> Result<usize> {
        let data = std::fs::read(path)?;
        let snapshot: TableSnapshot =
            bincode::deserialize(&data).map_err(|e| StoreError::Snapshot(e.to_string()))?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::Snapshot(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        if &snapshot.local != self.local_address() {
            tracing::warn!(
                snapshot = %snapshot.local,
                local = %self.local_address(),
                "loading a routing table saved by another node"
            );
        }

        let mut loaded = 0;
        for entry in &snapshot.entries {
            if let Err(e) = entry.verify() {
                tracing::warn!(address = %entry.address, "skipping invalid snapshot entry: {e}");
                continue;
            }
            self.insert(entry)?;
            loaded += 1;
        }

        tracing::info!(path = %path.display(), count = loaded, "loaded routing table");
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::entry_named;

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.dat");
        let local = Address::random();

        let db = NetDb::open_in_memory(local.clone()).unwrap();
        let (_, seeder) = entry_named("seeder");
        let (_, mut owner) = entry_named("owner");
        owner.seeds.push(seeder.address.clone());
        db.insert(&seeder).unwrap();
        db.insert(&owner).unwrap();
        assert_eq!(db.save_table(&path).unwrap(), 2);

        let fresh = NetDb::open_in_memory(local).unwrap();
        assert_eq!(fresh.load_table(&path).unwrap(), 2);

        let restored = fresh.query(&owner.address).unwrap();
        assert_eq!(restored, owner);
        assert!(restored.verify().is_ok());
        assert_eq!(
            fresh.query_seeds(&owner.address).unwrap(),
            vec![seeder.address.clone()]
        );
    }

    #[test]
    fn load_skips_invalid_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.dat");

        let db = NetDb::open_in_memory(Address::random()).unwrap();
        let (_, good) = entry_named("good");
        let (_, mut bad) = entry_named("bad");
        bad.signature[3] ^= 0x55;
        db.insert(&good).unwrap();
        db.insert(&bad).unwrap();
        db.save_table(&path).unwrap();

        let fresh = NetDb::open_in_memory(Address::random()).unwrap();
        assert_eq!(fresh.load_table(&path).unwrap(), 1);
        assert!(fresh.query(&bad.address).is_err());
    }

    #[test]
    fn load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.dat");
        std::fs::write(&path, b"definitely not a snapshot").unwrap();

        let db = NetDb::open_in_memory(Address::random()).unwrap();
        assert!(db.load_table(&path).is_err());
        assert!(db.load_table(&dir.path().join("missing.dat")).is_err());
    }
}
