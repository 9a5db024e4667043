//! The routing table as the network layer sees it.
//!
//! [`Dht`] wraps a [`NetDb`] behind a mutex so sessions, jobs and handlers
//! can share it, and adds the verify-then-upsert rule every received entry
//! goes through.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use dfi_shared::constants::LATEST_ENTRY_COUNT;
use dfi_shared::{Address, Entry};
use dfi_store::{NetDb, StoreError};
use tracing::{debug, info};

use crate::error::{NetError, Result};

/// What [`Dht::update`] did with an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Inserted,
    Updated,
    Unchanged,
    /// Older than the stored copy, dropped.
    Stale,
}

impl UpdateOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, UpdateOutcome::Inserted | UpdateOutcome::Updated)
    }
}

pub struct Dht {
    db: Mutex<NetDb>,
    local: Address,
}

impl Dht {
    pub fn open(path: &Path, local: Address) -> Result<Self> {
        let dht = Self::from_db(NetDb::open_at(path, local.clone())?, local);
        dht.warm_up()?;
        Ok(dht)
    }

    pub fn in_memory(local: Address) -> Result<Self> {
        Ok(Self::from_db(NetDb::open_in_memory(local.clone())?, local))
    }

    fn from_db(db: NetDb, local: Address) -> Self {
        Self {
            db: Mutex::new(db),
            local,
        }
    }

    /// Re-insert the most recently learned entries so their seed edges are
    /// rebuilt against whatever else is stored.
    fn warm_up(&self) -> Result<()> {
        let db = self.lock()?;
        let latest = db.query_latest(LATEST_ENTRY_COUNT)?;
        for entry in &latest {
            db.insert(entry)?;
        }
        info!(entries = latest.len(), "routing table loaded");
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, NetDb>> {
        self.db.lock().map_err(|_| NetError::Poisoned)
    }

    pub fn local_address(&self) -> &Address {
        &self.local
    }

    /// Store an entry as is. Callers are expected to have verified it.
    pub fn insert(&self, entry: &Entry) -> Result<()> {
        self.lock()?.insert(entry)?;
        Ok(())
    }

    pub fn query(&self, address: &Address) -> Result<Entry> {
        match self.lock()?.query(address) {
            Ok(entry) => Ok(entry),
            Err(StoreError::NotFound) => Err(NetError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    pub fn find_closest(&self, target: &Address, k: usize) -> Result<Vec<Entry>> {
        Ok(self.lock()?.find_closest(target, k)?)
    }

    pub fn query_latest(&self, count: u32) -> Result<Vec<Entry>> {
        Ok(self.lock()?.query_latest(count)?)
    }

    /// Full-text search over names and descriptions.
    pub fn search_entries(&self, name: &str, desc: &str, page: u32) -> Result<Vec<Entry>> {
        let db = self.lock()?;
        let addresses = db.search_peer(name, desc, page)?;
        let mut entries = Vec::with_capacity(addresses.len());
        for address in addresses {
            entries.push(db.query(&address)?);
        }
        Ok(entries)
    }

    pub fn query_seeds(&self, address: &Address) -> Result<Vec<Address>> {
        Ok(self.lock()?.query_seeds(address)?)
    }

    pub fn query_seeding(&self, address: &Address) -> Result<Vec<Address>> {
        Ok(self.lock()?.query_seeding(address)?)
    }

    pub fn set_seen(&self, address: &Address) -> Result<()> {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.lock()?.set_seen(address, now)?;
        Ok(())
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.lock()?.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn save_table(&self, path: &Path) -> Result<usize> {
        Ok(self.lock()?.save_table(path)?)
    }

    pub fn load_table(&self, path: &Path) -> Result<usize> {
        Ok(self.lock()?.load_table(path)?)
    }

    /// Verify `entry` and upsert it.
    ///
    /// Seeds already known for the address are kept, so a peer relaying an
    /// older view of the seed list cannot shrink it. An entry older than the
    /// stored one is reported as [`UpdateOutcome::Stale`] and not written.
    pub fn update(&self, entry: &Entry) -> Result<UpdateOutcome> {
        entry.verify()?;
        if entry.address == self.local {
            return Ok(UpdateOutcome::Unchanged);
        }

        let db = self.lock()?;
        let existing = match db.query(&entry.address) {
            Ok(existing) => existing,
            Err(StoreError::NotFound) => {
                db.insert(entry)?;
                debug!(peer = %entry.address.short(), "learned entry");
                return Ok(UpdateOutcome::Inserted);
            }
            Err(e) => return Err(e.into()),
        };

        if entry.updated < existing.updated {
            return Ok(UpdateOutcome::Stale);
        }

        let mut merged = entry.clone();
        merged.merge_seeds(&existing.seeds);
        merged.seen = merged.seen.max(existing.seen);
        if merged == existing {
            return Ok(UpdateOutcome::Unchanged);
        }

        db.insert(&merged)?;
        Ok(UpdateOutcome::Updated)
    }
}
