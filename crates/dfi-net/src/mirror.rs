//! Copying another node's catalogue and becoming one of its seeds.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError};

use dfi_shared::{Address, Datastore, Entry, MessageCollection};
use dfi_store::PostDb;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{NetError, Result};
use crate::local_peer::{LocalPeer, SharedPeer};

/// A catalogue we hold on behalf of another node.
pub struct Mirror {
    pub owner: Entry,
    pub datastore: Arc<PostDb>,
    /// The owner's signed hash list, served as is.
    pub hash_list: MessageCollection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MirrorProgress {
    pub done: usize,
    pub total: usize,
}

impl LocalPeer {
    /// Download the collection of `address`, verify every piece against its
    /// signed hash list and store it locally. On success the local entry
    /// lists the address under `seeding` and the owner is asked to add us as
    /// a seed. Returns the number of posts copied.
    pub async fn mirror(&self, address: &Address) -> Result<usize> {
        if *address == self.address() {
            return Err(NetError::SelfConnect);
        }

        let owner = self.resolve(address).await?;
        let mut sources = vec![owner.clone()];
        for seed in owner.seeds.iter().filter(|s| **s != self.address()) {
            match self.resolve(seed).await {
                Ok(entry) => sources.push(entry),
                Err(e) => debug!(seed = %seed.short(), "seed unavailable: {e}"),
            }
        }

        let mut last = NetError::NotFound;
        for source in &sources {
            let shared = match self.peer_for(source).await {
                Ok(shared) => shared,
                Err(e) => {
                    debug!(peer = %source.address.short(), "mirror source unreachable: {e}");
                    last = e;
                    continue;
                }
            };
            let result = self.download(&shared, &owner).await;
            match self.settle(&source.address, result).await {
                Ok(count) => {
                    info!(owner = %owner.address.short(), via = %source.address.short(), posts = count, "mirrored");
                    self.publish_seeding(&owner, source).await;
                    return Ok(count);
                }
                Err(e) => {
                    warn!(owner = %owner.address.short(), via = %source.address.short(), "mirror failed: {e}");
                    last = e;
                }
            }
        }
        Err(last)
    }

    async fn download(&self, shared: &SharedPeer, owner: &Entry) -> Result<usize> {
        let mut peer = shared.lock().await;

        let hash_list = peer.request_hash_list(&owner.address).await?;
        hash_list.verify(&owner.collection_hash)?;
        hash_list.verify_signature(&owner.public_key)?;
        let collection = hash_list.collection()?;

        let total = collection.piece_count();
        let datastore = Arc::new(self.open_mirror_store(&owner.address)?);
        self.set_progress(&owner.address, 0, total);

        let mut count = 0;
        for index in 0..total {
            let id = index as u32;
            let mut piece = peer.request_piece(&owner.address, id).await?;
            let hash = piece.rehash();
            if collection.piece_hash(index) != Some(&hash[..]) {
                return Err(NetError::PieceMismatch(id));
            }

            datastore.insert_posts(&piece.posts)?;
            count += piece.posts.len();
            self.set_progress(&owner.address, index + 1, total);
        }
        drop(peer);

        self.mirrors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                owner.address.clone(),
                Mirror {
                    owner: owner.clone(),
                    datastore,
                    hash_list,
                },
            );
        Ok(count)
    }

    /// List `owner` under our seeding, then tell the owner (and the source we
    /// copied from, when different) so they can link us as a seed.
    async fn publish_seeding(&self, owner: &Entry, source: &Entry) {
        let entry = self.update_entry(|entry| {
            if !entry.is_seeding(&owner.address) {
                entry.seeding.push(owner.address.clone());
            }
        });

        let mut targets = vec![owner];
        if source.address != owner.address {
            targets.push(source);
        }

        for target in targets {
            // the target must see the new seeding list before the back-link
            let result = match self.announce_to(target, &entry).await {
                Ok(()) => self.add_peer_to(target, &owner.address).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(peer = %target.address.short(), "seed registration failed: {e}");
            }
        }
    }

    fn open_mirror_store(&self, address: &Address) -> Result<PostDb> {
        let db = match &self.config().mirror_dir {
            Some(dir) => PostDb::open_at(&mirror_path(dir, address))?,
            None => PostDb::open_in_memory()?,
        };
        Ok(db)
    }

    fn set_progress(&self, address: &Address, done: usize, total: usize) {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.clone(), MirrorProgress { done, total });
    }

    pub fn mirror_progress(&self, address: &Address) -> Option<MirrorProgress> {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .copied()
    }

    /// The datastore serving `address`: our own, or a mirror's.
    pub fn datastore_for(&self, address: &Address) -> Option<Arc<dyn Datastore>> {
        if *address == self.address() {
            return Some(Arc::clone(self.datastore()));
        }
        self.mirrors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .map(|m| Arc::clone(&m.datastore) as Arc<dyn Datastore>)
    }

    /// The stored signed hash list of a mirrored address.
    pub fn mirror_hash_list(&self, address: &Address) -> Option<MessageCollection> {
        self.mirrors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .map(|m| m.hash_list.clone())
    }

    pub fn mirrored(&self) -> Vec<Address> {
        self.mirrors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

fn mirror_path(dir: &std::path::Path, address: &Address) -> PathBuf {
    dir.join(format!("{}.db", address.encode()))
}
