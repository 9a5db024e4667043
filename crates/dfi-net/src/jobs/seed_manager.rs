//! Keeps the seed list of one tracked entry complete.
//!
//! Each pass asks every known seed of the tracked address for its copy of
//! the entry, and adopts any seed it lists that we lack, but only after that
//! seed's own entry confirms it is seeding the tracked address.

use std::collections::HashSet;
use std::sync::Arc;

use dfi_shared::Address;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::NetworkAccess;
use crate::config::SeedManagerConfig;
use crate::error::Result;

pub struct SeedManagerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SeedManagerHandle {
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Start tracking `address`. The first pass runs immediately.
pub fn spawn_seed_manager<N>(net: Arc<N>, address: Address, config: SeedManagerConfig) -> SeedManagerHandle
where
    N: NetworkAccess,
{
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.frequency);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match find_seeds(net.as_ref(), &address).await {
                        Ok(0) => debug!(tracked = %address.short(), "no new seeds"),
                        Ok(added) => info!(tracked = %address.short(), added, "seeds added"),
                        Err(e) => warn!(tracked = %address.short(), "seed search failed: {e}"),
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        debug!(tracked = %address.short(), "seed manager stopped");
    });

    SeedManagerHandle {
        shutdown: shutdown_tx,
        task,
    }
}

/// One reconciliation pass. Returns how many seeds were added.
pub async fn find_seeds<N>(net: &N, tracked: &Address) -> Result<usize>
where
    N: NetworkAccess + ?Sized,
{
    let mut entry = net.lookup(tracked)?;
    let me = net.local_address();

    let mut known: HashSet<Address> = entry.seeds.iter().cloned().collect();
    let mut added = Vec::new();

    for seed in entry.seeds.clone() {
        if seed == me {
            continue;
        }

        let peer = match net.resolve(&seed).await {
            Ok(peer) => peer,
            Err(e) => {
                debug!(seed = %seed.short(), "seed unreachable: {e}");
                continue;
            }
        };
        let remote = match net.query(&peer, tracked).await {
            Ok(remote) if remote.address == *tracked => remote,
            Ok(_) => continue,
            Err(e) => {
                debug!(seed = %seed.short(), "seed query failed: {e}");
                continue;
            }
        };

        for candidate in slice_diff(&known, &remote.seeds) {
            let confirmed = match net.resolve(&candidate).await {
                Ok(candidate_entry) => candidate_entry.is_seeding(tracked),
                Err(e) => {
                    debug!(candidate = %candidate.short(), "candidate unresolved: {e}");
                    false
                }
            };
            if confirmed && known.insert(candidate.clone()) {
                added.push(candidate);
            }
        }
    }

    if !added.is_empty() {
        entry.merge_seeds(&added);
        net.store(&entry)?;
    }
    Ok(added.len())
}

/// Items of `remote` missing from `local`, in `remote` order.
fn slice_diff(local: &HashSet<Address>, remote: &[Address]) -> Vec<Address> {
    let mut out = Vec::new();
    for item in remote {
        if !local.contains(item) && !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}
