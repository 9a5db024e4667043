//! Background maintenance: exploring the network for new peers and keeping a
//! tracked entry's seed list complete.
//!
//! Both jobs only talk to the network through [`NetworkAccess`], which
//! [`crate::LocalPeer`] implements and tests replace with in-memory mocks.

pub mod explore;
pub mod seed_manager;

use async_trait::async_trait;
use dfi_shared::{Address, Entry};
use tokio::sync::mpsc;

use crate::error::Result;

pub use explore::{spawn_explore, ExploreHandle};
pub use seed_manager::{spawn_seed_manager, SeedManagerHandle};

#[async_trait]
pub trait NetworkAccess: Send + Sync + 'static {
    fn local_address(&self) -> Address;

    /// Ask `peer` for the entries it holds closest to `target`.
    async fn find_closest(&self, peer: &Entry, target: &Address) -> Result<Vec<Entry>>;

    /// Ask `peer` for its copy of the entry at `target`.
    async fn query(&self, peer: &Entry, target: &Address) -> Result<Entry>;

    /// Find the entry for `address`, asking the network when it is not
    /// known locally.
    async fn resolve(&self, address: &Address) -> Result<Entry>;

    /// The locally held entry for `address`, without network traffic.
    fn lookup(&self, address: &Address) -> Result<Entry>;

    /// Persist an updated entry.
    fn store(&self, entry: &Entry) -> Result<()>;

    /// Push exploration candidates into `tx` without blocking. Returns how
    /// many were queued.
    fn seed(&self, tx: &mpsc::Sender<Entry>) -> usize;
}
