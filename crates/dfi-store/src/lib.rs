//! # dfi-store
//!
//! SQLite storage for a dfi node, backed by rusqlite.
//!
//! [`NetDb`] is the routing table: one row per known peer entry, the
//! seed/seeding edges between them, a full-text index over names and
//! descriptions, and bincode snapshots for fast restarts. [`PostDb`] is the
//! local post catalogue and implements [`dfi_shared::Datastore`].

pub mod entries;
pub mod migrations;
pub mod netdb;
pub mod posts;
pub mod search;
pub mod seeds;
pub mod snapshot;

mod error;

pub use error::{Result, StoreError};
pub use netdb::NetDb;
pub use posts::PostDb;

#[cfg(test)]
pub(crate) mod test_util {
    use dfi_shared::{Entry, Identity};

    pub fn entry_with(name: &str, desc: &str) -> (Identity, Entry) {
        let id = Identity::generate();
        let mut entry = Entry {
            name: name.into(),
            desc: desc.into(),
            public_address: "127.0.0.1".into(),
            port: 5050,
            collection_hash: vec![0u8; 32],
            ..Default::default()
        };
        entry.sign(&id);
        (id, entry)
    }

    pub fn entry_named(name: &str) -> (Identity, Entry) {
        entry_with(name, "")
    }

    /// Re-sign without touching `updated`.
    pub fn resign(id: &Identity, entry: &mut Entry) {
        entry.signature = id.sign(&entry.signing_bytes()).to_bytes().to_vec();
    }
}
