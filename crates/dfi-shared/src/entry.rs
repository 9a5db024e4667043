//! Signed peer descriptors stored in the DHT.

use std::collections::HashSet;

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::constants::{
    MAX_ENTRY_DESC_LENGTH, MAX_ENTRY_NAME_LENGTH, MAX_ENTRY_PUBLIC_ADDRESS_LENGTH,
    MAX_ENTRY_SEEDS, PUBKEY_SIZE, SIGNATURE_SIZE,
};
use crate::error::EntryError;
use crate::identity::Identity;

/// Everything needed to reach a peer given just its address, plus a summary
/// of the content it serves.
///
/// The owner signs [`Entry::signing_bytes`]. `seeds` is left out
/// of the signature so other peers can grow the swarm while the owner is
/// offline; `seen` is local bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub address: Address,
    pub name: String,
    pub desc: String,
    pub public_address: String,
    #[serde(with = "serde_bytes")]
    pub public_key: Vec<u8>,
    pub post_count: u64,
    /// Unix seconds of the owner's last change.
    pub updated: u64,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub collection_hash: Vec<u8>,
    pub port: u16,
    pub seeds: Vec<Address>,
    pub seeding: Vec<Address>,
    pub seen: u64,
}

impl Entry {
    /// Canonical byte string covered by the signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            64 + self.name.len() + self.desc.len() + self.public_address.len(),
        );

        out.extend_from_slice(self.address.encode().as_bytes());
        out.extend_from_slice(self.name.as_bytes());
        out.extend_from_slice(self.desc.as_bytes());
        out.extend_from_slice(self.public_address.as_bytes());
        out.extend_from_slice(&self.public_key);
        out.extend_from_slice(self.port.to_string().as_bytes());
        out.extend_from_slice(self.post_count.to_string().as_bytes());
        out.extend_from_slice(self.updated.to_string().as_bytes());
        out.extend_from_slice(&self.collection_hash);

        for addr in &self.seeding {
            out.extend_from_slice(addr.as_bytes());
        }

        out
    }

    /// Set the key and address from `identity`, stamp `updated` and sign.
    pub fn sign(&mut self, identity: &Identity) {
        self.public_key = identity.public_key_bytes().to_vec();
        self.address = identity.address();
        self.updated = self.updated.max(chrono::Utc::now().timestamp().max(0) as u64);
        self.signature = identity.sign(&self.signing_bytes()).to_bytes().to_vec();
    }

    /// Check size bounds, the signature, and that the address belongs to the key.
    pub fn verify(&self) -> Result<(), EntryError> {
        if self.name.len() > MAX_ENTRY_NAME_LENGTH {
            return Err(EntryError::NameTooLong(self.name.len()));
        }

        if self.desc.len() > MAX_ENTRY_DESC_LENGTH {
            return Err(EntryError::DescTooLong(self.desc.len()));
        }

        if self.seeds.len() > MAX_ENTRY_SEEDS {
            return Err(EntryError::TooManySeeds(self.seeds.len()));
        }

        if self.seeding.len() > MAX_ENTRY_SEEDS {
            return Err(EntryError::TooManySeeding(self.seeding.len()));
        }

        if self.public_key.len() < PUBKEY_SIZE {
            return Err(EntryError::PublicKeyTooSmall(self.public_key.len()));
        }

        if self.signature.len() < SIGNATURE_SIZE {
            return Err(EntryError::SignatureTooSmall(self.signature.len()));
        }

        let key_bytes: [u8; PUBKEY_SIZE] = self
            .public_key
            .as_slice()
            .try_into()
            .map_err(|_| EntryError::InvalidSignature)?;
        let verifying_key =
            VerifyingKey::from_bytes(&key_bytes).map_err(|_| EntryError::InvalidSignature)?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| EntryError::InvalidSignature)?;

        verifying_key
            .verify(&self.signing_bytes(), &signature)
            .map_err(|_| EntryError::InvalidSignature)?;

        if self.public_address.is_empty() {
            return Err(EntryError::MissingPublicAddress);
        }

        if self.public_address.len() >= MAX_ENTRY_PUBLIC_ADDRESS_LENGTH {
            return Err(EntryError::PublicAddressTooLong(self.public_address.len()));
        }

        match Address::generate(&self.public_key) {
            Ok(derived) if derived == self.address => Ok(()),
            _ => Err(EntryError::AddressMismatch),
        }
    }

    /// `host:port` to dial.
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.public_address, self.port)
    }

    pub fn is_seeding(&self, address: &Address) -> bool {
        self.seeding.iter().any(|a| a == address)
    }

    /// Append seeds not already present, up to the seed cap. Returns how many
    /// were added.
    pub fn merge_seeds<'a, I>(&mut self, seeds: I) -> usize
    where
        I: IntoIterator<Item = &'a Address>,
    {
        let room = MAX_ENTRY_SEEDS.saturating_sub(self.seeds.len());
        let mut fresh = Vec::new();
        {
            let mut known: HashSet<&Address> = self.seeds.iter().collect();
            for seed in seeds {
                if fresh.len() >= room {
                    break;
                }
                if known.insert(seed) {
                    fresh.push(seed.clone());
                }
            }
        }

        let added = fresh.len();
        self.seeds.extend(fresh);
        added
    }

    /// MessagePack form used on the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(data)
    }

    /// JSON form for human-facing consumers.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn signed_entry(identity: &Identity) -> Entry {
        let mut entry = Entry {
            name: "alice".into(),
            desc: "a test peer".into(),
            public_address: "127.0.0.1".into(),
            port: 5050,
            post_count: 12,
            collection_hash: vec![9u8; 32],
            ..Default::default()
        };
        entry.sign(identity);
        entry
    }

    #[test]
    fn test_valid_entry_verifies() {
        let id = Identity::generate();
        let entry = signed_entry(&id);
        assert_eq!(entry.address, id.address());
        assert!(entry.verify().is_ok());
    }

    #[test]
    fn test_tampered_signature_fails() {
        let entry = signed_entry(&Identity::generate());

        let mut bad = entry.clone();
        bad.signature[0] ^= 0xff;
        assert_eq!(bad.verify(), Err(EntryError::InvalidSignature));

        let mut short = entry;
        short.signature.truncate(10);
        assert_eq!(short.verify(), Err(EntryError::SignatureTooSmall(10)));
    }

    #[test]
    fn test_tampered_payload_fails() {
        let entry = signed_entry(&Identity::generate());

        let mut renamed = entry.clone();
        renamed.name = "mallory".into();
        assert_eq!(renamed.verify(), Err(EntryError::InvalidSignature));

        let mut moved = entry.clone();
        moved.port = 6060;
        assert_eq!(moved.verify(), Err(EntryError::InvalidSignature));

        let mut seeding = entry;
        seeding.seeding.push(Address::random());
        assert_eq!(seeding.verify(), Err(EntryError::InvalidSignature));
    }

    #[test]
    fn test_seeds_not_signed() {
        let mut entry = signed_entry(&Identity::generate());
        entry.seeds.push(Address::random());
        entry.seeds.push(Address::random());
        assert!(entry.verify().is_ok());
    }

    #[test]
    fn test_field_caps() {
        let id = Identity::generate();

        let mut long_name = signed_entry(&id);
        long_name.name = "n".repeat(33);
        long_name.sign(&id);
        assert_eq!(long_name.verify(), Err(EntryError::NameTooLong(33)));

        let mut long_desc = signed_entry(&id);
        long_desc.desc = "d".repeat(161);
        long_desc.sign(&id);
        assert_eq!(long_desc.verify(), Err(EntryError::DescTooLong(161)));

        let mut crowded = signed_entry(&id);
        crowded.seeds = vec![Address::default(); MAX_ENTRY_SEEDS + 1];
        assert_eq!(
            crowded.verify(),
            Err(EntryError::TooManySeeds(MAX_ENTRY_SEEDS + 1))
        );

        let mut no_host = signed_entry(&id);
        no_host.public_address.clear();
        no_host.sign(&id);
        assert_eq!(no_host.verify(), Err(EntryError::MissingPublicAddress));

        let mut long_host = signed_entry(&id);
        long_host.public_address = "h".repeat(253);
        long_host.sign(&id);
        assert_eq!(long_host.verify(), Err(EntryError::PublicAddressTooLong(253)));

        let mut max_host = signed_entry(&id);
        max_host.public_address = "h".repeat(252);
        max_host.sign(&id);
        assert!(max_host.verify().is_ok());
    }

    #[test]
    fn test_foreign_address_rejected() {
        let id = Identity::generate();
        let mut entry = signed_entry(&id);
        // claim someone else's address, then sign it with our own key
        entry.address = Identity::generate().address();
        entry.signature = id.sign(&entry.signing_bytes()).to_bytes().to_vec();
        assert_eq!(entry.verify(), Err(EntryError::AddressMismatch));
    }

    #[test]
    fn test_merge_seeds_dedupes() {
        let mut entry = Entry::default();
        let a = Address::random();
        let b = Address::random();
        assert_eq!(entry.merge_seeds([&a, &b, &a]), 2);
        assert_eq!(entry.merge_seeds([&b]), 0);
        assert_eq!(entry.seeds, vec![a, b]);
    }

    #[test]
    fn test_merge_seeds_stops_at_cap() {
        let numbered = |i: usize| {
            let mut raw = [0u8; 20];
            raw[..8].copy_from_slice(&(i as u64).to_be_bytes());
            Address::from_raw(raw)
        };

        let mut entry = Entry::default();
        let first: Vec<Address> = (0..MAX_ENTRY_SEEDS - 1).map(numbered).collect();
        assert_eq!(entry.merge_seeds(&first), MAX_ENTRY_SEEDS - 1);

        let more: Vec<Address> = (MAX_ENTRY_SEEDS - 3..MAX_ENTRY_SEEDS + 5).map(numbered).collect();
        assert_eq!(entry.merge_seeds(&more), 1);
        assert_eq!(entry.seeds.len(), MAX_ENTRY_SEEDS);
        assert_eq!(entry.seeds.last(), Some(&numbered(MAX_ENTRY_SEEDS - 1)));
    }

    #[test]
    fn test_wire_encoding() {
        let entry = signed_entry(&Identity::generate());
        let bytes = entry.to_bytes().unwrap();
        let decoded = Entry::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, entry);
        assert!(decoded.verify().is_ok());

        let json = entry.to_json().unwrap();
        assert!(json.contains(entry.address.encode()));
        assert!(json.contains("publicAddress"));
    }
}
