//! Collections: the ordered list of piece hashes covering a peer's whole
//! catalogue, and the root hash over that list which the peer signs into its
//! entry.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use crate::constants::HASH_SIZE;
use crate::datastore::Datastore;
use crate::error::{ContentError, IdentityError};
use crate::identity::{verify_signature, Identity};
use crate::piece::Piece;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    hash_list: Vec<u8>,
    root: [u8; HASH_SIZE],
}

impl Default for Collection {
    fn default() -> Self {
        Self::new()
    }
}

impl Collection {
    pub fn new() -> Self {
        Self {
            hash_list: Vec::new(),
            root: root_hash(&[]),
        }
    }

    /// Hash every piece of `datastore`. Posts themselves are not kept.
    pub fn create(datastore: &dyn Datastore, piece_size: usize) -> Result<Self, ContentError> {
        let post_count = datastore.post_count()? as usize;
        let piece_count = post_count.div_ceil(piece_size.max(1));

        let mut collection = Self::new();
        for i in 0..piece_count {
            let piece = datastore.query_piece(i as u32, false)?;
            collection.add(&piece)?;
        }

        Ok(collection)
    }

    /// Build from a raw hash list, rejecting lengths that are not a multiple
    /// of the hash size.
    pub fn from_hash_list(hash_list: Vec<u8>) -> Result<Self, ContentError> {
        if hash_list.len() % HASH_SIZE != 0 {
            return Err(ContentError::InvalidHashList(hash_list.len()));
        }

        let root = root_hash(&hash_list);
        Ok(Self { hash_list, root })
    }

    pub fn load(path: &Path) -> Result<Self, ContentError> {
        let data = std::fs::read(path)?;
        Self::from_hash_list(data)
    }

    /// Write the raw hash list.
    pub fn save(&self, path: &Path) -> Result<(), ContentError> {
        std::fs::write(path, &self.hash_list)?;
        Ok(())
    }

    /// Set the hash for `piece.id`. Pieces must arrive in order; re-adding an
    /// already held id replaces its hash.
    pub fn add(&mut self, piece: &Piece) -> Result<(), ContentError> {
        let held = self.piece_count() as u32;
        let hash = piece.hash();

        match piece.id {
            id if id == held => self.hash_list.extend_from_slice(&hash),
            id if id < held => {
                let start = id as usize * HASH_SIZE;
                self.hash_list[start..start + HASH_SIZE].copy_from_slice(&hash);
            }
            got => return Err(ContentError::OutOfOrder { got, held }),
        }

        self.root = root_hash(&self.hash_list);
        Ok(())
    }

    /// SHA3-256 over the hash list.
    pub fn hash(&self) -> [u8; HASH_SIZE] {
        self.root
    }

    pub fn hash_list(&self) -> &[u8] {
        &self.hash_list
    }

    pub fn piece_count(&self) -> usize {
        self.hash_list.len() / HASH_SIZE
    }

    pub fn piece_hash(&self, id: usize) -> Option<&[u8]> {
        self.hash_list.get(id * HASH_SIZE..(id + 1) * HASH_SIZE)
    }

    /// The signed form served in answer to a hash list request.
    pub fn to_message(&self, identity: &Identity) -> MessageCollection {
        MessageCollection {
            hash: self.root.to_vec(),
            hash_list: self.hash_list.clone(),
            size: self.piece_count() as u32,
            signature: identity.sign(&self.hash_list).to_bytes().to_vec(),
        }
    }
}

fn root_hash(hash_list: &[u8]) -> [u8; HASH_SIZE] {
    let mut hasher = Sha3_256::new();
    for chunk in hash_list.chunks_exact(HASH_SIZE) {
        hasher.update(chunk);
    }
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// A hash list as sent over the wire, signed by the collection's owner.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCollection {
    #[serde(with = "serde_bytes")]
    pub hash: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub hash_list: Vec<u8>,
    pub size: u32,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

impl MessageCollection {
    /// Check that the first `size` hashes of the list hash to `root`.
    pub fn verify(&self, root: &[u8]) -> Result<(), ContentError> {
        let needed = self.size as usize * HASH_SIZE;
        if self.hash_list.len() < needed || self.hash_list.len() % HASH_SIZE != 0 {
            return Err(ContentError::InvalidHashList(self.hash_list.len()));
        }

        if root_hash(&self.hash_list[..needed]) != root {
            return Err(ContentError::RootMismatch);
        }

        Ok(())
    }

    pub fn verify_signature(&self, public_key: &[u8]) -> Result<(), IdentityError> {
        verify_signature(public_key, &self.hash_list, &self.signature)
    }

    pub fn collection(&self) -> Result<Collection, ContentError> {
        let needed = (self.size as usize * HASH_SIZE).min(self.hash_list.len());
        Collection::from_hash_list(self.hash_list[..needed].to_vec())
    }
}
