use std::fmt;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use crate::constants::PIECE_SIZE;
use crate::error::ContentError;
use crate::post::Post;

/// A batch of up to [`PIECE_SIZE`] posts with a running SHA3-256 over each
/// post's hash encoding.
///
/// A piece may be built without storing its posts, in which case it only
/// carries the hash.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Piece {
    pub id: u32,
    pub posts: Vec<Post>,
    #[serde(skip)]
    hasher: Sha3_256,
    #[serde(skip)]
    added: usize,
}

impl Piece {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn add(&mut self, post: Post, store: bool) -> Result<(), ContentError> {
        if self.added >= PIECE_SIZE {
            return Err(ContentError::PieceFull);
        }

        self.hasher.update(post.hash_bytes());
        self.added += 1;

        if store {
            self.posts.push(post);
        }

        Ok(())
    }

    /// Number of posts hashed so far.
    pub fn len(&self) -> usize {
        self.added
    }

    pub fn is_empty(&self) -> bool {
        self.added == 0
    }

    pub fn hash(&self) -> [u8; 32] {
        let digest = self.hasher.clone().finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }

    /// Recompute the hash from the stored posts. Used after a piece arrives
    /// over the wire, where the hasher state is not transmitted.
    pub fn rehash(&mut self) -> [u8; 32] {
        let mut hasher = Sha3_256::new();
        for post in &self.posts {
            hasher.update(post.hash_bytes());
        }
        self.hasher = hasher;
        self.added = self.posts.len();
        self.hash()
    }
}

impl fmt::Debug for Piece {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Piece")
            .field("id", &self.id)
            .field("posts", &self.posts.len())
            .field("added", &self.added)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: u64) -> Post {
        Post {
            id,
            info_hash: format!("hash{id}"),
            title: format!("post {id}"),
            upload_date: 1_600_000_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_hash_matches_rehash() {
        let mut piece = Piece::new(0);
        for i in 1..=5 {
            piece.add(post(i), true).unwrap();
        }
        let running = piece.hash();

        let bytes = rmp_serde::to_vec_named(&piece).unwrap();
        let mut received: Piece = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(received.posts.len(), 5);
        assert_eq!(received.rehash(), running);
    }

    #[test]
    fn test_unstored_piece_keeps_hash() {
        let mut stored = Piece::new(1);
        let mut bare = Piece::new(1);
        for i in 1..=3 {
            stored.add(post(i), true).unwrap();
            bare.add(post(i), false).unwrap();
        }
        assert!(bare.posts.is_empty());
        assert_eq!(bare.len(), 3);
        assert_eq!(stored.hash(), bare.hash());
    }

    #[test]
    fn test_piece_full() {
        let mut piece = Piece::new(0);
        for i in 0..PIECE_SIZE as u64 {
            piece.add(post(i), false).unwrap();
        }
        assert!(matches!(
            piece.add(post(0), false),
            Err(ContentError::PieceFull)
        ));
    }

    #[test]
    fn test_order_changes_hash() {
        let mut a = Piece::new(0);
        a.add(post(1), false).unwrap();
        a.add(post(2), false).unwrap();

        let mut b = Piece::new(0);
        b.add(post(2), false).unwrap();
        b.add(post(1), false).unwrap();

        assert_ne!(a.hash(), b.hash());
    }
}
