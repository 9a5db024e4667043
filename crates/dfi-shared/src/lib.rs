//! # dfi-shared
//!
//! Types shared by every dfi crate: node addresses, signed peer entries,
//! the post/piece/collection content model, the wire envelope and its
//! payloads, and the `Datastore` capability the network layer reads posts
//! through.

pub mod address;
pub mod capabilities;
pub mod collection;
pub mod constants;
pub mod datastore;
pub mod entry;
pub mod error;
pub mod identity;
pub mod piece;
pub mod post;
pub mod protocol;

pub use address::Address;
pub use collection::{Collection, MessageCollection};
pub use datastore::Datastore;
pub use entry::Entry;
pub use error::*;
pub use identity::Identity;
pub use piece::Piece;
pub use post::Post;
pub use protocol::{Message, Tag};
