// Peer-to-peer layer: framed TCP sessions, the authenticated handshake, the
// Kademlia-style routing table, request handlers, mirroring and the
// background exploration jobs.

pub mod config;
pub mod connection;
pub mod dht;
pub mod error;
pub mod framing;
pub mod handlers;
pub mod handshake;
pub mod jobs;
pub mod local_peer;
pub mod mirror;
pub mod netmap;
pub mod peer;
pub mod rate_limit;
pub mod server;

pub use config::{ExploreConfig, PeerConfig, SeedManagerConfig};
pub use connection::{Connection, SessionState};
pub use dht::{Dht, UpdateOutcome};
pub use error::{NetError, Result};
pub use jobs::{spawn_explore, spawn_seed_manager, ExploreHandle, NetworkAccess, SeedManagerHandle};
pub use local_peer::LocalPeer;
pub use mirror::MirrorProgress;
pub use netmap::{create_net_map, NetMap};
pub use peer::Peer;
pub use server::{bind, serve};
