//! Runtime parameters for the network layer, passed in by the daemon.

use std::path::PathBuf;
use std::time::Duration;

use dfi_shared::capabilities::Capabilities;
use dfi_shared::constants::{
    DEFAULT_PORT, EXPLORE_BUFFER_SIZE, EXPLORE_FREQUENCY_SECS, SEED_SEARCH_FREQUENCY_SECS,
};

#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Published in the local entry.
    pub name: String,
    pub desc: String,
    /// Host other peers dial to reach us.
    pub public_address: String,
    pub port: u16,

    pub capabilities: Capabilities,

    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Deadline for a single request/response exchange.
    pub request_timeout: Duration,
    /// How long a query or announce may wait for a rate limit token.
    pub rate_limit_wait: Duration,

    /// Tokens per second and burst size for `dht.query`/`dht.findclosest`.
    pub query_rate: f64,
    pub query_burst: f64,
    /// Tokens per second and burst size for `dht.announce`.
    pub announce_rate: f64,
    pub announce_burst: f64,

    /// Where mirrored catalogues are stored. In memory when unset.
    pub mirror_dir: Option<PathBuf>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            name: "dfi node".to_string(),
            desc: String::new(),
            public_address: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            capabilities: Capabilities::default(),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            rate_limit_wait: Duration::from_secs(5),
            query_rate: 10.0,
            query_burst: 20.0,
            announce_rate: 2.0,
            announce_burst: 5.0,
            mirror_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExploreConfig {
    pub frequency: Duration,
    pub buffer_size: usize,
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            frequency: Duration::from_secs(EXPLORE_FREQUENCY_SECS),
            buffer_size: EXPLORE_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeedManagerConfig {
    pub frequency: Duration,
}

impl Default for SeedManagerConfig {
    fn default() -> Self {
        Self {
            frequency: Duration::from_secs(SEED_SEARCH_FREQUENCY_SECS),
        }
    }
}
