//! Daemon configuration loaded from environment variables.
//!
//! Every setting has a default so a node can start with no configuration
//! for local testing.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use dfi_net::{ExploreConfig, PeerConfig, SeedManagerConfig};
use dfi_shared::constants::{
    DEFAULT_PORT, MAX_ENTRY_DESC_LENGTH, MAX_ENTRY_NAME_LENGTH, MAX_ENTRY_PUBLIC_ADDRESS_LENGTH,
};

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// TCP address the listener binds.
    /// Env: `DFI_BIND`
    /// Default: `0.0.0.0:5050`
    pub bind_addr: SocketAddr,

    /// Host published in the local entry for other peers to dial.
    /// Env: `DFI_PUBLIC_ADDRESS`
    /// Default: `127.0.0.1`
    pub public_address: String,

    /// Env: `DFI_NAME`
    pub name: String,

    /// Env: `DFI_DESC`
    pub desc: String,

    /// Identity key, databases and the routing table snapshot live here.
    /// Env: `DFI_DATA_DIR`
    /// Default: the platform data directory.
    pub data_dir: PathBuf,

    /// `host:port` peers dialed at startup, comma separated.
    /// Env: `DFI_BOOTSTRAP`
    pub bootstrap: Vec<String>,

    /// Env: `DFI_EXPLORE_SECS`
    /// Default: `120`
    pub explore_interval: Duration,

    /// Env: `DFI_SEED_SECS`
    /// Default: `300`
    pub seed_interval: Duration,

    /// Env: `DFI_REQUEST_TIMEOUT_SECS`
    /// Default: `30`
    pub request_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let peer = PeerConfig::default();
        Self {
            bind_addr: ([0, 0, 0, 0], DEFAULT_PORT).into(),
            public_address: peer.public_address,
            name: peer.name,
            desc: peer.desc,
            data_dir: default_data_dir(),
            bootstrap: Vec::new(),
            explore_interval: ExploreConfig::default().frequency,
            seed_interval: SeedManagerConfig::default().frequency,
            request_timeout: peer.request_timeout,
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = var("DFI_BIND") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.bind_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid DFI_BIND, using default"),
            }
        }

        // entries that break these caps fail verification at every peer
        let host_cap = MAX_ENTRY_PUBLIC_ADDRESS_LENGTH - 1;
        if let Some(host) = parse_bounded(&var, "DFI_PUBLIC_ADDRESS", host_cap) {
            if !host.is_empty() {
                config.public_address = host;
            }
        }

        if let Some(name) = parse_bounded(&var, "DFI_NAME", MAX_ENTRY_NAME_LENGTH) {
            config.name = name;
        }

        if let Some(desc) = parse_bounded(&var, "DFI_DESC", MAX_ENTRY_DESC_LENGTH) {
            config.desc = desc;
        }

        if let Some(dir) = var("DFI_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Some(list) = var("DFI_BOOTSTRAP") {
            config.bootstrap = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(secs) = parse_secs(&var, "DFI_EXPLORE_SECS") {
            config.explore_interval = secs;
        }

        if let Some(secs) = parse_secs(&var, "DFI_SEED_SECS") {
            config.seed_interval = secs;
        }

        if let Some(secs) = parse_secs(&var, "DFI_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = secs;
        }

        config
    }

    pub fn identity_path(&self) -> PathBuf {
        self.data_dir.join("identity.key")
    }

    pub fn posts_path(&self) -> PathBuf {
        self.data_dir.join("posts.db")
    }

    pub fn netdb_path(&self) -> PathBuf {
        self.data_dir.join("netdb.db")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("table.snapshot")
    }

    pub fn collection_path(&self) -> PathBuf {
        self.data_dir.join("collection.dat")
    }

    pub fn peer_config(&self) -> PeerConfig {
        PeerConfig {
            name: self.name.clone(),
            desc: self.desc.clone(),
            public_address: self.public_address.clone(),
            port: self.bind_addr.port(),
            request_timeout: self.request_timeout,
            mirror_dir: Some(self.data_dir.join("mirrors")),
            ..Default::default()
        }
    }

    pub fn explore_config(&self) -> ExploreConfig {
        ExploreConfig {
            frequency: self.explore_interval,
            ..Default::default()
        }
    }

    pub fn seed_manager_config(&self) -> SeedManagerConfig {
        SeedManagerConfig {
            frequency: self.seed_interval,
        }
    }
}

/// A positive number of seconds, or `None` with a warning.
fn parse_secs<F>(var: &F, key: &str) -> Option<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let value = var(key)?;
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
        _ => {
            tracing::warn!(value = %value, "Invalid {key}, using default");
            None
        }
    }
}

/// A value of at most `max` bytes, or `None` with a warning.
fn parse_bounded<F>(var: &F, key: &str, max: usize) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let value = var(key)?;
    if value.len() > max {
        tracing::warn!(len = value.len(), max, "{key} too long, using default");
        return None;
    }
    Some(value)
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "dfi")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./dfi-data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> NodeConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        NodeConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = load(&[]);
        assert_eq!(config.bind_addr, ([0, 0, 0, 0], 5050).into());
        assert_eq!(config.explore_interval, Duration::from_secs(120));
        assert_eq!(config.seed_interval, Duration::from_secs(300));
        assert!(config.bootstrap.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DFI_BIND", "127.0.0.1:6000"),
            ("DFI_NAME", "archive"),
            ("DFI_DATA_DIR", "/tmp/dfi-test"),
            ("DFI_BOOTSTRAP", "a.example:5050, b.example:5050,,"),
            ("DFI_SEED_SECS", "60"),
        ]);
        assert_eq!(config.bind_addr.port(), 6000);
        assert_eq!(config.name, "archive");
        assert_eq!(config.bootstrap, vec!["a.example:5050", "b.example:5050"]);
        assert_eq!(config.seed_interval, Duration::from_secs(60));
        assert_eq!(config.netdb_path(), PathBuf::from("/tmp/dfi-test/netdb.db"));

        let peer = config.peer_config();
        assert_eq!(peer.port, 6000);
        assert_eq!(peer.mirror_dir, Some(PathBuf::from("/tmp/dfi-test/mirrors")));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = load(&[
            ("DFI_BIND", "not an address"),
            ("DFI_EXPLORE_SECS", "soon"),
            ("DFI_REQUEST_TIMEOUT_SECS", "0"),
        ]);
        assert_eq!(config.bind_addr, NodeConfig::default().bind_addr);
        assert_eq!(config.explore_interval, Duration::from_secs(120));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_oversized_entry_fields_fall_back() {
        let long_host = "h".repeat(MAX_ENTRY_PUBLIC_ADDRESS_LENGTH);
        let long_name = "n".repeat(MAX_ENTRY_NAME_LENGTH + 1);
        let long_desc = "d".repeat(MAX_ENTRY_DESC_LENGTH + 1);
        let config = load(&[
            ("DFI_PUBLIC_ADDRESS", long_host.as_str()),
            ("DFI_NAME", long_name.as_str()),
            ("DFI_DESC", long_desc.as_str()),
        ]);
        let defaults = NodeConfig::default();
        assert_eq!(config.public_address, defaults.public_address);
        assert_eq!(config.name, defaults.name);
        assert_eq!(config.desc, defaults.desc);

        let name = "n".repeat(MAX_ENTRY_NAME_LENGTH);
        assert_eq!(load(&[("DFI_NAME", name.as_str())]).name, name);
    }
}
