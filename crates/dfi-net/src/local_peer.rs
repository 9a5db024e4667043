//! The node itself: its identity and signed entry, the routing table, the
//! post catalogue it serves, and a pool of outbound sessions.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use dfi_shared::constants::{BUCKET_SIZE, LATEST_ENTRY_COUNT, PIECE_SIZE};
use dfi_shared::{Address, Collection, Datastore, Entry, Identity};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::PeerConfig;
use crate::dht::Dht;
use crate::error::{NetError, Result};
use crate::jobs::NetworkAccess;
use crate::mirror::{Mirror, MirrorProgress};
use crate::netmap::{create_net_map, NetMap};
use crate::peer::Peer;
use crate::rate_limit::{PeerLimiters, RateLimiter};

/// Remote nodes asked before [`LocalPeer::resolve`] gives up.
const MAX_RESOLVE_QUERIES: usize = 3 * BUCKET_SIZE;

pub type SharedPeer = Arc<tokio::sync::Mutex<Peer>>;

pub struct LocalPeer {
    identity: Identity,
    entry: RwLock<Entry>,
    dht: Arc<Dht>,
    datastore: Arc<dyn Datastore>,
    pub(crate) mirrors: RwLock<HashMap<Address, Mirror>>,
    pub(crate) progress: Mutex<HashMap<Address, MirrorProgress>>,
    limiters: PeerLimiters,
    pool: tokio::sync::Mutex<HashMap<Address, SharedPeer>>,
    config: PeerConfig,
}

impl LocalPeer {
    /// Build the local entry from `config` and sign it over the current
    /// contents of `datastore`.
    pub fn new(
        identity: Identity,
        dht: Arc<Dht>,
        datastore: Arc<dyn Datastore>,
        config: PeerConfig,
    ) -> Result<Self> {
        let entry = Entry {
            name: config.name.clone(),
            desc: config.desc.clone(),
            public_address: config.public_address.clone(),
            port: config.port,
            ..Default::default()
        };
        let limiters = PeerLimiters::new(
            RateLimiter::new(config.query_rate, config.query_burst),
            RateLimiter::new(config.announce_rate, config.announce_burst),
        );

        let local = Self {
            identity,
            entry: RwLock::new(entry),
            dht,
            datastore,
            mirrors: RwLock::new(HashMap::new()),
            progress: Mutex::new(HashMap::new()),
            limiters,
            pool: tokio::sync::Mutex::new(HashMap::new()),
            config,
        };
        local.refresh_entry()?;
        Ok(local)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn address(&self) -> Address {
        self.identity.address()
    }

    pub fn entry(&self) -> Entry {
        self.entry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `f` to the local entry, re-sign it and return the result.
    pub(crate) fn update_entry<F>(&self, f: F) -> Entry
    where
        F: FnOnce(&mut Entry),
    {
        let mut entry = self.entry.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut entry);
        entry.sign(&self.identity);
        entry.clone()
    }

    pub(crate) fn entry_lock(&self) -> &RwLock<Entry> {
        &self.entry
    }

    pub fn dht(&self) -> &Arc<Dht> {
        &self.dht
    }

    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.datastore
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn limiters(&self) -> &PeerLimiters {
        &self.limiters
    }

    /// Hash the catalogue into a collection.
    pub fn collection(&self) -> Result<Collection> {
        Ok(Collection::create(self.datastore.as_ref(), PIECE_SIZE)?)
    }

    /// Recompute the collection hash and post count, then re-sign.
    pub fn refresh_entry(&self) -> Result<Entry> {
        let collection = self.collection()?;
        let post_count = self.datastore.post_count()?;
        let entry = self.update_entry(|entry| {
            entry.collection_hash = collection.hash().to_vec();
            entry.post_count = post_count;
        });
        info!(
            address = %entry.address,
            posts = post_count,
            pieces = collection.piece_count(),
            "local entry signed"
        );
        Ok(entry)
    }

    /// The local entry for our own address, otherwise the routing table's.
    pub fn lookup(&self, address: &Address) -> Result<Entry> {
        if *address == self.address() {
            return Ok(self.entry());
        }
        self.dht.query(address)
    }

    /// Record the entry of a peer that just completed a handshake with us.
    pub fn accept_entry(&self, entry: &Entry) {
        match self.dht.update(entry) {
            Ok(outcome) => {
                debug!(peer = %entry.address.short(), ?outcome, "handshake entry");
                if let Err(e) = self.dht.set_seen(&entry.address) {
                    debug!("failed to mark peer seen: {e}");
                }
            }
            Err(e) => warn!(peer = %entry.address.short(), "handshake entry not stored: {e}"),
        }
    }

    /// A pooled session with `entry`, dialing it if needed.
    pub async fn peer_for(&self, entry: &Entry) -> Result<SharedPeer> {
        if entry.address == self.address() {
            return Err(NetError::SelfConnect);
        }
        if let Some(peer) = self.pool.lock().await.get(&entry.address) {
            return Ok(Arc::clone(peer));
        }

        let peer = Peer::connect(
            &entry.socket_address(),
            &self.identity,
            &self.entry(),
            Some(&entry.address),
            &self.config,
        )
        .await?;
        self.accept_entry(peer.entry());

        let peer = Arc::new(tokio::sync::Mutex::new(peer));
        self.pool
            .lock()
            .await
            .insert(entry.address.clone(), Arc::clone(&peer));
        Ok(peer)
    }

    /// Drop a pooled session whose transport failed.
    pub(crate) async fn settle<T>(&self, address: &Address, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_transport() && self.pool.lock().await.remove(address).is_some() {
                debug!(peer = %address.short(), "dropped session: {e}");
            }
        }
        result
    }

    pub async fn ask_query(&self, peer: &Entry, target: &Address) -> Result<Vec<Entry>> {
        let shared = self.peer_for(peer).await?;
        let result = shared.lock().await.query(target).await;
        self.settle(&peer.address, result).await
    }

    pub async fn ask_find_closest(&self, peer: &Entry, target: &Address) -> Result<Vec<Entry>> {
        let shared = self.peer_for(peer).await?;
        let result = shared.lock().await.find_closest(target).await;
        self.settle(&peer.address, result).await
    }

    pub async fn announce_to(&self, peer: &Entry, entry: &Entry) -> Result<()> {
        let shared = self.peer_for(peer).await?;
        let result = shared.lock().await.announce(entry).await;
        self.settle(&peer.address, result).await
    }

    pub async fn add_peer_to(&self, peer: &Entry, address: &Address) -> Result<()> {
        let shared = self.peer_for(peer).await?;
        let result = shared.lock().await.add_peer(address).await;
        self.settle(&peer.address, result).await
    }

    /// Find the entry for `address`: ourselves, then the routing table, then
    /// an iterative lookup through the closest known peers.
    pub async fn resolve(&self, address: &Address) -> Result<Entry> {
        if *address == self.address() {
            return Ok(self.entry());
        }
        match self.dht.query(address) {
            Ok(entry) => return Ok(entry),
            Err(NetError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let mut visited = HashSet::new();
        visited.insert(self.address());
        let mut candidates = self.dht.find_closest(address, BUCKET_SIZE)?;

        while visited.len() <= MAX_RESOLVE_QUERIES {
            candidates.sort_by(|a, b| address.xor(&a.address).cmp(&address.xor(&b.address)));
            let Some(next) = candidates
                .iter()
                .position(|c| !visited.contains(&c.address))
            else {
                break;
            };
            let candidate = candidates.remove(next);
            visited.insert(candidate.address.clone());

            let found = match self.ask_query(&candidate, address).await {
                Ok(found) => found,
                Err(e) => {
                    debug!(peer = %candidate.address.short(), "resolve hop failed: {e}");
                    continue;
                }
            };

            for entry in found {
                if self.dht.update(&entry).is_err() {
                    continue;
                }
                if entry.address == *address {
                    return Ok(entry);
                }
                if !visited.contains(&entry.address)
                    && !candidates.iter().any(|c| c.address == entry.address)
                {
                    candidates.push(entry);
                }
            }
        }

        Err(NetError::NotFound)
    }

    /// Join the network through the node listening at `socket_addr`: learn
    /// its entry and the peers it knows near us, then announce ourselves.
    pub async fn bootstrap(&self, socket_addr: &str) -> Result<usize> {
        let peer = Peer::connect(socket_addr, &self.identity, &self.entry(), None, &self.config).await?;
        let remote = peer.entry().clone();
        if remote.address == self.address() {
            peer.close().await;
            return Err(NetError::SelfConnect);
        }
        self.accept_entry(&remote);

        let shared = Arc::new(tokio::sync::Mutex::new(peer));
        self.pool
            .lock()
            .await
            .insert(remote.address.clone(), Arc::clone(&shared));

        let me = self.address();
        let result = async {
            let mut peer = shared.lock().await;
            let found = peer.find_closest(&me).await?;
            peer.announce(&self.entry()).await?;
            Ok::<_, NetError>(found)
        }
        .await;
        let found = self.settle(&remote.address, result).await?;

        let mut learned = 0;
        for entry in found.iter().filter(|e| e.address != me) {
            if self.dht.update(entry).map(|o| o.changed()).unwrap_or(false) {
                learned += 1;
            }
        }
        info!(peer = %remote.address.short(), learned, "bootstrapped");
        Ok(learned)
    }

    /// Announce the local entry to the peers closest to us.
    pub async fn announce_self(&self) -> usize {
        let entry = self.entry();
        let targets = match self.dht.find_closest(&entry.address, BUCKET_SIZE) {
            Ok(targets) => targets,
            Err(e) => {
                warn!("announce skipped: {e}");
                return 0;
            }
        };

        let sends = targets.iter().map(|target| {
            let entry = &entry;
            async move {
                match self.announce_to(target, entry).await {
                    Ok(()) => true,
                    Err(e) => {
                        debug!(peer = %target.address.short(), "announce failed: {e}");
                        false
                    }
                }
            }
        });
        futures::future::join_all(sends)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count()
    }

    /// Relay a newly learned entry to the closest peers, except the one it
    /// came from and its owner. Runs in the background, each send failing
    /// on its own.
    pub(crate) fn forward_announce(self: &Arc<Self>, entry: Entry, announcer: Address) {
        let local = Arc::clone(self);
        tokio::spawn(async move {
            let me = local.address();
            let targets: Vec<Entry> = match local.dht.find_closest(&entry.address, BUCKET_SIZE) {
                Ok(targets) => targets
                    .into_iter()
                    .filter(|t| t.address != announcer && t.address != entry.address && t.address != me)
                    .collect(),
                Err(e) => {
                    warn!("forwarding skipped: {e}");
                    return;
                }
            };

            let sends = targets.iter().map(|target| {
                let local = &local;
                let entry = &entry;
                async move {
                    if let Err(e) = local.announce_to(target, entry).await {
                        debug!(peer = %target.address.short(), "forward failed: {e}");
                    }
                }
            });
            futures::future::join_all(sends).await;
            debug!(entry = %entry.address.short(), peers = targets.len(), "announce forwarded");
        });
    }

    /// The seeding graph reachable from `address`.
    pub fn net_map(&self, address: &Address) -> Result<NetMap> {
        let start = self.lookup(address)?;
        Ok(create_net_map(&start, |a| self.lookup(a).ok()))
    }

    /// Close every pooled session.
    pub async fn close(&self) {
        let peers: Vec<SharedPeer> = self.pool.lock().await.drain().map(|(_, p)| p).collect();
        for peer in peers {
            if let Ok(peer) = Arc::try_unwrap(peer) {
                peer.into_inner().close().await;
            }
        }
    }
}

#[async_trait]
impl NetworkAccess for LocalPeer {
    fn local_address(&self) -> Address {
        self.address()
    }

    async fn find_closest(&self, peer: &Entry, target: &Address) -> Result<Vec<Entry>> {
        self.ask_find_closest(peer, target).await
    }

    async fn query(&self, peer: &Entry, target: &Address) -> Result<Entry> {
        self.ask_query(peer, target)
            .await?
            .into_iter()
            .find(|e| &e.address == target)
            .ok_or(NetError::NotFound)
    }

    async fn resolve(&self, address: &Address) -> Result<Entry> {
        LocalPeer::resolve(self, address).await
    }

    fn lookup(&self, address: &Address) -> Result<Entry> {
        LocalPeer::lookup(self, address)
    }

    fn store(&self, entry: &Entry) -> Result<()> {
        if entry.address == self.address() {
            // seeds are not signed, no re-sign needed
            let mut local = self.entry.write().unwrap_or_else(PoisonError::into_inner);
            local.merge_seeds(&entry.seeds);
            return Ok(());
        }
        self.dht.update(entry)?;
        Ok(())
    }

    fn seed(&self, tx: &mpsc::Sender<Entry>) -> usize {
        let mut candidates = self
            .dht
            .find_closest(&Address::random(), BUCKET_SIZE)
            .unwrap_or_default();
        candidates.extend(self.dht.query_latest(LATEST_ENTRY_COUNT).unwrap_or_default());

        let mut seen = HashSet::new();
        let mut queued = 0;
        for entry in candidates {
            if !seen.insert(entry.address.clone()) {
                continue;
            }
            if tx.try_send(entry).is_err() {
                break;
            }
            queued += 1;
        }
        queued
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use dfi_shared::Post;
    use dfi_store::PostDb;

    pub(crate) fn post(id: u64, title: &str) -> Post {
        Post {
            id,
            info_hash: format!("{id:040x}"),
            title: title.into(),
            size: 1024,
            file_count: 1,
            upload_date: 1_500_000_000,
            ..Default::default()
        }
    }

    pub(crate) fn local_peer(name: &str, posts: &[Post]) -> LocalPeer {
        let identity = Identity::generate();
        let dht = Arc::new(Dht::in_memory(identity.address()).unwrap());
        let db = PostDb::open_in_memory().unwrap();
        db.insert_posts(posts).unwrap();
        let config = PeerConfig {
            name: name.into(),
            ..Default::default()
        };
        LocalPeer::new(identity, dht, Arc::new(db), config).unwrap()
    }

    #[test]
    fn entry_signed_over_catalogue() {
        let posts: Vec<Post> = (1..=5).map(|i| post(i, "title")).collect();
        let local = local_peer("alice", &posts);

        let entry = local.entry();
        assert!(entry.verify().is_ok());
        assert_eq!(entry.post_count, 5);
        assert_eq!(entry.collection_hash, local.collection().unwrap().hash().to_vec());
        assert_eq!(entry.address, local.address());
    }

    #[test]
    fn lookup_prefers_self() {
        let local = local_peer("alice", &[]);
        assert_eq!(local.lookup(&local.address()).unwrap(), local.entry());
        assert!(matches!(local.lookup(&Address::random()), Err(NetError::NotFound)));
    }

    #[test]
    fn store_merges_local_seeds() {
        let local = local_peer("alice", &[]);
        let seed = Address::random();

        let mut copy = local.entry();
        copy.seeds.push(seed.clone());
        NetworkAccess::store(&local, &copy).unwrap();

        let entry = local.entry();
        assert_eq!(entry.seeds, vec![seed]);
        assert!(entry.verify().is_ok());
    }

    #[tokio::test]
    async fn resolve_unknown_without_peers_is_not_found() {
        let local = local_peer("alice", &[]);
        assert!(matches!(
            local.resolve(&Address::random()).await,
            Err(NetError::NotFound)
        ));
    }

    #[tokio::test]
    async fn never_dials_self() {
        let local = local_peer("alice", &[]);
        assert!(matches!(
            local.peer_for(&local.entry()).await,
            Err(NetError::SelfConnect)
        ));
    }
}
