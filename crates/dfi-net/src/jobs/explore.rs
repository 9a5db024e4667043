//! Periodic network exploration.
//!
//! Every tick takes one candidate off the shared input queue, asks it for
//! the peers closest to a random address and to ourselves, and emits what it
//! learns. When the input runs dry it is refilled through
//! [`NetworkAccess::seed`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dfi_shared::{Address, Entry};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info};

use super::NetworkAccess;
use crate::config::ExploreConfig;
use crate::error::Result;

pub struct ExploreHandle {
    input: mpsc::Sender<Entry>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ExploreHandle {
    /// Queue for new exploration candidates.
    pub fn input(&self) -> mpsc::Sender<Entry> {
        self.input.clone()
    }

    /// Stop ticking and abort ticks still in flight.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Start exploring. Discovered entries, never our own, arrive on the
/// returned receiver.
pub fn spawn_explore<N>(net: Arc<N>, config: ExploreConfig) -> (ExploreHandle, mpsc::Receiver<Entry>)
where
    N: NetworkAccess,
{
    let (input_tx, input_rx) = mpsc::channel(config.buffer_size.max(1));
    let (out_tx, out_rx) = mpsc::channel(config.buffer_size.max(1));
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let queued = net.seed(&input_tx);
    debug!(queued, "explore input seeded");

    let input_rx = Arc::new(Mutex::new(input_rx));
    let refill = input_tx.clone();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.frequency);
        let mut ticks = JoinSet::new();

        loop {
            tokio::select! {
                // the first tick completes immediately
                _ = ticker.tick() => {
                    ticks.spawn(explore_tick(
                        Arc::clone(&net),
                        Arc::clone(&input_rx),
                        refill.clone(),
                        out_tx.clone(),
                        config.frequency,
                    ));
                }
                Some(_) = ticks.join_next(), if !ticks.is_empty() => {}
                _ = shutdown_rx.changed() => break,
            }
        }

        ticks.shutdown().await;
        info!("explore job stopped");
    });

    (
        ExploreHandle {
            input: input_tx,
            shutdown: shutdown_tx,
            task,
        },
        out_rx,
    )
}

async fn explore_tick<N>(
    net: Arc<N>,
    input: Arc<Mutex<mpsc::Receiver<Entry>>>,
    refill: mpsc::Sender<Entry>,
    out: mpsc::Sender<Entry>,
    wait: Duration,
) where
    N: NetworkAccess,
{
    // a tick that finds nothing to explore gives up after one period
    let next = {
        let mut input = input.lock().await;
        tokio::time::timeout(wait, input.recv()).await
    };

    if let Ok(Some(candidate)) = next {
        if candidate.address != net.local_address() {
            match explore_peer(net.as_ref(), &candidate, &out).await {
                Ok(emitted) => debug!(peer = %candidate.address.short(), emitted, "explored"),
                Err(e) => debug!(peer = %candidate.address.short(), "explore failed: {e}"),
            }
        }
    }

    if refill.capacity() == refill.max_capacity() {
        let queued = net.seed(&refill);
        info!(queued, "seeding peer explore");
    }
}

/// Ask `peer` for the nodes closest to a random target, then to ourselves.
/// Each batch is emitted as soon as it arrives; only when both queries fail
/// is the peer reported as failed.
async fn explore_peer<N>(net: &N, peer: &Entry, out: &mpsc::Sender<Entry>) -> Result<usize>
where
    N: NetworkAccess + ?Sized,
{
    let me = net.local_address();
    let mut seen = HashSet::new();
    let mut emitted = 0;
    let mut answered = false;
    let mut last_err = None;

    for target in [Address::random(), me.clone()] {
        let found = match net.find_closest(peer, &target).await {
            Ok(found) => {
                answered = true;
                found
            }
            Err(e) => {
                debug!(peer = %peer.address.short(), target = %target.short(), "closest query failed: {e}");
                last_err = Some(e);
                continue;
            }
        };

        for entry in found {
            if entry.address == me || !seen.insert(entry.address.clone()) {
                continue;
            }
            if out.send(entry).await.is_err() {
                return Ok(emitted);
            }
            emitted += 1;
        }
    }

    match last_err {
        Some(e) if !answered => Err(e),
        _ => Ok(emitted),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use crate::error::NetError;

    pub(crate) fn entry(name: &str) -> Entry {
        Entry {
            address: Address::random(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// A fake network: every peer answers closest-node queries from
    /// `closest`, and `seed` drains `seeds`.
    pub(crate) struct MockNet {
        pub me: Address,
        pub closest: HashMap<Address, Vec<Entry>>,
        pub table: StdMutex<HashMap<Address, Entry>>,
        pub remote: HashMap<(Address, Address), Entry>,
        pub seeds: StdMutex<Vec<Entry>>,
        pub seed_calls: StdMutex<usize>,
        pub asked: StdMutex<Vec<Address>>,
        /// Closest-to-self queries fail when set.
        pub self_unreachable: bool,
    }

    impl MockNet {
        pub(crate) fn new(me: Address) -> Self {
            Self {
                me,
                closest: HashMap::new(),
                table: StdMutex::new(HashMap::new()),
                remote: HashMap::new(),
                seeds: StdMutex::new(Vec::new()),
                seed_calls: StdMutex::new(0),
                asked: StdMutex::new(Vec::new()),
                self_unreachable: false,
            }
        }
    }

    #[async_trait]
    impl NetworkAccess for MockNet {
        fn local_address(&self) -> Address {
            self.me.clone()
        }

        async fn find_closest(&self, peer: &Entry, target: &Address) -> Result<Vec<Entry>> {
            self.asked.lock().unwrap().push(peer.address.clone());
            if self.self_unreachable && *target == self.me {
                return Err(NetError::Timeout("request"));
            }
            self.closest
                .get(&peer.address)
                .cloned()
                .ok_or(NetError::Timeout("connect"))
        }

        async fn query(&self, peer: &Entry, target: &Address) -> Result<Entry> {
            self.asked.lock().unwrap().push(peer.address.clone());
            self.remote
                .get(&(peer.address.clone(), target.clone()))
                .cloned()
                .ok_or(NetError::NotFound)
        }

        async fn resolve(&self, address: &Address) -> Result<Entry> {
            self.lookup(address)
        }

        fn lookup(&self, address: &Address) -> Result<Entry> {
            self.table
                .lock()
                .unwrap()
                .get(address)
                .cloned()
                .ok_or(NetError::NotFound)
        }

        fn store(&self, entry: &Entry) -> Result<()> {
            self.table
                .lock()
                .unwrap()
                .insert(entry.address.clone(), entry.clone());
            Ok(())
        }

        fn seed(&self, tx: &mpsc::Sender<Entry>) -> usize {
            *self.seed_calls.lock().unwrap() += 1;
            let mut queued = 0;
            for entry in self.seeds.lock().unwrap().drain(..) {
                if tx.try_send(entry).is_ok() {
                    queued += 1;
                }
            }
            queued
        }
    }

    #[tokio::test]
    async fn emits_distinct_non_self_results() {
        let me = Address::random();
        let mut me_entry = entry("me");
        me_entry.address = me.clone();

        let bob = entry("bob");
        let carol = entry("carol");
        let dave = entry("dave");

        let mut net = MockNet::new(me.clone());
        // both queries answer with the same list
        net.closest.insert(
            bob.address.clone(),
            vec![carol.clone(), me_entry.clone(), dave.clone()],
        );
        net.seeds.lock().unwrap().push(bob.clone());
        let net = Arc::new(net);

        let config = ExploreConfig {
            frequency: Duration::from_secs(3600),
            buffer_size: 10,
        };
        let (handle, mut out) = spawn_explore(Arc::clone(&net), config);

        let first = out.recv().await.unwrap();
        let second = out.recv().await.unwrap();
        assert_eq!(first.name, "carol");
        assert_eq!(second.name, "dave");
        assert!(
            tokio::time::timeout(Duration::from_millis(50), out.recv())
                .await
                .is_err(),
            "duplicates and self are filtered"
        );

        assert_eq!(*net.asked.lock().unwrap(), vec![bob.address.clone(); 2]);
        handle.close().await;
    }

    #[tokio::test]
    async fn skips_self_and_reseeds_when_drained() {
        let me = Address::random();
        let mut me_entry = entry("me");
        me_entry.address = me.clone();

        let net = Arc::new(MockNet::new(me.clone()));
        net.seeds.lock().unwrap().push(me_entry);

        let config = ExploreConfig {
            frequency: Duration::from_millis(20),
            buffer_size: 10,
        };
        let (handle, _out) = spawn_explore(Arc::clone(&net), config);
        tokio::time::sleep(Duration::from_millis(120)).await;
        handle.close().await;

        assert!(net.asked.lock().unwrap().is_empty());
        // once at start, then after the queue ran dry
        assert!(*net.seed_calls.lock().unwrap() >= 2);
    }

    #[tokio::test]
    async fn failing_peer_is_isolated() {
        let me = Address::random();
        let unreachable = entry("gone");
        let bob = entry("bob");
        let carol = entry("carol");

        let mut net = MockNet::new(me);
        net.closest.insert(bob.address.clone(), vec![carol.clone()]);
        let net = Arc::new(net);

        let config = ExploreConfig {
            frequency: Duration::from_millis(10),
            buffer_size: 10,
        };
        let (handle, mut out) = spawn_explore(Arc::clone(&net), config);
        handle.input().send(unreachable).await.unwrap();
        handle.input().send(bob).await.unwrap();

        let found = tokio::time::timeout(Duration::from_secs(2), out.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.address, carol.address);
        handle.close().await;
    }

    #[tokio::test]
    async fn random_batch_survives_failed_self_query() {
        let me = Address::random();
        let bob = entry("bob");
        let carol = entry("carol");
        let dave = entry("dave");

        let mut net = MockNet::new(me);
        net.closest
            .insert(bob.address.clone(), vec![carol.clone(), dave.clone()]);
        net.self_unreachable = true;

        let (tx, mut rx) = mpsc::channel(10);
        let emitted = explore_peer(&net, &bob, &tx).await.unwrap();
        assert_eq!(emitted, 2);
        assert_eq!(rx.recv().await.unwrap().address, carol.address);
        assert_eq!(rx.recv().await.unwrap().address, dave.address);
        assert_eq!(net.asked.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn peer_failing_both_queries_is_an_error() {
        let net = MockNet::new(Address::random());
        let (tx, _rx) = mpsc::channel(10);
        assert!(explore_peer(&net, &entry("gone"), &tx).await.is_err());
    }
}
