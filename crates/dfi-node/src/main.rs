//! # dfid
//!
//! A dfi node daemon:
//! - serves the local post catalogue and routing table over TCP
//! - joins the network through configured bootstrap peers
//! - explores for new peers and keeps its own seed list complete
//! - snapshots the routing table on shutdown for a fast restart

mod config;

use std::sync::Arc;

use dfi_net::{spawn_explore, spawn_seed_manager, Dht, LocalPeer};
use dfi_shared::Identity;
use dfi_store::PostDb;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::NodeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,dfi_net=debug,dfi_store=info")),
        )
        .init();

    info!("Starting dfid v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration and identity
    // -----------------------------------------------------------------------
    let config = NodeConfig::from_env();
    info!(?config, "Loaded configuration");

    let identity = Identity::load_or_generate(&config.identity_path())?;
    info!(address = %identity.address(), "Node identity ready");

    // -----------------------------------------------------------------------
    // 3. Open storage
    // -----------------------------------------------------------------------
    let posts = Arc::new(PostDb::open_at(&config.posts_path())?);

    let dht = Arc::new(Dht::open(&config.netdb_path(), identity.address())?);
    let snapshot = config.snapshot_path();
    if snapshot.exists() {
        match dht.load_table(&snapshot) {
            Ok(count) => info!(count, "Restored routing table snapshot"),
            Err(e) => warn!(error = %e, "Ignoring unreadable routing table snapshot"),
        }
    }

    // Signs the local entry over the current catalogue
    let local = Arc::new(LocalPeer::new(
        identity,
        Arc::clone(&dht),
        posts,
        config.peer_config(),
    )?);

    match local.collection() {
        Ok(collection) => {
            if let Err(e) = collection.save(&config.collection_path()) {
                warn!(error = %e, "Failed to save collection");
            }
        }
        Err(e) => warn!(error = %e, "Failed to build collection"),
    }

    // -----------------------------------------------------------------------
    // 4. Bind the listener (fatal on failure)
    // -----------------------------------------------------------------------
    let listener = dfi_net::bind(&config.bind_addr.to_string()).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut server = tokio::spawn(dfi_net::serve(listener, Arc::clone(&local), shutdown_rx));

    // -----------------------------------------------------------------------
    // 5. Join the network
    // -----------------------------------------------------------------------
    for peer in &config.bootstrap {
        match local.bootstrap(peer).await {
            Ok(learned) => info!(peer = %peer, learned, "Bootstrap peer answered"),
            Err(e) => warn!(peer = %peer, error = %e, "Bootstrap peer failed"),
        }
    }
    let announced = local.announce_self().await;
    info!(announced, table = dht.len().unwrap_or(0), "Announced local entry");

    // -----------------------------------------------------------------------
    // 6. Spawn background jobs
    // -----------------------------------------------------------------------
    let (explore, mut discovered) = spawn_explore(Arc::clone(&local), config.explore_config());

    // Newly learned entries are stored and explored in turn
    let queue = explore.input();
    let table = Arc::clone(&dht);
    let absorb = tokio::spawn(async move {
        while let Some(entry) = discovered.recv().await {
            match table.update(&entry) {
                Ok(outcome) if outcome.changed() => {
                    let _ = queue.try_send(entry);
                }
                Ok(_) => {}
                Err(e) => debug!(peer = %entry.address.short(), "discarded explored entry: {e}"),
            }
        }
    });

    let seeds = spawn_seed_manager(
        Arc::clone(&local),
        local.address(),
        config.seed_manager_config(),
    );

    // -----------------------------------------------------------------------
    // 7. Run until Ctrl+C
    // -----------------------------------------------------------------------
    tokio::select! {
        result = &mut server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Listener task failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    explore.close().await;
    seeds.close().await;
    absorb.abort();
    let _ = shutdown_tx.send(true);
    if !server.is_finished() {
        let _ = server.await;
    }
    local.close().await;

    match dht.save_table(&snapshot) {
        Ok(count) => info!(count, "Saved routing table snapshot"),
        Err(e) => warn!(error = %e, "Failed to save routing table snapshot"),
    }

    Ok(())
}
