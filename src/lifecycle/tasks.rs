use super::context::StationContext;
use crate::kv::memory::MemoryKvStore;
use crate::membership::service::MembershipService;
use crate::peer::PeerTransport;
use crate::ring::RingManager;
use crate::storage::eviction::EvictionSweeper;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const KV_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Background loops of a node. Each one watches the same shutdown flag and
/// is joined by `stop`.
pub struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub fn spawn(ctx: &StationContext) -> Self {
        let (shutdown, _) = watch::channel(false);
        let mut handles = Vec::new();

        let discovery = &ctx.config.discovery;

        handles.push((
            "ring-refresh",
            tokio::spawn(refresh_loop(
                ctx.membership.clone(),
                ctx.ring.clone(),
                ctx.transport.clone(),
                discovery.refresh_interval(),
                shutdown.subscribe(),
            )),
        ));

        handles.push((
            "heartbeat",
            tokio::spawn(
                ctx.membership
                    .clone()
                    .heartbeat_loop(discovery.heartbeat_interval(), shutdown.subscribe()),
            ),
        ));

        if let Some(sweeper) = &ctx.eviction {
            handles.push((
                "eviction",
                tokio::spawn(eviction_loop(
                    sweeper.clone(),
                    Duration::from_secs(ctx.config.eviction.interval_secs),
                    shutdown.subscribe(),
                )),
            ));
        }

        if let Some(store) = &ctx.hosted_kv {
            handles.push((
                "kv-purge",
                tokio::spawn(kv_purge_loop(
                    store.clone(),
                    KV_PURGE_INTERVAL,
                    shutdown.subscribe(),
                )),
            ));
        }

        tracing::info!("Started {} background tasks", handles.len());
        Self { shutdown, handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signals every loop and waits for it to return.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Background task {} ended abnormally: {}", name, e);
            } else {
                tracing::debug!("Background task {} stopped", name);
            }
        }
    }
}

/// Rebuilds the ring on every tick and drops connections to nodes that left
/// it or changed address.
pub async fn refresh_loop(
    membership: Arc<MembershipService>,
    ring: Arc<RingManager>,
    transport: Arc<dyn PeerTransport>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match membership.refresh_ring(&ring).await {
                    Ok(delta) => {
                        for node in &delta.added {
                            tracing::info!("Node joined ring: {}", node);
                        }
                        for node_id in &delta.removed {
                            tracing::info!("Node left ring: {}", node_id);
                            transport.close(node_id);
                        }
                        for node in &delta.moved {
                            tracing::info!("Node {} moved to {}", node.id(), node.peer_endpoint());
                            transport.close(node.id());
                        }
                    }
                    Err(e) => tracing::error!("Ring refresh failed: {}", e),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("Ring refresh loop stopped");
}

pub async fn eviction_loop(
    sweeper: Arc<EvictionSweeper>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(every);
    // First tick fires immediately; the first sweep waits a full interval.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match sweeper.sweep().await {
                    Ok(report) if report.evicted_blobs > 0 => tracing::info!(
                        "Eviction freed {} bytes ({} blobs)",
                        report.freed_bytes,
                        report.evicted_blobs
                    ),
                    Ok(_) => {}
                    Err(e) => tracing::error!("Eviction sweep failed: {}", e),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("Eviction loop stopped");
}

/// Drops expired values from the hosted store. Lazy expiry alone keeps
/// values for keys that are never read again.
pub async fn kv_purge_loop(
    store: Arc<MemoryKvStore>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let purged = store.purge_expired();
                if purged > 0 {
                    tracing::debug!("Purged {} expired shared store values", purged);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("Shared store purge loop stopped");
}
