use crate::cache::TierCache;
use crate::config::{DiscoveryKind, StationConfig};
use crate::error::StationResult;
use crate::kv::KvStore;
use crate::kv::memory::MemoryKvStore;
use crate::kv::remote::RemoteKvStore;
use crate::lock::DistributedLock;
use crate::membership::discovery::{NodeDiscovery, RegistryDiscovery, StaticDiscovery};
use crate::membership::service::{MembershipService, RegistrationPolicy};
use crate::membership::types::{NodeId, NodeIdentity};
use crate::origin::{OriginClient, RegistryOriginClient};
use crate::peer::{HttpPeerClient, PeerCoordinator, PeerServiceState, PeerTransport};
use crate::pipeline::ResolutionPipeline;
use crate::ring::RingManager;
use crate::storage::FilesystemStorage;
use crate::storage::eviction::EvictionSweeper;

use std::sync::Arc;
use std::time::Duration;

const PEER_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Every long-lived component of a node, built once at startup and handed
/// to the routers and background tasks.
pub struct StationContext {
    pub config: StationConfig,
    pub kv: Arc<dyn KvStore>,
    /// The embedded store, when this node hosts it for the cluster.
    pub hosted_kv: Option<Arc<MemoryKvStore>>,
    pub membership: Arc<MembershipService>,
    pub ring: Arc<RingManager>,
    pub cache: Arc<TierCache>,
    pub storage: Arc<FilesystemStorage>,
    pub transport: Arc<dyn PeerTransport>,
    pub pipeline: Arc<ResolutionPipeline>,
    pub eviction: Option<Arc<EvictionSweeper>>,
}

impl StationContext {
    pub async fn build(config: StationConfig) -> StationResult<Self> {
        config.validate()?;

        let identity = local_identity(&config);
        let node_id = identity.id().clone();
        tracing::info!(
            "Node {} (peer {}, registry {})",
            node_id,
            identity.peer_endpoint(),
            identity.control_endpoint()
        );

        let (kv, hosted_kv): (Arc<dyn KvStore>, _) = match &config.discovery.kv_endpoint {
            Some(endpoint) => {
                tracing::info!("Using shared store hosted at {}", endpoint);
                (Arc::new(RemoteKvStore::new(endpoint)), None)
            }
            None => {
                tracing::info!("Hosting the shared store on this node");
                let store = Arc::new(MemoryKvStore::new());
                (store.clone(), Some(store))
            }
        };

        let transport: Arc<dyn PeerTransport> = Arc::new(HttpPeerClient::new(PEER_REQUEST_TIMEOUT));

        let discovery: Arc<dyn NodeDiscovery> = match config.discovery.kind {
            DiscoveryKind::Registry => Arc::new(RegistryDiscovery::new(
                kv.clone(),
                config.discovery.node_timeout(),
            )),
            DiscoveryKind::Static => Arc::new(StaticDiscovery::new(
                config.discovery.seeds.clone(),
                transport.clone(),
            )),
        };
        let membership = Arc::new(MembershipService::new(
            identity,
            discovery,
            RegistrationPolicy::from_config(&config.discovery),
        ));

        let ring = Arc::new(RingManager::new(config.coordination.virtual_nodes));
        let cache = Arc::new(TierCache::from_config(
            node_id.as_str(),
            kv.clone(),
            &config.cache,
        ));
        let storage = Arc::new(
            FilesystemStorage::open(&config.storage.base_path, config.storage.chunk_size).await?,
        );
        let lock = Arc::new(DistributedLock::new(
            kv.clone(),
            node_id.as_str(),
            Duration::from_secs(config.coordination.lock_ttl_secs),
        ));
        let peers = Arc::new(PeerCoordinator::new(
            node_id.clone(),
            ring.clone(),
            transport.clone(),
            config.coordination.peer_fanout,
        ));
        let origin: Arc<dyn OriginClient> = Arc::new(RegistryOriginClient::new(&config.origin)?);

        let pipeline = Arc::new(ResolutionPipeline::new(
            cache.clone(),
            storage.clone(),
            storage.clone(),
            peers,
            lock,
            origin,
        ));

        let eviction = config.eviction.enabled.then(|| {
            Arc::new(EvictionSweeper::new(storage.clone(), &config.eviction).with_cache(cache.clone()))
        });

        Ok(Self {
            config,
            kv,
            hosted_kv,
            membership,
            ring,
            cache,
            storage,
            transport,
            pipeline,
            eviction,
        })
    }

    pub fn hosts_kv(&self) -> bool {
        self.hosted_kv.is_some()
    }

    pub fn peer_state(&self) -> Arc<PeerServiceState> {
        Arc::new(PeerServiceState {
            membership: self.membership.clone(),
            cache: self.cache.clone(),
            blobs: self.storage.clone(),
            manifests: self.storage.clone(),
            capacity_bytes: self.config.eviction.capacity_bytes,
        })
    }

    /// Joins the cluster and seeds the ring before traffic is accepted.
    pub async fn join(&self) -> StationResult<()> {
        self.membership.register_self().await?;
        let delta = self.membership.refresh_ring(&self.ring).await?;
        tracing::info!(
            "Joined cluster: {} nodes in ring ({} peers added)",
            self.ring.node_count(),
            delta.added.len()
        );
        Ok(())
    }
}

/// Identity advertised to peers. The host falls back to `$HOSTNAME`, which
/// resolves inside container networks, and then to loopback.
pub fn local_identity(config: &StationConfig) -> NodeIdentity {
    let node_id = config
        .node
        .id
        .clone()
        .map(NodeId)
        .unwrap_or_else(NodeId::new);
    let host = config
        .node
        .advertise_host
        .clone()
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
        .unwrap_or_else(|| "127.0.0.1".to_string());

    NodeIdentity::new(
        node_id,
        &host,
        config.node.peer_bind.port(),
        config.node.bind.port(),
    )
}
