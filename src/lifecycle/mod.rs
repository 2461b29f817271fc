//! Node Lifecycle
//!
//! Startup wiring, the HTTP surfaces, background loops and the graceful
//! shutdown sequence.
//!
//! - **`context`**: `StationContext`, every component built from config.
//! - **`tasks`**: ring refresh, heartbeat and eviction loops under one
//!   shutdown signal.
//! - **`health`**: liveness and readiness probes.
//!
//! Shutdown order: mark draining (readiness fails, heartbeats stop), wait
//! the grace window, stop the loops, close peer connections, deregister.

pub mod context;
pub mod health;
pub mod tasks;


pub use context::StationContext;
pub use tasks::BackgroundTasks;

use crate::kv::handlers::handle_kv_command;
use crate::kv::protocol::ENDPOINT_KV;
use crate::peer::peer_router;
use crate::registry::registry_router;
use health::ProbeState;

use axum::{
    Extension, Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;

pub const ENDPOINT_HEALTH: &str = "/health";
pub const ENDPOINT_READY: &str = "/ready";

/// Client-facing listener: the registry API plus the probes.
pub fn control_router(ctx: &StationContext) -> Router {
    let probes = Arc::new(ProbeState {
        membership: ctx.membership.clone(),
        kv: ctx.kv.clone(),
    });

    registry_router(ctx.pipeline.clone()).merge(
        Router::new()
            .route(ENDPOINT_HEALTH, get(health::handle_health))
            .route(ENDPOINT_READY, get(health::handle_ready))
            .layer(Extension(probes)),
    )
}

/// Node-to-node listener: peer RPC, plus the shared store when hosted here.
pub fn internal_router(ctx: &StationContext) -> Router {
    let router = peer_router(ctx.peer_state());
    if !ctx.hosts_kv() {
        return router;
    }

    router.merge(
        Router::new()
            .route(ENDPOINT_KV, post(handle_kv_command))
            .layer(Extension(ctx.kv.clone())),
    )
}

/// Leaves the cluster cleanly. Safe to call with listeners still open; the
/// caller stops them afterwards.
pub async fn shutdown(ctx: &StationContext, tasks: BackgroundTasks) {
    tracing::info!("Shutting down node {}", ctx.membership.local_id());

    if let Err(e) = ctx.membership.mark_draining().await {
        tracing::warn!("Failed to publish draining status: {}", e);
    }

    let grace = Duration::from_secs(ctx.config.node.shutdown_grace_secs);
    if !grace.is_zero() {
        tracing::info!("Waiting {:?} for in-flight requests", grace);
        tokio::time::sleep(grace).await;
    }

    tasks.stop().await;
    ctx.transport.close_all();

    if let Err(e) = ctx.membership.deregister().await {
        tracing::warn!("Failed to deregister: {}", e);
    }
    tracing::info!("Shutdown complete");
}
