//! Peer Tier
//!
//! Node-to-node artifact sharing. Before going to the origin, a node asks the
//! siblings the hash ring names for the key; they answer from their own
//! cache tiers and disk only.
//!
//! - **`protocol`**: endpoints and DTOs.
//! - **`client`**: `PeerTransport` and its HTTP implementation.
//! - **`coordinator`**: ring-ordered sequential fallback across candidates.
//! - **`handlers`**: the serving side.

pub mod client;
pub mod coordinator;
pub mod handlers;
pub mod protocol;

#[cfg(test)]
mod tests;

pub use client::{HttpPeerClient, PeerTransport};
pub use coordinator::PeerCoordinator;
pub use handlers::PeerServiceState;

use axum::{Extension, Router, routing::get};
use std::sync::Arc;

pub fn peer_router(state: Arc<PeerServiceState>) -> Router {
    Router::new()
        .route(protocol::ENDPOINT_PEER_HEALTH, get(handlers::handle_health))
        .route(protocol::ENDPOINT_PEER_INFO, get(handlers::handle_info))
        .route(
            protocol::ENDPOINT_PEER_MANIFEST,
            get(handlers::handle_get_manifest),
        )
        .route(
            protocol::ENDPOINT_PEER_MANIFEST_EXISTS,
            get(handlers::handle_manifest_exists),
        )
        .route(
            "/internal/peer/blobs/:digest",
            get(handlers::handle_get_blob),
        )
        .route(
            "/internal/peer/blobs/:digest/exists",
            get(handlers::handle_blob_exists),
        )
        .layer(Extension(state))
}
