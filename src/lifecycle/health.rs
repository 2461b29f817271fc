use crate::kv::KvStore;
use crate::membership::service::MembershipService;
use crate::membership::types::NodeStatus;

use axum::{Json, extract::Extension, http::StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What the readiness probe needs to decide whether to take traffic.
pub struct ProbeState {
    pub membership: Arc<MembershipService>,
    pub kv: Arc<dyn KvStore>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub status: String,
    pub node_id: String,
    pub node_status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Liveness: the process is up and serving HTTP.
pub async fn handle_health(
    Extension(state): Extension<Arc<ProbeState>>,
) -> (StatusCode, Json<ProbeResponse>) {
    (StatusCode::OK, Json(response(&state, "UP", None)))
}

/// Readiness: DOWN while draining or while the shared store is unreachable.
pub async fn handle_ready(
    Extension(state): Extension<Arc<ProbeState>>,
) -> (StatusCode, Json<ProbeResponse>) {
    if state.membership.is_draining() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(response(&state, "DOWN", Some("draining".into()))),
        );
    }

    match state.kv.ping().await {
        Ok(()) => {
            state.membership.set_health(true);
            (StatusCode::OK, Json(response(&state, "UP", None)))
        }
        Err(e) => {
            tracing::warn!("Readiness check failed: {}", e);
            state.membership.set_health(false);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(response(&state, "DOWN", Some(e.to_string()))),
            )
        }
    }
}

fn response(state: &ProbeState, status: &str, reason: Option<String>) -> ProbeResponse {
    ProbeResponse {
        status: status.to_string(),
        node_id: state.membership.local_id().to_string(),
        node_status: state.membership.status(),
        reason,
    }
}
