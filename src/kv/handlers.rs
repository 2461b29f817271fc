use super::KvStore;
use super::protocol::{KvCommand, KvReply};
use crate::error::{StationError, StationResult};

use axum::{Json, extract::Extension, http::StatusCode};
use std::sync::Arc;
use std::time::Duration;

pub async fn handle_kv_command(
    Extension(store): Extension<Arc<dyn KvStore>>,
    Json(command): Json<KvCommand>,
) -> (StatusCode, Json<KvReply>) {
    match execute(store.as_ref(), command).await {
        Ok(reply) => (StatusCode::OK, Json(reply)),
        Err(e) => {
            tracing::error!("Shared store command failed: {}", e);
            let status = match e {
                StationError::SharedStore(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(KvReply::Error {
                    message: e.to_string(),
                }),
            )
        }
    }
}

/// Applies one command to the local store.
pub async fn execute(store: &dyn KvStore, command: KvCommand) -> StationResult<KvReply> {
    let reply = match command {
        KvCommand::Get { key } => KvReply::Value {
            value_hex: store.get(&key).await?.map(hex::encode),
        },
        KvCommand::Set {
            key,
            value_hex,
            ttl_ms,
        } => {
            store
                .set(&key, decode(&value_hex)?, ttl_ms.map(Duration::from_millis))
                .await?;
            KvReply::Applied { applied: true }
        }
        KvCommand::SetIfAbsent {
            key,
            value_hex,
            ttl_ms,
        } => KvReply::Applied {
            applied: store
                .set_if_absent(&key, decode(&value_hex)?, Duration::from_millis(ttl_ms))
                .await?,
        },
        KvCommand::Delete { key } => KvReply::Applied {
            applied: store.delete(&key).await?,
        },
        KvCommand::DeleteIfEquals { key, expected_hex } => KvReply::Applied {
            applied: store
                .delete_if_equals(&key, &decode(&expected_hex)?)
                .await?,
        },
        KvCommand::SetAdd { set, member } => KvReply::Applied {
            applied: store.set_add(&set, &member).await?,
        },
        KvCommand::SetRemove { set, member } => KvReply::Applied {
            applied: store.set_remove(&set, &member).await?,
        },
        KvCommand::SetMembers { set } => KvReply::Members {
            members: store.set_members(&set).await?,
        },
        KvCommand::DeletePrefix { prefix } => KvReply::Removed {
            count: store.delete_prefix(&prefix).await?,
        },
        KvCommand::Ping => {
            store.ping().await?;
            KvReply::Pong
        }
    };

    Ok(reply)
}

fn decode(value_hex: &str) -> StationResult<Vec<u8>> {
    hex::decode(value_hex).map_err(|e| StationError::SharedStore(format!("bad hex value: {}", e)))
}
