use super::KvStore;
use super::protocol::{ENDPOINT_KV, KvCommand, KvReply};
use crate::error::{StationError, StationResult};
use crate::net::post_with_retry;

use async_trait::async_trait;
use std::time::Duration;

const KV_TIMEOUT: Duration = Duration::from_secs(2);
const KV_ATTEMPTS: usize = 3;

/// Client for a store hosted by another node.
///
/// Plain commands are retried on transport errors. Conditional commands are
/// sent once: a retried `SetIfAbsent` whose first attempt was applied would
/// answer `false` to the node that holds the key.
pub struct RemoteKvStore {
    url: String,
    http_client: reqwest::Client,
    timeout: Duration,
}

impl RemoteKvStore {
    pub fn new(endpoint: &str) -> Self {
        Self::with_timeout(endpoint, KV_TIMEOUT)
    }

    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Self {
        let endpoint = endpoint.trim_end_matches('/');
        let base = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("http://{}", endpoint)
        };

        Self {
            url: format!("{}{}", base, ENDPOINT_KV),
            http_client: reqwest::Client::new(),
            timeout,
        }
    }

    async fn send(&self, command: KvCommand) -> StationResult<KvReply> {
        self.send_attempts(&command, KV_ATTEMPTS).await
    }

    async fn send_attempts(&self, command: &KvCommand, attempts: usize) -> StationResult<KvReply> {
        let response = post_with_retry(
            &self.http_client,
            &self.url,
            command,
            self.timeout,
            attempts,
        )
        .await
        .map_err(|e| StationError::SharedStore(e.to_string()))?;

        let status = response.status();
        let reply: KvReply = response
            .json()
            .await
            .map_err(|e| StationError::SharedStore(format!("bad reply ({}): {}", status, e)))?;

        match reply {
            KvReply::Error { message } => Err(StationError::SharedStore(message)),
            reply => Ok(reply),
        }
    }

    async fn applied(&self, command: KvCommand) -> StationResult<bool> {
        match self.send(command).await? {
            KvReply::Applied { applied } => Ok(applied),
            other => Err(unexpected(other)),
        }
    }

    /// Sends a conditional command once. `None` means the outcome is unknown:
    /// the command may have been applied before the reply was lost.
    async fn applied_once(&self, command: &KvCommand) -> StationResult<Option<bool>> {
        match self.send_attempts(command, 1).await {
            Ok(KvReply::Applied { applied }) => Ok(Some(applied)),
            Ok(other) => Err(unexpected(other)),
            Err(e) => {
                tracing::warn!("Conditional shared store command without reply: {}", e);
                Ok(None)
            }
        }
    }
}

fn unexpected(reply: KvReply) -> StationError {
    StationError::SharedStore(format!("unexpected reply: {:?}", reply))
}

fn ttl_ms(ttl: Duration) -> u64 {
    ttl.as_millis().min(u64::MAX as u128) as u64
}

#[async_trait]
impl KvStore for RemoteKvStore {
    async fn get(&self, key: &str) -> StationResult<Option<Vec<u8>>> {
        match self.send(KvCommand::Get { key: key.to_string() }).await? {
            KvReply::Value { value_hex: None } => Ok(None),
            KvReply::Value {
                value_hex: Some(hex_value),
            } => hex::decode(hex_value)
                .map(Some)
                .map_err(|e| StationError::SharedStore(e.to_string())),
            other => Err(unexpected(other)),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StationResult<()> {
        match self
            .send(KvCommand::Set {
                key: key.to_string(),
                value_hex: hex::encode(value),
                ttl_ms: ttl.map(ttl_ms),
            })
            .await?
        {
            KvReply::Applied { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> StationResult<bool> {
        let command = KvCommand::SetIfAbsent {
            key: key.to_string(),
            value_hex: hex::encode(&value),
            ttl_ms: ttl_ms(ttl),
        };
        match self.applied_once(&command).await? {
            Some(applied) => Ok(applied),
            // Ours if the key now holds our value.
            None => Ok(self.get(key).await?.as_deref() == Some(value.as_slice())),
        }
    }

    async fn delete(&self, key: &str) -> StationResult<bool> {
        self.applied(KvCommand::Delete { key: key.to_string() })
            .await
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> StationResult<bool> {
        let command = KvCommand::DeleteIfEquals {
            key: key.to_string(),
            expected_hex: hex::encode(expected),
        };
        match self.applied_once(&command).await? {
            Some(applied) => Ok(applied),
            None => match self.get(key).await? {
                None => Ok(true),
                Some(current) if current == expected => self.applied(command).await,
                Some(_) => Ok(false),
            },
        }
    }

    async fn set_add(&self, set: &str, member: &str) -> StationResult<bool> {
        self.applied(KvCommand::SetAdd {
            set: set.to_string(),
            member: member.to_string(),
        })
        .await
    }

    async fn set_remove(&self, set: &str, member: &str) -> StationResult<bool> {
        self.applied(KvCommand::SetRemove {
            set: set.to_string(),
            member: member.to_string(),
        })
        .await
    }

    async fn set_members(&self, set: &str) -> StationResult<Vec<String>> {
        match self.send(KvCommand::SetMembers { set: set.to_string() }).await? {
            KvReply::Members { members } => Ok(members),
            other => Err(unexpected(other)),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> StationResult<usize> {
        match self
            .send(KvCommand::DeletePrefix {
                prefix: prefix.to_string(),
            })
            .await?
        {
            KvReply::Removed { count } => Ok(count),
            other => Err(unexpected(other)),
        }
    }

    async fn ping(&self) -> StationResult<()> {
        match self.send(KvCommand::Ping).await? {
            KvReply::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}
