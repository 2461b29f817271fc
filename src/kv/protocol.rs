//! Shared Store Network Protocol
//!
//! A node that hosts the embedded store accepts these commands on
//! `ENDPOINT_KV`. Values travel hex-encoded inside JSON.

use serde::{Deserialize, Serialize};

pub const ENDPOINT_KV: &str = "/internal/kv";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum KvCommand {
    Get {
        key: String,
    },
    Set {
        key: String,
        value_hex: String,
        ttl_ms: Option<u64>,
    },
    SetIfAbsent {
        key: String,
        value_hex: String,
        ttl_ms: u64,
    },
    Delete {
        key: String,
    },
    DeleteIfEquals {
        key: String,
        expected_hex: String,
    },
    SetAdd {
        set: String,
        member: String,
    },
    SetRemove {
        set: String,
        member: String,
    },
    SetMembers {
        set: String,
    },
    DeletePrefix {
        prefix: String,
    },
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum KvReply {
    Value { value_hex: Option<String> },
    Applied { applied: bool },
    Members { members: Vec<String> },
    Removed { count: usize },
    Pong,
    Error { message: String },
}
