//! Registry Station Library
//!
//! A cluster of nodes acting as one pull-through cache in front of an
//! upstream container registry. This crate holds everything the `station`
//! binary (`main.rs`) wires together.
//!
//! ## Architecture Modules
//! A registry request walks four tiers, cheapest first:
//!
//! - **`cache`**: in-process LRU in front of a cluster-wide tier kept in the
//!   shared store.
//! - **`storage`**: the node's durable disk copy, with periodic eviction.
//! - **`peer`**: siblings chosen by the hash ring, asked one at a time.
//! - **`origin`**: the upstream registry, fetched under a cluster lock.
//!
//! The tiers are composed by **`pipeline`** and exposed by **`registry`**.
//! Coordination lives in **`kv`** (shared store), **`lock`**, **`ring`**
//! (consistent hashing) and **`membership`** (discovery, heartbeats,
//! draining). **`lifecycle`** builds a node and shuts it down cleanly.

pub mod cache;
pub mod config;
pub mod error;
pub mod kv;
pub mod lifecycle;
pub mod lock;
pub mod logging;
pub mod membership;
pub mod net;
pub mod origin;
pub mod peer;
pub mod pipeline;
pub mod registry;
pub mod ring;
pub mod storage;

#[cfg(test)]
pub mod testing;
