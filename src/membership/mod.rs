//! Membership & Discovery Module
//!
//! Tracks which nodes form the cluster and feeds the hash ring.
//!
//! ## Core Mechanisms
//! - **Registration**: a node publishes a TTL-bound record of itself and keeps
//!   it alive with heartbeats. Readers drop records whose heartbeat is older
//!   than the node timeout.
//! - **Draining**: a leaving node marks itself `Draining` (terminal), stops
//!   heartbeating and falls off every ring at the next refresh.
//! - **Pluggable sources**: the shared-store registry, or a static seed list
//!   whose members are probed over the peer API.

pub mod discovery;
pub mod service;
pub mod types;
