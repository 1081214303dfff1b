// SPDX-License-Identifier: Apache-2.0, MIT

//! Domain types shared by the repository layer, the core schedulers, and the
//! HTTP surface. Kept free of any particular storage engine's vocabulary.

use serde::{Deserialize, Serialize};

/// A registered backend node.
///
/// Invariant: a node with `penalized == true` is never returned by
/// [`crate::repo::NodeRepo::get_active_nodes`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: String,
    pub node_url: String,
    pub config_hash: String,
    pub payout_address: String,
    pub token: String,
    pub last_used: i64,
    pub penalized: bool,
    pub penalty_count: u32,
    /// Unix timestamp the cool-down expires at; zero means none.
    pub cooldown: i64,
}

impl Node {
    pub fn is_active_candidate(&self) -> bool {
        !self.penalized
    }
}

/// Most recent heartbeat for a node. At most one row per node id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ping {
    pub node_id: String,
    pub timestamp: i64,
}

/// Latest sync-status snapshot reported by a node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub peer_count: u64,
    pub best_block_height: i64,
    pub finalized_block_height: i64,
    pub target_block_height: i64,
    pub ready_transaction_count: u64,
    pub timestamp: i64,
}

/// Pool-wide maximum of `best`/`finalized` block height, with the timestamp
/// of the observation used to compute it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LatestBlockMetrics {
    pub best_block_height: i64,
    pub finalized_block_height: i64,
    pub timestamp: i64,
}

/// A closed downtime interval appended whenever a ping arrives more than
/// `PingTTL` after the previous one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Downtime {
    pub node_id: String,
    pub start: i64,
    pub end: i64,
    pub duration_secs: i64,
}

/// Outcome of the request a node was asked to serve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Successful,
    Failed,
}

/// Append-only accounting record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub node_id: String,
    pub timestamp: i64,
    pub status: RecordStatus,
}

/// A settlement event. At least one row always exists after startup so
/// subsequent payouts have a well-defined "since" anchor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payout {
    pub timestamp: i64,
    pub payment_details: String,
}

/// `{address, amount}` tuple handed to the external payout executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayoutLine {
    pub address: String,
    pub amount: f64,
}
