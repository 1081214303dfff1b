// SPDX-License-Identifier: Apache-2.0, MIT

//! Repository interfaces. These are the only shared mutable state in the
//! system (see §5 of `SPEC_FULL.md`): all cross-task coordination passes
//! through them, never through shared `Node` references.
//!
//! Two implementations ship: [`memory`] (in-process fakes used by tests and
//! the default boot path) and [`sqlite`] (the production, single-file,
//! `rootDir`-resident store).

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::RepoError;
use crate::models::{Downtime, LatestBlockMetrics, Metrics, Node, Payout, Record, RecordStatus};

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait NodeRepo: Send + Sync {
    async fn find_by_id(&self, id: &str) -> RepoResult<Option<Node>>;
    async fn get_all(&self) -> RepoResult<Vec<Node>>;
    /// Non-penalized nodes, in an arbitrary order (callers sort). A node
    /// found down by the active-checker sweep is penalized before it would
    /// otherwise be excluded here, so this alone is the full "active" set.
    async fn get_active_nodes(&self) -> RepoResult<Vec<Node>>;
    async fn get_penalized_nodes(&self) -> RepoResult<Vec<Node>>;
    async fn save(&self, node: Node) -> RepoResult<()>;
    /// Nudges the node towards penalization; returns the node's state after
    /// the nudge so the caller (the penalty scheduler) can decide whether a
    /// threshold was crossed.
    async fn penalize_node(&self, id: &str) -> RepoResult<Node>;
    async fn reward_node(&self, id: &str, now: i64) -> RepoResult<()>;
    async fn is_node_whitelisted(&self, id: &str) -> RepoResult<bool>;
}

#[async_trait]
pub trait PingRepo: Send + Sync {
    async fn find_by_node_id(&self, node_id: &str) -> RepoResult<Option<i64>>;
    async fn save(&self, node_id: &str, timestamp: i64) -> RepoResult<()>;
    async fn reset_all_pings(&self) -> RepoResult<()>;
    /// `None` when there was no previous ping (first heartbeat ever).
    async fn calculate_downtime(&self, node_id: &str, now: i64) -> RepoResult<Option<i64>>;
}

#[async_trait]
pub trait MetricsRepo: Send + Sync {
    async fn find_by_id(&self, node_id: &str) -> RepoResult<Option<Metrics>>;
    async fn save(&self, node_id: &str, metrics: Metrics) -> RepoResult<()>;
    async fn get_latest_block_metrics(&self) -> RepoResult<Option<LatestBlockMetrics>>;
}

#[async_trait]
pub trait DowntimeRepo: Send + Sync {
    async fn save(&self, downtime: Downtime) -> RepoResult<()>;
}

#[async_trait]
pub trait RecordRepo: Send + Sync {
    async fn save(&self, record: Record) -> RepoResult<()>;
    async fn count_failed(&self, node_id: &str) -> RepoResult<u64>;
    async fn count_successful(&self, node_id: &str) -> RepoResult<u64>;
    async fn find_successful_records_inside_interval(
        &self,
        start: i64,
        end: i64,
    ) -> RepoResult<Vec<Record>>;
}

#[async_trait]
pub trait PayoutRepo: Send + Sync {
    async fn get_all(&self) -> RepoResult<Vec<Payout>>;
    async fn save(&self, payout: Payout) -> RepoResult<()>;
}

#[async_trait]
pub trait FeeRepo: Send + Sync {
    async fn accumulate(&self, amount: f64) -> RepoResult<()>;
    /// Reads the current balance and resets it to zero, atomically.
    async fn settle(&self) -> RepoResult<f64>;
}

/// Helper shared by both repo implementations: a record's status as a
/// narrow string for storage, round-tripping through [`RecordStatus`].
pub(crate) fn status_as_str(status: RecordStatus) -> &'static str {
    match status {
        RecordStatus::Successful => "successful",
        RecordStatus::Failed => "failed",
    }
}

pub(crate) fn status_from_str(s: &str) -> RecordStatus {
    match s {
        "successful" => RecordStatus::Successful,
        _ => RecordStatus::Failed,
    }
}
