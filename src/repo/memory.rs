// SPDX-License-Identifier: Apache-2.0, MIT

//! In-memory repository fakes. Used by the unit/integration test suite and
//! as the default store when no `rootDir` is configured (e.g. `--ephemeral`).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{status_as_str, status_from_str, DowntimeRepo, FeeRepo, MetricsRepo, NodeRepo,
    PayoutRepo, PingRepo, RecordRepo, RepoResult};
use crate::error::RepoError;
use crate::models::{
    Downtime, LatestBlockMetrics, Metrics, Node, Payout, Record, RecordStatus,
};

/// A thread-safe in-memory store, mirroring the shape of
/// `forest_db::memory::MemoryDB` but keyed by domain id rather than a byte
/// hash, since repositories here are typed rather than a raw KV blob store.
#[derive(Debug, Default, Clone)]
pub struct MemoryNodeRepo {
    nodes: Arc<RwLock<HashMap<String, Node>>>,
    whitelist: Arc<RwLock<Option<std::collections::HashSet<String>>>>,
}

impl MemoryNodeRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_whitelist(ids: impl IntoIterator<Item = String>) -> Self {
        let repo = Self::default();
        *repo.whitelist.write() = Some(ids.into_iter().collect());
        repo
    }
}

#[async_trait]
impl NodeRepo for MemoryNodeRepo {
    async fn find_by_id(&self, id: &str) -> RepoResult<Option<Node>> {
        Ok(self.nodes.read().get(id).cloned())
    }

    async fn get_all(&self) -> RepoResult<Vec<Node>> {
        Ok(self.nodes.read().values().cloned().collect())
    }

    async fn get_active_nodes(&self) -> RepoResult<Vec<Node>> {
        Ok(self
            .nodes
            .read()
            .values()
            .filter(|n| n.is_active_candidate())
            .cloned()
            .collect())
    }

    async fn get_penalized_nodes(&self) -> RepoResult<Vec<Node>> {
        Ok(self
            .nodes
            .read()
            .values()
            .filter(|n| n.penalized)
            .cloned()
            .collect())
    }

    async fn save(&self, node: Node) -> RepoResult<()> {
        self.nodes.write().insert(node.id.clone(), node);
        Ok(())
    }

    async fn penalize_node(&self, id: &str) -> RepoResult<Node> {
        let mut nodes = self.nodes.write();
        let node = nodes.get_mut(id).ok_or(RepoError::NotFound)?;
        node.penalty_count += 1;
        Ok(node.clone())
    }

    async fn reward_node(&self, id: &str, now: i64) -> RepoResult<()> {
        let mut nodes = self.nodes.write();
        let node = nodes.get_mut(id).ok_or(RepoError::NotFound)?;
        node.last_used = now;
        Ok(())
    }

    async fn is_node_whitelisted(&self, id: &str) -> RepoResult<bool> {
        Ok(match &*self.whitelist.read() {
            None => true,
            Some(set) => set.contains(id),
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryPingRepo {
    pings: Arc<RwLock<HashMap<String, i64>>>,
}

impl MemoryPingRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PingRepo for MemoryPingRepo {
    async fn find_by_node_id(&self, node_id: &str) -> RepoResult<Option<i64>> {
        Ok(self.pings.read().get(node_id).copied())
    }

    async fn save(&self, node_id: &str, timestamp: i64) -> RepoResult<()> {
        self.pings.write().insert(node_id.to_owned(), timestamp);
        Ok(())
    }

    async fn reset_all_pings(&self) -> RepoResult<()> {
        self.pings.write().clear();
        Ok(())
    }

    async fn calculate_downtime(&self, node_id: &str, now: i64) -> RepoResult<Option<i64>> {
        Ok(self.pings.read().get(node_id).map(|prev| now - prev))
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryMetricsRepo {
    latest: Arc<RwLock<HashMap<String, Metrics>>>,
}

impl MemoryMetricsRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricsRepo for MemoryMetricsRepo {
    async fn find_by_id(&self, node_id: &str) -> RepoResult<Option<Metrics>> {
        Ok(self.latest.read().get(node_id).copied())
    }

    async fn save(&self, node_id: &str, metrics: Metrics) -> RepoResult<()> {
        self.latest.write().insert(node_id.to_owned(), metrics);
        Ok(())
    }

    async fn get_latest_block_metrics(&self) -> RepoResult<Option<LatestBlockMetrics>> {
        let guard = self.latest.read();
        let best = guard.values().max_by_key(|m| m.best_block_height);
        let Some(best) = best else {
            return Ok(None);
        };
        let finalized_max = guard
            .values()
            .map(|m| m.finalized_block_height)
            .max()
            .unwrap_or(best.finalized_block_height);
        Ok(Some(LatestBlockMetrics {
            best_block_height: best.best_block_height,
            finalized_block_height: finalized_max,
            timestamp: best.timestamp,
        }))
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryDowntimeRepo {
    rows: Arc<RwLock<Vec<Downtime>>>,
}

impl MemoryDowntimeRepo {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn all(&self) -> Vec<Downtime> {
        self.rows.read().clone()
    }
}

#[async_trait]
impl DowntimeRepo for MemoryDowntimeRepo {
    async fn save(&self, downtime: Downtime) -> RepoResult<()> {
        self.rows.write().push(downtime);
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryRecordRepo {
    rows: Arc<RwLock<Vec<Record>>>,
}

impl MemoryRecordRepo {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn all(&self) -> Vec<Record> {
        self.rows.read().clone()
    }
}

#[async_trait]
impl RecordRepo for MemoryRecordRepo {
    async fn save(&self, record: Record) -> RepoResult<()> {
        // round-trip the status through the same string encoding the sqlite
        // backend uses, so fake and real repos agree on serialization edge
        // cases (e.g. unknown values decode as `Failed`).
        let encoded = status_as_str(record.status);
        let mut record = record;
        record.status = status_from_str(encoded);
        self.rows.write().push(record);
        Ok(())
    }

    async fn count_failed(&self, node_id: &str) -> RepoResult<u64> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|r| r.node_id == node_id && r.status == RecordStatus::Failed)
            .count() as u64)
    }

    async fn count_successful(&self, node_id: &str) -> RepoResult<u64> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|r| r.node_id == node_id && r.status == RecordStatus::Successful)
            .count() as u64)
    }

    async fn find_successful_records_inside_interval(
        &self,
        start: i64,
        end: i64,
    ) -> RepoResult<Vec<Record>> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|r| {
                r.status == RecordStatus::Successful && r.timestamp >= start && r.timestamp < end
            })
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryPayoutRepo {
    rows: Arc<RwLock<Vec<Payout>>>,
}

impl MemoryPayoutRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PayoutRepo for MemoryPayoutRepo {
    async fn get_all(&self) -> RepoResult<Vec<Payout>> {
        Ok(self.rows.read().clone())
    }

    async fn save(&self, payout: Payout) -> RepoResult<()> {
        self.rows.write().push(payout);
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryFeeRepo {
    balance: Arc<RwLock<f64>>,
}

impl MemoryFeeRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeeRepo for MemoryFeeRepo {
    async fn accumulate(&self, amount: f64) -> RepoResult<()> {
        *self.balance.write() += amount;
        Ok(())
    }

    async fn settle(&self) -> RepoResult<f64> {
        let mut guard = self.balance.write();
        let value = *guard;
        *guard = 0.0;
        Ok(value)
    }
}
