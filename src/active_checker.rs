// SPDX-License-Identifier: Apache-2.0, MIT

//! Periodic sweep over all non-penalized nodes, applying [`health::evaluate`]
//! and handing verdicts of `Inactive` to the [`PenaltyScheduler`]. Sweeps are
//! serialized with each other (an async mutex around the sweep body) but may
//! run concurrently with the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::health::{self, Verdict};
use crate::models::LatestBlockMetrics;
use crate::penalty::PenaltyScheduler;
use crate::repo::{MetricsRepo, NodeRepo, PingRepo};

pub struct ActiveChecker {
    node_repo: Arc<dyn NodeRepo>,
    ping_repo: Arc<dyn PingRepo>,
    metrics_repo: Arc<dyn MetricsRepo>,
    penalty: Arc<PenaltyScheduler>,
    sweep_lock: Mutex<()>,
}

impl ActiveChecker {
    pub fn new(
        node_repo: Arc<dyn NodeRepo>,
        ping_repo: Arc<dyn PingRepo>,
        metrics_repo: Arc<dyn MetricsRepo>,
        penalty: Arc<PenaltyScheduler>,
    ) -> Self {
        Self {
            node_repo,
            ping_repo,
            metrics_repo,
            penalty,
            sweep_lock: Mutex::new(()),
        }
    }

    /// Runs one full sweep. Node-level repository errors are logged and
    /// skipped rather than aborting the rest of the sweep.
    pub async fn sweep(&self, now: i64) {
        let _guard = self.sweep_lock.lock().await;

        let pool_best = match self.metrics_repo.get_latest_block_metrics().await {
            Ok(Some(best)) => best,
            Ok(None) => return,
            Err(err) => {
                error!(error = %err, "active checker: failed to read pool-wide metrics");
                return;
            }
        };

        let nodes = match self.node_repo.get_all().await {
            Ok(nodes) => nodes,
            Err(err) => {
                error!(error = %err, "active checker: failed to list nodes");
                return;
            }
        };

        for node in nodes.into_iter().filter(|n| !n.penalized) {
            if let Err(err) = self.check_one(&node.id, &pool_best, now).await {
                warn!(node_id = %node.id, error = %err, "active checker: node check failed");
            }
        }
    }

    async fn check_one(
        &self,
        node_id: &str,
        pool_best: &LatestBlockMetrics,
        now: i64,
    ) -> anyhow::Result<()> {
        let last_ping = self.ping_repo.find_by_node_id(node_id).await?;
        let metrics = self.metrics_repo.find_by_id(node_id).await?;

        let verdict = match &metrics {
            Some(m) => health::evaluate(last_ping, m, pool_best, now),
            None => Verdict::Inactive,
        };

        if verdict == Verdict::Inactive {
            self.penalty.penalize(node_id, now).await?;
        }
        Ok(())
    }

    /// Runs [`Self::sweep`] on a `period`-second interval forever. Intended
    /// to be spawned as a detached background task.
    pub async fn run_forever(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now().timestamp();
            self.sweep(now).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metrics, Node};
    use crate::repo::memory::{MemoryMetricsRepo, MemoryNodeRepo, MemoryPingRepo};

    async fn setup() -> (Arc<MemoryNodeRepo>, ActiveChecker) {
        let node_repo = Arc::new(MemoryNodeRepo::new());
        let ping_repo = Arc::new(MemoryPingRepo::new());
        let metrics_repo = Arc::new(MemoryMetricsRepo::new());
        let telemetry = Arc::new(crate::telemetry::Telemetry::new());
        let penalty = Arc::new(PenaltyScheduler::new(
            node_repo.clone(),
            ping_repo.clone(),
            metrics_repo.clone(),
            telemetry,
        ));
        let checker = ActiveChecker::new(node_repo.clone(), ping_repo, metrics_repo, penalty);
        (node_repo, checker)
    }

    #[tokio::test]
    async fn stale_node_gets_penalized() {
        let (node_repo, checker) = setup().await;
        node_repo
            .save(Node {
                id: "n1".into(),
                node_url: "u".into(),
                config_hash: "c".into(),
                payout_address: "p".into(),
                token: "t".into(),
                last_used: 0,
                penalized: false,
                penalty_count: 0,
                cooldown: 0,
            })
            .await
            .unwrap();
        // a pool-best has to exist for the sweep to do anything; n1 itself
        // has no ping and no metrics recorded, so it reads as inactive.
        checker
            .metrics_repo
            .save(
                "other",
                Metrics {
                    peer_count: 1,
                    best_block_height: 100,
                    finalized_block_height: 100,
                    target_block_height: 100,
                    ready_transaction_count: 0,
                    timestamp: 0,
                },
            )
            .await
            .unwrap();

        checker.sweep(1000).await;
        let node = node_repo.find_by_id("n1").await.unwrap().unwrap();
        assert!(node.penalized);
    }
}
