// SPDX-License-Identifier: Apache-2.0, MIT

//! Penalty state machine: `Healthy -> Penalized -> Cooldown -> (Healthy |
//! Penalized)`. Cool-down wake-ups are wall-clock based and re-armed from
//! the `Node.cooldown` column on every boot, so they survive a restart (see
//! the scheduled-task-persistence design note).

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::health::{self, Verdict};
use crate::models::{LatestBlockMetrics, Node};
use crate::repo::{MetricsRepo, NodeRepo, PingRepo};
use crate::telemetry::SharedTelemetry;

/// Dispatch failures a node must accrue via [`PenaltyScheduler::record_failure`]
/// before it is actually demoted. A single transient timeout during normal
/// candidate fallback shouldn't evict an otherwise-healthy node from the
/// active pool (spec §4.5's "nudge" vs. threshold-crossing distinction).
pub const FAILURE_THRESHOLD: u32 = 3;

/// Base cool-down for the first penalty.
pub const BASE_COOLDOWN_SECS: i64 = 30;
/// Hard cap on cool-down duration regardless of penalty count.
pub const MAX_COOLDOWN_SECS: i64 = 3_600;

/// `cooldown(n) = min(BaseCooldown * 2^(n-1), MaxCooldown)`, `n >= 1`.
///
/// Nondecreasing and capped, as the spec requires; the exact growth curve
/// (exponential rather than e.g. linear) is an implementer's choice pinned
/// here and covered by the tests below.
pub fn cooldown_for(penalty_count: u32) -> i64 {
    let n = penalty_count.max(1);
    let scaled = (BASE_COOLDOWN_SECS as i128) << (n - 1).min(32);
    scaled.min(MAX_COOLDOWN_SECS as i128) as i64
}

pub struct PenaltyScheduler {
    node_repo: Arc<dyn NodeRepo>,
    ping_repo: Arc<dyn PingRepo>,
    metrics_repo: Arc<dyn MetricsRepo>,
    telemetry: SharedTelemetry,
}

impl PenaltyScheduler {
    pub fn new(
        node_repo: Arc<dyn NodeRepo>,
        ping_repo: Arc<dyn PingRepo>,
        metrics_repo: Arc<dyn MetricsRepo>,
        telemetry: SharedTelemetry,
    ) -> Self {
        Self {
            node_repo,
            ping_repo,
            metrics_repo,
            telemetry,
        }
    }

    /// Demotes a node immediately: bumps `penalty_count`, sets `penalized`,
    /// and schedules the re-evaluation at the new cool-down instant. Used
    /// when a verdict (active-checker sweep, cool-down re-evaluation) has
    /// already established the node is unhealthy.
    pub async fn penalize(&self, node_id: &str, now: i64) -> anyhow::Result<()> {
        let node = self.node_repo.penalize_node(node_id).await?;
        self.demote(node, now).await
    }

    /// Nudges a node's failure count without assuming it is unhealthy. Only
    /// demotes once [`FAILURE_THRESHOLD`] nudges have accumulated, so a
    /// single candidate timeout mid-dispatch doesn't evict the node; repeated
    /// failures still cross the threshold and demote it.
    pub async fn record_failure(&self, node_id: &str, now: i64) -> anyhow::Result<()> {
        let node = self.node_repo.penalize_node(node_id).await?;
        if node.penalty_count >= FAILURE_THRESHOLD {
            self.demote(node, now).await
        } else {
            debug!(node_id, count = node.penalty_count, "dispatch failure nudge below threshold");
            Ok(())
        }
    }

    async fn demote(&self, mut node: Node, now: i64) -> anyhow::Result<()> {
        node.penalized = true;
        node.cooldown = now + cooldown_for(node.penalty_count);
        self.node_repo.save(node.clone()).await?;
        warn!(node_id = %node.id, cooldown = node.cooldown, count = node.penalty_count, "node penalized");
        self.telemetry.record_penalized();
        self.schedule_wakeup(node.id.clone(), node.cooldown, now);
        Ok(())
    }

    /// Re-evaluates a single penalized node at (or after) its cool-down
    /// instant. Reinstates it on `Active`, or re-penalizes with a longer
    /// cool-down on `Inactive`.
    pub async fn reevaluate(&self, node_id: &str, now: i64) -> anyhow::Result<()> {
        let Some(mut node) = self.node_repo.find_by_id(node_id).await? else {
            return Ok(());
        };
        if !node.penalized {
            return Ok(());
        }
        let last_ping = self.ping_repo.find_by_node_id(node_id).await?;
        let metrics = self.metrics_repo.find_by_id(node_id).await?;
        let pool_best = self
            .metrics_repo
            .get_latest_block_metrics()
            .await?
            .unwrap_or(LatestBlockMetrics {
                best_block_height: 0,
                finalized_block_height: 0,
                timestamp: now,
            });

        let verdict = match &metrics {
            Some(m) => health::evaluate(last_ping, m, &pool_best, now),
            None => Verdict::Inactive,
        };

        match verdict {
            Verdict::Active => {
                node.penalized = false;
                self.node_repo.save(node.clone()).await?;
                info!(node_id, "node reinstated after cool-down");
                self.telemetry.record_reinstated();
            }
            Verdict::Inactive => {
                self.penalize(node_id, now).await?;
            }
        }
        Ok(())
    }

    /// Spawns a detached timer that fires `reevaluate` once the cool-down
    /// elapses (immediately if it already has). Used both on fresh
    /// penalization and on boot re-arming.
    fn schedule_wakeup(&self, node_id: String, cooldown_at: i64, now: i64) {
        let delay = (cooldown_at - now).max(0) as u64;
        let node_repo = self.node_repo.clone();
        let ping_repo = self.ping_repo.clone();
        let metrics_repo = self.metrics_repo.clone();
        let telemetry = self.telemetry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(delay)).await;
            let scheduler = PenaltyScheduler::new(node_repo, ping_repo, metrics_repo, telemetry);
            let now = chrono_now();
            if let Err(err) = scheduler.reevaluate(&node_id, now).await {
                warn!(node_id, error = %err, "penalty re-evaluation failed");
            }
        });
    }

    /// Enumerates every currently-penalized node and arms a wake-up for it.
    /// Nodes whose cool-down has already elapsed are evaluated immediately
    /// (the delay computation in [`Self::schedule_wakeup`] saturates at
    /// zero). Called once on boot.
    pub async fn rearm_on_boot(&self) -> anyhow::Result<()> {
        let now = chrono_now();
        let penalized = self.node_repo.get_penalized_nodes().await?;
        let mut joins = JoinSet::new();
        for node in penalized {
            let node_repo = self.node_repo.clone();
            let ping_repo = self.ping_repo.clone();
            let metrics_repo = self.metrics_repo.clone();
            let telemetry = self.telemetry.clone();
            joins.spawn(async move {
                let scheduler = PenaltyScheduler::new(node_repo, ping_repo, metrics_repo, telemetry);
                scheduler.schedule_wakeup(node.id, node.cooldown, now);
            });
        }
        while joins.join_next().await.is_some() {}
        Ok(())
    }
}

fn chrono_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_grows_monotonically_and_caps() {
        let mut prev = 0;
        for n in 1..20 {
            let c = cooldown_for(n);
            assert!(c >= prev, "cooldown must be nondecreasing");
            assert!(c <= MAX_COOLDOWN_SECS);
            prev = c;
        }
        assert_eq!(cooldown_for(1), BASE_COOLDOWN_SECS);
        assert_eq!(cooldown_for(100), MAX_COOLDOWN_SECS);
    }

    #[tokio::test]
    async fn penalize_sets_flags_and_cooldown() {
        use crate::models::Node;
        use crate::repo::memory::{MemoryMetricsRepo, MemoryNodeRepo, MemoryPingRepo};

        let node_repo = Arc::new(MemoryNodeRepo::new());
        let ping_repo = Arc::new(MemoryPingRepo::new());
        let metrics_repo = Arc::new(MemoryMetricsRepo::new());
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

        let telemetry = Arc::new(crate::telemetry::Telemetry::new());
        let scheduler = PenaltyScheduler::new(node_repo.clone(), ping_repo, metrics_repo, telemetry);
        scheduler.penalize("n1", 1_000).await.unwrap();

        let node = node_repo.find_by_id("n1").await.unwrap().unwrap();
        assert!(node.penalized);
        assert_eq!(node.penalty_count, 1);
        assert_eq!(node.cooldown, 1_000 + BASE_COOLDOWN_SECS);
    }

    #[tokio::test]
    async fn record_failure_only_demotes_past_the_threshold() {
        use crate::models::Node;
        use crate::repo::memory::{MemoryMetricsRepo, MemoryNodeRepo, MemoryPingRepo};

        let node_repo = Arc::new(MemoryNodeRepo::new());
        let ping_repo = Arc::new(MemoryPingRepo::new());
        let metrics_repo = Arc::new(MemoryMetricsRepo::new());
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

        let telemetry = Arc::new(crate::telemetry::Telemetry::new());
        let scheduler = PenaltyScheduler::new(node_repo.clone(), ping_repo, metrics_repo, telemetry);

        for _ in 0..FAILURE_THRESHOLD - 1 {
            scheduler.record_failure("n1", 1_000).await.unwrap();
        }
        let node = node_repo.find_by_id("n1").await.unwrap().unwrap();
        assert!(!node.penalized, "a single transient failure must not evict the node");
        assert_eq!(node.penalty_count, FAILURE_THRESHOLD - 1);

        scheduler.record_failure("n1", 1_000).await.unwrap();
        let node = node_repo.find_by_id("n1").await.unwrap().unwrap();
        assert!(node.penalized, "crossing the threshold must demote the node");
        assert_eq!(node.penalty_count, FAILURE_THRESHOLD);
    }
}
