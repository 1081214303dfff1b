// SPDX-License-Identifier: Apache-2.0, MIT

//! Periodic settlement: splits the accumulated fee pool across nodes by
//! their share of successful requests served since the last payout, and
//! hands the result to an external [`PayoutExecutor`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::{Payout, PayoutLine};
use crate::repo::{FeeRepo, PayoutRepo, RecordRepo};

/// Abstracts the actual transfer mechanism (on-chain payment, exchange
/// payout API, ...), which is out of scope here.
#[async_trait]
pub trait PayoutExecutor: Send + Sync {
    async fn pay(&self, payouts: &[PayoutLine]) -> anyhow::Result<()>;
}

/// Default executor: logs the intended transfers and always succeeds. A
/// stand-in for the real on-chain executor this gateway doesn't implement.
pub struct LoggingPayoutExecutor;

#[async_trait]
impl PayoutExecutor for LoggingPayoutExecutor {
    async fn pay(&self, payouts: &[PayoutLine]) -> anyhow::Result<()> {
        for line in payouts {
            info!(address = %line.address, amount = line.amount, "payout executed");
        }
        Ok(())
    }
}

pub struct PayoutScheduler {
    record_repo: Arc<dyn RecordRepo>,
    payout_repo: Arc<dyn PayoutRepo>,
    fee_repo: Arc<dyn FeeRepo>,
    executor: Arc<dyn PayoutExecutor>,
}

impl PayoutScheduler {
    pub fn new(
        record_repo: Arc<dyn RecordRepo>,
        payout_repo: Arc<dyn PayoutRepo>,
        fee_repo: Arc<dyn FeeRepo>,
        executor: Arc<dyn PayoutExecutor>,
    ) -> Self {
        Self {
            record_repo,
            payout_repo,
            fee_repo,
            executor,
        }
    }

    /// Runs one settlement cycle: reads the interval since the last [`Payout`]
    /// row (or the epoch if none exists), counts each node's successful
    /// records inside it, splits the settled fee balance proportionally, and
    /// appends a new `Payout` row covering the interval regardless of the
    /// executor's outcome (the row is the idempotency anchor).
    pub async fn run_once(&self, now: i64) -> anyhow::Result<()> {
        let since = self.interval_start().await?;

        let records = self
            .record_repo
            .find_successful_records_inside_interval(since, now)
            .await?;

        if records.is_empty() {
            self.payout_repo
                .save(Payout {
                    timestamp: now,
                    payment_details: "no successful records in interval".to_owned(),
                })
                .await?;
            return Ok(());
        }

        let mut per_node: HashMap<String, u64> = HashMap::new();
        for record in &records {
            *per_node.entry(record.node_id.clone()).or_default() += 1;
        }
        let total: u64 = per_node.values().sum();

        let pool = self.fee_repo.settle().await?;
        let lines: Vec<PayoutLine> = per_node
            .into_iter()
            .map(|(address, count)| PayoutLine {
                address,
                amount: pool * (count as f64) / (total as f64),
            })
            .collect();

        if let Err(err) = self.executor.pay(&lines).await {
            warn!(error = %err, "payout executor failed; settlement still recorded");
        }

        self.payout_repo
            .save(Payout {
                timestamp: now,
                payment_details: serde_json::to_string(&lines).unwrap_or_default(),
            })
            .await?;
        Ok(())
    }

    async fn interval_start(&self) -> anyhow::Result<i64> {
        let payouts = self.payout_repo.get_all().await?;
        Ok(payouts.iter().map(|p| p.timestamp).max().unwrap_or(0))
    }

    /// Runs [`Self::run_once`] on a fixed interval forever. Intended to be
    /// spawned as a detached background task; errors are logged and the loop
    /// continues on the next tick.
    pub async fn run_forever(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now().timestamp();
            if let Err(err) = self.run_once(now).await {
                warn!(error = %err, "payout tick failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Record, RecordStatus};
    use crate::repo::memory::{MemoryFeeRepo, MemoryPayoutRepo, MemoryRecordRepo};
    use tokio::sync::Mutex;

    struct RecordingExecutor {
        calls: Mutex<Vec<Vec<PayoutLine>>>,
    }

    impl RecordingExecutor {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PayoutExecutor for RecordingExecutor {
        async fn pay(&self, payouts: &[PayoutLine]) -> anyhow::Result<()> {
            self.calls.lock().await.push(payouts.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn splits_fee_pool_proportionally_to_successful_records() {
        let record_repo = Arc::new(MemoryRecordRepo::new());
        record_repo
            .save(Record {
                node_id: "a".into(),
                timestamp: 10,
                status: RecordStatus::Successful,
            })
            .await
            .unwrap();
        record_repo
            .save(Record {
                node_id: "a".into(),
                timestamp: 20,
                status: RecordStatus::Successful,
            })
            .await
            .unwrap();
        record_repo
            .save(Record {
                node_id: "b".into(),
                timestamp: 30,
                status: RecordStatus::Successful,
            })
            .await
            .unwrap();

        let payout_repo = Arc::new(MemoryPayoutRepo::new());
        let fee_repo = Arc::new(MemoryFeeRepo::new());
        fee_repo.accumulate(30.0).await.unwrap();
        let executor = Arc::new(RecordingExecutor::new());

        let scheduler = PayoutScheduler::new(
            record_repo,
            payout_repo.clone(),
            fee_repo.clone(),
            executor.clone(),
        );
        scheduler.run_once(100).await.unwrap();

        let calls = executor.calls.lock().await;
        assert_eq!(calls.len(), 1);
        let lines = &calls[0];
        let a = lines.iter().find(|l| l.address == "a").unwrap();
        let b = lines.iter().find(|l| l.address == "b").unwrap();
        assert!((a.amount - 20.0).abs() < 1e-9);
        assert!((b.amount - 10.0).abs() < 1e-9);

        assert_eq!(fee_repo.settle().await.unwrap(), 0.0);
        assert_eq!(payout_repo.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_cycle_only_counts_records_after_the_previous_payout() {
        let record_repo = Arc::new(MemoryRecordRepo::new());
        record_repo
            .save(Record {
                node_id: "a".into(),
                timestamp: 10,
                status: RecordStatus::Successful,
            })
            .await
            .unwrap();
        let payout_repo = Arc::new(MemoryPayoutRepo::new());
        let fee_repo = Arc::new(MemoryFeeRepo::new());
        fee_repo.accumulate(10.0).await.unwrap();
        let executor = Arc::new(RecordingExecutor::new());

        let scheduler = PayoutScheduler::new(
            record_repo.clone(),
            payout_repo.clone(),
            fee_repo.clone(),
            executor.clone(),
        );
        scheduler.run_once(50).await.unwrap();

        record_repo
            .save(Record {
                node_id: "a".into(),
                timestamp: 60,
                status: RecordStatus::Successful,
            })
            .await
            .unwrap();
        scheduler.run_once(100).await.unwrap();

        let calls = executor.calls.lock().await;
        assert_eq!(calls.len(), 2, "both intervals had a successful record to pay out");
        assert_eq!(calls[1].len(), 1);
        assert_eq!(calls[1][0].address, "a");
        assert_eq!(payout_repo.get_all().await.unwrap().len(), 2);
    }
}
