// SPDX-License-Identifier: Apache-2.0, MIT

//! Accounting for served RPC requests. Writes happen off the request path:
//! the dispatcher hands outcomes to a bounded channel; a detached task drains
//! it. A full channel drops the record (logged) rather than backpressuring
//! the client, per the detached-accounting design note.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::models::{Record, RecordStatus};
use crate::penalty::PenaltyScheduler;
use crate::repo::{NodeRepo, RecordRepo};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Success,
    Failure,
}

struct Event {
    node_id: String,
    timestamp: i64,
    outcome: Outcome,
}

/// Handle used by the dispatcher to fire-and-forget accounting events.
#[derive(Clone)]
pub struct Recorder {
    tx: mpsc::Sender<Event>,
}

impl Recorder {
    /// Spawns the detached consumer task and returns a cheap-to-clone handle.
    pub fn spawn(
        record_repo: Arc<dyn RecordRepo>,
        node_repo: Arc<dyn NodeRepo>,
        penalty: Arc<PenaltyScheduler>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(err) =
                    Self::handle_event(&record_repo, &node_repo, &penalty, event).await
                {
                    warn!(error = %err, "recorder: failed to persist accounting event");
                }
            }
        });
        Self { tx }
    }

    async fn handle_event(
        record_repo: &Arc<dyn RecordRepo>,
        node_repo: &Arc<dyn NodeRepo>,
        penalty: &Arc<PenaltyScheduler>,
        event: Event,
    ) -> anyhow::Result<()> {
        let status = match event.outcome {
            Outcome::Success => RecordStatus::Successful,
            Outcome::Failure => RecordStatus::Failed,
        };
        record_repo
            .save(Record {
                node_id: event.node_id.clone(),
                timestamp: event.timestamp,
                status,
            })
            .await?;
        match event.outcome {
            Outcome::Success => {
                node_repo.reward_node(&event.node_id, event.timestamp).await?;
            }
            Outcome::Failure => {
                // The nudge always lands in the repo; the scheduler decides
                // whether the nudge crosses a demotion threshold.
                penalty.record_failure(&event.node_id, event.timestamp).await?;
            }
        }
        Ok(())
    }

    pub fn successful_request(&self, node_id: impl Into<String>, timestamp: i64) {
        self.send(node_id.into(), timestamp, Outcome::Success);
    }

    pub fn failed_request(&self, node_id: impl Into<String>, timestamp: i64) {
        self.send(node_id.into(), timestamp, Outcome::Failure);
    }

    fn send(&self, node_id: String, timestamp: i64, outcome: Outcome) {
        let event = Event {
            node_id: node_id.clone(),
            timestamp,
            outcome,
        };
        if self.tx.try_send(event).is_err() {
            warn!(node_id, "recorder: channel full, dropping accounting event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Node;
    use crate::repo::memory::{MemoryMetricsRepo, MemoryNodeRepo, MemoryPingRepo, MemoryRecordRepo};

    #[tokio::test]
    async fn successful_request_updates_last_used_and_appends_record() {
        let node_repo = Arc::new(MemoryNodeRepo::new());
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
        let record_repo = Arc::new(MemoryRecordRepo::new());
        let penalty = Arc::new(PenaltyScheduler::new(
            node_repo.clone(),
            Arc::new(MemoryPingRepo::new()),
            Arc::new(MemoryMetricsRepo::new()),
            Arc::new(crate::telemetry::Telemetry::new()),
        ));

        let recorder = Recorder::spawn(record_repo.clone(), node_repo.clone(), penalty);
        recorder.successful_request("n1", 42);

        // allow the detached task to drain.
        for _ in 0..50 {
            if !record_repo.all().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let records = record_repo.all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, RecordStatus::Successful);
        let node = node_repo.find_by_id("n1").await.unwrap().unwrap();
        assert_eq!(node.last_used, 42);
    }

    #[tokio::test]
    async fn a_single_failed_request_does_not_penalize_the_node() {
        let node_repo = Arc::new(MemoryNodeRepo::new());
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
        let record_repo = Arc::new(MemoryRecordRepo::new());
        let penalty = Arc::new(PenaltyScheduler::new(
            node_repo.clone(),
            Arc::new(MemoryPingRepo::new()),
            Arc::new(MemoryMetricsRepo::new()),
            Arc::new(crate::telemetry::Telemetry::new()),
        ));

        let recorder = Recorder::spawn(record_repo.clone(), node_repo.clone(), penalty);
        recorder.failed_request("n1", 10);

        // allow the detached task to drain.
        for _ in 0..50 {
            let node = node_repo.find_by_id("n1").await.unwrap().unwrap();
            if node.penalty_count > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let node = node_repo.find_by_id("n1").await.unwrap().unwrap();
        assert!(!node.penalized, "one transient failure must not evict the node");
        assert_eq!(node.penalty_count, 1);
    }

    #[tokio::test]
    async fn repeated_failed_requests_cross_the_threshold_and_penalize() {
        use crate::penalty::FAILURE_THRESHOLD;

        let node_repo = Arc::new(MemoryNodeRepo::new());
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
        let record_repo = Arc::new(MemoryRecordRepo::new());
        let penalty = Arc::new(PenaltyScheduler::new(
            node_repo.clone(),
            Arc::new(MemoryPingRepo::new()),
            Arc::new(MemoryMetricsRepo::new()),
            Arc::new(crate::telemetry::Telemetry::new()),
        ));

        let recorder = Recorder::spawn(record_repo.clone(), node_repo.clone(), penalty);
        for _ in 0..FAILURE_THRESHOLD {
            recorder.failed_request("n1", 10);
        }

        for _ in 0..50 {
            let node = node_repo.find_by_id("n1").await.unwrap().unwrap();
            if node.penalized {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let node = node_repo.find_by_id("n1").await.unwrap().unwrap();
        assert!(node.penalized, "failures reaching the threshold must penalize the node");
        assert_eq!(node.penalty_count, FAILURE_THRESHOLD);
    }
}
