// SPDX-License-Identifier: Apache-2.0, MIT

//! `POST /api/v1/nodes/ping` and `POST /api/v1/nodes/metrics`, both
//! bearer-authenticated. Downtime accounting happens ahead of the ping
//! overwrite so a lost interval is never silently swallowed.

use std::sync::Arc;

use tracing::warn;

use crate::error::GatewayError;
use crate::health::PING_TTL_SECS;
use crate::models::{Downtime, Metrics};
use crate::repo::{DowntimeRepo, MetricsRepo, PingRepo};

pub struct PingController {
    ping_repo: Arc<dyn PingRepo>,
    downtime_repo: Arc<dyn DowntimeRepo>,
}

impl PingController {
    pub fn new(ping_repo: Arc<dyn PingRepo>, downtime_repo: Arc<dyn DowntimeRepo>) -> Self {
        Self {
            ping_repo,
            downtime_repo,
        }
    }

    /// Records a heartbeat for `node_id`, appending a [`Downtime`] interval
    /// first if the gap since the previous ping exceeded the TTL.
    pub async fn ping(&self, node_id: &str, now: i64) -> Result<(), GatewayError> {
        if let Some(downtime) = self.ping_repo.calculate_downtime(node_id, now).await? {
            if downtime > PING_TTL_SECS {
                self.downtime_repo
                    .save(Downtime {
                        node_id: node_id.to_owned(),
                        start: now - downtime,
                        end: now,
                        duration_secs: downtime,
                    })
                    .await?;
                warn!(node_id, downtime, "node downtime recorded");
            }
        }
        self.ping_repo.save(node_id, now).await?;
        Ok(())
    }
}

pub struct MetricsController {
    metrics_repo: Arc<dyn MetricsRepo>,
}

impl MetricsController {
    pub fn new(metrics_repo: Arc<dyn MetricsRepo>) -> Self {
        Self { metrics_repo }
    }

    pub async fn submit(&self, node_id: &str, metrics: Metrics) -> Result<(), GatewayError> {
        self.metrics_repo.save(node_id, metrics).await?;
        Ok(())
    }
}
