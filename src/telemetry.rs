// SPDX-License-Identifier: Apache-2.0, MIT

//! Prometheus metrics registry, served at `GET /metrics`. Counters are
//! cheap, lock-free atomics (`prometheus_client`); the registry itself is
//! assembled once at startup and shared read-only across tasks.

use std::sync::Arc;

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct RpcOutcomeLabels {
    pub outcome: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct NodeTransitionLabels {
    pub transition: String,
}

pub struct Telemetry {
    registry: Registry,
    rpc_requests: Family<RpcOutcomeLabels, Counter>,
    node_transitions: Family<NodeTransitionLabels, Counter>,
    active_nodes: Gauge,
}

impl Telemetry {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let rpc_requests = Family::<RpcOutcomeLabels, Counter>::default();
        registry.register(
            "rpc_requests",
            "JSON-RPC requests served, by outcome",
            rpc_requests.clone(),
        );

        let node_transitions = Family::<NodeTransitionLabels, Counter>::default();
        registry.register(
            "node_penalty_transitions",
            "Node health state transitions",
            node_transitions.clone(),
        );

        let active_nodes = Gauge::default();
        registry.register(
            "active_nodes",
            "Currently active (non-penalized) node count",
            active_nodes.clone(),
        );

        Self {
            registry,
            rpc_requests,
            node_transitions,
            active_nodes,
        }
    }

    pub fn record_rpc_success(&self) {
        self.rpc_requests
            .get_or_create(&RpcOutcomeLabels {
                outcome: "success".to_owned(),
            })
            .inc();
    }

    pub fn record_rpc_failure(&self) {
        self.rpc_requests
            .get_or_create(&RpcOutcomeLabels {
                outcome: "failure".to_owned(),
            })
            .inc();
    }

    pub fn record_penalized(&self) {
        self.node_transitions
            .get_or_create(&NodeTransitionLabels {
                transition: "penalized".to_owned(),
            })
            .inc();
    }

    pub fn record_reinstated(&self) {
        self.node_transitions
            .get_or_create(&NodeTransitionLabels {
                transition: "reinstated".to_owned(),
            })
            .inc();
    }

    pub fn set_active_nodes(&self, count: i64) {
        self.active_nodes.set(count);
    }

    /// Renders the registry in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry).unwrap_or_default();
        buffer
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedTelemetry = Arc<Telemetry>;
