// SPDX-License-Identifier: Apache-2.0, MIT

//! JSON-RPC parse, candidate selection, fan-out-with-fallback, and response
//! validation. The hot path: given an HTTP POST body, produce a JSON-RPC
//! response preserving the client's ids and single-vs-batch shape.
//!
//! Candidates are tried strictly sequentially per client request (at most
//! one in-flight upstream call at a time) so the recorded success/failure
//! order matches causal order, per `SPEC_FULL.md` §5.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::Node;
use crate::recorder::Recorder;
use crate::repo::NodeRepo;
use crate::telemetry::SharedTelemetry;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const INTERNAL_ERROR: i64 = -32603;

const PER_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_DEADLINE: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    fn error(id: Value, code: i64, message: &str) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.to_owned(),
            }),
        }
    }

    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }
}

/// Either a single response or a batch; serializes to a bare object or a
/// bare array respectively, matching the client's request shape.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RpcReply {
    Single(RpcResponse),
    Batch(Vec<RpcResponse>),
}

enum ParsedBody {
    Single(RpcRequest),
    Batch(Vec<RpcRequest>),
}

fn parse_body(bytes: &[u8]) -> Option<ParsedBody> {
    if let Ok(single) = serde_json::from_slice::<RpcRequest>(bytes) {
        return Some(ParsedBody::Single(single));
    }
    if let Ok(batch) = serde_json::from_slice::<Vec<RpcRequest>>(bytes) {
        if !batch.is_empty() {
            return Some(ParsedBody::Batch(batch));
        }
    }
    None
}

pub struct Dispatcher {
    node_repo: Arc<dyn NodeRepo>,
    recorder: Recorder,
    client: reqwest::Client,
    telemetry: SharedTelemetry,
}

impl Dispatcher {
    pub fn new(node_repo: Arc<dyn NodeRepo>, recorder: Recorder, telemetry: SharedTelemetry) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PER_ATTEMPT_TIMEOUT)
            .build()
            .expect("failed to build http client");
        Self {
            node_repo,
            recorder,
            client,
            telemetry,
        }
    }

    /// Entry point for `POST /` and `POST /rpc`.
    pub async fn dispatch(&self, body: &[u8], now: i64) -> RpcReply {
        match parse_body(body) {
            None => RpcReply::Single(RpcResponse::error(
                Value::from(0),
                PARSE_ERROR,
                "Parse error",
            )),
            Some(ParsedBody::Single(req)) => {
                RpcReply::Single(self.dispatch_one(req, now).await)
            }
            Some(ParsedBody::Batch(reqs)) => {
                let mut out = Vec::with_capacity(reqs.len());
                for req in reqs {
                    out.push(self.dispatch_one(req, now).await);
                }
                RpcReply::Batch(out)
            }
        }
    }

    async fn dispatch_one(&self, req: RpcRequest, now: i64) -> RpcResponse {
        let id = req.id.clone().unwrap_or(Value::from(0));

        let method = match &req.method {
            Some(m) if !m.is_empty() => m.clone(),
            _ => return RpcResponse::error(id, INVALID_REQUEST, "Invalid request"),
        };

        let candidates = match self.select_candidates().await {
            Ok(c) if !c.is_empty() => c,
            Ok(_) => {
                self.telemetry.record_rpc_failure();
                return RpcResponse::error(id, INTERNAL_ERROR, "No available nodes");
            }
            Err(err) => {
                warn!(error = %err, "dispatcher: failed to load active nodes");
                self.telemetry.record_rpc_failure();
                return RpcResponse::error(id, INTERNAL_ERROR, "No available nodes");
            }
        };

        let raw = match serde_json::to_vec(&RpcRequest {
            jsonrpc: req.jsonrpc.clone(),
            id: req.id.clone(),
            method: Some(method),
            params: req.params.clone(),
        }) {
            Ok(bytes) => bytes,
            Err(_) => return RpcResponse::error(id, PARSE_ERROR, "Parse error"),
        };

        let deadline = tokio::time::sleep(REQUEST_DEADLINE);
        tokio::pin!(deadline);

        for node in candidates {
            let attempt = self.try_node(&node, &raw, &id, now);
            tokio::select! {
                result = attempt => {
                    match result {
                        Some(response) => {
                            self.recorder.successful_request(node.id.clone(), now);
                            self.telemetry.record_rpc_success();
                            return response;
                        }
                        None => {
                            self.recorder.failed_request(node.id.clone(), now);
                            self.telemetry.record_rpc_failure();
                            continue;
                        }
                    }
                }
                _ = &mut deadline => {
                    self.telemetry.record_rpc_failure();
                    return RpcResponse::error(id, INTERNAL_ERROR, "Internal Server Error");
                }
            }
        }

        self.telemetry.record_rpc_failure();
        RpcResponse::error(id, INTERNAL_ERROR, "Internal Server Error")
    }

    /// Active nodes ordered oldest-`last_used`-first: an approximate
    /// round-robin that spreads load while staying stable and testable.
    async fn select_candidates(&self) -> anyhow::Result<Vec<Node>> {
        let mut nodes = self.node_repo.get_active_nodes().await?;
        nodes.sort_by_key(|n| n.last_used);
        Ok(nodes)
    }

    /// Forwards `raw` to `node`, returning `Some(response)` only if the
    /// response is accepted per `SPEC_FULL.md` §4.4.
    async fn try_node(
        &self,
        node: &Node,
        raw: &[u8],
        expected_id: &Value,
        _now: i64,
    ) -> Option<RpcResponse> {
        let attempt = async {
            let http_response = self
                .client
                .post(&node.node_url)
                .header("content-type", "application/json")
                .body(raw.to_vec())
                .send()
                .await
                .ok()?;

            if !http_response.status().is_success() {
                return None;
            }

            let body: Value = http_response.json().await.ok()?;
            validate_single(body, expected_id)
        };

        match tokio::time::timeout(PER_ATTEMPT_TIMEOUT, attempt).await {
            Ok(Some(response)) => Some(response),
            Ok(None) => {
                debug!(node_id = %node.id, "dispatcher: candidate rejected");
                None
            }
            Err(_) => {
                debug!(node_id = %node.id, "dispatcher: candidate timed out");
                None
            }
        }
    }
}

/// Validates a single (non-batch) backend response: must decode as JSON-RPC
/// with a matching id, and must not carry `error.code == -32603` (the
/// backend had no route for the method).
fn validate_single(body: Value, expected_id: &Value) -> Option<RpcResponse> {
    let obj = body.as_object()?;
    let id = obj.get("id").cloned().unwrap_or(Value::Null);
    if &id != expected_id {
        return None;
    }

    if let Some(error) = obj.get("error") {
        let code = error.get("code").and_then(Value::as_i64);
        if code == Some(INTERNAL_ERROR) {
            return None;
        }
        return Some(RpcResponse {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code: code.unwrap_or(INTERNAL_ERROR),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("error")
                    .to_owned(),
            }),
        });
    }

    let result = obj.get("result").cloned().unwrap_or(Value::Null);
    Some(RpcResponse::success(id, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::memory::MemoryNodeRepo;
    use crate::repo::RecordRepo;

    fn recorder() -> Recorder {
        use crate::penalty::PenaltyScheduler;
        use crate::repo::memory::{MemoryMetricsRepo, MemoryPingRepo};
        let node_repo: Arc<dyn NodeRepo> = Arc::new(MemoryNodeRepo::new());
        let record_repo: Arc<dyn RecordRepo> =
            Arc::new(crate::repo::memory::MemoryRecordRepo::new());
        let penalty = Arc::new(PenaltyScheduler::new(
            node_repo.clone(),
            Arc::new(MemoryPingRepo::new()),
            Arc::new(MemoryMetricsRepo::new()),
            Arc::new(crate::telemetry::Telemetry::new()),
        ));
        Recorder::spawn(record_repo, node_repo, penalty)
    }

    fn telemetry() -> SharedTelemetry {
        Arc::new(crate::telemetry::Telemetry::new())
    }

    #[tokio::test]
    async fn unparseable_body_returns_parse_error() {
        let node_repo = Arc::new(MemoryNodeRepo::new());
        let dispatcher = Dispatcher::new(node_repo, recorder(), telemetry());
        let reply = dispatcher.dispatch(b"not json", 0).await;
        match reply {
            RpcReply::Single(r) => {
                assert_eq!(r.error.unwrap().code, PARSE_ERROR);
                assert_eq!(r.id, Value::from(0));
            }
            _ => panic!("expected single reply"),
        }
    }

    #[tokio::test]
    async fn empty_method_is_invalid_request() {
        let node_repo = Arc::new(MemoryNodeRepo::new());
        let dispatcher = Dispatcher::new(node_repo, recorder(), telemetry());
        let body = br#"{"jsonrpc":"2.0","id":7,"method":""}"#;
        let reply = dispatcher.dispatch(body, 0).await;
        match reply {
            RpcReply::Single(r) => {
                assert_eq!(r.error.unwrap().code, INVALID_REQUEST);
                assert_eq!(r.id, Value::from(7));
            }
            _ => panic!("expected single reply"),
        }
    }

    #[tokio::test]
    async fn no_active_nodes_returns_dedicated_error() {
        let node_repo = Arc::new(MemoryNodeRepo::new());
        let dispatcher = Dispatcher::new(node_repo, recorder(), telemetry());
        let body = br#"{"jsonrpc":"2.0","id":1,"method":"system"}"#;
        let reply = dispatcher.dispatch(body, 0).await;
        match reply {
            RpcReply::Single(r) => {
                let err = r.error.unwrap();
                assert_eq!(err.code, INTERNAL_ERROR);
                assert_eq!(err.message, "No available nodes");
                assert_eq!(r.id, Value::from(1));
            }
            _ => panic!("expected single reply"),
        }
    }

    #[tokio::test]
    async fn batch_request_preserves_size_and_ids() {
        let node_repo = Arc::new(MemoryNodeRepo::new());
        let dispatcher = Dispatcher::new(node_repo, recorder(), telemetry());
        let body = br#"[{"jsonrpc":"2.0","id":1,"method":"a"},{"jsonrpc":"2.0","id":2,"method":"b"}]"#;
        let reply = dispatcher.dispatch(body, 0).await;
        match reply {
            RpcReply::Batch(rs) => {
                assert_eq!(rs.len(), 2);
                assert_eq!(rs[0].id, Value::from(1));
                assert_eq!(rs[1].id, Value::from(2));
            }
            _ => panic!("expected batch reply"),
        }
    }

    #[test]
    fn validate_single_rejects_mismatched_id() {
        let body = serde_json::json!({"jsonrpc": "2.0", "id": 2, "result": "ok"});
        assert!(validate_single(body, &Value::from(1)).is_none());
    }

    #[test]
    fn validate_single_rejects_backend_no_route() {
        let body = serde_json::json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32603, "message": "no route"}});
        assert!(validate_single(body, &Value::from(1)).is_none());
    }

    #[test]
    fn validate_single_accepts_other_backend_errors() {
        let body = serde_json::json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "execution reverted"}});
        let response = validate_single(body, &Value::from(1)).unwrap();
        assert_eq!(response.error.unwrap().code, -32000);
    }
}
