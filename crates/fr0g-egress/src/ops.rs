//! Operational introspection and the review admin API.
//!
//! Beyond the shared ops routes, the egress HTTP surface carries the
//! reviewer's administrative contract: `GET /review/pending` lists parked
//! commands, `POST /review/{commandId}` with
//! `{decision, reviewed_by, comments}` applies a decision.

use std::sync::Arc;

use async_trait::async_trait;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;

use fr0g_core::http::{error_response, json_response, read_json, MAX_BODY_BYTES};
use fr0g_core::ops::OpsSource;

use crate::pipeline::EgressPipeline;
use crate::review::Decision;

#[derive(Debug, Deserialize)]
struct DecisionBody {
    decision: Decision,
    #[serde(default)]
    reviewed_by: Option<String>,
    #[serde(default)]
    comments: Option<String>,
}

/// Snapshot provider and review-route handler for the egress process.
pub struct EgressOps {
    pipeline: Arc<EgressPipeline>,
    workers: usize,
}

impl EgressOps {
    /// Wrap the running pipeline.
    pub fn new(pipeline: Arc<EgressPipeline>, workers: usize) -> Self {
        Self { pipeline, workers }
    }
}

#[async_trait]
impl OpsSource for EgressOps {
    fn service_name(&self) -> &str {
        "fr0g-egress"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    async fn status(&self) -> serde_json::Value {
        let (succeeded, failed) = self.pipeline.results().counts();
        serde_json::json!({
            "workers": self.workers,
            "dispatch": self.pipeline.dispatcher().stats(),
            "results": { "succeeded": succeeded, "failed": failed },
            "review_pending": self.pipeline.review().len(),
            "dead_letters": self.pipeline.dead_letters().total(),
        })
    }

    async fn queue_status(&self) -> serde_json::Value {
        let stats = self.pipeline.queue().stats();
        serde_json::json!({
            "output": { "depth": stats.depth, "capacity": stats.capacity },
        })
    }

    async fn queue_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "output": self.pipeline.queue().stats(),
            "dead_letters": self.pipeline.dead_letters().snapshot(),
        })
    }

    async fn outputs(&self) -> serde_json::Value {
        let senders: Vec<serde_json::Value> = self
            .pipeline
            .dispatcher()
            .senders()
            .all()
            .into_iter()
            .map(|s| serde_json::to_value(s.stats()).unwrap_or_default())
            .collect();
        serde_json::json!(senders)
    }

    async fn route(&self, request: Request<Incoming>) -> Option<Response<String>> {
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        if method == Method::GET && path == "/review/pending" {
            return Some(json_response(
                StatusCode::OK,
                &self.pipeline.review().pending(),
            ));
        }

        if let Some(command_id) = path.strip_prefix("/review/") {
            if command_id.is_empty() || command_id.contains('/') {
                return None;
            }
            if method != Method::POST {
                return Some(fr0g_core::http::method_not_allowed());
            }
            let command_id = command_id.to_string();
            let body = match read_json::<DecisionBody>(request.into_body(), MAX_BODY_BYTES).await
            {
                Ok(body) => body,
                Err(bad) => return Some(bad),
            };
            let reviewed_by = body.reviewed_by.as_deref().unwrap_or("anonymous");
            return Some(
                match self.pipeline.review().decide(
                    &command_id,
                    body.decision,
                    reviewed_by,
                    body.comments,
                ) {
                    Ok(()) => json_response(
                        StatusCode::OK,
                        &serde_json::json!({ "command_id": command_id, "applied": true }),
                    ),
                    Err(err) => error_response(
                        StatusCode::NOT_FOUND,
                        "not_found",
                        &err.to_string(),
                    ),
                },
            );
        }

        None
    }
}
