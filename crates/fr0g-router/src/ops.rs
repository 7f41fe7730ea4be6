//! Operational introspection for the router process.

use std::sync::Arc;

use async_trait::async_trait;

use fr0g_core::ops::OpsSource;

use crate::analyzer::AnalyzerBridge;
use crate::router::EventRouter;

/// Snapshot provider over the running router.
pub struct RouterOps {
    router: Arc<EventRouter>,
    bridge: Arc<AnalyzerBridge>,
    workers: usize,
}

impl RouterOps {
    /// Wrap the running pieces.
    pub fn new(router: Arc<EventRouter>, bridge: Arc<AnalyzerBridge>, workers: usize) -> Self {
        Self {
            router,
            bridge,
            workers,
        }
    }
}

#[async_trait]
impl OpsSource for RouterOps {
    fn service_name(&self) -> &str {
        "fr0g-router"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    async fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "workers": self.workers,
            "router": self.router.stats(),
            "dead_letters": self.router.dead_letters().total(),
        })
    }

    async fn queue_status(&self) -> serde_json::Value {
        let stats = self.router.queue().stats();
        serde_json::json!({
            "input": { "depth": stats.depth, "capacity": stats.capacity },
        })
    }

    async fn queue_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "input": self.router.queue().stats(),
            "dead_letters": self.router.dead_letters().snapshot(),
        })
    }

    async fn processors(&self) -> serde_json::Value {
        serde_json::json!([{
            "name": "analyzer-bridge",
            "stats": self.bridge.stats().await,
        }])
    }
}
