//! Operational introspection for the ingress process.

use std::sync::Arc;

use async_trait::async_trait;

use fr0g_core::ops::OpsSource;

use crate::adapter::ChannelAdapter;

/// Snapshot provider over the running adapters.
pub struct IngressOps {
    adapters: Vec<Arc<dyn ChannelAdapter>>,
}

impl IngressOps {
    /// Wrap the started adapters.
    pub fn new(adapters: Vec<Arc<dyn ChannelAdapter>>) -> Self {
        Self { adapters }
    }
}

#[async_trait]
impl OpsSource for IngressOps {
    fn service_name(&self) -> &str {
        "fr0g-ingress"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    async fn status(&self) -> serde_json::Value {
        let adapters: Vec<serde_json::Value> = self
            .adapters
            .iter()
            .map(|a| serde_json::to_value(a.stats()).unwrap_or_default())
            .collect();
        serde_json::json!({
            "adapters": adapters,
        })
    }

    async fn processors(&self) -> serde_json::Value {
        let names: Vec<&str> = self.adapters.iter().map(|a| a.name()).collect();
        serde_json::json!(names)
    }
}
