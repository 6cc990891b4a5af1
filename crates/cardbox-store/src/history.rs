//! History loggers — lineage, box snapshots, and API calls.
//!
//! Thin writers over the storage adapter, each carrying tenant and trace
//! identity. The engine decides *when* to log (per its history level);
//! these decide *what* a log row contains.

use std::collections::BTreeMap;
use std::sync::Arc;

use cardbox_core::CardBox;
use serde_json::Value;
use tracing::debug;

use crate::adapter::{ApiLogEntry, BoxLogEntry, StorageAdapter};
use crate::error::Result;

/// Records card lineage: one operation log row per strategy application
/// plus one source→derived edge per produced card.
#[derive(Clone)]
pub struct CardHistory {
    storage: Arc<dyn StorageAdapter>,
    tenant_id: String,
    trace_id: String,
}

impl CardHistory {
    /// Create a lineage logger for a tenant and trace.
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        tenant_id: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            tenant_id: tenant_id.into(),
            trace_id: trace_id.into(),
        }
    }

    /// Persist one operation and its transformation edges.
    ///
    /// Empty relationship maps are not logged. Lineage is recorded after
    /// the strategy has persisted its derived cards, so an edge never
    /// points at a card that does not exist.
    pub async fn log_operation(
        &self,
        relationship_map: &BTreeMap<String, Vec<String>>,
        strategy_name: &str,
    ) -> Result<()> {
        if relationship_map.is_empty() {
            return Ok(());
        }

        let log_id = self
            .storage
            .add_operation_log(&self.tenant_id, &self.trace_id, strategy_name)
            .await?;

        let mut edges = 0usize;
        for (source_id, derived_ids) in relationship_map {
            for derived_id in derived_ids {
                self.storage
                    .add_transformation(log_id, source_id, derived_id)
                    .await?;
                edges += 1;
            }
        }

        debug!(strategy = strategy_name, log_id, edges, "operation logged");
        Ok(())
    }
}

/// Records full before/after box snapshots per strategy application.
#[derive(Clone)]
pub struct CardBoxHistory {
    storage: Arc<dyn StorageAdapter>,
    tenant_id: String,
    trace_id: String,
}

impl CardBoxHistory {
    /// Create a box-history logger for a tenant and trace.
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        tenant_id: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            tenant_id: tenant_id.into(),
            trace_id: trace_id.into(),
        }
    }

    /// Persist one box transformation with JSON snapshots of both sides.
    pub async fn log_box_transformation(
        &self,
        strategy_name: &str,
        strategy_input: Option<String>,
        input_box: &CardBox,
        output_box: &CardBox,
    ) -> Result<()> {
        let entry = BoxLogEntry {
            tenant_id: self.tenant_id.clone(),
            trace_id: self.trace_id.clone(),
            strategy_name: strategy_name.to_string(),
            strategy_input,
            input_box: serde_json::to_string(input_box)?,
            output_box: serde_json::to_string(output_box)?,
        };
        self.storage.add_box_log(entry).await?;
        debug!(strategy = strategy_name, "box transformation logged");
        Ok(())
    }
}

/// How much of an API call to capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiLogLevel {
    /// Record request and response payloads.
    Full,
    /// Record only the call identity.
    Brief,
}

/// Records external API calls.
#[derive(Clone)]
pub struct ApiHistory {
    storage: Arc<dyn StorageAdapter>,
    tenant_id: String,
    trace_id: String,
}

impl ApiHistory {
    /// Create an API-call logger for a tenant and trace.
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        tenant_id: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            tenant_id: tenant_id.into(),
            trace_id: trace_id.into(),
        }
    }

    /// Persist one API call row; returns its log id.
    pub async fn log_api_call(
        &self,
        api_type: &str,
        endpoint: &str,
        request_data: Option<&Value>,
        response_data: Option<String>,
        log_level: ApiLogLevel,
    ) -> Result<i64> {
        let (request, response) = match log_level {
            ApiLogLevel::Full => (request_data.map(Value::to_string), response_data),
            ApiLogLevel::Brief => (None, None),
        };
        self.storage
            .add_api_log(ApiLogEntry {
                tenant_id: self.tenant_id.clone(),
                trace_id: self.trace_id.clone(),
                api_type: api_type.to_string(),
                endpoint: endpoint.to_string(),
                request,
                response,
            })
            .await
    }
}
