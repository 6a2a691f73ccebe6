//! Incident payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use hpcguard_core::{FleetResultSet, NodeErrors};

/// Property keys owned by the submitter; `additional` cannot override them.
const RESERVED_KEYS: &[&str] = &["category", "description", "timestamp", "nodes", "requestId"];

/// Body of one incident submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentPayload {
    pub properties: IncidentProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentProperties {
    pub category: String,
    pub description: String,
    /// Operator-supplied extra properties, inlined next to the fixed ones.
    #[serde(flatten)]
    pub additional: Map<String, Value>,
    pub timestamp: String,
    pub nodes: Vec<NodeErrors>,
    #[serde(rename = "requestId")]
    pub request_id: String,
}

impl IncidentPayload {
    pub fn new(
        category: impl Into<String>,
        description: impl Into<String>,
        additional: &Map<String, Value>,
        timestamp: impl Into<String>,
        nodes: Vec<NodeErrors>,
    ) -> Self {
        let additional = additional
            .iter()
            .filter(|(k, _)| {
                let reserved = RESERVED_KEYS.contains(&k.as_str());
                if reserved {
                    debug!(key = %k, "ignoring reserved additional property");
                }
                !reserved
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Self {
            properties: IncidentProperties {
                category: category.into(),
                description: description.into(),
                additional,
                timestamp: timestamp.into(),
                nodes,
                request_id: String::new(),
            },
        }
    }

    /// Stamp a new request id on the payload.
    pub fn set_request_id(&mut self, request_id: impl Into<String>) {
        self.properties.request_id = request_id.into();
    }

    pub fn request_id(&self) -> &str {
        &self.properties.request_id
    }
}

/// Nodes to escalate: every node with at least one error code, truncated
/// to the first `max_nodes` in set order.
pub fn build_batch(results: &FleetResultSet, max_nodes: usize) -> Vec<NodeErrors> {
    let mut nodes = results.failed_nodes();
    if nodes.len() > max_nodes {
        warn!(
            failed = nodes.len(),
            max_nodes,
            dropped = nodes.len() - max_nodes,
            "too many failed nodes for one incident, truncating batch"
        );
        nodes.truncate(max_nodes);
    }
    nodes
}
