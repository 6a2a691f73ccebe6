//! Domain types shared across hpcguard crates.
//!
//! These types travel between the per-node recovery state machine, the
//! fleet coordinator, the report renderer and the escalation submitter.
//! All of them serialize to JSON: `NodeResult` is the on-disk result
//! artifact format, `NodeErrors` is the node entry of incident payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Return code: every probe passed on the last evaluated pass.
pub const RC_SUCCESS: i32 = 0;

/// Return code: probes ran and at least one reported a failure.
pub const RC_PROBE_FAILURE: i32 = 1;

/// Return code: no result could be obtained at all (node unreachable,
/// worker fault). Never used for a probe-reported failure.
pub const RC_UNREACHABLE: i32 = 255;

// ── Probes ────────────────────────────────────────────────────────

/// The health checks run against every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// GPU diagnostic (node health check script).
    GpuHealth,
    /// Single-node collective bandwidth benchmark.
    SingleNodeBandwidth,
    /// Multi-node collective bandwidth benchmark across the fleet.
    MultiNodeBandwidth,
}

impl ProbeKind {
    pub const ALL: [ProbeKind; 3] = [
        ProbeKind::GpuHealth,
        ProbeKind::SingleNodeBandwidth,
        ProbeKind::MultiNodeBandwidth,
    ];

    /// Short key used for `NodeResult.extra` field names and the remote
    /// probe command line.
    pub fn key(&self) -> &'static str {
        match self {
            ProbeKind::GpuHealth => "gpu",
            ProbeKind::SingleNodeBandwidth => "nccl",
            ProbeKind::MultiNodeBandwidth => "multi",
        }
    }

    /// Prefix of the error codes this probe emits.
    pub fn code_prefix(&self) -> &'static str {
        match self {
            ProbeKind::GpuHealth => "NHC",
            ProbeKind::SingleNodeBandwidth => "NCCL",
            ProbeKind::MultiNodeBandwidth => "NCCL_MULTI",
        }
    }

    /// `NodeResult.extra` key holding this probe's display status.
    pub fn status_key(&self) -> String {
        format!("{}_status", self.key())
    }

    /// `NodeResult.extra` key holding this probe's measured bandwidth.
    pub fn bandwidth_key(&self) -> String {
        format!("{}_bw", self.key())
    }
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Tri-state verdict of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Passed,
    Failed,
    /// Precondition not met (e.g. too few GPUs). Excluded from the
    /// overall verdict and never contributes error codes.
    Skipped,
}

impl ProbeStatus {
    /// Label used in reports and result artifacts.
    pub fn label(&self) -> &'static str {
        match self {
            ProbeStatus::Passed => "Passed",
            ProbeStatus::Failed => "Failed",
            ProbeStatus::Skipped => "Skip",
        }
    }
}

/// Result of one probe invocation on one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub status: ProbeStatus,
    #[serde(default)]
    pub error_codes: Vec<String>,
    /// Free-form diagnostic payload, merged into `NodeResult.extra`.
    #[serde(default)]
    pub raw_detail: Map<String, Value>,
}

impl CheckOutcome {
    pub fn passed() -> Self {
        Self {
            status: ProbeStatus::Passed,
            error_codes: Vec::new(),
            raw_detail: Map::new(),
        }
    }

    pub fn failed<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            status: ProbeStatus::Failed,
            error_codes: codes.into_iter().map(Into::into).collect(),
            raw_detail: Map::new(),
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: ProbeStatus::Skipped,
            error_codes: Vec::new(),
            raw_detail: Map::new(),
        }
    }

    /// Attach a diagnostic field.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.raw_detail.insert(key.into(), value.into());
        self
    }

    pub fn is_skipped(&self) -> bool {
        self.status == ProbeStatus::Skipped
    }

    pub fn is_passed(&self) -> bool {
        self.status == ProbeStatus::Passed
    }
}

// ── Node results ──────────────────────────────────────────────────

/// Fixed field names of a serialized [`NodeResult`]. `extra` must not
/// carry any of these or the flattened artifact gets duplicate keys.
pub const NODE_RESULT_FIELDS: &[&str] = &[
    "node",
    "timestamp",
    "initial_returncode",
    "final_returncode",
    "reboot_count",
    "error_codes",
    "error",
];

/// Terminal state of one node's recovery cycle.
///
/// This is also the result artifact format: `extra` is flattened into the
/// JSON object so probe-specific fields sit next to the fixed ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node: String,
    /// Check-run timestamp shared by the whole fleet run.
    pub timestamp: String,
    pub initial_returncode: i32,
    pub final_returncode: i32,
    pub reboot_count: u32,
    #[serde(default)]
    pub error_codes: Vec<String>,
    /// Fault annotation on fallback results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NodeResult {
    /// Fallback result for a node whose cycle produced nothing usable.
    pub fn unreachable(node: &str, timestamp: &str, error: impl Into<String>) -> Self {
        Self {
            node: node.to_string(),
            timestamp: timestamp.to_string(),
            initial_returncode: RC_UNREACHABLE,
            final_returncode: RC_UNREACHABLE,
            reboot_count: 0,
            error_codes: Vec::new(),
            error: Some(error.into()),
            extra: Map::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.final_returncode == RC_SUCCESS
    }

    pub fn is_unreachable(&self) -> bool {
        self.final_returncode == RC_UNREACHABLE
    }

    /// True when `key` names a fixed field and cannot live in `extra`.
    pub fn is_reserved_field(key: &str) -> bool {
        NODE_RESULT_FIELDS.contains(&key)
    }

    /// Insert into `extra` unless `key` collides with a fixed field.
    /// Returns whether the value was stored.
    pub fn insert_extra(&mut self, key: impl Into<String>, value: impl Into<Value>) -> bool {
        let key = key.into();
        if Self::is_reserved_field(&key) {
            return false;
        }
        self.extra.insert(key, value.into());
        true
    }

    /// String field from `extra`, if present.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    /// Numeric field from `extra`, if present.
    pub fn extra_f64(&self, key: &str) -> Option<f64> {
        self.extra.get(key).and_then(Value::as_f64)
    }
}

/// A node and the error codes it reported; the node entry of an
/// incident payload and of escalation log records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeErrors {
    pub node: String,
    pub errors: Vec<String>,
}

/// All node results of one fleet run, in completion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FleetResultSet {
    results: Vec<NodeResult>,
}

impl FleetResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: NodeResult) {
        self.results.push(result);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NodeResult> {
        self.results.iter()
    }

    pub fn get(&self, node: &str) -> Option<&NodeResult> {
        self.results.iter().find(|r| r.node == node)
    }

    pub fn into_vec(self) -> Vec<NodeResult> {
        self.results
    }

    /// Nodes carrying at least one error code, in set order.
    pub fn failed_nodes(&self) -> Vec<NodeErrors> {
        self.results
            .iter()
            .filter(|r| !r.error_codes.is_empty())
            .map(|r| NodeErrors {
                node: r.node.clone(),
                errors: r.error_codes.clone(),
            })
            .collect()
    }

    /// Results whose final return code is not success.
    pub fn unhealthy(&self) -> impl Iterator<Item = &NodeResult> {
        self.results.iter().filter(|r| !r.is_success())
    }
}

impl From<Vec<NodeResult>> for FleetResultSet {
    fn from(results: Vec<NodeResult>) -> Self {
        Self { results }
    }
}

impl IntoIterator for FleetResultSet {
    type Item = NodeResult;
    type IntoIter = std::vec::IntoIter<NodeResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

impl<'a> IntoIterator for &'a FleetResultSet {
    type Item = &'a NodeResult;
    type IntoIter = std::slice::Iter<'a, NodeResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}
