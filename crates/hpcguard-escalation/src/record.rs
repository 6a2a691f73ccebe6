//! Escalation log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hpcguard_core::NodeErrors;
use hpcguard_core::time::{iso_utc, parse_iso};

/// Outcome of one submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Success,
    Failure,
}

/// One line of the NDJSON escalation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    /// ISO-8601 UTC, second precision, `Z` suffix.
    pub timestamp: String,
    pub status: RecordStatus,
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub nodes: Vec<NodeErrors>,
}

impl EscalationRecord {
    pub fn new(
        at: DateTime<Utc>,
        status: RecordStatus,
        request_id: impl Into<String>,
        nodes: Vec<NodeErrors>,
    ) -> Self {
        Self {
            timestamp: iso_utc(at),
            status,
            request_id: request_id.into(),
            nodes,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RecordStatus::Success
    }

    /// Parsed `timestamp`; `None` if it is not valid ISO-8601.
    pub fn at(&self) -> Option<DateTime<Utc>> {
        parse_iso(&self.timestamp)
    }
}
