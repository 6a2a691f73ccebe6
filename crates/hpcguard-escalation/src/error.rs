//! Error types for escalation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for escalation operations.
pub type EscalationResult<T> = Result<T, EscalationError>;

/// Errors raised by the escalation log and the incident client.
///
/// The submitter itself never returns these: transport errors become
/// failure records, log errors are logged.
#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("escalation log {path} is not usable: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("intake endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
}
