//! hpcguard-escalation — submits unhealthy nodes to an incident-intake
//! endpoint.
//!
//! # Flow
//!
//! ```text
//! EscalationSubmitter::run(results)
//!   ├── disabled?                      → Disabled
//!   ├── EscalationLog: success < window → RecentlyEscalated
//!   ├── failed_nodes() empty?           → NothingToReport
//!   └── build batch (≤ max_nodes)
//!         └── attempt 1..=max_retries
//!               ├── IncidentClient::submit (fresh requestId)
//!               ├── EscalationLog::append(record)
//!               └── success → Submitted, else delay → retry
//!                                           → Exhausted
//! ```

use std::future::Future;
use std::pin::Pin;

pub mod client;
pub mod error;
pub mod log;
pub mod payload;
pub mod record;
pub mod submitter;

pub use client::{HttpIncidentClient, IncidentClient, SubmitMethod, SubmitResponse};
pub use error::{EscalationError, EscalationResult};
pub use log::EscalationLog;
pub use payload::{IncidentPayload, IncidentProperties, build_batch};
pub use record::{EscalationRecord, RecordStatus};
pub use submitter::{DelayFn, EscalationOutcome, EscalationSubmitter, SubmitterSettings};

/// Boxed, sendable future returned by [`IncidentClient`] and [`DelayFn`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
