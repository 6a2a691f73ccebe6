//! Escalation submitter — decides whether to escalate, then submits one
//! batch with bounded retries.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use hpcguard_core::FleetResultSet;
use hpcguard_core::config::EscalationConfig;
use hpcguard_core::time::iso_utc;

use crate::BoxFuture;
use crate::client::{IncidentClient, SubmitMethod};
use crate::log::EscalationLog;
use crate::payload::{IncidentPayload, build_batch};
use crate::record::{EscalationRecord, RecordStatus};

/// Sleeps between attempts. Injected so tests need not wait.
pub type DelayFn = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

/// What [`EscalationSubmitter::run`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationOutcome {
    /// Escalation is turned off.
    Disabled,
    /// A successful submission already happened inside the dedup window.
    RecentlyEscalated { last: DateTime<Utc> },
    /// No node carries an error code.
    NothingToReport,
    Submitted { request_id: String, attempts: u32 },
    /// Every attempt failed.
    Exhausted { attempts: u32 },
}

/// Submission policy, resolved from [`EscalationConfig`].
#[derive(Debug, Clone)]
pub struct SubmitterSettings {
    pub enabled: bool,
    pub method: SubmitMethod,
    pub category: String,
    pub description: String,
    pub additional: Map<String, Value>,
    pub skip_window_hours: u32,
    pub max_nodes: usize,
    pub max_retries: u32,
    pub retry_interval: Duration,
}

impl SubmitterSettings {
    pub fn from_config(config: &EscalationConfig) -> Self {
        Self {
            enabled: config.enabled,
            method: SubmitMethod::parse(&config.method),
            category: config.category.clone(),
            description: config.description.clone(),
            additional: config.additional.clone(),
            skip_window_hours: config.skip_window_hours,
            max_nodes: config.max_nodes,
            max_retries: config.max_retries.max(1),
            retry_interval: config.retry_interval(),
        }
    }
}

pub struct EscalationSubmitter {
    settings: SubmitterSettings,
    client: Arc<dyn IncidentClient>,
    log: EscalationLog,
    delay: DelayFn,
}

impl EscalationSubmitter {
    pub fn new(settings: SubmitterSettings, client: Arc<dyn IncidentClient>, log: EscalationLog) -> Self {
        Self {
            settings,
            client,
            log,
            delay: Arc::new(|d: Duration| -> BoxFuture<'static, ()> {
                Box::pin(tokio::time::sleep(d))
            }),
        }
    }

    /// Replace the inter-attempt delay.
    pub fn with_delay(mut self, delay: DelayFn) -> Self {
        self.delay = delay;
        self
    }

    pub async fn run(&self, results: &FleetResultSet) -> EscalationOutcome {
        self.run_at(results, Utc::now()).await
    }

    /// Run with `now` as the evaluation instant for the dedup window and
    /// the payload timestamp. Never fails.
    pub async fn run_at(&self, results: &FleetResultSet, now: DateTime<Utc>) -> EscalationOutcome {
        let s = &self.settings;
        if !s.enabled {
            info!("escalation disabled by configuration");
            return EscalationOutcome::Disabled;
        }

        match self.log.recent_success(s.skip_window_hours, now) {
            Ok(Some(last)) => {
                info!(%last, window_hours = s.skip_window_hours, "recent escalation succeeded, skipping");
                return EscalationOutcome::RecentlyEscalated { last };
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "cannot read escalation log, assuming no recent escalation"),
        }

        let nodes = build_batch(results, s.max_nodes);
        if nodes.is_empty() {
            info!("no failed nodes, nothing to escalate");
            return EscalationOutcome::NothingToReport;
        }

        let mut payload = IncidentPayload::new(
            &s.category,
            &s.description,
            &s.additional,
            iso_utc(now),
            nodes.clone(),
        );

        for attempt in 1..=s.max_retries {
            let request_id = Uuid::new_v4().to_string();
            payload.set_request_id(&request_id);

            let status = match self.client.submit(&payload, s.method).await {
                Ok(response) => {
                    info!(
                        attempt,
                        %request_id,
                        http_status = response.http_status,
                        nodes = nodes.len(),
                        "escalation submitted"
                    );
                    RecordStatus::Success
                }
                Err(e) => {
                    warn!(attempt, max = s.max_retries, %request_id, error = %e, "escalation attempt failed");
                    RecordStatus::Failure
                }
            };

            let record = EscalationRecord::new(Utc::now(), status, &request_id, nodes.clone());
            if let Err(e) = self.log.append(&record) {
                warn!(error = %e, "failed to record escalation attempt");
            }

            if status == RecordStatus::Success {
                return EscalationOutcome::Submitted {
                    request_id,
                    attempts: attempt,
                };
            }
            if attempt < s.max_retries {
                (self.delay)(s.retry_interval).await;
            }
        }

        warn!(attempts = s.max_retries, "escalation retries exhausted");
        EscalationOutcome::Exhausted {
            attempts: s.max_retries,
        }
    }
}
