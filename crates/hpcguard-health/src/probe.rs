//! Probe adapter — runs one health probe and normalizes its result.
//!
//! The recovery state machine only ever sees a [`CheckOutcome`]: errors
//! and timeouts raised by the probe collaborator are folded into a failed
//! outcome with a probe-specific error code.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use hpcguard_core::{CheckOutcome, ProbeKind, ProbeStatus};

use crate::BoxFuture;

/// A health probe collaborator.
pub trait Probe: Send + Sync {
    fn kind(&self) -> ProbeKind;

    /// Run the probe against `node`. Errors are collaborator faults
    /// (execution failure, unreadable output), not probe failures.
    fn run<'a>(&'a self, node: &'a str) -> BoxFuture<'a, anyhow::Result<CheckOutcome>>;
}

/// Wraps a [`Probe`] with a timeout and result normalization.
#[derive(Clone)]
pub struct ProbeAdapter {
    probe: Arc<dyn Probe>,
    timeout: Duration,
}

impl ProbeAdapter {
    pub fn new(probe: Arc<dyn Probe>, timeout: Duration) -> Self {
        Self { probe, timeout }
    }

    pub fn kind(&self) -> ProbeKind {
        self.probe.kind()
    }

    /// Run the probe; never fails.
    pub async fn run_probe(&self, node: &str) -> CheckOutcome {
        let kind = self.probe.kind();
        let outcome = match tokio::time::timeout(self.timeout, self.probe.run(node)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(%node, probe = %kind, error = %e, "probe execution failed");
                CheckOutcome::failed([error_code(kind)])
                    .with_detail(format!("{}_error", kind.key()), format!("{e:#}"))
            }
            Err(_) => {
                warn!(%node, probe = %kind, timeout = ?self.timeout, "probe timed out");
                CheckOutcome::failed([timeout_code(kind)])
            }
        };

        let outcome = normalize(kind, outcome);
        debug!(
            %node,
            probe = %kind,
            status = outcome.status.label(),
            codes = ?outcome.error_codes,
            "probe finished"
        );
        outcome
    }
}

/// Error code for a probe that could not be executed.
pub fn error_code(kind: ProbeKind) -> String {
    format!("{}_PROBE_ERROR", kind.code_prefix())
}

/// Error code for a probe that exceeded its timeout.
pub fn timeout_code(kind: ProbeKind) -> String {
    format!("{}_PROBE_TIMEOUT", kind.code_prefix())
}

/// Error code for a failure reported without any code.
pub fn unspecified_code(kind: ProbeKind) -> String {
    format!("{}_UNSPECIFIED", kind.code_prefix())
}

/// Enforce the outcome invariants: failures carry at least one code,
/// skips carry none.
pub fn normalize(kind: ProbeKind, mut outcome: CheckOutcome) -> CheckOutcome {
    match outcome.status {
        ProbeStatus::Failed if outcome.error_codes.is_empty() => {
            outcome.error_codes.push(unspecified_code(kind));
        }
        ProbeStatus::Skipped if !outcome.error_codes.is_empty() => {
            debug!(probe = %kind, codes = ?outcome.error_codes, "dropping codes of skipped probe");
            outcome.error_codes.clear();
        }
        _ => {}
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    enum Behavior {
        Return(CheckOutcome),
        Fail,
        Hang,
    }

    struct FakeProbe {
        behavior: Behavior,
    }

    impl Probe for FakeProbe {
        fn kind(&self) -> ProbeKind {
            ProbeKind::SingleNodeBandwidth
        }

        fn run<'a>(&'a self, _node: &'a str) -> BoxFuture<'a, anyhow::Result<CheckOutcome>> {
            Box::pin(async move {
                match &self.behavior {
                    Behavior::Return(o) => Ok(o.clone()),
                    Behavior::Fail => Err(anyhow!("ssh: connect to host refused")),
                    Behavior::Hang => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(CheckOutcome::passed())
                    }
                }
            })
        }
    }

    fn adapter(behavior: Behavior, timeout: Duration) -> ProbeAdapter {
        ProbeAdapter::new(Arc::new(FakeProbe { behavior }), timeout)
    }

    #[tokio::test]
    async fn passes_through_success() {
        let a = adapter(Behavior::Return(CheckOutcome::passed()), Duration::from_secs(1));
        let outcome = a.run_probe("n1").await;
        assert!(outcome.is_passed());
        assert!(outcome.error_codes.is_empty());
    }

    #[tokio::test]
    async fn execution_error_becomes_failed_outcome() {
        let a = adapter(Behavior::Fail, Duration::from_secs(1));
        let outcome = a.run_probe("n1").await;
        assert_eq!(outcome.status, ProbeStatus::Failed);
        assert_eq!(outcome.error_codes, vec!["NCCL_PROBE_ERROR"]);
        assert!(outcome.raw_detail.contains_key("nccl_error"));
    }

    #[tokio::test]
    async fn timeout_becomes_failed_outcome() {
        let a = adapter(Behavior::Hang, Duration::from_millis(50));
        let outcome = a.run_probe("n1").await;
        assert_eq!(outcome.status, ProbeStatus::Failed);
        assert_eq!(outcome.error_codes, vec!["NCCL_PROBE_TIMEOUT"]);
    }

    #[tokio::test]
    async fn failure_without_codes_gets_one() {
        let a = adapter(
            Behavior::Return(CheckOutcome::failed(Vec::<String>::new())),
            Duration::from_secs(1),
        );
        let outcome = a.run_probe("n1").await;
        assert_eq!(outcome.error_codes, vec!["NCCL_UNSPECIFIED"]);
    }

    #[tokio::test]
    async fn skip_drops_codes() {
        let mut skipped = CheckOutcome::skipped();
        skipped.error_codes.push("NCCL1002".to_string());
        let a = adapter(Behavior::Return(skipped), Duration::from_secs(1));
        let outcome = a.run_probe("n1").await;
        assert!(outcome.is_skipped());
        assert!(outcome.error_codes.is_empty());
    }
}
