//! Node recovery — drives one node through check, reboot and re-check.
//!
//! ```text
//! Checking ──pass──────────────────────────────────────────► Finalized(0)
//!    │ fail, reboots left                                      ▲
//!    ▼                                                         │
//! Remediating ──► AwaitingReachability ──► Checking ───────────┤
//!    fail, no reboots left / remediation disabled ──► Finalized(1)
//!    node unreachable at the start of a check ────► Finalized(255)
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use hpcguard_core::config::RecoveryConfig;
use hpcguard_core::{CheckOutcome, NodeResult, ProbeKind, RC_PROBE_FAILURE, RC_SUCCESS};

use crate::artifact::ResultStore;
use crate::probe::ProbeAdapter;
use crate::reachability::ReachabilityGate;
use crate::remediation::Remediator;

/// Current phase of a node's recovery cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryPhase {
    /// Running all probes.
    Checking,
    /// Issuing the reboot.
    Remediating,
    /// Waiting for the node to come back after a reboot.
    AwaitingReachability,
    /// Terminal: the result is immutable from here on.
    Finalized(Box<NodeResult>),
}

/// Knobs of the recovery loop.
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    pub enable_reboot: bool,
    pub max_reboot_count: u32,
    /// Delay after issuing a reboot before polling reachability; the node
    /// is still up right after the command returns.
    pub recheck_interval: Duration,
    pub reachability_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::from_config(&RecoveryConfig::default())
    }
}

impl RecoveryPolicy {
    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self {
            enable_reboot: config.enable_reboot,
            max_reboot_count: config.max_reboot_count,
            recheck_interval: config.recheck_interval(),
            reachability_timeout: config.reachability_timeout(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// Verdict of one pass over all probes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassEvaluation {
    /// AND over non-skipped outcomes; vacuously true when all skipped.
    pub overall: bool,
    /// Codes of non-skipped outcomes, in probe order.
    pub error_codes: Vec<String>,
    /// Per-probe status labels plus merged diagnostic details.
    pub extra: Map<String, Value>,
}

impl PassEvaluation {
    pub fn evaluate(outcomes: &[(ProbeKind, CheckOutcome)]) -> Self {
        let mut eval = PassEvaluation {
            overall: true,
            ..Default::default()
        };
        for (kind, outcome) in outcomes {
            eval.extra
                .insert(kind.status_key(), Value::from(outcome.status.label()));
            for (k, v) in &outcome.raw_detail {
                if NodeResult::is_reserved_field(k) {
                    debug!(probe = kind.key(), field = %k, "dropping detail that shadows a result field");
                    continue;
                }
                eval.extra.insert(k.clone(), v.clone());
            }
            if outcome.is_skipped() {
                continue;
            }
            eval.overall &= outcome.is_passed();
            eval.error_codes.extend(outcome.error_codes.iter().cloned());
        }
        eval
    }
}

/// Per-node recovery engine. Cheap to share across tasks behind an `Arc`.
pub struct NodeRecovery {
    probes: Vec<ProbeAdapter>,
    remediator: Arc<dyn Remediator>,
    gate: Arc<dyn ReachabilityGate>,
    policy: RecoveryPolicy,
    store: Option<ResultStore>,
}

impl NodeRecovery {
    pub fn new(
        probes: Vec<ProbeAdapter>,
        remediator: Arc<dyn Remediator>,
        gate: Arc<dyn ReachabilityGate>,
        policy: RecoveryPolicy,
    ) -> Self {
        Self {
            probes,
            remediator,
            gate,
            policy,
            store: None,
        }
    }

    /// Persist intermediate and final results to `store`.
    pub fn with_store(mut self, store: ResultStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    /// Run the full recovery cycle for `node`. Never fails: every outcome,
    /// including an unreachable node, is a [`NodeResult`].
    pub async fn run(&self, node: &str, timestamp: &str) -> NodeResult {
        let mut reboot_count = 0u32;
        let mut phase = RecoveryPhase::Checking;

        loop {
            phase = match phase {
                RecoveryPhase::Checking => {
                    if !self.gate.is_reachable(node).await {
                        warn!(%node, reboot_count, "node unreachable, cannot evaluate");
                        let mut result =
                            NodeResult::unreachable(node, timestamp, "node unreachable");
                        result.reboot_count = reboot_count;
                        RecoveryPhase::Finalized(Box::new(result))
                    } else {
                        let eval = self.check(node).await;
                        if eval.overall {
                            info!(%node, reboot_count, "all probes passed");
                            RecoveryPhase::Finalized(Box::new(build_result(
                                node,
                                timestamp,
                                RC_SUCCESS,
                                reboot_count,
                                eval,
                            )))
                        } else if self.policy.enable_reboot
                            && reboot_count < self.policy.max_reboot_count
                        {
                            reboot_count += 1;
                            info!(
                                %node,
                                attempt = reboot_count,
                                max = self.policy.max_reboot_count,
                                codes = ?eval.error_codes,
                                "probes failed, remediating"
                            );
                            let mut pending =
                                build_result(node, timestamp, RC_PROBE_FAILURE, reboot_count, eval);
                            pending.insert_extra("remediation_pending", true);
                            self.persist(&pending);
                            RecoveryPhase::Remediating
                        } else {
                            warn!(
                                %node,
                                reboot_count,
                                codes = ?eval.error_codes,
                                "probes failed, no remediation left"
                            );
                            RecoveryPhase::Finalized(Box::new(build_result(
                                node,
                                timestamp,
                                RC_PROBE_FAILURE,
                                reboot_count,
                                eval,
                            )))
                        }
                    }
                }

                RecoveryPhase::Remediating => {
                    if let Err(e) = self.remediator.reboot(node).await {
                        warn!(%node, error = %e, "reboot request failed");
                    }
                    RecoveryPhase::AwaitingReachability
                }

                RecoveryPhase::AwaitingReachability => {
                    tokio::time::sleep(self.policy.recheck_interval).await;
                    let back = self
                        .gate
                        .wait_reachable(
                            node,
                            self.policy.reachability_timeout,
                            self.policy.poll_interval,
                        )
                        .await;
                    if back {
                        debug!(%node, "node reachable again");
                    } else {
                        warn!(
                            %node,
                            timeout = ?self.policy.reachability_timeout,
                            "node did not come back in time, re-checking anyway"
                        );
                    }
                    RecoveryPhase::Checking
                }

                RecoveryPhase::Finalized(result) => {
                    self.persist(&result);
                    return *result;
                }
            };
        }
    }

    async fn check(&self, node: &str) -> PassEvaluation {
        let mut outcomes = Vec::with_capacity(self.probes.len());
        for adapter in &self.probes {
            outcomes.push((adapter.kind(), adapter.run_probe(node).await));
        }
        PassEvaluation::evaluate(&outcomes)
    }

    fn persist(&self, result: &NodeResult) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(result) {
                warn!(node = %result.node, error = %e, "failed to persist result");
            }
        }
    }
}

fn build_result(
    node: &str,
    timestamp: &str,
    returncode: i32,
    reboot_count: u32,
    eval: PassEvaluation,
) -> NodeResult {
    NodeResult {
        node: node.to_string(),
        timestamp: timestamp.to_string(),
        initial_returncode: returncode,
        final_returncode: returncode,
        reboot_count,
        error_codes: eval.error_codes,
        error: None,
        extra: eval.extra,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use hpcguard_core::RC_UNREACHABLE;

    use crate::BoxFuture;
    use crate::probe::Probe;

    /// Returns scripted outcomes in order; the last one repeats.
    struct ScriptedProbe {
        kind: ProbeKind,
        script: Mutex<VecDeque<CheckOutcome>>,
    }

    impl ScriptedProbe {
        fn adapter(kind: ProbeKind, script: Vec<CheckOutcome>) -> ProbeAdapter {
            let probe = ScriptedProbe {
                kind,
                script: Mutex::new(script.into()),
            };
            ProbeAdapter::new(Arc::new(probe), Duration::from_secs(5))
        }
    }

    impl Probe for ScriptedProbe {
        fn kind(&self) -> ProbeKind {
            self.kind
        }

        fn run<'a>(&'a self, _node: &'a str) -> BoxFuture<'a, anyhow::Result<CheckOutcome>> {
            let mut script = self.script.lock().unwrap();
            let outcome = if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            };
            Box::pin(async move { Ok(outcome) })
        }
    }

    /// `is_reachable` answers follow `checks` (the last one repeats);
    /// `wait_reachable` always answers `comes_back`.
    struct StubGate {
        checks: Mutex<VecDeque<bool>>,
        comes_back: bool,
        waits: AtomicU32,
    }

    impl StubGate {
        fn scripted(checks: &[bool], comes_back: bool) -> Arc<Self> {
            Arc::new(StubGate {
                checks: Mutex::new(checks.iter().copied().collect()),
                comes_back,
                waits: AtomicU32::new(0),
            })
        }

        fn steady(reachable: bool) -> Arc<Self> {
            Self::scripted(&[reachable], reachable)
        }
    }

    impl ReachabilityGate for StubGate {
        fn is_reachable<'a>(&'a self, _node: &'a str) -> BoxFuture<'a, bool> {
            let mut checks = self.checks.lock().unwrap();
            let up = if checks.len() > 1 {
                checks.pop_front().unwrap()
            } else {
                checks.front().copied().unwrap()
            };
            Box::pin(async move { up })
        }

        fn wait_reachable<'a>(
            &'a self,
            _node: &'a str,
            _timeout: Duration,
            _poll_interval: Duration,
        ) -> BoxFuture<'a, bool> {
            self.waits.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { self.comes_back })
        }
    }

    #[derive(Default)]
    struct CountingRemediator {
        reboots: AtomicU32,
    }

    impl Remediator for CountingRemediator {
        fn reboot<'a>(&'a self, _node: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
            self.reboots.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    fn policy(enable_reboot: bool, max_reboot_count: u32) -> RecoveryPolicy {
        RecoveryPolicy {
            enable_reboot,
            max_reboot_count,
            recheck_interval: Duration::ZERO,
            reachability_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn engine(
        probes: Vec<ProbeAdapter>,
        reachable: bool,
        policy: RecoveryPolicy,
    ) -> (NodeRecovery, Arc<CountingRemediator>) {
        engine_with_gate(probes, StubGate::steady(reachable), policy)
    }

    fn engine_with_gate(
        probes: Vec<ProbeAdapter>,
        gate: Arc<StubGate>,
        policy: RecoveryPolicy,
    ) -> (NodeRecovery, Arc<CountingRemediator>) {
        let remediator = Arc::new(CountingRemediator::default());
        let recovery = NodeRecovery::new(probes, remediator.clone(), gate, policy);
        (recovery, remediator)
    }

    #[tokio::test]
    async fn healthy_node_finalizes_without_reboot() {
        let probes = vec![
            ScriptedProbe::adapter(ProbeKind::GpuHealth, vec![CheckOutcome::passed()]),
            ScriptedProbe::adapter(
                ProbeKind::SingleNodeBandwidth,
                vec![CheckOutcome::passed().with_detail("nccl_bw", 512.0)],
            ),
        ];
        let (recovery, remediator) = engine(probes, true, policy(true, 1));

        let result = recovery.run("n1", "20260101-0000").await;
        assert_eq!(result.initial_returncode, RC_SUCCESS);
        assert_eq!(result.final_returncode, RC_SUCCESS);
        assert_eq!(result.reboot_count, 0);
        assert!(result.error_codes.is_empty());
        assert_eq!(result.extra_str("gpu_status"), Some("Passed"));
        assert_eq!(result.extra_f64("nccl_bw"), Some(512.0));
        assert_eq!(remediator.reboots.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn persistent_failure_exhausts_reboots() {
        let probes = vec![ScriptedProbe::adapter(
            ProbeKind::GpuHealth,
            vec![CheckOutcome::failed(["NHC2003"])],
        )];
        let (recovery, remediator) = engine(probes, true, policy(true, 2));

        let result = recovery.run("n1", "ts").await;
        assert_eq!(result.reboot_count, 2);
        assert_eq!(result.initial_returncode, RC_PROBE_FAILURE);
        assert_eq!(result.final_returncode, RC_PROBE_FAILURE);
        assert_eq!(result.error_codes, vec!["NHC2003"]);
        assert_eq!(remediator.reboots.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn remediation_disabled_fails_immediately() {
        let probes = vec![ScriptedProbe::adapter(
            ProbeKind::GpuHealth,
            vec![CheckOutcome::failed(["NHC2001"])],
        )];
        let (recovery, remediator) = engine(probes, true, policy(false, 3));

        let result = recovery.run("n2", "ts").await;
        assert_eq!(result.final_returncode, RC_PROBE_FAILURE);
        assert_eq!(result.reboot_count, 0);
        assert_eq!(remediator.reboots.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn recovers_after_one_reboot() {
        let probes = vec![ScriptedProbe::adapter(
            ProbeKind::SingleNodeBandwidth,
            vec![CheckOutcome::failed(["NCCL1006"]), CheckOutcome::passed()],
        )];
        let (recovery, _) = engine(probes, true, policy(true, 3));

        let result = recovery.run("n1", "ts").await;
        assert_eq!(result.reboot_count, 1);
        assert_eq!(result.final_returncode, RC_SUCCESS);
        assert!(result.error_codes.is_empty());
        assert!(!result.extra.contains_key("remediation_pending"));
    }

    #[tokio::test]
    async fn skipped_probe_does_not_affect_verdict() {
        let probes = vec![
            ScriptedProbe::adapter(ProbeKind::GpuHealth, vec![CheckOutcome::passed()]),
            ScriptedProbe::adapter(ProbeKind::MultiNodeBandwidth, vec![CheckOutcome::skipped()]),
        ];
        let (recovery, _) = engine(probes, true, policy(true, 1));

        let result = recovery.run("n1", "ts").await;
        assert!(result.is_success());
        assert_eq!(result.extra_str("multi_status"), Some("Skip"));
    }

    #[tokio::test]
    async fn unreachable_node_is_undetermined() {
        let probes = vec![ScriptedProbe::adapter(
            ProbeKind::GpuHealth,
            vec![CheckOutcome::passed()],
        )];
        let (recovery, remediator) = engine(probes, false, policy(true, 1));

        let result = recovery.run("n9", "ts").await;
        assert_eq!(result.initial_returncode, RC_UNREACHABLE);
        assert_eq!(result.final_returncode, RC_UNREACHABLE);
        assert_eq!(result.reboot_count, 0);
        assert!(result.error.is_some());
        assert_eq!(remediator.reboots.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wait_timeout_still_rechecks_a_node_that_is_back() {
        let probes = vec![ScriptedProbe::adapter(
            ProbeKind::GpuHealth,
            vec![CheckOutcome::failed(["NHC2003"]), CheckOutcome::passed()],
        )];
        let gate = StubGate::scripted(&[true], false);
        let (recovery, remediator) = engine_with_gate(probes, gate.clone(), policy(true, 2));

        let result = recovery.run("n1", "ts").await;
        assert_eq!(gate.waits.load(Ordering::SeqCst), 1);
        assert_eq!(remediator.reboots.load(Ordering::SeqCst), 1);
        assert_eq!(result.reboot_count, 1);
        assert_eq!(result.final_returncode, RC_SUCCESS);
    }

    #[tokio::test]
    async fn node_lost_after_reboot_is_undetermined() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultStore::open(tmp.path()).unwrap();
        let probes = vec![ScriptedProbe::adapter(
            ProbeKind::GpuHealth,
            vec![CheckOutcome::failed(["NHC2003"])],
        )];
        let gate = StubGate::scripted(&[true, false], false);
        let (recovery, remediator) = engine_with_gate(probes, gate.clone(), policy(true, 3));
        let recovery = recovery.with_store(store.clone());

        let result = recovery.run("n1", "ts").await;
        assert_eq!(gate.waits.load(Ordering::SeqCst), 1);
        assert_eq!(remediator.reboots.load(Ordering::SeqCst), 1);
        assert_eq!(result.final_returncode, RC_UNREACHABLE);
        assert_eq!(result.reboot_count, 1);
        assert!(result.error.is_some());

        let saved = store.load("n1").unwrap().unwrap();
        assert_eq!(saved, result);
    }

    #[tokio::test]
    async fn results_are_persisted() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultStore::open(tmp.path()).unwrap();
        let probes = vec![ScriptedProbe::adapter(
            ProbeKind::GpuHealth,
            vec![CheckOutcome::failed(["NHC2003"]), CheckOutcome::passed()],
        )];
        let (recovery, _) = engine(probes, true, policy(true, 1));
        let recovery = recovery.with_store(store.clone());

        let result = recovery.run("n1", "ts").await;
        let saved = store.load("n1").unwrap().unwrap();
        assert_eq!(saved, result);
        assert_eq!(saved.reboot_count, 1);
    }

    #[tokio::test]
    async fn colliding_detail_keys_keep_artifact_loadable() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultStore::open(tmp.path()).unwrap();
        let detail = CheckOutcome::failed(["NHC2003"])
            .with_detail("timestamp", "2025-01-01")
            .with_detail("node", "other")
            .with_detail("reboot_count", 7)
            .with_detail("gpu_temp", 81);
        let probes = vec![ScriptedProbe::adapter(
            ProbeKind::GpuHealth,
            vec![detail, CheckOutcome::passed()],
        )];
        let (recovery, _) = engine(probes, true, policy(true, 1));
        let recovery = recovery.with_store(store.clone());

        let result = recovery.run("n1", "20260101-0000").await;
        assert_eq!(result.reboot_count, 1);

        let saved = store.load("n1").unwrap().unwrap();
        assert_eq!(saved.node, "n1");
        assert_eq!(saved.timestamp, "20260101-0000");
        assert_eq!(saved.reboot_count, 1);
        assert_eq!(saved.final_returncode, RC_SUCCESS);
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[test]
    fn evaluation_drops_details_named_like_result_fields() {
        let eval = PassEvaluation::evaluate(&[(
            ProbeKind::SingleNodeBandwidth,
            CheckOutcome::passed()
                .with_detail("error_codes", "x")
                .with_detail("nccl_bw", 500.0),
        )]);
        assert!(!eval.extra.contains_key("error_codes"));
        assert_eq!(eval.extra["nccl_bw"], 500.0);
    }

    #[test]
    fn evaluation_concatenates_non_skipped_codes() {
        let eval = PassEvaluation::evaluate(&[
            (ProbeKind::GpuHealth, CheckOutcome::failed(["NHC2003"])),
            (ProbeKind::SingleNodeBandwidth, CheckOutcome::failed(["NCCL1006"])),
            (ProbeKind::MultiNodeBandwidth, CheckOutcome::skipped()),
        ]);
        assert!(!eval.overall);
        assert_eq!(eval.error_codes, vec!["NHC2003", "NCCL1006"]);

        let vacuous = PassEvaluation::evaluate(&[(ProbeKind::GpuHealth, CheckOutcome::skipped())]);
        assert!(vacuous.overall);
    }
}
