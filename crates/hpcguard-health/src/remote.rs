//! Remote probes — run the node-side probe command over ssh and classify
//! its JSON reply.
//!
//! The node-side command is invoked as `<remote_command> <kind key>` and
//! reads a [`ProbeRequest`] from stdin. It answers with a [`ProbeResponse`]
//! on stdout. Thresholds are applied here, not on the node, so a fleet-wide
//! config change needs no redeploy of the node-side tooling.

use std::sync::{Arc, LazyLock};

use anyhow::{Context, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use hpcguard_core::config::ProbeConfig;
use hpcguard_core::{CheckOutcome, ProbeKind};

use crate::BoxFuture;
use crate::probe::{Probe, ProbeAdapter};
use crate::ssh::SshCommand;

/// Wire version of [`ProbeRequest`].
pub const PROBE_REQUEST_VERSION: u32 = 1;

/// Code attached to a failing GPU check that reported none.
pub const GPU_DEFAULT_CODE: &str = "NHC2001";

static NHC_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bNHC\d{4}\b").expect("static regex"));

/// Request sent to the node-side probe command on stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRequest {
    pub version: u32,
    pub kind: ProbeKind,
    pub node: String,
    pub timestamp: String,
    /// Full fleet membership; used by the multi-node benchmark.
    pub fleet: Vec<String>,
    pub min_gpu_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_threshold: Option<f64>,
}

/// Reply of the node-side probe command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeResponse {
    #[serde(default)]
    pub passed: Option<bool>,
    #[serde(default)]
    pub error_codes: Vec<String>,
    #[serde(default)]
    pub gpu_count: Option<u32>,
    /// Measured bus bandwidth in GB/s.
    #[serde(default)]
    pub bandwidth: Option<f64>,
    /// Raw diagnostic log (GPU health check output).
    #[serde(default)]
    pub log: Option<String>,
    #[serde(default)]
    pub detail: Map<String, Value>,
}

/// Thresholds applied when classifying a [`ProbeResponse`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub min_gpu_count: u32,
    pub single_bw: f64,
    pub multi_bw: f64,
}

impl Thresholds {
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self {
            min_gpu_count: config.min_gpu_count,
            single_bw: config.single_bw_threshold,
            multi_bw: config.multi_bw_threshold,
        }
    }

    fn bandwidth(&self, kind: ProbeKind) -> Option<f64> {
        match kind {
            ProbeKind::GpuHealth => None,
            ProbeKind::SingleNodeBandwidth => Some(self.single_bw),
            ProbeKind::MultiNodeBandwidth => Some(self.multi_bw),
        }
    }
}

/// A [`Probe`] executed on the node through ssh.
pub struct RemoteProbe {
    kind: ProbeKind,
    ssh: SshCommand,
    remote_command: String,
    fleet: Arc<Vec<String>>,
    timestamp: String,
    thresholds: Thresholds,
}

impl RemoteProbe {
    pub fn new(
        kind: ProbeKind,
        ssh: SshCommand,
        remote_command: impl Into<String>,
        fleet: Arc<Vec<String>>,
        timestamp: impl Into<String>,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            kind,
            ssh,
            remote_command: remote_command.into(),
            fleet,
            timestamp: timestamp.into(),
            thresholds,
        }
    }

    pub fn request(&self, node: &str) -> ProbeRequest {
        ProbeRequest {
            version: PROBE_REQUEST_VERSION,
            kind: self.kind,
            node: node.to_string(),
            timestamp: self.timestamp.clone(),
            fleet: self.fleet.as_ref().clone(),
            min_gpu_count: self.thresholds.min_gpu_count,
            bandwidth_threshold: self.thresholds.bandwidth(self.kind),
        }
    }

    async fn invoke(&self, node: &str) -> anyhow::Result<CheckOutcome> {
        let request = serde_json::to_vec(&self.request(node))?;
        let output = self
            .ssh
            .run(node, &[&self.remote_command, self.kind.key()], Some(&request))
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "probe command exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }

        let response: ProbeResponse = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("unreadable {} probe reply from {node}", self.kind))?;
        debug!(
            %node,
            probe = %self.kind,
            passed = ?response.passed,
            bandwidth = ?response.bandwidth,
            "probe reply"
        );

        Ok(classify(
            self.kind,
            response,
            &self.thresholds,
            self.fleet.len(),
        ))
    }
}

impl Probe for RemoteProbe {
    fn kind(&self) -> ProbeKind {
        self.kind
    }

    fn run<'a>(&'a self, node: &'a str) -> BoxFuture<'a, anyhow::Result<CheckOutcome>> {
        Box::pin(self.invoke(node))
    }
}

/// Build the standard probe suite (GPU, single-node, multi-node) for a run.
pub fn remote_probe_suite(
    config: &ProbeConfig,
    fleet: Arc<Vec<String>>,
    timestamp: &str,
) -> Vec<ProbeAdapter> {
    let ssh = SshCommand::new(config.ssh_user.clone());
    let thresholds = Thresholds::from_config(config);

    ProbeKind::ALL
        .iter()
        .map(|&kind| {
            let timeout = match kind {
                ProbeKind::GpuHealth => config.gpu_timeout(),
                ProbeKind::SingleNodeBandwidth => config.single_timeout(),
                ProbeKind::MultiNodeBandwidth => config.multi_timeout(),
            };
            let probe = RemoteProbe::new(
                kind,
                ssh.clone(),
                config.remote_command.clone(),
                Arc::clone(&fleet),
                timestamp,
                thresholds,
            );
            ProbeAdapter::new(Arc::new(probe), timeout)
        })
        .collect()
}

/// Turn a node-side reply into an outcome.
pub fn classify(
    kind: ProbeKind,
    response: ProbeResponse,
    thresholds: &Thresholds,
    fleet_size: usize,
) -> CheckOutcome {
    match kind {
        ProbeKind::GpuHealth => classify_gpu(response),
        ProbeKind::SingleNodeBandwidth => {
            classify_bandwidth(kind, response, thresholds.min_gpu_count, thresholds.single_bw)
        }
        ProbeKind::MultiNodeBandwidth if fleet_size < 2 => {
            debug!("multi-node bandwidth skipped: fleet has fewer than 2 nodes");
            CheckOutcome::skipped()
        }
        ProbeKind::MultiNodeBandwidth => {
            classify_bandwidth(kind, response, thresholds.min_gpu_count, thresholds.multi_bw)
        }
    }
}

/// GPU health: the log is authoritative when present.
pub fn classify_gpu(response: ProbeResponse) -> CheckOutcome {
    let ProbeResponse {
        passed,
        error_codes,
        log,
        detail,
        ..
    } = response;

    let mut codes = error_codes;
    let mut extra = detail;
    let ok = match log.as_deref() {
        Some(log) => {
            for m in NHC_CODE.find_iter(log) {
                if !codes.iter().any(|c| c == m.as_str()) {
                    codes.push(m.as_str().to_string());
                }
            }
            for line in log.lines() {
                if let Some(v) = line.split_once("PHYSICAL HOST NAME:").map(|(_, v)| v.trim()) {
                    extra.insert("physical_host_name".into(), Value::from(v));
                }
                if let Some(v) = line.split_once("VM NAME:").map(|(_, v)| v.trim()) {
                    extra.insert("vm_name".into(), Value::from(v));
                }
            }
            !log.contains("FAIL") && !log.contains("Error")
        }
        None => passed.unwrap_or(codes.is_empty()),
    };

    let mut outcome = if ok {
        CheckOutcome::passed()
    } else {
        if codes.is_empty() {
            codes.push(GPU_DEFAULT_CODE.to_string());
        }
        CheckOutcome::failed(codes)
    };
    outcome.raw_detail = extra;
    outcome
}

/// Bandwidth benchmarks: skip on too few GPUs, pass on `bw >= threshold`.
pub fn classify_bandwidth(
    kind: ProbeKind,
    response: ProbeResponse,
    min_gpu_count: u32,
    threshold: f64,
) -> CheckOutcome {
    if matches!(response.gpu_count, Some(n) if n < min_gpu_count) {
        debug!(probe = %kind, gpu_count = ?response.gpu_count, min_gpu_count, "too few GPUs, skipping");
        let mut outcome = CheckOutcome::skipped();
        outcome.raw_detail = response.detail;
        return outcome;
    }

    let (missing, below) = match kind {
        ProbeKind::MultiNodeBandwidth => ("NCCL_MULTI1006", "NCCL_MULTI1007"),
        _ => ("NCCL1005", "NCCL1006"),
    };

    let mut outcome = match response.bandwidth {
        None => CheckOutcome::failed([missing]),
        Some(bw) if bw >= threshold => CheckOutcome::passed(),
        Some(_) => CheckOutcome::failed([below]),
    };
    outcome.raw_detail = response.detail;
    if let Some(bw) = response.bandwidth {
        outcome
            .raw_detail
            .insert(kind.bandwidth_key(), Value::from(bw));
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpcguard_core::ProbeStatus;

    fn thresholds() -> Thresholds {
        Thresholds {
            min_gpu_count: 8,
            single_bw: 480.0,
            multi_bw: 350.0,
        }
    }

    fn bw(gpus: u32, bandwidth: Option<f64>) -> ProbeResponse {
        ProbeResponse {
            gpu_count: Some(gpus),
            bandwidth,
            ..Default::default()
        }
    }

    #[test]
    fn gpu_log_without_failures_passes() {
        let outcome = classify_gpu(ProbeResponse {
            log: Some("PHYSICAL HOST NAME: rack7-h3\nVM NAME: gpu-01\nall checks ok\n".into()),
            ..Default::default()
        });
        assert!(outcome.is_passed());
        assert!(outcome.error_codes.is_empty());
        assert_eq!(outcome.raw_detail["physical_host_name"], "rack7-h3");
        assert_eq!(outcome.raw_detail["vm_name"], "gpu-01");
    }

    #[test]
    fn gpu_log_failure_extracts_codes() {
        let outcome = classify_gpu(ProbeResponse {
            log: Some("ERROR: NHC2003 row remap FAIL\nNHC2003 again\nNHC2010 ecc\n".into()),
            ..Default::default()
        });
        assert_eq!(outcome.status, ProbeStatus::Failed);
        assert_eq!(outcome.error_codes, vec!["NHC2003", "NHC2010"]);
    }

    #[test]
    fn gpu_failure_without_codes_gets_default() {
        let outcome = classify_gpu(ProbeResponse {
            log: Some("Error: health check aborted".into()),
            ..Default::default()
        });
        assert_eq!(outcome.error_codes, vec![GPU_DEFAULT_CODE]);
    }

    #[test]
    fn gpu_without_log_uses_flag() {
        let outcome = classify_gpu(ProbeResponse {
            passed: Some(false),
            ..Default::default()
        });
        assert_eq!(outcome.status, ProbeStatus::Failed);

        let outcome = classify_gpu(ProbeResponse {
            passed: Some(true),
            ..Default::default()
        });
        assert!(outcome.is_passed());
    }

    #[test]
    fn bandwidth_threshold_is_inclusive() {
        let outcome = classify_bandwidth(ProbeKind::SingleNodeBandwidth, bw(8, Some(480.0)), 8, 480.0);
        assert!(outcome.is_passed());
        assert_eq!(outcome.raw_detail["nccl_bw"], 480.0);

        let outcome = classify_bandwidth(ProbeKind::SingleNodeBandwidth, bw(8, Some(479.9)), 8, 480.0);
        assert_eq!(outcome.error_codes, vec!["NCCL1006"]);
    }

    #[test]
    fn bandwidth_missing_measurement_fails() {
        let outcome = classify_bandwidth(ProbeKind::SingleNodeBandwidth, bw(8, None), 8, 480.0);
        assert_eq!(outcome.error_codes, vec!["NCCL1005"]);

        let outcome = classify_bandwidth(ProbeKind::MultiNodeBandwidth, bw(8, None), 8, 350.0);
        assert_eq!(outcome.error_codes, vec!["NCCL_MULTI1006"]);
    }

    #[test]
    fn too_few_gpus_skips() {
        let outcome = classify_bandwidth(ProbeKind::SingleNodeBandwidth, bw(4, Some(10.0)), 8, 480.0);
        assert!(outcome.is_skipped());
        assert!(outcome.error_codes.is_empty());
    }

    #[test]
    fn multi_node_skips_on_single_node_fleet() {
        let outcome = classify(ProbeKind::MultiNodeBandwidth, bw(8, Some(10.0)), &thresholds(), 1);
        assert!(outcome.is_skipped());

        let outcome = classify(ProbeKind::MultiNodeBandwidth, bw(8, Some(10.0)), &thresholds(), 2);
        assert_eq!(outcome.error_codes, vec!["NCCL_MULTI1007"]);
    }

    #[test]
    fn request_carries_kind_threshold() {
        let probe = RemoteProbe::new(
            ProbeKind::MultiNodeBandwidth,
            SshCommand::default(),
            "hpcguard-probe",
            Arc::new(vec!["n1".into(), "n2".into()]),
            "20260101-0000",
            thresholds(),
        );
        let req = probe.request("n2");
        assert_eq!(req.version, PROBE_REQUEST_VERSION);
        assert_eq!(req.bandwidth_threshold, Some(350.0));
        assert_eq!(req.fleet.len(), 2);

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["kind"], "multi_node_bandwidth");
    }

    #[test]
    fn response_parses_with_missing_fields() {
        let resp: ProbeResponse = serde_json::from_str(r#"{"bandwidth": 512.5}"#).unwrap();
        assert_eq!(resp.bandwidth, Some(512.5));
        assert!(resp.error_codes.is_empty());
        assert!(resp.passed.is_none());
    }
}
