//! hpcguard.toml configuration parser.
//!
//! Every key is optional; a missing section takes the defaults below.
//! Durations are strings ("30s", "500ms", "5m") parsed with
//! [`parse_duration`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::duration::parse_duration;
use crate::error::{ConfigError, ConfigResult};
use crate::fleet::FleetSpec;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HpcGuardConfig {
    pub fleet: FleetConfig,
    pub coordinator: CoordinatorConfig,
    pub recovery: RecoveryConfig,
    pub probe: ProbeConfig,
    pub escalation: EscalationConfig,
    pub report: ReportConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub prefix: String,
    pub count: u32,
    /// Explicit node list; takes precedence over prefix/count.
    pub nodes: Option<Vec<String>>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            prefix: "slurm00-htc".to_string(),
            count: 2,
            nodes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub max_parallel: usize,
    /// Hard deadline for one node's whole recovery cycle.
    pub node_timeout: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_parallel: 10,
            node_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub enable_reboot: bool,
    pub max_reboot_count: u32,
    /// Pause between issuing a reboot and polling for reachability.
    pub recheck_interval: String,
    pub reachability_timeout: String,
    pub poll_interval: String,
    pub management_port: u16,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enable_reboot: true,
            max_reboot_count: 1,
            recheck_interval: "30s".to_string(),
            reachability_timeout: "300s".to_string(),
            poll_interval: "10s".to_string(),
            management_port: 22,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Node-side probe command; receives the probe kind as its argument
    /// and a JSON request on stdin.
    pub remote_command: String,
    pub ssh_user: Option<String>,
    pub gpu_timeout: String,
    pub single_timeout: String,
    pub multi_timeout: String,
    /// Single-node bandwidth pass threshold (GB/s, inclusive).
    pub single_bw_threshold: f64,
    /// Multi-node bandwidth pass threshold (GB/s, inclusive).
    pub multi_bw_threshold: f64,
    /// Bandwidth probes are skipped on nodes with fewer GPUs.
    pub min_gpu_count: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            remote_command: "hpcguard-probe".to_string(),
            ssh_user: None,
            gpu_timeout: "120s".to_string(),
            single_timeout: "60s".to_string(),
            multi_timeout: "180s".to_string(),
            single_bw_threshold: 480.0,
            multi_bw_threshold: 350.0,
            min_gpu_count: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub enabled: bool,
    pub endpoint: String,
    /// "post" or "put"; anything else is treated as "post".
    pub method: String,
    pub category: String,
    pub description: String,
    /// Extra properties merged into the incident payload.
    pub additional: Map<String, Value>,
    pub skip_window_hours: u32,
    pub max_nodes: usize,
    pub max_retries: u32,
    pub retry_interval: String,
    pub request_timeout: String,
    pub log_path: PathBuf,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://incidents.example.com/api/v1/incidents".to_string(),
            method: "post".to_string(),
            category: "NHC2001".to_string(),
            description: String::new(),
            additional: Map::new(),
            skip_window_hours: 24,
            max_nodes: 10,
            max_retries: 3,
            retry_interval: "5s".to_string(),
            request_timeout: "30s".to_string(),
            log_path: PathBuf::from("hpcguard_escalations.ndjson"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Each run writes into `<results_root>/<timestamp>/`.
    pub results_root: PathBuf,
    /// Pack the run directory into a `.tar.gz` once the run is done.
    pub archive: bool,
    /// Where archives go; defaults to `results_root`.
    pub archive_dir: Option<PathBuf>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            results_root: PathBuf::from("health_results"),
            archive: true,
            archive_dir: None,
        }
    }
}

impl ReportConfig {
    pub fn archive_dir(&self) -> &Path {
        self.archive_dir.as_deref().unwrap_or(&self.results_root)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
}

impl HpcGuardConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: HpcGuardConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks that serde cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.coordinator.max_parallel == 0 {
            return Err(ConfigError::Invalid(
                "coordinator.max_parallel must be at least 1".to_string(),
            ));
        }
        if self.escalation.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "escalation.max_retries must be at least 1".to_string(),
            ));
        }
        if self.escalation.max_nodes == 0 {
            return Err(ConfigError::Invalid(
                "escalation.max_nodes must be at least 1".to_string(),
            ));
        }
        if self.fleet.nodes.is_none() && self.fleet.prefix.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "fleet.prefix is empty and no fleet.nodes list given".to_string(),
            ));
        }

        let durations = [
            ("recovery.recheck_interval", &self.recovery.recheck_interval),
            ("recovery.reachability_timeout", &self.recovery.reachability_timeout),
            ("recovery.poll_interval", &self.recovery.poll_interval),
            ("probe.gpu_timeout", &self.probe.gpu_timeout),
            ("probe.single_timeout", &self.probe.single_timeout),
            ("probe.multi_timeout", &self.probe.multi_timeout),
            ("escalation.retry_interval", &self.escalation.retry_interval),
            ("escalation.request_timeout", &self.escalation.request_timeout),
        ];
        for (key, value) in durations {
            check_duration(key, value)?;
        }
        if let Some(t) = &self.coordinator.node_timeout {
            check_duration("coordinator.node_timeout", t)?;
        }
        Ok(())
    }

    /// Fleet membership for this run.
    pub fn fleet_spec(&self) -> FleetSpec {
        match &self.fleet.nodes {
            Some(nodes) => FleetSpec::Explicit(nodes.clone()),
            None => FleetSpec::Prefixed {
                prefix: self.fleet.prefix.clone(),
                count: self.fleet.count,
            },
        }
    }
}

impl CoordinatorConfig {
    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout.as_deref().and_then(parse_duration)
    }
}

impl RecoveryConfig {
    pub fn recheck_interval(&self) -> Duration {
        parse_duration(&self.recheck_interval).unwrap_or(Duration::from_secs(30))
    }

    pub fn reachability_timeout(&self) -> Duration {
        parse_duration(&self.reachability_timeout).unwrap_or(Duration::from_secs(300))
    }

    pub fn poll_interval(&self) -> Duration {
        parse_duration(&self.poll_interval).unwrap_or(Duration::from_secs(10))
    }
}

impl ProbeConfig {
    pub fn gpu_timeout(&self) -> Duration {
        parse_duration(&self.gpu_timeout).unwrap_or(Duration::from_secs(120))
    }

    pub fn single_timeout(&self) -> Duration {
        parse_duration(&self.single_timeout).unwrap_or(Duration::from_secs(60))
    }

    pub fn multi_timeout(&self) -> Duration {
        parse_duration(&self.multi_timeout).unwrap_or(Duration::from_secs(180))
    }
}

impl EscalationConfig {
    pub fn retry_interval(&self) -> Duration {
        parse_duration(&self.retry_interval).unwrap_or(Duration::from_secs(5))
    }

    pub fn request_timeout(&self) -> Duration {
        parse_duration(&self.request_timeout).unwrap_or(Duration::from_secs(30))
    }
}

fn check_duration(key: &str, value: &str) -> ConfigResult<()> {
    parse_duration(value)
        .map(|_| ())
        .ok_or_else(|| ConfigError::Invalid(format!("{key}: cannot parse duration {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = HpcGuardConfig::from_toml_str("").unwrap();
        assert_eq!(config.coordinator.max_parallel, 10);
        assert_eq!(config.recovery.max_reboot_count, 1);
        assert_eq!(config.escalation.max_retries, 3);
        assert_eq!(config.escalation.skip_window_hours, 24);
        assert_eq!(config.probe.single_bw_threshold, 480.0);
        assert_eq!(config.recovery.recheck_interval(), Duration::from_secs(30));
    }

    #[test]
    fn parse_full_sections() {
        let toml_str = r#"
[fleet]
nodes = ["gpu-a", "gpu-b"]

[coordinator]
max_parallel = 4
node_timeout = "45m"

[recovery]
enable_reboot = false
max_reboot_count = 2

[escalation]
method = "put"
max_nodes = 5
retry_interval = "500ms"

[escalation.additional]
impactedResourceId = "/subscriptions/x"
severity = 3
"#;
        let config = HpcGuardConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(
            config.fleet_spec(),
            FleetSpec::Explicit(vec!["gpu-a".to_string(), "gpu-b".to_string()])
        );
        assert_eq!(config.coordinator.node_timeout(), Some(Duration::from_secs(2700)));
        assert!(!config.recovery.enable_reboot);
        assert_eq!(config.escalation.retry_interval(), Duration::from_millis(500));
        assert_eq!(config.escalation.additional["severity"], 3);
        assert_eq!(
            config.escalation.additional["impactedResourceId"],
            "/subscriptions/x"
        );
    }

    #[test]
    fn prefixed_fleet_by_default() {
        let config = HpcGuardConfig::default();
        assert_eq!(
            config.fleet_spec().resolve(),
            vec!["slurm00-htc-1", "slurm00-htc-2"]
        );
    }

    #[test]
    fn rejects_zero_parallelism() {
        let err = HpcGuardConfig::from_toml_str("[coordinator]\nmax_parallel = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_bad_duration() {
        let err = HpcGuardConfig::from_toml_str("[recovery]\npoll_interval = \"often\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("recovery.poll_interval"));
    }

    #[test]
    fn rejects_overflowing_duration() {
        let toml_str = format!("[recovery]\nreachability_timeout = \"{}h\"\n", u64::MAX);
        let err = HpcGuardConfig::from_toml_str(&toml_str).unwrap_err();
        assert!(err.to_string().contains("recovery.reachability_timeout"));
    }

    #[test]
    fn archive_dir_falls_back_to_results_root() {
        let config = HpcGuardConfig::default();
        assert!(config.report.archive);
        assert_eq!(config.report.archive_dir(), Path::new("health_results"));

        let config =
            HpcGuardConfig::from_toml_str("[report]\narchive_dir = \"/srv/archives\"\n").unwrap();
        assert_eq!(config.report.archive_dir(), Path::new("/srv/archives"));
    }

    #[test]
    fn from_file_reports_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = HpcGuardConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
