//! `hpcguard run` — the full pipeline.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hpcguard_core::HpcGuardConfig;
use hpcguard_core::time::run_timestamp;
use hpcguard_escalation::{
    EscalationLog, EscalationOutcome, EscalationSubmitter, HttpIncidentClient, SubmitterSettings,
};
use hpcguard_fleet::FleetCoordinator;
use hpcguard_health::{
    NodeRecovery, RecoveryPolicy, ResultStore, SshCommand, SshRemediator, TcpReachability,
    remote_probe_suite,
};
use hpcguard_report::{Notifier, archive_run, write_reports};

use super::load_config;

/// Command-line overrides of the config file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub timestamp: Option<String>,
    pub max_parallel: Option<usize>,
    pub escalate: bool,
}

pub async fn run(config_path: Option<&Path>, options: RunOptions) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(max_parallel) = options.max_parallel {
        config.coordinator.max_parallel = max_parallel;
        config.validate()?;
    }

    let nodes = config.fleet_spec().resolve();
    if nodes.is_empty() {
        bail!("fleet is empty");
    }
    let timestamp = options
        .timestamp
        .unwrap_or_else(|| run_timestamp(Utc::now()));

    // Setup errors surface before any node is touched.
    let result_dir = config.report.results_root.join(&timestamp);
    let store = ResultStore::open(&result_dir)
        .with_context(|| format!("cannot use result directory {}", result_dir.display()))?;
    let submitter = if options.escalate && config.escalation.enabled {
        Some(build_submitter(&config)?)
    } else {
        None
    };

    info!(
        nodes = nodes.len(),
        %timestamp,
        dir = %result_dir.display(),
        "starting health check run"
    );

    let recovery = build_recovery(&config, &nodes, &timestamp).with_store(store);
    let coordinator =
        FleetCoordinator::from_config(Arc::new(recovery), &config.coordinator, &timestamp);

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling remaining nodes");
                cancel.cancel();
            }
        })
    };

    let results = coordinator.run_fleet(&nodes, Some(cancel)).await;
    watcher.abort();

    if let Err(e) = write_reports(&results, &result_dir) {
        warn!(error = %e, "failed to write summaries");
    }

    if config.report.archive {
        let report = &config.report;
        if let Err(e) = archive_run(&report.results_root, &timestamp, report.archive_dir()) {
            warn!(error = %e, "failed to archive run");
        }
    }

    if let Some(url) = config.notify.webhook_url.as_deref() {
        if let Some(notifier) = Notifier::new(url) {
            notifier.notify(&results).await;
        }
    }

    if let Some(submitter) = submitter {
        report_outcome(&submitter.run(&results).await);
    }

    let healthy = results.iter().filter(|r| r.is_success()).count();
    let unreachable = results.iter().filter(|r| r.is_unreachable()).count();
    println!(
        "{healthy}/{} nodes healthy, {} unhealthy, {unreachable} unreachable; results in {}",
        results.len(),
        results.len() - healthy - unreachable,
        result_dir.display()
    );
    Ok(())
}

/// Wire the production probes, remediator and reachability gate.
pub fn build_recovery(config: &HpcGuardConfig, nodes: &[String], timestamp: &str) -> NodeRecovery {
    let probes = remote_probe_suite(&config.probe, Arc::new(nodes.to_vec()), timestamp);
    let remediator = SshRemediator::new(SshCommand::new(config.probe.ssh_user.clone()));
    let gate = TcpReachability::new(config.recovery.management_port);

    NodeRecovery::new(
        probes,
        Arc::new(remediator),
        Arc::new(gate),
        RecoveryPolicy::from_config(&config.recovery),
    )
}

pub fn build_submitter(config: &HpcGuardConfig) -> anyhow::Result<EscalationSubmitter> {
    let esc = &config.escalation;
    if esc.endpoint.trim().is_empty() {
        bail!("escalation.endpoint is empty");
    }
    let log = EscalationLog::open(&esc.log_path)?;
    let client = HttpIncidentClient::new(&esc.endpoint, esc.request_timeout())?;
    Ok(EscalationSubmitter::new(
        SubmitterSettings::from_config(esc),
        Arc::new(client),
        log,
    ))
}

pub fn report_outcome(outcome: &EscalationOutcome) {
    match outcome {
        EscalationOutcome::Disabled => info!("escalation disabled"),
        EscalationOutcome::RecentlyEscalated { last } => {
            info!(%last, "escalation skipped, already escalated recently")
        }
        EscalationOutcome::NothingToReport => info!("escalation not needed"),
        EscalationOutcome::Submitted {
            request_id,
            attempts,
        } => info!(%request_id, attempts, "escalation submitted"),
        EscalationOutcome::Exhausted { attempts } => {
            warn!(attempts, "escalation failed after all attempts")
        }
    }
}
