//! `hpcguard escalate` — escalate from stored results.

use std::path::Path;

use anyhow::{Context, bail};
use tracing::info;

use hpcguard_health::ResultStore;

use super::load_config;
use super::run::{build_submitter, report_outcome};

pub async fn escalate(config_path: Option<&Path>, results_dir: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    if !results_dir.is_dir() {
        bail!("{} is not a directory", results_dir.display());
    }

    let results = ResultStore::open(results_dir)
        .and_then(|store| store.load_all())
        .with_context(|| format!("cannot read results from {}", results_dir.display()))?;
    info!(nodes = results.len(), dir = %results_dir.display(), "results loaded");

    let submitter = build_submitter(&config)?;
    let outcome = submitter.run(&results).await;
    report_outcome(&outcome);
    println!("{outcome:?}");
    Ok(())
}
