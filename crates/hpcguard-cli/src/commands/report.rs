//! `hpcguard report` — re-render summaries from stored results.

use std::path::Path;

use anyhow::{Context, bail};

use hpcguard_health::ResultStore;
use hpcguard_report::write_reports;

pub fn report(results_dir: &Path) -> anyhow::Result<()> {
    if !results_dir.is_dir() {
        bail!("{} is not a directory", results_dir.display());
    }

    let results = ResultStore::open(results_dir)
        .and_then(|store| store.load_all())
        .with_context(|| format!("cannot read results from {}", results_dir.display()))?;
    let paths = write_reports(&results, results_dir)?;

    println!("{}\n{}", paths.csv.display(), paths.html.display());
    Ok(())
}
