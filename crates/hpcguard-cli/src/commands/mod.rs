pub mod escalate;
pub mod report;
pub mod run;

use std::path::Path;

use anyhow::Context;
use tracing::info;

use hpcguard_core::HpcGuardConfig;

/// Load the config file, or the built-in defaults when none is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<HpcGuardConfig> {
    match path {
        Some(path) => {
            let config = HpcGuardConfig::from_file(path)
                .with_context(|| format!("invalid config {}", path.display()))?;
            info!(path = %path.display(), "config loaded");
            Ok(config)
        }
        None => {
            let config = HpcGuardConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}
