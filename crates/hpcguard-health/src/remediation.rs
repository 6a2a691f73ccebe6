//! Remediation — reboot a node that failed its health checks.

use std::time::Duration;

use anyhow::anyhow;
use tracing::{debug, info};

use crate::BoxFuture;
use crate::ssh::SshCommand;

/// Triggers the remediation action on a node.
pub trait Remediator: Send + Sync {
    /// Issue a reboot. Returning `Ok` means the request was delivered, not
    /// that the node actually restarted.
    fn reboot<'a>(&'a self, node: &'a str) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Reboots nodes with `sudo reboot` over ssh.
#[derive(Debug, Clone)]
pub struct SshRemediator {
    ssh: SshCommand,
    timeout: Duration,
}

impl SshRemediator {
    pub fn new(ssh: SshCommand) -> Self {
        Self {
            ssh,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn reboot_node(&self, node: &str) -> anyhow::Result<()> {
        info!(%node, "issuing reboot");
        let output = tokio::time::timeout(self.timeout, self.ssh.run(node, &["sudo", "reboot"], None))
            .await
            .map_err(|_| anyhow!("reboot command to {node} timed out after {:?}", self.timeout))??;

        // The session usually drops while the node goes down, so a
        // non-zero exit is expected.
        if !output.status.success() {
            debug!(
                %node,
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "reboot session ended abnormally"
            );
        }
        Ok(())
    }
}

impl Remediator for SshRemediator {
    fn reboot<'a>(&'a self, node: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(self.reboot_node(node))
    }
}
