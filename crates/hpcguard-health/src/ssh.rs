//! Thin wrapper around the `ssh` client binary.

use std::process::{Output, Stdio};

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::trace;

/// Options passed as `-o key=value` on every invocation.
const DEFAULT_OPTIONS: &[(&str, &str)] = &[
    ("StrictHostKeyChecking", "no"),
    ("UserKnownHostsFile", "/dev/null"),
    ("BatchMode", "yes"),
    ("ConnectTimeout", "10"),
];

/// How to reach a node's shell.
#[derive(Debug, Clone)]
pub struct SshCommand {
    user: Option<String>,
    options: Vec<(String, String)>,
}

impl Default for SshCommand {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SshCommand {
    pub fn new(user: Option<String>) -> Self {
        Self {
            user,
            options: DEFAULT_OPTIONS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Add or override a `-o` option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.options.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.options.push((key, value)),
        }
        self
    }

    /// `user@node`, or just `node` when no user is configured.
    pub fn destination(&self, node: &str) -> String {
        match &self.user {
            Some(user) => format!("{user}@{node}"),
            None => node.to_string(),
        }
    }

    /// Argument vector for running `remote_args` on `node`.
    pub fn args(&self, node: &str, remote_args: &[&str]) -> Vec<String> {
        let mut args = Vec::with_capacity(self.options.len() * 2 + 1 + remote_args.len());
        for (k, v) in &self.options {
            args.push("-o".to_string());
            args.push(format!("{k}={v}"));
        }
        args.push(self.destination(node));
        args.extend(remote_args.iter().map(|a| a.to_string()));
        args
    }

    /// Build the `ssh` command. The child is killed if the handle is dropped,
    /// so an enclosing timeout also terminates the remote session.
    pub fn command(&self, node: &str, remote_args: &[&str]) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(self.args(node, remote_args))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run `remote_args` on `node`, optionally feeding `stdin`, and collect
    /// the output. A non-zero exit is returned as-is.
    pub async fn run(
        &self,
        node: &str,
        remote_args: &[&str],
        stdin: Option<&[u8]>,
    ) -> anyhow::Result<Output> {
        let mut cmd = self.command(node, remote_args);
        if stdin.is_some() {
            cmd.stdin(Stdio::piped());
        }
        trace!(%node, args = ?remote_args, "spawning ssh");

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn ssh to {node}"))?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input)
                    .await
                    .with_context(|| format!("failed to write probe request to {node}"))?;
                // Close stdin so the remote side sees EOF.
                drop(pipe);
            }
        }

        child
            .wait_with_output()
            .await
            .with_context(|| format!("ssh to {node} did not complete"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_include_options_destination_and_command() {
        let ssh = SshCommand::new(Some("ops".to_string()));
        let args = ssh.args("gpu-01", &["hpcguard-probe", "gpu"]);
        assert_eq!(args[0], "-o");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        let dest = args.iter().position(|a| a == "ops@gpu-01").unwrap();
        assert_eq!(&args[dest + 1..], ["hpcguard-probe", "gpu"]);
    }

    #[test]
    fn option_override_replaces_default() {
        let ssh = SshCommand::default().with_option("ConnectTimeout", "3");
        let args = ssh.args("n1", &[]);
        assert!(args.contains(&"ConnectTimeout=3".to_string()));
        assert!(!args.contains(&"ConnectTimeout=10".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("n1"));
    }
}
