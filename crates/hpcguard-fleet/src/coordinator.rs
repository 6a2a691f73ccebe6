//! Fleet coordinator — bounded-parallel recovery with per-node fault isolation.
//!
//! Every node runs in its own task. A task that panics, overruns the
//! per-node deadline or is cancelled still yields a result: the
//! unreachable fallback with an `error` annotation. The returned set
//! therefore always holds exactly one entry per distinct input node.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use hpcguard_core::config::CoordinatorConfig;
use hpcguard_core::{FleetResultSet, NodeResult};
use hpcguard_health::NodeRecovery;

/// Drives [`NodeRecovery`] over a set of nodes.
pub struct FleetCoordinator {
    /// Shared per-node engine.
    recovery: Arc<NodeRecovery>,
    /// Maximum number of nodes in recovery at once.
    max_parallel: usize,
    /// Upper bound on one node's full recovery cycle.
    node_timeout: Option<Duration>,
    /// Check-run timestamp stamped on every result.
    timestamp: String,
}

impl FleetCoordinator {
    pub fn new(recovery: Arc<NodeRecovery>, timestamp: impl Into<String>) -> Self {
        Self {
            recovery,
            max_parallel: CoordinatorConfig::default().max_parallel,
            node_timeout: None,
            timestamp: timestamp.into(),
        }
    }

    pub fn from_config(
        recovery: Arc<NodeRecovery>,
        config: &CoordinatorConfig,
        timestamp: impl Into<String>,
    ) -> Self {
        Self::new(recovery, timestamp)
            .with_max_parallel(config.max_parallel)
            .with_node_timeout(config.node_timeout())
    }

    /// Values below 1 are clamped to 1.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_node_timeout(mut self, node_timeout: Option<Duration>) -> Self {
        self.node_timeout = node_timeout;
        self
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Run recovery on every node and collect the results in completion
    /// order. Duplicate node names are processed once.
    pub async fn run_fleet(
        &self,
        nodes: &[String],
        cancel: Option<CancellationToken>,
    ) -> FleetResultSet {
        let cancel = cancel.unwrap_or_default();
        let nodes = distinct(nodes);
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));

        info!(
            nodes = nodes.len(),
            max_parallel = self.max_parallel,
            timestamp = %self.timestamp,
            "starting fleet run"
        );

        let mut tasks = JoinSet::new();
        let mut in_flight: HashMap<Id, String> = HashMap::with_capacity(nodes.len());

        for node in &nodes {
            let handle = tasks.spawn(recover_node(
                Arc::clone(&self.recovery),
                Arc::clone(&semaphore),
                cancel.clone(),
                self.node_timeout,
                node.clone(),
                self.timestamp.clone(),
            ));
            in_flight.insert(handle.id(), node.clone());
        }

        let mut results = FleetResultSet::new();
        while let Some(joined) = tasks.join_next_with_id().await {
            let result = match joined {
                Ok((id, result)) => {
                    in_flight.remove(&id);
                    result
                }
                Err(e) => {
                    let Some(node) = in_flight.remove(&e.id()) else {
                        error!(error = %e, "lost track of a failed node task");
                        continue;
                    };
                    let reason = if e.is_panic() {
                        format!("worker panicked: {}", panic_message(e.into_panic()))
                    } else {
                        "worker cancelled".to_string()
                    };
                    error!(%node, %reason, "node task failed");
                    NodeResult::unreachable(&node, &self.timestamp, reason)
                }
            };
            log_final_status(&result);
            results.push(result);
        }

        // Every spawned task is joined above; this only guards the
        // one-entry-per-node contract.
        for node in nodes {
            if results.get(&node).is_none() {
                error!(%node, "node produced no result");
                let result = NodeResult::unreachable(&node, &self.timestamp, "no result");
                results.push(result);
            }
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(nodes = results.len(), failed, "fleet run finished");
        results
    }
}

async fn recover_node(
    recovery: Arc<NodeRecovery>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    deadline: Option<Duration>,
    node: String,
    timestamp: String,
) -> NodeResult {
    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return NodeResult::unreachable(&node, &timestamp, "cancelled");
        }
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return NodeResult::unreachable(&node, &timestamp, "semaphore closed"),
        },
    };

    let bounded = async {
        match deadline {
            Some(limit) => tokio::time::timeout(limit, recovery.run(&node, &timestamp))
                .await
                .unwrap_or_else(|_| {
                    warn!(%node, ?limit, "node deadline elapsed");
                    NodeResult::unreachable(
                        &node,
                        &timestamp,
                        format!("deadline of {limit:?} elapsed"),
                    )
                }),
            None => recovery.run(&node, &timestamp).await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!(%node, "node recovery cancelled");
            NodeResult::unreachable(&node, &timestamp, "cancelled")
        }
        result = bounded => result,
    }
}

fn log_final_status(result: &NodeResult) {
    let status = if result.is_success() {
        "healthy"
    } else if result.is_unreachable() {
        "unreachable"
    } else {
        "unhealthy"
    };
    info!(
        node = %result.node,
        status,
        final_returncode = result.final_returncode,
        reboot_count = result.reboot_count,
        codes = ?result.error_codes,
        "node finished"
    );
}

fn distinct(nodes: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(nodes.len());
    nodes
        .iter()
        .filter(|n| seen.insert(*n))
        .cloned()
        .collect()
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_keeps_first_occurrence() {
        let nodes: Vec<String> = ["b", "a", "b", "c", "a"].iter().map(|s| s.to_string()).collect();
        assert_eq!(distinct(&nodes), ["b", "a", "c"]);
    }

    #[test]
    fn panic_message_handles_both_payloads() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "unknown panic");
    }
}
