//! hpcguard-health — per-node health verification and recovery.
//!
//! Runs the configured probes against one node, reboots it when they fail,
//! waits for it to come back, and re-checks under a bounded attempt count.
//!
//! # Architecture
//!
//! ```text
//! NodeRecovery
//!   ├── ReachabilityGate (TCP connect to the management port)
//!   ├── ProbeAdapter × N → Probe (RemoteProbe over ssh)
//!   │     └── timeout + fault normalization → CheckOutcome
//!   ├── Remediator (SshRemediator: sudo reboot)
//!   └── Optional ResultStore (hpc_check_result_<node>.json)
//! ```
//!
//! # Recovery loop
//!
//! `Checking → Remediating → AwaitingReachability → Checking` until the
//! probes pass, remediation is disabled or exhausted, or the node cannot be
//! reached at all (return code 255).

use std::future::Future;
use std::pin::Pin;

pub mod artifact;
pub mod probe;
pub mod reachability;
pub mod recovery;
pub mod remediation;
pub mod remote;
pub mod ssh;

pub use artifact::{ArtifactError, ArtifactResult, ResultStore};
pub use probe::{Probe, ProbeAdapter};
pub use reachability::{ReachabilityGate, TcpReachability};
pub use recovery::{NodeRecovery, PassEvaluation, RecoveryPhase, RecoveryPolicy};
pub use remediation::{Remediator, SshRemediator};
pub use remote::{ProbeRequest, ProbeResponse, RemoteProbe, Thresholds, remote_probe_suite};
pub use ssh::SshCommand;

/// Boxed, sendable future returned by the collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
