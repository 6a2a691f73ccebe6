//! hpcguard-core — shared data model and configuration.
//!
//! Everything the recovery engine, the fleet coordinator and the
//! escalation submitter exchange lives here: probe outcomes, per-node
//! results, the fleet result set, fleet membership, and the TOML config.

pub mod config;
pub mod duration;
pub mod error;
pub mod fleet;
pub mod time;
pub mod types;

pub use config::HpcGuardConfig;
pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult};
pub use fleet::FleetSpec;
pub use types::*;
