//! hpcguard-fleet — runs node recovery across a whole fleet.
//!
//! ```text
//! FleetCoordinator
//!   ├── Semaphore (max_parallel permits)
//!   ├── JoinSet — one task per node → NodeRecovery::run
//!   │     └── optional per-node deadline, cancellation
//!   └── FleetResultSet (completion order, one entry per node)
//! ```

pub mod coordinator;

pub use coordinator::FleetCoordinator;
