//! Fleet membership.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Explicit fleet membership for one run, resolved at run start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FleetSpec {
    /// `prefix-1` through `prefix-count`.
    Prefixed { prefix: String, count: u32 },
    /// An explicit list of host names.
    Explicit(Vec<String>),
}

impl FleetSpec {
    /// Resolve to node names. Duplicates are dropped, first occurrence wins.
    pub fn resolve(&self) -> Vec<String> {
        let names: Vec<String> = match self {
            FleetSpec::Prefixed { prefix, count } => {
                (1..=*count).map(|i| format!("{prefix}-{i}")).collect()
            }
            FleetSpec::Explicit(nodes) => nodes.clone(),
        };

        let mut seen = HashSet::new();
        names
            .into_iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty() && seen.insert(n.clone()))
            .collect()
    }
}
