//! Result artifact store — one JSON file per node in the run directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use hpcguard_core::{FleetResultSet, NodeResult};

/// Result type alias for artifact store operations.
pub type ArtifactResult<T> = Result<T, ArtifactError>;

/// Errors raised while reading or writing result artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to prepare result directory {path}: {source}")]
    Dir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Directory of `hpc_check_result_<node>.json` files.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    /// Open (and create if needed) a result directory.
    pub fn open(dir: impl Into<PathBuf>) -> ArtifactResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| ArtifactError::Dir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, node: &str) -> PathBuf {
        self.dir.join(format!("hpc_check_result_{node}.json"))
    }

    /// Write a node's result. The file is replaced atomically so readers
    /// never observe a partial artifact.
    pub fn save(&self, result: &NodeResult) -> ArtifactResult<PathBuf> {
        let path = self.path_for(&result.node);
        let tmp = path.with_extension("json.tmp");
        let body = if result.extra.keys().any(|k| NodeResult::is_reserved_field(k)) {
            warn!(node = %result.node, "extra shadows result fields, dropping them from artifact");
            let mut clean = result.clone();
            clean.extra.retain(|k, _| !NodeResult::is_reserved_field(k));
            serde_json::to_vec_pretty(&clean)?
        } else {
            serde_json::to_vec_pretty(result)?
        };

        fs::write(&tmp, body).map_err(|source| ArtifactError::Write {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| ArtifactError::Write {
            path: path.clone(),
            source,
        })?;

        debug!(node = %result.node, path = %path.display(), "result saved");
        Ok(path)
    }

    /// Load a node's result; `None` when no artifact exists.
    pub fn load(&self, node: &str) -> ArtifactResult<Option<NodeResult>> {
        let path = self.path_for(node);
        let body = match fs::read(&path) {
            Ok(body) => body,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(ArtifactError::Read { path, source }),
        };
        Ok(Some(serde_json::from_slice(&body)?))
    }

    /// Load every artifact in the directory, sorted by node name.
    /// Unreadable or malformed files are skipped.
    pub fn load_all(&self) -> ArtifactResult<FleetResultSet> {
        let entries = fs::read_dir(&self.dir).map_err(|source| ArtifactError::Read {
            path: self.dir.clone(),
            source,
        })?;

        let mut results = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_artifact = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("hpc_check_result_") && n.ends_with(".json"));
            if !is_artifact {
                continue;
            }

            let parsed = fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|b| serde_json::from_slice::<NodeResult>(&b).map_err(|e| e.to_string()));
            match parsed {
                Ok(result) => results.push(result),
                Err(error) => warn!(path = %path.display(), %error, "skipping unreadable result"),
            }
        }

        results.sort_by(|a, b| a.node.cmp(&b.node));
        Ok(FleetResultSet::from(results))
    }
}
