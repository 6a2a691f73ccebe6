//! Durable escalation log — append-only NDJSON, one record per attempt.
//!
//! The file is only ever appended to. A single process is assumed to
//! write it at a time.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::error::{EscalationError, EscalationResult};
use crate::record::EscalationRecord;

#[derive(Debug, Clone)]
pub struct EscalationLog {
    path: PathBuf,
}

impl EscalationLog {
    /// Open the log, creating it and its parent directory if needed.
    /// Fails when the path cannot be written.
    pub fn open(path: impl Into<PathBuf>) -> EscalationResult<Self> {
        let path = path.into();
        let log_err = |source| EscalationError::Log {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(log_err)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(log_err)?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line.
    pub fn append(&self, record: &EscalationRecord) -> EscalationResult<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.error(source))?;
        file.write_all(&line).map_err(|source| self.error(source))?;

        debug!(
            path = %self.path.display(),
            status = ?record.status,
            request_id = %record.request_id,
            "escalation recorded"
        );
        Ok(())
    }

    /// Every well-formed record, oldest first. Lines that are not UTF-8
    /// or not a valid record are skipped.
    pub fn records(&self) -> EscalationResult<Vec<EscalationRecord>> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.error(source)),
        };

        Ok(content
            .split(|b| *b == b'\n')
            .enumerate()
            .filter(|(_, line)| !line.trim_ascii().is_empty())
            .filter_map(|(i, line)| {
                let parsed = std::str::from_utf8(line)
                    .map_err(|e| e.to_string())
                    .and_then(|text| serde_json::from_str(text).map_err(|e| e.to_string()));
                match parsed {
                    Ok(record) => Some(record),
                    Err(error) => {
                        warn!(path = %self.path.display(), line = i + 1, %error, "skipping malformed log line");
                        None
                    }
                }
            })
            .collect())
    }

    /// Timestamp of the most recent successful submission.
    pub fn latest_success(&self) -> EscalationResult<Option<DateTime<Utc>>> {
        Ok(self
            .records()?
            .iter()
            .rev()
            .filter(|r| r.is_success())
            .find_map(EscalationRecord::at))
    }

    /// The latest successful submission, if it happened within
    /// `window_hours` before `now`.
    pub fn recent_success(
        &self,
        window_hours: u32,
        now: DateTime<Utc>,
    ) -> EscalationResult<Option<DateTime<Utc>>> {
        let cutoff = now - Duration::hours(i64::from(window_hours));
        Ok(self.latest_success()?.filter(|last| *last >= cutoff))
    }

    fn error(&self, source: io::Error) -> EscalationError {
        EscalationError::Log {
            path: self.path.clone(),
            source,
        }
    }
}
