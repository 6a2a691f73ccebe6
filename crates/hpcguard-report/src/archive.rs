//! Run archive — packs a run's result directory into one `.tar.gz`.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::info;

use crate::error::{ReportError, ReportResult};

/// File name of the archive for the run at `timestamp`.
pub fn archive_name(timestamp: &str) -> String {
    format!("hpcguard_run_{timestamp}.tar.gz")
}

/// Archive `<results_root>/<timestamp>/` into `<dest_dir>/hpcguard_run_<timestamp>.tar.gz`.
///
/// Entries are stored under `<timestamp>/` so the archive unpacks into a
/// directory named after the run. The archive is written next to its final
/// path and renamed into place.
pub fn archive_run(results_root: &Path, timestamp: &str, dest_dir: &Path) -> ReportResult<PathBuf> {
    let run_dir = results_root.join(timestamp);
    let dest = dest_dir.join(archive_name(timestamp));
    let tmp = dest.with_extension("gz.tmp");
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| ReportError::Io { path, source }
    };

    fs::create_dir_all(dest_dir).map_err(io_err(dest_dir))?;
    let file = File::create(&tmp).map_err(io_err(&tmp))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder
        .append_dir_all(timestamp, &run_dir)
        .map_err(io_err(&run_dir))?;
    let encoder = builder.into_inner().map_err(io_err(&tmp))?;
    encoder.finish().map_err(io_err(&tmp))?;
    fs::rename(&tmp, &dest).map_err(io_err(&dest))?;

    info!(path = %dest.display(), "run archived");
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;

    #[test]
    fn archives_run_directory_under_its_timestamp() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("health_results");
        let run = root.join("20260101-0000");
        fs::create_dir_all(&run).unwrap();
        fs::write(run.join("hpc_check_result_n1.json"), b"{}").unwrap();
        fs::write(run.join("hpcguard_summary.csv"), b"Node\n").unwrap();

        let path = archive_run(&root, "20260101-0000", tmp.path()).unwrap();
        assert_eq!(path, tmp.path().join("hpcguard_run_20260101-0000.tar.gz"));
        assert!(!tmp.path().join("hpcguard_run_20260101-0000.tar.gz.tmp").exists());

        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&path).unwrap()));
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .filter(|n| n.ends_with(".json") || n.ends_with(".csv"))
            .collect();
        names.sort();
        assert_eq!(
            names,
            [
                "20260101-0000/hpc_check_result_n1.json",
                "20260101-0000/hpcguard_summary.csv"
            ]
        );
    }

    #[test]
    fn missing_run_directory_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = archive_run(tmp.path(), "nope", tmp.path()).unwrap_err();
        assert!(matches!(err, ReportError::Io { .. }));
    }
}
