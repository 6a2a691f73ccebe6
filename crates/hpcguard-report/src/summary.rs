//! CSV and HTML fleet summaries.

use std::fs;
use std::path::{Path, PathBuf};

use askama::Template;
use tracing::info;

use hpcguard_core::FleetResultSet;

use crate::error::{ReportError, ReportResult};
use crate::views::{HEADERS, SummaryRow};

pub const CSV_FILE: &str = "hpcguard_summary.csv";
pub const HTML_FILE: &str = "hpcguard_summary.html";

#[derive(Template)]
#[template(path = "summary.html")]
struct SummaryTemplate<'a> {
    title: String,
    headers: &'a [&'a str],
    rows: &'a [SummaryRow],
    healthy: usize,
    failed: usize,
    unreachable: usize,
}

/// Where [`write_reports`] put its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub csv: PathBuf,
    pub html: PathBuf,
}

fn rows(results: &FleetResultSet) -> Vec<SummaryRow> {
    results.iter().map(SummaryRow::from_result).collect()
}

/// Header line plus one line per node.
pub fn render_csv(results: &FleetResultSet) -> String {
    let mut out = String::new();
    push_csv_line(&mut out, &HEADERS);
    for row in rows(results) {
        push_csv_line(&mut out, &row.cells());
    }
    out
}

fn push_csv_line(out: &mut String, cells: &[&str]) {
    let line = cells
        .iter()
        .map(|cell| {
            if cell.contains([',', '"', '\n', '\r']) {
                format!("\"{}\"", cell.replace('"', "\"\""))
            } else {
                cell.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&line);
    out.push('\n');
}

/// Standalone HTML page; unreachable rows are greyed out.
pub fn render_html(results: &FleetResultSet) -> ReportResult<String> {
    let rows = rows(results);
    let timestamp = results
        .iter()
        .next()
        .map(|r| r.timestamp.as_str())
        .unwrap_or_default();

    let template = SummaryTemplate {
        title: format!("HPC Check Summary ({timestamp})"),
        headers: &HEADERS,
        healthy: rows.iter().filter(|r| r.final_class == "all-success").count(),
        failed: rows.iter().filter(|r| r.final_class == "fail").count(),
        unreachable: rows.iter().filter(|r| r.unreachable).count(),
        rows: &rows,
    };
    Ok(template.render()?)
}

/// Render both summaries into `dir`.
pub fn write_reports(results: &FleetResultSet, dir: &Path) -> ReportResult<ReportPaths> {
    fs::create_dir_all(dir).map_err(|source| ReportError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let csv = dir.join(CSV_FILE);
    write(&csv, render_csv(results))?;
    let html = dir.join(HTML_FILE);
    write(&html, render_html(results)?)?;

    info!(csv = %csv.display(), html = %html.display(), nodes = results.len(), "summaries written");
    Ok(ReportPaths { csv, html })
}

fn write(path: &Path, body: String) -> ReportResult<()> {
    fs::write(path, body).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpcguard_core::NodeResult;
    use serde_json::Value;

    fn fleet() -> FleetResultSet {
        let mut ok = NodeResult::unreachable("gpu-01", "20250601-0900", "x");
        ok.initial_returncode = 0;
        ok.final_returncode = 0;
        ok.error = None;
        ok.extra.insert("gpu_status".into(), Value::from("Passed"));
        ok.extra.insert("nccl_bw".into(), Value::from(490.5));

        let mut bad = ok.clone();
        bad.node = "gpu-02".into();
        bad.initial_returncode = 1;
        bad.final_returncode = 1;
        bad.reboot_count = 1;

        let down = NodeResult::unreachable("gpu-03", "20250601-0900", "node unreachable");
        FleetResultSet::from(vec![ok, bad, down])
    }

    #[test]
    fn csv_has_header_and_one_line_per_node() {
        let csv = render_csv(&fleet());
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("node,GPU,"));
        assert_eq!(
            lines[1],
            "gpu-01,Passed,N/A,490.50 GB/s,N/A,N/A,All_Success,0,All_Success"
        );
        assert!(lines[2].ends_with("Fail,1,Fail"));
        assert!(lines[3].ends_with("Unreachable,0,Unreachable"));
    }

    #[test]
    fn csv_quotes_awkward_cells() {
        let mut out = String::new();
        push_csv_line(&mut out, &["a,b", "say \"hi\"", "plain"]);
        assert_eq!(out, "\"a,b\",\"say \"\"hi\"\"\",plain\n");
    }

    #[test]
    fn html_greys_out_unreachable_rows() {
        let html = render_html(&fleet()).unwrap();
        assert!(html.contains("HPC Check Summary (20250601-0900)"));
        assert!(html.contains("<tr class=\"unreachable\">"));
        assert!(html.contains("<td class=\"fail\">Fail</td>"));
        assert!(html.contains("1 healthy, 1 failed, 1 unreachable"));
    }

    #[test]
    fn writes_both_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("20250601-0900");
        let paths = write_reports(&fleet(), &dir).unwrap();
        assert!(paths.csv.ends_with(CSV_FILE));
        assert!(fs::read_to_string(&paths.html).unwrap().contains("gpu-02"));
    }
}
