//! hpcguard-report — human-facing output of a fleet run.
//!
//! - `summary`: CSV and HTML tables (`hpcguard_summary.{csv,html}`)
//! - `notify`: MessageCard webhook listing failed nodes
//! - `archive`: `.tar.gz` of a whole run directory

pub mod archive;
pub mod error;
pub mod notify;
pub mod summary;
pub mod views;

pub use archive::{archive_name, archive_run};
pub use error::{ReportError, ReportResult};
pub use notify::{Notifier, message_card};
pub use summary::{ReportPaths, render_csv, render_html, write_reports};
pub use views::{SummaryRow, result_label};
