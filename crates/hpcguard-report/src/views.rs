//! View types for summary rendering.
//!
//! Rows carry pre-formatted strings so the CSV writer and the HTML
//! template stay trivial.

use hpcguard_core::{NodeResult, ProbeKind, RC_SUCCESS, RC_UNREACHABLE};

/// Column headers, in row order.
pub const HEADERS: [&str; 9] = [
    "node",
    "GPU",
    "Single Status",
    "Single BW",
    "Multi Status",
    "Multi BW",
    "Initial Result",
    "Reboot",
    "Final Result",
];

/// One table row.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub node: String,
    pub gpu: String,
    pub single_status: String,
    pub single_bw: String,
    pub multi_status: String,
    pub multi_bw: String,
    pub initial: String,
    pub reboots: String,
    pub final_result: String,
    /// The node could not be evaluated at all; greyed out in HTML.
    pub unreachable: bool,
    /// CSS class of the final result cell.
    pub final_class: &'static str,
}

impl SummaryRow {
    pub fn from_result(result: &NodeResult) -> Self {
        let status = |kind: ProbeKind| {
            result
                .extra_str(&kind.status_key())
                .unwrap_or("N/A")
                .to_string()
        };
        let bw = |kind: ProbeKind| format_bandwidth(result.extra_f64(&kind.bandwidth_key()));

        let final_class = match result.final_returncode {
            RC_SUCCESS => "all-success",
            RC_UNREACHABLE => "unreachable",
            _ => "fail",
        };

        Self {
            node: result.node.clone(),
            gpu: status(ProbeKind::GpuHealth),
            single_status: status(ProbeKind::SingleNodeBandwidth),
            single_bw: bw(ProbeKind::SingleNodeBandwidth),
            multi_status: status(ProbeKind::MultiNodeBandwidth),
            multi_bw: bw(ProbeKind::MultiNodeBandwidth),
            initial: result_label(result.initial_returncode).to_string(),
            reboots: result.reboot_count.to_string(),
            final_result: result_label(result.final_returncode).to_string(),
            unreachable: result.is_unreachable(),
            final_class,
        }
    }

    /// Cells in [`HEADERS`] order.
    pub fn cells(&self) -> [&str; 9] {
        [
            &self.node,
            &self.gpu,
            &self.single_status,
            &self.single_bw,
            &self.multi_status,
            &self.multi_bw,
            &self.initial,
            &self.reboots,
            &self.final_result,
        ]
    }
}

/// Display label of a return code.
pub fn result_label(returncode: i32) -> &'static str {
    match returncode {
        RC_SUCCESS => "All_Success",
        RC_UNREACHABLE => "Unreachable",
        _ => "Fail",
    }
}

pub fn format_bandwidth(bw: Option<f64>) -> String {
    match bw {
        Some(bw) => format!("{bw:.2} GB/s"),
        None => "N/A".to_string(),
    }
}
