//! Failure notifications — a MessageCard posted to a chat webhook.
//!
//! Best-effort: delivery problems are logged and swallowed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{info, warn};

use hpcguard_core::time::iso_utc;
use hpcguard_core::{FleetResultSet, ProbeKind};

use crate::views::{format_bandwidth, result_label};

pub struct Notifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl Notifier {
    /// `None` if the HTTP client cannot be built.
    pub fn new(webhook_url: impl Into<String>) -> Option<Self> {
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "cannot build notification client");
                return None;
            }
        };
        Some(Self {
            client,
            webhook_url: webhook_url.into(),
        })
    }

    /// Post the failed nodes of `results`. No-op when every node passed.
    pub async fn notify(&self, results: &FleetResultSet) {
        let Some(card) = message_card(results, Utc::now()) else {
            info!("all nodes passed, no notification sent");
            return;
        };

        let sent = self
            .client
            .post(&self.webhook_url)
            .json(&card)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());
        match sent {
            Ok(_) => info!("failure notification sent"),
            Err(e) => warn!(error = %e, "failure notification not delivered"),
        }
    }
}

/// MessageCard listing every node with a non-zero final return code.
pub fn message_card(results: &FleetResultSet, now: DateTime<Utc>) -> Option<Value> {
    let lines: Vec<String> = results
        .unhealthy()
        .map(|r| {
            let gpu = r
                .extra_str(&ProbeKind::GpuHealth.status_key())
                .unwrap_or("N/A");
            let bw = format_bandwidth(r.extra_f64(&ProbeKind::SingleNodeBandwidth.bandwidth_key()));
            let codes = if r.error_codes.is_empty() {
                "-".to_string()
            } else {
                r.error_codes.join(" ")
            };
            format!(
                "- {}: {} (GPU={gpu}, NCCL={bw}, codes={codes}, reboots={})",
                r.node,
                result_label(r.final_returncode),
                r.reboot_count
            )
        })
        .collect();

    if lines.is_empty() {
        return None;
    }

    let mut text = vec!["**Failed nodes**".to_string()];
    text.extend(lines);

    Some(json!({
        "@type": "MessageCard",
        "@context": "http://schema.org/extensions",
        "summary": "HPC check results",
        "themeColor": "FF0000",
        "title": format!("HPC check failed nodes ({})", iso_utc(now)),
        "text": text.join("\n"),
    }))
}
