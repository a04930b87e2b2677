// Telemetry sample: the strict shape every payload is coerced into at ingestion.
//
// Remote payload (per target):
//   { cpu: {percent}, ram: {percent}, network: {download_mbps, upload_mbps},
//     storage_total_used, disks: [{name, used_tb, total_tb, percent, error?}] }
// Missing or non-numeric fields become 0; nothing downstream sees partial data.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use wincode::{SchemaRead, SchemaWrite};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub name: String,
    pub used_label: String,
    pub total_label: String,
    pub percent: u8,
    /// Reported with an `error` field; never rendered.
    pub errored: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub storage_total_used: f64,
    pub disks: Vec<Disk>,
}

impl Sample {
    /// Coerce a decoded JSON payload. Never fails: structure that is missing or of the
    /// wrong type falls back to zero / empty.
    pub fn from_payload(payload: &Value) -> Self {
        let disks = payload
            .get("disks")
            .and_then(Value::as_array)
            .map(|entries| parse_disks(entries))
            .unwrap_or_default();

        Self {
            cpu_percent: number_at(payload, &["cpu", "percent"]).clamp(0.0, 100.0),
            ram_percent: number_at(payload, &["ram", "percent"]).clamp(0.0, 100.0),
            download_mbps: number_at(payload, &["network", "download_mbps"]).max(0.0),
            upload_mbps: number_at(payload, &["network", "upload_mbps"]).max(0.0),
            storage_total_used: number_at(payload, &["storage_total_used"]).max(0.0),
            disks,
        }
    }

    /// Disks that are displayed (errored entries omitted).
    pub fn visible_disks(&self) -> impl Iterator<Item = &Disk> {
        self.disks.iter().filter(|d| !d.errored)
    }
}

fn number_at(payload: &Value, path: &[&str]) -> f64 {
    let mut current = payload;
    for key in path {
        match current.get(key) {
            Some(next) => current = next,
            None => return 0.0,
        }
    }
    coerce_number(current)
}

/// JSON numbers as-is, numeric strings parsed, anything else (and NaN/inf) is 0.
pub fn coerce_number(value: &Value) -> f64 {
    let n = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if n.is_finite() { n } else { 0.0 }
}

/// Display label: strings verbatim, numbers via their JSON text, anything else empty.
pub fn coerce_label(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn parse_disks(entries: &[Value]) -> Vec<Disk> {
    let mut seen = HashSet::new();
    let mut disks = Vec::with_capacity(entries.len());
    for entry in entries {
        if !entry.is_object() {
            continue;
        }
        let name = coerce_label(entry.get("name"));
        if name.is_empty() {
            tracing::debug!("skipping disk entry without a name");
            continue;
        }
        // Name is the reconciliation key; first occurrence wins.
        if !seen.insert(name.clone()) {
            continue;
        }
        let percent = entry
            .get("percent")
            .map(coerce_number)
            .unwrap_or(0.0)
            .round()
            .clamp(0.0, 100.0) as u8;
        disks.push(Disk {
            name,
            used_label: coerce_label(entry.get("used_tb")),
            total_label: coerce_label(entry.get("total_tb")),
            percent,
            errored: entry.get("error").is_some_and(|e| !e.is_null()),
        });
    }
    disks
}
