//! Deterministic alert identity.
//!
//! Only stable fields take part: the source system, the device identity
//! (IP, falling back to name), the alert type and the finding's identifying
//! attributes. Timestamps, message text and the raw payload never do, so
//! repeated detections of one condition hash to the same value.

use sha2::{Digest, Sha256};

use netpulse_core::RawFinding;

/// Lowercase, trim and collapse inner whitespace.
fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn device_identity(finding: &RawFinding) -> String {
    finding
        .device_ip
        .as_deref()
        .filter(|ip| !ip.trim().is_empty())
        .or(finding.device_name.as_deref())
        .map(normalize)
        .unwrap_or_default()
}

/// Hex-encoded SHA-256 fingerprint of a finding.
pub fn fingerprint(finding: &RawFinding) -> String {
    let mut parts = vec![
        normalize(&finding.source_system),
        device_identity(finding),
        normalize(&finding.alert_type),
    ];
    // BTreeMap iteration is already key-ordered.
    parts.extend(
        finding
            .attributes
            .iter()
            .map(|(k, v)| format!("{}={}", normalize(k), normalize(v))),
    );

    let digest = Sha256::digest(parts.join("\n").as_bytes());
    format!("{digest:x}")
}
