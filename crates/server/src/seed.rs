//! Connector seed file, loaded once at startup.
//!
//! ```yaml
//! connectors:
//!   - id: core-router
//!     name: Core router
//!     poll_interval_secs: 120
//!     config:
//!       type: snmp
//!       host: 10.0.0.1
//!       oids: ["1.3.6.1.2.1.1.3.0"]
//! ```

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::{info, warn};

use netpulse_core::ConnectorInput;
use netpulse_scheduler::ConnectorRegistry;

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    connectors: Vec<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct SeedEntry {
    id: String,
    #[serde(flatten)]
    input: ConnectorInput,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub loaded: usize,
    pub skipped: usize,
}

/// Load every valid entry of `path` into `registry`. Malformed or invalid
/// entries are logged and skipped; an unreadable file is an error.
pub fn apply_seed(registry: &ConnectorRegistry, path: &Path) -> anyhow::Result<SeedReport> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading connector seed {}", path.display()))?;
    let file: SeedFile = serde_yaml::from_str(&raw)
        .with_context(|| format!("parsing connector seed {}", path.display()))?;

    let mut report = SeedReport::default();
    for (index, value) in file.connectors.into_iter().enumerate() {
        let entry: SeedEntry = match serde_yaml::from_value(value) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(index, error = %e, "Skipping malformed seed entry");
                report.skipped += 1;
                continue;
            }
        };
        match registry.upsert(&entry.id, entry.input) {
            Ok(_) => report.loaded += 1,
            Err(e) => {
                warn!(connector_id = %entry.id, error = %e, "Skipping invalid seed entry");
                report.skipped += 1;
            }
        }
    }

    info!(
        path = %path.display(),
        loaded = report.loaded,
        skipped = report.skipped,
        "Connector seed applied"
    );
    Ok(report)
}
