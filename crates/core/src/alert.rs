use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{NetpulseError, Result};

// ── Severity ────────────────────────────────────────────────────────

/// Alert severity, most severe first. `Clear` is the "condition ended" signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Major,
    Minor,
    Warning,
    Info,
    Clear,
}

impl Severity {
    pub const ALL: [Severity; 6] = [
        Severity::Critical,
        Severity::Major,
        Severity::Minor,
        Severity::Warning,
        Severity::Info,
        Severity::Clear,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Major => "major",
            Severity::Minor => "minor",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Clear => "clear",
        }
    }

    pub fn is_clear(&self) -> bool {
        matches!(self, Severity::Clear)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = NetpulseError;

    fn from_str(s: &str) -> Result<Self> {
        Severity::ALL
            .iter()
            .copied()
            .find(|sev| sev.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| NetpulseError::Validation(format!("unknown severity '{}'", s)))
    }
}

// ── Status ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Suppressed,
    Resolved,
}

impl AlertStatus {
    pub const ALL: [AlertStatus; 4] = [
        AlertStatus::Active,
        AlertStatus::Acknowledged,
        AlertStatus::Suppressed,
        AlertStatus::Resolved,
    ];

    /// Statuses shown by default in listings.
    pub const OPEN: [AlertStatus; 3] = [
        AlertStatus::Active,
        AlertStatus::Acknowledged,
        AlertStatus::Suppressed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Suppressed => "suppressed",
            AlertStatus::Resolved => "resolved",
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, AlertStatus::Resolved)
    }

    /// Check an operator-driven status change.
    pub fn ensure_transition(self, to: AlertStatus) -> Result<()> {
        use AlertStatus::*;
        let allowed = matches!(
            (self, to),
            (Active, Acknowledged)
                | (Active, Suppressed)
                | (Active, Resolved)
                | (Acknowledged, Active)
                | (Acknowledged, Suppressed)
                | (Acknowledged, Resolved)
                | (Suppressed, Active)
                | (Suppressed, Resolved)
        );
        if allowed {
            Ok(())
        } else {
            Err(NetpulseError::InvalidTransition {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = NetpulseError;

    fn from_str(s: &str) -> Result<Self> {
        AlertStatus::ALL
            .iter()
            .copied()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| NetpulseError::Validation(format!("unknown alert status '{}'", s)))
    }
}

// ── Findings ────────────────────────────────────────────────────────

/// One observation emitted by a driver during a poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFinding {
    pub source_system: String,
    pub device_ip: Option<String>,
    pub device_name: Option<String>,
    pub alert_type: String,
    pub severity: Severity,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub message: String,
    /// Stable identifying attributes (interface, slot, sensor...). Part of the fingerprint.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub observed_at: DateTime<Utc>,
    /// Driver payload, stored as-is on the alert.
    #[serde(default)]
    pub raw: Value,
}

impl RawFinding {
    pub fn new(source_system: &str, alert_type: &str, severity: Severity) -> Self {
        Self {
            source_system: source_system.to_string(),
            device_ip: None,
            device_name: None,
            alert_type: alert_type.to_string(),
            severity,
            category: None,
            message: String::new(),
            attributes: BTreeMap::new(),
            observed_at: Utc::now(),
            raw: Value::Null,
        }
    }

    pub fn device_ip(mut self, ip: &str) -> Self {
        self.device_ip = Some(ip.to_string());
        self
    }

    pub fn device_name(mut self, name: &str) -> Self {
        self.device_name = Some(name.to_string());
        self
    }

    pub fn message(mut self, message: &str) -> Self {
        self.message = message.to_string();
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }
}

// ── Alert ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub fingerprint: String,
    pub severity: Severity,
    pub category: Option<String>,
    pub status: AlertStatus,
    pub occurrence_count: u64,
    pub occurred_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub suppressed_until: Option<DateTime<Utc>>,
    pub device_ip: Option<String>,
    pub device_name: Option<String>,
    pub message: String,
    pub raw_data: Value,
    pub connector_id: Option<String>,
    pub source_system: String,
    pub alert_type: String,
    /// Bumped on every committed write; used for optimistic concurrency.
    pub version: u64,
}

impl Alert {
    /// A brand-new alert for the first occurrence of `finding`, seen at `at`.
    /// Version 0 marks it as not yet stored.
    pub fn from_finding(
        fingerprint: String,
        connector_id: Option<&str>,
        finding: &RawFinding,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            fingerprint,
            severity: finding.severity,
            category: finding.category.clone(),
            status: AlertStatus::Active,
            occurrence_count: 1,
            occurred_at: at,
            updated_at: at,
            resolved_at: None,
            acknowledged_at: None,
            suppressed_until: None,
            device_ip: finding.device_ip.clone(),
            device_name: finding.device_name.clone(),
            message: finding.message.clone(),
            raw_data: finding.raw.clone(),
            connector_id: connector_id.map(str::to_string),
            source_system: finding.source_system.clone(),
            alert_type: finding.alert_type.clone(),
            version: 0,
        }
    }

    /// Whether the suppression window is still in force at `now`.
    /// A suppression with no end time lasts until lifted by an operator.
    pub fn suppression_active(&self, now: DateTime<Utc>) -> bool {
        self.status == AlertStatus::Suppressed && self.suppressed_until.map_or(true, |until| until > now)
    }
}

/// Counts from one ingestion batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub created: usize,
    pub updated: usize,
    pub resolved: usize,
    pub ignored: usize,
}

impl IngestOutcome {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.resolved + self.ignored
    }

    pub fn merge(&mut self, other: IngestOutcome) {
        self.created += other.created;
        self.updated += other.updated;
        self.resolved += other.resolved;
        self.ignored += other.ignored;
    }
}
