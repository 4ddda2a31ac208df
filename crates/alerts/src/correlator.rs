use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use netpulse_core::config::{AlertConfig, ReopenPolicy};
use netpulse_core::{Alert, AlertStatus, IngestOutcome, NetpulseError, RawFinding, Result};
use netpulse_scheduler::FindingSink;

use crate::fingerprint::fingerprint;
use crate::store::AlertStore;

/// What a single finding did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Created,
    Updated,
    Resolved,
    Ignored,
}

impl Applied {
    fn into_outcome(self) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();
        match self {
            Applied::Created => outcome.created = 1,
            Applied::Updated => outcome.updated = 1,
            Applied::Resolved => outcome.resolved = 1,
            Applied::Ignored => outcome.ignored = 1,
        }
        outcome
    }
}

/// Collapses raw findings into alerts by fingerprint.
///
/// Each finding is planned against the latest stored alert and committed
/// with that alert's version. A concurrent writer on the same fingerprint
/// makes the commit fail with `Conflict`; the finding is then re-read and
/// re-planned, up to `max_retries` times.
pub struct AlertCorrelator {
    store: Arc<AlertStore>,
    policy: ReopenPolicy,
    max_retries: u32,
}

impl AlertCorrelator {
    pub fn new(store: Arc<AlertStore>, config: &AlertConfig) -> Self {
        Self {
            store,
            policy: config.reopen_policy,
            max_retries: config.max_commit_retries,
        }
    }

    pub fn store(&self) -> &Arc<AlertStore> {
        &self.store
    }

    pub fn policy(&self) -> ReopenPolicy {
        self.policy
    }

    /// Apply a batch of findings from one connector.
    ///
    /// A finding that keeps losing commit races past the retry budget is
    /// logged and counted as ignored; the rest of the batch still applies.
    pub fn ingest(&self, connector_id: &str, findings: &[RawFinding]) -> Result<IngestOutcome> {
        let mut outcome = IngestOutcome::default();
        for finding in findings {
            match self.ingest_one(connector_id, finding) {
                Ok(applied) => outcome.merge(applied.into_outcome()),
                Err(NetpulseError::Conflict(reason)) => {
                    warn!(connector_id, %reason, "Giving up on contended finding");
                    outcome.ignored += 1;
                }
                Err(e) => return Err(e),
            }
        }
        debug!(
            connector_id,
            created = outcome.created,
            updated = outcome.updated,
            resolved = outcome.resolved,
            ignored = outcome.ignored,
            "Ingested findings"
        );
        Ok(outcome)
    }

    fn ingest_one(&self, connector_id: &str, finding: &RawFinding) -> Result<Applied> {
        let fp = fingerprint(finding);
        let mut last_conflict = None;

        for attempt in 0..=self.max_retries {
            let latest = self.store.latest_for(&fp)?;
            let Some((next, applied)) = self.plan(connector_id, &fp, latest, finding, Utc::now())
            else {
                return Ok(Applied::Ignored);
            };

            match self.store.commit(next) {
                Ok(_) => return Ok(applied),
                Err(NetpulseError::Conflict(reason)) => {
                    debug!(fingerprint = %fp, attempt, %reason, "Alert write raced, re-reading");
                    last_conflict = Some(reason);
                }
                Err(e) => return Err(e),
            }
        }

        Err(NetpulseError::Conflict(format!(
            "fingerprint {} still contended after {} retries: {}",
            fp,
            self.max_retries,
            last_conflict.unwrap_or_default()
        )))
    }

    /// Decide the next version of the alert for `finding`, or `None` when
    /// the finding changes nothing.
    fn plan(
        &self,
        connector_id: &str,
        fp: &str,
        latest: Option<Alert>,
        finding: &RawFinding,
        now: DateTime<Utc>,
    ) -> Option<(Alert, Applied)> {
        let fresh = || Alert::from_finding(fp.to_string(), Some(connector_id), finding, now);

        if finding.severity.is_clear() {
            let mut alert = latest.filter(|a| a.status.is_open())?;
            alert.status = AlertStatus::Resolved;
            alert.resolved_at = Some(now);
            alert.suppressed_until = None;
            alert.updated_at = now;
            if !finding.message.is_empty() {
                alert.message = finding.message.clone();
            }
            return Some((alert, Applied::Resolved));
        }

        let Some(mut alert) = latest else {
            return Some((fresh(), Applied::Created));
        };

        if alert.status == AlertStatus::Resolved {
            match self.policy {
                ReopenPolicy::NewIncident => return Some((fresh(), Applied::Created)),
                ReopenPolicy::Resume => {
                    alert.status = AlertStatus::Active;
                    alert.resolved_at = None;
                    alert.acknowledged_at = None;
                }
            }
        } else if alert.status == AlertStatus::Suppressed {
            // A new occurrence lifts the suppression, open-ended or not.
            alert.status = AlertStatus::Active;
            alert.suppressed_until = None;
        }

        refresh(&mut alert, connector_id, finding, now);
        Some((alert, Applied::Updated))
    }
}

/// Fold a repeat occurrence into an existing alert. Severity is latest-wins.
fn refresh(alert: &mut Alert, connector_id: &str, finding: &RawFinding, now: DateTime<Utc>) {
    alert.occurrence_count += 1;
    alert.updated_at = now;
    alert.severity = finding.severity;
    alert.message = finding.message.clone();
    alert.raw_data = finding.raw.clone();
    alert.connector_id = Some(connector_id.to_string());
    if finding.category.is_some() {
        alert.category = finding.category.clone();
    }
    if finding.device_name.is_some() {
        alert.device_name = finding.device_name.clone();
    }
    if finding.device_ip.is_some() {
        alert.device_ip = finding.device_ip.clone();
    }
}

#[async_trait::async_trait]
impl FindingSink for AlertCorrelator {
    async fn accept(
        &self,
        connector_id: &str,
        findings: Vec<RawFinding>,
    ) -> std::result::Result<IngestOutcome, NetpulseError> {
        self.ingest(connector_id, &findings)
    }
}
