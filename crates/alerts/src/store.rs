use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use uuid::Uuid;

use netpulse_core::{Alert, AlertStatus, NetpulseError, Result, Severity};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;

// ── Query types ─────────────────────────────────────────────────────

/// Filters shared by the list view and the aggregates.
#[derive(Debug, Clone, Default)]
pub struct AlertQuery {
    /// Statuses to include. Empty means the open set (resolved excluded).
    pub statuses: Vec<AlertStatus>,
    pub severities: Vec<Severity>,
    pub category: Option<String>,
    /// Case-insensitive substring of the device IP or name.
    pub device: Option<String>,
    /// Case-insensitive substring of message, alert type, device name or category.
    pub text: Option<String>,
    pub connector_id: Option<String>,
    /// 1-based.
    pub page: usize,
    pub page_size: usize,
}

impl AlertQuery {
    pub fn effective_statuses(&self) -> Vec<AlertStatus> {
        if self.statuses.is_empty() {
            AlertStatus::OPEN.to_vec()
        } else {
            self.statuses.clone()
        }
    }

    fn page_bounds(&self) -> (usize, usize) {
        let page = self.page.max(1);
        let size = match self.page_size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
        (page, size)
    }

    fn matches(&self, alert: &Alert, statuses: &[AlertStatus]) -> bool {
        if !statuses.contains(&alert.status) {
            return false;
        }
        if !self.severities.is_empty() && !self.severities.contains(&alert.severity) {
            return false;
        }
        if let Some(category) = &self.category {
            if !alert
                .category
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(category))
            {
                return false;
            }
        }
        if let Some(connector_id) = &self.connector_id {
            if alert.connector_id.as_deref() != Some(connector_id.as_str()) {
                return false;
            }
        }
        if let Some(device) = &self.device {
            let needle = device.to_lowercase();
            let hit = [&alert.device_ip, &alert.device_name]
                .iter()
                .any(|f| f.as_deref().is_some_and(|v| v.to_lowercase().contains(&needle)));
            if !hit {
                return false;
            }
        }
        if let Some(text) = &self.text {
            let needle = text.to_lowercase();
            let hit = [
                Some(alert.message.as_str()),
                Some(alert.alert_type.as_str()),
                alert.device_name.as_deref(),
                alert.category.as_deref(),
            ]
            .iter()
            .flatten()
            .any(|v| v.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertPage {
    pub items: Vec<Alert>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// Counts over every alert matching a query's filters (pagination ignored).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertAggregate {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub by_severity_status: BTreeMap<String, BTreeMap<String, usize>>,
}

// ── Store ───────────────────────────────────────────────────────────

#[derive(Default)]
struct Inner {
    alerts: IndexMap<Uuid, Alert>,
    /// Most recent alert per fingerprint. Older resolved incidents stay in
    /// `alerts` as history.
    latest: HashMap<String, Uuid>,
}

/// In-memory alert records with optimistic versioning.
///
/// Every committed write bumps `Alert::version`. A writer that read an
/// older version gets `Conflict` and must re-read and merge.
#[derive(Default)]
pub struct AlertStore {
    inner: RwLock<Inner>,
}

impl AlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize> {
        let inner = self.read()?;
        Ok(inner.alerts.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, id: Uuid) -> Result<Alert> {
        let inner = self.read()?;
        inner
            .alerts
            .get(&id)
            .cloned()
            .ok_or_else(|| NetpulseError::NotFound(format!("alert '{}'", id)))
    }

    /// The most recent alert for a fingerprint, open or resolved.
    pub fn latest_for(&self, fingerprint: &str) -> Result<Option<Alert>> {
        let inner = self.read()?;
        Ok(inner
            .latest
            .get(fingerprint)
            .and_then(|id| inner.alerts.get(id))
            .cloned())
    }

    /// Write `alert` if nobody else has written it since it was read.
    ///
    /// Version 0 means a new record: it is refused with `Conflict` when the
    /// fingerprint already has an open alert, so two racing creators end up
    /// with one row. Otherwise the stored version must equal `alert.version`.
    pub fn commit(&self, mut alert: Alert) -> Result<Alert> {
        let mut inner = self.write()?;

        match inner.alerts.get(&alert.id) {
            Some(stored) => {
                if stored.version != alert.version {
                    return Err(NetpulseError::Conflict(format!(
                        "alert '{}' changed (version {} != {})",
                        alert.id, stored.version, alert.version
                    )));
                }
            }
            None => {
                if alert.version != 0 {
                    return Err(NetpulseError::NotFound(format!("alert '{}'", alert.id)));
                }
                let open = inner
                    .latest
                    .get(&alert.fingerprint)
                    .and_then(|id| inner.alerts.get(id))
                    .is_some_and(|a| a.status.is_open());
                if open {
                    return Err(NetpulseError::Conflict(format!(
                        "fingerprint {} already has an open alert",
                        alert.fingerprint
                    )));
                }
                inner.latest.insert(alert.fingerprint.clone(), alert.id);
            }
        }

        alert.version += 1;
        inner.alerts.insert(alert.id, alert.clone());
        Ok(alert)
    }

    /// Read-modify-write under the store lock. `f` sees the current record.
    pub fn modify<F>(&self, id: Uuid, f: F) -> Result<Alert>
    where
        F: FnOnce(&mut Alert) -> Result<()>,
    {
        let mut inner = self.write()?;
        let alert = inner
            .alerts
            .get_mut(&id)
            .ok_or_else(|| NetpulseError::NotFound(format!("alert '{}'", id)))?;

        let mut next = alert.clone();
        f(&mut next)?;
        next.version = alert.version + 1;
        *alert = next.clone();
        Ok(next)
    }

    /// Ids of suppressed alerts whose window ended at or before `now`.
    pub fn expired_suppressions(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let inner = self.read()?;
        Ok(inner
            .alerts
            .values()
            .filter(|a| a.status == AlertStatus::Suppressed && !a.suppression_active(now))
            .map(|a| a.id)
            .collect())
    }

    /// Filtered page, most recently updated first.
    pub fn query(&self, query: &AlertQuery) -> Result<AlertPage> {
        let inner = self.read()?;
        let statuses = query.effective_statuses();
        let mut matched: Vec<&Alert> = inner
            .alerts
            .values()
            .filter(|a| query.matches(a, &statuses))
            .collect();
        matched.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let (page, page_size) = query.page_bounds();
        let total = matched.len();
        let items = matched
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .cloned()
            .collect();

        Ok(AlertPage {
            items,
            total,
            page,
            page_size,
        })
    }

    /// Counts consistent with `query`: same filters, same default status set.
    pub fn aggregate(&self, query: &AlertQuery) -> Result<AlertAggregate> {
        let inner = self.read()?;
        let statuses = query.effective_statuses();

        let mut agg = AlertAggregate::default();
        for status in &statuses {
            agg.by_status.insert(status.to_string(), 0);
        }
        for severity in Severity::ALL {
            agg.by_severity.insert(severity.to_string(), 0);
        }

        for alert in inner.alerts.values().filter(|a| query.matches(a, &statuses)) {
            agg.total += 1;
            *agg.by_status.entry(alert.status.to_string()).or_default() += 1;
            *agg.by_severity.entry(alert.severity.to_string()).or_default() += 1;
            *agg.by_severity_status
                .entry(alert.severity.to_string())
                .or_default()
                .entry(alert.status.to_string())
                .or_default() += 1;
        }
        Ok(agg)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| NetpulseError::poisoned("alert store", e))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| NetpulseError::poisoned("alert store", e))
    }
}
