//! Cron-scheduled jobs (`kind = scheduled`).
//!
//! Each job pairs a [`JobSpec`] with a cron expression. The dispatch tick asks
//! for [`ScheduledJobs::due`] jobs and records a trigger for every one it
//! enqueues; operators can pause/resume a job with [`ScheduledJobs::toggle`].

use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use cron::Schedule;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::info;

use netpulse_core::{NetpulseError, Result};

use crate::job::JobSpec;

/// Listing view of a scheduled job.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJob {
    pub name: String,
    pub cron: String,
    pub enabled: bool,
    pub driver: String,
    pub last_triggered: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

struct Entry {
    spec: JobSpec,
    cron: String,
    schedule: Schedule,
    enabled: bool,
    last_triggered: Option<DateTime<Utc>>,
}

impl Entry {
    fn view(&self, now: DateTime<Utc>) -> ScheduledJob {
        ScheduledJob {
            name: self.spec.name.clone(),
            cron: self.cron.clone(),
            enabled: self.enabled,
            driver: self.spec.driver.clone(),
            last_triggered: self.last_triggered,
            next_run: self.schedule.after(&now).next(),
        }
    }
}

#[derive(Default)]
pub struct ScheduledJobs {
    entries: Mutex<IndexMap<String, Entry>>,
}

impl ScheduledJobs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, IndexMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|e| NetpulseError::poisoned("scheduled jobs", e))
    }

    /// Add or replace a job. Accepts 5-field (minute precision) or 6-field cron.
    /// Replacing keeps `last_triggered`.
    pub fn register(&self, spec: JobSpec, cron: &str, enabled: bool) -> Result<ScheduledJob> {
        let normalized = normalize_cron(cron);
        let schedule = Schedule::from_str(&normalized).map_err(|e| {
            NetpulseError::Validation(format!("invalid cron expression '{}': {}", cron, e))
        })?;

        let mut entries = self.lock()?;
        let last_triggered = entries.get(&spec.name).and_then(|e| e.last_triggered);
        let name = spec.name.clone();
        info!(job = %name, cron = %normalized, enabled, "Scheduled job registered");
        let entry = Entry {
            spec,
            cron: normalized,
            schedule,
            enabled,
            last_triggered,
        };
        let view = entry.view(Utc::now());
        entries.insert(name, entry);
        Ok(view)
    }

    pub fn list(&self) -> Result<Vec<ScheduledJob>> {
        let now = Utc::now();
        Ok(self.lock()?.values().map(|e| e.view(now)).collect())
    }

    pub fn get(&self, name: &str) -> Result<ScheduledJob> {
        self.lock()?
            .get(name)
            .map(|e| e.view(Utc::now()))
            .ok_or_else(|| NetpulseError::NotFound(format!("job '{}'", name)))
    }

    pub fn spec(&self, name: &str) -> Result<JobSpec> {
        self.lock()?
            .get(name)
            .map(|e| e.spec.clone())
            .ok_or_else(|| NetpulseError::NotFound(format!("job '{}'", name)))
    }

    /// Pause a running schedule or resume a paused one.
    pub fn toggle(&self, name: &str) -> Result<ScheduledJob> {
        let mut entries = self.lock()?;
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| NetpulseError::NotFound(format!("job '{}'", name)))?;
        entry.enabled = !entry.enabled;
        info!(job = %name, enabled = entry.enabled, "Scheduled job toggled");
        Ok(entry.view(Utc::now()))
    }

    pub fn enabled_count(&self) -> Result<usize> {
        Ok(self.lock()?.values().filter(|e| e.enabled).count())
    }

    /// Specs of enabled jobs whose cron window has arrived at `now`.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<JobSpec>> {
        Ok(self
            .lock()?
            .values()
            .filter(|e| e.enabled && is_cron_due(&e.schedule, now, e.last_triggered))
            .map(|e| e.spec.clone())
            .collect())
    }

    pub fn record_trigger_at(&self, name: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(entry) = self.lock()?.get_mut(name) {
            entry.last_triggered = Some(at);
        }
        Ok(())
    }
}

// ── Cron helpers ────────────────────────────────────────────────────

/// The `cron` crate wants `sec min hour dom month dow`; prepend `0` to
/// standard 5-field expressions.
fn normalize_cron(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Due when a scheduled instant falls in `(last_run, now]`. A job that never
/// ran looks back one day.
fn is_cron_due(schedule: &Schedule, now: DateTime<Utc>, last_run: Option<DateTime<Utc>>) -> bool {
    let check_from = last_run.unwrap_or(now - chrono::Duration::days(1));
    schedule
        .after(&check_from)
        .next()
        .map_or(false, |next| next <= now)
}
