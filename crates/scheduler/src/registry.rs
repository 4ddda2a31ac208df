//! Connector Registry.
//!
//! Owns every connector record plus the set of connectors with a poll in
//! flight. All access goes through one mutex, so `mark_poll_start` is the single
//! gate for "at most one in-flight poll per connector": it checks and claims in
//! the same critical section and never blocks on anything else.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tracing::{debug, info};

use netpulse_core::config::DispatchConfig;
use netpulse_core::{Connector, ConnectorInput, ConnectorStatus, NetpulseError, Result};

/// Proof that a poll was claimed; needed to undo the claim if submission fails.
#[derive(Debug, Clone, PartialEq)]
pub struct PollTicket {
    pub connector_id: String,
    previous_poll_at: Option<DateTime<Utc>>,
    previous_status: ConnectorStatus,
}

/// How a poll ended, as far as connector health is concerned.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Success,
    Failed(String),
    Cancelled,
}

struct InFlight {
    previous_status: ConnectorStatus,
}

#[derive(Default)]
struct Inner {
    connectors: IndexMap<String, Connector>,
    in_flight: HashMap<String, InFlight>,
}

pub struct ConnectorRegistry {
    dispatch: DispatchConfig,
    inner: Mutex<Inner>,
}

impl ConnectorRegistry {
    pub fn new(dispatch: DispatchConfig) -> Self {
        Self {
            dispatch,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| NetpulseError::poisoned("connector registry", e))
    }

    pub fn dispatch_config(&self) -> &DispatchConfig {
        &self.dispatch
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// All connectors, optionally filtered by the enabled flag.
    pub fn list(&self, enabled: Option<bool>) -> Result<Vec<Connector>> {
        let inner = self.lock()?;
        Ok(inner
            .connectors
            .values()
            .filter(|c| enabled.map_or(true, |e| c.enabled == e))
            .cloned()
            .collect())
    }

    pub fn get(&self, id: &str) -> Result<Connector> {
        self.lock()?
            .connectors
            .get(id)
            .cloned()
            .ok_or_else(|| NetpulseError::NotFound(format!("connector '{}'", id)))
    }

    pub fn is_in_flight(&self, id: &str) -> Result<bool> {
        Ok(self.lock()?.in_flight.contains_key(id))
    }

    pub fn in_flight_count(&self) -> Result<usize> {
        Ok(self.lock()?.in_flight.len())
    }

    // ── Configuration writes ────────────────────────────────────────

    /// Create or replace a connector definition. Poll bookkeeping of an
    /// existing connector survives the update.
    pub fn upsert(&self, id: &str, input: ConnectorInput) -> Result<Connector> {
        let mut fresh = input.into_connector(id, &self.dispatch)?;
        let mut inner = self.lock()?;
        if let Some(existing) = inner.connectors.get(id) {
            fresh.created_at = existing.created_at;
            fresh.last_poll_at = existing.last_poll_at;
            fresh.status = existing.status;
            fresh.error_message = existing.error_message.clone();
            fresh.consecutive_failures = existing.consecutive_failures;
            info!(connector_id = %id, kind = fresh.kind(), "Connector updated");
        } else {
            info!(connector_id = %id, kind = fresh.kind(), "Connector registered");
        }
        inner.connectors.insert(id.to_string(), fresh.clone());
        Ok(fresh)
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<Connector> {
        let mut inner = self.lock()?;
        let connector = inner
            .connectors
            .get_mut(id)
            .ok_or_else(|| NetpulseError::NotFound(format!("connector '{}'", id)))?;
        connector.enabled = enabled;
        connector.updated_at = Utc::now();
        info!(connector_id = %id, enabled, "Connector toggled");
        Ok(connector.clone())
    }

    /// Remove a connector. Refused while one of its polls is in flight.
    pub fn remove(&self, id: &str) -> Result<Connector> {
        let mut inner = self.lock()?;
        if inner.in_flight.contains_key(id) {
            return Err(NetpulseError::Conflict(format!(
                "connector '{}' has a poll in flight",
                id
            )));
        }
        let removed = inner
            .connectors
            .shift_remove(id)
            .ok_or_else(|| NetpulseError::NotFound(format!("connector '{}'", id)))?;
        info!(connector_id = %id, "Connector removed");
        Ok(removed)
    }

    // ── Poll bookkeeping ────────────────────────────────────────────

    /// Claim the connector for one poll. On success `last_poll_at` is set to
    /// `now`, status becomes `connecting`, and a snapshot of the connector is
    /// returned for the task.
    pub fn mark_poll_start(&self, id: &str, now: DateTime<Utc>) -> Result<(PollTicket, Connector)> {
        let mut inner = self.lock()?;
        let Inner {
            connectors,
            in_flight,
        } = &mut *inner;

        let connector = connectors
            .get_mut(id)
            .ok_or_else(|| NetpulseError::NotFound(format!("connector '{}'", id)))?;
        if !connector.enabled {
            return Err(NetpulseError::Validation(format!(
                "connector '{}' is disabled",
                id
            )));
        }
        if in_flight.contains_key(id) {
            return Err(NetpulseError::Conflict(format!(
                "connector '{}' is already polling",
                id
            )));
        }

        let ticket = PollTicket {
            connector_id: id.to_string(),
            previous_poll_at: connector.last_poll_at,
            previous_status: connector.status,
        };
        in_flight.insert(
            id.to_string(),
            InFlight {
                previous_status: connector.status,
            },
        );
        connector.last_poll_at = Some(now);
        connector.status = ConnectorStatus::Connecting;
        debug!(connector_id = %id, "Poll claimed");
        Ok((ticket, connector.clone()))
    }

    /// Undo a claim whose task never made it into the pool.
    pub fn abort_poll_start(&self, ticket: PollTicket) -> Result<()> {
        let mut inner = self.lock()?;
        inner.in_flight.remove(&ticket.connector_id);
        if let Some(connector) = inner.connectors.get_mut(&ticket.connector_id) {
            connector.last_poll_at = ticket.previous_poll_at;
            connector.status = ticket.previous_status;
        }
        Ok(())
    }

    /// Release the in-flight claim and record the poll outcome.
    pub fn mark_poll_result(&self, id: &str, outcome: PollOutcome) -> Result<()> {
        let mut inner = self.lock()?;
        let claim = inner.in_flight.remove(id);
        let connector = inner
            .connectors
            .get_mut(id)
            .ok_or_else(|| NetpulseError::NotFound(format!("connector '{}'", id)))?;

        match outcome {
            PollOutcome::Success => {
                connector.status = ConnectorStatus::Connected;
                connector.error_message = None;
                connector.consecutive_failures = 0;
            }
            PollOutcome::Failed(message) => {
                connector.status = ConnectorStatus::Error;
                connector.error_message = Some(message);
                connector.consecutive_failures = connector.consecutive_failures.saturating_add(1);
            }
            PollOutcome::Cancelled => {
                connector.status = claim
                    .map(|c| c.previous_status)
                    .unwrap_or(ConnectorStatus::Disconnected);
            }
        }
        connector.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use netpulse_core::{ConnectorConfig, PingConfig};

    use super::*;

    fn input(interval: u64) -> ConnectorInput {
        ConnectorInput {
            name: None,
            config: ConnectorConfig::Ping(PingConfig {
                host: "10.1.1.1".into(),
                count: 1,
                timeout_secs: None,
            }),
            enabled: true,
            poll_interval_secs: Some(interval),
        }
    }

    fn registry() -> ConnectorRegistry {
        let registry = ConnectorRegistry::new(DispatchConfig::default());
        registry.upsert("edge-1", input(300)).unwrap();
        registry
    }

    #[test]
    fn concurrent_claims_yield_exactly_one_winner() {
        let registry = Arc::new(registry());
        let n = 16;
        let barrier = Arc::new(Barrier::new(n));

        let results: Vec<Result<(PollTicket, Connector)>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..n)
                .map(|_| {
                    let registry = registry.clone();
                    let barrier = barrier.clone();
                    s.spawn(move || {
                        barrier.wait();
                        registry.mark_poll_start("edge-1", Utc::now())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let accepted = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(NetpulseError::Conflict(_))))
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(conflicts, n - 1);
    }

    #[test]
    fn claim_sets_bookkeeping() {
        let registry = registry();
        let now = Utc::now();
        let (ticket, snapshot) = registry.mark_poll_start("edge-1", now).unwrap();
        assert_eq!(ticket.connector_id, "edge-1");
        assert_eq!(snapshot.last_poll_at, Some(now));
        assert_eq!(snapshot.status, ConnectorStatus::Connecting);
        assert!(registry.is_in_flight("edge-1").unwrap());
    }

    #[test]
    fn abort_restores_previous_state() {
        let registry = registry();
        let (ticket, _) = registry.mark_poll_start("edge-1", Utc::now()).unwrap();
        registry.abort_poll_start(ticket).unwrap();

        let c = registry.get("edge-1").unwrap();
        assert!(c.last_poll_at.is_none());
        assert_eq!(c.status, ConnectorStatus::Disconnected);
        assert!(!registry.is_in_flight("edge-1").unwrap());
    }

    #[test]
    fn result_releases_claim() {
        let registry = registry();
        registry.mark_poll_start("edge-1", Utc::now()).unwrap();
        registry
            .mark_poll_result("edge-1", PollOutcome::Failed("poll timed out after 30s".into()))
            .unwrap();

        let c = registry.get("edge-1").unwrap();
        assert_eq!(c.status, ConnectorStatus::Error);
        assert_eq!(c.error_message.as_deref(), Some("poll timed out after 30s"));
        assert_eq!(c.consecutive_failures, 1);

        registry.mark_poll_start("edge-1", Utc::now()).unwrap();
        registry.mark_poll_result("edge-1", PollOutcome::Success).unwrap();
        let c = registry.get("edge-1").unwrap();
        assert_eq!(c.status, ConnectorStatus::Connected);
        assert!(c.error_message.is_none());
        assert_eq!(c.consecutive_failures, 0);
    }

    #[test]
    fn cancelled_poll_keeps_prior_health() {
        let registry = registry();
        registry.mark_poll_start("edge-1", Utc::now()).unwrap();
        registry.mark_poll_result("edge-1", PollOutcome::Success).unwrap();

        registry.mark_poll_start("edge-1", Utc::now()).unwrap();
        registry.mark_poll_result("edge-1", PollOutcome::Cancelled).unwrap();
        assert_eq!(registry.get("edge-1").unwrap().status, ConnectorStatus::Connected);
    }

    #[test]
    fn disabled_connector_cannot_be_claimed() {
        let registry = registry();
        registry.set_enabled("edge-1", false).unwrap();
        let err = registry.mark_poll_start("edge-1", Utc::now()).unwrap_err();
        assert!(matches!(err, NetpulseError::Validation(_)));
    }

    #[test]
    fn unknown_connector() {
        let registry = registry();
        assert!(matches!(
            registry.mark_poll_start("nope", Utc::now()),
            Err(NetpulseError::NotFound(_))
        ));
        assert!(matches!(registry.get("nope"), Err(NetpulseError::NotFound(_))));
    }

    #[test]
    fn remove_refused_while_polling() {
        let registry = registry();
        registry.mark_poll_start("edge-1", Utc::now()).unwrap();
        assert!(matches!(registry.remove("edge-1"), Err(NetpulseError::Conflict(_))));

        registry.mark_poll_result("edge-1", PollOutcome::Success).unwrap();
        registry.remove("edge-1").unwrap();
        assert!(registry.list(None).unwrap().is_empty());
    }

    #[test]
    fn upsert_preserves_poll_bookkeeping() {
        let registry = registry();
        let now = Utc::now();
        registry.mark_poll_start("edge-1", now).unwrap();
        registry.mark_poll_result("edge-1", PollOutcome::Success).unwrap();

        let updated = registry.upsert("edge-1", input(600)).unwrap();
        assert_eq!(updated.poll_interval_secs, 600);
        assert_eq!(updated.last_poll_at, Some(now));
        assert_eq!(updated.status, ConnectorStatus::Connected);
    }

    #[test]
    fn upsert_rejects_interval_below_floor() {
        let registry = registry();
        assert!(matches!(
            registry.upsert("edge-2", input(5)),
            Err(NetpulseError::Validation(_))
        ));
    }

    #[test]
    fn list_filters_enabled() {
        let registry = registry();
        registry.upsert("edge-2", input(300)).unwrap();
        registry.set_enabled("edge-2", false).unwrap();
        assert_eq!(registry.list(None).unwrap().len(), 2);
        assert_eq!(registry.list(Some(true)).unwrap().len(), 1);
        assert_eq!(registry.list(Some(false)).unwrap()[0].id, "edge-2");
    }
}
