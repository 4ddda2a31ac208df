//! Operator-driven alert status changes and suppression expiry.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use netpulse_core::{Alert, AlertStatus, NetpulseError, Result};

use crate::store::AlertStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertAction {
    Acknowledge,
    Unacknowledge,
    /// Time-boxed when `until` is set, otherwise until lifted.
    Suppress { until: Option<DateTime<Utc>> },
    Unsuppress,
    Resolve,
}

impl AlertAction {
    /// Parse the action segment of `POST /alerts/{id}/{action}`.
    pub fn parse(action: &str, until: Option<DateTime<Utc>>) -> Result<Self> {
        match action {
            "acknowledge" => Ok(AlertAction::Acknowledge),
            "unacknowledge" => Ok(AlertAction::Unacknowledge),
            "suppress" => Ok(AlertAction::Suppress { until }),
            "unsuppress" => Ok(AlertAction::Unsuppress),
            "resolve" => Ok(AlertAction::Resolve),
            other => Err(NetpulseError::Validation(format!(
                "unknown alert action '{}'",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AlertAction::Acknowledge => "acknowledge",
            AlertAction::Unacknowledge => "unacknowledge",
            AlertAction::Suppress { .. } => "suppress",
            AlertAction::Unsuppress => "unsuppress",
            AlertAction::Resolve => "resolve",
        }
    }

    fn target(&self) -> AlertStatus {
        match self {
            AlertAction::Acknowledge => AlertStatus::Acknowledged,
            AlertAction::Unacknowledge | AlertAction::Unsuppress => AlertStatus::Active,
            AlertAction::Suppress { .. } => AlertStatus::Suppressed,
            AlertAction::Resolve => AlertStatus::Resolved,
        }
    }

    /// The status an alert must currently be in, when the action is only
    /// meaningful from one state.
    fn required_source(&self) -> Option<AlertStatus> {
        match self {
            AlertAction::Unacknowledge => Some(AlertStatus::Acknowledged),
            AlertAction::Unsuppress => Some(AlertStatus::Suppressed),
            _ => None,
        }
    }

    fn apply_to(&self, alert: &mut Alert, now: DateTime<Utc>) -> Result<()> {
        let to = self.target();
        if let Some(required) = self.required_source() {
            if alert.status != required {
                return Err(NetpulseError::InvalidTransition {
                    from: alert.status.to_string(),
                    to: to.to_string(),
                });
            }
        }
        alert.status.ensure_transition(to)?;

        match *self {
            AlertAction::Acknowledge => alert.acknowledged_at = Some(now),
            AlertAction::Unacknowledge => alert.acknowledged_at = None,
            AlertAction::Suppress { until } => {
                if until.is_some_and(|u| u <= now) {
                    return Err(NetpulseError::Validation(
                        "suppression end must be in the future".into(),
                    ));
                }
                alert.suppressed_until = until;
            }
            AlertAction::Unsuppress => alert.suppressed_until = None,
            AlertAction::Resolve => {
                alert.resolved_at = Some(now);
                alert.suppressed_until = None;
            }
        }
        alert.status = to;
        alert.updated_at = now;
        Ok(())
    }
}

impl AlertStore {
    /// Apply an operator action atomically.
    pub fn apply(&self, id: Uuid, action: AlertAction) -> Result<Alert> {
        let now = Utc::now();
        let alert = self.modify(id, |alert| action.apply_to(alert, now))?;
        info!(alert_id = %id, action = action.name(), status = %alert.status, "Alert updated");
        Ok(alert)
    }

    /// Return suppressed alerts whose window has ended to `active`.
    pub fn expire_suppressions(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut expired = 0;
        for id in self.expired_suppressions(now)? {
            // Re-checked under the write lock; an operator may have acted since.
            let changed = self.modify(id, |alert| {
                if alert.status != AlertStatus::Suppressed || alert.suppression_active(now) {
                    return Err(NetpulseError::Conflict("suppression changed".into()));
                }
                alert.status = AlertStatus::Active;
                alert.suppressed_until = None;
                alert.updated_at = now;
                Ok(())
            });
            match changed {
                Ok(_) => expired += 1,
                Err(NetpulseError::Conflict(_)) | Err(NetpulseError::NotFound(_)) => {
                    debug!(alert_id = %id, "Suppression no longer expirable");
                }
                Err(e) => return Err(e),
            }
        }
        if expired > 0 {
            info!(expired, "Suppression windows expired");
        }
        Ok(expired)
    }
}
