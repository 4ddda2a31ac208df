use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NetpulseError, Result};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn check_range<T>(name: &str, value: T, min: T, max: T) -> Result<()>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if value < min || value > max {
        return Err(NetpulseError::Validation(format!(
            "{} must be between {} and {} (got {})",
            name, min, max, value
        )));
    }
    Ok(())
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub dispatch: DispatchConfig,
    pub workers: WorkerPoolConfig,
    pub retention: RetentionConfig,
    pub alerts: AlertConfig,
    pub connectors: ConnectorsConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `NETPULSE_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("NETPULSE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            dispatch: DispatchConfig::from_env_profiled(p),
            workers: WorkerPoolConfig::from_env_profiled(p),
            retention: RetentionConfig::from_env_profiled(p),
            alerts: AlertConfig::from_env_profiled(p),
            connectors: ConnectorsConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Check every numeric setting against its allowed range.
    pub fn validate(&self) -> Result<()> {
        self.dispatch.validate()?;
        self.workers.validate()?;
        check_range(
            "EXECUTION_HISTORY_LIMIT",
            self.retention.execution_history_limit,
            1,
            1_000_000,
        )?;
        check_range("ALERT_MAX_COMMIT_RETRIES", self.alerts.max_commit_retries, 1, 100)?;
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:      {}:{}", self.server.host, self.server.port);
        tracing::info!(
            "  dispatch:    tick={}s, default_interval={}s, floor={}s",
            self.dispatch.tick_secs,
            self.dispatch.default_poll_interval_secs,
            self.dispatch.min_poll_interval_secs
        );
        tracing::info!(
            "  workers:     {} x {} (rate_limit={}/s, queue_bound={})",
            self.workers.worker_count,
            self.workers.worker_concurrency,
            self.workers.rate_limit,
            self.workers.queue_bound
        );
        tracing::info!("  retention:   executions={}", self.retention.execution_history_limit);
        tracing::info!("  alerts:      reopen_policy={:?}", self.alerts.reopen_policy);
        tracing::info!(
            "  connectors:  file={}",
            self.connectors
                .file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".to_string())
        );
    }

    /// Return a view safe for API responses.
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "server": { "host": self.server.host, "port": self.server.port },
            "dispatch": {
                "tick_secs": self.dispatch.tick_secs,
                "default_poll_interval_secs": self.dispatch.default_poll_interval_secs,
                "min_poll_interval_secs": self.dispatch.min_poll_interval_secs,
            },
            "workers": {
                "worker_count": self.workers.worker_count,
                "worker_concurrency": self.workers.worker_concurrency,
                "rate_limit": self.workers.rate_limit,
                "queue_bound": self.workers.queue_bound,
                "cancel_grace_secs": self.workers.cancel_grace_secs,
                "default_task_timeout_secs": self.workers.default_task_timeout_secs,
            },
            "retention": { "execution_history_limit": self.retention.execution_history_limit },
            "alerts": {
                "reopen_policy": self.alerts.reopen_policy,
                "max_commit_retries": self.alerts.max_commit_retries,
            },
            "connectors": { "file": self.connectors.file },
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: String::new(),
            server: ServerConfig::default(),
            dispatch: DispatchConfig::default(),
            workers: WorkerPoolConfig::default(),
            retention: RetentionConfig::default(),
            alerts: AlertConfig::default(),
            connectors: ConnectorsConfig::default(),
        }
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_u16(p, "PORT", 3080),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3080,
            cors_origin: "*".to_string(),
        }
    }
}

// ── Dispatch ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Global tick period, independent of any connector's interval.
    pub tick_secs: u64,
    /// Interval given to connectors that do not specify one.
    pub default_poll_interval_secs: u64,
    /// No connector may poll more often than this.
    pub min_poll_interval_secs: u64,
}

impl DispatchConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            tick_secs: profiled_env_u64(p, "DISPATCH_TICK_SECS", 60),
            default_poll_interval_secs: profiled_env_u64(p, "DEFAULT_POLL_INTERVAL_SECS", 300),
            min_poll_interval_secs: profiled_env_u64(p, "MIN_POLL_INTERVAL_SECS", 60),
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    fn validate(&self) -> Result<()> {
        check_range("DISPATCH_TICK_SECS", self.tick_secs, 1, 3600)?;
        check_range("MIN_POLL_INTERVAL_SECS", self.min_poll_interval_secs, 1, 86_400)?;
        check_range(
            "DEFAULT_POLL_INTERVAL_SECS",
            self.default_poll_interval_secs,
            1,
            crate::connector::MAX_POLL_INTERVAL_SECS,
        )?;
        if self.default_poll_interval_secs < self.min_poll_interval_secs {
            return Err(NetpulseError::Validation(format!(
                "DEFAULT_POLL_INTERVAL_SECS ({}) is below MIN_POLL_INTERVAL_SECS ({})",
                self.default_poll_interval_secs, self.min_poll_interval_secs
            )));
        }
        Ok(())
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            default_poll_interval_secs: 300,
            min_poll_interval_secs: 60,
        }
    }
}

// ── Worker pool ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    /// Tasks each worker runs at the same time.
    pub worker_concurrency: usize,
    /// Task starts per second across the pool. 0 = unlimited.
    pub rate_limit: u32,
    /// Maximum queued (not yet running) tasks before `submit` pushes back.
    pub queue_bound: usize,
    pub cancel_grace_secs: u64,
    pub default_task_timeout_secs: u64,
}

impl WorkerPoolConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            worker_count: profiled_env_u32(p, "WORKER_COUNT", 2) as usize,
            worker_concurrency: profiled_env_u32(p, "WORKER_CONCURRENCY", 4) as usize,
            rate_limit: profiled_env_u32(p, "RATE_LIMIT", 10),
            queue_bound: profiled_env_u32(p, "QUEUE_BOUND", 100) as usize,
            cancel_grace_secs: profiled_env_u64(p, "CANCEL_GRACE_SECS", 10),
            default_task_timeout_secs: profiled_env_u64(p, "DEFAULT_TASK_TIMEOUT_SECS", 300),
        }
    }

    /// Total parallel capacity (`worker_count * worker_concurrency`).
    pub fn capacity(&self) -> usize {
        self.worker_count * self.worker_concurrency
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    pub fn default_task_timeout(&self) -> Duration {
        Duration::from_secs(self.default_task_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        check_range("WORKER_COUNT", self.worker_count, 1, 64)?;
        check_range("WORKER_CONCURRENCY", self.worker_concurrency, 1, 256)?;
        check_range("RATE_LIMIT", self.rate_limit, 0, 10_000)?;
        check_range("QUEUE_BOUND", self.queue_bound, 1, 100_000)?;
        check_range("CANCEL_GRACE_SECS", self.cancel_grace_secs, 0, 3600)?;
        check_range("DEFAULT_TASK_TIMEOUT_SECS", self.default_task_timeout_secs, 1, 86_400)?;
        Ok(())
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            worker_concurrency: 4,
            rate_limit: 10,
            queue_bound: 100,
            cancel_grace_secs: 10,
            default_task_timeout_secs: 300,
        }
    }
}

// ── Retention ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Terminal executions kept in history (oldest evicted first).
    pub execution_history_limit: usize,
}

impl RetentionConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            execution_history_limit: profiled_env_u32(p, "EXECUTION_HISTORY_LIMIT", 500) as usize,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { execution_history_limit: 500 }
    }
}

// ── Alerts ────────────────────────────────────────────────────

/// What happens when a finding matches a fingerprint whose latest alert is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReopenPolicy {
    /// Open a fresh alert: occurrence count 1, new `occurred_at`.
    NewIncident,
    /// Re-activate the resolved alert and keep counting.
    Resume,
}

impl std::str::FromStr for ReopenPolicy {
    type Err = NetpulseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new_incident" | "new-incident" => Ok(ReopenPolicy::NewIncident),
            "resume" => Ok(ReopenPolicy::Resume),
            other => Err(NetpulseError::Validation(format!(
                "unknown alert reopen policy '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    pub reopen_policy: ReopenPolicy,
    pub max_commit_retries: u32,
}

impl AlertConfig {
    fn from_env_profiled(p: &str) -> Self {
        let reopen_policy = profiled_env_opt(p, "ALERT_REOPEN_POLICY")
            .and_then(|v| match v.parse() {
                Ok(policy) => Some(policy),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring ALERT_REOPEN_POLICY");
                    None
                }
            })
            .unwrap_or(ReopenPolicy::NewIncident);
        Self {
            reopen_policy,
            max_commit_retries: profiled_env_u32(p, "ALERT_MAX_COMMIT_RETRIES", 5),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            reopen_policy: ReopenPolicy::NewIncident,
            max_commit_retries: 5,
        }
    }
}

// ── Connector seed file ───────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectorsConfig {
    pub file: Option<PathBuf>,
}

impl ConnectorsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            file: profiled_env_opt(p, "CONNECTORS_FILE").map(PathBuf::from),
        }
    }
}
