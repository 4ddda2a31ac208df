//! Connector identity, typed driver configuration, and poll bookkeeping.
//!
//! A connector is pure data: the registry owns the mutable copy and the
//! dispatcher/worker pool only ever touch `last_poll_at`, `status`,
//! `error_message` and `consecutive_failures`.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::config::DispatchConfig;
use crate::error::{NetpulseError, Result};

// ── Status ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl Default for ConnectorStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

// ── Typed config (tagged union with generic fallback) ───────────────

/// SNMP polling target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnmpConfig {
    pub host: String,
    #[serde(default = "default_snmp_port")]
    pub port: u16,
    #[serde(default = "default_community")]
    pub community: String,
    #[serde(default = "default_snmp_version")]
    pub version: String,
    #[serde(default)]
    pub oids: Vec<String>,
    pub timeout_secs: Option<u64>,
}

/// SSH command runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshConfig {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    /// Reference into the external credential vault.
    pub credential_ref: Option<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    pub timeout_secs: Option<u64>,
}

/// HTTP endpoint check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub url: String,
    #[serde(default = "default_http_method")]
    pub method: String,
    pub expected_status: Option<u16>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub timeout_secs: Option<u64>,
}

/// ICMP reachability probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingConfig {
    pub host: String,
    #[serde(default = "default_ping_count")]
    pub count: u32,
    pub timeout_secs: Option<u64>,
}

/// Any connector type the core does not know about. The settings map is kept
/// verbatim and handed to whichever driver registers for `kind`.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericConfig {
    pub kind: String,
    pub settings: Map<String, Value>,
}

fn default_snmp_port() -> u16 {
    161
}

fn default_ssh_port() -> u16 {
    22
}

fn default_community() -> String {
    "public".to_string()
}

fn default_snmp_version() -> String {
    "v2c".to_string()
}

fn default_http_method() -> String {
    "GET".to_string()
}

fn default_ping_count() -> u32 {
    3
}

/// Short-running protocol exchanges.
const QUICK_TIMEOUT: Duration = Duration::from_secs(30);
/// Interactive sessions running arbitrary commands.
const SESSION_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KnownConfig {
    Snmp(SnmpConfig),
    Ssh(SshConfig),
    Http(HttpConfig),
    Ping(PingConfig),
}

const KNOWN_KINDS: &[&str] = &["snmp", "ssh", "http", "ping"];

/// Driver-specific connector configuration, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorConfig {
    Snmp(SnmpConfig),
    Ssh(SshConfig),
    Http(HttpConfig),
    Ping(PingConfig),
    Generic(GenericConfig),
}

impl ConnectorConfig {
    /// Driver kind used to look up the protocol driver.
    pub fn kind(&self) -> &str {
        match self {
            ConnectorConfig::Snmp(_) => "snmp",
            ConnectorConfig::Ssh(_) => "ssh",
            ConnectorConfig::Http(_) => "http",
            ConnectorConfig::Ping(_) => "ping",
            ConnectorConfig::Generic(g) => &g.kind,
        }
    }

    /// Execution timeout for one poll, or `None` to use the pool default.
    pub fn timeout(&self) -> Option<Duration> {
        let explicit = match self {
            ConnectorConfig::Snmp(c) => c.timeout_secs,
            ConnectorConfig::Ssh(c) => c.timeout_secs,
            ConnectorConfig::Http(c) => c.timeout_secs,
            ConnectorConfig::Ping(c) => c.timeout_secs,
            ConnectorConfig::Generic(g) => g.settings.get("timeout_secs").and_then(Value::as_u64),
        };
        if let Some(secs) = explicit {
            return Some(Duration::from_secs(secs));
        }
        match self {
            ConnectorConfig::Ssh(_) => Some(SESSION_TIMEOUT),
            ConnectorConfig::Generic(_) => None,
            _ => Some(QUICK_TIMEOUT),
        }
    }

    /// Target host or URL, when the config has one.
    pub fn target(&self) -> Option<&str> {
        match self {
            ConnectorConfig::Snmp(c) => Some(&c.host),
            ConnectorConfig::Ssh(c) => Some(&c.host),
            ConnectorConfig::Http(c) => Some(&c.url),
            ConnectorConfig::Ping(c) => Some(&c.host),
            ConnectorConfig::Generic(g) => g
                .settings
                .get("host")
                .or_else(|| g.settings.get("url"))
                .and_then(Value::as_str),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(secs) = self.timeout().map(|t| t.as_secs()) {
            if secs == 0 {
                return Err(NetpulseError::Validation("timeout_secs must be positive".into()));
            }
        }
        match self {
            ConnectorConfig::Generic(g) if g.kind.trim().is_empty() => {
                Err(NetpulseError::Validation("connector type must not be empty".into()))
            }
            ConnectorConfig::Generic(_) => Ok(()),
            ConnectorConfig::Ssh(c) if c.username.trim().is_empty() => {
                Err(NetpulseError::Validation("ssh connector requires a username".into()))
            }
            ConnectorConfig::Http(c) if !c.url.starts_with("http://") && !c.url.starts_with("https://") => {
                Err(NetpulseError::Validation(format!("invalid http url '{}'", c.url)))
            }
            other => match other.target() {
                Some(t) if !t.trim().is_empty() => Ok(()),
                _ => Err(NetpulseError::Validation(format!(
                    "{} connector requires a host",
                    other.kind()
                ))),
            },
        }
    }

    /// Config as a JSON value (the snapshot stored on poll jobs).
    pub fn to_value(&self) -> Value {
        let known = match self.clone() {
            ConnectorConfig::Snmp(c) => KnownConfig::Snmp(c),
            ConnectorConfig::Ssh(c) => KnownConfig::Ssh(c),
            ConnectorConfig::Http(c) => KnownConfig::Http(c),
            ConnectorConfig::Ping(c) => KnownConfig::Ping(c),
            ConnectorConfig::Generic(g) => {
                let mut map = g.settings;
                map.insert("type".to_string(), Value::String(g.kind));
                return Value::Object(map);
            }
        };
        serde_json::to_value(known).unwrap_or(Value::Null)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| NetpulseError::Validation("connector config is missing 'type'".into()))?
            .to_string();

        if KNOWN_KINDS.contains(&kind.as_str()) {
            let known: KnownConfig = serde_json::from_value(value)
                .map_err(|e| NetpulseError::Validation(format!("invalid {} config: {}", kind, e)))?;
            return Ok(match known {
                KnownConfig::Snmp(c) => ConnectorConfig::Snmp(c),
                KnownConfig::Ssh(c) => ConnectorConfig::Ssh(c),
                KnownConfig::Http(c) => ConnectorConfig::Http(c),
                KnownConfig::Ping(c) => ConnectorConfig::Ping(c),
            });
        }

        match value {
            Value::Object(mut settings) => {
                settings.remove("type");
                Ok(ConnectorConfig::Generic(GenericConfig { kind, settings }))
            }
            _ => Err(NetpulseError::Validation("connector config must be an object".into())),
        }
    }
}

impl Serialize for ConnectorConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConnectorConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        ConnectorConfig::from_value(value).map_err(serde::de::Error::custom)
    }
}

// ── Connector ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connector {
    pub id: String,
    pub name: String,
    pub config: ConnectorConfig,
    pub enabled: bool,
    pub poll_interval_secs: u64,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub status: ConnectorStatus,
    pub error_message: Option<String>,
    /// Failed or timed-out polls since the last success.
    pub consecutive_failures: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connector {
    pub fn kind(&self) -> &str {
        self.config.kind()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Whether a scheduled poll is due at `now`: enabled, and either never
    /// polled or at least `poll_interval` since the last poll started.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_poll_at {
            None => true,
            Some(last) => {
                let interval = i64::try_from(self.poll_interval_secs).unwrap_or(i64::MAX);
                now.signed_duration_since(last).num_seconds() >= interval
            }
        }
    }
}

/// Create/update payload for a connector. The id comes from the URL or seed entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorInput {
    pub name: Option<String>,
    pub config: ConnectorConfig,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub poll_interval_secs: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl ConnectorInput {
    /// Validate and resolve defaults into a fresh [`Connector`].
    pub fn into_connector(self, id: &str, dispatch: &DispatchConfig) -> Result<Connector> {
        validate_connector_id(id)?;
        self.config.validate()?;
        let poll_interval_secs = self
            .poll_interval_secs
            .unwrap_or(dispatch.default_poll_interval_secs);
        validate_poll_interval(poll_interval_secs, dispatch.min_poll_interval_secs)?;

        let now = Utc::now();
        Ok(Connector {
            id: id.to_string(),
            name: self.name.unwrap_or_else(|| id.to_string()),
            config: self.config,
            enabled: self.enabled,
            poll_interval_secs,
            last_poll_at: None,
            status: ConnectorStatus::Disconnected,
            error_message: None,
            consecutive_failures: 0,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Connector ids are URL path segments: lowercase alphanumerics, `-`, `_`, `.`.
pub fn validate_connector_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(NetpulseError::Validation(format!("invalid connector id '{}'", id)))
    }
}

/// Longest accepted poll interval: one year.
pub const MAX_POLL_INTERVAL_SECS: u64 = 86_400 * 365;

pub fn validate_poll_interval(secs: u64, floor: u64) -> Result<()> {
    if secs < floor {
        return Err(NetpulseError::Validation(format!(
            "poll_interval_secs {} is below the minimum of {}",
            secs, floor
        )));
    }
    if secs > MAX_POLL_INTERVAL_SECS {
        return Err(NetpulseError::Validation(format!(
            "poll_interval_secs {} is above the maximum of {}",
            secs, MAX_POLL_INTERVAL_SECS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatch() -> DispatchConfig {
        DispatchConfig::default()
    }

    #[test]
    fn snmp_config_defaults() {
        let json = r#"{"type":"snmp","host":"10.1.1.1"}"#;
        let config: ConnectorConfig = serde_json::from_str(json).unwrap();
        match &config {
            ConnectorConfig::Snmp(c) => {
                assert_eq!(c.port, 161);
                assert_eq!(c.community, "public");
                assert_eq!(c.version, "v2c");
            }
            other => panic!("expected Snmp variant, got {:?}", other),
        }
        assert_eq!(config.kind(), "snmp");
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn ssh_timeout_is_longer() {
        let json = r#"{"type":"ssh","host":"core-sw","username":"ops"}"#;
        let config: ConnectorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.timeout(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn explicit_timeout_wins() {
        let json = r#"{"type":"http","url":"https://ups.local/status","timeout_secs":5}"#;
        let config: ConnectorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn unknown_type_falls_back_to_generic() {
        let json = r#"{"type":"onvif_camera","host":"cam-3","stream":"main"}"#;
        let config: ConnectorConfig = serde_json::from_str(json).unwrap();
        match &config {
            ConnectorConfig::Generic(g) => {
                assert_eq!(g.kind, "onvif_camera");
                assert_eq!(g.settings["stream"], "main");
                assert!(!g.settings.contains_key("type"));
            }
            other => panic!("expected Generic variant, got {:?}", other),
        }
        assert_eq!(config.target(), Some("cam-3"));
        assert_eq!(config.timeout(), None);

        // The type tag survives serialization.
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["type"], "onvif_camera");
    }

    #[test]
    fn known_type_with_bad_fields_is_rejected() {
        let json = r#"{"type":"ssh","host":"core-sw"}"#;
        assert!(serde_json::from_str::<ConnectorConfig>(json).is_err());
    }

    #[test]
    fn missing_type_is_rejected() {
        assert!(serde_json::from_str::<ConnectorConfig>(r#"{"host":"x"}"#).is_err());
    }

    #[test]
    fn input_below_floor_is_rejected() {
        let input = ConnectorInput {
            name: None,
            config: ConnectorConfig::Ping(PingConfig {
                host: "10.0.0.1".into(),
                count: 3,
                timeout_secs: None,
            }),
            enabled: true,
            poll_interval_secs: Some(10),
        };
        let err = input.into_connector("edge-1", &dispatch()).unwrap_err();
        assert!(matches!(err, NetpulseError::Validation(_)));
    }

    #[test]
    fn input_above_ceiling_is_rejected() {
        let input = ConnectorInput {
            name: None,
            config: ConnectorConfig::Ping(PingConfig {
                host: "10.0.0.1".into(),
                count: 3,
                timeout_secs: None,
            }),
            enabled: true,
            poll_interval_secs: Some(u64::MAX),
        };
        let err = input.into_connector("edge-1", &dispatch()).unwrap_err();
        assert!(matches!(err, NetpulseError::Validation(_)));
        assert!(validate_poll_interval(MAX_POLL_INTERVAL_SECS, 60).is_ok());
    }

    #[test]
    fn input_uses_default_interval() {
        let input = ConnectorInput {
            name: Some("Edge router".into()),
            config: ConnectorConfig::Ping(PingConfig {
                host: "10.0.0.1".into(),
                count: 3,
                timeout_secs: None,
            }),
            enabled: true,
            poll_interval_secs: None,
        };
        let connector = input.into_connector("edge-1", &dispatch()).unwrap();
        assert_eq!(connector.poll_interval_secs, 300);
        assert_eq!(connector.status, ConnectorStatus::Disconnected);
        assert!(connector.last_poll_at.is_none());
    }

    #[test]
    fn invalid_ids() {
        assert!(validate_connector_id("core-router.01").is_ok());
        assert!(validate_connector_id("").is_err());
        assert!(validate_connector_id("Core Router").is_err());
        assert!(validate_connector_id("a/b").is_err());
    }

    #[test]
    fn due_check() {
        let input = ConnectorInput {
            name: None,
            config: ConnectorConfig::Ping(PingConfig {
                host: "10.0.0.1".into(),
                count: 1,
                timeout_secs: None,
            }),
            enabled: true,
            poll_interval_secs: Some(300),
        };
        let mut c = input.into_connector("a", &dispatch()).unwrap();
        let now = Utc::now();
        assert!(c.is_due(now), "never polled is due");

        c.last_poll_at = Some(now - chrono::Duration::seconds(400));
        assert!(c.is_due(now));

        c.last_poll_at = Some(now - chrono::Duration::seconds(100));
        assert!(!c.is_due(now));

        c.last_poll_at = None;
        c.enabled = false;
        assert!(!c.is_due(now), "disabled is never due");
    }

    #[test]
    fn huge_interval_is_never_due_right_after_a_poll() {
        let input = ConnectorInput {
            name: None,
            config: ConnectorConfig::Ping(PingConfig {
                host: "10.0.0.1".into(),
                count: 1,
                timeout_secs: None,
            }),
            enabled: true,
            poll_interval_secs: Some(300),
        };
        let mut c = input.into_connector("a", &dispatch()).unwrap();
        let now = Utc::now();
        c.poll_interval_secs = u64::MAX;
        c.last_poll_at = Some(now);
        assert!(!c.is_due(now));
        assert!(!c.is_due(now + chrono::Duration::days(3650)));
    }
}
