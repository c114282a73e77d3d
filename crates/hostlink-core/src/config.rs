//! Configuration system for the Hostlink agent
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde, durations as humantime strings
//! - Environment variable overrides
//! - Tagged source blocks, one variant per collector type
//! - Validation of ranges and endpoint settings

use serde::de::Error as _;
use serde::ser::{Error as _, SerializeMap};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Endpoint value selecting the console output
pub const CONSOLE_ENDPOINT: &str = "console";

/// Allowed range for `output.maximum_buffer_size`
pub const BUFFER_SIZE_RANGE: std::ops::RangeInclusive<usize> = 5_000..=1_000_000;

/// Allowed range for `output.maximum_flush_size`
pub const FLUSH_SIZE_RANGE: std::ops::RangeInclusive<usize> = 1_000..=1_000_000;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete agent configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent settings
    pub agent: AgentSettings,

    /// Output, buffering and cloud settings
    pub output: OutputConfig,

    /// Collector blocks
    pub sources: Vec<SourceConfig>,
}

impl AgentConfig {
    /// Parse a configuration document without applying overrides
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Settings that differ from `other` but only take effect on restart
    pub fn restart_required(&self, other: &AgentConfig) -> Vec<&'static str> {
        let (old, new) = (&self.output, &other.output);
        [
            ("agent.log_level", self.agent.log_level != other.agent.log_level),
            ("output.endpoint", old.endpoint != new.endpoint),
            ("output.subscription", old.subscription != new.subscription),
            ("output.maximum_buffer_size", old.maximum_buffer_size != new.maximum_buffer_size),
            ("output.maximum_flush_size", old.maximum_flush_size != new.maximum_flush_size),
            ("output.data_path", old.data_path != new.data_path),
            ("output.request_timeout", old.request_timeout != new.request_timeout),
            ("output.registration", old.registration != new.registration),
        ]
        .into_iter()
        .filter_map(|(key, changed)| changed.then_some(key))
        .collect()
    }
}

/// Agent settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// `console` or the base URL of the ingestion service
    pub endpoint: String,

    /// Tenant subscription records are delivered to
    pub subscription: Uuid,

    /// Push interval
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Buffer capacity
    pub maximum_buffer_size: usize,

    /// Records per send
    pub maximum_flush_size: usize,

    /// Directory holding the persisted refresh token
    pub data_path: PathBuf,

    /// Timeout applied to every HTTP request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Agent health records
    pub health: HealthConfig,

    /// Handshake settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration: Option<RegistrationConfig>,
}

impl OutputConfig {
    pub fn is_console(&self) -> bool {
        self.endpoint.eq_ignore_ascii_case(CONSOLE_ENDPOINT)
    }

    pub fn registration_token(&self) -> Option<&str> {
        self.registration
            .as_ref()
            .and_then(|r| r.registration_token.as_deref())
            .filter(|t| !t.trim().is_empty())
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            endpoint: CONSOLE_ENDPOINT.to_string(),
            subscription: Uuid::nil(),
            interval: Duration::from_secs(10),
            maximum_buffer_size: 10_000,
            maximum_flush_size: 10_000,
            data_path: default_data_path(),
            request_timeout: Duration::from_secs(30),
            health: HealthConfig::default(),
            registration: None,
        }
    }
}

/// Agent health settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
        }
    }
}

/// Handshake settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Pre-shared token used to register without manual approval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_token: Option<String>,
}

/// One collector block, selected by its `type` field
///
/// The type name is matched after trimming and ignoring case. A type this
/// agent does not know is kept as [`SourceConfig::Unknown`] with the name
/// as written, then logged and skipped by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceConfig {
    SystemInformation(IntervalSourceConfig),
    DiskInformation(IntervalSourceConfig),
    NetworkInformation(IntervalSourceConfig),
    ProcessInformation(IntervalSourceConfig),
    UdpListener(UdpListenerConfig),
    Unknown(String),
}

impl SourceConfig {
    /// Registry key: the lowercase type name
    pub fn type_name(&self) -> &'static str {
        match self {
            SourceConfig::SystemInformation(_) => "systeminformation",
            SourceConfig::DiskInformation(_) => "diskinformation",
            SourceConfig::NetworkInformation(_) => "networkinformation",
            SourceConfig::ProcessInformation(_) => "processinformation",
            SourceConfig::UdpListener(_) => "udplistener",
            SourceConfig::Unknown(_) => "unknown",
        }
    }

    /// Type name as written back to a configuration file
    fn display_name(&self) -> &str {
        match self {
            SourceConfig::SystemInformation(_) => "SystemInformation",
            SourceConfig::DiskInformation(_) => "DiskInformation",
            SourceConfig::NetworkInformation(_) => "NetworkInformation",
            SourceConfig::ProcessInformation(_) => "ProcessInformation",
            SourceConfig::UdpListener(_) => "UdpListener",
            SourceConfig::Unknown(name) => name,
        }
    }

    pub fn is_enabled(&self) -> bool {
        match self {
            SourceConfig::SystemInformation(c)
            | SourceConfig::DiskInformation(c)
            | SourceConfig::NetworkInformation(c)
            | SourceConfig::ProcessInformation(c) => c.enabled,
            SourceConfig::UdpListener(c) => c.enabled,
            SourceConfig::Unknown(_) => false,
        }
    }

    /// Interval settings for interval-driven collectors
    pub fn interval_config(&self) -> Option<&IntervalSourceConfig> {
        match self {
            SourceConfig::SystemInformation(c)
            | SourceConfig::DiskInformation(c)
            | SourceConfig::NetworkInformation(c)
            | SourceConfig::ProcessInformation(c) => Some(c),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for SourceConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut fields: serde_json::Map<String, serde_json::Value> =
            Deserialize::deserialize(deserializer)?;
        let key = fields
            .keys()
            .find(|k| k.eq_ignore_ascii_case("type"))
            .cloned()
            .ok_or_else(|| D::Error::missing_field("type"))?;
        let name = match fields.remove(&key) {
            Some(serde_json::Value::String(name)) => name,
            other => {
                return Err(D::Error::custom(format!(
                    "source type must be a string, got {:?}",
                    other
                )))
            }
        };

        let body = serde_json::Value::Object(fields);
        let parsed = match name.trim().to_lowercase().as_str() {
            "systeminformation" => {
                serde_json::from_value(body).map(SourceConfig::SystemInformation)
            }
            "diskinformation" => serde_json::from_value(body).map(SourceConfig::DiskInformation),
            "networkinformation" => {
                serde_json::from_value(body).map(SourceConfig::NetworkInformation)
            }
            "processinformation" => {
                serde_json::from_value(body).map(SourceConfig::ProcessInformation)
            }
            "udplistener" => serde_json::from_value(body).map(SourceConfig::UdpListener),
            _ => return Ok(SourceConfig::Unknown(name)),
        };
        parsed.map_err(|e| D::Error::custom(format!("source {}: {}", name.trim(), e)))
    }
}

impl Serialize for SourceConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let body = match self {
            SourceConfig::SystemInformation(c)
            | SourceConfig::DiskInformation(c)
            | SourceConfig::NetworkInformation(c)
            | SourceConfig::ProcessInformation(c) => serde_json::to_value(c),
            SourceConfig::UdpListener(c) => serde_json::to_value(c),
            SourceConfig::Unknown(_) => Ok(serde_json::Value::Null),
        }
        .map_err(S::Error::custom)?;

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", self.display_name())?;
        if let serde_json::Value::Object(fields) = body {
            for (key, value) in &fields {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

/// Settings shared by interval-driven collectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalSourceConfig {
    pub enabled: bool,

    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for IntervalSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(15),
        }
    }
}

/// UDP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpListenerConfig {
    pub enabled: bool,

    /// Local port; required
    pub port: u16,
}

impl Default for UdpListenerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 0,
        }
    }
}

/// Default directory for agent state
pub fn default_data_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("hostlink"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/hostlink"))
}

/// Configuration loader
pub struct ConfigLoader {
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set the config path from CLI argument
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with the following precedence:
    /// 1. CLI --config flag
    /// 2. HOSTLINK_CONFIG environment variable
    /// 3. <config dir>/hostlink/config.toml
    /// 4. /etc/hostlink/config.toml
    /// 5. Default values
    pub fn load(&self) -> ConfigResult<AgentConfig> {
        match self.find_config_file() {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                self.load_path(&path)
            }
            None => {
                debug!("No config file found, using defaults");
                Self::finish(AgentConfig::default())
            }
        }
    }

    /// Load a specific file, then apply overrides and validate
    pub fn load_path(&self, path: &Path) -> ConfigResult<AgentConfig> {
        Self::finish(self.load_from_file(path)?)
    }

    fn finish(mut config: AgentConfig) -> ConfigResult<AgentConfig> {
        apply_overrides(&mut config, |key| std::env::var(key).ok());
        validate(&config)?;
        Ok(config)
    }

    /// Find the config file to use
    pub fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!("CLI config path does not exist: {}", path.display());
        }

        if let Ok(env_path) = std::env::var("HOSTLINK_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            warn!("HOSTLINK_CONFIG path does not exist: {}", env_path);
        }

        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Some(path);
            }
        }

        #[cfg(unix)]
        {
            let path = PathBuf::from("/etc/hostlink/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(&self, path: &Path) -> ConfigResult<AgentConfig> {
        let content = std::fs::read_to_string(path)?;
        AgentConfig::from_toml(&content)
    }

    /// Get the default config file path for the current platform
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("hostlink").join("config.toml"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `HOSTLINK_*` overrides read through `lookup`
pub fn apply_overrides(config: &mut AgentConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("HOSTLINK_LOG_LEVEL") {
        config.agent.log_level = val;
    }
    if let Some(val) = lookup("HOSTLINK_ENDPOINT") {
        config.output.endpoint = val;
    }
    if let Some(val) = lookup("HOSTLINK_SUBSCRIPTION") {
        match Uuid::parse_str(val.trim()) {
            Ok(id) => config.output.subscription = id,
            Err(e) => warn!("Ignoring invalid HOSTLINK_SUBSCRIPTION {}: {}", val, e),
        }
    }
    if let Some(val) = lookup("HOSTLINK_DATA_PATH") {
        config.output.data_path = PathBuf::from(val);
    }
    if let Some(val) = lookup("HOSTLINK_REGISTRATION_TOKEN") {
        config
            .output
            .registration
            .get_or_insert_with(RegistrationConfig::default)
            .registration_token = Some(val);
    }
}

/// Validate configuration
pub fn validate(config: &AgentConfig) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.agent.log_level.to_lowercase().as_str()) {
        return Err(ConfigError::ValidationError(format!(
            "Invalid log level: {}. Must be one of: {:?}",
            config.agent.log_level, valid_levels
        )));
    }

    let output = &config.output;
    if !BUFFER_SIZE_RANGE.contains(&output.maximum_buffer_size) {
        return Err(ConfigError::ValidationError(format!(
            "maximum_buffer_size {} out of range {:?}",
            output.maximum_buffer_size, BUFFER_SIZE_RANGE
        )));
    }
    if !FLUSH_SIZE_RANGE.contains(&output.maximum_flush_size) {
        return Err(ConfigError::ValidationError(format!(
            "maximum_flush_size {} out of range {:?}",
            output.maximum_flush_size, FLUSH_SIZE_RANGE
        )));
    }
    for (name, value) in [
        ("output.interval", output.interval),
        ("output.request_timeout", output.request_timeout),
        ("output.health.interval", output.health.interval),
    ] {
        if value.is_zero() {
            return Err(ConfigError::ValidationError(format!(
                "{} must be greater than zero",
                name
            )));
        }
    }

    if !output.is_console() {
        let url = url::Url::parse(&output.endpoint).map_err(|e| {
            ConfigError::ValidationError(format!("Invalid endpoint {}: {}", output.endpoint, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "Endpoint must be http(s) or \"{}\", got {}",
                CONSOLE_ENDPOINT, output.endpoint
            )));
        }
        if output.subscription.is_nil() {
            return Err(ConfigError::ValidationError(
                "A subscription is required when sending to a remote endpoint".to_string(),
            ));
        }
    }

    for source in &config.sources {
        if let Some(interval) = source.interval_config() {
            if interval.interval.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "Interval of source {} must be greater than zero",
                    source.type_name()
                )));
            }
        }
        if let SourceConfig::UdpListener(udp) = source {
            if udp.enabled && udp.port == 0 {
                return Err(ConfigError::ValidationError(
                    "UdpListener requires a non-zero port".to_string(),
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const SUBSCRIPTION: &str = "5f0c2b9e-8d4a-4c1e-9a57-2f6a3e1d0b44";

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.agent.log_level, "info");
        assert!(config.output.is_console());
        assert_eq!(config.output.interval, Duration::from_secs(10));
        assert_eq!(config.output.maximum_buffer_size, 10_000);
        assert_eq!(config.output.maximum_flush_size, 10_000);
        assert_eq!(config.output.health.interval, Duration::from_secs(15));
        assert!(config.sources.is_empty());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let content = format!(
            r#"
[agent]
log_level = "debug"

[output]
endpoint = "https://ingest.example.com"
subscription = "{SUBSCRIPTION}"
interval = "30s"
maximum_buffer_size = 20000
maximum_flush_size = 5000
data_path = "/tmp/hostlink"

[output.health]
interval = "1m"

[output.registration]
registration_token = "reg-token"

[[sources]]
type = "DiskInformation"
interval = "5m"

[[sources]]
type = "processinformation"
enabled = false

[[sources]]
type = "UdpListener"
port = 5140

[[sources]]
type = "Telepathy"
"#
        );

        let config = AgentConfig::from_toml(&content).unwrap();
        assert_eq!(config.agent.log_level, "debug");
        assert!(!config.output.is_console());
        assert_eq!(config.output.subscription.to_string(), SUBSCRIPTION);
        assert_eq!(config.output.interval, Duration::from_secs(30));
        assert_eq!(config.output.health.interval, Duration::from_secs(60));
        assert_eq!(config.output.registration_token(), Some("reg-token"));

        assert_eq!(config.sources.len(), 4);
        assert_eq!(
            config.sources[0],
            SourceConfig::DiskInformation(IntervalSourceConfig {
                enabled: true,
                interval: Duration::from_secs(300),
            })
        );
        assert!(!config.sources[1].is_enabled());
        assert_eq!(config.sources[1].type_name(), "processinformation");
        assert_eq!(
            config.sources[2],
            SourceConfig::UdpListener(UdpListenerConfig {
                enabled: true,
                port: 5140
            })
        );
        assert_eq!(
            config.sources[3],
            SourceConfig::Unknown("Telepathy".to_string())
        );

        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_source_type_ignores_case_and_whitespace() {
        let content = r#"
[[sources]]
type = "DISKINFORMATION"
interval = "1m"

[[sources]]
type = "Diskinformation"

[[sources]]
type = " diskinformation "

[[sources]]
TYPE = "udpListener"
port = 6000
"#;

        let config = AgentConfig::from_toml(content).unwrap();
        assert_eq!(
            config.sources[0],
            SourceConfig::DiskInformation(IntervalSourceConfig {
                enabled: true,
                interval: Duration::from_secs(60),
            })
        );
        assert_eq!(
            config.sources[1],
            SourceConfig::DiskInformation(IntervalSourceConfig::default())
        );
        assert_eq!(config.sources[2].type_name(), "diskinformation");
        assert_eq!(
            config.sources[3],
            SourceConfig::UdpListener(UdpListenerConfig {
                enabled: true,
                port: 6000
            })
        );
    }

    #[test]
    fn test_source_without_type_is_rejected() {
        assert!(matches!(
            AgentConfig::from_toml("[[sources]]\ninterval = \"1m\"\n"),
            Err(ConfigError::ParseError(_))
        ));
        assert!(matches!(
            AgentConfig::from_toml("[[sources]]\ntype = \"DiskInformation\"\ninterval = 5\n"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_restart_required() {
        let old = AgentConfig::default();
        let mut new = old.clone();
        new.output.interval = Duration::from_secs(99);
        new.output.health.interval = Duration::from_secs(99);
        new.sources
            .push(SourceConfig::DiskInformation(IntervalSourceConfig::default()));
        assert!(old.restart_required(&new).is_empty());

        new.output.maximum_buffer_size = 5;
        new.output.maximum_flush_size = 5;
        new.agent.log_level = "debug".to_string();
        assert_eq!(
            old.restart_required(&new),
            vec![
                "agent.log_level",
                "output.maximum_buffer_size",
                "output.maximum_flush_size"
            ]
        );
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            AgentConfig::from_toml("[output\nendpoint ="),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = AgentConfig::default();
        config.agent.log_level = "loud".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_sizes() {
        let mut config = AgentConfig::default();
        config.output.maximum_buffer_size = 4_999;
        assert!(validate(&config).is_err());

        config.output.maximum_buffer_size = 5_000;
        config.output.maximum_flush_size = 999;
        assert!(validate(&config).is_err());

        config.output.maximum_flush_size = 1_000_000;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_validate_remote_endpoint() {
        let mut config = AgentConfig::default();
        config.output.endpoint = "https://ingest.example.com".to_string();
        assert!(validate(&config).is_err(), "nil subscription rejected");

        config.output.subscription = Uuid::parse_str(SUBSCRIPTION).unwrap();
        assert!(validate(&config).is_ok());

        config.output.endpoint = "ftp://ingest.example.com".to_string();
        assert!(validate(&config).is_err());

        config.output.endpoint = "not a url".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_zero_intervals() {
        let mut config = AgentConfig::default();
        config.output.interval = Duration::ZERO;
        assert!(validate(&config).is_err());

        let mut config = AgentConfig::default();
        config.sources.push(SourceConfig::DiskInformation(IntervalSourceConfig {
            enabled: true,
            interval: Duration::ZERO,
        }));
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_udp_port() {
        let mut config = AgentConfig::default();
        config
            .sources
            .push(SourceConfig::UdpListener(UdpListenerConfig::default()));
        assert!(validate(&config).is_err());

        config.sources[0] = SourceConfig::UdpListener(UdpListenerConfig {
            enabled: false,
            port: 0,
        });
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("HOSTLINK_LOG_LEVEL", "trace"),
            ("HOSTLINK_ENDPOINT", "https://ingest.example.com"),
            ("HOSTLINK_SUBSCRIPTION", SUBSCRIPTION),
            ("HOSTLINK_DATA_PATH", "/srv/hostlink"),
            ("HOSTLINK_REGISTRATION_TOKEN", "from-env"),
        ]
        .into_iter()
        .collect();

        let mut config = AgentConfig::default();
        apply_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.agent.log_level, "trace");
        assert_eq!(config.output.endpoint, "https://ingest.example.com");
        assert_eq!(config.output.subscription.to_string(), SUBSCRIPTION);
        assert_eq!(config.output.data_path, PathBuf::from("/srv/hostlink"));
        assert_eq!(config.output.registration_token(), Some("from-env"));
    }

    #[test]
    fn test_invalid_subscription_override_ignored() {
        let mut config = AgentConfig::default();
        apply_overrides(&mut config, |key| {
            (key == "HOSTLINK_SUBSCRIPTION").then(|| "nope".to_string())
        });
        assert!(config.output.subscription.is_nil());
    }

    #[test]
    fn test_load_from_cli_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[output]\ninterval = \"45s\"\n\n[[sources]]\ntype = \"SystemInformation\"\n",
        )
        .unwrap();

        let loader = ConfigLoader::new().with_cli_path(Some(path.clone()));
        assert_eq!(loader.find_config_file(), Some(path));

        let config = loader.load().unwrap();
        assert_eq!(config.output.interval, Duration::from_secs(45));
        assert_eq!(config.sources[0].type_name(), "systeminformation");
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = AgentConfig::default();
        config
            .sources
            .push(SourceConfig::NetworkInformation(IntervalSourceConfig::default()));
        config.output.registration = Some(RegistrationConfig {
            registration_token: Some("abc".to_string()),
        });

        let text = config.to_toml().unwrap();
        assert_eq!(AgentConfig::from_toml(&text).unwrap(), config);
    }
}
