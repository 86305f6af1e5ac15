//! Configuration types for consumers and producers
//!
//! Configuration can be loaded from YAML or JSON files, or from a flat
//! `key -> value` properties map (the keys are the serde field names).
//! Required fields are checked by `validate()`, which every constructor that
//! accepts a config calls before doing anything else.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Default user agent sent to the log service
pub const DEFAULT_USER_AGENT: &str = concat!("logstore-connector/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Checkpoint Mode
// ============================================================================

/// When consumer-group checkpoints are pushed to the log service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointMode {
    /// Push cursors when the host takes a checkpoint
    #[default]
    OnCheckpoint,
    /// Push cursors as soon as records are consumed
    Immediate,
}

impl FromStr for CheckpointMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on_checkpoint" | "on_checkpoints" | "on-checkpoint" => Ok(Self::OnCheckpoint),
            "immediate" | "immediately" => Ok(Self::Immediate),
            other => Err(Error::invalid_value(
                "checkpoint_mode",
                format!("unknown mode '{other}', expected on_checkpoint or immediate"),
            )),
        }
    }
}

impl fmt::Display for CheckpointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnCheckpoint => write!(f, "on_checkpoint"),
            Self::Immediate => write!(f, "immediate"),
        }
    }
}

// ============================================================================
// Start Position
// ============================================================================

/// Where a shard without a restored cursor starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// Oldest retained record
    #[default]
    Begin,
    /// Only records written after subscription
    End,
    /// The consumer group checkpoint, falling back to `Begin`
    Checkpoint,
    /// First record at or after a unix timestamp (seconds)
    Timestamp(u32),
}

impl FromStr for StartPosition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "begin" | "begin_cursor" => Ok(Self::Begin),
            "end" | "end_cursor" => Ok(Self::End),
            "checkpoint" | "consumer_group" => Ok(Self::Checkpoint),
            other => other.parse::<u32>().map(Self::Timestamp).map_err(|_| {
                Error::invalid_value(
                    "start_position",
                    format!("'{other}' is not begin, end, checkpoint or a unix timestamp"),
                )
            }),
        }
    }
}

impl fmt::Display for StartPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin => write!(f, "begin"),
            Self::End => write!(f, "end"),
            Self::Checkpoint => write!(f, "checkpoint"),
            Self::Timestamp(ts) => write!(f, "{ts}"),
        }
    }
}

impl Serialize for StartPosition {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Timestamp(ts) => serializer.serialize_u32(*ts),
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for StartPosition {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Timestamp(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Timestamp(ts) => Ok(Self::Timestamp(ts)),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

// ============================================================================
// Log Service Config
// ============================================================================

/// Connection settings shared by consumers and producers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogServiceConfig {
    /// Project name
    #[serde(default)]
    pub project: String,

    /// Logstore name
    #[serde(default)]
    pub logstore: String,

    /// Service endpoint (e.g. `https://logs.example.com`)
    #[serde(default)]
    pub endpoint: String,

    /// Access key id
    #[serde(default)]
    pub access_key_id: String,

    /// Access key secret
    #[serde(default)]
    pub access_key_secret: String,

    /// User agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Default for LogServiceConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            logstore: String::new(),
            endpoint: String::new(),
            access_key_id: String::new(),
            access_key_secret: String::new(),
            user_agent: default_user_agent(),
        }
    }
}

impl LogServiceConfig {
    /// Create a config for a project and logstore
    pub fn new(
        project: impl Into<String>,
        logstore: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            logstore: logstore.into(),
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Set credentials
    #[must_use]
    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
    ) -> Self {
        self.access_key_id = access_key_id.into();
        self.access_key_secret = access_key_secret.into();
        self
    }

    /// Check that every required field is present
    pub fn validate(&self) -> Result<()> {
        require("project", &self.project)?;
        require("logstore", &self.logstore)?;
        require("endpoint", &self.endpoint)?;
        require("access_key_id", &self.access_key_id)?;
        require("access_key_secret", &self.access_key_secret)?;
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(Error::invalid_value(
                "endpoint",
                "must start with http:// or https://",
            ));
        }
        Ok(())
    }

    fn from_properties(props: &HashMap<String, String>) -> Self {
        let get = |key: &str| props.get(key).cloned().unwrap_or_default();
        Self {
            project: get("project"),
            logstore: get("logstore"),
            endpoint: get("endpoint"),
            access_key_id: get("access_key_id"),
            access_key_secret: get("access_key_secret"),
            user_agent: props
                .get("user_agent")
                .cloned()
                .unwrap_or_else(default_user_agent),
        }
    }
}

// ============================================================================
// Consumer Config
// ============================================================================

/// Consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Connection settings
    #[serde(flatten)]
    pub service: LogServiceConfig,

    /// Consumer group; remote checkpoint sync is disabled when absent
    #[serde(default)]
    pub consumer_group: Option<String>,

    /// When cursors are pushed to the consumer group
    #[serde(default)]
    pub checkpoint_mode: CheckpointMode,

    /// Start position for shards without a restored cursor
    #[serde(default)]
    pub start_position: StartPosition,

    /// Sleep between pulls that returned nothing
    #[serde(default = "default_fetch_interval_ms")]
    pub fetch_interval_ms: u64,

    /// Maximum log groups per pull
    #[serde(default = "default_max_groups_per_fetch")]
    pub max_groups_per_fetch: u32,

    /// Interval between shard discoveries while running (0 disables)
    #[serde(default = "default_discovery_interval_ms")]
    pub discovery_interval_ms: u64,

    /// Upper bound for one best-effort consumer group push
    #[serde(default = "default_checkpoint_push_timeout_ms")]
    pub checkpoint_push_timeout_ms: u64,

    /// Upper bound for waiting on shard loops during shutdown
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_fetch_interval_ms() -> u64 {
    100
}

fn default_max_groups_per_fetch() -> u32 {
    100
}

fn default_discovery_interval_ms() -> u64 {
    30_000
}

fn default_checkpoint_push_timeout_ms() -> u64 {
    5_000
}

fn default_shutdown_timeout_ms() -> u64 {
    10_000
}

impl ConsumerConfig {
    /// Create a consumer config with defaults
    pub fn new(service: LogServiceConfig) -> Self {
        Self {
            service,
            consumer_group: None,
            checkpoint_mode: CheckpointMode::default(),
            start_position: StartPosition::default(),
            fetch_interval_ms: default_fetch_interval_ms(),
            max_groups_per_fetch: default_max_groups_per_fetch(),
            discovery_interval_ms: default_discovery_interval_ms(),
            checkpoint_push_timeout_ms: default_checkpoint_push_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }

    /// Set the consumer group
    #[must_use]
    pub fn with_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = Some(group.into());
        self
    }

    /// Set the checkpoint mode
    #[must_use]
    pub fn with_checkpoint_mode(mut self, mode: CheckpointMode) -> Self {
        self.checkpoint_mode = mode;
        self
    }

    /// Set the start position
    #[must_use]
    pub fn with_start_position(mut self, position: StartPosition) -> Self {
        self.start_position = position;
        self
    }

    /// Parse from YAML
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML or JSON file (chosen by extension)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = read_config_file(path)?;
        if is_json(path) {
            Self::from_json_str(&contents)
        } else {
            Self::from_yaml_str(&contents)
        }
    }

    /// Build from a flat properties map
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::new(LogServiceConfig::from_properties(props));
        config.consumer_group = props
            .get("consumer_group")
            .filter(|g| !g.trim().is_empty())
            .cloned();
        if let Some(mode) = props.get("checkpoint_mode") {
            config.checkpoint_mode = mode.parse()?;
        }
        if let Some(position) = props.get("start_position") {
            config.start_position = position.parse()?;
        }
        parse_prop(props, "fetch_interval_ms", &mut config.fetch_interval_ms)?;
        parse_prop(props, "max_groups_per_fetch", &mut config.max_groups_per_fetch)?;
        parse_prop(props, "discovery_interval_ms", &mut config.discovery_interval_ms)?;
        parse_prop(
            props,
            "checkpoint_push_timeout_ms",
            &mut config.checkpoint_push_timeout_ms,
        )?;
        parse_prop(props, "shutdown_timeout_ms", &mut config.shutdown_timeout_ms)?;
        config.validate()?;
        Ok(config)
    }

    /// Check required fields and value ranges
    pub fn validate(&self) -> Result<()> {
        self.service.validate()?;
        if let Some(group) = &self.consumer_group {
            require("consumer_group", group)?;
        }
        if self.max_groups_per_fetch == 0 {
            return Err(Error::invalid_value(
                "max_groups_per_fetch",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Project shortcut
    pub fn project(&self) -> &str {
        &self.service.project
    }

    /// Logstore shortcut
    pub fn logstore(&self) -> &str {
        &self.service.logstore
    }

    /// Sleep between empty pulls
    pub fn fetch_interval(&self) -> Duration {
        Duration::from_millis(self.fetch_interval_ms)
    }

    /// Discovery interval, `None` when discovery while running is disabled
    pub fn discovery_interval(&self) -> Option<Duration> {
        (self.discovery_interval_ms > 0).then(|| Duration::from_millis(self.discovery_interval_ms))
    }

    /// Timeout for one consumer group push
    pub fn checkpoint_push_timeout(&self) -> Duration {
        Duration::from_millis(self.checkpoint_push_timeout_ms)
    }

    /// Timeout for stopping shard loops
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

// ============================================================================
// Producer Config
// ============================================================================

/// Producer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Connection settings
    #[serde(flatten)]
    pub service: LogServiceConfig,

    /// Maximum concurrent `put_logs` calls
    #[serde(default = "default_io_thread_count")]
    pub io_thread_count: usize,

    /// Maximum time a batch waits before it is sent
    #[serde(default = "default_package_timeout_ms")]
    pub package_timeout_ms: u64,

    /// Maximum logs per batch
    #[serde(default = "default_logs_per_package")]
    pub logs_per_package: usize,

    /// Maximum bytes per batch
    #[serde(default = "default_bytes_per_package")]
    pub bytes_per_package: usize,

    /// Maximum buffered bytes across all batches
    #[serde(default = "default_memory_pool_bytes")]
    pub memory_pool_bytes: usize,
}

fn default_io_thread_count() -> usize {
    8
}

fn default_package_timeout_ms() -> u64 {
    3_000
}

fn default_logs_per_package() -> usize {
    4096
}

fn default_bytes_per_package() -> usize {
    3 * 1024 * 1024
}

fn default_memory_pool_bytes() -> usize {
    100 * 1024 * 1024
}

impl ProducerConfig {
    /// Create a producer config with defaults
    pub fn new(service: LogServiceConfig) -> Self {
        Self {
            service,
            io_thread_count: default_io_thread_count(),
            package_timeout_ms: default_package_timeout_ms(),
            logs_per_package: default_logs_per_package(),
            bytes_per_package: default_bytes_per_package(),
            memory_pool_bytes: default_memory_pool_bytes(),
        }
    }

    /// Set the package timeout
    #[must_use]
    pub fn with_package_timeout(mut self, timeout: Duration) -> Self {
        self.package_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Parse from YAML
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML or JSON file (chosen by extension)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = read_config_file(path)?;
        if is_json(path) {
            Self::from_json_str(&contents)
        } else {
            Self::from_yaml_str(&contents)
        }
    }

    /// Build from a flat properties map
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::new(LogServiceConfig::from_properties(props));
        parse_prop(props, "io_thread_count", &mut config.io_thread_count)?;
        parse_prop(props, "package_timeout_ms", &mut config.package_timeout_ms)?;
        parse_prop(props, "logs_per_package", &mut config.logs_per_package)?;
        parse_prop(props, "bytes_per_package", &mut config.bytes_per_package)?;
        parse_prop(props, "memory_pool_bytes", &mut config.memory_pool_bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Check required fields and value ranges
    pub fn validate(&self) -> Result<()> {
        self.service.validate()?;
        for (field, value) in [
            ("io_thread_count", self.io_thread_count),
            ("logs_per_package", self.logs_per_package),
            ("bytes_per_package", self.bytes_per_package),
            ("memory_pool_bytes", self.memory_pool_bytes),
        ] {
            if value == 0 {
                return Err(Error::invalid_value(field, "must be at least 1"));
            }
        }
        if self.memory_pool_bytes < self.bytes_per_package {
            return Err(Error::invalid_value(
                "memory_pool_bytes",
                "must not be smaller than bytes_per_package",
            ));
        }
        Ok(())
    }

    /// Package timeout as a duration
    pub fn package_timeout(&self) -> Duration {
        Duration::from_millis(self.package_timeout_ms)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::missing_field(field));
    }
    Ok(())
}

fn parse_prop<T: FromStr>(props: &HashMap<String, String>, key: &str, target: &mut T) -> Result<()> {
    if let Some(raw) = props.get(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| Error::invalid_value(key, format!("'{raw}' is not a valid number")))?;
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("Failed to read config file {}: {e}", path.display())))
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn base_props() -> Vec<(&'static str, &'static str)> {
        vec![
            ("project", "demo"),
            ("logstore", "access-log"),
            ("endpoint", "https://logs.example.com"),
            ("access_key_id", "id"),
            ("access_key_secret", "secret"),
        ]
    }

    #[test]
    fn test_checkpoint_mode_parse() {
        assert_eq!(
            "on_checkpoint".parse::<CheckpointMode>().unwrap(),
            CheckpointMode::OnCheckpoint
        );
        assert_eq!(
            "IMMEDIATE".parse::<CheckpointMode>().unwrap(),
            CheckpointMode::Immediate
        );
        assert!("sometimes".parse::<CheckpointMode>().is_err());
    }

    #[test]
    fn test_start_position_parse() {
        assert_eq!("begin".parse::<StartPosition>().unwrap(), StartPosition::Begin);
        assert_eq!("end".parse::<StartPosition>().unwrap(), StartPosition::End);
        assert_eq!(
            "checkpoint".parse::<StartPosition>().unwrap(),
            StartPosition::Checkpoint
        );
        assert_eq!(
            "1700000000".parse::<StartPosition>().unwrap(),
            StartPosition::Timestamp(1_700_000_000)
        );
        assert!("yesterday".parse::<StartPosition>().is_err());
    }

    #[test]
    fn test_consumer_config_from_yaml() {
        let yaml = r"
project: demo
logstore: access-log
endpoint: https://logs.example.com
access_key_id: id
access_key_secret: secret
consumer_group: etl
checkpoint_mode: immediate
start_position: 1700000000
fetch_interval_ms: 250
";
        let config = ConsumerConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.project(), "demo");
        assert_eq!(config.logstore(), "access-log");
        assert_eq!(config.consumer_group.as_deref(), Some("etl"));
        assert_eq!(config.checkpoint_mode, CheckpointMode::Immediate);
        assert_eq!(config.start_position, StartPosition::Timestamp(1_700_000_000));
        assert_eq!(config.fetch_interval(), Duration::from_millis(250));
        assert_eq!(config.service.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.max_groups_per_fetch, 100);
    }

    #[test]
    fn test_consumer_config_missing_field() {
        let yaml = "project: demo\nendpoint: https://logs.example.com\n";
        let err = ConsumerConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, Error::MissingConfigField { ref field } if field == "logstore"));
    }

    #[test]
    fn test_consumer_config_from_properties() {
        let mut pairs = base_props();
        pairs.push(("checkpoint_mode", "on_checkpoint"));
        pairs.push(("start_position", "end"));
        pairs.push(("discovery_interval_ms", "0"));
        let config = ConsumerConfig::from_properties(&props(&pairs)).unwrap();

        assert!(config.consumer_group.is_none());
        assert_eq!(config.start_position, StartPosition::End);
        assert!(config.discovery_interval().is_none());
    }

    #[test]
    fn test_consumer_config_bad_number() {
        let mut pairs = base_props();
        pairs.push(("fetch_interval_ms", "fast"));
        let err = ConsumerConfig::from_properties(&props(&pairs)).unwrap_err();
        assert!(matches!(err, Error::InvalidConfigValue { ref field, .. } if field == "fetch_interval_ms"));
    }

    #[test]
    fn test_consumer_config_bad_endpoint() {
        let mut config = ConsumerConfig::new(
            LogServiceConfig::new("demo", "logs", "logs.example.com").with_credentials("a", "b"),
        );
        assert!(config.validate().is_err());

        config.service.endpoint = "http://logs.example.com".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_producer_config_defaults() {
        let config = ProducerConfig::from_properties(&props(&base_props())).unwrap();

        assert_eq!(config.io_thread_count, 8);
        assert_eq!(config.package_timeout(), Duration::from_secs(3));
        assert_eq!(config.logs_per_package, 4096);
        assert_eq!(config.bytes_per_package, 3 * 1024 * 1024);
    }

    #[test]
    fn test_producer_config_validation() {
        let mut pairs = base_props();
        pairs.push(("io_thread_count", "0"));
        assert!(ProducerConfig::from_properties(&props(&pairs)).is_err());

        let mut pairs = base_props();
        pairs.push(("memory_pool_bytes", "10"));
        pairs.push(("bytes_per_package", "100"));
        assert!(ProducerConfig::from_properties(&props(&pairs)).is_err());
    }

    #[test]
    fn test_producer_config_from_json() {
        let json = r#"{
            "project": "demo",
            "logstore": "out",
            "endpoint": "https://logs.example.com",
            "access_key_id": "id",
            "access_key_secret": "secret",
            "package_timeout_ms": 500
        }"#;
        let config = ProducerConfig::from_json_str(json).unwrap();
        assert_eq!(config.package_timeout(), Duration::from_millis(500));
    }
}
