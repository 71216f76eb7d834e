//! Configuration management for metric-attributor
//!
//! Parses TOML configuration files, applies command-line overrides and
//! provides typed access to settings.

use crate::cli::Cli;
use crate::error::{AppError, AppResult};
use crate::record::RecordShape;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Log connection settings
///
/// `group` and `topic` have no usable default and must be provided.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub initial_offset: InitialOffset,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    /// How often the client publishes transport statistics, 0 disables them
    #[serde(default = "default_statistics_interval_ms")]
    pub statistics_interval_ms: u64,
    /// Bound on the startup connectivity check
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            group: String::new(),
            topic: String::new(),
            initial_offset: InitialOffset::default(),
            session_timeout_ms: default_session_timeout_ms(),
            statistics_interval_ms: default_statistics_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

fn default_brokers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

fn default_session_timeout_ms() -> u64 {
    6000
}

fn default_statistics_interval_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

/// Where a consumer group without a committed position starts reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InitialOffset {
    #[default]
    Oldest,
    Newest,
}

impl InitialOffset {
    /// Value of the client's `auto.offset.reset` property
    pub fn as_auto_offset_reset(&self) -> &'static str {
        match self {
            Self::Oldest => "earliest",
            Self::Newest => "latest",
        }
    }
}

/// Classification settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionConfig {
    /// Number of leading path components kept in the extracted metric
    #[serde(default = "default_components")]
    pub components: usize,
    #[serde(default = "default_rules_path")]
    pub rules_path: PathBuf,
    /// Consult record headers for `use_tags` rules
    #[serde(default = "default_true")]
    pub use_tags: bool,
    /// Expect a trailing timestamp in every payload
    #[serde(default = "default_true")]
    pub parse_timestamp: bool,
}

impl ExtractionConfig {
    pub fn record_shape(&self) -> RecordShape {
        RecordShape {
            timestamp: self.parse_timestamp,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            components: default_components(),
            rules_path: default_rules_path(),
            use_tags: true,
            parse_timestamp: true,
        }
    }
}

fn default_components() -> usize {
    3
}

fn default_rules_path() -> PathBuf {
    PathBuf::from("configs/rules.json")
}

fn default_true() -> bool {
    true
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path of the Prometheus exposition endpoint
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            metrics_path: default_metrics_path(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();
        let config = Self::read(path.as_ref())?;

        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Build configuration from the command line
    ///
    /// Starts from `--config` when given (defaults otherwise), then applies
    /// every flag that was set. The result is validated once, after merging,
    /// so a file may leave out values supplied on the command line.
    pub fn from_cli(cli: &Cli) -> AppResult<Self> {
        let (mut config, source) = match &cli.config {
            Some(path) => (Self::read(Path::new(path))?, path.clone()),
            None => (Self::default(), "<command line>".to_string()),
        };

        if let Some(brokers) = &cli.brokers {
            config.kafka.brokers = brokers.clone();
        }
        if let Some(group) = &cli.group {
            config.kafka.group = group.clone();
        }
        if let Some(topic) = &cli.topic {
            config.kafka.topic = topic.clone();
        }
        if let Some(initial_offset) = cli.initial_offset {
            config.kafka.initial_offset = initial_offset;
        }
        if let Some(components) = cli.components {
            config.extraction.components = components;
        }
        if let Some(rules) = &cli.rules {
            config.extraction.rules_path = rules.clone();
        }
        if cli.no_tags {
            config.extraction.use_tags = false;
        }
        if cli.no_timestamp {
            config.extraction.parse_timestamp = false;
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }
        if let Some(endpoint) = &cli.endpoint {
            config.server.metrics_path = endpoint.clone();
        }
        if let Some(log_level) = &cli.log_level {
            config.observability.log_level = log_level.clone();
        }

        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: source,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    fn read(path: &Path) -> AppResult<Self> {
        let path_display = path.display().to_string();

        let content =
            std::fs::read_to_string(path).map_err(|source| AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            })?;

        toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
            path: path_display,
            source,
        })
    }

    /// Validate configuration after parsing
    ///
    /// Called by `from_file()` and `from_cli()`; call it explicitly when
    /// constructing a `Config` by hand.
    pub fn validate(&self) -> AppResult<()> {
        if self.kafka.brokers.is_empty() {
            return Err(AppError::Config(
                "kafka.brokers must list at least one broker".to_string(),
            ));
        }
        if let Some(index) = self.kafka.brokers.iter().position(|b| b.trim().is_empty()) {
            return Err(AppError::Config(format!(
                "kafka.brokers entry {} is empty",
                index
            )));
        }
        if self.kafka.group.is_empty() {
            return Err(AppError::Config(
                "kafka.group is required (consumer group name)".to_string(),
            ));
        }
        if self.kafka.topic.is_empty() {
            return Err(AppError::Config(
                "kafka.topic is required (can not consume an empty topic)".to_string(),
            ));
        }

        if self.extraction.components == 0 {
            return Err(AppError::Config(
                "extraction.components must be greater than 0".to_string(),
            ));
        }

        // "/" serves the status document
        let metrics_path = &self.server.metrics_path;
        if !metrics_path.starts_with('/') || metrics_path == "/" {
            return Err(AppError::Config(format!(
                "server.metrics_path '{}' must start with '/' and must not be '/'",
                metrics_path
            )));
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    const TEST_CONFIG: &str = r#"
[kafka]
brokers = ["kafka-1:9092", "kafka-2:9092"]
group = "metric-attributor"
topic = "graphite-metrics"
initial_offset = "newest"

[extraction]
components = 4
rules_path = "/etc/metric-attributor/rules.json"
use_tags = false

[server]
port = 9100
metrics_path = "/prometheus"

[observability]
log_level = "debug"
"#;

    #[test]
    fn test_config_from_str_parses_successfully() {
        let config = Config::from_str(TEST_CONFIG).expect("should parse config");
        assert_eq!(config.kafka.brokers, vec!["kafka-1:9092", "kafka-2:9092"]);
        assert_eq!(config.kafka.group, "metric-attributor");
        assert_eq!(config.kafka.topic, "graphite-metrics");
        assert_eq!(config.kafka.initial_offset, InitialOffset::Newest);
        assert_eq!(config.extraction.components, 4);
        assert!(!config.extraction.use_tags);
        assert!(config.extraction.parse_timestamp);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.metrics_path, "/prometheus");
        assert_eq!(config.observability.log_level, "debug");
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_str(
            r#"
[kafka]
group = "g"
topic = "t"
"#,
        )
        .expect("should parse config");
        assert_eq!(config.kafka.brokers, vec!["localhost:9092"]);
        assert_eq!(config.kafka.initial_offset, InitialOffset::Oldest);
        assert_eq!(config.kafka.session_timeout_ms, 6000);
        assert_eq!(config.kafka.statistics_interval_ms, 5000);
        assert_eq!(config.extraction.components, 3);
        assert_eq!(
            config.extraction.rules_path,
            PathBuf::from("configs/rules.json")
        );
        assert!(config.extraction.use_tags);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.metrics_path, "/metrics");
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_config_validation_missing_topic_fails() {
        let result = Config::from_str("[kafka]\ngroup = \"g\"\n");
        let err = result.expect_err("topic is required");
        assert!(err.to_string().contains("kafka.topic"));
    }

    #[test]
    fn test_config_validation_missing_group_fails() {
        let result = Config::from_str("[kafka]\ntopic = \"t\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_config_validation_empty_brokers_fails() {
        let result = Config::from_str("[kafka]\nbrokers = []\ngroup = \"g\"\ntopic = \"t\"\n");
        assert!(result.is_err());

        let result =
            Config::from_str("[kafka]\nbrokers = [\"a:9092\", \" \"]\ngroup = \"g\"\ntopic = \"t\"\n");
        let err = result.expect_err("blank broker entry");
        assert!(err.to_string().contains("entry 1"));
    }

    #[test]
    fn test_config_validation_zero_components_fails() {
        let mut config = Config::from_str(TEST_CONFIG).expect("should parse config");
        config.extraction.components = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_accepts_disabled_statistics() {
        let mut config = Config::from_str(TEST_CONFIG).expect("should parse config");
        config.kafka.statistics_interval_ms = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_metrics_path() {
        let mut config = Config::from_str(TEST_CONFIG).expect("should parse config");

        config.server.metrics_path = "/".to_string();
        assert!(config.validate().is_err());

        config.server.metrics_path = "metrics".to_string();
        assert!(config.validate().is_err());

        config.server.metrics_path = "/metrics".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_unknown_initial_offset() {
        let result = Config::from_str("[kafka]\ngroup = \"g\"\ntopic = \"t\"\ninitial_offset = \"middle\"\n");
        assert!(matches!(result, Err(AppError::ConfigParseFailed { .. })));
    }

    #[test]
    fn test_initial_offset_maps_to_auto_offset_reset() {
        assert_eq!(InitialOffset::Oldest.as_auto_offset_reset(), "earliest");
        assert_eq!(InitialOffset::Newest.as_auto_offset_reset(), "latest");
    }

    #[test]
    fn test_record_shape_follows_parse_timestamp() {
        let mut extraction = ExtractionConfig::default();
        assert!(extraction.record_shape().timestamp);
        extraction.parse_timestamp = false;
        assert!(!extraction.record_shape().timestamp);
    }

    #[test]
    fn test_from_cli_without_file() {
        let cli = Cli::parse_from([
            "metric-attributor",
            "--brokers",
            "a:9092,b:9092",
            "--group",
            "g",
            "--topic",
            "t",
            "--initial-offset",
            "newest",
            "--components",
            "2",
            "--endpoint",
            "/prom",
            "--no-tags",
        ]);

        let config = Config::from_cli(&cli).expect("should build config");
        assert_eq!(config.kafka.brokers, vec!["a:9092", "b:9092"]);
        assert_eq!(config.kafka.initial_offset, InitialOffset::Newest);
        assert_eq!(config.extraction.components, 2);
        assert_eq!(config.server.metrics_path, "/prom");
        assert!(!config.extraction.use_tags);
        assert!(config.extraction.parse_timestamp);
    }

    #[test]
    fn test_from_cli_requires_topic() {
        let cli = Cli::parse_from(["metric-attributor", "--group", "g"]);
        let err = Config::from_cli(&cli).expect_err("topic missing");
        assert!(matches!(err, AppError::ConfigValidationFailed { ref path, .. } if path == "<command line>"));
    }
}
