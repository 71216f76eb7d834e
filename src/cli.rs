//! Command-line interface for metric-attributor
//!
//! Every setting flag is optional and overrides the matching value from
//! `--config` (or the built-in default).

use crate::config::InitialOffset;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Attribute Graphite metric paths from a Kafka topic to applications
#[derive(Parser, Debug)]
#[command(name = "metric-attributor")]
#[command(version)]
#[command(about = "Attribute Graphite metric paths from a Kafka topic to applications")]
#[command(
    long_about = "metric-attributor consumes Graphite plaintext records from a Kafka topic, \
    classifies every metric path against an ordered rule list and exposes per-application \
    counters in Prometheus format."
)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Kafka bootstrap brokers, comma separated
    #[arg(long, value_delimiter = ',')]
    pub brokers: Option<Vec<String>>,

    /// Consumer group name
    #[arg(long)]
    pub group: Option<String>,

    /// Topic to consume
    #[arg(long)]
    pub topic: Option<String>,

    /// Where to start when the group has no committed position
    #[arg(long, value_enum)]
    pub initial_offset: Option<InitialOffset>,

    /// Number of leading path components kept in the extracted metric
    #[arg(long)]
    pub components: Option<usize>,

    /// HTTP port
    #[arg(long)]
    pub port: Option<u16>,

    /// Path of the Prometheus endpoint
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Rule file (JSON)
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long)]
    pub log_level: Option<String>,

    /// Ignore record headers when matching rules
    #[arg(long)]
    pub no_tags: bool,

    /// Payloads carry no trailing timestamp
    #[arg(long)]
    pub no_timestamp: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# metric-attributor configuration
# ================================
#
# Every value can be overridden on the command line (see --help).

# ─────────────────────────────────────────────────────────────────────────────
# KAFKA
# ─────────────────────────────────────────────────────────────────────────────

[kafka]
# Bootstrap brokers
brokers = ["localhost:9092"]

# Consumer group name (required)
group = "metric-attributor"

# Topic carrying Graphite plaintext records (required)
topic = "graphite-metrics"

# Where to start when the group has no committed position: "oldest" or "newest"
initial_offset = "oldest"

session_timeout_ms = 6000

# Interval of the transport statistics shown on / and in kafka_consumer_transport
# (0 disables them; brokers then stay as seen at startup)
statistics_interval_ms = 5000

# Bound on the startup connectivity check
connect_timeout_ms = 10000

# ─────────────────────────────────────────────────────────────────────────────
# EXTRACTION
# ─────────────────────────────────────────────────────────────────────────────

[extraction]
# Number of leading dot-separated path components kept in the extracted metric
components = 3

# Ordered rule list (JSON); the first matching rule wins
rules_path = "configs/rules.json"

# Match use_tags rules against record headers
use_tags = true

# Payloads are "path value timestamp"; set to false for "path value"
parse_timestamp = true

# ─────────────────────────────────────────────────────────────────────────────
# SERVER
# ─────────────────────────────────────────────────────────────────────────────

[server]
host = "0.0.0.0"
port = 8080

# Prometheus exposition path; "/" always serves the consumer status document
metrics_path = "/metrics"

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error" (RUST_LOG takes precedence)
log_level = "info"
"#
}
