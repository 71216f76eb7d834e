//! Prometheus metrics for metric-attributor
//!
//! This module provides the `MetricsSink` interface the processing pipeline
//! reports into, and its Prometheus-backed implementation tracking:
//! - Records processed, parse errors, unmatched and bad metrics
//! - Attributed metric paths by application name and type
//! - Latest metric timestamp seen
//! - Per-partition consumption, time lag and offset lag (dropped on revocation)
//! - Transport statistics snapshots
//!
//! Metrics are exposed via the metrics endpoint in Prometheus text format.
//! Every `Metrics` owns its own registry, so tests never share state.

use crate::classifier::ClassificationResult;
use prometheus::{
    Encoder, Gauge, GaugeVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Receiver of classification outcomes and error signals
///
/// Implementations must tolerate concurrent calls from several tasks.
pub trait MetricsSink: Send + Sync {
    /// A record was delivered, before any parsing
    fn record_processed(&self);

    /// A record payload could not be parsed
    fn record_parse_error(&self);

    /// No rule matched a metric path
    fn record_no_rule_matched(&self);

    /// The matched rule's position was beyond the path's components
    fn record_bad_metric(&self);

    /// Final classification of a parsed record (sentinel results included)
    fn record_classification(&self, result: &ClassificationResult);

    /// Timestamp carried by the latest parsed record
    fn record_latest_timestamp(&self, timestamp: u64);

    /// A record was delivered from `partition`, stamped by the broker at `timestamp_ms`
    fn record_partition_delivery(&self, partition: i32, timestamp_ms: Option<i64>);

    /// Records left between the latest delivery and the head of `partition`
    fn record_offset_lag(&self, partition: i32, lag: i64);

    /// `partition` is no longer claimed by this consumer
    fn record_partition_revoked(&self, partition: i32);
}

/// Metrics collector for metric-attributor
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    processed: IntCounter,
    parse_errors: IntCounter,
    no_rule_matched: IntCounter,
    bad_metrics: IntCounter,
    metric_paths: IntCounterVec,
    latest_timestamp: Gauge,
    partition_messages: IntCounterVec,
    partition_time_lag: GaugeVec,
    partition_offset_lag: GaugeVec,
    transport_stats: GaugeVec,
    clock_errors: IntCounter,
}

impl Metrics {
    /// Create a new Metrics instance
    ///
    /// Registers all metrics with a new Prometheus registry.
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let processed = IntCounter::with_opts(Opts::new(
            "metrics_processed_total",
            "The total number of records consumed, before parsing",
        ))?;

        let parse_errors = IntCounter::with_opts(Opts::new(
            "metrics_error_total",
            "The total number of bad parsed metrics paths",
        ))?;

        let no_rule_matched = IntCounter::with_opts(Opts::new(
            "metric_path_did_not_match_rules_total",
            "The total number of metrics paths that did not match any rule",
        ))?;

        let bad_metrics = IntCounter::with_opts(Opts::new(
            "metric_path_bad_position_total",
            "The total number of metrics paths too short for the application name position of their rule",
        ))?;

        // Cardinality is bounded by the truncated paths: one series per
        // distinct (first N components, application, type).
        let metric_paths = IntCounterVec::new(
            Opts::new(
                "metrics_path_total",
                "The total number of metrics paths events",
            ),
            &["metric_path", "application", "application_type"],
        )?;

        let latest_timestamp = Gauge::with_opts(Opts::new(
            "metric_latest_timestamp",
            "Timestamp of the latest parsed metric, in seconds since the UNIX epoch",
        ))?;

        let partition_messages = IntCounterVec::new(
            Opts::new("messages_total", "number of message consumed")
                .namespace("kafka")
                .subsystem("consumer"),
            &["partition"],
        )?;

        let partition_time_lag = GaugeVec::new(
            Opts::new("time_lag_seconds", "consumer time lag in seconds")
                .namespace("kafka")
                .subsystem("consumer"),
            &["partition"],
        )?;

        let partition_offset_lag = GaugeVec::new(
            Opts::new("offset_lag", "consumer offset lag")
                .namespace("kafka")
                .subsystem("consumer"),
            &["partition"],
        )?;

        let transport_stats = GaugeVec::new(
            Opts::new(
                "transport",
                "Latest statistics reported by the Kafka client, by statistic name",
            )
            .namespace("kafka")
            .subsystem("consumer"),
            &["stat"],
        )?;

        // Tracks when the system clock appears to be before UNIX epoch; time
        // lag cannot be computed in that case.
        let clock_errors = IntCounter::with_opts(Opts::new(
            "clock_errors_total",
            "Total number of system clock errors detected (clock before UNIX epoch).",
        ))?;

        registry.register(Box::new(processed.clone()))?;
        registry.register(Box::new(parse_errors.clone()))?;
        registry.register(Box::new(no_rule_matched.clone()))?;
        registry.register(Box::new(bad_metrics.clone()))?;
        registry.register(Box::new(metric_paths.clone()))?;
        registry.register(Box::new(latest_timestamp.clone()))?;
        registry.register(Box::new(partition_messages.clone()))?;
        registry.register(Box::new(partition_time_lag.clone()))?;
        registry.register(Box::new(partition_offset_lag.clone()))?;
        registry.register(Box::new(transport_stats.clone()))?;
        registry.register(Box::new(clock_errors.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            processed,
            parse_errors,
            no_rule_matched,
            bad_metrics,
            metric_paths,
            latest_timestamp,
            partition_messages,
            partition_time_lag,
            partition_offset_lag,
            transport_stats,
            clock_errors,
        })
    }

    /// Mirror a transport statistics snapshot into gauges
    pub fn observe_transport(&self, stats: &BTreeMap<String, f64>) {
        for (name, value) in stats {
            if !value.is_finite() {
                tracing::debug!(stat = %name, value, "Skipping non-finite transport statistic");
                continue;
            }
            self.transport_stats.with_label_values(&[name.as_str()]).set(*value);
        }
    }

    pub fn processed_count(&self) -> u64 {
        self.processed.get()
    }

    pub fn parse_errors_count(&self) -> u64 {
        self.parse_errors.get()
    }

    pub fn no_rule_matched_count(&self) -> u64 {
        self.no_rule_matched.get()
    }

    pub fn bad_metric_count(&self) -> u64 {
        self.bad_metrics.get()
    }

    pub fn clock_errors_count(&self) -> u64 {
        self.clock_errors.get()
    }

    pub fn latest_timestamp(&self) -> f64 {
        self.latest_timestamp.get()
    }

    /// Count of records attributed to this (path, application, type) triple
    pub fn path_count(&self, result: &ClassificationResult) -> u64 {
        self.metric_paths
            .with_label_values(&[
                result.extracted_metric.as_str(),
                result.application_name.as_str(),
                result.application_type.as_str(),
            ])
            .get()
    }

    /// Count of records consumed from `partition`
    pub fn partition_count(&self, partition: i32) -> u64 {
        self.partition_messages
            .with_label_values(&[partition.to_string().as_str()])
            .get()
    }

    /// Gather all metrics and encode them in Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns an error if metric encoding fails.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let metric_count = metric_families.len();

        tracing::debug!(
            metric_family_count = metric_count,
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        encoder.encode(&metric_families, &mut buffer).map_err(|e| {
            tracing::error!(
                error = %e,
                metric_family_count = metric_count,
                "Prometheus text encoder failed"
            );
            prometheus::Error::Msg(format!(
                "Failed to encode {} metric families: {}",
                metric_count, e
            ))
        })?;

        String::from_utf8(buffer).map_err(|e| {
            let valid_up_to = e.utf8_error().valid_up_to();
            tracing::error!(
                invalid_byte_index = valid_up_to,
                "Prometheus encoder produced invalid UTF-8"
            );
            prometheus::Error::Msg(format!(
                "Failed to convert metrics to UTF-8 at byte {}: {}. \
                This indicates corrupted metric names or labels.",
                valid_up_to, e
            ))
        })
    }
}

impl MetricsSink for Metrics {
    fn record_processed(&self) {
        self.processed.inc();
    }

    fn record_parse_error(&self) {
        self.parse_errors.inc();
    }

    fn record_no_rule_matched(&self) {
        self.no_rule_matched.inc();
    }

    fn record_bad_metric(&self) {
        self.bad_metrics.inc();
    }

    fn record_classification(&self, result: &ClassificationResult) {
        self.metric_paths
            .with_label_values(&[
                result.extracted_metric.as_str(),
                result.application_name.as_str(),
                result.application_type.as_str(),
            ])
            .inc();
    }

    fn record_latest_timestamp(&self, timestamp: u64) {
        self.latest_timestamp.set(timestamp as f64);
    }

    fn record_partition_delivery(&self, partition: i32, timestamp_ms: Option<i64>) {
        let partition_label = partition.to_string();
        self.partition_messages
            .with_label_values(&[partition_label.as_str()])
            .inc();

        let Some(timestamp_ms) = timestamp_ms else {
            return;
        };

        let now_ms = match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_millis() as i64,
            Err(e) => {
                self.clock_errors.inc();
                tracing::error!(
                    error = %e,
                    "System clock is before UNIX epoch, skipping time lag"
                );
                return;
            }
        };

        let lag_seconds = (now_ms - timestamp_ms) as f64 / 1000.0;
        self.partition_time_lag
            .with_label_values(&[partition_label.as_str()])
            .set(lag_seconds);
    }

    fn record_offset_lag(&self, partition: i32, lag: i64) {
        self.partition_offset_lag
            .with_label_values(&[partition.to_string().as_str()])
            .set(lag as f64);
    }

    fn record_partition_revoked(&self, partition: i32) {
        let partition_label = partition.to_string();
        let labels = [partition_label.as_str()];

        // A series only exists once the partition delivered a matching sample
        let removed = [
            self.partition_messages.remove_label_values(&labels).is_ok(),
            self.partition_time_lag.remove_label_values(&labels).is_ok(),
            self.partition_offset_lag.remove_label_values(&labels).is_ok(),
        ];
        tracing::debug!(
            partition,
            series_removed = removed.iter().filter(|removed| **removed).count(),
            "Dropped partition metrics"
        );
    }
}
