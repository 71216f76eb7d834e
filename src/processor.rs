//! Per-record processing: parse, classify, report
//!
//! `RecordProcessor` is called synchronously by the claim loop for every
//! delivered record. It never fails the stream: parse errors are counted and
//! returned to the caller, who still acknowledges the record.

use crate::classifier::{ClassificationResult, PathClassifier};
use crate::error::ParseError;
use crate::metrics::MetricsSink;
use crate::record::{MetricRecord, Record, RecordShape};
use std::sync::Arc;

/// Drives `MetricRecord` parsing and `PathClassifier` for delivered records
#[derive(Clone)]
pub struct RecordProcessor {
    classifier: PathClassifier,
    shape: RecordShape,
    sink: Arc<dyn MetricsSink>,
}

impl RecordProcessor {
    pub fn new(classifier: PathClassifier, shape: RecordShape, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            classifier,
            shape,
            sink,
        }
    }

    /// Process one delivered record
    ///
    /// # Errors
    ///
    /// Returns the `ParseError` of a malformed payload after counting it. The
    /// record is considered handled either way.
    pub fn process(&self, record: &Record) -> Result<ClassificationResult, ParseError> {
        self.sink.record_processed();
        self.sink
            .record_partition_delivery(record.partition, record.timestamp_ms);
        if let Some(lag) = record.offset_lag() {
            self.sink.record_offset_lag(record.partition, lag);
        }

        let metric = match MetricRecord::from_record(record, self.shape) {
            Ok(metric) => metric,
            Err(e) => {
                self.sink.record_parse_error();
                tracing::warn!(
                    error = %e,
                    partition = record.partition,
                    offset = record.offset,
                    payload = %String::from_utf8_lossy(&record.payload),
                    "Failed to parse metric record"
                );
                return Err(e);
            }
        };

        let result = self
            .classifier
            .classify(&metric.path, &metric.tags, self.sink.as_ref());

        tracing::debug!(
            metric_path = %metric.path,
            extracted_metric = %result.extracted_metric,
            application = %result.application_name,
            application_type = %result.application_type,
            "Classified metric"
        );

        if let Some(timestamp) = metric.timestamp {
            self.sink.record_latest_timestamp(timestamp);
        }
        self.sink.record_classification(&result);

        Ok(result)
    }

    /// Forget per-partition state of partitions this consumer lost
    pub fn partitions_revoked(&self, partitions: &[i32]) {
        for &partition in partitions {
            self.sink.record_partition_revoked(partition);
        }
        if !partitions.is_empty() {
            tracing::info!(partitions = ?partitions, "Partitions revoked");
        }
    }
}
