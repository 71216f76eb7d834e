//! metric-attributor - attribute Graphite metric paths to applications
//!
//! Consumes Graphite plaintext records from a Kafka topic, classifies each
//! metric path against an ordered rule list (first match wins) and counts the
//! attributed `(metric path, application name, application type)` triples in
//! Prometheus metrics.

pub mod classifier;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod processor;
pub mod record;
pub mod rules;
pub mod telemetry;
