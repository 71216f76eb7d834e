//! Integration tests for the consumer lifecycle
//!
//! Runs the claim loop against an in-process log and checks processing,
//! marking, status reporting and shutdown ordering.

use metric_attributor::classifier::{ClassificationResult, PathClassifier};
use metric_attributor::consumer::{
    BrokerStatus, ConsumerState, LogClient, MemoryLog, StopReason, StreamConsumer,
};
use metric_attributor::error::{ConsumerError, TransportError};
use metric_attributor::metrics::Metrics;
use metric_attributor::processor::RecordProcessor;
use metric_attributor::record::{Record, RecordShape};
use metric_attributor::rules::RuleSet;
use std::sync::Arc;
use std::time::Duration;

const RULES: &[u8] = include_bytes!("../configs/rules.json");

fn processor(metrics: Arc<Metrics>) -> Arc<RecordProcessor> {
    let rules = RuleSet::from_json(RULES).expect("bundled rules are valid");
    Arc::new(RecordProcessor::new(
        PathClassifier::new(rules, 3),
        RecordShape::default(),
        metrics,
    ))
}

async fn wait_for_marks(log: &MemoryLog, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while log.marked().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("records should be marked in time");
}

fn result(metric: &str, name: &str, kind: &str) -> ClassificationResult {
    ClassificationResult {
        extracted_metric: metric.to_string(),
        application_name: name.to_string(),
        application_type: kind.to_string(),
    }
}

#[tokio::test]
async fn test_records_are_classified_and_marked_in_order() {
    let log = Arc::new(MemoryLog::new());
    let metrics = Arc::new(Metrics::new().expect("metrics"));
    let mut consumer = StreamConsumer::new(log.clone(), "graphite").expect("consumer");

    log.push(Record::new("graphite", 0, 100, "foo.aggreg.cas.value 3.2 1498887"));
    log.push(
        Record::new("graphite", 0, 101, "some.random.path.here 1 1498888")
            .with_header("appname", "billing"),
    );
    log.push(Record::new("graphite", 1, 7, "prometheus.bar.baz.qux 1 1498889"));
    log.push(Record::new("graphite", 1, 8, "foo.aggreg 1 1498890"));
    log.push(Record::new("graphite", 1, 9, "not-a-metric"));

    consumer.run(processor(metrics.clone())).expect("run");
    wait_for_marks(&log, 5).await;

    assert_eq!(
        log.marked(),
        vec![(0, 100), (0, 101), (1, 7), (1, 8), (1, 9)]
    );
    assert_eq!(metrics.processed_count(), 5);
    assert_eq!(metrics.parse_errors_count(), 1);
    assert_eq!(metrics.bad_metric_count(), 1);
    assert_eq!(
        metrics.path_count(&result("foo.aggreg.cas", "cas", "aggreg")),
        1
    );
    assert_eq!(
        metrics.path_count(&result("some.random.path", "billing", "tagged")),
        1
    );
    assert_eq!(
        metrics.path_count(&result("prometheus.bar.baz", "bar", "legacy-bar")),
        1
    );
    assert_eq!(metrics.path_count(&ClassificationResult::none()), 1);
    assert_eq!(metrics.partition_count(0), 2);
    assert_eq!(metrics.partition_count(1), 3);
    assert_eq!(metrics.latest_timestamp(), 1_498_890.0);

    consumer.close().await.expect("close");
    assert_eq!(consumer.state(), ConsumerState::Closed);
}

#[tokio::test]
async fn test_status_is_available_while_consuming() {
    let log = Arc::new(MemoryLog::new().with_brokers(vec![
        BrokerStatus {
            id: 1,
            address: "kafka-1:9092".to_string(),
            rack: None,
            connected: true,
            connection_error: None,
        },
        BrokerStatus {
            id: 2,
            address: "kafka-2:9092".to_string(),
            rack: None,
            connected: false,
            connection_error: Some("connection refused".to_string()),
        },
    ]));
    let metrics = Arc::new(Metrics::new().expect("metrics"));
    let mut consumer = StreamConsumer::new(log.clone(), "graphite").expect("consumer");
    let status = consumer.status_handle();

    consumer.run(processor(metrics)).expect("run");

    let snapshot = status.status();
    assert_eq!(snapshot.brokers.len(), 2);
    assert!(!snapshot.closed);
    assert_eq!(
        snapshot.brokers[1].connection_error.as_deref(),
        Some("connection refused")
    );

    consumer.close().await.expect("close");
    assert!(status.status().closed);
}

#[tokio::test]
async fn test_cancellation_token_stops_consumer() {
    let log = Arc::new(MemoryLog::new());
    let metrics = Arc::new(Metrics::new().expect("metrics"));
    let mut consumer = StreamConsumer::new(log.clone(), "graphite").expect("consumer");
    let token = consumer.cancellation_token();

    consumer.run(processor(metrics)).expect("run");
    log.push(Record::new("graphite", 0, 1, "a.b.c 1 2"));
    wait_for_marks(&log, 1).await;

    token.cancel();
    assert!(matches!(consumer.wait().await, StopReason::Cancelled));

    consumer.close().await.expect("close after cancellation");
    assert!(log.is_closed());

    // Nothing is consumed after close
    log.push(Record::new("graphite", 0, 2, "a.b.c 1 2"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(log.marked(), vec![(0, 1)]);
}

#[tokio::test]
async fn test_fatal_transport_error_stops_claim_loop() {
    let log = Arc::new(MemoryLog::new());
    let metrics = Arc::new(Metrics::new().expect("metrics"));
    let mut consumer = StreamConsumer::new(log.clone(), "graphite").expect("consumer");

    log.push(Record::new("graphite", 0, 1, "a.b.c 1 2"));
    log.push_error(TransportError::Receive("all brokers down".to_string()));
    log.push(Record::new("graphite", 0, 2, "a.b.c 1 2"));

    consumer.run(processor(metrics)).expect("run");
    match consumer.wait().await {
        StopReason::Failed(ConsumerError::Transport(TransportError::Receive(reason))) => {
            assert_eq!(reason, "all brokers down");
        }
        other => panic!("Expected transport failure, got {:?}", other),
    }
    assert_eq!(log.marked(), vec![(0, 1)]);

    consumer.close().await.expect("close");
    assert!(matches!(
        consumer.close().await,
        Err(ConsumerError::AlreadyClosed)
    ));
}

#[tokio::test]
async fn test_client_close_failure_is_reported() {
    let log = Arc::new(MemoryLog::new());
    let metrics = Arc::new(Metrics::new().expect("metrics"));
    let mut consumer = StreamConsumer::new(log.clone(), "graphite").expect("consumer");

    consumer.run(processor(metrics)).expect("run");
    // Client released behind the consumer's back
    log.close().expect("first client close");

    assert!(matches!(
        consumer.close().await,
        Err(ConsumerError::Transport(TransportError::AlreadyClosed))
    ));
    assert_eq!(consumer.state(), ConsumerState::Draining);
}
