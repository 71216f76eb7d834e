//! Streaming consumption from the distributed log
//!
//! `StreamConsumer` owns a `LogClient` and runs the claim loop on a background
//! task: every delivered record is processed synchronously by a
//! `RecordProcessor` and then marked, so a record is only acknowledged once its
//! classification attempt has completed (at-least-once).
//!
//! # Lifecycle
//!
//! ```text
//! Connected --run()--> Consuming --close()--> Draining --> Closed
//! ```
//!
//! Connecting (the `Created -> Connected` step) is done by the `LogClient`
//! implementation, e.g. `KafkaClient::connect`. Shutdown is cooperative: the
//! shared `CancellationToken` is the only way to stop the claim loop, and
//! `close()` waits for the loop task to finish before releasing the client.

pub mod kafka;
pub mod memory;
pub mod status;

pub use kafka::KafkaClient;
pub use memory::MemoryLog;
pub use status::{BrokerStatus, ConsumerStatus, StatusHandle};

use crate::error::{ConsumerError, TransportError};
use crate::processor::RecordProcessor;
use crate::record::Record;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What the log handed over on a receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Record(Record),
    /// Partition assignment changed; the current claim is over
    Rebalanced {
        /// Partitions this consumer no longer owns
        revoked: Vec<i32>,
    },
}

/// Connection to a partitioned log, as seen by the claim loop
///
/// `recv` is only called from the claim loop task; `close` only after that
/// task has finished.
#[async_trait]
pub trait LogClient: Send + Sync {
    /// Wait for the next record or the end of the current claim
    async fn recv(&self) -> Result<Delivery, TransportError>;

    /// Acknowledge a processed record, advancing its partition's committed position
    fn mark(&self, record: &Record) -> Result<(), TransportError>;

    /// Non-blocking status snapshot
    fn status(&self) -> ConsumerStatus;

    /// Release the connection
    ///
    /// Closing twice returns `TransportError::AlreadyClosed`.
    fn close(&self) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Connected,
    Consuming,
    Draining,
    Closed,
}

impl ConsumerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Consuming => "consuming",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

/// Why `StreamConsumer::wait` returned
#[derive(Debug)]
pub enum StopReason {
    /// The cancellation token fired (stop request or termination signal)
    Cancelled,
    /// The claim loop returned on its own without error
    LoopEnded,
    /// The claim loop hit a fatal error
    Failed(ConsumerError),
}

/// How a single claim ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimEnd {
    Rebalanced,
    Cancelled,
}

pub struct StreamConsumer {
    client: Arc<dyn LogClient>,
    topic: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<(), ConsumerError>>>,
    state: ConsumerState,
}

impl StreamConsumer {
    /// Wrap a connected client
    ///
    /// # Errors
    ///
    /// Returns `ConsumerError::EmptyTopic` if `topic` is empty.
    pub fn new(client: Arc<dyn LogClient>, topic: &str) -> Result<Self, ConsumerError> {
        if topic.is_empty() {
            return Err(ConsumerError::EmptyTopic);
        }

        Ok(Self {
            client,
            topic: topic.to_string(),
            cancel: CancellationToken::new(),
            task: None,
            state: ConsumerState::Connected,
        })
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Token cancelling the claim loop; clone it to wire up signal handling
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn status(&self) -> ConsumerStatus {
        self.client.status()
    }

    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle::new(Arc::clone(&self.client))
    }

    /// Start the claim loop on a background task
    ///
    /// # Errors
    ///
    /// Returns `ConsumerError::InvalidState` unless the consumer is `Connected`.
    pub fn run(&mut self, processor: Arc<RecordProcessor>) -> Result<(), ConsumerError> {
        if self.state != ConsumerState::Connected {
            return Err(ConsumerError::InvalidState {
                operation: "run",
                state: self.state.as_str(),
            });
        }

        tracing::info!(topic = %self.topic, "Starting claim loop");

        let client = Arc::clone(&self.client);
        let cancel = self.cancel.clone();
        let topic = self.topic.clone();
        self.task = Some(tokio::spawn(async move {
            claim_loop(client.as_ref(), &processor, &cancel, &topic).await
        }));
        self.state = ConsumerState::Consuming;
        Ok(())
    }

    /// Request the claim loop to stop; `close()` completes the shutdown
    pub fn stop(&self) {
        tracing::info!(topic = %self.topic, "Stop requested");
        self.cancel.cancel();
    }

    /// Wait until the claim loop ends or the consumer is cancelled
    pub async fn wait(&mut self) -> StopReason {
        let Some(mut task) = self.task.take() else {
            return StopReason::LoopEnded;
        };

        let joined = tokio::select! {
            _ = self.cancel.cancelled() => None,
            joined = &mut task => Some(joined),
        };

        match joined {
            None => {
                tracing::info!("Terminating: context cancelled");
                self.task = Some(task);
                StopReason::Cancelled
            }
            Some(Ok(Ok(()))) => {
                tracing::info!("Terminating: claim loop ended");
                StopReason::LoopEnded
            }
            Some(Ok(Err(e))) => {
                tracing::error!(error = %e, "Terminating: claim loop failed");
                StopReason::Failed(e)
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "Terminating: claim loop task panicked");
                StopReason::Failed(ConsumerError::TaskPanicked(e.to_string()))
            }
        }
    }

    /// Drain the claim loop and release the connection
    ///
    /// Cancels the loop, waits for its task to observe the cancellation and
    /// exit, then closes the client. The connection is never released while
    /// the loop may still use it.
    ///
    /// # Errors
    ///
    /// - `ConsumerError::AlreadyClosed` on a second call
    /// - the loop's own fatal error, if it failed and was not reported by `wait()`
    /// - `ConsumerError::Transport` if the client fails to close
    pub async fn close(&mut self) -> Result<(), ConsumerError> {
        if self.state == ConsumerState::Closed {
            return Err(ConsumerError::AlreadyClosed);
        }

        self.state = ConsumerState::Draining;
        self.cancel.cancel();

        let drained = match self.task.take() {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(e) => Err(ConsumerError::TaskPanicked(e.to_string())),
            },
            None => Ok(()),
        };

        self.client.close()?;
        self.state = ConsumerState::Closed;
        tracing::info!(topic = %self.topic, "Consumer closed");

        drained
    }
}

/// Re-enter claims until cancelled or a fatal transport error occurs
async fn claim_loop(
    client: &dyn LogClient,
    processor: &RecordProcessor,
    cancel: &CancellationToken,
    topic: &str,
) -> Result<(), ConsumerError> {
    loop {
        match consume_claim(client, processor, cancel).await? {
            ClaimEnd::Cancelled => return Ok(()),
            ClaimEnd::Rebalanced => {
                tracing::info!(topic = %topic, "Partition assignment changed, re-entering claim");
            }
        }

        if cancel.is_cancelled() {
            return Ok(());
        }
    }
}

/// Process records from the current claim until it ends
async fn consume_claim(
    client: &dyn LogClient,
    processor: &RecordProcessor,
    cancel: &CancellationToken,
) -> Result<ClaimEnd, ConsumerError> {
    loop {
        let delivery = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(ClaimEnd::Cancelled),
            delivery = client.recv() => delivery,
        };

        match delivery {
            Ok(Delivery::Record(record)) => {
                tracing::debug!(
                    partition = record.partition,
                    offset = record.offset,
                    payload = %String::from_utf8_lossy(&record.payload),
                    "Message"
                );
                if let Err(e) = processor.process(&record) {
                    tracing::trace!(error = %e, offset = record.offset, "Marking unparsable record");
                }
                client.mark(&record)?;
            }
            Ok(Delivery::Rebalanced { revoked }) => {
                processor.partitions_revoked(&revoked);
                return Ok(ClaimEnd::Rebalanced);
            }
            Err(e) if cancel.is_cancelled() => {
                tracing::debug!(error = %e, "Receive failed during shutdown");
                return Ok(ClaimEnd::Cancelled);
            }
            Err(e) => {
                tracing::error!(error = %e, "Error from consumer");
                return Err(ConsumerError::Transport(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::PathClassifier;
    use crate::metrics::Metrics;
    use crate::record::RecordShape;
    use crate::rules::{RuleDefinition, RuleSet};
    use std::time::Duration;

    fn processor(metrics: Arc<Metrics>) -> Arc<RecordProcessor> {
        let rules = RuleSet::new(vec![
            RuleDefinition::pattern("aggreg", &["foo", "aggreg"], 2),
            RuleDefinition::catch_all("start-by-app", 0),
        ])
        .expect("valid rules");
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

    #[test]
    fn test_empty_topic_rejected() {
        let log = Arc::new(MemoryLog::new());
        assert!(matches!(
            StreamConsumer::new(log, ""),
            Err(ConsumerError::EmptyTopic)
        ));
    }

    #[tokio::test]
    async fn test_records_are_marked_after_processing() {
        let log = Arc::new(MemoryLog::new());
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        let mut consumer = StreamConsumer::new(log.clone(), "metrics").expect("consumer");

        log.push(Record::new("metrics", 0, 10, "foo.aggreg.cas.value 3.2 1498887"));
        log.push(Record::new("metrics", 0, 11, "garbage"));
        log.push(Record::new("metrics", 1, 5, "myapp.a.b 1 2"));

        consumer.run(processor(metrics.clone())).expect("run");
        assert_eq!(consumer.state(), ConsumerState::Consuming);

        wait_for_marks(&log, 3).await;
        assert_eq!(log.marked(), vec![(0, 10), (0, 11), (1, 5)]);
        assert_eq!(metrics.processed_count(), 3);
        assert_eq!(metrics.parse_errors_count(), 1);

        consumer.close().await.expect("close");
        assert_eq!(consumer.state(), ConsumerState::Closed);
        assert!(log.is_closed());
    }

    #[tokio::test]
    async fn test_rebalance_reenters_claim() {
        let log = Arc::new(MemoryLog::new());
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        let mut consumer = StreamConsumer::new(log.clone(), "metrics").expect("consumer");

        log.push(Record::new("metrics", 0, 1, "a.b.c 1 2").with_high_watermark(5));
        log.push_rebalance(vec![0]);
        log.push(Record::new("metrics", 2, 1, "a.b.c 1 2"));

        consumer.run(processor(metrics.clone())).expect("run");
        wait_for_marks(&log, 2).await;

        let output = metrics.gather().expect("gather");
        assert!(!output.contains("partition=\"0\""));
        assert!(output.contains("kafka_consumer_messages_total{partition=\"2\"} 1"));

        consumer.close().await.expect("rebalance is not an error");
    }

    #[tokio::test]
    async fn test_transport_error_is_fatal() {
        let log = Arc::new(MemoryLog::new());
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        let mut consumer = StreamConsumer::new(log.clone(), "metrics").expect("consumer");

        log.push_error(TransportError::Receive("broker gone".to_string()));
        consumer.run(processor(metrics)).expect("run");

        let reason = consumer.wait().await;
        assert!(matches!(
            reason,
            StopReason::Failed(ConsumerError::Transport(TransportError::Receive(_)))
        ));

        consumer.close().await.expect("close releases the client");
        assert!(log.is_closed());
    }

    #[tokio::test]
    async fn test_stop_then_wait_reports_cancelled() {
        let log = Arc::new(MemoryLog::new());
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        let mut consumer = StreamConsumer::new(log.clone(), "metrics").expect("consumer");

        consumer.run(processor(metrics)).expect("run");
        consumer.stop();

        assert!(matches!(consumer.wait().await, StopReason::Cancelled));
        consumer.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_close_twice_fails() {
        let log = Arc::new(MemoryLog::new());
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        let mut consumer = StreamConsumer::new(log.clone(), "metrics").expect("consumer");

        consumer.run(processor(metrics)).expect("run");
        consumer.close().await.expect("first close");

        assert!(matches!(
            consumer.close().await,
            Err(ConsumerError::AlreadyClosed)
        ));
    }

    #[tokio::test]
    async fn test_run_twice_fails() {
        let log = Arc::new(MemoryLog::new());
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        let mut consumer = StreamConsumer::new(log, "metrics").expect("consumer");

        consumer.run(processor(metrics.clone())).expect("run");
        assert!(matches!(
            consumer.run(processor(metrics)),
            Err(ConsumerError::InvalidState {
                operation: "run",
                state: "consuming"
            })
        ));
        consumer.close().await.expect("close");
    }
}
