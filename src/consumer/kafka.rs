//! Kafka-backed `LogClient`
//!
//! Built on rdkafka's `StreamConsumer`. Offsets are stored explicitly on
//! `mark` (`enable.auto.offset.store=false`) and committed in the background
//! by the client's auto-commit, so only processed records ever advance the
//! committed position. The custom client context captures three things the
//! rest of the service needs without blocking on the client:
//!
//! - periodic transport statistics, used for the status document
//! - the last client-level error
//! - consumer group rebalances, which end the current claim
//!
//! Each delivered record also carries its partition's high watermark, read
//! from the client's cached watermarks, so offset lag can be reported.

use super::{BrokerStatus, ConsumerStatus, Delivery, LogClient};
use crate::config::KafkaConfig;
use crate::error::{ConsumerError, TransportError};
use crate::record::Record;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance,
    StreamConsumer as RdStreamConsumer,
};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::statistics::Statistics;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Client context recording statistics, errors and rebalances
#[derive(Default)]
pub struct AttributorContext {
    statistics: RwLock<Option<Statistics>>,
    last_error: RwLock<Option<String>>,
    rebalanced: Notify,
    /// Partitions revoked since the last claim ended
    revoked: Mutex<Vec<i32>>,
}

impl AttributorContext {
    fn on_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                tracing::info!(partitions = partitions.count(), "Partitions assigned");
                self.rebalanced.notify_one();
            }
            Rebalance::Revoke(partitions) => {
                tracing::info!(partitions = partitions.count(), "Partitions revoked by group");
                self.revoked
                    .lock()
                    .extend(partitions.elements().iter().map(|tpl| tpl.partition()));
                self.rebalanced.notify_one();
            }
            Rebalance::Error(e) => {
                tracing::warn!(error = %e, "Rebalance failed");
            }
        }
    }
}

impl ClientContext for AttributorContext {
    fn stats(&self, statistics: Statistics) {
        *self.statistics.write() = Some(statistics);
    }

    fn error(&self, error: KafkaError, reason: &str) {
        tracing::error!(error = %error, reason = %reason, "Kafka client error");
        *self.last_error.write() = Some(format!("{}: {}", error, reason));
    }
}

impl ConsumerContext for AttributorContext {
    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        self.on_rebalance(rebalance);
    }
}

type Inner = RdStreamConsumer<AttributorContext>;

pub struct KafkaClient {
    consumer: Arc<Inner>,
    topic: String,
    /// Brokers seen by the startup metadata check, used until statistics arrive
    seed_brokers: Vec<BrokerStatus>,
    closed: AtomicBool,
}

impl KafkaClient {
    /// Create the consumer, verify the brokers answer and subscribe to the topic
    ///
    /// # Errors
    ///
    /// - `ConsumerError::EmptyTopic` if no topic is configured
    /// - `ConsumerError::Transport` if the client can not be created, the
    ///   brokers do not answer within `connect_timeout_ms`, or the
    ///   subscription fails
    pub async fn connect(config: &KafkaConfig) -> Result<Self, ConsumerError> {
        if config.topic.is_empty() {
            return Err(ConsumerError::EmptyTopic);
        }

        let consumer: Inner = client_config(config)
            .create_with_context(AttributorContext::default())
            .map_err(|e| TransportError::Create(e.to_string()))?;
        let consumer = Arc::new(consumer);

        tracing::info!(
            brokers = %config.brokers.join(","),
            group = %config.group,
            topic = %config.topic,
            "Checking broker connectivity"
        );
        let seed_brokers = fetch_brokers(
            Arc::clone(&consumer),
            config.topic.clone(),
            Duration::from_millis(config.connect_timeout_ms),
        )
        .await?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| TransportError::Subscribe {
                topic: config.topic.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            topic = %config.topic,
            brokers = seed_brokers.len(),
            "Subscribed to topic"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
            seed_brokers,
            closed: AtomicBool::new(false),
        })
    }

    fn brokers(&self) -> Vec<BrokerStatus> {
        let context = self.consumer.context();
        let statistics = context.statistics.read();
        let Some(statistics) = statistics.as_ref() else {
            return self.seed_brokers.clone();
        };

        let mut brokers: Vec<BrokerStatus> = statistics
            .brokers
            .values()
            // Bootstrap entries have no node id yet
            .filter(|broker| broker.nodeid >= 0)
            .map(|broker| {
                let connected = broker.state == "UP";
                BrokerStatus {
                    id: i64::from(broker.nodeid),
                    address: broker.nodename.clone(),
                    rack: None,
                    connected,
                    connection_error: (!connected)
                        .then(|| format!("broker state {}", broker.state)),
                }
            })
            .collect();
        brokers.sort_by(|a, b| a.id.cmp(&b.id));
        brokers
    }

    fn transport_metrics(&self) -> BTreeMap<String, f64> {
        let mut values = BTreeMap::new();
        let statistics = self.consumer.context().statistics.read();
        let Some(stats) = statistics.as_ref() else {
            return values;
        };

        values.insert("age_us".to_string(), stats.age as f64);
        values.insert("replyq".to_string(), stats.replyq as f64);
        values.insert("msg_cnt".to_string(), stats.msg_cnt as f64);
        values.insert("tx".to_string(), stats.tx as f64);
        values.insert("tx_bytes".to_string(), stats.tx_bytes as f64);
        values.insert("rx".to_string(), stats.rx as f64);
        values.insert("rx_bytes".to_string(), stats.rx_bytes as f64);
        values.insert("rxmsgs".to_string(), stats.rxmsgs as f64);
        values.insert("rxmsg_bytes".to_string(), stats.rxmsg_bytes as f64);
        if let Some(cgrp) = &stats.cgrp {
            values.insert("cgrp_rebalance_cnt".to_string(), cgrp.rebalance_cnt as f64);
            values.insert(
                "cgrp_assignment_size".to_string(),
                cgrp.assignment_size as f64,
            );
        }
        values
    }
}

fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", config.brokers.join(","))
        .set("group.id", &config.group)
        .set("auto.offset.reset", config.initial_offset.as_auto_offset_reset())
        .set("enable.auto.commit", "true")
        .set("enable.auto.offset.store", "false")
        .set("enable.partition.eof", "false")
        .set("session.timeout.ms", config.session_timeout_ms.to_string())
        .set(
            "statistics.interval.ms",
            config.statistics_interval_ms.to_string(),
        );
    client_config
}

/// Blocking metadata request, run off the async runtime
async fn fetch_brokers(
    consumer: Arc<Inner>,
    topic: String,
    timeout: Duration,
) -> Result<Vec<BrokerStatus>, TransportError> {
    tokio::task::spawn_blocking(move || -> Result<Vec<BrokerStatus>, TransportError> {
        let metadata = consumer
            .fetch_metadata(Some(&topic), timeout)
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        Ok(metadata
            .brokers()
            .iter()
            .map(|broker| BrokerStatus {
                id: i64::from(broker.id()),
                address: format!("{}:{}", broker.host(), broker.port()),
                rack: None,
                connected: false,
                connection_error: None,
            })
            .collect())
    })
    .await
    .map_err(|e| TransportError::Unreachable(e.to_string()))?
}

fn to_record(message: &BorrowedMessage<'_>) -> Record {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|header| {
                    let value = header
                        .value
                        .map(|value| String::from_utf8_lossy(value).into_owned())
                        .unwrap_or_default();
                    (header.key.to_string(), value)
                })
                .collect()
        })
        .unwrap_or_default();

    Record {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        timestamp_ms: message.timestamp().to_millis(),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        headers,
        high_watermark: None,
    }
}

#[async_trait]
impl LogClient for KafkaClient {
    async fn recv(&self) -> Result<Delivery, TransportError> {
        let context = self.consumer.context();
        tokio::select! {
            biased;
            _ = context.rebalanced.notified() => Ok(Delivery::Rebalanced {
                revoked: std::mem::take(&mut *context.revoked.lock()),
            }),
            message = self.consumer.recv() => {
                let message = message.map_err(|e| TransportError::Receive(e.to_string()))?;
                let mut record = to_record(&message);
                record.high_watermark = self
                    .consumer
                    .get_watermark_offsets(&record.topic, record.partition)
                    .ok()
                    .map(|(_low, high)| high);
                Ok(Delivery::Record(record))
            }
        }
    }

    fn mark(&self, record: &Record) -> Result<(), TransportError> {
        // The stored offset is the next one to read
        self.consumer
            .store_offset(&record.topic, record.partition, record.offset + 1)
            .map_err(|e| TransportError::Mark {
                partition: record.partition,
                offset: record.offset,
                reason: e.to_string(),
            })
    }

    fn status(&self) -> ConsumerStatus {
        ConsumerStatus {
            brokers: self.brokers(),
            closed: self.closed.load(Ordering::SeqCst),
            last_error: self.consumer.context().last_error.read().clone(),
            transport_metrics: self.transport_metrics(),
        }
    }

    fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyClosed);
        }

        match self.consumer.commit_consumer_state(CommitMode::Sync) {
            Ok(()) => {}
            // Nothing was marked since the last commit
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {}
            Err(e) => return Err(TransportError::Close(e.to_string())),
        }
        self.consumer.unsubscribe();

        tracing::info!(topic = %self.topic, "Kafka client closed");
        Ok(())
    }
}
