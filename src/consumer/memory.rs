//! In-process log client
//!
//! `MemoryLog` replays a script of records, rebalances and transport errors
//! pushed by the caller. It backs the consumer tests and lets the service run
//! without a broker.

use super::{BrokerStatus, ConsumerStatus, Delivery, LogClient};
use crate::error::TransportError;
use crate::record::Record;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

#[derive(Debug)]
enum Scripted {
    Record(Record),
    Rebalance(Vec<i32>),
    Error(TransportError),
}

pub struct MemoryLog {
    sender: mpsc::UnboundedSender<Scripted>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Scripted>>,
    marked: Mutex<Vec<(i32, i64)>>,
    brokers: Vec<BrokerStatus>,
    closed: AtomicBool,
}

impl MemoryLog {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            marked: Mutex::new(Vec::new()),
            brokers: Vec::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Brokers reported by `status()`
    pub fn with_brokers(mut self, brokers: Vec<BrokerStatus>) -> Self {
        self.brokers = brokers;
        self
    }

    pub fn push(&self, record: Record) {
        self.send(Scripted::Record(record));
    }

    /// End the current claim, revoking `revoked`
    pub fn push_rebalance(&self, revoked: Vec<i32>) {
        self.send(Scripted::Rebalance(revoked));
    }

    pub fn push_error(&self, error: TransportError) {
        self.send(Scripted::Error(error));
    }

    /// `(partition, offset)` of every marked record, in marking order
    pub fn marked(&self) -> Vec<(i32, i64)> {
        self.marked.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn send(&self, item: Scripted) {
        // The receiver lives as long as `self`, so sending cannot fail.
        let _ = self.sender.send(item);
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogClient for MemoryLog {
    async fn recv(&self) -> Result<Delivery, TransportError> {
        let mut receiver = self.receiver.lock().await;
        match receiver.recv().await {
            Some(Scripted::Record(record)) => Ok(Delivery::Record(record)),
            Some(Scripted::Rebalance(revoked)) => Ok(Delivery::Rebalanced { revoked }),
            Some(Scripted::Error(e)) => Err(e),
            None => Err(TransportError::Receive("log script ended".to_string())),
        }
    }

    fn mark(&self, record: &Record) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Mark {
                partition: record.partition,
                offset: record.offset,
                reason: "client is closed".to_string(),
            });
        }

        self.marked.lock().push((record.partition, record.offset));
        Ok(())
    }

    fn status(&self) -> ConsumerStatus {
        let mut transport_metrics = BTreeMap::new();
        transport_metrics.insert("records_marked".to_string(), self.marked.lock().len() as f64);

        ConsumerStatus {
            brokers: self.brokers.clone(),
            closed: self.is_closed(),
            last_error: None,
            transport_metrics,
        }
    }

    fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyClosed);
        }
        Ok(())
    }
}
