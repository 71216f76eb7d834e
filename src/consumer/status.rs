//! Consumer status document

use super::LogClient;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Liveness of one broker known to the client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrokerStatus {
    pub id: i64,
    pub address: String,
    pub rack: Option<String>,
    pub connected: bool,
    pub connection_error: Option<String>,
}

/// Point-in-time view of the log connection
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsumerStatus {
    pub brokers: Vec<BrokerStatus>,
    pub closed: bool,
    /// Latest client-level error, not tied to a particular broker
    pub last_error: Option<String>,
    pub transport_metrics: BTreeMap<String, f64>,
}

/// Cloneable, non-blocking access to the consumer status
///
/// Handed to the HTTP layer so it can report status while the consumer
/// itself stays exclusively owned by the lifecycle code.
#[derive(Clone)]
pub struct StatusHandle {
    client: Arc<dyn LogClient>,
}

impl StatusHandle {
    pub(crate) fn new(client: Arc<dyn LogClient>) -> Self {
        Self { client }
    }

    pub fn status(&self) -> ConsumerStatus {
        self.client.status()
    }
}
