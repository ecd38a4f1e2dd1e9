//! In-process broker hub.
//!
//! A topic map of unbounded channels standing in for Kafka. Backs the
//! test suite and lets the bridge run without a broker during
//! development; production uses [`crate::kafka`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use kafgate_core::error::ConnectorError;

use crate::broker::{BrokerProducer, IncomingReply, ReplyConsumer};

/// Process-local publish/subscribe hub keyed by topic name.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    topics: Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<IncomingReply>>>>>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a record with headers to every subscriber of `topic`.
    pub fn publish(
        &self,
        topic: &str,
        key: &[u8],
        payload: &[u8],
        headers: Vec<(String, Vec<u8>)>,
    ) {
        let record = IncomingReply {
            key: String::from_utf8_lossy(key).into_owned(),
            payload: payload.to_vec(),
            headers,
        };

        let mut topics = self.topics.lock().unwrap();
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.retain(|tx| tx.send(record.clone()).is_ok());
        }
    }

    /// Subscribes to a topic; every record published afterwards is
    /// delivered in publish order.
    #[must_use]
    pub fn subscribe(&self, topic: &str) -> MemoryConsumer {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .lock()
            .unwrap()
            .entry(topic.to_owned())
            .or_default()
            .push(tx);

        MemoryConsumer {
            topic: topic.to_owned(),
            rx,
        }
    }
}

#[async_trait]
impl BrokerProducer for MemoryBroker {
    async fn write(
        &self,
        topic: &str,
        _partition: i32,
        key: &[u8],
        payload: &[u8],
    ) -> Result<(), ConnectorError> {
        self.publish(topic, key, payload, Vec::new());
        Ok(())
    }

    async fn close(&self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// Reader side of one topic subscription.
pub struct MemoryConsumer {
    topic: String,
    rx: mpsc::UnboundedReceiver<IncomingReply>,
}

#[async_trait]
impl ReplyConsumer for MemoryConsumer {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn next(&mut self) -> Result<IncomingReply, ConnectorError> {
        self.rx.recv().await.ok_or_else(|| {
            ConnectorError::Transport(format!("memory topic {} dropped", self.topic))
        })
    }
}
