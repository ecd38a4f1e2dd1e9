//! The connector façade.
//!
//! Owns the serializer registry, the correlation table, the producer and
//! the background tasks: one consumer loop per reply topic plus the
//! expiry sweeper.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use kafgate_core::config::{BridgeConfig, EndpointConfig};
use kafgate_core::error::ConnectorError;
use kafgate_core::headers::ReplyHeaders;
use kafgate_core::message::Message;
use kafgate_core::serializer::SerializerRegistry;

use crate::broker::{BrokerProducer, ReplyConsumer, SendOptions};
use crate::kafka::{KafkaProducer, KafkaReplyConsumer};
use crate::memory::MemoryBroker;
use crate::pending::{PendingReply, PendingTable};

/// Sweeper cadence. Bounds timeout precision: an entry with TTL `T`
/// expires within `[T, T + SWEEP_INTERVAL]` of registration.
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Publishes request envelopes and correlates broker replies back to
/// waiting callers.
pub struct Connector {
    producer: Arc<dyn BrokerProducer>,
    pending: Arc<PendingTable>,
    serializers: SerializerRegistry,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connector {
    /// Assembles a connector from its parts and starts the consumer
    /// loops and the sweeper. Must be called within a tokio runtime.
    #[must_use]
    pub fn new(
        producer: Arc<dyn BrokerProducer>,
        consumers: Vec<Box<dyn ReplyConsumer>>,
        serializers: SerializerRegistry,
        ttl: Duration,
    ) -> Self {
        let pending = Arc::new(PendingTable::new(ttl));
        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(consumers.len() + 1);

        for consumer in consumers {
            tasks.push(tokio::spawn(consume_replies(
                consumer,
                Arc::clone(&pending),
                cancel.clone(),
            )));
        }
        tasks.push(tokio::spawn(sweep_expired(
            Arc::clone(&pending),
            cancel.clone(),
        )));

        Self {
            producer,
            pending,
            serializers,
            cancel,
            tasks: Mutex::new(tasks),
        }
    }

    /// Builds the production connector: one Kafka consumer per distinct
    /// reply topic, positioned at the current time, plus the shared
    /// producer.
    pub fn kafka(config: &BridgeConfig) -> Result<Self, ConnectorError> {
        let start = SystemTime::now();
        let producer = Arc::new(KafkaProducer::new(&config.kafka)?);

        let mut consumers: Vec<Box<dyn ReplyConsumer>> = Vec::new();
        for (topic, partition) in reply_topics(&config.endpoints) {
            let consumer = KafkaReplyConsumer::connect(&config.kafka, &topic, partition, start)?;
            tracing::info!(topic = %topic, partition, "reading replies");
            consumers.push(Box::new(consumer));
        }

        Ok(Self::new(
            producer,
            consumers,
            SerializerRegistry::with_builtins(),
            config.kafka.reply_timeout(),
        ))
    }

    /// Builds a connector over the in-process hub. Used by the test
    /// suite and broker-less development runs.
    #[must_use]
    pub fn in_memory(endpoints: &[EndpointConfig], broker: &MemoryBroker, ttl: Duration) -> Self {
        let consumers: Vec<Box<dyn ReplyConsumer>> = reply_topics(endpoints)
            .into_keys()
            .map(|topic| Box::new(broker.subscribe(&topic)) as Box<dyn ReplyConsumer>)
            .collect();

        Self::new(
            Arc::new(broker.clone()),
            consumers,
            SerializerRegistry::with_builtins(),
            ttl,
        )
    }

    /// Serializes and publishes one message, keyed by its ID.
    pub async fn send(&self, message: &Message, opts: &SendOptions) -> Result<(), ConnectorError> {
        message.validate()?;

        let serializer = self.serializers.get(&message.data_type)?;
        let payload = serializer.serialize(message)?;

        self.producer
            .write(&opts.topic, opts.partition, message.id.as_bytes(), &payload)
            .await
    }

    /// Publishes one message and registers a pending entry for its
    /// reply.
    ///
    /// On success the returned [`PendingReply`] resolves with exactly
    /// one of reply, timeout or closed. On a publish failure the entry
    /// is removed and the error returned directly — nothing is left
    /// behind in the table.
    pub async fn request_reply(
        &self,
        message: &Message,
        opts: &SendOptions,
    ) -> Result<PendingReply, ConnectorError> {
        message.validate()?;

        let pending = self.pending.register(&message.id, Instant::now())?;

        if let Err(err) = self.send(message, opts).await {
            self.pending.unregister(&message.id);
            return Err(err);
        }

        Ok(pending)
    }

    /// Shuts the connector down: rejects new registrations, stops the
    /// consumer loops and the sweeper, flushes the producer and fails
    /// every remaining pending entry with `closed`.
    pub async fn close(&self) -> Result<(), ConnectorError> {
        self.pending.seal();
        self.cancel.cancel();

        let mut failures = Vec::new();

        if let Err(err) = self.producer.close().await {
            failures.push(format!("producer: {err}"));
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                failures.push(format!("task: {err}"));
            }
        }

        let drained = self.pending.drain();
        if drained > 0 {
            tracing::info!(drained, "failed pending requests on close");
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ConnectorError::CloseFailed(failures))
        }
    }

    /// Number of requests currently awaiting a reply.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }
}

/// Distinct reply topics over all endpoints, first partition wins.
fn reply_topics(endpoints: &[EndpointConfig]) -> BTreeMap<String, i32> {
    let mut topics = BTreeMap::new();
    for endpoint in endpoints {
        topics
            .entry(endpoint.kafka.reply_topic())
            .or_insert(endpoint.kafka.reply_partition);
    }
    topics
}

/// Delivers every incoming reply to the correlation table until the
/// consumer fails or the connector closes. A read error ends this loop
/// only; the reply topic is lost but the connector keeps running.
async fn consume_replies(
    mut consumer: Box<dyn ReplyConsumer>,
    pending: Arc<PendingTable>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            incoming = consumer.next() => match incoming {
                Ok(reply) => {
                    let headers = ReplyHeaders::from_pairs(reply.headers);
                    if !pending.resolve(&reply.key, reply.payload, headers) {
                        tracing::debug!(
                            key = %reply.key,
                            topic = consumer.topic(),
                            "dropping reply with no pending entry"
                        );
                    }
                }
                Err(err) => {
                    tracing::error!(
                        error = %err,
                        topic = consumer.topic(),
                        "reply consumer failed, stopping"
                    );
                    break;
                }
            },
        }
    }
}

/// Expires overdue pending entries on a fixed cadence.
async fn sweep_expired(pending: Arc<PendingTable>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let expired = pending.expire_sweep(Instant::now());
                if expired > 0 {
                    tracing::debug!(expired, "expired pending requests");
                }
            }
        }
    }
}
