//! Kafka implementations of the broker seam.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Headers as _, Message as _};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;

use kafgate_core::config::KafkaConfig;
use kafgate_core::error::ConnectorError;

use crate::broker::{BrokerProducer, IncomingReply, ReplyConsumer};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
const OFFSET_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

fn transport(context: &str, err: impl std::fmt::Display) -> ConnectorError {
    ConnectorError::Transport(format!("{context}: {err}"))
}

/// Producer for request envelopes, shared by every endpoint.
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    /// Creates a producer with batching configured from the bridge
    /// settings.
    pub fn new(config: &KafkaConfig) -> Result<Self, ConnectorError> {
        let mut client = ClientConfig::new();
        client.set("bootstrap.servers", &config.kafka_url);
        if let Some(batch_size) = config.batch_size {
            client.set("batch.num.messages", batch_size.to_string());
        }
        if let Some(batch_timeout_ms) = config.batch_timeout {
            client.set("linger.ms", batch_timeout_ms.to_string());
        }

        let producer = client
            .create()
            .map_err(|err| transport("create producer", err))?;
        Ok(Self { producer })
    }
}

#[async_trait]
impl BrokerProducer for KafkaProducer {
    async fn write(
        &self,
        topic: &str,
        partition: i32,
        key: &[u8],
        payload: &[u8],
    ) -> Result<(), ConnectorError> {
        let record = FutureRecord::to(topic)
            .partition(partition)
            .key(key)
            .payload(payload);

        self.producer
            .send(record, Timeout::Never)
            .await
            .map(|_| ())
            .map_err(|(err, _)| transport(&format!("write to {topic}"), err))
    }

    async fn close(&self) -> Result<(), ConnectorError> {
        self.producer
            .flush(FLUSH_TIMEOUT)
            .map_err(|err| transport("flush producer", err))
    }
}

/// Consumer for one reply topic/partition, positioned at the connector
/// start time.
///
/// Replies older than the start cannot belong to this process's
/// in-flight requests, so the partition is seeked to the first offset at
/// or after `start` before consuming; a partition with nothing newer
/// reads from the end.
pub struct KafkaReplyConsumer {
    topic: String,
    consumer: StreamConsumer,
}

impl KafkaReplyConsumer {
    pub fn connect(
        config: &KafkaConfig,
        topic: &str,
        partition: i32,
        start: SystemTime,
    ) -> Result<Self, ConnectorError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_url)
            .set("group.id", format!("kafgate-{topic}"))
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "latest")
            .create()
            .map_err(|err| transport(&format!("create consumer for {topic}"), err))?;

        let start_ms = start
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;

        let mut lookup = TopicPartitionList::new();
        lookup
            .add_partition_offset(topic, partition, Offset::Offset(start_ms))
            .map_err(|err| transport(&format!("seek {topic}"), err))?;

        let resolved = consumer
            .offsets_for_times(lookup, OFFSET_LOOKUP_TIMEOUT)
            .map_err(|err| transport(&format!("resolve start offset for {topic}"), err))?;

        let mut assignment = TopicPartitionList::new();
        for element in resolved.elements() {
            let offset = match element.offset() {
                Offset::Invalid => Offset::End,
                offset => offset,
            };
            assignment
                .add_partition_offset(element.topic(), element.partition(), offset)
                .map_err(|err| transport(&format!("assign {topic}"), err))?;
        }

        consumer
            .assign(&assignment)
            .map_err(|err| transport(&format!("assign {topic}"), err))?;

        Ok(Self {
            topic: topic.to_owned(),
            consumer,
        })
    }
}

#[async_trait]
impl ReplyConsumer for KafkaReplyConsumer {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn next(&mut self) -> Result<IncomingReply, ConnectorError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|err| transport(&format!("read from {}", self.topic), err))?;

        let key = message
            .key()
            .map(|key| String::from_utf8_lossy(key).into_owned())
            .unwrap_or_default();
        let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();

        let mut headers = Vec::new();
        if let Some(borrowed) = message.headers() {
            for header in borrowed.iter() {
                headers.push((
                    header.key.to_owned(),
                    header.value.map(<[u8]>::to_vec).unwrap_or_default(),
                ));
            }
        }

        Ok(IncomingReply {
            key,
            payload,
            headers,
        })
    }
}
