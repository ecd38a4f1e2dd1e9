//! Broker adapter seam.
//!
//! The connector reaches the broker only through these traits. The
//! production implementation lives in [`crate::kafka`]; an in-process
//! hub for tests and broker-less development lives in [`crate::memory`].

use async_trait::async_trait;

use kafgate_core::config::EndpointConfig;
use kafgate_core::error::ConnectorError;

/// Destination options for one publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub topic: String,
    pub partition: i32,
    pub reply_topic: String,
    pub reply_partition: i32,
    /// Informational: the caller asked for the raw payload to be
    /// forwarded without envelope wrapping. Downstream concern.
    pub passthrough: bool,
}

impl SendOptions {
    /// Builds options from an endpoint definition, applying the reply
    /// topic default.
    #[must_use]
    pub fn for_endpoint(endpoint: &EndpointConfig) -> Self {
        Self {
            topic: endpoint.kafka.topic.clone(),
            partition: endpoint.kafka.partition,
            reply_topic: endpoint.kafka.reply_topic(),
            reply_partition: endpoint.kafka.reply_partition,
            passthrough: endpoint.passthrough,
        }
    }
}

/// One message read from a reply topic.
#[derive(Debug, Clone, Default)]
pub struct IncomingReply {
    /// Correlation key (the original message ID).
    pub key: String,
    /// Reply payload, passed through unchanged.
    pub payload: Vec<u8>,
    /// Reply headers as `(name, bytes)` pairs.
    pub headers: Vec<(String, Vec<u8>)>,
}

/// Publishes request envelopes.
#[async_trait]
pub trait BrokerProducer: Send + Sync {
    /// Writes one record; returns once the broker has accepted it.
    async fn write(
        &self,
        topic: &str,
        partition: i32,
        key: &[u8],
        payload: &[u8],
    ) -> Result<(), ConnectorError>;

    /// Flushes outstanding records and releases the producer.
    async fn close(&self) -> Result<(), ConnectorError>;
}

/// Consumes one reply topic in arrival order, starting from the
/// connector start time.
#[async_trait]
pub trait ReplyConsumer: Send {
    /// The reply topic this consumer reads.
    fn topic(&self) -> &str;

    /// Waits for the next reply. An error terminates this consumer's
    /// loop; the rest of the connector keeps running.
    async fn next(&mut self) -> Result<IncomingReply, ConnectorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use kafgate_core::config::EndpointKafkaConfig;

    #[test]
    fn options_apply_reply_topic_default() {
        let endpoint = EndpointConfig {
            is_grpc: false,
            path: "/a".into(),
            method: None,
            data_type: "json".into(),
            passthrough: true,
            kafka: EndpointKafkaConfig {
                topic: "svcA".into(),
                partition: 2,
                reply_topic: None,
                reply_partition: 3,
            },
        };

        let opts = SendOptions::for_endpoint(&endpoint);
        assert_eq!(opts.topic, "svcA");
        assert_eq!(opts.partition, 2);
        assert_eq!(opts.reply_topic, "svcA-reply");
        assert_eq!(opts.reply_partition, 3);
        assert!(opts.passthrough);
    }
}
