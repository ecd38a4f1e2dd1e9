//! Bridge configuration with layered loading.
//!
//! Configuration is YAML; environment variables prefixed with `KAFGATE_`
//! override file settings (`KAFGATE_SERVER__HTTP__PORT=9000`).

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::Deserialize;

use crate::error::ConnectorError;
use crate::serializer::SerializerRegistry;

/// Top-level bridge configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Configuration schema version.
    #[serde(default)]
    pub version: String,

    /// Server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Prometheus metrics endpoint; disabled when absent.
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,

    /// Broker connection settings.
    pub kafka: KafkaConfig,

    /// Endpoint definitions binding routes to topic pairs.
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

/// Server settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub http: HttpConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_host")]
    pub host: String,

    #[serde(default = "default_http_port")]
    pub port: u16,

    /// Time to wait for in-flight requests during shutdown, in
    /// milliseconds.
    #[serde(default, rename = "shutdownTimeout")]
    pub shutdown_timeout: Option<u64>,
}

impl HttpConfig {
    /// The `host:port` address to bind.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The shutdown drain deadline (default 10 s). Connections still
    /// open past it are dropped.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout.unwrap_or(10_000))
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: default_http_port(),
            shutdown_timeout: None,
        }
    }
}

fn default_http_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_http_port() -> u16 {
    8080
}

/// Prometheus metrics endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_host")]
    pub host: String,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl MetricsConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_metrics_host() -> String {
    "127.0.0.1".to_owned()
}

const fn default_metrics_port() -> u16 {
    9090
}

/// Broker connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KafkaConfig {
    /// Broker bootstrap address.
    pub kafka_url: String,

    /// Producer batch size; the client default applies when absent.
    #[serde(default)]
    pub batch_size: Option<u32>,

    /// Producer batch linger in milliseconds.
    #[serde(default)]
    pub batch_timeout: Option<u64>,

    /// How long a pending request waits for its reply, in milliseconds.
    #[serde(default)]
    pub reply_timeout: Option<u64>,
}

impl KafkaConfig {
    /// The pending-reply TTL (default 30 s).
    #[must_use]
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout.unwrap_or(30_000))
    }
}

/// One configured route binding an HTTP path/method to a topic pair.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// gRPC endpoints are carried in the config but not served.
    #[serde(default, rename = "grpc")]
    pub is_grpc: bool,

    /// Route path, axum capture syntax (`/orders/{id}`).
    pub path: String,

    /// HTTP method; GET when absent.
    #[serde(default)]
    pub method: Option<String>,

    /// Serializer selector for the outbound envelope.
    #[serde(rename = "dataType")]
    pub data_type: String,

    /// Downstream hint: forward the raw payload without envelope
    /// transformation. Carried on the wire; the core never branches on it.
    #[serde(default)]
    pub passthrough: bool,

    /// Topic pair for this endpoint.
    pub kafka: EndpointKafkaConfig,
}

impl EndpointConfig {
    /// The HTTP method to bind, defaulting to GET.
    #[must_use]
    pub fn http_method(&self) -> &str {
        self.method.as_deref().filter(|m| !m.is_empty()).unwrap_or("GET")
    }
}

/// Topic pair for one endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointKafkaConfig {
    /// Outbound topic.
    pub topic: String,

    /// Outbound partition.
    #[serde(default)]
    pub partition: i32,

    /// Reply topic; `<topic>-reply` when absent.
    #[serde(default)]
    pub reply_topic: Option<String>,

    /// Reply partition.
    #[serde(default)]
    pub reply_partition: i32,
}

impl EndpointKafkaConfig {
    /// The effective reply topic.
    #[must_use]
    pub fn reply_topic(&self) -> String {
        match self.reply_topic.as_deref().filter(|t| !t.is_empty()) {
            Some(topic) => topic.to_owned(),
            None => format!("{}-reply", self.topic),
        }
    }
}

const KNOWN_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS", "TRACE",
];

impl BridgeConfig {
    /// Loads configuration from the given YAML file, with `KAFGATE_`
    /// environment overrides applied on top.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConnectorError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConnectorError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("KAFGATE_").split("__").lowercase(false))
            .extract::<Self>()
            .map_err(|err| ConnectorError::Config(err.to_string()))
    }

    /// Parses configuration from a YAML string.
    pub fn parse(content: &str) -> Result<Self, ConnectorError> {
        Figment::new()
            .merge(Yaml::string(content))
            .extract::<Self>()
            .map_err(|err| ConnectorError::Config(err.to_string()))
    }

    /// Validates the configuration against the serializer registry.
    ///
    /// Catches at startup what would otherwise fail per-request: unknown
    /// data types, unusable methods, empty topics.
    pub fn validate(&self, serializers: &SerializerRegistry) -> Result<(), ConnectorError> {
        if self.kafka.kafka_url.is_empty() {
            return Err(ConnectorError::Config("kafka.kafkaUrl must be set".into()));
        }

        if self.endpoints.is_empty() {
            return Err(ConnectorError::Config(
                "at least one endpoint must be configured".into(),
            ));
        }

        for endpoint in &self.endpoints {
            if endpoint.path.is_empty() {
                return Err(ConnectorError::Config("endpoint path must be set".into()));
            }
            if endpoint.kafka.topic.is_empty() {
                return Err(ConnectorError::Config(format!(
                    "endpoint {}: kafka.topic must be set",
                    endpoint.path
                )));
            }
            if !serializers.contains(&endpoint.data_type) {
                return Err(ConnectorError::Config(format!(
                    "endpoint {}: unknown dataType '{}' (registered: {})",
                    endpoint.path,
                    endpoint.data_type,
                    serializers.type_names().join(", ")
                )));
            }
            let method = endpoint.http_method().to_ascii_uppercase();
            if !KNOWN_METHODS.contains(&method.as_str()) {
                return Err(ConnectorError::Config(format!(
                    "endpoint {}: unsupported method '{}'",
                    endpoint.path, method
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const FULL: &str = r#"
version: "1"
server:
  http:
    host: "127.0.0.1"
    port: 9000
    shutdownTimeout: 5000
kafka:
  kafkaUrl: "localhost:9092"
  batchSize: 50
  batchTimeout: 10
  replyTimeout: 5000
endpoints:
  - path: "/echo"
    method: "POST"
    dataType: "json"
    kafka:
      topic: "in"
      replyTopic: "out"
  - grpc: true
    path: "/grpc-only"
    dataType: "json"
    kafka:
      topic: "svc"
"#;

    #[test]
    fn parses_full_config() {
        let config = BridgeConfig::parse(FULL).unwrap();

        assert_eq!(config.version, "1");
        assert_eq!(config.server.http.address(), "127.0.0.1:9000");
        assert_eq!(
            config.server.http.shutdown_timeout(),
            Duration::from_millis(5000)
        );
        assert_eq!(config.kafka.kafka_url, "localhost:9092");
        assert_eq!(config.kafka.batch_size, Some(50));
        assert_eq!(config.kafka.reply_timeout(), Duration::from_millis(5000));
        assert_eq!(config.endpoints.len(), 2);

        let echo = &config.endpoints[0];
        assert!(!echo.is_grpc);
        assert_eq!(echo.http_method(), "POST");
        assert_eq!(echo.kafka.reply_topic(), "out");
        assert_eq!(echo.kafka.partition, 0);

        assert!(config.endpoints[1].is_grpc);
    }

    #[test]
    fn defaults() {
        let config = BridgeConfig::parse(
            r#"
kafka:
  kafkaUrl: "localhost:9092"
endpoints:
  - path: "/a"
    dataType: "json"
    kafka:
      topic: "svcA"
"#,
        )
        .unwrap();

        assert_eq!(config.server.http.address(), "0.0.0.0:8080");
        assert_eq!(
            config.server.http.shutdown_timeout(),
            Duration::from_secs(10)
        );
        assert!(config.metrics.is_none());
        assert_eq!(config.kafka.reply_timeout(), Duration::from_secs(30));

        let endpoint = &config.endpoints[0];
        assert_eq!(endpoint.http_method(), "GET");
        assert!(!endpoint.passthrough);
        assert_eq!(endpoint.kafka.reply_topic(), "svcA-reply");
        assert_eq!(endpoint.kafka.reply_partition, 0);
    }

    #[test]
    fn empty_reply_topic_falls_back_to_derived_name() {
        let kafka = EndpointKafkaConfig {
            topic: "svcA".into(),
            partition: 0,
            reply_topic: Some(String::new()),
            reply_partition: 0,
        };
        assert_eq!(kafka.reply_topic(), "svcA-reply");
    }

    fn valid() -> BridgeConfig {
        BridgeConfig::parse(FULL).unwrap()
    }

    #[test]
    fn validate_accepts_good_config() {
        let registry = SerializerRegistry::with_builtins();
        valid().validate(&registry).unwrap();
    }

    #[test]
    fn validate_rejects_unknown_data_type() {
        let registry = SerializerRegistry::with_builtins();
        let mut config = valid();
        config.endpoints[0].data_type = "protobuf".into();

        let err = config.validate(&registry).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("protobuf"));
    }

    #[test]
    fn validate_rejects_bad_method() {
        let registry = SerializerRegistry::with_builtins();
        let mut config = valid();
        config.endpoints[0].method = Some("FETCH".into());
        assert!(config.validate(&registry).is_err());
    }

    #[test]
    fn validate_rejects_empty_endpoints_and_url() {
        let registry = SerializerRegistry::with_builtins();

        let mut config = valid();
        config.endpoints.clear();
        assert!(config.validate(&registry).is_err());

        let mut config = valid();
        config.kafka.kafka_url.clear();
        assert!(config.validate(&registry).is_err());
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = BridgeConfig::load_from("/nonexistent/kafgate.yaml").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
