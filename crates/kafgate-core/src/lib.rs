//! Core types for the kafgate bridge.
//!
//! This crate holds everything the connector and the HTTP gateway share:
//! the message envelope and its ID generator, the reply-side header map,
//! the serializer registry, the error taxonomy and the configuration
//! schema.

pub mod config;
pub mod error;
pub mod headers;
pub mod message;
pub mod serializer;

pub use config::{BridgeConfig, EndpointConfig, EndpointKafkaConfig, KafkaConfig};
pub use error::{ConnectorError, ErrorKind};
pub use headers::{HeaderValue, ReplyHeaders};
pub use message::{new_message_id, Message};
pub use serializer::{Serializer, SerializerRegistry};
