//! Request/reply correlation engine over Kafka.
//!
//! The connector turns the asynchronous topic pair of each endpoint into
//! a synchronous call: it publishes the request envelope keyed by its
//! message ID, registers a pending entry, consumes the reply topics
//! concurrently and completes each pending entry with exactly one of
//! reply, timeout, publish error or close.

pub mod broker;
pub mod connector;
pub mod kafka;
pub mod memory;
pub mod pending;

pub use broker::{BrokerProducer, IncomingReply, ReplyConsumer, SendOptions};
pub use connector::Connector;
pub use memory::MemoryBroker;
pub use pending::{PendingReply, PendingTable, Reply};
