//! HTTP gateway for the kafgate bridge.
//!
//! Binds one route per configured endpoint, translates each request into
//! a message envelope, hands it to the connector and blocks the handler
//! until the correlated reply (or its timeout) produces a response.

pub mod error;
pub mod metrics;
pub mod server;

pub use error::GatewayError;
pub use server::{build_router, run};
