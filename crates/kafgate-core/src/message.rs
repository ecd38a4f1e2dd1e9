//! The message envelope and its ID generator.

use std::collections::HashMap;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

/// ID prefix used for messages originating from the HTTP gateway.
pub const HTTP_ID_PREFIX: &str = "KBRG-HTTP";

/// Origin tag for messages built from HTTP requests.
pub const PORT_HTTP: &str = "http";

/// Default number of random bytes in a message ID (128 bits).
pub const DEFAULT_ID_BYTES: usize = 16;

/// The envelope published to the request topic.
///
/// Field names on the JSON wire are fixed; downstream consumers match on
/// them. `payload` travels base64-encoded. The correlation engine only
/// ever inspects `id` — everything else is carried for the consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation key; unique for the process lifetime.
    #[serde(rename = "ID")]
    pub id: String,

    /// Serializer selector (`"json"`, `"yaml"`).
    #[serde(rename = "Type")]
    pub data_type: String,

    /// Origin tag (`"http"`).
    #[serde(rename = "Port")]
    pub port: String,

    /// Request path as seen by the gateway.
    #[serde(rename = "Path")]
    pub path: String,

    /// Path parameters.
    #[serde(rename = "Variables")]
    pub variables: HashMap<String, String>,

    /// Query parameters; multi-valued entries preserve arrival order.
    #[serde(rename = "Parameters")]
    pub parameters: HashMap<String, Vec<String>>,

    /// Request headers, collapsed to their first value.
    #[serde(rename = "Headers")]
    pub headers: HashMap<String, String>,

    /// Opaque request body.
    #[serde(rename = "Payload", with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl Message {
    /// Checks the envelope before it is handed to the connector.
    ///
    /// An empty ID would make correlation unsafe, so it is rejected here
    /// and never reaches the broker.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.id.is_empty() {
            return Err(ConnectorError::Validation("missing message ID".into()));
        }
        Ok(())
    }
}

/// Generates a message ID of the form `{prefix}-{hex}` with `byte_size`
/// random bytes from the operating system RNG.
///
/// A failing OS RNG terminates the process: without unique IDs,
/// correlation is unsafe, and this is called from request tasks where a
/// panic would only unwind the one task.
#[must_use]
pub fn new_message_id(prefix: &str, byte_size: usize) -> String {
    let mut buffer = vec![0u8; byte_size];
    if let Err(err) = OsRng.try_fill_bytes(&mut buffer) {
        eprintln!("failed to generate random message id: {err}");
        std::process::abort();
    }
    format!("{prefix}-{}", hex::encode(buffer))
}

/// Base64 codec for the `Payload` wire field.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
