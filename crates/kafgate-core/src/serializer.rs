//! Payload serializers and their registry.

use std::collections::HashMap;

use crate::error::ConnectorError;
use crate::message::Message;

/// Encodes a message envelope for the outbound topic.
pub trait Serializer: std::fmt::Debug + Send + Sync {
    fn serialize(&self, message: &Message) -> Result<Vec<u8>, ConnectorError>;
}

/// JSON envelope serializer.
#[derive(Debug)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, message: &Message) -> Result<Vec<u8>, ConnectorError> {
        serde_json::to_vec(message)
            .map_err(|err| ConnectorError::Validation(format!("serialize json: {err}")))
    }
}

/// YAML envelope serializer.
#[derive(Debug)]
pub struct YamlSerializer;

impl Serializer for YamlSerializer {
    fn serialize(&self, message: &Message) -> Result<Vec<u8>, ConnectorError> {
        serde_yaml_bw::to_string(message)
            .map(String::into_bytes)
            .map_err(|err| ConnectorError::Validation(format!("serialize yaml: {err}")))
    }
}

/// Registry mapping a message type name to its serializer.
///
/// Populated once at startup and read-only afterwards, so lookups need
/// no locking.
pub struct SerializerRegistry {
    serializers: HashMap<String, Box<dyn Serializer>>,
}

impl SerializerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            serializers: HashMap::new(),
        }
    }

    /// Creates a registry with the built-in `json` and `yaml` serializers.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("json", Box::new(JsonSerializer));
        registry.register("yaml", Box::new(YamlSerializer));
        registry
    }

    pub fn register(&mut self, data_type: impl Into<String>, serializer: Box<dyn Serializer>) {
        self.serializers.insert(data_type.into(), serializer);
    }

    /// Looks up a serializer by message type.
    pub fn get(&self, data_type: &str) -> Result<&dyn Serializer, ConnectorError> {
        self.serializers
            .get(data_type)
            .map(|serializer| serializer.as_ref())
            .ok_or_else(|| ConnectorError::Config(format!("no serializer for type: {data_type}")))
    }

    /// True if a serializer is registered for the given type.
    #[must_use]
    pub fn contains(&self, data_type: &str) -> bool {
        self.serializers.contains_key(data_type)
    }

    /// Registered type names, sorted.
    #[must_use]
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.serializers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
