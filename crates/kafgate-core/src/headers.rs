//! Reply-side message headers.
//!
//! Broker reply headers arrive as raw byte values, while the gateway and
//! downstream services mostly treat them as text. [`HeaderValue`] keeps
//! both representations behind a single string-coercing accessor.

use std::borrow::Cow;
use std::collections::HashMap;

/// Prefix under which HTTP headers travel in both directions.
pub const HTTP_HEADER_PREFIX: &str = "KBRG-HTTP-HEADER-";

/// Reply header carrying the HTTP status code override.
pub const RESPONSE_CODE_HEADER: &str = "KBRG-HTTP-RESPONSE-CODE";

/// A reply header value: text or raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Text(String),
    Bytes(Vec<u8>),
}

impl HeaderValue {
    /// Coerces the value to a string. Byte values are decoded as UTF-8,
    /// with invalid sequences replaced.
    #[must_use]
    pub fn as_str(&self) -> Cow<'_, str> {
        match self {
            Self::Text(text) => Cow::Borrowed(text),
            Self::Bytes(bytes) => String::from_utf8_lossy(bytes),
        }
    }

    /// Returns the raw bytes of the value.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Bytes(bytes) => bytes,
        }
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for HeaderValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

/// Headers attached to a broker reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyHeaders(HashMap<String, HeaderValue>);

impl ReplyHeaders {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the map from broker `(name, bytes)` pairs. Later duplicates
    /// overwrite earlier ones.
    #[must_use]
    pub fn from_pairs(pairs: Vec<(String, Vec<u8>)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(name, value)| (name, HeaderValue::Bytes(value)))
                .collect(),
        )
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<HeaderValue>) {
        self.0.insert(name.into(), value.into());
    }

    /// Looks up a header and coerces it to a string.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<Cow<'_, str>> {
        self.0.get(name).map(HeaderValue::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HeaderValue)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
