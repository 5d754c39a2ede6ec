//! CBOR metadata helpers for the binary protocol.
//!
//! Message headers travel as a canonical CBOR map of text keys to text
//! values between the frame header and the payload.

use bytes::Bytes;
use std::collections::BTreeMap;

/// CBOR metadata builder helper
#[derive(Debug, Clone, Default)]
pub struct MetaBuilder {
    map: BTreeMap<String, ciborium::Value>,
}

impl MetaBuilder {
    /// Create a new metadata builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a string value
    pub fn insert_str(mut self, key: &str, value: &str) -> Self {
        self.map
            .insert(key.to_string(), ciborium::Value::Text(value.to_string()));
        self
    }

    /// Insert every entry of a header map
    pub fn extend(mut self, headers: &BTreeMap<String, String>) -> Self {
        for (k, v) in headers {
            self = self.insert_str(k, v);
        }
        self
    }

    /// Build the metadata as CBOR bytes
    pub fn build(self) -> Result<Bytes, crate::WireError> {
        let value = ciborium::Value::Map(
            self.map
                .into_iter()
                .map(|(k, v)| (ciborium::Value::Text(k), v))
                .collect(),
        );

        let mut buf = Vec::new();
        ciborium::into_writer(&value, &mut buf).map_err(|_| crate::WireError::Meta)?;

        Ok(Bytes::from(buf))
    }
}

/// Parse CBOR metadata into a map of text values
///
/// Non-text keys and values are skipped. An empty buffer is an empty map.
pub fn parse_meta(meta_raw: &[u8]) -> Result<BTreeMap<String, String>, crate::WireError> {
    if meta_raw.is_empty() {
        return Ok(BTreeMap::new());
    }

    let value: ciborium::Value =
        ciborium::from_reader(meta_raw).map_err(|_| crate::WireError::Meta)?;

    if let ciborium::Value::Map(map) = value {
        let mut result = BTreeMap::new();
        for (key, value) in map {
            if let (ciborium::Value::Text(k), ciborium::Value::Text(v)) = (key, value) {
                result.insert(k, v);
            }
        }
        Ok(result)
    } else {
        Err(crate::WireError::Meta)
    }
}
