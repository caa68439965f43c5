//! Documents handed to the import pipeline.
//!
//! A [`Document`] is immutable once constructed. Its size is the byte length of
//! the serialized body with `null` object members removed, which is also the
//! form that is sent to the store (see [`Document::minimized`]).
use std::sync::OnceLock;

use serde::{Serialize, Serializer, ser::SerializeMap, ser::SerializeSeq};
use serde_json::Value;
use tracing::warn;

/// Partition key assigned to documents without any partition information.
pub const UNKNOWN_PARTITION_KEY: &str = "unknown";

#[derive(Debug, Clone)]
pub struct Document {
    id: String,
    partition_key: String,
    body: Value,
    size: OnceLock<u64>,
}

/// Serializes a JSON value skipping `null` object members at any depth.
struct WithoutNulls<'a>(&'a Value);

impl Document {
    /// Creates a new document.
    pub fn new(id: impl Into<String>, partition_key: impl Into<String>, body: Value) -> Self {
        Self {
            id: id.into(),
            partition_key: partition_key.into(),
            body,
            size: OnceLock::new(),
        }
    }

    /// Creates a document from a parsed JSON object.
    ///
    /// The id is taken from the `id` member, or generated if missing. The
    /// partition key is taken from `Metadata.Filename`, then from
    /// `fallback_partition_key`, and defaults to [`UNKNOWN_PARTITION_KEY`].
    pub fn from_json(mut body: Value, fallback_partition_key: Option<&str>) -> Self {
        let id = match body.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                let id = ulid::Ulid::new().to_string();
                if let Value::Object(map) = &mut body {
                    map.insert("id".to_string(), Value::String(id.clone()));
                }
                id
            }
        };

        let partition_key = body
            .pointer("/Metadata/Filename")
            .and_then(Value::as_str)
            .or(fallback_partition_key)
            .unwrap_or(UNKNOWN_PARTITION_KEY)
            .to_string();

        Self::new(id, partition_key, body)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Returns the size in bytes of the serialized document.
    ///
    /// The size is computed on first access and cached. If the document cannot
    /// be serialized its size is reported as 0.
    pub fn size_bytes(&self) -> u64 {
        *self.size.get_or_init(|| {
            match serde_json::to_vec(&WithoutNulls(&self.body)) {
                Ok(bytes) => bytes.len() as u64,
                Err(err) => {
                    warn!(id = %self.id, error = %err, "Failed to compute document size");
                    0
                }
            }
        })
    }

    /// Returns a copy of the body without `null` object members.
    pub fn minimized(&self) -> Value {
        strip_nulls(&self.body)
    }
}

fn strip_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_nulls).collect()),
        other => other.clone(),
    }
}

impl Serialize for WithoutNulls<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Object(map) => {
                let mut ser = serializer.serialize_map(None)?;
                for (key, value) in map.iter().filter(|(_, v)| !v.is_null()) {
                    ser.serialize_entry(key, &WithoutNulls(value))?;
                }
                ser.end()
            }
            Value::Array(items) => {
                let mut ser = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    ser.serialize_element(&WithoutNulls(item))?;
                }
                ser.end()
            }
            other => other.serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_size_ignores_null_members() {
        let with_nulls = Document::new(
            "1",
            "a",
            json!({ "id": "1", "header": { "h1": "x", "h2": null }, "footer": null }),
        );
        let without_nulls = Document::new("1", "a", json!({ "id": "1", "header": { "h1": "x" } }));

        assert_eq!(with_nulls.size_bytes(), without_nulls.size_bytes());
        assert_eq!(
            with_nulls.size_bytes(),
            serde_json::to_vec(&json!({ "id": "1", "header": { "h1": "x" } }))
                .unwrap()
                .len() as u64
        );
    }

    #[test]
    fn test_minimized_keeps_array_elements() {
        let doc = Document::new("1", "a", json!({ "body": [null, { "b": null, "c": 1 }] }));

        assert_eq!(doc.minimized(), json!({ "body": [null, { "c": 1 }] }));
    }

    #[test]
    fn test_from_json_uses_metadata_filename() {
        let doc = Document::from_json(
            json!({ "id": "abc", "Metadata": { "Filename": "input-01.json" } }),
            Some("fallback"),
        );

        assert_eq!(doc.id(), "abc");
        assert_eq!(doc.partition_key(), "input-01.json");
    }

    #[test]
    fn test_from_json_generates_missing_id() {
        let doc = Document::from_json(json!({ "value": 1 }), Some("file.json"));

        assert!(!doc.id().is_empty());
        assert_eq!(doc.body()["id"], json!(doc.id()));
        assert_eq!(doc.partition_key(), "file.json");

        let doc = Document::from_json(json!({ "id": 42 }), None);
        assert_eq!(doc.id(), "42");
        assert_eq!(doc.partition_key(), UNKNOWN_PARTITION_KEY);
    }
}
