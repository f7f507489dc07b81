use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A document returned by the vector store before reranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    pub content: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub metadata: Map<String, Value>,
    pub similarity: f64,
}

impl Candidate {
    /// The document category (`metadata.type`), if any.
    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.metadata.get("type").and_then(Value::as_str)
    }
}

/// A stored document as read by the catalog operations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DocumentRow {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub metadata: Map<String, Value>,
}

/// One page of documents plus the total row count when the store knows it.
#[derive(Debug, Clone, Default)]
pub struct DocumentPage {
    pub rows: Vec<DocumentRow>,
    pub total: usize,
}

/// Nearest-neighbour query sent to a store.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRequest {
    pub embedding: Vec<f32>,
    pub threshold: f64,
    pub limit: usize,
    pub category: Option<String>,
}

fn id_as_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "document id must be a string or number, got {other}"
        ))),
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Map<String, Value>, D::Error> {
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse a metadata column stored as JSON text.
pub(crate) fn parse_metadata(raw: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
