use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dao::room_store::RecordKind;

/// Upper bound appended to a prefix to form an `_all_docs` key range.
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Envelope stored for every record: the record key is the document id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchRecordDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub kind: String,
    pub value: Value,
}

impl CouchRecordDocument {
    pub fn new(id: String, kind: RecordKind, value: Value, rev: Option<String>) -> Self {
        Self {
            id,
            rev,
            kind: kind.as_str().to_string(),
            value,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangesResponse {
    #[serde(default)]
    pub results: Vec<ChangeRow>,
    pub last_seq: Value,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRow {
    pub id: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Render a sequence token for the `since` query parameter.
pub fn seq_param(seq: &Value) -> String {
    match seq {
        Value::String(token) => token.clone(),
        other => other.to_string(),
    }
}
