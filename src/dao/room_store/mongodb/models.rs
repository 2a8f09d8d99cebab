use mongodb::bson::{Document, doc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dao::room_store::RecordKind;

use super::error::{MongoDaoError, MongoResult};

/// One record per document; the JSON value is kept as text so arbitrary
/// numbers survive the round-trip through BSON unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRecordDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub kind: String,
    pub payload: String,
}

impl MongoRecordDocument {
    pub fn encode(key: String, kind: RecordKind, value: &Value) -> MongoResult<Self> {
        let payload = serde_json::to_string(value).map_err(|source| MongoDaoError::Payload {
            key: key.clone(),
            source,
        })?;
        Ok(Self {
            id: key,
            kind: kind.as_str().to_string(),
            payload,
        })
    }

    pub fn decode(&self) -> MongoResult<Value> {
        serde_json::from_str(&self.payload).map_err(|source| MongoDaoError::Payload {
            key: self.id.clone(),
            source,
        })
    }
}

pub fn doc_id(key: &str) -> Document {
    doc! {"_id": key}
}
