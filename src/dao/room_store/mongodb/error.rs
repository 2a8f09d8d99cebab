use mongodb::error::Error as MongoError;
use thiserror::Error;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to save record `{key}`")]
    SaveRecord {
        key: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to load record `{key}`")]
    LoadRecord {
        key: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to delete record `{key}`")]
    DeleteRecord {
        key: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to list `{kind}` records")]
    ListRecords {
        kind: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("record `{key}` payload is not valid JSON")]
    Payload {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("record `{key}` still conflicting after {attempts} attempt(s)")]
    Conflict { key: String, attempts: u32 },
}
