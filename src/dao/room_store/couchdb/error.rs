//! Failures raised by the CouchDB room store.

use reqwest::StatusCode;
use thiserror::Error;

/// Result alias for CouchDB room store calls.
pub type CouchResult<T> = Result<T, CouchDaoError>;

/// Everything that can go wrong between the room store and CouchDB.
#[derive(Debug, Error)]
pub enum CouchDaoError {
    /// A connection setting was not provided.
    #[error("CouchDB room store needs `{var}` to be set")]
    MissingEnvVar { var: &'static str },
    /// The HTTP client could not be constructed.
    #[error("could not build the CouchDB HTTP client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// Probing the room database failed.
    #[error("could not reach CouchDB database `{database}`")]
    DatabaseQuery {
        database: String,
        #[source]
        source: reqwest::Error,
    },
    /// The room database could not be created on first use.
    #[error("could not create CouchDB database `{database}`")]
    DatabaseCreate {
        database: String,
        #[source]
        source: reqwest::Error,
    },
    /// Probing or creating the room database returned an unexpected status.
    #[error("CouchDB database `{database}` answered with status {status}")]
    DatabaseStatus {
        database: String,
        status: StatusCode,
    },
    /// A record or `_changes` request never reached CouchDB.
    #[error("CouchDB request to `{path}` failed")]
    RequestSend {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// A record or `_changes` request was answered with an unexpected status.
    #[error("CouchDB answered `{path}` with status {status}")]
    RequestStatus { path: String, status: StatusCode },
    /// The response body was not valid JSON.
    #[error("CouchDB response for `{path}` is not JSON")]
    DecodeResponse {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// A document did not match the record envelope.
    #[error("CouchDB document `{path}` is not a room store record")]
    DeserializeValue {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// A document kept changing under a read-merge-write cycle.
    #[error("document `{path}` still conflicting after {attempts} attempt(s)")]
    Conflict { path: String, attempts: u32 },
}
