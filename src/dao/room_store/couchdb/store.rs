use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, from_value, json};
use tokio::{sync::watch, time::sleep};
use tracing::{debug, warn};

use crate::dao::{
    room_store::{RecordKey, RecordKind, RoomStore, Subscription, merge_partial},
    storage::StorageResult,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, ChangesResponse, CouchRecordDocument, END_SUFFIX, seq_param,
    },
};

const CHANGES: &str = "_changes";
const MAX_UPDATE_ATTEMPTS: u32 = 5;
const FEED_RETRY_DELAY: Duration = Duration::from_millis(250);
const FEED_MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// CouchDB-backed [`RoomStore`] with subscriptions fed by the `_changes` long-poll feed.
#[derive(Clone)]
pub struct CouchRoomStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
    longpoll_timeout: Duration,
}

/// Outcome of one `_changes` request for a single document.
struct ChangeBatch {
    /// `None` when the document did not change, `Some(None)` when it was deleted.
    latest: Option<Option<Value>>,
    last_seq: Value,
}

impl CouchRoomStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
            longpoll_timeout: config.longpoll_timeout,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        self.authorize(self.client.request(method, url))
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorize(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                // 412 means another instance created it first.
                if create.status().is_success() || create.status() == StatusCode::PRECONDITION_FAILED {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    /// PUT a document. Resolves to `false` on a revision conflict.
    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<bool>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(false),
            status if status.is_success() => Ok(true),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn delete_document(&self, doc_id: &str, rev: &str) -> CouchResult<bool> {
        let response = self
            .request(Method::DELETE, doc_id)
            .query(&[("rev", rev)])
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(false),
            StatusCode::NOT_FOUND => Ok(true),
            status if status.is_success() => Ok(true),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn list_documents<T>(&self, prefix: &str) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", json!(prefix).to_string()),
            ("endkey", json!(format!("{prefix}{END_SUFFIX}")).to_string()),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        payload
            .rows
            .into_iter()
            .filter_map(|row| row.doc)
            .map(|doc| {
                from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                    path: ALL_DOCS.to_string(),
                    source,
                })
            })
            .collect()
    }

    /// Write `value` under `doc_id`, retrying with a fresh revision on conflict.
    async fn store_record(&self, doc_id: &str, kind: RecordKind, value: Value) -> CouchResult<()> {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let rev = self
                .get_document::<CouchRecordDocument>(doc_id)
                .await?
                .and_then(|existing| existing.rev);
            let doc = CouchRecordDocument::new(doc_id.to_string(), kind, value.clone(), rev);
            if self.put_document(doc_id, &doc).await? {
                return Ok(());
            }
            debug!(doc_id, "revision conflict on write; retrying");
        }

        Err(CouchDaoError::Conflict {
            path: doc_id.to_string(),
            attempts: MAX_UPDATE_ATTEMPTS,
        })
    }

    async fn merge_record(&self, doc_id: &str, partial: Value) -> CouchResult<bool> {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let Some(mut doc) = self.get_document::<CouchRecordDocument>(doc_id).await? else {
                return Ok(false);
            };
            merge_partial(&mut doc.value, partial.clone());
            if self.put_document(doc_id, &doc).await? {
                return Ok(true);
            }
            debug!(doc_id, "revision conflict on merge; retrying");
        }

        Err(CouchDaoError::Conflict {
            path: doc_id.to_string(),
            attempts: MAX_UPDATE_ATTEMPTS,
        })
    }

    async fn remove_record(&self, doc_id: &str) -> CouchResult<()> {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let Some(doc) = self.get_document::<CouchRecordDocument>(doc_id).await? else {
                return Ok(());
            };
            let Some(rev) = doc.rev else {
                return Ok(());
            };
            if self.delete_document(doc_id, &rev).await? {
                return Ok(());
            }
        }

        Err(CouchDaoError::Conflict {
            path: doc_id.to_string(),
            attempts: MAX_UPDATE_ATTEMPTS,
        })
    }

    /// Read the changes feed for one document. Without `since` this returns the
    /// current state immediately; with it, the request long-polls for the next change.
    async fn changes(&self, doc_id: &str, since: Option<&Value>) -> CouchResult<ChangeBatch> {
        let mut query = vec![
            ("filter", "_doc_ids".to_string()),
            ("include_docs", "true".to_string()),
        ];
        match since {
            Some(seq) => {
                query.push(("feed", "longpoll".to_string()));
                query.push(("since", seq_param(seq)));
                query.push(("timeout", self.longpoll_timeout.as_millis().to_string()));
            }
            None => {
                query.push(("feed", "normal".to_string()));
                query.push(("since", "0".to_string()));
            }
        }

        let response = self
            .request(Method::POST, CHANGES)
            .query(&query)
            .json(&json!({ "doc_ids": [doc_id] }))
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: CHANGES.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: CHANGES.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<ChangesResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: CHANGES.to_string(),
                source,
            }
        })?;

        let mut latest = None;
        for row in payload.results.into_iter().filter(|row| row.id == doc_id) {
            if row.deleted {
                latest = Some(None);
                continue;
            }
            if let Some(doc) = row.doc {
                let doc: CouchRecordDocument =
                    from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                        path: doc_id.to_string(),
                        source,
                    })?;
                latest = Some(Some(doc.value));
            }
        }

        Ok(ChangeBatch {
            latest,
            last_seq: payload.last_seq,
        })
    }

    /// Follow the changes feed for `doc_id` until every receiver is dropped.
    async fn follow_changes(self, doc_id: String, mut since: Value, tx: watch::Sender<Option<Value>>) {
        let mut delay = FEED_RETRY_DELAY;

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                outcome = self.changes(&doc_id, Some(&since)) => match outcome {
                    Ok(batch) => {
                        delay = FEED_RETRY_DELAY;
                        since = batch.last_seq;
                        if let Some(latest) = batch.latest {
                            tx.send_if_modified(|current| {
                                if *current == latest {
                                    false
                                } else {
                                    *current = latest;
                                    true
                                }
                            });
                        }
                    }
                    Err(err) => {
                        warn!(doc_id, error = %err, retry_ms = delay.as_millis(), "CouchDB changes feed failed");
                        sleep(delay).await;
                        delay = (delay * 2).min(FEED_MAX_RETRY_DELAY);
                    }
                }
            }
        }

        debug!(doc_id, "changes feed follower stopped");
    }
}

impl RoomStore for CouchRoomStore {
    fn get(&self, key: &RecordKey) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let store = self.clone();
        let doc_id = key.to_string();
        Box::pin(async move {
            let doc = store.get_document::<CouchRecordDocument>(&doc_id).await?;
            Ok(doc.map(|doc| doc.value))
        })
    }

    fn set(&self, key: &RecordKey, value: Value) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let doc_id = key.to_string();
        let kind = key.kind();
        Box::pin(async move {
            store
                .store_record(&doc_id, kind, value)
                .await
                .map_err(Into::into)
        })
    }

    fn update(&self, key: &RecordKey, partial: Value) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        let doc_id = key.to_string();
        Box::pin(async move { store.merge_record(&doc_id, partial).await.map_err(Into::into) })
    }

    fn delete(&self, key: &RecordKey) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let doc_id = key.to_string();
        Box::pin(async move { store.remove_record(&doc_id).await.map_err(Into::into) })
    }

    fn list(&self, kind: RecordKind) -> BoxFuture<'static, StorageResult<Vec<Value>>> {
        let store = self.clone();
        Box::pin(async move {
            let docs = store
                .list_documents::<CouchRecordDocument>(&kind.prefix())
                .await?;
            Ok(docs.into_iter().map(|doc| doc.value).collect())
        })
    }

    fn subscribe(&self, key: &RecordKey) -> BoxFuture<'static, StorageResult<Subscription>> {
        let store = self.clone();
        let doc_id = key.to_string();
        Box::pin(async move {
            let initial = store.changes(&doc_id, None).await?;
            let (tx, rx) = watch::channel(initial.latest.flatten());
            tokio::spawn(store.follow_changes(doc_id, initial.last_seq, tx));
            Ok(Subscription::new(rx))
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = store.database_url();
            let response = store
                .authorize(store.client.get(&url))
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
