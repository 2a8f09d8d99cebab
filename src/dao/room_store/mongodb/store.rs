use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{Collection, Database, IndexModel, bson::doc, options::IndexOptions};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{MongoRecordDocument, doc_id},
};
use crate::dao::{
    room_store::{RecordKey, RecordKind, RoomStore, Subscription, merge_partial, polling},
    storage::StorageResult,
};

const RECORD_COLLECTION_NAME: &str = "records";
const MAX_UPDATE_ATTEMPTS: u32 = 5;

/// MongoDB-backed [`RoomStore`]; subscriptions poll the record collection.
#[derive(Clone)]
pub struct MongoRoomStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    database: RwLock<Database>,
    config: MongoConfig,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.database.read().await.clone();

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (_client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        *self.database.write().await = database;
        Ok(())
    }
}

impl MongoRoomStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (_client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            database: RwLock::new(database),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let collection = self.collection().await;
        let index = IndexModel::builder()
            .keys(doc! {"kind": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("record_kind_idx".to_owned()))
                    .build(),
            )
            .build();

        collection
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: RECORD_COLLECTION_NAME,
                index: "kind",
                source,
            })?;

        Ok(())
    }

    async fn collection(&self) -> Collection<MongoRecordDocument> {
        let guard = self.inner.database.read().await;
        guard.collection::<MongoRecordDocument>(RECORD_COLLECTION_NAME)
    }

    async fn load(&self, key: &str) -> MongoResult<Option<MongoRecordDocument>> {
        self.collection()
            .await
            .find_one(doc_id(key))
            .await
            .map_err(|source| MongoDaoError::LoadRecord {
                key: key.to_string(),
                source,
            })
    }

    async fn save(&self, key: &str, kind: RecordKind, value: &Value) -> MongoResult<()> {
        let document = MongoRecordDocument::encode(key.to_string(), kind, value)?;
        self.collection()
            .await
            .replace_one(doc_id(key), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveRecord {
                key: key.to_string(),
                source,
            })?;
        Ok(())
    }

    /// Read-merge-write guarded by the previous payload so concurrent writers retry instead of clobbering.
    async fn merge(&self, key: &str, kind: RecordKind, partial: Value) -> MongoResult<bool> {
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let Some(existing) = self.load(key).await? else {
                return Ok(false);
            };
            let mut value = existing.decode()?;
            merge_partial(&mut value, partial.clone());
            let replacement = MongoRecordDocument::encode(key.to_string(), kind, &value)?;

            let outcome = self
                .collection()
                .await
                .replace_one(doc! {"_id": key, "payload": existing.payload.as_str()}, &replacement)
                .await
                .map_err(|source| MongoDaoError::SaveRecord {
                    key: key.to_string(),
                    source,
                })?;
            if outcome.matched_count > 0 {
                return Ok(true);
            }
            debug!(key, "record changed during merge; retrying");
        }

        Err(MongoDaoError::Conflict {
            key: key.to_string(),
            attempts: MAX_UPDATE_ATTEMPTS,
        })
    }

    async fn remove(&self, key: &str) -> MongoResult<()> {
        self.collection()
            .await
            .delete_one(doc_id(key))
            .await
            .map_err(|source| MongoDaoError::DeleteRecord {
                key: key.to_string(),
                source,
            })?;
        Ok(())
    }

    async fn list_kind(&self, kind: RecordKind) -> MongoResult<Vec<Value>> {
        let documents: Vec<MongoRecordDocument> = self
            .collection()
            .await
            .find(doc! {"kind": kind.as_str()})
            .await
            .map_err(|source| MongoDaoError::ListRecords {
                kind: kind.as_str(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListRecords {
                kind: kind.as_str(),
                source,
            })?;

        documents.iter().map(MongoRecordDocument::decode).collect()
    }
}

impl RoomStore for MongoRoomStore {
    fn get(&self, key: &RecordKey) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let store = self.clone();
        let key = key.to_string();
        Box::pin(async move {
            let document = store.load(&key).await?;
            Ok(document.map(|doc| doc.decode()).transpose()?)
        })
    }

    fn set(&self, key: &RecordKey, value: Value) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let kind = key.kind();
        let key = key.to_string();
        Box::pin(async move { store.save(&key, kind, &value).await.map_err(Into::into) })
    }

    fn update(&self, key: &RecordKey, partial: Value) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        let kind = key.kind();
        let key = key.to_string();
        Box::pin(async move { store.merge(&key, kind, partial).await.map_err(Into::into) })
    }

    fn delete(&self, key: &RecordKey) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let key = key.to_string();
        Box::pin(async move { store.remove(&key).await.map_err(Into::into) })
    }

    fn list(&self, kind: RecordKind) -> BoxFuture<'static, StorageResult<Vec<Value>>> {
        let store = self.clone();
        Box::pin(async move { store.list_kind(kind).await.map_err(Into::into) })
    }

    fn subscribe(&self, key: &RecordKey) -> BoxFuture<'static, StorageResult<Subscription>> {
        let every = self.inner.config.poll_interval;
        Box::pin(polling::poll_subscription(self.clone(), key.clone(), every))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.reconnect().await.map_err(Into::into) })
    }
}
