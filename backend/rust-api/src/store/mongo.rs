use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::options::ReturnDocument;
use mongodb::{Database, IndexModel};
use serde_json::Value;

use super::{row_id, Filter, Query, RowStore, StoreError};
use crate::metrics::track_db_operation;
use crate::models::attempt::ATTEMPTS_COLLECTION;

const DUPLICATE_KEY_CODE: i32 = 11000;

pub struct MongoRowStore {
    mongo: Database,
}

impl MongoRowStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    /// History lookups filter by learner and assessment, newest first.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let index = IndexModel::builder()
            .keys(doc! { "user_id": 1, "assessment_id": 1, "completed_at": -1 })
            .build();

        self.mongo
            .collection::<Document>(ATTEMPTS_COLLECTION)
            .create_index(index)
            .await
            .map_err(backend_error)?;

        tracing::info!("Ensured indexes on {}", ATTEMPTS_COLLECTION);
        Ok(())
    }

    fn collection(&self, name: &str) -> mongodb::Collection<Document> {
        self.mongo.collection::<Document>(name)
    }
}

fn backend_error(err: mongodb::error::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(ref we))
            if we.code == DUPLICATE_KEY_CODE
    )
}

fn to_document(value: &Value) -> Result<Document, StoreError> {
    bson::to_document(value).map_err(|e| StoreError::InvalidRow(e.to_string()))
}

fn to_row(document: Document) -> Value {
    Bson::Document(document).into_relaxed_extjson()
}

fn filter_document(filters: &[Filter]) -> Result<Document, StoreError> {
    let mut filter = Document::new();
    for f in filters {
        let value = bson::to_bson(&f.value).map_err(|e| StoreError::InvalidRow(e.to_string()))?;
        filter.insert(f.field.clone(), value);
    }
    Ok(filter)
}

#[async_trait]
impl RowStore for MongoRowStore {
    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Value>, StoreError> {
        let filter = filter_document(&query.filters)?;

        track_db_operation("select", collection, async {
            let rows = self.collection(collection);
            let mut find = rows.find(filter);
            if !query.order.is_empty() {
                let mut sort = Document::new();
                for order in &query.order {
                    sort.insert(order.field.clone(), if order.descending { -1 } else { 1 });
                }
                find = find.sort(sort);
            }
            if let Some(limit) = query.limit {
                find = find.limit(limit as i64);
            }

            let documents: Vec<Document> = find
                .await
                .map_err(backend_error)?
                .try_collect()
                .await
                .map_err(backend_error)?;

            Ok(documents.into_iter().map(to_row).collect())
        })
        .await
    }

    async fn insert(&self, collection: &str, row: Value) -> Result<Value, StoreError> {
        let id = row_id(&row)?;
        let document = to_document(&row)?;

        track_db_operation("insert", collection, async {
            match self.collection(collection).insert_one(document).await {
                Ok(_) => Ok(row),
                Err(e) if is_duplicate_key(&e) => Err(StoreError::Duplicate {
                    collection: collection.to_string(),
                    id,
                }),
                Err(e) => Err(backend_error(e)),
            }
        })
        .await
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<Value, StoreError> {
        self.update_if(collection, id, &[], patch)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })
    }

    async fn update_if(
        &self,
        collection: &str,
        id: &str,
        expected: &[Filter],
        patch: Value,
    ) -> Result<Option<Value>, StoreError> {
        let mut filter = filter_document(expected)?;
        filter.insert("_id", id);
        let mut fields = to_document(&patch)?;
        fields.remove("_id");

        track_db_operation("update", collection, async {
            self.collection(collection)
                .find_one_and_update(filter, doc! { "$set": fields })
                .return_document(ReturnDocument::After)
                .await
                .map(|updated| updated.map(to_row))
                .map_err(backend_error)
        })
        .await
    }

    async fn count(&self, collection: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        let filter = filter_document(filters)?;

        track_db_operation("count", collection, async {
            self.collection(collection)
                .count_documents(filter)
                .await
                .map_err(backend_error)
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            self.mongo.run_command(doc! { "ping": 1 }),
        )
        .await
        .map_err(|_| StoreError::Backend("MongoDB timeout after 1s".to_string()))?
        .map(|_| ())
        .map_err(backend_error)
    }
}
