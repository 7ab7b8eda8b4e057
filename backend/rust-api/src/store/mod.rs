//! Row Store collaborator: CRUD plus filter/order/limit queries over named
//! collections of JSON rows. Rows carry their primary key in `_id`.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

pub mod memory;
pub mod mongo;

pub use memory::MemoryRowStore;
pub use mongo::MongoRowStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("row {id} already exists in {collection}")]
    Duplicate { collection: String, id: String },
    #[error("row {id} not found in {collection}")]
    NotFound { collection: String, id: String },
    #[error("invalid row: {0}")]
    InvalidRow(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::InvalidRow(err.to_string())
    }
}

/// Equality filter on a top-level field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    /// Sort keys, most significant first.
    pub order: Vec<OrderBy>,
    pub limit: Option<u64>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(eq_filter(field, value));
        self
    }

    pub fn order_by(mut self, field: &str, descending: bool) -> Self {
        self.order.push(OrderBy {
            field: field.to_string(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
pub trait RowStore: Send + Sync {
    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Value>, StoreError>;

    /// Inserts a row whose `_id` must be unused, else `StoreError::Duplicate`.
    async fn insert(&self, collection: &str, row: Value) -> Result<Value, StoreError>;

    /// Merges `patch` into the row's top-level fields and returns the result.
    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<Value, StoreError>;

    /// Atomic compare-and-set: applies `patch` only if the row exists and
    /// matches every `expected` filter. `None` means nothing was changed.
    async fn update_if(
        &self,
        collection: &str,
        id: &str,
        expected: &[Filter],
        patch: Value,
    ) -> Result<Option<Value>, StoreError>;

    async fn count(&self, collection: &str, filters: &[Filter]) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub fn eq_filter(field: &str, value: impl Into<Value>) -> Filter {
    Filter {
        field: field.to_string(),
        value: value.into(),
    }
}

pub async fn fetch_by_id<T: DeserializeOwned>(
    store: &dyn RowStore,
    collection: &str,
    id: &str,
) -> Result<Option<T>, StoreError> {
    let rows = store
        .select(collection, &Query::new().eq("_id", id).limit(1))
        .await?;
    rows.into_iter()
        .next()
        .map(serde_json::from_value)
        .transpose()
        .map_err(StoreError::from)
}

pub async fn select_as<T: DeserializeOwned>(
    store: &dyn RowStore,
    collection: &str,
    query: &Query,
) -> Result<Vec<T>, StoreError> {
    store
        .select(collection, query)
        .await?
        .into_iter()
        .map(|row| serde_json::from_value(row).map_err(StoreError::from))
        .collect()
}

pub async fn insert_as<T: Serialize + DeserializeOwned>(
    store: &dyn RowStore,
    collection: &str,
    row: &T,
) -> Result<T, StoreError> {
    let inserted = store.insert(collection, serde_json::to_value(row)?).await?;
    Ok(serde_json::from_value(inserted)?)
}

pub(crate) fn row_id(row: &Value) -> Result<String, StoreError> {
    match row.get("_id") {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(other) => Err(StoreError::InvalidRow(format!(
            "_id must be a string, got {}",
            other
        ))),
        None => Err(StoreError::InvalidRow("row has no _id".to_string())),
    }
}
