use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{row_id, Filter, Query, RowStore, StoreError};

/// Process-local row store for local development and tests.
#[derive(Default)]
pub struct MemoryRowStore {
    collections: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(row: &Value, filters: &[Filter]) -> bool {
    filters
        .iter()
        .all(|f| row.get(&f.field).unwrap_or(&Value::Null) == &f.value)
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None, Some(_)) | (Some(Value::Null), Some(_)) => Ordering::Less,
        (Some(_), None) | (Some(_), Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Value>, StoreError> {
        let collections = self.collections.read().await;
        let mut rows: Vec<Value> = collections
            .get(collection)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches(row, &query.filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if !query.order.is_empty() {
            rows.sort_by(|a, b| {
                query
                    .order
                    .iter()
                    .map(|order| {
                        let ord = compare(a.get(&order.field), b.get(&order.field));
                        if order.descending {
                            ord.reverse()
                        } else {
                            ord
                        }
                    })
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit as usize);
        }

        Ok(rows)
    }

    async fn insert(&self, collection: &str, row: Value) -> Result<Value, StoreError> {
        if !row.is_object() {
            return Err(StoreError::InvalidRow("row must be an object".to_string()));
        }
        let id = row_id(&row)?;

        let mut collections = self.collections.write().await;
        let rows = collections.entry(collection.to_string()).or_default();
        if rows.iter().any(|existing| existing.get("_id") == row.get("_id")) {
            return Err(StoreError::Duplicate {
                collection: collection.to_string(),
                id,
            });
        }
        rows.push(row.clone());

        Ok(row)
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
        let Value::Object(patch) = patch else {
            return Err(StoreError::InvalidRow("patch must be an object".to_string()));
        };

        let mut collections = self.collections.write().await;
        let Some(row) = collections.get_mut(collection).and_then(|rows| {
            rows.iter_mut()
                .find(|row| row.get("_id").and_then(Value::as_str) == Some(id))
        }) else {
            return Ok(None);
        };
        if !matches(row, expected) {
            return Ok(None);
        }

        if let Value::Object(fields) = row {
            for (key, value) in patch {
                if key != "_id" {
                    fields.insert(key, value);
                }
            }
        }

        Ok(Some(row.clone()))
    }

    async fn count(&self, collection: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|rows| rows.iter().filter(|row| matches(row, filters)).count() as u64)
            .unwrap_or(0))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
