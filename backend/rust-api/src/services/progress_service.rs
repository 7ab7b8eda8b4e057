use serde_json::json;
use std::sync::Arc;

use crate::models::assessment::AssessmentKind;
use crate::models::attempt::{AttemptRecord, ATTEMPTS_COLLECTION};
use crate::models::profile::{ProfileProgress, ProgressView, PROFILES_COLLECTION};
use crate::store::{self, Filter, Query, RowStore, StoreError};

pub const DEFAULT_HISTORY_LIMIT: u64 = 20;
pub const MAX_HISTORY_LIMIT: u64 = 100;

/// Read side of learner progression: dashboard summary and attempt history.
pub struct ProgressService {
    store: Arc<dyn RowStore>,
}

impl ProgressService {
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self { store }
    }

    pub async fn progress_view(&self, user_id: &str) -> Result<ProgressView, StoreError> {
        let progress: ProfileProgress =
            store::fetch_by_id(self.store.as_ref(), PROFILES_COLLECTION, user_id)
                .await?
                .unwrap_or_default();

        let lessons_completed = self
            .store
            .count(
                ATTEMPTS_COLLECTION,
                &[
                    Filter {
                        field: "user_id".to_string(),
                        value: json!(user_id),
                    },
                    Filter {
                        field: "assessment_kind".to_string(),
                        value: json!(AssessmentKind::Lesson.as_str()),
                    },
                ],
            )
            .await?;

        Ok(ProgressView {
            user_id: user_id.to_string(),
            level: progress.level(),
            progress,
            lessons_completed,
        })
    }

    /// Newest first, ties broken by id; `limit` is clamped to
    /// `1..=MAX_HISTORY_LIMIT`.
    pub async fn attempt_history(
        &self,
        user_id: &str,
        assessment_id: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Vec<AttemptRecord>, StoreError> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);

        let mut query = Query::new().eq("user_id", user_id);
        if let Some(assessment_id) = assessment_id {
            query = query.eq("assessment_id", assessment_id);
        }
        let query = query
            .order_by("completed_at", true)
            .order_by("_id", true)
            .limit(limit);

        store::select_as(self.store.as_ref(), ATTEMPTS_COLLECTION, &query).await
    }
}
