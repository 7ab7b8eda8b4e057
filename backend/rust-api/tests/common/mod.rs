#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use lingua_api::models::{Assessment, AssessmentKind, Question, QuestionBody};
use lingua_api::store::{self, Filter, MemoryRowStore, Query, RowStore, StoreError};
use lingua_api::{config::Config, create_router, services::AppState};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

/// Server-relative calendar date, as sent in the `today` field.
pub fn day_offset(days: i64) -> String {
    (Utc::now().date_naive() + Duration::days(days)).to_string()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn create_test_app() -> (Router, Arc<dyn RowStore>) {
    create_test_app_with_store(Arc::new(MemoryRowStore::new()))
}

pub fn create_test_app_with_store(store: Arc<dyn RowStore>) -> (Router, Arc<dyn RowStore>) {
    init_tracing();
    let state = Arc::new(AppState::with_store(Config::in_memory(), store.clone()));
    (create_router(state), store)
}

/// Multiple-choice question whose correct option is `id % 4`.
pub fn choice_question(id: i64) -> Question {
    Question {
        id,
        prompt: format!("Pick the translation #{}", id),
        body: QuestionBody::MultipleChoice {
            options: vec![
                "uno".to_string(),
                "dos".to_string(),
                "tres".to_string(),
                "cuatro".to_string(),
            ],
            correct_answer: (id % 4) as usize,
        },
        explanation: None,
    }
}

pub fn text_question(id: i64, correct: &str, alternatives: &[&str]) -> Question {
    Question {
        id,
        prompt: format!("Translate #{}", id),
        body: QuestionBody::TextInput {
            correct_answer: correct.to_string(),
            alternatives: alternatives.iter().map(|s| s.to_string()).collect(),
        },
        explanation: Some("Greeting".to_string()),
    }
}

pub fn quiz(id: &str, question_count: i64, passing_score: u32, xp_reward: u32) -> Assessment {
    Assessment {
        id: id.to_string(),
        kind: AssessmentKind::Quiz,
        title: format!("Quiz {}", id),
        questions: (1..=question_count).map(choice_question).collect(),
        passing_score,
        xp_reward,
        time_limit: Some(10),
    }
}

pub fn lesson(id: &str, questions: Vec<Question>, xp_reward: u32) -> Assessment {
    Assessment {
        id: id.to_string(),
        kind: AssessmentKind::Lesson,
        title: format!("Lesson {}", id),
        questions,
        passing_score: 70,
        xp_reward,
        time_limit: None,
    }
}

pub async fn seed(store: &Arc<dyn RowStore>, assessment: &Assessment) {
    store::insert_as(store.as_ref(), assessment.kind.collection(), assessment)
        .await
        .expect("seed assessment");
}

/// Answers with exactly `correct` right choices, in question order.
pub fn choice_answers(question_count: i64, correct: i64) -> Value {
    let mut answers = serde_json::Map::new();
    for id in 1..=question_count {
        let right = id % 4;
        let answer = if id <= correct { right } else { (right + 1) % 4 };
        answers.insert(id.to_string(), Value::from(answer));
    }
    Value::Object(answers)
}

pub async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).to_string())
        })
    };

    (status, json)
}

/// Memory store that fails selected operations with a backend error.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryRowStore,
    pub fail_inserts_into: Option<&'static str>,
    pub update_failures: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FlakyStore {
    pub fn failing_inserts_into(collection: &'static str) -> Self {
        Self {
            fail_inserts_into: Some(collection),
            ..Self::default()
        }
    }

    pub fn failing_updates(times: usize) -> Self {
        Self {
            update_failures: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    fn backend_down() -> StoreError {
        StoreError::Backend("connection reset".to_string())
    }
}

#[async_trait]
impl RowStore for FlakyStore {
    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Value>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.select(collection, query).await
    }

    async fn insert(&self, collection: &str, row: Value) -> Result<Value, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts_into == Some(collection) {
            return Err(Self::backend_down());
        }
        self.inner.insert(collection, row).await
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<Value, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.update_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.update_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Self::backend_down());
        }
        self.inner.update(collection, id, patch).await
    }

    async fn update_if(
        &self,
        collection: &str,
        id: &str,
        expected: &[Filter],
        patch: Value,
    ) -> Result<Option<Value>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.update_if(collection, id, expected, patch).await
    }

    async fn count(&self, collection: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.count(collection, filters).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Memory store that hands control back to the scheduler before every
/// operation, so joined futures interleave between reads and writes.
#[derive(Default)]
pub struct YieldingStore {
    inner: MemoryRowStore,
}

#[async_trait]
impl RowStore for YieldingStore {
    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Value>, StoreError> {
        tokio::task::yield_now().await;
        self.inner.select(collection, query).await
    }

    async fn insert(&self, collection: &str, row: Value) -> Result<Value, StoreError> {
        tokio::task::yield_now().await;
        self.inner.insert(collection, row).await
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<Value, StoreError> {
        tokio::task::yield_now().await;
        self.inner.update(collection, id, patch).await
    }

    async fn update_if(
        &self,
        collection: &str,
        id: &str,
        expected: &[Filter],
        patch: Value,
    ) -> Result<Option<Value>, StoreError> {
        tokio::task::yield_now().await;
        self.inner.update_if(collection, id, expected, patch).await
    }

    async fn count(&self, collection: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        tokio::task::yield_now().await;
        self.inner.count(collection, filters).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
