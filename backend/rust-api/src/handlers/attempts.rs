use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use super::{api_error, ApiError};
use crate::extractors::AppJson;
use crate::models::assessment::{Assessment, AssessmentKind};
use crate::models::attempt::{AnswerSheet, AttemptRecord, ScoreResult, SubmissionStatus};
use crate::models::profile::ProgressionDelta;
use crate::services::{
    catalog_service::CatalogService,
    completion_service::{
        AttemptSubmission, CompletionError, CompletionRecorder, PersistenceFailure, StepFailure,
    },
    idempotency_cache::IdempotencyCache,
    AppState,
};
use crate::store::StoreError;
use crate::utils::retry::{retry_async_if, RetryConfig};

/// How far a client-supplied `today` may drift from the server's UTC date.
/// One day covers every time zone.
const MAX_CLOCK_SKEW_DAYS: i64 = 1;

const UNSAVED_WARNING: &str = "Your score was calculated but progress was not saved";

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAttemptRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
    #[serde(default)]
    pub answers: AnswerSheet,
    /// Seconds spent on the attempt.
    #[validate(range(max = 86400))]
    pub time_taken: Option<u32>,
    /// Learner's calendar date; defaults to the current UTC date.
    pub today: Option<NaiveDate>,
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAttemptResponse {
    /// Absent when nothing was persisted.
    pub status: Option<SubmissionStatus>,
    pub progress_saved: bool,
    pub score: ScoreResult,
    #[serde(default)]
    pub skipped_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<AttemptRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progression: Option<ProgressionDelta>,
    #[serde(default)]
    pub leveled_up: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl SubmitAttemptResponse {
    fn new(
        status: Option<SubmissionStatus>,
        score: ScoreResult,
        attempt: Option<AttemptRecord>,
        progression: Option<ProgressionDelta>,
    ) -> Self {
        Self {
            status,
            progress_saved: true,
            skipped_count: score.skipped_count(),
            leveled_up: progression.as_ref().is_some_and(|d| d.leveled_up()),
            score,
            attempt,
            progression,
            failed_step: None,
            warning: None,
        }
    }

    fn unsaved(
        status: Option<SubmissionStatus>,
        score: ScoreResult,
        attempt: Option<AttemptRecord>,
        step: &str,
    ) -> Self {
        Self {
            progress_saved: false,
            failed_step: Some(step.to_string()),
            warning: Some(UNSAVED_WARNING.to_string()),
            ..Self::new(status, score, attempt, None)
        }
    }

    fn status_code(&self) -> StatusCode {
        match self.status {
            Some(SubmissionStatus::Recorded) if self.progress_saved => StatusCode::CREATED,
            _ => StatusCode::OK,
        }
    }
}

pub async fn submit_lesson_attempt(
    State(state): State<Arc<AppState>>,
    Path(lesson_id): Path<String>,
    AppJson(req): AppJson<SubmitAttemptRequest>,
) -> Result<(StatusCode, Json<SubmitAttemptResponse>), ApiError> {
    submit(state, AssessmentKind::Lesson, lesson_id, req).await
}

pub async fn submit_quiz_attempt(
    State(state): State<Arc<AppState>>,
    Path(quiz_id): Path<String>,
    AppJson(req): AppJson<SubmitAttemptRequest>,
) -> Result<(StatusCode, Json<SubmitAttemptResponse>), ApiError> {
    submit(state, AssessmentKind::Quiz, quiz_id, req).await
}

async fn submit(
    state: Arc<AppState>,
    kind: AssessmentKind,
    assessment_id: String,
    req: SubmitAttemptRequest,
) -> Result<(StatusCode, Json<SubmitAttemptResponse>), ApiError> {
    tracing::info!(
        "Submitting {} attempt: {}={}, user={}",
        kind.as_str(),
        kind.as_str(),
        assessment_id,
        req.user_id
    );

    req.validate()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let today = resolve_today(req.today, Utc::now().date_naive())?;

    let cache = state.redis.clone().map(IdempotencyCache::new);
    let cache_key = req
        .idempotency_key
        .as_deref()
        .map(|key| IdempotencyCache::cache_key(&req.user_id, kind, &assessment_id, key));
    if let (Some(cache), Some(key)) = (&cache, &cache_key) {
        match cache.get::<SubmitAttemptResponse>(key).await {
            Ok(Some(cached)) => return Ok((cached.status_code(), Json(cached))),
            Ok(None) => {}
            Err(e) => tracing::warn!("Idempotency lookup failed, processing anyway: {:#}", e),
        }
    }

    let catalog = CatalogService::new(state.store.clone(), state.config.quizzes);
    let assessment = catalog
        .load(kind, &assessment_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load {} {}: {}", kind.as_str(), assessment_id, e);
            api_error(StatusCode::SERVICE_UNAVAILABLE, "Assessment store unavailable")
        })?
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                format!("{} {} not found", kind.as_str(), assessment_id),
            )
        })?;

    let playability = catalog.playability(&assessment);
    if !playability.playable {
        return Err(api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            playability.warnings.join("; "),
        ));
    }

    let recorder = CompletionRecorder::new(state.store.clone());
    let submission = AttemptSubmission {
        user_id: req.user_id.clone(),
        answers: req.answers,
        time_taken: req.time_taken,
    };

    let response = match recorder.submit_attempt(&assessment, submission, today).await {
        Ok(outcome) => SubmitAttemptResponse::new(
            Some(outcome.status),
            outcome.score,
            outcome.attempt,
            outcome.progression,
        ),
        Err(CompletionError::InvalidAssessment { reason, .. }) => {
            return Err(api_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("Invalid assessment: {}", reason),
            ));
        }
        Err(CompletionError::Persistence(failure)) => {
            recover_progression(&recorder, &assessment, today, *failure).await
        }
    };

    if response.progress_saved {
        if let (Some(cache), Some(key)) = (&cache, &cache_key) {
            if let Err(e) = cache.put(key, &response).await {
                tracing::warn!("Failed to cache attempt response: {:#}", e);
            }
        }
    }

    Ok((response.status_code(), Json(response)))
}

/// Accepts the learner's calendar date only when it is plausibly "today"
/// somewhere on earth.
fn resolve_today(
    requested: Option<NaiveDate>,
    server_today: NaiveDate,
) -> Result<NaiveDate, ApiError> {
    let Some(today) = requested else {
        return Ok(server_today);
    };

    if (today - server_today).num_days().abs() > MAX_CLOCK_SKEW_DAYS {
        return Err(api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!(
                "today must be within {} day of the server date {}",
                MAX_CLOCK_SKEW_DAYS, server_today
            ),
        ));
    }
    Ok(today)
}

/// The score is always returned. When this request owns a durable attempt's
/// XP grant, the profile update is retried; if it still fails the grant is
/// released so resubmitting the lesson can finish it.
async fn recover_progression(
    recorder: &CompletionRecorder,
    assessment: &Assessment,
    today: NaiveDate,
    failure: PersistenceFailure,
) -> SubmitAttemptResponse {
    let PersistenceFailure {
        step,
        status,
        score,
        mut attempt,
        source,
    } = failure;

    if let (true, Some(recorded)) = (step.profile_pending(), attempt.as_mut()) {
        let retried = retry_async_if(
            RetryConfig::default(),
            || async {
                recorder
                    .apply_progression(&recorded.user_id, assessment.xp_reward, today)
                    .await
            },
            |failure: &StepFailure| matches!(failure.source, StoreError::Backend(_)),
        )
        .await;

        match retried {
            Ok(delta) => {
                tracing::info!("Profile update succeeded on retry for attempt {}", recorded.id);
                return SubmitAttemptResponse::new(status, score, attempt, Some(delta));
            }
            Err(_) => match recorder.release_grant(recorded).await {
                Ok(true) => recorded.progression_applied = false,
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    "Could not release XP grant of attempt {}: {}",
                    recorded.id,
                    e
                ),
            },
        }
    }

    tracing::error!("Progress not saved ({}): {}", step, source);

    SubmitAttemptResponse::unsaved(status, score, attempt, step.as_str())
}
