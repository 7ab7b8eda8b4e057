use chrono::{NaiveDate, SubsecRound, Utc};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::{progression, scoring};
use crate::metrics::{ATTEMPTS_SUBMITTED_TOTAL, PERSISTENCE_FAILURES_TOTAL, XP_AWARDED_TOTAL};
use crate::models::assessment::{Assessment, AssessmentKind, InvalidAssessment};
use crate::models::attempt::{
    AnswerSheet, AttemptRecord, ScoreResult, SubmissionOutcome, SubmissionStatus,
    ATTEMPTS_COLLECTION,
};
use crate::models::profile::{ProfileProgress, ProgressionDelta, PROFILES_COLLECTION};
use crate::store::{self, eq_filter, RowStore, StoreError};

/// What a learner handed in for one assessment.
#[derive(Debug, Clone)]
pub struct AttemptSubmission {
    pub user_id: String,
    pub answers: AnswerSheet,
    pub time_taken: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceStep {
    AttemptInsert,
    AttemptLookup,
    GrantClaim,
    ProfileRead,
    ProfileUpdate,
}

impl PersistenceStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistenceStep::AttemptInsert => "attempt_insert",
            PersistenceStep::AttemptLookup => "attempt_lookup",
            PersistenceStep::GrantClaim => "grant_claim",
            PersistenceStep::ProfileRead => "profile_read",
            PersistenceStep::ProfileUpdate => "profile_update",
        }
    }

    /// True when the attempt row is durable, this request owns its XP grant
    /// and only the profile write is missing.
    pub fn profile_pending(&self) -> bool {
        matches!(
            self,
            PersistenceStep::ProfileRead | PersistenceStep::ProfileUpdate
        )
    }
}

impl fmt::Display for PersistenceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{step} failed: {source}")]
pub struct StepFailure {
    pub step: PersistenceStep,
    #[source]
    pub source: StoreError,
}

/// The score was computed but progress was not saved.
#[derive(Debug, thiserror::Error)]
#[error("score computed but {step} failed: {source}")]
pub struct PersistenceFailure {
    pub step: PersistenceStep,
    /// Status the submission would have reported; `None` if no attempt row
    /// is known to exist.
    pub status: Option<SubmissionStatus>,
    pub score: ScoreResult,
    /// Present when the attempt row was already written.
    pub attempt: Option<AttemptRecord>,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("invalid assessment {assessment_id}: {reason}")]
    InvalidAssessment {
        assessment_id: String,
        #[source]
        reason: InvalidAssessment,
    },
    #[error(transparent)]
    Persistence(Box<PersistenceFailure>),
}

pub struct CompletionRecorder {
    store: Arc<dyn RowStore>,
}

impl CompletionRecorder {
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self { store }
    }

    /// Grades, scores and records one submission.
    ///
    /// Lessons complete at most once: the attempt id is the natural
    /// `(user, lesson)` key, so a repeat insert conflicts and the prior
    /// attempt is returned without granting XP again. Quizzes always record
    /// a new attempt and earn XP on every pass.
    ///
    /// A passing attempt is written with `progression_applied` set, which
    /// makes this request the owner of the XP grant. If the grant is later
    /// released (see [`Self::release_grant`]), the next duplicate submission
    /// claims and finishes it.
    pub async fn submit_attempt(
        &self,
        assessment: &Assessment,
        submission: AttemptSubmission,
        today: NaiveDate,
    ) -> Result<SubmissionOutcome, CompletionError> {
        tracing::info!(
            "Processing attempt submission: user={}, {}={}, answers={}",
            submission.user_id,
            assessment.kind.as_str(),
            assessment.id,
            submission.answers.len()
        );

        let score = scoring::score(assessment, &submission.answers).map_err(|reason| {
            tracing::warn!("Rejecting submission for {}: {}", assessment.id, reason);
            CompletionError::InvalidAssessment {
                assessment_id: assessment.id.clone(),
                reason,
            }
        })?;

        if assessment.kind == AssessmentKind::Lesson && !score.passed {
            tracing::info!(
                "Lesson {} not completed by {}: {}% < {}%",
                assessment.id,
                submission.user_id,
                score.percentage,
                score.passing_score
            );
            record_submission(assessment.kind, SubmissionStatus::NotCompleted, false);
            return Ok(SubmissionOutcome {
                status: SubmissionStatus::NotCompleted,
                attempt: None,
                score,
                progression: None,
            });
        }

        let attempt = build_attempt(assessment, submission, &score);

        match store::insert_as(self.store.as_ref(), ATTEMPTS_COLLECTION, &attempt).await {
            Ok(_) => {}
            Err(e) if e.is_duplicate() && !assessment.kind.is_retakeable() => {
                return self
                    .prior_completion(assessment, &attempt.id, score, today)
                    .await;
            }
            Err(source) => {
                return Err(persistence_failure(
                    PersistenceStep::AttemptInsert,
                    None,
                    score,
                    None,
                    source,
                ));
            }
        }

        tracing::info!(
            "Attempt recorded: id={}, score={}%, passed={}",
            attempt.id,
            score.percentage,
            score.passed
        );

        let progression = if score.passed {
            match self
                .apply_progression(&attempt.user_id, assessment.xp_reward, today)
                .await
            {
                Ok(delta) => Some(delta),
                Err(failure) => {
                    return Err(persistence_failure(
                        failure.step,
                        Some(SubmissionStatus::Recorded),
                        score,
                        Some(attempt),
                        failure.source,
                    ));
                }
            }
        } else {
            None
        };

        record_submission(assessment.kind, SubmissionStatus::Recorded, score.passed);

        Ok(SubmissionOutcome {
            status: SubmissionStatus::Recorded,
            attempt: Some(attempt),
            score,
            progression,
        })
    }

    /// Re-reads the learner's profile and applies one passing completion.
    ///
    /// Callers may retry this alone while they own the attempt's grant. A
    /// profile row is created on first use; losing that creation race to a
    /// concurrent submission falls back to updating the winner's row.
    pub async fn apply_progression(
        &self,
        user_id: &str,
        xp_reward: u32,
        today: NaiveDate,
    ) -> Result<ProgressionDelta, StepFailure> {
        let delta = match self.write_progression(user_id, xp_reward, today).await {
            Err(failure) if failure.source.is_duplicate() => {
                tracing::debug!("Profile for {} created concurrently, re-reading", user_id);
                self.write_progression(user_id, xp_reward, today).await?
            }
            other => other?,
        };

        XP_AWARDED_TOTAL.inc_by(delta.xp_awarded);
        tracing::info!(
            "Progression updated: user={}, xp={} (+{}), streak={}, level={}",
            user_id,
            delta.updated.xp_points,
            delta.xp_awarded,
            delta.updated.current_streak,
            delta.level.level
        );

        Ok(delta)
    }

    /// Gives up ownership of an attempt's XP grant so a later duplicate
    /// submission can finish it. Returns false if the grant was not held.
    pub async fn release_grant(&self, attempt: &AttemptRecord) -> Result<bool, StoreError> {
        let released = self
            .store
            .update_if(
                ATTEMPTS_COLLECTION,
                &attempt.id,
                &[eq_filter("progression_applied", true)],
                json!({ "progression_applied": false }),
            )
            .await?
            .is_some();

        if released {
            tracing::warn!("Released XP grant of attempt {} for a later retry", attempt.id);
        }
        Ok(released)
    }

    async fn write_progression(
        &self,
        user_id: &str,
        xp_reward: u32,
        today: NaiveDate,
    ) -> Result<ProgressionDelta, StepFailure> {
        let existing: Option<ProfileProgress> =
            store::fetch_by_id(self.store.as_ref(), PROFILES_COLLECTION, user_id)
                .await
                .map_err(|source| StepFailure {
                    step: PersistenceStep::ProfileRead,
                    source,
                })?;

        let profile = existing.clone().unwrap_or_default();
        let delta = progression::progression_delta(&profile, true, xp_reward, today);

        let write = async {
            let mut row = serde_json::to_value(&delta.updated)?;
            if existing.is_some() {
                self.store.update(PROFILES_COLLECTION, user_id, row).await
            } else {
                row["_id"] = serde_json::Value::String(user_id.to_string());
                self.store.insert(PROFILES_COLLECTION, row).await
            }
        };
        write.await.map_err(|source| StepFailure {
            step: PersistenceStep::ProfileUpdate,
            source,
        })?;

        Ok(delta)
    }

    /// Claims an unapplied grant. True means this caller now owns it.
    async fn claim_grant(&self, attempt: &AttemptRecord) -> Result<bool, StoreError> {
        Ok(self
            .store
            .update_if(
                ATTEMPTS_COLLECTION,
                &attempt.id,
                &[eq_filter("progression_applied", false)],
                json!({ "progression_applied": true }),
            )
            .await?
            .is_some())
    }

    async fn prior_completion(
        &self,
        assessment: &Assessment,
        attempt_id: &str,
        score: ScoreResult,
        today: NaiveDate,
    ) -> Result<SubmissionOutcome, CompletionError> {
        let lookup =
            store::fetch_by_id::<AttemptRecord>(self.store.as_ref(), ATTEMPTS_COLLECTION, attempt_id)
                .await
                .and_then(|prior| {
                    prior.ok_or_else(|| StoreError::NotFound {
                        collection: ATTEMPTS_COLLECTION.to_string(),
                        id: attempt_id.to_string(),
                    })
                });
        let mut prior = match lookup {
            Ok(prior) => prior,
            Err(source) => {
                return Err(persistence_failure(
                    PersistenceStep::AttemptLookup,
                    None,
                    score,
                    None,
                    source,
                ));
            }
        };
        let recorded = prior.recorded_score();

        tracing::info!(
            "Lesson {} already completed by {} (attempt {}), returning prior result",
            assessment.id,
            prior.user_id,
            prior.id
        );

        let mut progression = None;
        if prior.passed && !prior.progression_applied {
            let claimed = match self.claim_grant(&prior).await {
                Ok(claimed) => claimed,
                Err(source) => {
                    return Err(persistence_failure(
                        PersistenceStep::GrantClaim,
                        Some(SubmissionStatus::DuplicateAttempt),
                        recorded,
                        Some(prior),
                        source,
                    ));
                }
            };

            if claimed {
                tracing::info!("Finishing unapplied XP grant of attempt {}", prior.id);
                prior.progression_applied = true;
                match self
                    .apply_progression(&prior.user_id, assessment.xp_reward, today)
                    .await
                {
                    Ok(delta) => progression = Some(delta),
                    Err(failure) => {
                        return Err(persistence_failure(
                            failure.step,
                            Some(SubmissionStatus::DuplicateAttempt),
                            recorded,
                            Some(prior),
                            failure.source,
                        ));
                    }
                }
            }
        }

        record_submission(
            assessment.kind,
            SubmissionStatus::DuplicateAttempt,
            prior.passed,
        );

        Ok(SubmissionOutcome {
            status: SubmissionStatus::DuplicateAttempt,
            attempt: Some(prior),
            score: recorded,
            progression,
        })
    }
}

fn build_attempt(
    assessment: &Assessment,
    submission: AttemptSubmission,
    score: &ScoreResult,
) -> AttemptRecord {
    let id = match assessment.kind {
        AssessmentKind::Lesson => {
            AttemptRecord::lesson_completion_id(&submission.user_id, &assessment.id)
        }
        AssessmentKind::Quiz => Uuid::new_v4().to_string(),
    };

    AttemptRecord {
        id,
        user_id: submission.user_id,
        assessment_id: assessment.id.clone(),
        assessment_kind: assessment.kind,
        score: score.percentage,
        correct_count: score.correct_count,
        total_questions: score.total_questions,
        passing_score: score.passing_score,
        passed: score.passed,
        answers: submission.answers,
        results: score.results.clone(),
        progression_applied: score.passed,
        time_taken: submission.time_taken,
        completed_at: Utc::now().trunc_subsecs(3),
    }
}

fn persistence_failure(
    step: PersistenceStep,
    status: Option<SubmissionStatus>,
    score: ScoreResult,
    attempt: Option<AttemptRecord>,
    source: StoreError,
) -> CompletionError {
    tracing::error!("Submission scored but not saved ({}): {}", step, source);
    PERSISTENCE_FAILURES_TOTAL
        .with_label_values(&[step.as_str()])
        .inc();

    CompletionError::Persistence(Box::new(PersistenceFailure {
        step,
        status,
        score,
        attempt,
        source,
    }))
}

fn record_submission(kind: AssessmentKind, status: SubmissionStatus, passed: bool) {
    ATTEMPTS_SUBMITTED_TOTAL
        .with_label_values(&[kind.as_str(), status.as_str(), if passed { "true" } else { "false" }])
        .inc();
}
