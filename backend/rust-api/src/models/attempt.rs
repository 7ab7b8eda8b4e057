use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::assessment::{AssessmentKind, SubmittedAnswer, DEFAULT_PASSING_SCORE};
use super::profile::ProgressionDelta;

pub const ATTEMPTS_COLLECTION: &str = "attempts";

/// Answers keyed by question id.
pub type AnswerSheet = BTreeMap<i64, SubmittedAnswer>;

/// One persisted pass through an assessment. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttemptRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub assessment_id: String,
    pub assessment_kind: AssessmentKind,
    pub score: u32,
    pub correct_count: u32,
    pub total_questions: u32,
    #[serde(default = "default_passing_score")]
    pub passing_score: u32,
    pub passed: bool,
    #[serde(default)]
    pub answers: AnswerSheet,
    /// Per-question outcomes as graded when the attempt was made.
    #[serde(default)]
    pub results: Vec<QuestionResult>,
    /// Set while a passing attempt owns its XP grant. Cleared again when the
    /// profile write is given up on, so a resubmission can finish it.
    #[serde(default)]
    pub progression_applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_taken: Option<u32>,
    #[serde(with = "millis_timestamp")]
    pub completed_at: DateTime<Utc>,
}

fn default_passing_score() -> u32 {
    DEFAULT_PASSING_SCORE
}

impl AttemptRecord {
    /// Natural key of a lesson completion; the store's primary-key
    /// uniqueness turns a second completion into a conflict.
    pub fn lesson_completion_id(user_id: &str, lesson_id: &str) -> String {
        format!("lesson:{}:{}", user_id, lesson_id)
    }

    /// The score exactly as it was recorded, independent of later edits to
    /// the assessment.
    pub fn recorded_score(&self) -> ScoreResult {
        ScoreResult {
            percentage: self.score,
            correct_count: self.correct_count,
            total_questions: self.total_questions,
            passing_score: self.passing_score,
            passed: self.passed,
            results: self.results.clone(),
        }
    }
}

/// RFC 3339 with a fixed millisecond fraction, so stored strings sort in
/// time order.
mod millis_timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|at| at.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionOutcome {
    Correct,
    Wrong,
    /// No answer was submitted; scored the same as `Wrong`.
    Skipped,
}

impl QuestionOutcome {
    pub fn is_correct(&self) -> bool {
        matches!(self, QuestionOutcome::Correct)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionResult {
    pub question_id: i64,
    pub outcome: QuestionOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreResult {
    pub percentage: u32,
    pub correct_count: u32,
    pub total_questions: u32,
    pub passing_score: u32,
    pub passed: bool,
    pub results: Vec<QuestionResult>,
}

impl ScoreResult {
    pub fn skipped_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == QuestionOutcome::Skipped)
            .count()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// A new attempt row was written.
    Recorded,
    /// The lesson was already completed; the prior attempt is returned.
    DuplicateAttempt,
    /// A lesson attempt below the passing score; nothing was written.
    NotCompleted,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Recorded => "recorded",
            SubmissionStatus::DuplicateAttempt => "duplicate_attempt",
            SubmissionStatus::NotCompleted => "not_completed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub status: SubmissionStatus,
    /// Absent for `NotCompleted`, where nothing was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<AttemptRecord>,
    pub score: ScoreResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progression: Option<ProgressionDelta>,
}
