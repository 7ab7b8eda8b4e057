pub mod assessment;
pub mod attempt;
pub mod profile;

pub use assessment::{Assessment, AssessmentKind, Question, QuestionBody, SubmittedAnswer};
pub use attempt::{AnswerSheet, AttemptRecord, ScoreResult, SubmissionOutcome, SubmissionStatus};
pub use profile::{LevelInfo, ProfileProgress, ProgressView, ProgressionDelta};
