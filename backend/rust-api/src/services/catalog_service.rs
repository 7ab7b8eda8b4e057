use serde::Serialize;
use std::sync::Arc;

use crate::config::QuizSettings;
use crate::models::assessment::{Assessment, AssessmentKind};
use crate::store::{self, RowStore, StoreError};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Playability {
    pub question_count: usize,
    pub playable: bool,
    pub warnings: Vec<String>,
}

/// Loads lessons and quizzes and decides whether a quiz may be played.
pub struct CatalogService {
    store: Arc<dyn RowStore>,
    quizzes: QuizSettings,
}

impl CatalogService {
    pub fn new(store: Arc<dyn RowStore>, quizzes: QuizSettings) -> Self {
        Self { store, quizzes }
    }

    pub async fn load(
        &self,
        kind: AssessmentKind,
        id: &str,
    ) -> Result<Option<Assessment>, StoreError> {
        let assessment: Option<Assessment> =
            store::fetch_by_id(self.store.as_ref(), kind.collection(), id).await?;

        // A row filed under the wrong collection is treated as missing.
        Ok(assessment.filter(|a| a.kind == kind))
    }

    /// One canonical minimum (`min_questions`) gates play; falling short of
    /// `recommended_questions` only produces a warning.
    pub fn playability(&self, assessment: &Assessment) -> Playability {
        let question_count = assessment.questions.len();
        let mut warnings = Vec::new();

        if assessment.kind != AssessmentKind::Quiz {
            return Playability {
                question_count,
                playable: question_count > 0,
                warnings,
            };
        }

        let playable = question_count >= self.quizzes.min_questions;
        if !playable {
            warnings.push(format!(
                "Quiz needs at least {} questions, has {}",
                self.quizzes.min_questions, question_count
            ));
        } else if question_count < self.quizzes.recommended_questions {
            warnings.push(format!(
                "Quizzes are recommended to have {} questions, this one has {}",
                self.quizzes.recommended_questions, question_count
            ));
        }

        Playability {
            question_count,
            playable,
            warnings,
        }
    }
}
