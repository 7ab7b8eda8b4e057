use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Passing threshold applied when an assessment does not configure one.
pub const DEFAULT_PASSING_SCORE: u32 = 70;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AssessmentKind {
    Lesson,
    Quiz,
}

impl AssessmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssessmentKind::Lesson => "lesson",
            AssessmentKind::Quiz => "quiz",
        }
    }

    /// Row Store collection holding assessments of this kind.
    pub fn collection(&self) -> &'static str {
        match self {
            AssessmentKind::Lesson => "lessons",
            AssessmentKind::Quiz => "quizzes",
        }
    }

    /// Lessons are completed once; quizzes may be retaken freely.
    pub fn is_retakeable(&self) -> bool {
        matches!(self, AssessmentKind::Quiz)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionBody {
    MultipleChoice {
        options: Vec<String>,
        correct_answer: usize,
    },
    TextInput {
        correct_answer: String,
        #[serde(default)]
        alternatives: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Question {
    pub id: i64,
    pub prompt: String,
    #[serde(flatten)]
    pub body: QuestionBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl Question {
    fn validate(&self) -> Result<(), InvalidAssessment> {
        match &self.body {
            QuestionBody::MultipleChoice {
                options,
                correct_answer,
            } => {
                if *correct_answer >= options.len() {
                    return Err(InvalidAssessment::OptionOutOfRange {
                        question_id: self.id,
                        index: *correct_answer,
                        options: options.len(),
                    });
                }
            }
            QuestionBody::TextInput { correct_answer, .. } => {
                if correct_answer.trim().is_empty() {
                    return Err(InvalidAssessment::EmptyCanonicalAnswer {
                        question_id: self.id,
                    });
                }
            }
        }
        Ok(())
    }
}

/// A lesson or quiz: ordered questions plus pass/reward configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assessment {
    #[serde(rename = "_id")]
    pub id: String,
    pub kind: AssessmentKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default = "default_passing_score")]
    pub passing_score: u32,
    #[serde(default)]
    pub xp_reward: u32,
    /// Minutes; absent means untimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<u32>,
}

fn default_passing_score() -> u32 {
    DEFAULT_PASSING_SCORE
}

impl Assessment {
    /// Checks the structural invariants scoring relies on.
    pub fn validate(&self) -> Result<(), InvalidAssessment> {
        if self.questions.is_empty() {
            return Err(InvalidAssessment::NoQuestions);
        }
        if self.passing_score > 100 {
            return Err(InvalidAssessment::PassingScoreOutOfRange(self.passing_score));
        }
        if self.time_limit == Some(0) {
            return Err(InvalidAssessment::ZeroTimeLimit);
        }

        let mut seen = HashSet::with_capacity(self.questions.len());
        for question in &self.questions {
            if !seen.insert(question.id) {
                return Err(InvalidAssessment::DuplicateQuestionId(question.id));
            }
            question.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidAssessment {
    #[error("assessment has no questions")]
    NoQuestions,
    #[error("question id {0} appears more than once")]
    DuplicateQuestionId(i64),
    #[error("question {question_id}: correct option {index} is out of range ({options} options)")]
    OptionOutOfRange {
        question_id: i64,
        index: usize,
        options: usize,
    },
    #[error("question {question_id}: canonical answer is empty")]
    EmptyCanonicalAnswer { question_id: i64 },
    #[error("passing score {0} is above 100")]
    PassingScoreOutOfRange(u32),
    #[error("time limit must be positive when present")]
    ZeroTimeLimit,
}

/// A learner's answer to one question: an option index or free text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SubmittedAnswer {
    Choice(usize),
    Text(String),
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn choice(id: i64, correct: usize) -> Question {
        Question {
            id,
            prompt: format!("Question {}", id),
            body: QuestionBody::MultipleChoice {
                options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                correct_answer: correct,
            },
            explanation: None,
        }
    }

    pub fn text(id: i64, correct: &str, alternatives: &[&str]) -> Question {
        Question {
            id,
            prompt: format!("Translate #{}", id),
            body: QuestionBody::TextInput {
                correct_answer: correct.to_string(),
                alternatives: alternatives.iter().map(|s| s.to_string()).collect(),
            },
            explanation: Some("See the vocabulary list".into()),
        }
    }

    pub fn quiz(id: &str, questions: Vec<Question>, passing_score: u32, xp_reward: u32) -> Assessment {
        Assessment {
            id: id.to_string(),
            kind: AssessmentKind::Quiz,
            title: "Quiz".into(),
            questions,
            passing_score,
            xp_reward,
            time_limit: None,
        }
    }

    pub fn lesson(id: &str, questions: Vec<Question>, xp_reward: u32) -> Assessment {
        Assessment {
            id: id.to_string(),
            kind: AssessmentKind::Lesson,
            title: "Lesson".into(),
            questions,
            passing_score: DEFAULT_PASSING_SCORE,
            xp_reward,
            time_limit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn passing_score_defaults_to_seventy() {
        let parsed: Assessment = serde_json::from_value(json!({
            "_id": "lesson-1",
            "kind": "lesson",
            "questions": [
                {"id": 1, "prompt": "Hello?", "kind": "text_input", "correct_answer": "hola"}
            ]
        }))
        .expect("lesson should deserialize");

        assert_eq!(parsed.passing_score, 70);
        assert_eq!(parsed.xp_reward, 0);
        assert_eq!(
            parsed.questions[0].body,
            QuestionBody::TextInput {
                correct_answer: "hola".into(),
                alternatives: vec![]
            }
        );
    }

    #[test]
    fn question_kind_is_flattened() {
        let value = serde_json::to_value(choice(3, 1)).unwrap();
        assert_eq!(value["kind"], "multiple_choice");
        assert_eq!(value["correct_answer"], 1);
        assert_eq!(value["options"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn submitted_answer_is_untagged() {
        let choice: SubmittedAnswer = serde_json::from_value(json!(2)).unwrap();
        let text: SubmittedAnswer = serde_json::from_value(json!("hola")).unwrap();
        assert_eq!(choice, SubmittedAnswer::Choice(2));
        assert_eq!(text, SubmittedAnswer::Text("hola".into()));
    }

    #[test]
    fn rejects_empty_assessment() {
        let quiz = quiz("q", vec![], 60, 10);
        assert_eq!(quiz.validate(), Err(InvalidAssessment::NoQuestions));
    }

    #[test]
    fn rejects_out_of_range_option() {
        let quiz = quiz("q", vec![choice(1, 4)], 60, 10);
        assert_eq!(
            quiz.validate(),
            Err(InvalidAssessment::OptionOutOfRange {
                question_id: 1,
                index: 4,
                options: 4
            })
        );
    }

    #[test]
    fn rejects_blank_canonical_text() {
        let quiz = quiz("q", vec![text(1, "   ", &[])], 60, 10);
        assert_eq!(
            quiz.validate(),
            Err(InvalidAssessment::EmptyCanonicalAnswer { question_id: 1 })
        );
    }

    #[test]
    fn rejects_duplicate_question_ids() {
        let quiz = quiz("q", vec![choice(1, 0), text(1, "hola", &[])], 60, 10);
        assert_eq!(
            quiz.validate(),
            Err(InvalidAssessment::DuplicateQuestionId(1))
        );
    }

    #[test]
    fn rejects_bad_configuration() {
        let mut quiz = quiz("q", vec![choice(1, 0)], 101, 10);
        assert_eq!(
            quiz.validate(),
            Err(InvalidAssessment::PassingScoreOutOfRange(101))
        );

        quiz.passing_score = 60;
        quiz.time_limit = Some(0);
        assert_eq!(quiz.validate(), Err(InvalidAssessment::ZeroTimeLimit));

        quiz.time_limit = Some(15);
        assert!(quiz.validate().is_ok());
    }

    #[test]
    fn only_quizzes_are_retakeable() {
        assert_eq!(AssessmentKind::Quiz.collection(), "quizzes");
        assert_eq!(AssessmentKind::Lesson.collection(), "lessons");
        assert!(AssessmentKind::Quiz.is_retakeable());
        assert!(!AssessmentKind::Lesson.is_retakeable());
    }
}
