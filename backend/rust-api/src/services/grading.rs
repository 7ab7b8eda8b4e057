use std::collections::HashSet;

use crate::models::assessment::{Question, QuestionBody, SubmittedAnswer};

/// Normalize free text for comparison: trim, lowercase.
pub fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Grades one submission against one question. A missing submission is
/// always incorrect.
pub fn grade(question: &Question, submitted: Option<&SubmittedAnswer>) -> bool {
    let Some(submitted) = submitted else {
        return false;
    };

    match (&question.body, submitted) {
        (QuestionBody::MultipleChoice { correct_answer, .. }, SubmittedAnswer::Choice(index)) => {
            index == correct_answer
        }
        (
            QuestionBody::TextInput {
                correct_answer,
                alternatives,
            },
            SubmittedAnswer::Text(text),
        ) => {
            let answer = normalize_text(text);
            if answer.is_empty() {
                return false;
            }
            accepted_texts(correct_answer, alternatives).contains(&answer)
        }
        _ => false,
    }
}

fn accepted_texts(correct_answer: &str, alternatives: &[String]) -> HashSet<String> {
    std::iter::once(correct_answer)
        .chain(alternatives.iter().map(String::as_str))
        .map(normalize_text)
        .filter(|text| !text.is_empty())
        .collect()
}
