use crate::models::assessment::{Assessment, InvalidAssessment};
use crate::models::attempt::{AnswerSheet, QuestionOutcome, QuestionResult, ScoreResult};

use super::grading::grade;

/// Grades every question in list order and aggregates the result.
///
/// Skipped questions count against the score exactly like wrong answers but
/// keep their own outcome tag so the UI can tell them apart.
pub fn score(assessment: &Assessment, answers: &AnswerSheet) -> Result<ScoreResult, InvalidAssessment> {
    assessment.validate()?;

    let results: Vec<QuestionResult> = assessment
        .questions
        .iter()
        .map(|question| {
            let submitted = answers.get(&question.id);
            let outcome = match submitted {
                None => QuestionOutcome::Skipped,
                Some(_) if grade(question, submitted) => QuestionOutcome::Correct,
                Some(_) => QuestionOutcome::Wrong,
            };
            QuestionResult {
                question_id: question.id,
                outcome,
                explanation: question.explanation.clone(),
            }
        })
        .collect();

    let total_questions = results.len() as u32;
    let correct_count = results.iter().filter(|r| r.outcome.is_correct()).count() as u32;
    let percentage = percentage(correct_count, total_questions);

    Ok(ScoreResult {
        percentage,
        correct_count,
        total_questions,
        passing_score: assessment.passing_score,
        passed: percentage >= assessment.passing_score,
        results,
    })
}

/// `round(correct / total * 100)`, half rounding up. `total` must be > 0.
fn percentage(correct: u32, total: u32) -> u32 {
    let (correct, total) = (u64::from(correct), u64::from(total));
    ((correct * 200 + total) / (2 * total)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::assessment::fixtures::{choice, quiz, text};
    use crate::models::assessment::SubmittedAnswer;

    fn ten_question_quiz(passing_score: u32) -> Assessment {
        quiz(
            "quiz-10",
            (1..=10).map(|id| choice(id, (id % 4) as usize)).collect(),
            passing_score,
            50,
        )
    }

    fn answers_with_correct(assessment: &Assessment, correct: usize) -> AnswerSheet {
        assessment
            .questions
            .iter()
            .enumerate()
            .map(|(i, q)| {
                let right = (q.id % 4) as usize;
                let answer = if i < correct { right } else { (right + 1) % 4 };
                (q.id, SubmittedAnswer::Choice(answer))
            })
            .collect()
    }

    #[test]
    fn seven_of_ten_passes_at_sixty() {
        let assessment = ten_question_quiz(60);
        let result = score(&assessment, &answers_with_correct(&assessment, 7)).unwrap();

        assert_eq!(result.percentage, 70);
        assert_eq!(result.correct_count, 7);
        assert_eq!(result.total_questions, 10);
        assert!(result.passed);
    }

    #[test]
    fn pass_boundary_is_inclusive() {
        let assessment = ten_question_quiz(70);
        let answers = answers_with_correct(&assessment, 7);
        assert!(score(&assessment, &answers).unwrap().passed);

        let assessment = ten_question_quiz(71);
        assert!(!score(&assessment, &answers).unwrap().passed);
    }

    #[test]
    fn rounding_is_half_up() {
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 8), 13); // 12.5
        assert_eq!(percentage(0, 5), 0);
        assert_eq!(percentage(5, 5), 100);
    }

    #[test]
    fn skipped_questions_are_tagged_but_scored_as_wrong() {
        let assessment = quiz(
            "mixed",
            vec![choice(1, 0), text(2, "hola", &[]), choice(3, 2)],
            50,
            10,
        );
        let mut answers = AnswerSheet::new();
        answers.insert(1, SubmittedAnswer::Choice(0));
        answers.insert(3, SubmittedAnswer::Choice(1));

        let result = score(&assessment, &answers).unwrap();
        let outcomes: Vec<_> = result.results.iter().map(|r| r.outcome).collect();

        assert_eq!(
            outcomes,
            vec![
                QuestionOutcome::Correct,
                QuestionOutcome::Skipped,
                QuestionOutcome::Wrong
            ]
        );
        assert_eq!(result.skipped_count(), 1);
        assert_eq!(result.percentage, 33);
        assert!(!result.passed);
        assert_eq!(result.results[1].explanation.as_deref(), Some("See the vocabulary list"));
    }

    #[test]
    fn answers_for_unknown_questions_are_ignored() {
        let assessment = quiz("q", vec![choice(1, 0)], 60, 10);
        let mut answers = AnswerSheet::new();
        answers.insert(1, SubmittedAnswer::Choice(0));
        answers.insert(99, SubmittedAnswer::Choice(0));

        let result = score(&assessment, &answers).unwrap();
        assert_eq!(result.total_questions, 1);
        assert_eq!(result.percentage, 100);
    }

    #[test]
    fn empty_assessment_cannot_be_scored() {
        let assessment = quiz("empty", vec![], 60, 10);
        assert_eq!(
            score(&assessment, &AnswerSheet::new()),
            Err(InvalidAssessment::NoQuestions)
        );
    }

    #[test]
    fn scoring_is_deterministic() {
        let assessment = ten_question_quiz(60);
        let answers = answers_with_correct(&assessment, 4);
        assert_eq!(
            score(&assessment, &answers).unwrap(),
            score(&assessment, &answers).unwrap()
        );
    }
}
