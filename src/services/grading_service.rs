use std::collections::BTreeSet;

use serde::Serialize;

use crate::models::answer::UserAnswer;
use crate::models::question::{AnswerValue, Question, QuestionKind};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeOutcome {
    /// One answer per question, in question order, with `is_correct` set.
    pub answers: Vec<UserAnswer>,
    pub earned_points: u64,
    pub total_points: u64,
    /// Percentage, 0 to 100, rounded to two decimals.
    pub score: f64,
    pub needs_review: bool,
}

pub struct GradingService;

impl GradingService {
    /// Grades `answers` against `questions`. Essays are never auto-graded:
    /// they earn no points and set `needs_review` when answered. Unanswered
    /// questions are incorrect.
    pub fn grade(questions: &[Question], answers: &[UserAnswer]) -> GradeOutcome {
        let mut earned_points: u64 = 0;
        let mut total_points: u64 = 0;
        let mut needs_review = false;
        let mut graded = Vec::with_capacity(questions.len());

        for q in questions {
            total_points = total_points.saturating_add(u64::from(q.points));
            let given = answers.iter().find(|a| a.question_id == q.id);
            let mut answer = given.cloned().unwrap_or_else(|| UserAnswer::empty(&q.id));

            let correct = match (q.kind, answer.answer.as_ref(), q.correct_answer.as_ref()) {
                (QuestionKind::Essay, Some(AnswerValue::Text(t)), _) if !t.trim().is_empty() => {
                    needs_review = true;
                    None
                }
                (QuestionKind::Essay, _, _) => None,
                (_, Some(given), Some(expected)) => Some(is_match(q.kind, given, expected)),
                _ => Some(false),
            };

            if correct == Some(true) {
                earned_points = earned_points.saturating_add(u64::from(q.points));
            }
            answer.is_correct = correct;
            graded.push(answer);
        }

        let score = if total_points == 0 {
            0.0
        } else {
            let pct = earned_points as f64 * 100.0 / total_points as f64;
            (pct * 100.0).round() / 100.0
        };

        GradeOutcome {
            answers: graded,
            earned_points,
            total_points,
            score,
            needs_review,
        }
    }
}

fn is_match(kind: QuestionKind, given: &AnswerValue, expected: &AnswerValue) -> bool {
    match (kind, given, expected) {
        (QuestionKind::MultipleChoice, AnswerValue::Index(a), AnswerValue::Index(b)) => a == b,
        (QuestionKind::TrueFalse, AnswerValue::Flag(a), AnswerValue::Flag(b)) => a == b,
        (QuestionKind::FillInTheBlank, AnswerValue::Text(a), AnswerValue::Text(b)) => {
            normalize(a) == normalize(b)
        }
        (QuestionKind::MultipleSelect, AnswerValue::Indices(a), AnswerValue::Indices(b)) => {
            a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
        }
        _ => false,
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
