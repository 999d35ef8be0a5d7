use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::answer::UserAnswer;
use super::question::{Question, QuizType};

/// A generated quiz together with the user's answers and result. Stored twice:
/// at `testHistory/{id}` and at `users/{user_id}/testHistory/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TestHistory {
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    #[validate(length(min = 1, max = 200, message = "Test name must be 1 to 200 characters"))]
    pub test_name: String,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub extracted_text: Option<String>,
    pub quiz_type: QuizType,
    #[validate(length(min = 1, message = "A test needs at least one question"))]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub user_answers: Vec<UserAnswer>,
    pub score: Option<f64>,
    pub folder_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TestHistory {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn answer_for(&self, question_id: &str) -> Option<&UserAnswer> {
        self.user_answers.iter().find(|a| a.question_id == question_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::{AnswerValue, QuestionKind};
    use crate::utils::validation::sanitize_for_store;

    fn sample() -> TestHistory {
        TestHistory {
            id: "t1".into(),
            user_id: "u1".into(),
            test_name: "Cells".into(),
            file_name: Some("bio.pdf".into()),
            file_type: Some("application/pdf".into()),
            extracted_text: None,
            quiz_type: QuizType::TrueFalse,
            questions: vec![Question {
                id: "q1".into(),
                kind: QuestionKind::TrueFalse,
                prompt: "Cells have walls".into(),
                options: None,
                correct_answer: Some(AnswerValue::Flag(false)),
                explanation: None,
                points: 1,
            }],
            user_answers: vec![UserAnswer::empty("q1")],
            score: Some(87.0),
            folder_id: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn absent_fields_disappear_after_sanitize() {
        let raw = serde_json::to_value(sample()).unwrap();
        assert!(raw.get("folderId").unwrap().is_null());
        let clean = sanitize_for_store(&raw);
        assert!(clean.get("folderId").is_none());
        assert!(clean.get("completedAt").is_none());
        assert_eq!(clean["score"], serde_json::json!(87.0));

        let back: TestHistory = serde_json::from_value(clean).unwrap();
        assert_eq!(back.folder_id, None);
        assert_eq!(back.questions.len(), 1);
    }

    #[test]
    fn timestamps_are_stored_as_millis() {
        let raw = serde_json::to_value(sample()).unwrap();
        assert!(raw["createdAt"].is_i64());
    }
}
