use serde::{Deserialize, Serialize};

use super::question::AnswerValue;

/// A user's answer to one question. Empty when the quiz starts; `is_correct`
/// is filled in when the quiz is graded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAnswer {
    pub question_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<AnswerValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_spent_seconds: Option<u32>,
    #[serde(default)]
    pub marked_for_review: bool,
}

impl UserAnswer {
    pub fn empty(question_id: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            answer: None,
            is_correct: None,
            time_spent_seconds: None,
            marked_for_review: false,
        }
    }
}
