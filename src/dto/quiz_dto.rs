use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::question::{Question, QuizType};

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQuizRequest {
    #[validate(length(min = 1, message = "Source text is required"))]
    pub text: String,
    pub quiz_type: QuizType,
    #[validate(range(min = 1, max = 100, message = "Question count must be 1 to 100"))]
    pub question_count: u32,
    #[validate(length(min = 1, max = 200, message = "Test name must be 1 to 200 characters"))]
    pub test_name: String,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub folder_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQuizResponse {
    pub test_id: String,
    pub model: String,
    pub questions: Vec<Question>,
}
