use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::models::answer::UserAnswer;
use crate::models::question::{Question, QuizType};
use crate::services::history_service::{FolderScope, HistoryListOptions};

/// Query string of `GET /api/tests`. `folder` is a folder id or `unorganized`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ListTestsQuery {
    pub page_size: Option<usize>,
    pub cursor: Option<String>,
    pub folder: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub fresh: bool,
}

impl From<ListTestsQuery> for HistoryListOptions {
    fn from(q: ListTestsQuery) -> Self {
        let folder = match q.folder.as_deref().map(str::trim) {
            None | Some("") => FolderScope::All,
            Some("unorganized") => FolderScope::Unorganized,
            Some(id) => FolderScope::Folder(id.to_string()),
        };
        HistoryListOptions {
            page_size: q.page_size,
            cursor: q.cursor,
            folder,
            completed_only: q.completed,
            bypass_cache: q.fresh,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveTestRequest {
    pub test_name: String,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub extracted_text: Option<String>,
    pub quiz_type: QuizType,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub user_answers: Vec<UserAnswer>,
    pub score: Option<f64>,
    pub folder_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTestRequest {
    pub answers: Vec<UserAnswer>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MoveTestsRequest {
    pub test_ids: Vec<String>,
    /// `null` moves the tests to unorganized.
    pub folder_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedTestResponse {
    pub id: String,
}
