use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Folder document stored at `users/{user_id}/folders/{id}`. Tests point at a
/// folder through `folderId`; a null or missing `folderId` means unorganized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub user_id: String,
    #[validate(length(min = 1, max = 50, message = "Folder name must be 1 to 50 characters"))]
    pub name: String,
    #[validate(length(max = 500, message = "Description is too long"))]
    pub description: Option<String>,
    pub color: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}
