use serde::Serialize;
use std::sync::Arc;

use crate::database::{DocumentPath, DocumentStore, OrderBy, Query, WriteOp};
use crate::error::{Error, ErrorKind, Result};
use crate::models::folder::Folder;
use crate::models::user::Plan;
use crate::services::history_service::{user_folders_collection, HistoryService};
use crate::services::query_cache::{CacheCategory, QueryCache, QueryOptions};
use crate::services::retry_service::{with_retry, RetryPolicy};
use crate::utils::time::now;
use crate::utils::token::generate_document_id;
use crate::utils::validation::{sanitize_for_store, validate_folder, validate_user_id};

#[derive(Debug, Clone, Default)]
pub struct FolderChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderDeletion {
    pub folder_id: String,
    pub reassigned: usize,
}

#[derive(Clone)]
pub struct FolderService {
    store: Arc<dyn DocumentStore>,
    cache: QueryCache,
    history: HistoryService,
    retry: RetryPolicy,
}

impl FolderService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: QueryCache,
        history: HistoryService,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            cache,
            history,
            retry,
        }
    }

    pub fn with_retry_policy(&self, retry: RetryPolicy) -> Self {
        Self {
            history: self.history.with_retry_policy(retry.clone()),
            retry,
            ..self.clone()
        }
    }

    pub async fn list_folders(&self, user_id: &str) -> Result<Vec<Folder>> {
        validate_user_id(user_id)?;
        let query = Query::collection(user_folders_collection(user_id)).order_by(OrderBy::asc("name"));
        let outcome = with_retry("getUserFolders", &self.retry, || {
            self.cache
                .execute_query(QueryOptions::new(query.clone(), CacheCategory::Folders))
        })
        .await?;
        outcome
            .documents
            .iter()
            .cloned()
            .map(|d| d.into_model())
            .collect()
    }

    pub async fn get_folder(&self, user_id: &str, folder_id: &str) -> Result<Folder> {
        validate_user_id(user_id)?;
        let path = DocumentPath::new(user_folders_collection(user_id), folder_id);
        with_retry("getFolder", &self.retry, || self.store.get(&path))
            .await?
            .ok_or_else(|| Error::not_found(format!("folder `{}` not found", folder_id)))?
            .into_model()
    }

    /// Fails `failed-precondition` when the plan's folder allowance is used up.
    pub async fn create_folder(
        &self,
        user_id: &str,
        plan: Plan,
        name: &str,
        description: Option<String>,
        color: Option<String>,
    ) -> Result<Folder> {
        validate_user_id(user_id)?;
        if let Some(max) = plan.limits().max_folders {
            let existing = self.list_folders(user_id).await?.len();
            if existing >= max as usize {
                return Err(Error::backend(
                    ErrorKind::FailedPrecondition,
                    format!("the {} plan allows {} folder(s)", plan.as_str(), max),
                ));
            }
        }

        let created = now();
        let folder = Folder {
            id: generate_document_id(),
            user_id: user_id.to_string(),
            name: name.trim().to_string(),
            description,
            color,
            created_at: created,
            updated_at: created,
        };
        validate_folder(&folder)?;
        self.write(&folder, "createFolder").await?;
        tracing::info!(user_id, folder_id = %folder.id, "created folder");
        Ok(folder)
    }

    pub async fn update_folder(&self, user_id: &str, folder_id: &str, changes: FolderChanges) -> Result<Folder> {
        let mut folder = self.get_folder(user_id, folder_id).await?;
        if let Some(name) = changes.name {
            folder.name = name.trim().to_string();
        }
        if changes.description.is_some() {
            folder.description = changes.description;
        }
        if changes.color.is_some() {
            folder.color = changes.color;
        }
        folder.updated_at = now();
        validate_folder(&folder)?;
        self.write(&folder, "updateFolder").await?;
        Ok(folder)
    }

    async fn write(&self, folder: &Folder, label: &str) -> Result<()> {
        let data = sanitize_for_store(&serde_json::to_value(folder)?);
        let path = DocumentPath::new(user_folders_collection(&folder.user_id), &folder.id);
        let writes = [WriteOp::set(path, data)];
        with_retry(label, &self.retry, || self.store.commit(&writes)).await?;
        self.cache
            .invalidate_cache(&format!("{}?", user_folders_collection(&folder.user_id)));
        Ok(())
    }

    /// Moves the folder's tests to unorganized, then deletes the folder. The
    /// folder stays in place when any test could not be reassigned.
    pub async fn delete_folder(&self, user_id: &str, folder_id: &str) -> Result<FolderDeletion> {
        self.get_folder(user_id, folder_id).await?;
        let test_ids = self.history.test_ids_in_folder(user_id, folder_id).await?;
        let result = self.history.move_tests_to_folder(user_id, &test_ids, None).await?;
        if !result.is_complete() {
            tracing::warn!(user_id, folder_id, failed = result.error_count, "folder tests not reassigned");
            return Err(Error::backend(
                ErrorKind::Aborted,
                format!("{} test copies could not be moved out of the folder", result.error_count),
            ));
        }

        let path = DocumentPath::new(user_folders_collection(user_id), folder_id);
        let writes = [WriteOp::delete(path)];
        with_retry("deleteFolder", &self.retry, || self.store.commit(&writes)).await?;
        self.cache
            .invalidate_cache(&format!("{}?", user_folders_collection(user_id)));
        tracing::info!(user_id, folder_id, reassigned = test_ids.len(), "deleted folder");

        Ok(FolderDeletion {
            folder_id: folder_id.to_string(),
            reassigned: test_ids.len(),
        })
    }
}
