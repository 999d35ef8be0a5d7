use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::database::store::TransactionFn;
use crate::database::{
    Cursor, Document, DocumentPath, DocumentStore, Filter, FilterOp, OrderBy, Query, WriteOp,
};
use crate::error::{Error, ErrorKind, Result};
use crate::models::answer::UserAnswer;
use crate::models::test_history::TestHistory;
use crate::models::user::Plan;
use crate::services::batch_service::{BatchOperations, BatchResult};
use crate::services::grading_service::GradingService;
use crate::services::query_cache::{CacheCategory, QueryCache, QueryOptions};
use crate::services::retry_service::{with_retry, RetryPolicy};
use crate::utils::time::{now, start_of_month};
use crate::utils::token::generate_document_id;
use crate::utils::validation::{sanitize_for_store, validate_test_history, validate_user_id};

pub const TEST_HISTORY: &str = "testHistory";
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

pub fn user_history_collection(user_id: &str) -> String {
    format!("users/{}/testHistory", user_id)
}

pub fn user_folders_collection(user_id: &str) -> String {
    format!("users/{}/folders", user_id)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum FolderScope {
    #[default]
    All,
    Unorganized,
    Folder(String),
}

#[derive(Debug, Clone, Default)]
pub struct HistoryListOptions {
    pub page_size: Option<usize>,
    /// Opaque token returned as `next_cursor` by the previous page.
    pub cursor: Option<String>,
    pub folder: FolderScope,
    pub completed_only: bool,
    pub bypass_cache: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestHistoryPage {
    pub items: Vec<TestHistory>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
    pub from_cache: bool,
}

#[derive(Clone)]
pub struct HistoryService {
    store: Arc<dyn DocumentStore>,
    cache: QueryCache,
    batch: BatchOperations,
    retry: RetryPolicy,
}

impl HistoryService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: QueryCache,
        batch: BatchOperations,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            cache,
            batch,
            retry,
        }
    }

    pub fn with_retry_policy(&self, retry: RetryPolicy) -> Self {
        Self {
            retry,
            ..self.clone()
        }
    }

    fn invalidate_user(&self, user_id: &str) {
        self.cache
            .invalidate_cache(&format!("{}?", user_history_collection(user_id)));
    }

    pub async fn save_test_history(&self, mut history: TestHistory) -> Result<String> {
        if history.id.trim().is_empty() {
            history.id = generate_document_id();
        }
        validate_test_history(&history)?;
        let data = sanitize_for_store(&serde_json::to_value(&history)?);
        let writes = both_copies(&history.user_id, &history.id)
            .into_iter()
            .map(|path| WriteOp::set(path, data.clone()))
            .collect::<Vec<_>>();

        with_retry("saveTestHistory", &self.retry, || {
            self.batch.execute_transaction(Vec::new(), writes.clone())
        })
        .await?;

        self.invalidate_user(&history.user_id);
        tracing::info!(user_id = %history.user_id, test_id = %history.id, "saved test history");
        Ok(history.id)
    }

    pub async fn get_test(&self, user_id: &str, test_id: &str) -> Result<TestHistory> {
        validate_user_id(user_id)?;
        let path = DocumentPath::new(user_history_collection(user_id), test_id);
        with_retry("getTestHistory", &self.retry, || self.store.get(&path))
            .await?
            .ok_or_else(|| Error::not_found(format!("test `{}` not found", test_id)))?
            .into_model()
    }

    /// Newest first. `has_more` is found by asking for one extra document.
    pub async fn get_user_test_history(
        &self,
        user_id: &str,
        options: HistoryListOptions,
    ) -> Result<TestHistoryPage> {
        validate_user_id(user_id)?;
        let page_size = options
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let cursor = options.cursor.as_deref().map(Cursor::decode).transpose()?;

        let mut query = Query::collection(user_history_collection(user_id));
        query = match &options.folder {
            FolderScope::All => query,
            FolderScope::Unorganized => query.filter(Filter::eq("folderId", serde_json::Value::Null)),
            FolderScope::Folder(id) => query.filter(Filter::eq("folderId", id.as_str())),
        };
        if options.completed_only {
            query = query.filter(Filter::new("completedAt", FilterOp::Ne, serde_json::Value::Null));
        }
        let query = query
            .order_by(OrderBy::desc("createdAt"))
            .limit(page_size + 1)
            .start_after(cursor);
        query.validate()?;

        let mut request = QueryOptions::new(query.clone(), CacheCategory::TestHistory);
        if options.bypass_cache {
            request = request.bypass_cache();
        }
        let outcome = with_retry("getUserTestHistory", &self.retry, || {
            self.cache.execute_query(request.clone())
        })
        .await?;

        let has_more = outcome.documents.len() > page_size;
        let page: Vec<Document> = outcome.documents.iter().take(page_size).cloned().collect();
        let next_cursor = if has_more {
            page.last().map(|doc| Cursor::after(doc, &query.order_by).encode())
        } else {
            None
        };
        let items = page
            .into_iter()
            .map(Document::into_model)
            .collect::<Result<Vec<TestHistory>>>()?;

        Ok(TestHistoryPage {
            items,
            has_more,
            next_cursor,
            from_cache: outcome.from_cache,
        })
    }

    pub async fn delete_test_history(&self, user_id: &str, test_id: &str) -> Result<()> {
        validate_user_id(user_id)?;
        let [user_copy, flat_copy] = both_copies(user_id, test_id);

        with_retry("deleteTestHistory", &self.retry, || {
            let reads = vec![user_copy.clone()];
            let writes = vec![
                WriteOp::delete(user_copy.clone()),
                WriteOp::delete(flat_copy.clone()),
            ];
            let missing = test_id.to_string();
            let apply: TransactionFn = Box::new(move |snapshot| {
                if snapshot.first().map_or(true, Option::is_none) {
                    return Err(Error::not_found(format!("test `{}` not found", missing)));
                }
                Ok(writes)
            });
            self.batch.run_transaction(reads, apply)
        })
        .await?;

        self.invalidate_user(user_id);
        tracing::info!(user_id, test_id, "deleted test history");
        Ok(())
    }

    pub async fn complete_test(
        &self,
        user_id: &str,
        test_id: &str,
        answers: Vec<UserAnswer>,
    ) -> Result<TestHistory> {
        validate_user_id(user_id)?;
        let completed_at = now();
        let finish = move |mut test: TestHistory| {
            let outcome = GradingService::grade(&test.questions, &answers);
            test.user_answers = outcome.answers;
            test.score = Some(outcome.score);
            test.completed_at = Some(completed_at);
            test
        };
        let test = self
            .rewrite_test("completeTest", user_id, test_id, finish)
            .await?;
        tracing::info!(user_id, test_id, score = test.score, "completed test");
        Ok(test)
    }

    pub async fn retake_test(&self, user_id: &str, test_id: &str, plan: Plan) -> Result<TestHistory> {
        if !plan.limits().retakes {
            return Err(Error::backend(
                ErrorKind::FailedPrecondition,
                format!("the {} plan does not include retakes", plan.as_str()),
            ));
        }
        validate_user_id(user_id)?;
        let reset = |mut test: TestHistory| {
            test.user_answers = test.questions.iter().map(|q| UserAnswer::empty(&q.id)).collect();
            test.score = None;
            test.completed_at = None;
            test
        };
        self.rewrite_test("retakeTest", user_id, test_id, reset).await
    }

    /// Reads the user copy inside a transaction, applies `change`, and writes
    /// the result to both copies. `change` must be deterministic: it runs again
    /// on the committed snapshot to produce the returned value.
    async fn rewrite_test<F>(&self, label: &str, user_id: &str, test_id: &str, change: F) -> Result<TestHistory>
    where
        F: Fn(TestHistory) -> TestHistory + Clone + Send + Sync + 'static,
    {
        let [user_copy, flat_copy] = both_copies(user_id, test_id);

        let snapshot = with_retry(label, &self.retry, || {
            let change = change.clone();
            let reads = vec![user_copy.clone()];
            let (user_target, flat_target) = (user_copy.clone(), flat_copy.clone());
            let missing = test_id.to_string();
            let apply: TransactionFn = Box::new(move |snapshot| {
                let doc = snapshot
                    .first()
                    .cloned()
                    .flatten()
                    .ok_or_else(|| Error::not_found(format!("test `{}` not found", missing)))?;
                let updated = change(doc.into_model()?);
                let data = sanitize_for_store(&serde_json::to_value(&updated)?);
                Ok(vec![WriteOp::set(user_target, data.clone()), WriteOp::set(flat_target, data)])
            });
            self.batch.run_transaction(reads, apply)
        })
        .await?;

        self.invalidate_user(user_id);
        let doc = snapshot
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| Error::not_found(format!("test `{}` not found", test_id)))?;
        Ok(change(doc.into_model()?))
    }

    /// Points every listed test at `folder_id` (or unorganized for `None`),
    /// through a chunked batch over both copies.
    pub async fn move_tests_to_folder(
        &self,
        user_id: &str,
        test_ids: &[String],
        folder_id: Option<&str>,
    ) -> Result<BatchResult> {
        validate_user_id(user_id)?;
        if let Some(folder_id) = folder_id {
            let path = DocumentPath::new(user_folders_collection(user_id), folder_id);
            let exists = with_retry("getFolder", &self.retry, || self.store.get(&path))
                .await?
                .is_some();
            if !exists {
                return Err(Error::not_found(format!("folder `{}` not found", folder_id)));
            }
        }

        let result = self.reassign(user_id, test_ids, folder_id).await;
        self.invalidate_user(user_id);
        Ok(result)
    }

    pub(crate) async fn reassign(
        &self,
        user_id: &str,
        test_ids: &[String],
        folder_id: Option<&str>,
    ) -> BatchResult {
        let patch = json!({ "folderId": folder_id });
        let operations = test_ids
            .iter()
            .flat_map(|id| both_copies(user_id, id))
            .map(|path| WriteOp::update(path, patch.clone()))
            .collect();
        self.batch.execute_batch(operations).await
    }

    pub async fn test_ids_in_folder(&self, user_id: &str, folder_id: &str) -> Result<Vec<String>> {
        let query = Query::collection(user_history_collection(user_id))
            .filter(Filter::eq("folderId", folder_id));
        let docs = with_retry("listFolderTests", &self.retry, || self.store.query(&query)).await?;
        Ok(docs.into_iter().map(|d| d.id).collect())
    }

    /// Fails `failed-precondition` once the plan's monthly test allowance is used.
    pub async fn check_monthly_quota(&self, user_id: &str, plan: Plan) -> Result<()> {
        let Some(allowance) = plan.limits().monthly_tests else {
            return Ok(());
        };
        validate_user_id(user_id)?;
        let since = start_of_month(now()).timestamp_millis();
        let query = Query::collection(user_history_collection(user_id))
            .filter(Filter::new("createdAt", FilterOp::Gte, since))
            .limit(allowance as usize);
        let used = with_retry("countMonthlyTests", &self.retry, || self.store.query(&query))
            .await?
            .len();
        if used >= allowance as usize {
            return Err(Error::backend(
                ErrorKind::FailedPrecondition,
                format!("monthly limit of {} tests reached on the {} plan", allowance, plan.as_str()),
            ));
        }
        Ok(())
    }
}

fn both_copies(user_id: &str, test_id: &str) -> [DocumentPath; 2] {
    [
        DocumentPath::new(user_history_collection(user_id), test_id),
        DocumentPath::new(TEST_HISTORY, test_id),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::models::question::{AnswerValue, Question, QuestionKind, QuizType};
    use crate::services::query_cache::CacheConfig;
    use chrono::{Duration, Utc};

    fn service() -> (HistoryService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let cache = QueryCache::new(store.clone(), CacheConfig::default());
        let batch = BatchOperations::new(store.clone());
        let retry = RetryPolicy {
            jitter: false,
            initial_delay: std::time::Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        (HistoryService::new(store.clone(), cache, batch, retry), store)
    }

    fn history(user_id: &str, minutes_ago: i64) -> TestHistory {
        TestHistory {
            id: String::new(),
            user_id: user_id.into(),
            test_name: "Photosynthesis".into(),
            file_name: None,
            file_type: None,
            extracted_text: None,
            quiz_type: QuizType::MultipleChoice,
            questions: vec![Question {
                id: "q1".into(),
                kind: QuestionKind::MultipleChoice,
                prompt: "Where does it happen?".into(),
                options: Some(vec!["Chloroplast".into(), "Nucleus".into()]),
                correct_answer: Some(AnswerValue::Index(0)),
                explanation: None,
                points: 1,
            }],
            user_answers: vec![],
            score: None,
            folder_id: None,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn pages_newest_first_with_cursor() {
        let (svc, _) = service();
        for i in 0..5 {
            svc.save_test_history(history("u1", i)).await.unwrap();
        }
        svc.save_test_history(history("someone-else", 0)).await.unwrap();

        let first = svc
            .get_user_test_history("u1", HistoryListOptions { page_size: Some(3), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(first.items.len(), 3);
        assert!(first.has_more);
        assert!(first.items[0].created_at > first.items[2].created_at);

        let second = svc
            .get_user_test_history(
                "u1",
                HistoryListOptions {
                    page_size: Some(3),
                    cursor: first.next_cursor.clone(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(second.items.len(), 2);
        assert!(!second.has_more);
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn delete_removes_both_copies() {
        let (svc, store) = service();
        let id = svc.save_test_history(history("u1", 0)).await.unwrap();
        assert!(store.contains(&DocumentPath::new(TEST_HISTORY, &id)).await);

        svc.delete_test_history("u1", &id).await.unwrap();
        assert!(!store.contains(&DocumentPath::new(TEST_HISTORY, &id)).await);
        assert!(!store.contains(&DocumentPath::new(user_history_collection("u1"), &id)).await);

        let err = svc.delete_test_history("u1", &id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn complete_then_retake() {
        let (svc, store) = service();
        let id = svc.save_test_history(history("u1", 0)).await.unwrap();

        let answers = vec![UserAnswer {
            answer: Some(AnswerValue::Index(0)),
            ..UserAnswer::empty("q1")
        }];
        let done = svc.complete_test("u1", &id, answers).await.unwrap();
        assert_eq!(done.score, Some(100.0));
        assert!(done.is_completed());

        let flat = store.get(&DocumentPath::new(TEST_HISTORY, &id)).await.unwrap().unwrap();
        assert_eq!(flat.data["score"], json!(100.0));

        let err = svc.retake_test("u1", &id, Plan::Free).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);

        let again = svc.retake_test("u1", &id, Plan::Student).await.unwrap();
        assert_eq!(again.score, None);
        assert!(!again.is_completed());
        assert_eq!(again.user_answers.len(), 1);
        let stored = svc.get_test("u1", &id).await.unwrap();
        assert_eq!(stored, again);
    }

    #[tokio::test]
    async fn other_users_writes_keep_cached_pages() {
        let (svc, _) = service();
        svc.save_test_history(history("alice", 5)).await.unwrap();
        svc.get_user_test_history("alice", HistoryListOptions::default())
            .await
            .unwrap();

        svc.save_test_history(history("bob", 0)).await.unwrap();
        let page = svc
            .get_user_test_history("alice", HistoryListOptions::default())
            .await
            .unwrap();
        assert!(page.from_cache);

        svc.save_test_history(history("alice", 0)).await.unwrap();
        let page = svc
            .get_user_test_history("alice", HistoryListOptions::default())
            .await
            .unwrap();
        assert!(!page.from_cache);
        assert_eq!(page.items.len(), 2);
    }

    #[tokio::test]
    async fn free_plan_quota_counts_this_month() {
        let (svc, _) = service();
        for _ in 0..3 {
            svc.check_monthly_quota("u1", Plan::Free).await.unwrap();
            svc.save_test_history(history("u1", 0)).await.unwrap();
        }
        let err = svc.check_monthly_quota("u1", Plan::Free).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
        svc.check_monthly_quota("u1", Plan::Pro).await.unwrap();
    }
}
