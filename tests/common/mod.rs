#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use test_buddy_backend::{
    config::Config,
    database::{store::TransactionFn, Document, DocumentPath, DocumentStore, MemoryStore, Query, WriteOp},
    error::{Error, ErrorKind, Result},
    models::{
        question::{AnswerValue, Question, QuestionKind, QuizType},
        test_history::TestHistory,
    },
    AppState,
};

/// Wraps a `MemoryStore` and injects failures into writes.
pub struct FaultyStore {
    pub inner: MemoryStore,
    transient_failures: AtomicUsize,
    poisoned_ids: Arc<Mutex<Vec<String>>>,
    pub write_calls: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            transient_failures: AtomicUsize::new(0),
            poisoned_ids: Arc::new(Mutex::new(Vec::new())),
            write_calls: AtomicUsize::new(0),
        }
    }

    /// The next `n` commits or transactions fail with `unavailable`.
    pub fn fail_next(&self, n: usize) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// Every write touching a document with this id fails with `permission-denied`.
    pub fn poison(&self, id: &str) {
        self.poisoned_ids.lock().unwrap().push(id.to_string());
    }

    fn take_outage(&self) -> Result<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let outage = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if outage {
            return Err(Error::backend(ErrorKind::Unavailable, "injected outage"));
        }
        Ok(())
    }
}

fn check_poison(poisoned: &Mutex<Vec<String>>, writes: &[WriteOp]) -> Result<()> {
    let poisoned = poisoned.lock().unwrap();
    if writes.iter().any(|w| poisoned.contains(&w.path().id)) {
        return Err(Error::backend(ErrorKind::PermissionDenied, "injected rule failure"));
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for FaultyStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>> {
        self.inner.get(path).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        self.inner.query(query).await
    }

    async fn commit(&self, writes: &[WriteOp]) -> Result<()> {
        self.take_outage()?;
        check_poison(&self.poisoned_ids, writes)?;
        self.inner.commit(writes).await
    }

    async fn transaction(&self, reads: &[DocumentPath], apply: TransactionFn) -> Result<Vec<Option<Document>>> {
        self.take_outage()?;
        let poisoned = self.poisoned_ids.clone();
        let guarded: TransactionFn = Box::new(move |snapshot| {
            let writes = apply(snapshot)?;
            check_poison(&poisoned, &writes)?;
            Ok(writes)
        });
        self.inner.transaction(reads, guarded).await
    }
}

pub fn memory_state() -> (AppState, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(Config::for_tests(), store.clone(), "memory").expect("state");
    (state, store)
}

pub fn true_false_test(user_id: &str, folder_id: Option<&str>) -> TestHistory {
    TestHistory {
        id: String::new(),
        user_id: user_id.to_string(),
        test_name: "Cell biology".to_string(),
        file_name: Some("cells.pdf".to_string()),
        file_type: Some("application/pdf".to_string()),
        extracted_text: None,
        quiz_type: QuizType::TrueFalse,
        questions: vec![
            Question {
                id: "q1".to_string(),
                kind: QuestionKind::TrueFalse,
                prompt: "Mitochondria produce ATP".to_string(),
                options: None,
                correct_answer: Some(AnswerValue::Flag(true)),
                explanation: None,
                points: 1,
            },
            Question {
                id: "q2".to_string(),
                kind: QuestionKind::TrueFalse,
                prompt: "Ribosomes are membrane-bound".to_string(),
                options: None,
                correct_answer: Some(AnswerValue::Flag(false)),
                explanation: None,
                points: 1,
            },
        ],
        user_answers: vec![],
        score: None,
        folder_id: folder_id.map(str::to_string),
        created_at: Utc::now(),
        completed_at: None,
    }
}
