use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::database::store::TransactionFn;
use crate::database::{Document, DocumentPath, DocumentStore, WriteOp};
use crate::error::{Error, ErrorKind, Result};

pub const MAX_BATCH_SIZE: usize = 500;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub index: usize,
    pub operation: WriteOp,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub processed_count: usize,
    pub error_count: usize,
    pub errors: Vec<BatchFailure>,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl BatchResult {
    pub fn is_complete(&self) -> bool {
        self.error_count == 0
    }
}

/// Rewrites a document on its way to the target collection.
pub type MoveTransform = Box<dyn Fn(&Document) -> Result<JsonValue> + Send + Sync + 'static>;

#[derive(Clone)]
pub struct BatchOperations {
    store: Arc<dyn DocumentStore>,
    chunk_size: usize,
}

impl BatchOperations {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            chunk_size: MAX_BATCH_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    /// Commits `operations` in chunks. A failed chunk is recorded, operation by
    /// operation, and the remaining chunks still run.
    pub async fn execute_batch(&self, operations: Vec<WriteOp>) -> BatchResult {
        let started = Instant::now();
        let mut processed_count = 0;
        let mut errors = Vec::new();

        for (chunk_no, chunk) in operations.chunks(self.chunk_size).enumerate() {
            let offset = chunk_no * self.chunk_size;
            let outcome = match chunk.iter().try_for_each(WriteOp::validate) {
                Ok(()) => self.store.commit(chunk).await,
                Err(err) => Err(err),
            };
            match outcome {
                Ok(()) => processed_count += chunk.len(),
                Err(err) => {
                    tracing::warn!(
                        chunk = chunk_no,
                        size = chunk.len(),
                        kind = %err.kind(),
                        "batch chunk failed"
                    );
                    let kind = err.kind();
                    let message = err.to_string();
                    errors.extend(chunk.iter().enumerate().map(|(i, op)| BatchFailure {
                        index: offset + i,
                        operation: op.clone(),
                        kind,
                        message: message.clone(),
                    }));
                }
            }
        }

        let result = BatchResult {
            processed_count,
            error_count: errors.len(),
            errors,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            processed = result.processed_count,
            failed = result.error_count,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "batch finished"
        );
        result
    }

    pub async fn execute_transaction(
        &self,
        reads: Vec<DocumentPath>,
        writes: Vec<WriteOp>,
    ) -> Result<Vec<Option<Document>>> {
        check_transaction_size(writes.len())?;
        writes.iter().try_for_each(WriteOp::validate)?;
        self.store
            .transaction(&reads, Box::new(move |_| Ok(writes)))
            .await
    }

    /// Runs a caller-built transaction body. The writes it returns are held
    /// to the same limit as `execute_transaction`.
    pub async fn run_transaction(
        &self,
        reads: Vec<DocumentPath>,
        apply: TransactionFn,
    ) -> Result<Vec<Option<Document>>> {
        let checked: TransactionFn = Box::new(move |snapshot| {
            let writes = apply(snapshot)?;
            check_transaction_size(writes.len())?;
            Ok(writes)
        });
        self.store.transaction(&reads, checked).await
    }

    /// Moves documents between collections under their ids, in one transaction.
    /// A missing source document aborts the whole move.
    pub async fn move_documents(
        &self,
        source: &str,
        target: &str,
        ids: &[String],
        transform: Option<MoveTransform>,
    ) -> Result<usize> {
        // One set and one delete per id.
        check_transaction_size(ids.len() * 2)?;
        if source == target {
            return Err(Error::validation("target", "Source and target collections are the same"));
        }

        let reads: Vec<DocumentPath> = ids.iter().map(|id| DocumentPath::new(source, id)).collect();
        let target = target.to_string();
        let source_name = source.to_string();

        let apply: TransactionFn = Box::new(move |snapshot| {
            let mut writes = Vec::with_capacity(snapshot.len() * 2);
            for doc in snapshot {
                let doc = doc.as_ref().ok_or_else(|| {
                    Error::not_found(format!("document missing from `{}`", source_name))
                })?;
                let data = match &transform {
                    Some(f) => f(doc)?,
                    None => doc.data.clone(),
                };
                writes.push(WriteOp::set(DocumentPath::new(target.clone(), doc.id.clone()), data));
                writes.push(WriteOp::delete(DocumentPath::new(source_name.clone(), doc.id.clone())));
            }
            Ok(writes)
        });

        self.run_transaction(reads, apply).await?;
        tracing::info!(source, moved = ids.len(), "moved documents");
        Ok(ids.len())
    }
}

fn check_transaction_size(writes: usize) -> Result<()> {
    if writes > MAX_BATCH_SIZE {
        return Err(Error::validation(
            "operations",
            format!("A transaction allows at most {} writes, got {}", MAX_BATCH_SIZE, writes),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::store::MockDocumentStore;
    use crate::database::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sets(n: usize) -> Vec<WriteOp> {
        (0..n)
            .map(|i| WriteOp::set(DocumentPath::new("items", format!("d{}", i)), json!({ "n": i })))
            .collect()
    }

    #[tokio::test]
    async fn failing_middle_chunk_is_reported_and_others_commit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut store = MockDocumentStore::new();
        store.expect_commit().times(3).returning(move |writes| {
            let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 2 {
                assert_eq!(writes.len(), 500);
                Err(Error::backend(ErrorKind::Unavailable, "backend hiccup"))
            } else {
                Ok(())
            }
        });

        let batch = BatchOperations::new(Arc::new(store));
        let result = batch.execute_batch(sets(1200)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.processed_count, 700);
        assert_eq!(result.error_count, 500);
        assert_eq!(result.errors.first().map(|e| e.index), Some(500));
        assert_eq!(result.errors.last().map(|e| e.index), Some(999));
        assert!(result.errors.iter().all(|e| e.kind == ErrorKind::Unavailable));
        assert!(!result.is_complete());
    }

    #[tokio::test]
    async fn oversized_transaction_never_reaches_the_store() {
        let mut store = MockDocumentStore::new();
        store.expect_transaction().never();
        let batch = BatchOperations::new(Arc::new(store));

        let err = batch.execute_transaction(vec![], sets(501)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn oversized_move_never_reaches_the_store() {
        let mut store = MockDocumentStore::new();
        store.expect_transaction().never();
        let batch = BatchOperations::new(Arc::new(store));

        let ids: Vec<String> = (0..251).map(|i| format!("d{}", i)).collect();
        let err = batch.move_documents("inbox", "archive", &ids, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn transaction_body_is_held_to_the_write_limit() {
        let store = Arc::new(MemoryStore::new());
        let batch = BatchOperations::new(store.clone());

        let err = batch
            .run_transaction(vec![], Box::new(|_| Ok(sets(501))))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(store.count("items").await, 0);

        batch
            .run_transaction(vec![], Box::new(|_| Ok(sets(500))))
            .await
            .unwrap();
        assert_eq!(store.count("items").await, 500);
    }

    #[tokio::test]
    async fn transaction_returns_snapshot() {
        let store = Arc::new(MemoryStore::new());
        store
            .commit(&[WriteOp::set(DocumentPath::new("items", "a"), json!({"v": 1}))])
            .await
            .unwrap();
        let batch = BatchOperations::new(store.clone());

        let snapshot = batch
            .execute_transaction(
                vec![DocumentPath::new("items", "a"), DocumentPath::new("items", "zz")],
                vec![WriteOp::delete(DocumentPath::new("items", "a"))],
            )
            .await
            .unwrap();
        assert_eq!(snapshot[0].as_ref().map(|d| d.data.clone()), Some(json!({"v": 1})));
        assert!(snapshot[1].is_none());
        assert!(!store.contains(&DocumentPath::new("items", "a")).await);
    }

    #[tokio::test]
    async fn move_is_all_or_nothing() {
        let store = Arc::new(MemoryStore::new());
        store
            .commit(&[
                WriteOp::set(DocumentPath::new("inbox", "a"), json!({"v": 1})),
                WriteOp::set(DocumentPath::new("inbox", "b"), json!({"v": 2})),
            ])
            .await
            .unwrap();
        let batch = BatchOperations::new(store.clone());

        let ids = vec!["a".to_string(), "missing".to_string()];
        let err = batch.move_documents("inbox", "archive", &ids, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(store.contains(&DocumentPath::new("inbox", "a")).await);
        assert!(!store.contains(&DocumentPath::new("archive", "a")).await);

        let transform: MoveTransform = Box::new(|doc| {
            let mut data = doc.data.clone();
            data["archived"] = json!(true);
            Ok(data)
        });
        let ids = vec!["a".to_string(), "b".to_string()];
        let moved = batch
            .move_documents("inbox", "archive", &ids, Some(transform))
            .await
            .unwrap();
        assert_eq!(moved, 2);
        assert_eq!(store.count("inbox").await, 0);
        let doc = store.get(&DocumentPath::new("archive", "b")).await.unwrap().unwrap();
        assert_eq!(doc.data, json!({"v": 2, "archived": true}));
    }
}
