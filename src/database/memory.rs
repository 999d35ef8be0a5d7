// In-process document store. Collections map to ordered id → data maps behind
// a tokio `RwLock`; batches and transactions are staged on a copy of the
// touched collections and swapped in only when every write succeeded.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;

use super::store::{
    merge_fields, Document, DocumentPath, DocumentStore, Query, TransactionFn, WriteOp,
};
use crate::error::{Error, Result};

type Collections = HashMap<String, BTreeMap<String, JsonValue>>;

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    collections: Arc<RwLock<Collections>>,
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicU64,
    queries: AtomicU64,
    commits: AtomicU64,
    transactions: AtomicU64,
}

/// Operation counts since creation, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCounters {
    pub reads: u64,
    pub queries: u64,
    pub commits: u64,
    pub transactions: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> StoreCounters {
        StoreCounters {
            reads: self.counters.reads.load(Ordering::Relaxed),
            queries: self.counters.queries.load(Ordering::Relaxed),
            commits: self.counters.commits.load(Ordering::Relaxed),
            transactions: self.counters.transactions.load(Ordering::Relaxed),
        }
    }

    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    pub async fn contains(&self, path: &DocumentPath) -> bool {
        self.collections
            .read()
            .await
            .get(&path.collection)
            .map(|c| c.contains_key(&path.id))
            .unwrap_or(false)
    }
}

fn read_doc(collections: &Collections, path: &DocumentPath) -> Option<Document> {
    collections
        .get(&path.collection)
        .and_then(|c| c.get(&path.id))
        .map(|data| Document {
            id: path.id.clone(),
            data: data.clone(),
        })
}

/// Applies `writes` to `collections`, all or nothing.
fn apply_writes(collections: &mut Collections, writes: &[WriteOp]) -> Result<()> {
    for w in writes {
        w.validate()?;
    }

    let mut staged: HashMap<String, BTreeMap<String, JsonValue>> = HashMap::new();
    for w in writes {
        let name = &w.path().collection;
        if !staged.contains_key(name) {
            let current = collections.get(name).cloned().unwrap_or_default();
            staged.insert(name.clone(), current);
        }
        let Some(collection) = staged.get_mut(name) else {
            continue;
        };
        match w {
            WriteOp::Set { path, data, merge } => {
                let merged = *merge
                    && collection
                        .get_mut(&path.id)
                        .map(|existing| merge_fields(existing, data))
                        .is_some();
                if !merged {
                    collection.insert(path.id.clone(), data.clone());
                }
            }
            WriteOp::Update { path, data } => match collection.get_mut(&path.id) {
                Some(existing) => merge_fields(existing, data),
                None => return Err(Error::not_found(format!("No document to update: {}", path))),
            },
            WriteOp::Delete { path } => {
                collection.remove(&path.id);
            }
        }
    }

    for (name, collection) in staged {
        if collection.is_empty() {
            collections.remove(&name);
        } else {
            collections.insert(name, collection);
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let collections = self.collections.read().await;
        Ok(read_doc(&collections, path))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        query.validate()?;
        self.counters.queries.fetch_add(1, Ordering::Relaxed);
        let collections = self.collections.read().await;
        let Some(collection) = collections.get(&query.collection) else {
            return Ok(Vec::new());
        };

        let mut docs: Vec<Document> = collection
            .iter()
            .map(|(id, data)| Document {
                id: id.clone(),
                data: data.clone(),
            })
            .filter(|d| query.matches(d))
            .collect();
        docs.sort_by(|a, b| query.compare(a, b));

        if let Some(cursor) = &query.start_after {
            docs.retain(|d| query.is_after_cursor(d, cursor));
        }
        if let Some(limit) = query.limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    async fn commit(&self, writes: &[WriteOp]) -> Result<()> {
        self.counters.commits.fetch_add(1, Ordering::Relaxed);
        let mut collections = self.collections.write().await;
        apply_writes(&mut collections, writes)
    }

    async fn transaction(
        &self,
        reads: &[DocumentPath],
        apply: TransactionFn,
    ) -> Result<Vec<Option<Document>>> {
        self.counters.transactions.fetch_add(1, Ordering::Relaxed);
        // Holding the write lock for the whole read-modify-write serializes
        // transactions against each other and against batches.
        let mut collections = self.collections.write().await;
        let snapshot: Vec<Option<Document>> =
            reads.iter().map(|p| read_doc(&collections, p)).collect();
        let writes = apply(&snapshot)?;
        apply_writes(&mut collections, &writes)?;
        Ok(snapshot)
    }
}
