use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentPath {
    pub collection: String,
    pub id: String,
}

impl DocumentPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: JsonValue,
}

impl Document {
    pub fn field(&self, name: &str) -> &JsonValue {
        self.data.get(name).unwrap_or(&JsonValue::Null)
    }

    pub fn into_model<T: serde::de::DeserializeOwned>(self) -> Result<T> {
        let mut data = self.data;
        if let Some(obj) = data.as_object_mut() {
            obj.entry("id").or_insert(JsonValue::String(self.id));
        }
        Ok(serde_json::from_value(data)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "array-contains")]
    ArrayContains,
}

impl FilterOp {
    pub fn symbol(self) -> &'static str {
        match self {
            FilterOp::Eq => "==",
            FilterOp::Ne => "!=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::In => "in",
            FilterOp::ArrayContains => "array-contains",
        }
    }

    pub fn matches(self, field: &JsonValue, target: &JsonValue) -> bool {
        match self {
            FilterOp::Eq => field == target,
            FilterOp::Ne => field != target,
            FilterOp::Lt => compare_values(field, target) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare_values(field, target),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::Gt => compare_values(field, target) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare_values(field, target),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::In => target
                .as_array()
                .map(|candidates| candidates.contains(field))
                .unwrap_or(false),
            FilterOp::ArrayContains => field
                .as_array()
                .map(|items| items.contains(target))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: JsonValue,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<JsonValue>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Position after which the next page starts: the last document's id and its
/// order-by values, in order-by order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub id: String,
    pub values: Vec<JsonValue>,
}

impl Cursor {
    pub fn after(doc: &Document, order_by: &[OrderBy]) -> Self {
        Self {
            id: doc.id.clone(),
            values: order_by.iter().map(|o| doc.field(&o.field).clone()).collect(),
        }
    }

    pub fn encode(&self) -> String {
        let raw = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn decode(token: &str) -> Result<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| Error::validation("cursor", "is not a valid page cursor"))?;
        serde_json::from_slice(&raw).map_err(|_| Error::validation("cursor", "is not a valid page cursor"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub start_after: Option<Cursor>,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            start_after: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, cursor: Option<Cursor>) -> Self {
        self.start_after = cursor;
        self
    }

    /// Canonical cache key. Filters are sorted so equivalent queries built in a
    /// different order produce the same key.
    pub fn cache_key(&self) -> String {
        let mut filters: Vec<String> = self
            .filters
            .iter()
            .map(|f| format!("{}{}{}", f.field, f.op.symbol(), f.value))
            .collect();
        filters.sort();

        let order: Vec<String> = self
            .order_by
            .iter()
            .map(|o| match o.direction {
                SortDirection::Asc => format!("{}:asc", o.field),
                SortDirection::Desc => format!("{}:desc", o.field),
            })
            .collect();

        let limit = self.limit.map(|l| l.to_string()).unwrap_or_else(|| "-".to_string());
        let cursor = self
            .start_after
            .as_ref()
            .map(Cursor::encode)
            .unwrap_or_else(|| "-".to_string());

        format!(
            "{}?where={}&order={}&limit={}&after={}",
            self.collection,
            filters.join(","),
            order.join(","),
            limit,
            cursor
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.collection.trim().is_empty() {
            return Err(Error::validation("collection", "must not be empty"));
        }
        for name in self
            .filters
            .iter()
            .map(|f| f.field.as_str())
            .chain(self.order_by.iter().map(|o| o.field.as_str()))
        {
            if !is_valid_field_name(name) {
                return Err(Error::validation("field", format!("`{}` is not a valid field name", name)));
            }
        }
        for f in &self.filters {
            if f.op == FilterOp::In && !f.value.is_array() {
                return Err(Error::validation(&f.field, "`in` filters need an array value"));
            }
        }
        if let Some(cursor) = &self.start_after {
            if cursor.values.len() != self.order_by.len() {
                return Err(Error::validation("cursor", "does not match the query ordering"));
            }
        }
        Ok(())
    }

    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for o in &self.order_by {
            let ord = compare_for_sort(a.field(&o.field), b.field(&o.field));
            let ord = match o.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.id.cmp(&b.id)
    }

    pub fn is_after_cursor(&self, doc: &Document, cursor: &Cursor) -> bool {
        for (o, value) in self.order_by.iter().zip(&cursor.values) {
            let ord = compare_for_sort(doc.field(&o.field), value);
            let ord = match o.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            match ord {
                Ordering::Greater => return true,
                Ordering::Less => return false,
                Ordering::Equal => {}
            }
        }
        doc.id.as_str() > cursor.id.as_str()
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.filters
            .iter()
            .all(|f| f.op.matches(doc.field(&f.field), &f.value))
    }
}

pub fn is_valid_field_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn compare_values(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (JsonValue::String(x), JsonValue::String(y)) => Some(x.cmp(y)),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => Some(x.cmp(y)),
        (JsonValue::Null, JsonValue::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Total ordering used for sorting: null < bool < number < string < array < object.
pub fn compare_for_sort(a: &JsonValue, b: &JsonValue) -> Ordering {
    fn rank(v: &JsonValue) -> u8 {
        match v {
            JsonValue::Null => 0,
            JsonValue::Bool(_) => 1,
            JsonValue::Number(_) => 2,
            JsonValue::String(_) => 3,
            JsonValue::Array(_) => 4,
            JsonValue::Object(_) => 5,
        }
    }
    compare_values(a, b).unwrap_or_else(|| rank(a).cmp(&rank(b)))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WriteOp {
    /// Creates or overwrites; with `merge`, top-level fields are merged into an
    /// existing document.
    Set {
        path: DocumentPath,
        data: JsonValue,
        merge: bool,
    },
    /// Merges top-level fields into an existing document; fails if missing.
    Update { path: DocumentPath, data: JsonValue },
    Delete { path: DocumentPath },
}

impl WriteOp {
    pub fn set(path: DocumentPath, data: JsonValue) -> Self {
        WriteOp::Set {
            path,
            data,
            merge: false,
        }
    }

    pub fn update(path: DocumentPath, data: JsonValue) -> Self {
        WriteOp::Update { path, data }
    }

    pub fn delete(path: DocumentPath) -> Self {
        WriteOp::Delete { path }
    }

    pub fn path(&self) -> &DocumentPath {
        match self {
            WriteOp::Set { path, .. } | WriteOp::Update { path, .. } | WriteOp::Delete { path } => {
                path
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let path = self.path();
        if path.collection.trim().is_empty() || path.id.trim().is_empty() || path.id.contains('/') {
            return Err(Error::validation("path", format!("`{}` is not a document path", path)));
        }
        match self {
            WriteOp::Set { data, .. } | WriteOp::Update { data, .. } if !data.is_object() => Err(
                Error::validation("data", format!("write to `{}` must be an object", path)),
            ),
            _ => Ok(()),
        }
    }
}

pub fn merge_fields(target: &mut JsonValue, patch: &JsonValue) {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(dst), Some(src)) => {
            for (k, v) in src {
                dst.insert(k.clone(), v.clone());
            }
        }
        _ => *target = patch.clone(),
    }
}

pub fn empty_object() -> JsonValue {
    JsonValue::Object(Map::new())
}

/// Receives the snapshot of the transaction's reads (in request order) and
/// returns the writes to apply atomically.
pub type TransactionFn =
    Box<dyn FnOnce(&[Option<Document>]) -> Result<Vec<WriteOp>> + Send + 'static>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>>;

    /// Applies every write or none of them.
    async fn commit(&self, writes: &[WriteOp]) -> Result<()>;

    /// Reads `reads`, hands the snapshot to `apply`, then commits the writes it
    /// returns. Returns the snapshot on success; nothing is written on failure.
    async fn transaction(
        &self,
        reads: &[DocumentPath],
        apply: TransactionFn,
    ) -> Result<Vec<Option<Document>>>;
}
