use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};

use super::store::{
    Document, DocumentPath, DocumentStore, FilterOp, Query, SortDirection, TransactionFn, WriteOp,
};
use crate::error::{Error, Result};

/// Document store persisted in a single `documents` table with JSONB bodies.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Config(format!("Migration failed: {}", e)))?;
        Ok(())
    }

    async fn begin_serializable(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

fn push_field<'a>(qb: &mut QueryBuilder<'a, Postgres>, field: &str) {
    qb.push("COALESCE(data -> ")
        .push_bind(field.to_string())
        .push(", 'null'::jsonb)");
}

fn push_filters<'a>(qb: &mut QueryBuilder<'a, Postgres>, query: &Query) {
    for f in &query.filters {
        qb.push(" AND ");
        match f.op {
            FilterOp::Eq | FilterOp::Ne => {
                push_field(qb, &f.field);
                qb.push(if f.op == FilterOp::Eq { " = " } else { " <> " });
                qb.push_bind(f.value.clone());
            }
            FilterOp::Lt | FilterOp::Lte | FilterOp::Gt | FilterOp::Gte => {
                // jsonb orders across types; restrict to same-typed comparisons.
                qb.push("(jsonb_typeof(");
                push_field(qb, &f.field);
                qb.push(") = jsonb_typeof(")
                    .push_bind(f.value.clone())
                    .push(") AND ");
                push_field(qb, &f.field);
                qb.push(match f.op {
                    FilterOp::Lt => " < ",
                    FilterOp::Lte => " <= ",
                    FilterOp::Gt => " > ",
                    _ => " >= ",
                });
                qb.push_bind(f.value.clone()).push(")");
            }
            FilterOp::In => {
                qb.push_bind(f.value.clone()).push(" @> jsonb_build_array(");
                push_field(qb, &f.field);
                qb.push(")");
            }
            FilterOp::ArrayContains => {
                qb.push("(jsonb_typeof(");
                push_field(qb, &f.field);
                qb.push(") = 'array' AND ");
                push_field(qb, &f.field);
                qb.push(" @> jsonb_build_array(")
                    .push_bind(f.value.clone())
                    .push("))");
            }
        }
    }
}

fn push_cursor<'a>(qb: &mut QueryBuilder<'a, Postgres>, query: &Query) {
    let Some(cursor) = &query.start_after else {
        return;
    };
    // (k0 > v0) OR (k0 = v0 AND k1 > v1) OR ... OR (all equal AND id > cursor id)
    qb.push(" AND (");
    for (i, (order, value)) in query.order_by.iter().zip(&cursor.values).enumerate() {
        qb.push("(");
        for (prev, prev_value) in query.order_by.iter().zip(&cursor.values).take(i) {
            push_field(qb, &prev.field);
            qb.push(" = ").push_bind(prev_value.clone()).push(" AND ");
        }
        push_field(qb, &order.field);
        qb.push(match order.direction {
            SortDirection::Asc => " > ",
            SortDirection::Desc => " < ",
        });
        qb.push_bind(value.clone()).push(") OR ");
    }
    qb.push("(");
    for (order, value) in query.order_by.iter().zip(&cursor.values) {
        push_field(qb, &order.field);
        qb.push(" = ").push_bind(value.clone()).push(" AND ");
    }
    qb.push("id > ").push_bind(cursor.id.clone()).push("))");
}

fn build_select<'a>(query: &Query) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new("SELECT id, data FROM documents WHERE collection = ");
    qb.push_bind(query.collection.clone());
    push_filters(&mut qb, query);
    push_cursor(&mut qb, query);

    qb.push(" ORDER BY ");
    for order in &query.order_by {
        push_field(&mut qb, &order.field);
        qb.push(match order.direction {
            SortDirection::Asc => " ASC, ",
            SortDirection::Desc => " DESC, ",
        });
    }
    qb.push("id ASC");

    if let Some(limit) = query.limit {
        qb.push(" LIMIT ").push_bind(limit as i64);
    }
    qb
}

async fn read_one(
    tx: &mut Transaction<'static, Postgres>,
    path: &DocumentPath,
) -> Result<Option<Document>> {
    let row = sqlx::query(
        "SELECT id, data FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE",
    )
    .bind(&path.collection)
    .bind(&path.id)
    .fetch_optional(&mut **tx)
    .await?;
    row.map(|r| {
        Ok(Document {
            id: r.try_get("id")?,
            data: r.try_get("data")?,
        })
    })
    .transpose()
}

async fn apply_write(tx: &mut Transaction<'static, Postgres>, write: &WriteOp) -> Result<()> {
    write.validate()?;
    match write {
        WriteOp::Set { path, data, merge } => {
            let sql = if *merge {
                r#"INSERT INTO documents (collection, id, data, updated_at)
                   VALUES ($1, $2, $3, NOW())
                   ON CONFLICT (collection, id)
                   DO UPDATE SET data = documents.data || EXCLUDED.data, updated_at = NOW()"#
            } else {
                r#"INSERT INTO documents (collection, id, data, updated_at)
                   VALUES ($1, $2, $3, NOW())
                   ON CONFLICT (collection, id)
                   DO UPDATE SET data = EXCLUDED.data, updated_at = NOW()"#
            };
            sqlx::query(sql)
                .bind(&path.collection)
                .bind(&path.id)
                .bind(data)
                .execute(&mut **tx)
                .await?;
        }
        WriteOp::Update { path, data } => {
            let result = sqlx::query(
                r#"UPDATE documents SET data = data || $3, updated_at = NOW()
                   WHERE collection = $1 AND id = $2"#,
            )
            .bind(&path.collection)
            .bind(&path.id)
            .bind(data)
            .execute(&mut **tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(Error::not_found(format!("No document to update: {}", path)));
            }
        }
        WriteOp::Delete { path } => {
            sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
                .bind(&path.collection)
                .bind(&path.id)
                .execute(&mut **tx)
                .await?;
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT id, data FROM documents WHERE collection = $1 AND id = $2")
            .bind(&path.collection)
            .bind(&path.id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            Ok(Document {
                id: r.try_get("id")?,
                data: r.try_get::<JsonValue, _>("data")?,
            })
        })
        .transpose()
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        query.validate()?;
        let mut qb = build_select(query);
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|r| {
                Ok(Document {
                    id: r.try_get("id")?,
                    data: r.try_get::<JsonValue, _>("data")?,
                })
            })
            .collect()
    }

    async fn commit(&self, writes: &[WriteOp]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for write in writes {
            apply_write(&mut tx, write).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn transaction(
        &self,
        reads: &[DocumentPath],
        apply: TransactionFn,
    ) -> Result<Vec<Option<Document>>> {
        let mut tx = self.begin_serializable().await?;
        let mut snapshot = Vec::with_capacity(reads.len());
        for path in reads {
            snapshot.push(read_one(&mut tx, path).await?);
        }
        let writes = apply(&snapshot)?;
        for write in &writes {
            apply_write(&mut tx, write).await?;
        }
        tx.commit().await?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::store::{Cursor, Filter, OrderBy};
    use serde_json::json;

    #[test]
    fn select_binds_every_value() {
        let q = Query::collection("users/u1/testHistory")
            .filter(Filter::eq("folderId", JsonValue::Null))
            .filter(Filter::new("score", FilterOp::Gte, 50))
            .order_by(OrderBy::desc("createdAt"))
            .limit(11)
            .start_after(Some(Cursor {
                id: "abc".into(),
                values: vec![json!("2026-10-01T00:00:00Z")],
            }));
        let qb = build_select(&q);
        let sql = qb.sql();
        assert!(sql.starts_with("SELECT id, data FROM documents WHERE collection = $1"));
        assert!(sql.contains("ORDER BY COALESCE(data -> "));
        // collection, 2 + 4 filter binds, 5 cursor binds, 1 order field, limit
        let binds = sql.matches('$').count();
        assert_eq!(binds, 14);
        assert!(sql.ends_with(&format!("LIMIT ${}", binds)));
        assert!(sql.contains(" AND id > $12))"));
        assert!(!sql.contains("createdAt"));
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch Postgres database"]
    async fn round_trips_through_postgres() {
        dotenvy::dotenv().ok();
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = crate::database::pool::create_pool(&url).await.expect("pool");
        let store = PgDocumentStore::new(pool);
        store.migrate().await.expect("migrations");

        let collection = format!("pg_test_{}", uuid::Uuid::new_v4().simple());
        let path = DocumentPath::new(&collection, "doc1");
        store
            .commit(&[WriteOp::set(path.clone(), json!({"score": 87, "name": "Quiz"}))])
            .await
            .expect("commit");
        store
            .commit(&[WriteOp::update(path.clone(), json!({"score": 90}))])
            .await
            .expect("update");

        let found = store
            .query(&Query::collection(&collection).filter(Filter::new("score", FilterOp::Gt, 80)))
            .await
            .expect("query");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].data, json!({"score": 90, "name": "Quiz"}));

        store.commit(&[WriteOp::delete(path.clone())]).await.expect("delete");
        assert!(store.get(&path).await.expect("get").is_none());
    }
}
