//! SQLite-backed [`Store`] implementation.
//!
//! `bm25Search` is backed by an FTS5 virtual table; `vectorSearch` is a
//! brute-force cosine scan over the `chunk_vectors` table — acceptable
//! at the corpus sizes this component targets. [`Filter`]s are
//! translated into SQL `WHERE` fragments and pushed down to the query
//! rather than applied post-hoc, since `WHERE source IN (...)` is native
//! SQL and `supports_or_filter()` reports `true` for this backend.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use ragctl_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use ragctl_core::models::Chunk;
use ragctl_core::store::{ChunkCandidate, Filter, Store, VectorStoreStats};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Append a `Filter` as a SQL boolean expression to `builder`, wrapped in
/// parentheses so it composes safely inside a larger `WHERE` clause.
fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &Filter) {
    match filter {
        Filter::Equal { path, value } => {
            let column = match path.as_str() {
                "source" => "source",
                "doc_type" => "doc_type",
                "section" => "section",
                other => {
                    // Unknown path: fail closed (matches nothing) rather than
                    // silently ignoring an unsupported predicate.
                    builder.push("(1 = 0 /* unsupported filter path: ");
                    builder.push_bind(other.to_string());
                    builder.push(" */)");
                    return;
                }
            };
            builder.push("(");
            builder.push(column);
            builder.push(" = ");
            builder.push_bind(value.clone());
            builder.push(")");
        }
        Filter::Or(children) => {
            builder.push("(");
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    builder.push(" OR ");
                }
                push_filter(builder, child);
            }
            builder.push(")");
        }
        Filter::And(children) => {
            builder.push("(");
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    builder.push(" AND ");
                }
                push_filter(builder, child);
            }
            builder.push(")");
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert(&self, chunk: &Chunk, vector: &[f32]) -> Result<()> {
        let tags_json = serde_json::to_string(&chunk.tags)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO chunks (id, source, chunk_index, text, section, doc_type, tags_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source, chunk_index) DO UPDATE SET
                id = excluded.id,
                text = excluded.text,
                section = excluded.section,
                doc_type = excluded.doc_type,
                tags_json = excluded.tags_json,
                created_at = excluded.created_at
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.source)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.section)
        .bind(chunk.doc_type.as_str())
        .bind(&tags_json)
        .bind(chunk.created_at.timestamp())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(&chunk.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO chunks_fts (chunk_id, text) VALUES (?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;

        let blob = vec_to_blob(vector);
        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, embedding) VALUES (?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET embedding = excluded.embedding
            "#,
        )
        .bind(&chunk.id)
        .bind(&blob)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        k: i64,
        filter: Option<&Filter>,
    ) -> Result<Vec<ChunkCandidate>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT c.id, c.source, c.chunk_index, c.section, c.created_at, c.text, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            "#,
        );
        if let Some(f) = filter {
            builder.push(" WHERE ");
            push_filter(&mut builder, f);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;

        let mut candidates: Vec<ChunkCandidate> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                let raw_score = cosine_similarity(query_vec, &vec) as f64;
                let text: String = row.get("text");
                ChunkCandidate {
                    chunk_id: row.get("id"),
                    source: row.get("source"),
                    chunk_index: row.get("chunk_index"),
                    raw_score,
                    snippet: text.chars().take(240).collect(),
                    section: row.get("section"),
                    updated_at: row.get("created_at"),
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(k as usize);
        Ok(candidates)
    }

    async fn bm25_search(
        &self,
        query_text: &str,
        k: i64,
        filter: Option<&Filter>,
    ) -> Result<Vec<ChunkCandidate>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT c.id, c.source, c.chunk_index, c.section, c.created_at,
                   bm25(chunks_fts) AS rank,
                   snippet(chunks_fts, 1, '>>>', '<<<', '...', 48) AS snippet
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH
            "#,
        );
        builder.push_bind(query_text.to_string());

        if let Some(f) = filter {
            builder.push(" AND ");
            push_filter(&mut builder, f);
        }
        builder.push(" ORDER BY rank LIMIT ");
        builder.push_bind(k);

        let rows = builder.build().fetch_all(&self.pool).await?;

        let candidates = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                ChunkCandidate {
                    chunk_id: row.get("id"),
                    source: row.get("source"),
                    chunk_index: row.get("chunk_index"),
                    raw_score: -rank,
                    snippet: row.get("snippet"),
                    section: row.get("section"),
                    updated_at: row.get("created_at"),
                }
            })
            .collect();

        Ok(candidates)
    }

    fn supports_or_filter(&self) -> bool {
        true
    }

    async fn delete_by_source(&self, source: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM chunks_fts WHERE chunk_id IN (SELECT id FROM chunks WHERE source = ?)",
        )
        .bind(source)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE source = ?)",
        )
        .bind(source)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM chunks WHERE source = ?")
            .bind(source)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn reset_collection(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks_fts").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM chunk_vectors").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn stats(&self) -> Result<VectorStoreStats> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS n FROM chunks")
            .fetch_one(&self.pool)
            .await?
            .get("n");

        let rows = sqlx::query("SELECT doc_type, COUNT(*) AS n FROM chunks GROUP BY doc_type")
            .fetch_all(&self.pool)
            .await?;

        let by_type = rows
            .iter()
            .map(|r| (r.get::<String, _>("doc_type"), r.get::<i64, _>("n") as u64))
            .collect();

        Ok(VectorStoreStats {
            total_chunks: total as u64,
            by_type,
        })
    }
}
