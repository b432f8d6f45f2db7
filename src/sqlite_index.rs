//! SQLite-backed [`VectorIndex`] implementation.
//!
//! Collections are rows in `collections` (name, fixed dims); chunks are rows
//! in `chunk_vectors` keyed by `(collection, filename, sequence_index)` with
//! the embedding stored as a little-endian f32 BLOB. Search loads the
//! collection's vectors and ranks them by brute-force cosine similarity.

use std::path::Path;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use ragbase_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use ragbase_core::index::{check_batch_dims, rank, VectorIndex};
use ragbase_core::models::{Chunk, CollectionInfo, ScoredChunk};
use ragbase_core::{RagError, Result};

use crate::{db, migrate};

/// Persistent vector index; survives process restarts.
pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

fn backend(err: sqlx::Error) -> RagError {
    RagError::VectorIndex(err.to_string())
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to (or create) the database at `db_path` and apply migrations.
    pub async fn open(db_path: &Path) -> anyhow::Result<Self> {
        let pool = db::connect(db_path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    async fn dims(&self, kb: &str) -> Result<Option<usize>> {
        let dims: Option<i64> = sqlx::query_scalar("SELECT dims FROM collections WHERE name = ?")
            .bind(kb)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(dims.map(|d| d as usize))
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, kb: &str, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM collections WHERE name = ?")
                .bind(kb)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?;
        let dims = match check_batch_dims(existing.map(|d| d as usize), chunks)? {
            Some(d) => d,
            None => return Ok(()),
        };

        if existing.is_none() {
            sqlx::query("INSERT INTO collections (name, dims, created_at) VALUES (?, ?, ?)")
                .bind(kb)
                .bind(dims as i64)
                .bind(chrono::Utc::now().timestamp())
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (collection, filename, sequence_index, text,
                                           start_offset, end_offset, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, filename, sequence_index) DO UPDATE SET
                    text = excluded.text,
                    start_offset = excluded.start_offset,
                    end_offset = excluded.end_offset,
                    embedding = excluded.embedding
                "#,
            )
            .bind(kb)
            .bind(&chunk.source_filename)
            .bind(chunk.sequence_index as i64)
            .bind(&chunk.text)
            .bind(chunk.start_offset as i64)
            .bind(chunk.end_offset as i64)
            .bind(vec_to_blob(&chunk.embedding))
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn search(&self, kb: &str, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let Some(dims) = self.dims(kb).await? else {
            return Ok(Vec::new());
        };
        if query.len() != dims {
            return Err(RagError::DimensionMismatch {
                expected: dims,
                actual: query.len(),
            });
        }

        let rows = sqlx::query(
            r#"
            SELECT filename, sequence_index, text, start_offset, end_offset, embedding
            FROM chunk_vectors
            WHERE collection = ?
            "#,
        )
        .bind(kb)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let hits = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let embedding = blob_to_vec(&blob);
                ScoredChunk {
                    score: cosine_similarity(query, &embedding),
                    chunk: Chunk {
                        text: row.get("text"),
                        source_filename: row.get("filename"),
                        sequence_index: row.get::<i64, _>("sequence_index") as u32,
                        start_offset: row.get::<i64, _>("start_offset") as usize,
                        end_offset: row.get::<i64, _>("end_offset") as usize,
                        embedding,
                    },
                }
            })
            .collect();

        Ok(rank(hits, top_k))
    }

    async fn delete_collection(&self, kb: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("DELETE FROM chunk_vectors WHERE collection = ?")
            .bind(kb)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(kb)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn delete_by_filename(&self, kb: &str, filename: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunk_vectors WHERE collection = ? AND filename = ?")
            .bind(kb)
            .bind(filename)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() as usize)
    }

    async fn collection_exists(&self, kb: &str) -> Result<bool> {
        Ok(self.dims(kb).await?.is_some())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT name FROM collections ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)
    }

    async fn list_filenames(&self, kb: &str) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT DISTINCT filename FROM chunk_vectors WHERE collection = ? ORDER BY filename",
        )
        .bind(kb)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)
    }

    async fn collection_info(&self, kb: &str) -> Result<Option<CollectionInfo>> {
        let Some(dims) = self.dims(kb).await? else {
            return Ok(None);
        };
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE collection = ?")
            .bind(kb)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(Some(CollectionInfo {
            dims,
            chunk_count: count as usize,
        }))
    }
}
