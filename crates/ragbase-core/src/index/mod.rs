//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait defines the collection-oriented operations the
//! indexing and retrieval pipeline needs: one collection per knowledge base,
//! entries keyed by `(source_filename, sequence_index)`, brute-force or
//! native similarity search, and deletion by collection or by filename.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert`](VectorIndex::upsert) | Insert or replace chunks, creating the collection lazily |
//! | [`search`](VectorIndex::search) | Top-K cosine similarity search |
//! | [`delete_collection`](VectorIndex::delete_collection) | Drop a whole collection (idempotent) |
//! | [`delete_by_filename`](VectorIndex::delete_by_filename) | Drop one file's chunks (idempotent) |
//! | [`collection_exists`](VectorIndex::collection_exists) | Existence check used by the registry |
//! | [`list_collections`](VectorIndex::list_collections) | Collection names, for orphan pruning |
//! | [`list_filenames`](VectorIndex::list_filenames) | Distinct filenames with stored chunks |
//! | [`collection_info`](VectorIndex::collection_info) | Dimensionality and chunk count |

pub mod memory;

use std::cmp::Ordering;

use async_trait::async_trait;

use crate::error::{RagError, Result};
use crate::models::{Chunk, CollectionInfo, ScoredChunk};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace `chunks` in collection `kb`.
    ///
    /// Creates the collection with the first chunk's dimensionality when it
    /// does not exist. A chunk of any other dimensionality rejects the whole
    /// batch with [`RagError::DimensionMismatch`] and nothing is written.
    async fn upsert(&self, kb: &str, chunks: &[Chunk]) -> Result<()>;

    /// Return at most `top_k` chunks ordered by descending cosine score.
    ///
    /// A missing collection yields an empty result.
    async fn search(&self, kb: &str, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>>;

    async fn delete_collection(&self, kb: &str) -> Result<()>;

    /// Remove every chunk whose source filename is `filename`, returning how
    /// many were removed.
    async fn delete_by_filename(&self, kb: &str, filename: &str) -> Result<usize>;

    async fn collection_exists(&self, kb: &str) -> Result<bool>;

    async fn list_collections(&self) -> Result<Vec<String>>;

    async fn list_filenames(&self, kb: &str) -> Result<Vec<String>>;

    async fn collection_info(&self, kb: &str) -> Result<Option<CollectionInfo>>;
}

/// Check that every chunk in a batch matches `dims`.
///
/// When `dims` is `None` (collection not yet created) the first chunk
/// defines the dimensionality. Returns the dimensionality the batch uses.
pub fn check_batch_dims(dims: Option<usize>, chunks: &[Chunk]) -> Result<Option<usize>> {
    let expected = match dims.or_else(|| chunks.first().map(|c| c.embedding.len())) {
        Some(d) => d,
        None => return Ok(None),
    };
    if expected == 0 {
        return Err(RagError::InvalidInput(
            "chunk embeddings must not be empty".to_string(),
        ));
    }
    if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != expected) {
        return Err(RagError::DimensionMismatch {
            expected,
            actual: bad.embedding.len(),
        });
    }
    Ok(Some(expected))
}

/// Order search hits by score (descending), then by `sequence_index` and
/// filename (ascending), and keep the first `top_k`.
pub fn rank(mut hits: Vec<ScoredChunk>, top_k: usize) -> Vec<ScoredChunk> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk.sequence_index.cmp(&b.chunk.sequence_index))
            .then_with(|| a.chunk.source_filename.cmp(&b.chunk.source_filename))
    });
    hits.truncate(top_k);
    hits
}
