//! In-memory [`VectorIndex`] implementation for tests and ephemeral runs.
//!
//! Collections live in a `HashMap` behind `std::sync::RwLock`. Search is
//! brute-force cosine similarity over every chunk in the collection.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::models::{Chunk, CollectionInfo, ScoredChunk};

use super::{check_batch_dims, rank, VectorIndex};

struct Collection {
    dims: usize,
    entries: BTreeMap<(String, u32), Chunk>,
}

/// Process-local vector index; contents are lost when dropped.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, kb: &str, chunks: &[Chunk]) -> Result<()> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let existing = collections.get(kb).map(|c| c.dims);
        let dims = match check_batch_dims(existing, chunks)? {
            Some(d) => d,
            None => return Ok(()),
        };
        let collection = collections.entry(kb.to_string()).or_insert_with(|| Collection {
            dims,
            entries: BTreeMap::new(),
        });
        for chunk in chunks {
            collection.entries.insert(
                (chunk.source_filename.clone(), chunk.sequence_index),
                chunk.clone(),
            );
        }
        Ok(())
    }

    async fn search(&self, kb: &str, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let collection = match collections.get(kb) {
            Some(c) => c,
            None => return Ok(Vec::new()),
        };
        if query.len() != collection.dims {
            return Err(RagError::DimensionMismatch {
                expected: collection.dims,
                actual: query.len(),
            });
        }
        let hits = collection
            .entries
            .values()
            .map(|chunk| ScoredChunk {
                score: cosine_similarity(query, &chunk.embedding),
                chunk: chunk.clone(),
            })
            .collect();
        Ok(rank(hits, top_k))
    }

    async fn delete_collection(&self, kb: &str) -> Result<()> {
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(kb);
        Ok(())
    }

    async fn delete_by_filename(&self, kb: &str, filename: &str) -> Result<usize> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(collection) = collections.get_mut(kb) else {
            return Ok(0);
        };
        let before = collection.entries.len();
        collection.entries.retain(|(name, _), _| name != filename);
        Ok(before - collection.entries.len())
    }

    async fn collection_exists(&self, kb: &str) -> Result<bool> {
        Ok(self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(kb))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn list_filenames(&self, kb: &str) -> Result<Vec<String>> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = collections
            .get(kb)
            .map(|c| c.entries.keys().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default();
        names.dedup();
        Ok(names)
    }

    async fn collection_info(&self, kb: &str) -> Result<Option<CollectionInfo>> {
        Ok(self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kb)
            .map(|c| CollectionInfo {
                dims: c.dims,
                chunk_count: c.entries.len(),
            }))
    }
}
