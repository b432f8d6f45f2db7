//! Indexing pipeline: stored file → text → chunks → vectors.
//!
//! Extraction, chunking and embedding run without holding the knowledge
//! base's write lock, since embedding can take seconds per file. The lock is
//! taken only for the write phase, which re-checks that the knowledge base
//! still exists, drops the file's previous chunks, upserts the new ones and
//! refreshes the chunk cache. A deletion that lands while a file is being
//! embedded therefore wins, and the indexing call fails with
//! [`RagError::KnowledgeBaseNotFound`] instead of resurrecting a collection.
//!
//! The file itself is re-read under the lock as well. If it was deleted in
//! the meantime the call fails with [`RagError::FileNotFound`]; if it was
//! overwritten, its SHA-256 no longer matches the embedded bytes and the call
//! fails with [`RagError::FileChanged`]. Either way nothing is written.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use ragbase_core::chunk::{chunk_text, ChunkingConfig};
use ragbase_core::models::Chunk;
use ragbase_core::{RagError, Result};

use crate::document_store::{validate_filename, CachedChunks};
use crate::embedding::EmbeddingAdapter;
use crate::extract::extract_text;
use crate::registry::KnowledgeBaseRegistry;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IndexReport {
    pub kb_name: String,
    pub filename: String,
    pub chunks: usize,
    pub dims: usize,
}

/// Outcome of indexing every file of a knowledge base.
#[derive(Debug, Clone, Serialize, Default)]
pub struct IndexAllReport {
    pub kb_name: String,
    pub indexed: Vec<IndexReport>,
    pub failed: Vec<IndexFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexFailure {
    pub filename: String,
    pub code: String,
    pub message: String,
}

pub struct Indexer {
    registry: Arc<KnowledgeBaseRegistry>,
    embedder: Arc<EmbeddingAdapter>,
    chunking: ChunkingConfig,
}

impl Indexer {
    pub fn new(
        registry: Arc<KnowledgeBaseRegistry>,
        embedder: Arc<EmbeddingAdapter>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            registry,
            embedder,
            chunking,
        }
    }

    /// Index one stored file, replacing whatever was indexed for it before.
    ///
    /// `chunking` overrides the configured chunk size and overlap for this
    /// call only.
    pub async fn index_file(
        &self,
        kb: &str,
        filename: &str,
        chunking: Option<&ChunkingConfig>,
    ) -> Result<IndexReport> {
        validate_filename(filename)?;
        let chunking = chunking.unwrap_or(&self.chunking);
        chunking.validate()?;

        self.registry.require(kb).await?;
        let bytes = self.registry.documents().get_file(kb, filename).await?;
        let content_sha256 = format!("{:x}", Sha256::digest(&bytes));

        let text = extract_text(filename, &bytes)
            .map_err(|e| RagError::InvalidInput(format!("{}: {}", filename, e)))?;
        let segments = chunk_text(&text, chunking)?;

        let texts: Vec<String> = segments.iter().map(|s| s.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed(&texts).await?
        };

        let chunks: Vec<Chunk> = segments
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (segment, embedding))| Chunk {
                text: segment.text.clone(),
                source_filename: filename.to_string(),
                sequence_index: i as u32,
                start_offset: segment.start,
                end_offset: segment.end,
                embedding,
            })
            .collect();

        let _guard = self.registry.write_lock_existing(kb).await?;
        let current = self.registry.documents().get_file(kb, filename).await?;
        if format!("{:x}", Sha256::digest(&current)) != content_sha256 {
            warn!(kb, filename, "file replaced while indexing; discarding chunks");
            return Err(RagError::FileChanged {
                kb: kb.to_string(),
                filename: filename.to_string(),
            });
        }

        let index = self.registry.index();
        let replaced = index.delete_by_filename(kb, filename).await?;
        if !chunks.is_empty() {
            index.upsert(kb, &chunks).await?;
        }

        let cache_entry = CachedChunks {
            filename: filename.to_string(),
            content_sha256,
            chunking: *chunking,
            indexed_at: Utc::now(),
            segments,
        };
        if let Err(e) = self.registry.cache().write(kb, &cache_entry).await {
            warn!(kb, filename, error = %e, "failed to write chunk cache");
        }

        if chunks.is_empty() {
            warn!(kb, filename, "no text extracted; file has no chunks");
        }
        info!(
            kb,
            filename,
            chunks = chunks.len(),
            replaced,
            model = self.embedder.model_name(),
            "indexed file"
        );

        Ok(IndexReport {
            kb_name: kb.to_string(),
            filename: filename.to_string(),
            chunks: chunks.len(),
            dims: self.embedder.dims(),
        })
    }

    /// Index every stored file. Per-file failures are collected; a missing
    /// knowledge base fails the whole call.
    pub async fn index_all(
        &self,
        kb: &str,
        chunking: Option<&ChunkingConfig>,
    ) -> Result<IndexAllReport> {
        self.registry.require(kb).await?;
        let files = self.registry.documents().list_files(kb).await?;

        let mut report = IndexAllReport {
            kb_name: kb.to_string(),
            ..IndexAllReport::default()
        };
        for file in files {
            match self.index_file(kb, &file.filename, chunking).await {
                Ok(r) => report.indexed.push(r),
                Err(e @ RagError::KnowledgeBaseNotFound(_)) => return Err(e),
                Err(e) => {
                    warn!(kb, filename = %file.filename, error = %e, "indexing failed");
                    report.failed.push(IndexFailure {
                        filename: file.filename,
                        code: e.code().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }
}
