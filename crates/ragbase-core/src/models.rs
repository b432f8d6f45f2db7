//! Core data models that flow through the indexing and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named knowledge base. `doc_count` is computed on read from the
/// document store and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeBase {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub doc_count: usize,
}

/// A raw file held in a knowledge base's document store namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadedFile {
    pub filename: String,
    pub size_bytes: u64,
    pub kb_name: String,
    pub uploaded_at: Option<DateTime<Utc>>,
}

/// A chunk of a document's extracted text together with its embedding.
///
/// Identity within a collection is `(source_filename, sequence_index)`.
/// Offsets are byte positions into the extracted text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub source_filename: String,
    pub sequence_index: u32,
    pub start_offset: usize,
    pub end_offset: usize,
    pub embedding: Vec<f32>,
}

/// A chunk returned from a similarity search with its cosine score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// A retrieved context handed to callers and to the prompt builder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalContext {
    pub text: String,
    pub filename: String,
    pub score: Option<f32>,
    #[serde(default)]
    pub sequence_index: u32,
}

impl From<ScoredChunk> for RetrievalContext {
    fn from(hit: ScoredChunk) -> Self {
        RetrievalContext {
            text: hit.chunk.text,
            filename: hit.chunk.source_filename,
            score: Some(hit.score),
            sequence_index: hit.chunk.sequence_index,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One turn of caller-held conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Result of a chat turn: the generated answer and the exact contexts it was
/// grounded on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub response: String,
    pub contexts: Vec<RetrievalContext>,
}

/// Dimensionality and size of one vector collection.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CollectionInfo {
    pub dims: usize,
    pub chunk_count: usize,
}
