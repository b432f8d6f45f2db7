//! Query-time retrieval: embed the query, search the knowledge base's
//! collection, return ranked contexts.
//!
//! Searches never take the knowledge base's write lock. A search that runs
//! while a file is being re-indexed may see that file with no chunks for
//! the instant between the old chunks being dropped and the new ones
//! landing.

use std::sync::Arc;

use tracing::debug;

use ragbase_core::index::VectorIndex;
use ragbase_core::models::RetrievalContext;
use ragbase_core::{RagError, Result};

use crate::embedding::EmbeddingAdapter;
use crate::registry::KnowledgeBaseRegistry;

pub struct RetrievalEngine {
    registry: Arc<KnowledgeBaseRegistry>,
    embedder: Arc<EmbeddingAdapter>,
    index: Arc<dyn VectorIndex>,
    default_top_k: usize,
}

impl RetrievalEngine {
    pub fn new(
        registry: Arc<KnowledgeBaseRegistry>,
        embedder: Arc<EmbeddingAdapter>,
        default_top_k: usize,
    ) -> Self {
        let index = registry.index().clone();
        Self {
            registry,
            embedder,
            index,
            default_top_k,
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    /// Top-`top_k` chunks of `kb` by cosine similarity to `query`.
    ///
    /// `top_k` defaults to the configured value; `Some(0)` returns nothing
    /// without calling the embedding service.
    pub async fn retrieve(
        &self,
        kb: &str,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<RetrievalContext>> {
        self.registry.require(kb).await?;
        if query.trim().is_empty() {
            return Err(RagError::InvalidInput("query must not be empty".to_string()));
        }
        let top_k = top_k.unwrap_or(self.default_top_k);
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed_query(query).await?;
        let hits = self.index.search(kb, &vector, top_k).await?;
        debug!(kb, top_k, hits = hits.len(), "retrieved contexts");

        Ok(hits.into_iter().map(RetrievalContext::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragbase_core::chunk::ChunkingConfig;
    use ragbase_core::embedding::HashingProvider;
    use ragbase_core::index::memory::InMemoryVectorIndex;
    use tempfile::TempDir;

    use crate::document_store::{ChunkCache, FsDocumentStore};
    use crate::ingest::Indexer;

    async fn setup(tmp: &TempDir) -> (Arc<KnowledgeBaseRegistry>, Indexer, RetrievalEngine) {
        let registry = Arc::new(KnowledgeBaseRegistry::new(
            Arc::new(FsDocumentStore::new(tmp.path().join("uploads"))),
            Arc::new(InMemoryVectorIndex::new()),
            ChunkCache::new(tmp.path().join("chunks")),
        ));
        let embedder = Arc::new(EmbeddingAdapter::new(Arc::new(HashingProvider::new(128))));
        let indexer = Indexer::new(registry.clone(), embedder.clone(), ChunkingConfig::default());
        let engine = RetrievalEngine::new(registry.clone(), embedder, 5);
        (registry, indexer, engine)
    }

    #[tokio::test]
    async fn test_retrieve_finds_relevant_file() {
        let tmp = TempDir::new().unwrap();
        let (registry, indexer, engine) = setup(&tmp).await;
        registry.create("Docs").await.unwrap();
        registry.upload_file("Docs", "a.txt", b"The sky is blue.").await.unwrap();
        registry
            .upload_file("Docs", "b.txt", b"Bananas are yellow fruit.")
            .await
            .unwrap();
        indexer.index_all("Docs", None).await.unwrap();

        let contexts = engine.retrieve("Docs", "What color is the sky?", None).await.unwrap();
        assert_eq!(contexts.len(), 2);
        assert_eq!(contexts[0].filename, "a.txt");
        assert!(contexts[0].text.contains("blue"));
        assert!(contexts[0].score.unwrap() > contexts[1].score.unwrap());
    }

    #[tokio::test]
    async fn test_top_k_bounds_results() {
        let tmp = TempDir::new().unwrap();
        let (registry, indexer, engine) = setup(&tmp).await;
        registry.create("Docs").await.unwrap();
        for i in 0..4 {
            registry
                .upload_file("Docs", &format!("f{i}.txt"), format!("note {i} about rust").as_bytes())
                .await
                .unwrap();
        }
        indexer.index_all("Docs", None).await.unwrap();

        assert_eq!(engine.retrieve("Docs", "rust", Some(2)).await.unwrap().len(), 2);
        assert_eq!(engine.retrieve("Docs", "rust", None).await.unwrap().len(), 4);
        assert!(engine.retrieve("Docs", "rust", Some(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_errors() {
        let tmp = TempDir::new().unwrap();
        let (registry, _, engine) = setup(&tmp).await;
        assert!(matches!(
            engine.retrieve("Docs", "sky", None).await,
            Err(RagError::KnowledgeBaseNotFound(_))
        ));
        registry.create("Docs").await.unwrap();
        assert!(matches!(
            engine.retrieve("Docs", "   ", None).await,
            Err(RagError::InvalidInput(_))
        ));
        // Active but never indexed.
        assert!(engine.retrieve("Docs", "sky", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_file_is_not_retrieved() {
        let tmp = TempDir::new().unwrap();
        let (registry, indexer, engine) = setup(&tmp).await;
        registry.create("Docs").await.unwrap();
        registry.upload_file("Docs", "a.txt", b"The sky is blue.").await.unwrap();
        indexer.index_file("Docs", "a.txt", None).await.unwrap();

        registry.delete_file("Docs", "a.txt").await.unwrap();
        assert!(engine.retrieve("Docs", "sky", None).await.unwrap().is_empty());
    }
}
