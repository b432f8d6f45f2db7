//! Process-wide component graph.
//!
//! [`Services::from_config`] builds every component once: the document
//! store, vector index, registry, embedding adapter, indexer, retrieval
//! engine and chat orchestrator. The CLI and the HTTP server share this
//! construction path, so both see the same wiring.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;

use ragbase_core::generation::PromptOptions;
use ragbase_core::index::memory::InMemoryVectorIndex;
use ragbase_core::index::VectorIndex;

use crate::chat::ChatOrchestrator;
use crate::config::Config;
use crate::document_store::{ChunkCache, FsDocumentStore};
use crate::embedding::EmbeddingAdapter;
use crate::generation::create_generator;
use crate::ingest::Indexer;
use crate::registry::KnowledgeBaseRegistry;
use crate::retrieval::RetrievalEngine;
use crate::sqlite_index::SqliteVectorIndex;

pub struct Services {
    pub config: Config,
    pub registry: Arc<KnowledgeBaseRegistry>,
    pub embedder: Arc<EmbeddingAdapter>,
    pub indexer: Indexer,
    pub retrieval: Arc<RetrievalEngine>,
    pub chat: ChatOrchestrator,
}

impl Services {
    pub async fn from_config(config: &Config) -> Result<Self> {
        let index = open_index(config).await?;
        let registry = Arc::new(KnowledgeBaseRegistry::new(
            Arc::new(FsDocumentStore::new(config.storage.uploads_dir())),
            index,
            ChunkCache::new(config.storage.chunks_dir()),
        ));

        let embedder = Arc::new(
            EmbeddingAdapter::from_config(&config.embedding)
                .context("failed to set up embedding provider")?,
        );
        let generator =
            create_generator(&config.generation).context("failed to set up generation provider")?;

        let indexer = Indexer::new(
            registry.clone(),
            embedder.clone(),
            config.chunking.to_chunking(),
        );
        let retrieval = Arc::new(RetrievalEngine::new(
            registry.clone(),
            embedder.clone(),
            config.retrieval.top_k,
        ));
        let chat = ChatOrchestrator::new(
            retrieval.clone(),
            generator,
            PromptOptions {
                ctx_chars_per_chunk: config.generation.ctx_chars_per_chunk,
            },
            config.generation.top_k,
        )
        .with_timeout(Duration::from_secs(config.generation.timeout_secs))
        .with_max_attempts(config.generation.max_attempts);

        info!(
            backend = %config.vector.backend,
            embedding = embedder.model_name(),
            dims = embedder.dims(),
            "services ready"
        );

        Ok(Self {
            config: config.clone(),
            registry,
            embedder,
            indexer,
            retrieval,
            chat,
        })
    }
}

async fn open_index(config: &Config) -> Result<Arc<dyn VectorIndex>> {
    match config.vector.backend.as_str() {
        "sqlite" => {
            let path = config.storage.db_path();
            let index = SqliteVectorIndex::open(&path)
                .await
                .with_context(|| format!("failed to open vector index at {}", path.display()))?;
            Ok(Arc::new(index))
        }
        "memory" => Ok(Arc::new(InMemoryVectorIndex::new())),
        other => bail!("Unknown vector backend: {}", other),
    }
}

/// Create the data directories and the vector index schema. Idempotent.
pub async fn init_storage(config: &Config) -> Result<()> {
    for dir in [config.storage.uploads_dir(), config.storage.chunks_dir()] {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    if config.vector.backend == "sqlite" {
        SqliteVectorIndex::open(&config.storage.db_path()).await?;
    }
    Ok(())
}
