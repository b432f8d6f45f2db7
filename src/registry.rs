//! Knowledge base registry.
//!
//! [`KnowledgeBaseRegistry`] is the single owner of knowledge-base lifecycle
//! state. It is constructed once per process and passed explicitly to the
//! indexing, retrieval and chat components. It holds no cached state of its
//! own: which knowledge bases exist and how many documents each holds are
//! read from the [`DocumentStore`] on every call, and vector state is read
//! from the [`VectorIndex`].
//!
//! Every mutation of a knowledge base (create, delete, file upload/delete,
//! vector upsert, reconciliation) runs under that knowledge base's write
//! lock, obtained through [`KnowledgeBaseRegistry::write_lock`]. Searches do
//! not take the lock.
//!
//! # Deletion
//!
//! Deleting a knowledge base removes, in order, its vector collection, its
//! document namespace and its chunk cache. Vector and cache failures are
//! logged and reported as warnings; the call still succeeds as long as the
//! document namespace is gone, since that is what makes a deletion stick.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, warn};

use ragbase_core::index::VectorIndex;
use ragbase_core::models::{KnowledgeBase, UploadedFile};
use ragbase_core::{RagError, Result};

use crate::document_store::{validate_filename, validate_kb_name, ChunkCache, DocumentStore};

/// One async mutex per knowledge base name.
#[derive(Default)]
struct KbLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KbLocks {
    async fn acquire(&self, kb: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(kb.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Forget `kb`'s mutex unless a guard or waiter still holds it.
    fn release(&self, kb: &str) {
        let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(kb).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(kb);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A non-fatal failure recorded while deleting.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeletionWarning {
    pub code: String,
    pub message: String,
}

impl From<&RagError> for DeletionWarning {
    fn from(err: &RagError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub name: String,
    pub warnings: Vec<DeletionWarning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub file: UploadedFile,
    /// True when a file of the same name was overwritten.
    pub replaced: bool,
    /// Stale chunks removed for the filename.
    pub purged_chunks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileDeleteReport {
    pub kb_name: String,
    pub filename: String,
    pub purged_chunks: usize,
    pub warnings: Vec<DeletionWarning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    #[serde(flatten)]
    pub file: UploadedFile,
    /// Whether any chunks for this file are in the vector index.
    pub indexed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileListing {
    pub kb_name: String,
    pub files: Vec<FileEntry>,
    /// Filenames with chunks in the index but no file in the document store.
    pub orphaned_vectors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ReconcileReport {
    pub kb_name: String,
    pub removed_filenames: Vec<String>,
    pub removed_chunks: usize,
}

pub struct KnowledgeBaseRegistry {
    documents: Arc<dyn DocumentStore>,
    index: Arc<dyn VectorIndex>,
    cache: ChunkCache,
    locks: KbLocks,
}

impl KnowledgeBaseRegistry {
    pub fn new(documents: Arc<dyn DocumentStore>, index: Arc<dyn VectorIndex>, cache: ChunkCache) -> Self {
        Self {
            documents,
            index,
            cache,
            locks: KbLocks::default(),
        }
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn cache(&self) -> &ChunkCache {
        &self.cache
    }

    /// Wait for exclusive write access to `kb`.
    pub async fn write_lock(&self, kb: &str) -> OwnedMutexGuard<()> {
        self.locks.acquire(kb).await
    }

    /// Like [`write_lock`](Self::write_lock), but fails with
    /// [`RagError::KnowledgeBaseNotFound`] once the lock is held if `kb` is
    /// not active. The lock entry of a missing knowledge base is dropped.
    pub async fn write_lock_existing(&self, kb: &str) -> Result<OwnedMutexGuard<()>> {
        let guard = self.write_lock(kb).await;
        match self.require(kb).await {
            Ok(()) => Ok(guard),
            Err(e) => {
                drop(guard);
                self.locks.release(kb);
                Err(e)
            }
        }
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        validate_kb_name(name)?;
        self.documents.namespace_exists(name).await
    }

    /// Fail with [`RagError::KnowledgeBaseNotFound`] unless `name` is active.
    pub async fn require(&self, name: &str) -> Result<()> {
        if self.exists(name).await? {
            Ok(())
        } else {
            Err(RagError::KnowledgeBaseNotFound(name.to_string()))
        }
    }

    pub async fn create(&self, name: &str) -> Result<KnowledgeBase> {
        validate_kb_name(name)?;
        let _guard = self.write_lock(name).await;

        if self.documents.namespace_exists(name).await?
            || self.index.collection_exists(name).await?
        {
            return Err(RagError::AlreadyExists(name.to_string()));
        }

        self.documents.create_namespace(name).await?;
        info!(kb = name, "created knowledge base");

        let created_at = self
            .documents
            .namespace(name)
            .await?
            .and_then(|ns| ns.created_at);
        Ok(KnowledgeBase {
            name: name.to_string(),
            created_at,
            doc_count: 0,
        })
    }

    /// All knowledge bases, with `doc_count` derived from the document store.
    pub async fn list(&self) -> Result<Vec<KnowledgeBase>> {
        let mut kbs = Vec::new();
        for ns in self.documents.list_namespaces().await? {
            let files = match self.documents.list_files(&ns.name).await {
                Ok(files) => files,
                // Deleted between the two reads.
                Err(RagError::KnowledgeBaseNotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            kbs.push(KnowledgeBase {
                name: ns.name,
                created_at: ns.created_at,
                doc_count: files.len(),
            });
        }
        Ok(kbs)
    }

    pub async fn get(&self, name: &str) -> Result<KnowledgeBase> {
        validate_kb_name(name)?;
        let ns = self
            .documents
            .namespace(name)
            .await?
            .ok_or_else(|| RagError::KnowledgeBaseNotFound(name.to_string()))?;
        let files = self.documents.list_files(name).await?;
        Ok(KnowledgeBase {
            name: ns.name,
            created_at: ns.created_at,
            doc_count: files.len(),
        })
    }

    pub async fn delete(&self, name: &str) -> Result<DeleteReport> {
        validate_kb_name(name)?;
        let guard = self.write_lock(name).await;
        let result = self.delete_locked(name).await;
        drop(guard);
        self.locks.release(name);
        result
    }

    async fn delete_locked(&self, name: &str) -> Result<DeleteReport> {
        let has_namespace = self.documents.namespace_exists(name).await?;
        let has_collection = match self.index.collection_exists(name).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(kb = name, error = %e, "could not check vector collection");
                has_namespace
            }
        };
        if !has_namespace && !has_collection {
            return Err(RagError::KnowledgeBaseNotFound(name.to_string()));
        }

        let mut warnings = Vec::new();

        if let Err(e) = self.index.delete_collection(name).await {
            error!(kb = name, error = %e, "failed to delete vector collection, continuing");
            warnings.push(RagError::PartialDeletionFailure {
                kb: name.to_string(),
                message: format!("vector collection: {}", e),
            });
        }

        let documents_result = self.documents.delete_namespace(name).await;
        if let Err(e) = &documents_result {
            error!(kb = name, error = %e, "failed to delete document namespace");
        }

        if let Err(e) = self.cache.remove_kb(name).await {
            warn!(kb = name, error = %e, "failed to delete chunk cache");
            warnings.push(RagError::PartialDeletionFailure {
                kb: name.to_string(),
                message: format!("chunk cache: {}", e),
            });
        }

        documents_result?;
        info!(kb = name, warnings = warnings.len(), "deleted knowledge base");

        Ok(DeleteReport {
            name: name.to_string(),
            warnings: warnings.iter().map(DeletionWarning::from).collect(),
        })
    }

    /// Store a file, overwriting any file of the same name. Chunks indexed
    /// from a previous version are purged, so the index never serves text
    /// the document store no longer holds.
    pub async fn upload_file(&self, kb: &str, filename: &str, bytes: &[u8]) -> Result<UploadReport> {
        validate_kb_name(kb)?;
        validate_filename(filename)?;
        let _guard = self.write_lock_existing(kb).await?;

        let (file, replaced) = self.documents.put_file(kb, filename, bytes).await?;

        let purged_chunks = match self.index.delete_by_filename(kb, filename).await {
            Ok(n) => n,
            Err(e) => {
                warn!(kb, filename, error = %e, "failed to purge stale chunks after upload");
                0
            }
        };
        if let Err(e) = self.cache.remove_file(kb, filename).await {
            warn!(kb, filename, error = %e, "failed to purge chunk cache after upload");
        }

        info!(kb, filename, size_bytes = file.size_bytes, replaced, "stored file");
        Ok(UploadReport {
            file,
            replaced,
            purged_chunks,
        })
    }

    pub async fn list_files(&self, kb: &str) -> Result<FileListing> {
        self.require(kb).await?;
        let files = self.documents.list_files(kb).await?;
        let indexed: BTreeSet<String> = self.index.list_filenames(kb).await?.into_iter().collect();

        let on_disk: BTreeSet<&str> = files.iter().map(|f| f.filename.as_str()).collect();
        let orphaned_vectors = indexed
            .iter()
            .filter(|name| !on_disk.contains(name.as_str()))
            .cloned()
            .collect();

        Ok(FileListing {
            kb_name: kb.to_string(),
            files: files
                .into_iter()
                .map(|file| FileEntry {
                    indexed: indexed.contains(&file.filename),
                    file,
                })
                .collect(),
            orphaned_vectors,
        })
    }

    /// Delete a file and purge its chunks. A purge failure is logged and
    /// reported; the orphaned chunks can be removed later with
    /// [`reconcile`](Self::reconcile).
    pub async fn delete_file(&self, kb: &str, filename: &str) -> Result<FileDeleteReport> {
        validate_kb_name(kb)?;
        validate_filename(filename)?;
        let _guard = self.write_lock_existing(kb).await?;

        self.documents.delete_file(kb, filename).await?;

        let mut warnings = Vec::new();
        let purged_chunks = match self.index.delete_by_filename(kb, filename).await {
            Ok(n) => n,
            Err(e) => {
                error!(kb, filename, error = %e, "failed to purge chunks for deleted file");
                warnings.push(DeletionWarning::from(&e));
                0
            }
        };
        if let Err(e) = self.cache.remove_file(kb, filename).await {
            warn!(kb, filename, error = %e, "failed to purge chunk cache for deleted file");
            warnings.push(DeletionWarning::from(&e));
        }

        info!(kb, filename, purged_chunks, "deleted file");
        Ok(FileDeleteReport {
            kb_name: kb.to_string(),
            filename: filename.to_string(),
            purged_chunks,
            warnings,
        })
    }

    /// Remove chunks whose source file no longer exists in the document store.
    pub async fn reconcile(&self, kb: &str) -> Result<ReconcileReport> {
        validate_kb_name(kb)?;
        let _guard = self.write_lock_existing(kb).await?;

        let on_disk: BTreeSet<String> = self
            .documents
            .list_files(kb)
            .await?
            .into_iter()
            .map(|f| f.filename)
            .collect();

        let mut report = ReconcileReport {
            kb_name: kb.to_string(),
            ..ReconcileReport::default()
        };
        for filename in self.index.list_filenames(kb).await? {
            if on_disk.contains(&filename) {
                continue;
            }
            report.removed_chunks += self.index.delete_by_filename(kb, &filename).await?;
            self.cache.remove_file(kb, &filename).await?;
            report.removed_filenames.push(filename);
        }

        if !report.removed_filenames.is_empty() {
            info!(
                kb,
                files = report.removed_filenames.len(),
                chunks = report.removed_chunks,
                "removed orphaned chunks"
            );
        }
        Ok(report)
    }

    /// Drop vector collections whose knowledge base has no document namespace.
    pub async fn prune_orphan_collections(&self) -> Result<Vec<String>> {
        let mut pruned = Vec::new();
        for name in self.index.list_collections().await? {
            if validate_kb_name(&name).is_ok() && self.documents.namespace_exists(&name).await? {
                continue;
            }
            let guard = self.write_lock(&name).await;
            if validate_kb_name(&name).is_ok() && self.documents.namespace_exists(&name).await? {
                continue;
            }
            self.index.delete_collection(&name).await?;
            if let Err(e) = self.cache.remove_kb(&name).await {
                warn!(kb = %name, error = %e, "failed to delete chunk cache");
            }
            drop(guard);
            self.locks.release(&name);
            warn!(kb = %name, "removed orphaned vector collection");
            pruned.push(name);
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragbase_core::index::memory::InMemoryVectorIndex;
    use ragbase_core::models::{Chunk, CollectionInfo, ScoredChunk};
    use std::time::Duration;
    use tempfile::TempDir;

    use crate::document_store::{FsDocumentStore, Namespace};

    fn chunk(filename: &str, seq: u32) -> Chunk {
        Chunk {
            text: format!("{filename} #{seq}"),
            source_filename: filename.to_string(),
            sequence_index: seq,
            start_offset: 0,
            end_offset: 1,
            embedding: vec![1.0, seq as f32],
        }
    }

    fn registry_with(
        tmp: &TempDir,
        documents: Arc<dyn DocumentStore>,
        index: Arc<dyn VectorIndex>,
    ) -> KnowledgeBaseRegistry {
        KnowledgeBaseRegistry::new(documents, index, ChunkCache::new(tmp.path().join("chunks")))
    }

    fn registry(tmp: &TempDir) -> (KnowledgeBaseRegistry, Arc<InMemoryVectorIndex>) {
        let index = Arc::new(InMemoryVectorIndex::new());
        let documents = Arc::new(FsDocumentStore::new(tmp.path().join("uploads")));
        (registry_with(tmp, documents, index.clone()), index)
    }

    /// Vector index whose deletes always fail.
    struct BrokenDeletes(InMemoryVectorIndex);

    #[async_trait]
    impl VectorIndex for BrokenDeletes {
        async fn upsert(&self, kb: &str, chunks: &[Chunk]) -> Result<()> {
            self.0.upsert(kb, chunks).await
        }
        async fn search(&self, kb: &str, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
            self.0.search(kb, query, top_k).await
        }
        async fn delete_collection(&self, _kb: &str) -> Result<()> {
            Err(RagError::VectorIndex("backend offline".into()))
        }
        async fn delete_by_filename(&self, _kb: &str, _filename: &str) -> Result<usize> {
            Err(RagError::VectorIndex("backend offline".into()))
        }
        async fn collection_exists(&self, kb: &str) -> Result<bool> {
            self.0.collection_exists(kb).await
        }
        async fn list_collections(&self) -> Result<Vec<String>> {
            self.0.list_collections().await
        }
        async fn list_filenames(&self, kb: &str) -> Result<Vec<String>> {
            self.0.list_filenames(kb).await
        }
        async fn collection_info(&self, kb: &str) -> Result<Option<CollectionInfo>> {
            self.0.collection_info(kb).await
        }
    }

    /// Document store that cannot delete namespaces.
    struct StuckNamespaces(FsDocumentStore);

    #[async_trait]
    impl DocumentStore for StuckNamespaces {
        async fn create_namespace(&self, kb: &str) -> Result<()> {
            self.0.create_namespace(kb).await
        }
        async fn namespace_exists(&self, kb: &str) -> Result<bool> {
            self.0.namespace_exists(kb).await
        }
        async fn namespace(&self, kb: &str) -> Result<Option<Namespace>> {
            self.0.namespace(kb).await
        }
        async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
            self.0.list_namespaces().await
        }
        async fn delete_namespace(&self, _kb: &str) -> Result<()> {
            Err(RagError::DocumentStore("permission denied".into()))
        }
        async fn put_file(&self, kb: &str, filename: &str, bytes: &[u8]) -> Result<(UploadedFile, bool)> {
            self.0.put_file(kb, filename, bytes).await
        }
        async fn get_file(&self, kb: &str, filename: &str) -> Result<Vec<u8>> {
            self.0.get_file(kb, filename).await
        }
        async fn list_files(&self, kb: &str) -> Result<Vec<UploadedFile>> {
            self.0.list_files(kb).await
        }
        async fn delete_file(&self, kb: &str, filename: &str) -> Result<()> {
            self.0.delete_file(kb, filename).await
        }
    }

    #[tokio::test]
    async fn test_create_list_get() {
        let tmp = TempDir::new().unwrap();
        let (registry, _) = registry(&tmp);

        let kb = registry.create("Docs").await.unwrap();
        assert_eq!(kb.name, "Docs");
        assert_eq!(kb.doc_count, 0);

        registry.create("Alpha").await.unwrap();
        let names: Vec<String> = registry.list().await.unwrap().into_iter().map(|k| k.name).collect();
        assert_eq!(names, vec!["Alpha", "Docs"]);
        assert_eq!(registry.get("Docs").await.unwrap().doc_count, 0);
        assert!(matches!(
            registry.get("Nope").await,
            Err(RagError::KnowledgeBaseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_existing_namespace_or_collection() {
        let tmp = TempDir::new().unwrap();
        let (registry, index) = registry(&tmp);

        registry.create("Docs").await.unwrap();
        assert_eq!(
            registry.create("Docs").await.unwrap_err(),
            RagError::AlreadyExists("Docs".into())
        );

        index.upsert("Orphan", &[chunk("a.txt", 0)]).await.unwrap();
        assert_eq!(
            registry.create("Orphan").await.unwrap_err(),
            RagError::AlreadyExists("Orphan".into())
        );
    }

    #[tokio::test]
    async fn test_create_rejects_bad_names() {
        let tmp = TempDir::new().unwrap();
        let (registry, _) = registry(&tmp);
        assert!(matches!(
            registry.create("../etc").await,
            Err(RagError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_doc_count_follows_uploads_not_index() {
        let tmp = TempDir::new().unwrap();
        let (registry, _) = registry(&tmp);
        registry.create("Docs").await.unwrap();

        for name in ["a.txt", "b.txt", "c.txt"] {
            registry.upload_file("Docs", name, b"content").await.unwrap();
        }
        assert_eq!(registry.get("Docs").await.unwrap().doc_count, 3);

        registry.delete_file("Docs", "b.txt").await.unwrap();
        let kbs = registry.list().await.unwrap();
        assert_eq!(kbs[0].doc_count, 2);
    }

    #[tokio::test]
    async fn test_reupload_overwrites_and_purges_stale_chunks() {
        let tmp = TempDir::new().unwrap();
        let (registry, index) = registry(&tmp);
        registry.create("Docs").await.unwrap();

        let first = registry.upload_file("Docs", "a.txt", b"old").await.unwrap();
        assert!(!first.replaced);
        index
            .upsert("Docs", &[chunk("a.txt", 0), chunk("a.txt", 1)])
            .await
            .unwrap();

        let second = registry.upload_file("Docs", "a.txt", b"new text").await.unwrap();
        assert!(second.replaced);
        assert_eq!(second.purged_chunks, 2);
        assert_eq!(second.file.size_bytes, 8);
        assert_eq!(
            registry.documents().get_file("Docs", "a.txt").await.unwrap(),
            b"new text"
        );
        assert_eq!(registry.get("Docs").await.unwrap().doc_count, 1);
    }

    #[tokio::test]
    async fn test_upload_to_missing_kb() {
        let tmp = TempDir::new().unwrap();
        let (registry, _) = registry(&tmp);
        assert!(matches!(
            registry.upload_file("Nope", "a.txt", b"x").await,
            Err(RagError::KnowledgeBaseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_file_purges_its_chunks() {
        let tmp = TempDir::new().unwrap();
        let (registry, index) = registry(&tmp);
        registry.create("Docs").await.unwrap();
        registry.upload_file("Docs", "a.txt", b"a").await.unwrap();
        registry.upload_file("Docs", "b.txt", b"b").await.unwrap();
        index
            .upsert("Docs", &[chunk("a.txt", 0), chunk("b.txt", 0)])
            .await
            .unwrap();

        let report = registry.delete_file("Docs", "a.txt").await.unwrap();
        assert_eq!(report.purged_chunks, 1);
        assert!(report.warnings.is_empty());
        assert_eq!(index.list_filenames("Docs").await.unwrap(), vec!["b.txt"]);

        assert!(matches!(
            registry.delete_file("Docs", "a.txt").await,
            Err(RagError::FileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_file_survives_vector_failure() {
        let tmp = TempDir::new().unwrap();
        let documents = Arc::new(FsDocumentStore::new(tmp.path().join("uploads")));
        let registry = registry_with(&tmp, documents, Arc::new(BrokenDeletes(InMemoryVectorIndex::new())));
        registry.create("Docs").await.unwrap();
        registry.upload_file("Docs", "a.txt", b"a").await.unwrap();

        let report = registry.delete_file("Docs", "a.txt").await.unwrap();
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].code, "vector_index_error");
        assert_eq!(registry.get("Docs").await.unwrap().doc_count, 0);
    }

    #[tokio::test]
    async fn test_list_files_flags_indexed_and_orphaned() {
        let tmp = TempDir::new().unwrap();
        let (registry, index) = registry(&tmp);
        registry.create("Docs").await.unwrap();
        registry.upload_file("Docs", "a.txt", b"a").await.unwrap();
        registry.upload_file("Docs", "b.txt", b"b").await.unwrap();
        index
            .upsert("Docs", &[chunk("a.txt", 0), chunk("ghost.txt", 0)])
            .await
            .unwrap();

        let listing = registry.list_files("Docs").await.unwrap();
        let flags: Vec<(String, bool)> = listing
            .files
            .iter()
            .map(|f| (f.file.filename.clone(), f.indexed))
            .collect();
        assert_eq!(
            flags,
            vec![("a.txt".to_string(), true), ("b.txt".to_string(), false)]
        );
        assert_eq!(listing.orphaned_vectors, vec!["ghost.txt"]);
    }

    #[tokio::test]
    async fn test_reconcile_removes_orphaned_chunks() {
        let tmp = TempDir::new().unwrap();
        let (registry, index) = registry(&tmp);
        registry.create("Docs").await.unwrap();
        registry.upload_file("Docs", "a.txt", b"a").await.unwrap();
        index
            .upsert(
                "Docs",
                &[chunk("a.txt", 0), chunk("ghost.txt", 0), chunk("ghost.txt", 1)],
            )
            .await
            .unwrap();

        let report = registry.reconcile("Docs").await.unwrap();
        assert_eq!(report.removed_filenames, vec!["ghost.txt"]);
        assert_eq!(report.removed_chunks, 2);
        assert_eq!(index.list_filenames("Docs").await.unwrap(), vec!["a.txt"]);
        assert!(registry.reconcile("Docs").await.unwrap().removed_filenames.is_empty());
    }

    #[tokio::test]
    async fn test_prune_orphan_collections() {
        let tmp = TempDir::new().unwrap();
        let (registry, index) = registry(&tmp);
        registry.create("Docs").await.unwrap();
        index.upsert("Docs", &[chunk("a.txt", 0)]).await.unwrap();
        index.upsert("Orphan", &[chunk("a.txt", 0)]).await.unwrap();

        assert_eq!(registry.prune_orphan_collections().await.unwrap(), vec!["Orphan"]);
        assert_eq!(index.list_collections().await.unwrap(), vec!["Docs"]);
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let tmp = TempDir::new().unwrap();
        let (registry, index) = registry(&tmp);
        registry.create("Docs").await.unwrap();
        registry.upload_file("Docs", "a.txt", b"a").await.unwrap();
        index.upsert("Docs", &[chunk("a.txt", 0)]).await.unwrap();

        let report = registry.delete("Docs").await.unwrap();
        assert!(report.warnings.is_empty());
        assert!(registry.list().await.unwrap().is_empty());
        assert!(!index.collection_exists("Docs").await.unwrap());
        assert!(matches!(
            registry.delete("Docs").await,
            Err(RagError::KnowledgeBaseNotFound(_))
        ));

        // Recreation starts empty.
        assert_eq!(registry.create("Docs").await.unwrap().doc_count, 0);
    }

    #[tokio::test]
    async fn test_delete_continues_past_vector_failure() {
        let tmp = TempDir::new().unwrap();
        let documents = Arc::new(FsDocumentStore::new(tmp.path().join("uploads")));
        let registry = registry_with(&tmp, documents, Arc::new(BrokenDeletes(InMemoryVectorIndex::new())));
        registry.create("Docs").await.unwrap();
        registry.upload_file("Docs", "a.txt", b"a").await.unwrap();

        let report = registry.delete("Docs").await.unwrap();
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].code, "partial_deletion_failure");
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_fails_when_documents_remain() {
        let tmp = TempDir::new().unwrap();
        let documents = Arc::new(StuckNamespaces(FsDocumentStore::new(tmp.path().join("uploads"))));
        let index = Arc::new(InMemoryVectorIndex::new());
        let registry = registry_with(&tmp, documents, index.clone());
        registry.create("Docs").await.unwrap();
        index.upsert("Docs", &[chunk("a.txt", 0)]).await.unwrap();

        assert!(matches!(
            registry.delete("Docs").await,
            Err(RagError::DocumentStore(_))
        ));
        // The vector step still ran before the failure.
        assert!(!index.collection_exists("Docs").await.unwrap());
        assert_eq!(registry.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_waits_for_write_lock() {
        let tmp = TempDir::new().unwrap();
        let (registry, _) = registry(&tmp);
        let registry = Arc::new(registry);
        registry.create("Docs").await.unwrap();

        let guard = registry.write_lock("Docs").await;
        let task = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.delete("Docs").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        assert!(registry.exists("Docs").await.unwrap());

        drop(guard);
        task.await.unwrap().unwrap();
        assert!(!registry.exists("Docs").await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_entries_dropped_for_deleted_and_missing_kbs() {
        let tmp = TempDir::new().unwrap();
        let (registry, _) = registry(&tmp);

        registry.create("Docs").await.unwrap();
        registry.upload_file("Docs", "a.txt", b"x").await.unwrap();
        assert_eq!(registry.locks.len(), 1);
        registry.delete("Docs").await.unwrap();
        assert_eq!(registry.locks.len(), 0);

        for i in 0..10 {
            let name = format!("Ghost{i}");
            assert!(registry.upload_file(&name, "a.txt", b"x").await.is_err());
            assert!(registry.delete_file(&name, "a.txt").await.is_err());
            assert!(registry.delete(&name).await.is_err());
        }
        assert_eq!(registry.locks.len(), 0);

        // A held guard keeps its entry.
        let guard = registry.write_lock("Held").await;
        registry.locks.release("Held");
        assert_eq!(registry.locks.len(), 1);
        drop(guard);
        registry.locks.release("Held");
        assert_eq!(registry.locks.len(), 0);
    }
}
