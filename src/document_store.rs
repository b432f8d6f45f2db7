//! Raw file storage per knowledge base.
//!
//! The [`DocumentStore`] trait is the source of truth for which knowledge
//! bases exist (one namespace each) and which files they hold.
//! [`FsDocumentStore`] keeps them at `<uploads>/<kb>/<filename>`.
//!
//! [`ChunkCache`] holds derived data: the segments produced for each indexed
//! file, written as JSON under `<chunks>/<kb>/<sha256(filename)>.json`. It
//! can always be rebuilt by re-indexing.
//!
//! Temporary and cache files are named by the SHA-256 of the filename so
//! that any filename that passes [`validate_filename`] fits in a single path
//! component.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use ragbase_core::chunk::{ChunkingConfig, TextSegment};
use ragbase_core::models::UploadedFile;
use ragbase_core::{RagError, Result};

const MAX_NAME_LEN: usize = 64;
const MAX_FILENAME_LEN: usize = 255;

/// Knowledge base names double as directory and collection names.
pub fn validate_kb_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(RagError::InvalidInput(format!(
            "knowledge base name must be 1-{} characters",
            MAX_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(RagError::InvalidInput(format!(
            "knowledge base name '{}' may only contain letters, digits, '_' and '-'",
            name
        )));
    }
    Ok(())
}

pub fn validate_filename(filename: &str) -> Result<()> {
    if filename.trim().is_empty() || filename.len() > MAX_FILENAME_LEN {
        return Err(RagError::InvalidInput(
            "filename must be 1-255 bytes and not blank".to_string(),
        ));
    }
    if filename.starts_with('.')
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains('\0')
    {
        return Err(RagError::InvalidInput(format!(
            "filename '{}' must not start with '.' or contain path separators",
            filename
        )));
    }
    Ok(())
}

fn name_digest(filename: &str) -> String {
    format!("{:x}", Sha256::digest(filename.as_bytes()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Namespace {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_namespace(&self, kb: &str) -> Result<()>;

    async fn namespace_exists(&self, kb: &str) -> Result<bool>;

    async fn namespace(&self, kb: &str) -> Result<Option<Namespace>>;

    /// All namespaces, sorted by name.
    async fn list_namespaces(&self) -> Result<Vec<Namespace>>;

    /// Recursively remove a namespace. Removing a missing namespace succeeds.
    async fn delete_namespace(&self, kb: &str) -> Result<()>;

    /// Store `bytes` as `filename`, replacing any existing file. The flag is
    /// true when a file was replaced.
    async fn put_file(&self, kb: &str, filename: &str, bytes: &[u8]) -> Result<(UploadedFile, bool)>;

    async fn get_file(&self, kb: &str, filename: &str) -> Result<Vec<u8>>;

    /// Files in the namespace, sorted by filename.
    async fn list_files(&self, kb: &str) -> Result<Vec<UploadedFile>>;

    async fn delete_file(&self, kb: &str, filename: &str) -> Result<()>;
}

fn io_error(path: &Path, err: std::io::Error) -> RagError {
    RagError::DocumentStore(format!("{}: {}", path.display(), err))
}

fn timestamp(time: std::io::Result<SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}

/// Filesystem-backed document store rooted at an uploads directory.
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn kb_dir(&self, kb: &str) -> Result<PathBuf> {
        validate_kb_name(kb)?;
        Ok(self.root.join(kb))
    }

    fn file_path(&self, kb: &str, filename: &str) -> Result<PathBuf> {
        validate_filename(filename)?;
        Ok(self.kb_dir(kb)?.join(filename))
    }

    async fn require_namespace(&self, kb: &str) -> Result<PathBuf> {
        let dir = self.kb_dir(kb)?;
        if !tokio::fs::try_exists(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?
        {
            return Err(RagError::KnowledgeBaseNotFound(kb.to_string()));
        }
        Ok(dir)
    }

    async fn describe(&self, kb: &str, path: &Path) -> Result<UploadedFile> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| io_error(path, e))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(UploadedFile {
            filename,
            size_bytes: meta.len(),
            kb_name: kb.to_string(),
            uploaded_at: timestamp(meta.modified()),
        })
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn create_namespace(&self, kb: &str) -> Result<()> {
        let dir = self.kb_dir(kb)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))
    }

    async fn namespace_exists(&self, kb: &str) -> Result<bool> {
        let dir = self.kb_dir(kb)?;
        match tokio::fs::metadata(&dir).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&dir, e)),
        }
    }

    async fn namespace(&self, kb: &str) -> Result<Option<Namespace>> {
        let dir = self.kb_dir(kb)?;
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(Some(Namespace {
                name: kb.to_string(),
                created_at: timestamp(meta.created().or_else(|_| meta.modified())),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&dir, e)),
        }
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.root, e)),
        };

        let mut namespaces = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.root, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if validate_kb_name(&name).is_err() {
                continue;
            }
            if let Some(ns) = self.namespace(&name).await? {
                namespaces.push(ns);
            }
        }
        namespaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(namespaces)
    }

    async fn delete_namespace(&self, kb: &str) -> Result<()> {
        let dir = self.kb_dir(kb)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&dir, e)),
        }
    }

    async fn put_file(&self, kb: &str, filename: &str, bytes: &[u8]) -> Result<(UploadedFile, bool)> {
        let dir = self.require_namespace(kb).await?;
        let path = self.file_path(kb, filename)?;
        let replaced = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error(&path, e))?;

        // Write beside the target, then rename over it.
        let partial = dir.join(format!(".{}.part", name_digest(filename)));
        tokio::fs::write(&partial, bytes)
            .await
            .map_err(|e| io_error(&partial, e))?;
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| io_error(&path, e))?;

        Ok((self.describe(kb, &path).await?, replaced))
    }

    async fn get_file(&self, kb: &str, filename: &str) -> Result<Vec<u8>> {
        let path = self.file_path(kb, filename)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(RagError::FileNotFound {
                kb: kb.to_string(),
                filename: filename.to_string(),
            }),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn list_files(&self, kb: &str) -> Result<Vec<UploadedFile>> {
        let dir = self.require_namespace(kb).await?;
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let file_type = entry.file_type().await.map_err(|e| io_error(&dir, e))?;
            if file_type.is_file() {
                files.push(self.describe(kb, &entry.path()).await?);
            }
        }
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }

    async fn delete_file(&self, kb: &str, filename: &str) -> Result<()> {
        let path = self.file_path(kb, filename)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(RagError::FileNotFound {
                kb: kb.to_string(),
                filename: filename.to_string(),
            }),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

/// Segments produced for one indexed file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedChunks {
    pub filename: String,
    pub content_sha256: String,
    pub chunking: ChunkingConfig,
    pub indexed_at: DateTime<Utc>,
    pub segments: Vec<TextSegment>,
}

/// Derived per-file chunk cache at `<root>/<kb>/<sha256(filename)>.json`.
pub struct ChunkCache {
    root: PathBuf,
}

impl ChunkCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, kb: &str, filename: &str) -> PathBuf {
        self.root.join(kb).join(format!("{}.json", name_digest(filename)))
    }

    pub async fn write(&self, kb: &str, entry: &CachedChunks) -> Result<()> {
        let path = self.path(kb, &entry.filename);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(entry)
            .map_err(|e| RagError::DocumentStore(e.to_string()))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| io_error(&path, e))
    }

    pub async fn read(&self, kb: &str, filename: &str) -> Result<Option<CachedChunks>> {
        let path = self.path(kb, filename);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| RagError::DocumentStore(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    pub async fn remove_file(&self, kb: &str, filename: &str) -> Result<()> {
        let path = self.path(kb, filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    pub async fn remove_kb(&self, kb: &str) -> Result<()> {
        let dir = self.root.join(kb);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&dir, e)),
        }
    }
}
