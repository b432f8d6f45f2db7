//! # ragbase
//!
//! A retrieval-augmented-generation application core. Documents are uploaded
//! into named knowledge bases, split into overlapping chunks, embedded, and
//! stored per knowledge base in a vector index. Chat queries retrieve the
//! most similar chunks and hand them, with the conversation history, to a
//! language model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌─────────┐   ┌───────────┐   ┌──────────────┐
//! │  Upload  │──▶│ Extract │──▶│  Chunk  │──▶│   Embed   │──▶│ Vector Index │
//! │ (fs ns)  │   │pdf/docx │   │ window  │   │ batch+retry│  │ sqlite/memory│
//! └──────────┘   └─────────┘   └─────────┘   └───────────┘   └──────┬───────┘
//!                                                                   │
//!                  ┌──────────┐   ┌───────────┐   ┌──────────┐      │
//!   chat query ───▶│ Retrieve │──▶│  Prompt   │──▶│ Generate │◀─────┘
//!                  └──────────┘   └───────────┘   └──────────┘
//! ```
//!
//! Domain types, the error taxonomy, the chunker, the [`VectorIndex`] and
//! [`Generator`] traits and the offline providers live in `ragbase-core`,
//! which has no I/O. This crate adds storage, HTTP backends, orchestration,
//! the CLI and the HTTP server.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`document_store`] | Per-knowledge-base file namespaces and the chunk cache |
//! | [`extract`] | Text extraction from PDF, DOCX and plain text |
//! | [`upstream`] | Shared HTTP plumbing for model services |
//! | [`embedding`] | Embedding providers and the batching, retrying adapter |
//! | [`generation`] | Language-model backends |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Vector index schema |
//! | [`sqlite_index`] | Persistent vector index |
//! | [`registry`] | Knowledge base lifecycle, file operations, reconciliation |
//! | [`ingest`] | Indexing pipeline |
//! | [`retrieval`] | Query embedding and top-K search |
//! | [`chat`] | Prompt assembly, generation timeout and retry |
//! | [`services`] | Builds the component graph from a [`config::Config`] |
//! | [`server`] | HTTP API |
//!
//! [`VectorIndex`]: ragbase_core::index::VectorIndex
//! [`Generator`]: ragbase_core::generation::Generator

pub mod chat;
pub mod config;
pub mod db;
pub mod document_store;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod registry;
pub mod retrieval;
pub mod server;
pub mod services;
pub mod sqlite_index;
pub mod upstream;

pub use ragbase_core::{RagError, Result};
