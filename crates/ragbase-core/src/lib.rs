//! # ragbase core
//!
//! Runtime-agnostic logic shared by the `ragbase` application: data models,
//! the sliding-window chunker, the embedding and generation provider traits,
//! prompt assembly, the vector index abstraction with an in-memory backend,
//! and the error taxonomy every component reports through.
//!
//! This crate contains no tokio, sqlx, filesystem or network I/O. Concrete
//! providers and the persistent index live in the `ragbase` app crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod models;

pub use error::{RagError, Result};
