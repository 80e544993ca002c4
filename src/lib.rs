//! tablesearch library
//!
//! Configuration-driven semantic search over SQL tables holding embedding
//! vectors.
//!
//! # Modules
//!
//! - `core`: configuration document, tool paths, source extraction
//! - `search`: table registry, query compiler, vector store, search engine
//! - `error`: error taxonomy

pub mod core;
pub mod error;
pub mod search;

// Re-exports for convenience
pub use crate::core::config::{EmbeddingConfig, Settings};
pub use crate::core::paths::ToolPaths;
pub use crate::error::{ConfigError, Result, SearchError};
pub use crate::search::engine::{SearchEngine, SearchResult};
pub use crate::search::registry::{TableConfig, TableRegistry};
pub use crate::search::vectordb::{CodeElement, StoreConfig, VectorStore};
