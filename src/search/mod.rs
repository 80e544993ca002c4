//! Semantic retrieval over configured tables
//!
//! - `registry`: logical table names mapped to validated physical schema
//! - `query`: typed, parameterized similarity statements
//! - `vectordb`: SQLite store, cosine distance function, code index schema
//! - `engine`: resolve, compile, execute, rank
//! - `indexer`: embeds source units into the code index

pub mod embedding;
pub mod engine;
pub mod indexer;
pub mod openai;
pub mod query;
pub mod registry;
pub mod vectordb;

pub use embedding::{create_provider, EmbeddingProvider, HtpEmbedder};
pub use engine::{SearchEngine, SearchResult};
pub use indexer::{Indexer, IndexingStats};
pub use query::{CompiledQuery, QueryCompiler, SearchRequest};
pub use registry::{TableConfig, TableRegistry};
pub use vectordb::{CodeElement, IndexStats, Record, StoreConfig, VectorStore};
