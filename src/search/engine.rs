//! Search Engine - registry lookup, query compilation and execution
//!
//! Owns the store connection and the (read-only) table registry. Results come
//! back best-first with the similarity score split out of the record.

use serde::Serialize;

use super::embedding::EmbeddingProvider;
use super::indexer::{Indexer, IndexingStats};
use super::query::{QueryCompiler, SearchRequest, SCORE_COLUMN};
use super::registry::{TableConfig, TableRegistry};
use super::vectordb::{CodeElement, IndexStats, Record, VectorStore};
use crate::error::{Result, SearchError};

/// One ranked row. `score = 1 - cosine distance`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub record: Record,
    pub score: f64,
}

pub struct SearchEngine {
    store: VectorStore,
    registry: TableRegistry,
    compiler: QueryCompiler,
    code_table: TableConfig,
    provider: Option<Box<dyn EmbeddingProvider + Send>>,
}

impl SearchEngine {
    /// Engine without an embedding provider; only vector searches work.
    pub fn new(store: VectorStore, registry: TableRegistry) -> Result<Self> {
        Ok(Self {
            compiler: QueryCompiler::new(store.dims()),
            code_table: TableConfig::code_elements()?,
            store,
            registry,
            provider: None,
        })
    }

    /// Attach the provider used by text searches and indexing.
    pub fn with_provider(mut self, provider: Box<dyn EmbeddingProvider + Send>) -> Result<Self> {
        if provider.dims() != self.store.dims() {
            return Err(SearchError::DimensionMismatch {
                expected: self.store.dims(),
                actual: provider.dims(),
            });
        }
        self.provider = Some(provider);
        Ok(self)
    }

    pub fn tables(&self) -> &TableRegistry {
        &self.registry
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Rank rows of a configured table against `query_embedding`.
    pub fn search(
        &self,
        table_name: &str,
        query_embedding: &[f32],
        limit: i64,
        hours: Option<i64>,
        min_confidence: Option<f64>,
    ) -> Result<Vec<SearchResult>> {
        let table = self.registry.resolve(table_name)?;
        let request = SearchRequest::new(query_embedding, limit)
            .hours(hours)
            .min_confidence(min_confidence);
        self.run(table, &request)
    }

    /// Embed `query` with the configured provider, then [`search`](Self::search).
    pub fn search_text(
        &self,
        table_name: &str,
        query: &str,
        limit: i64,
        hours: Option<i64>,
        min_confidence: Option<f64>,
    ) -> Result<Vec<SearchResult>> {
        // Resolve first so an unknown table never costs an embedding call.
        self.registry.resolve(table_name)?;
        let embedding = self.embed(query)?;
        self.search(table_name, &embedding, limit, hours, min_confidence)
    }

    /// Search the built-in code index.
    pub fn find_code(&self, query_embedding: &[f32], limit: i64) -> Result<Vec<SearchResult>> {
        self.run(&self.code_table, &SearchRequest::new(query_embedding, limit))
    }

    pub fn find_code_text(&self, query: &str, limit: i64) -> Result<Vec<SearchResult>> {
        let embedding = self.embed(query)?;
        self.find_code(&embedding, limit)
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| SearchError::Embedding("no embedding provider configured".to_string()))?;
        provider
            .embed(text)
            .map_err(|e| SearchError::Embedding(format!("{:#}", e)))
    }

    /// Embed and append `units` to the code index.
    pub fn index<I>(&self, units: I) -> Result<IndexingStats>
    where
        I: IntoIterator<Item = CodeElement>,
    {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| SearchError::Embedding("no embedding provider configured".to_string()))?;
        Indexer::new(&self.store, &**provider).index(units)
    }

    pub fn clear(&self) -> Result<usize> {
        self.store.clear()
    }

    pub fn stats(&self) -> Result<IndexStats> {
        self.store.stats()
    }

    fn run(&self, table: &TableConfig, request: &SearchRequest<'_>) -> Result<Vec<SearchResult>> {
        let query = self.compiler.compile(table, request)?;
        tracing::debug!(table = %table.name, "{}", query.describe());

        let rows = self
            .store
            .execute(&query)
            .map_err(|source| SearchError::QueryExecution {
                table: table.name.clone(),
                limit: request.limit,
                statement: query.sql.clone(),
                source,
            })?;

        rows.into_iter()
            .map(|mut record| {
                let position = record.len().saturating_sub(1);
                match record.remove(SCORE_COLUMN).and_then(|v| v.as_f64()) {
                    Some(score) => Ok(SearchResult { record, score }),
                    None => Err(SearchError::QueryExecution {
                        table: table.name.clone(),
                        limit: request.limit,
                        statement: query.sql.clone(),
                        source: rusqlite::Error::InvalidColumnType(
                            position,
                            SCORE_COLUMN.to_string(),
                            rusqlite::types::Type::Null,
                        ),
                    }),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::embedding::HtpEmbedder;

    fn element(name: &str, signature: &str) -> CodeElement {
        CodeElement {
            file_path: "pkg/mod.py".to_string(),
            element_name: name.to_string(),
            element_type: "function".to_string(),
            signature: Some(signature.to_string()),
            docstring: None,
        }
    }

    fn engine() -> SearchEngine {
        let store = VectorStore::open_in_memory(384).unwrap();
        SearchEngine::new(store, TableRegistry::default())
            .unwrap()
            .with_provider(Box::new(HtpEmbedder::new()))
            .unwrap()
    }

    #[test]
    fn test_find_code_ranks_matching_name_first() -> Result<()> {
        let engine = engine();
        let stats = engine.index(vec![
            element("render_chart", "def render_chart(data)"),
            element("load_table_config", "def load_table_config(path)"),
            element("send_email", "def send_email(to, body)"),
        ])?;
        assert_eq!(stats.indexed, 3);

        let results = engine.find_code_text("load table config", 2)?;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].record.get_str("element_name"), Some("load_table_config"));
        assert!(results[0].score >= results[1].score);
        assert!(results[0].record.get(SCORE_COLUMN).is_none());
        Ok(())
    }

    #[test]
    fn test_unknown_table() {
        let engine = engine();
        assert!(matches!(
            engine.search_text("nope", "anything", 5, None, None),
            Err(SearchError::UnknownTable { .. })
        ));
    }

    #[test]
    fn test_provider_dimension_checked() {
        let store = VectorStore::open_in_memory(8).unwrap();
        let result = SearchEngine::new(store, TableRegistry::default())
            .unwrap()
            .with_provider(Box::new(HtpEmbedder::new()));
        assert!(matches!(
            result,
            Err(SearchError::DimensionMismatch { expected: 8, actual: 384 })
        ));
    }

    #[test]
    fn test_text_search_without_provider() {
        let store = VectorStore::open_in_memory(4).unwrap();
        let engine = SearchEngine::new(store, TableRegistry::default()).unwrap();
        assert!(matches!(
            engine.find_code_text("x", 1),
            Err(SearchError::Embedding(_))
        ));
        assert!(engine.find_code(&[1.0, 0.0, 0.0, 0.0], 1).unwrap().is_empty());
    }

    #[test]
    fn test_execution_failure_carries_statement() {
        // configured table that does not exist in the database
        let registry = TableRegistry::from_yaml_str(
            "tables:\n  ghosts:\n    table: ghosts\n    content_column: body\n    embedding_column: embedding\n",
        )
        .unwrap();
        let store = VectorStore::open_in_memory(2).unwrap();
        let engine = SearchEngine::new(store, registry).unwrap();

        match engine.search("ghosts", &[0.5, 0.5], 3, None, None) {
            Err(SearchError::QueryExecution { table, limit, statement, .. }) => {
                assert_eq!(table, "ghosts");
                assert_eq!(limit, 3);
                assert!(statement.contains("FROM ghosts g"));
                assert!(!statement.contains("0.5"));
            }
            other => panic!("expected QueryExecution, got {:?}", other.map(|r| r.len())),
        }
    }

    #[test]
    fn test_non_finite_vectors_never_score() {
        let registry = TableRegistry::from_yaml_str(
            "tables:\n  docs:\n    table: docs\n    content_column: body\n    embedding_column: embedding\n",
        )
        .unwrap();
        let store = VectorStore::open_in_memory(2).unwrap();
        store
            .connection()
            .execute_batch("CREATE TABLE docs (id INTEGER PRIMARY KEY, body TEXT, embedding BLOB)")
            .unwrap();
        let insert = |body: &str, v: &[f32]| {
            store
                .connection()
                .execute(
                    "INSERT INTO docs (body, embedding) VALUES (?1, ?2)",
                    rusqlite::params![body, crate::search::vectordb::embedding_to_blob(v)],
                )
                .unwrap();
        };
        insert("good", &[1.0, 0.0]);
        let engine = SearchEngine::new(store, registry).unwrap();

        assert!(matches!(
            engine.search("docs", &[f32::NAN, 0.0], 2, None, None),
            Err(SearchError::InvalidQueryVector { index: 0 })
        ));
        assert_eq!(engine.search("docs", &[1.0, 0.0], 2, None, None).unwrap().len(), 1);

        engine
            .store()
            .connection()
            .execute(
                "INSERT INTO docs (body, embedding) VALUES ('bad', ?1)",
                rusqlite::params![crate::search::vectordb::embedding_to_blob(&[0.0, f32::NAN])],
            )
            .unwrap();
        assert!(matches!(
            engine.search("docs", &[1.0, 0.0], 2, None, None),
            Err(SearchError::QueryExecution { .. })
        ));
    }
}
