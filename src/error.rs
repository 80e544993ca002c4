//! Error taxonomy for configuration loading, query compilation and search.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating the declarative table document.
///
/// Everything here is detected at load time so a misconfigured table never
/// reaches the database as a malformed statement.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Table '{table}': {field} '{value}' is not a valid SQL identifier")]
    InvalidIdentifier {
        table: String,
        field: &'static str,
        value: String,
    },

    #[error("Table '{table}': display column '{value}' must look like [alias.]column [AS name]")]
    InvalidDisplayColumn { table: String, value: String },

    #[error("Table '{table}': '{value}' references unknown alias '{qualifier}' (known: {})", known.join(", "))]
    UnknownQualifier {
        table: String,
        value: String,
        qualifier: String,
        known: Vec<String>,
    },

    #[error("Table '{table}': invalid join '{value}': {reason}")]
    InvalidJoin {
        table: String,
        value: String,
        reason: &'static str,
    },

    #[error("Table '{table}': display_columns must list at least one column")]
    EmptyDisplayColumns { table: String },

    #[error("Table '{table}': invalid filter: {reason}")]
    InvalidFilter { table: String, reason: String },

    #[error("Invalid {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },
}

/// Errors raised by the store, the query compiler and the search engine.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Table '{name}' not configured. Available: [{}]", available.join(", "))]
    UnknownTable { name: String, available: Vec<String> },

    #[error("Query vector has {actual} dimensions, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Query vector component {index} is not a finite number")]
    InvalidQueryVector { index: usize },

    #[error("Embedding has {actual} dimensions, store expects {expected}")]
    InvalidEmbedding { expected: usize, actual: usize },

    #[error("Embedding component {index} is not a finite number")]
    NonFiniteEmbedding { index: usize },

    #[error("Limit must be a positive integer, got {0}")]
    InvalidLimit(i64),

    #[error("Invalid {name} filter: {reason}")]
    InvalidFilter { name: &'static str, reason: String },

    #[error("Query on '{table}' (limit {limit}) failed: {source}\n  statement: {statement}")]
    QueryExecution {
        table: String,
        limit: i64,
        statement: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Vector index on {table}.{column} declares {declared} dimensions, store configured for {configured}")]
    SchemaMismatch {
        table: String,
        column: String,
        declared: usize,
        configured: usize,
    },

    #[error("Embedding provider failed: {0}")]
    Embedding(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type Result<T, E = SearchError> = std::result::Result<T, E>;
