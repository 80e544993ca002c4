//! Vector store on SQLite
//!
//! Embeddings are stored as little-endian f32 BLOBs. Cosine distance is
//! exposed to SQL as `vec_distance_cosine(a, b)` so similarity ordering runs
//! inside the statement.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use super::embedding::cosine_distance;
use super::indexer::searchable_text;
use super::query::{CompiledQuery, COSINE_DISTANCE_FN};
use crate::error::{Result, SearchError};

pub const CODE_TABLE: &str = "code_elements";
const CODE_INDEX_NAME: &str = "idx_code_elements_embedding";
const IVF_LISTS: i64 = 100;

/// Connection configuration, passed explicitly at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub dims: usize,
}

/// One extracted source unit, as written to `code_elements`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CodeElement {
    pub file_path: String,
    pub element_name: String,
    pub element_type: String,
    pub signature: Option<String>,
    pub docstring: Option<String>,
}

impl CodeElement {
    pub fn searchable_text(&self) -> String {
        searchable_text(
            Some(&self.element_name),
            self.signature.as_deref(),
            self.docstring.as_deref(),
        )
    }
}

/// A result row: column name to value, in projection order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    columns: Vec<(String, serde_json::Value)>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.columns.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub(crate) fn push(&mut self, name: String, value: serde_json::Value) {
        self.columns.push((name, value));
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<serde_json::Value> {
        let idx = self.columns.iter().position(|(k, _)| k == name)?;
        Some(self.columns.remove(idx).1)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (k, v) in &self.columns {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Index statistics
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    pub unique_files: usize,
    pub last_indexed: Option<i64>,
}

/// SQLite-backed vector store. Not `Sync`; one store per worker.
pub struct VectorStore {
    conn: Connection,
    dims: usize,
}

impl VectorStore {
    /// Open or create the database described by `config`.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let conn = Connection::open(&config.path)?;
        Self::from_connection(conn, config.dims)
    }

    /// Open in-memory database (for testing)
    pub fn open_in_memory(dims: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, dims)
    }

    fn from_connection(conn: Connection, dims: usize) -> Result<Self> {
        register_functions(&conn)?;
        let store = Self { conn, dims };
        store.init_schema()?;
        Ok(store)
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Underlying connection, for tables managed outside the code index.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Create the code index schema. Safe to call repeatedly.
    ///
    /// The `vector_indexes` row pins the deployment's dimension; opening an
    /// existing database with a different one fails with
    /// [`SearchError::SchemaMismatch`].
    pub fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS code_elements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path TEXT NOT NULL,
                element_name TEXT NOT NULL,
                element_type TEXT NOT NULL,
                signature TEXT,
                docstring TEXT,
                searchable_text TEXT,
                embedding BLOB,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_code_elements_type ON code_elements(element_type);
            CREATE INDEX IF NOT EXISTS idx_code_elements_file ON code_elements(file_path);

            -- Approximate-nearest-neighbor index declarations
            CREATE TABLE IF NOT EXISTS vector_indexes (
                name TEXT PRIMARY KEY,
                table_name TEXT NOT NULL,
                column_name TEXT NOT NULL,
                metric TEXT NOT NULL,
                dims INTEGER NOT NULL,
                lists INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT
            );
            "#,
        )?;

        self.conn.execute(
            r#"
            INSERT OR IGNORE INTO vector_indexes (name, table_name, column_name, metric, dims, lists)
            VALUES (?1, ?2, 'embedding', 'cosine', ?3, ?4)
            "#,
            params![CODE_INDEX_NAME, CODE_TABLE, self.dims as i64, IVF_LISTS],
        )?;

        let declared: i64 = self.conn.query_row(
            "SELECT dims FROM vector_indexes WHERE name = ?1",
            params![CODE_INDEX_NAME],
            |row| row.get(0),
        )?;
        if declared as usize != self.dims {
            return Err(SearchError::SchemaMismatch {
                table: CODE_TABLE.to_string(),
                column: "embedding".to_string(),
                declared: declared as usize,
                configured: self.dims,
            });
        }

        Ok(())
    }

    /// `(type, name, sql)` of every schema object, sorted by name.
    pub fn schema_objects(&self) -> Result<Vec<(String, String, Option<String>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT type, name, sql FROM sqlite_master ORDER BY name")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Append one element. Duplicates accumulate.
    pub fn insert(&self, element: &CodeElement, embedding: &[f32]) -> Result<i64> {
        if embedding.len() != self.dims {
            return Err(SearchError::InvalidEmbedding {
                expected: self.dims,
                actual: embedding.len(),
            });
        }
        if let Some(index) = first_non_finite(embedding) {
            return Err(SearchError::NonFiniteEmbedding { index });
        }

        self.conn.execute(
            r#"
            INSERT INTO code_elements
                (file_path, element_name, element_type, signature, docstring, searchable_text, embedding)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                element.file_path,
                element.element_name,
                element.element_type,
                element.signature,
                element.docstring,
                element.searchable_text(),
                embedding_to_blob(embedding),
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Delete every indexed element. Returns the number removed.
    pub fn clear(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM code_elements", [])?)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let total: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM code_elements", [], |row| row.get(0))?;

        let mut stmt = self.conn.prepare(
            "SELECT element_type, COUNT(*) FROM code_elements GROUP BY element_type ORDER BY element_type",
        )?;
        let by_type = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

        let unique_files: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT file_path) FROM code_elements",
            [],
            |row| row.get(0),
        )?;

        let last_indexed = self
            .get_meta("last_full_index")?
            .and_then(|v| v.parse::<i64>().ok());

        Ok(IndexStats {
            total: total as usize,
            by_type,
            unique_files: unique_files as usize,
            last_indexed,
        })
    }

    /// Run a compiled statement and decode every row.
    pub fn execute(&self, query: &CompiledQuery) -> rusqlite::Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(&query.sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query(rusqlite::params_from_iter(query.params.iter()))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Record::default();
            for (i, name) in names.iter().enumerate() {
                record.push(name.clone(), value_to_json(row.get_ref(i)?));
            }
            records.push(record);
        }
        Ok(records)
    }

    /// Set index metadata
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO index_meta (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Get index metadata
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM index_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }
}

fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        COSINE_DISTANCE_FN,
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let (a, b) = match (ctx.get_raw(0), ctx.get_raw(1)) {
                (ValueRef::Null, _) | (_, ValueRef::Null) => return Ok(None),
                (ValueRef::Blob(a), ValueRef::Blob(b)) => (a, b),
                _ => {
                    return Err(rusqlite::Error::UserFunctionError(
                        format!("{} expects two BLOB arguments", COSINE_DISTANCE_FN).into(),
                    ))
                }
            };
            if a.len() != b.len() || a.len() % 4 != 0 {
                return Err(rusqlite::Error::UserFunctionError(
                    format!(
                        "{}: vectors of {} and {} bytes cannot be compared",
                        COSINE_DISTANCE_FN,
                        a.len(),
                        b.len()
                    )
                    .into(),
                ));
            }
            let (a, b) = (blob_to_embedding(a), blob_to_embedding(b));
            if first_non_finite(&a).or_else(|| first_non_finite(&b)).is_some() {
                return Err(rusqlite::Error::UserFunctionError(
                    format!("{}: vector has a non-finite component", COSINE_DISTANCE_FN).into(),
                ));
            }
            Ok(Some(cosine_distance(&a, &b)))
        },
    )
}

fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::String(format!("<blob {} bytes>", b.len())),
    }
}

/// Convert f32 embedding to BLOB
pub(crate) fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        blob.extend_from_slice(&val.to_le_bytes());
    }
    blob
}

/// Position of the first NaN or infinite component, if any.
pub(crate) fn first_non_finite(embedding: &[f32]) -> Option<usize> {
    embedding.iter().position(|v| !v.is_finite())
}

/// Convert BLOB to f32 embedding; a trailing partial chunk is ignored
pub(crate) fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(name: &str, kind: &str, file: &str) -> CodeElement {
        CodeElement {
            file_path: file.to_string(),
            element_name: name.to_string(),
            element_type: kind.to_string(),
            signature: Some(format!("def {}()", name)),
            docstring: None,
        }
    }

    #[test]
    fn test_blob_conversion() {
        let embedding = vec![1.0, 2.0, 3.0, -0.5];
        let blob = embedding_to_blob(&embedding);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_embedding(&blob), embedding);
    }

    #[test]
    fn test_insert_and_stats() -> Result<()> {
        let db = VectorStore::open_in_memory(4)?;

        db.insert(&element("load", "function", "a.py"), &[0.1, 0.2, 0.3, 0.4])?;
        db.insert(&element("save", "function", "a.py"), &[0.4, 0.3, 0.2, 0.1])?;
        db.insert(&element("Store", "class", "b.py"), &[1.0, 0.0, 0.0, 0.0])?;
        // duplicates accumulate
        db.insert(&element("Store", "class", "b.py"), &[1.0, 0.0, 0.0, 0.0])?;

        let stats = db.stats()?;
        assert_eq!(stats.total, 4);
        assert_eq!(stats.by_type.get("function"), Some(&2));
        assert_eq!(stats.by_type.get("class"), Some(&2));
        assert_eq!(stats.unique_files, 2);
        assert_eq!(stats.last_indexed, None);
        Ok(())
    }

    #[test]
    fn test_insert_rejects_wrong_dimension() -> Result<()> {
        let db = VectorStore::open_in_memory(4)?;
        let err = db.insert(&element("f", "function", "a.py"), &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, SearchError::InvalidEmbedding { expected: 4, actual: 2 }));
        assert_eq!(db.stats()?.total, 0);
        Ok(())
    }

    #[test]
    fn test_insert_rejects_non_finite() -> Result<()> {
        let db = VectorStore::open_in_memory(3)?;
        let f = element("f", "function", "a.py");
        assert!(matches!(
            db.insert(&f, &[0.1, f32::NAN, 0.3]),
            Err(SearchError::NonFiniteEmbedding { index: 1 })
        ));
        assert!(matches!(
            db.insert(&f, &[f32::INFINITY, 0.0, 0.0]),
            Err(SearchError::NonFiniteEmbedding { index: 0 })
        ));
        assert_eq!(db.stats()?.total, 0);
        Ok(())
    }

    #[test]
    fn test_clear() -> Result<()> {
        let db = VectorStore::open_in_memory(2)?;
        db.insert(&element("f", "function", "a.py"), &[1.0, 0.0])?;
        db.insert(&element("g", "function", "a.py"), &[0.0, 1.0])?;
        assert_eq!(db.clear()?, 2);
        assert_eq!(db.stats()?.total, 0);
        assert_eq!(db.clear()?, 0);
        Ok(())
    }

    #[test]
    fn test_init_schema_idempotent() -> Result<()> {
        let db = VectorStore::open_in_memory(8)?;
        let before = db.schema_objects()?;
        let catalog_before: i64 =
            db.connection()
                .query_row("SELECT COUNT(*) FROM vector_indexes", [], |r| r.get(0))?;

        db.init_schema()?;
        db.init_schema()?;

        assert_eq!(db.schema_objects()?, before);
        let catalog_after: i64 =
            db.connection()
                .query_row("SELECT COUNT(*) FROM vector_indexes", [], |r| r.get(0))?;
        assert_eq!(catalog_before, 1);
        assert_eq!(catalog_after, 1);
        Ok(())
    }

    #[test]
    fn test_reopen_with_other_dimension_fails() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");

        let config = StoreConfig { path: path.clone(), dims: 4 };
        drop(VectorStore::open(&config)?);
        assert!(VectorStore::open(&config).is_ok());

        let other = StoreConfig { path, dims: 8 };
        assert!(matches!(
            VectorStore::open(&other),
            Err(SearchError::SchemaMismatch { declared: 4, configured: 8, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_cosine_function() -> Result<()> {
        let db = VectorStore::open_in_memory(2)?;
        let a = embedding_to_blob(&[1.0, 0.0]);
        let b = embedding_to_blob(&[0.0, 1.0]);
        let short = embedding_to_blob(&[1.0]);

        let d: f64 = db.connection().query_row(
            "SELECT vec_distance_cosine(?1, ?1)",
            params![a],
            |r| r.get(0),
        )?;
        assert_eq!(d, 0.0);

        let d: f64 = db.connection().query_row(
            "SELECT vec_distance_cosine(?1, ?2)",
            params![a, b],
            |r| r.get(0),
        )?;
        assert!((d - 1.0).abs() < 1e-12);

        let null: Option<f64> = db.connection().query_row(
            "SELECT vec_distance_cosine(NULL, ?1)",
            params![a],
            |r| r.get(0),
        )?;
        assert!(null.is_none());

        let mismatch: rusqlite::Result<f64> = db.connection().query_row(
            "SELECT vec_distance_cosine(?1, ?2)",
            params![a, short],
            |r| r.get(0),
        );
        assert!(mismatch.is_err());

        let nan = embedding_to_blob(&[f32::NAN, 1.0]);
        let non_finite: rusqlite::Result<f64> = db.connection().query_row(
            "SELECT vec_distance_cosine(?1, ?2)",
            params![a, nan],
            |r| r.get(0),
        );
        assert!(non_finite.is_err());
        Ok(())
    }

    #[test]
    fn test_meta() -> Result<()> {
        let db = VectorStore::open_in_memory(2)?;
        assert_eq!(db.get_meta("k")?, None);
        db.set_meta("k", "1")?;
        db.set_meta("k", "2")?;
        assert_eq!(db.get_meta("k")?.as_deref(), Some("2"));
        Ok(())
    }

    #[test]
    fn test_record_serializes_in_order() {
        let mut record = Record::default();
        record.push("b".to_string(), serde_json::json!(1));
        record.push("a".to_string(), serde_json::json!("x"));
        assert_eq!(serde_json::to_string(&record).unwrap(), r#"{"b":1,"a":"x"}"#);
        assert_eq!(record.remove("b"), Some(serde_json::json!(1)));
        assert_eq!(record.len(), 1);
        assert_eq!(record.get_str("a"), Some("x"));
    }
}
