//! Table registry - logical search names mapped to validated physical schema.
//!
//! The YAML document is deserialized into loose `Raw*` structs and then
//! converted into [`TableConfig`]. Every identifier, display column, join and
//! filter is checked during that conversion.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::Deserialize;

use super::query::{ColumnRef, Ident, JoinClause, SCORE_COLUMN};
use super::vectordb::CODE_TABLE;
use crate::error::{ConfigError, Result, SearchError};

pub const DEFAULT_HOURS: i64 = 168;
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.0;

/// `tables:` entry as written in the document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTableConfig {
    pub table: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub content_column: String,
    pub embedding_column: String,
    #[serde(default)]
    pub display_columns: Option<Vec<String>>,
    #[serde(default)]
    pub joins: Vec<String>,
    #[serde(default)]
    pub filters: RawFilters,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawFilters {
    pub time_column: Option<String>,
    pub default_hours: Option<i64>,
    pub confidence_column: Option<String>,
    pub default_min_confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeFilter {
    pub column: Ident,
    pub default_hours: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceFilter {
    pub column: Ident,
    pub default_min_confidence: f64,
}

/// One logical, searchable view over a physical table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableConfig {
    pub name: String,
    pub description: Option<String>,
    pub table: Ident,
    pub alias: Ident,
    pub content_column: Ident,
    pub embedding_column: Ident,
    pub display_columns: Vec<ColumnRef>,
    pub joins: Vec<JoinClause>,
    pub time_filter: Option<TimeFilter>,
    pub confidence_filter: Option<ConfidenceFilter>,
    embedding: ColumnRef,
}

impl TableConfig {
    /// Validate a raw entry.
    pub fn from_raw(name: &str, raw: RawTableConfig) -> Result<Self, ConfigError> {
        let ident = |field: &'static str, value: &str| {
            Ident::new(value).ok_or_else(|| ConfigError::InvalidIdentifier {
                table: name.to_string(),
                field,
                value: value.to_string(),
            })
        };

        let table = ident("table", &raw.table)?;
        let alias = match raw.alias.as_deref() {
            Some(a) => ident("alias", a)?,
            None => ident("alias", &raw.table[..1])?,
        };
        let content_column = ident("content_column", &raw.content_column)?;
        let embedding_column = ident("embedding_column", &raw.embedding_column)?;

        let joins = raw
            .joins
            .iter()
            .map(|j| {
                JoinClause::parse(j).map_err(|reason| ConfigError::InvalidJoin {
                    table: name.to_string(),
                    value: j.clone(),
                    reason,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut known: Vec<String> = vec![alias.to_string()];
        if table != alias {
            known.push(table.to_string());
        }
        known.extend(joins.iter().map(|j| j.binding().to_string()));

        let display_columns = match raw.display_columns {
            None => vec![
                ColumnRef::qualified(&alias, &ident("display_columns", "id")?),
                ColumnRef::qualified(&alias, &content_column),
            ],
            Some(cols) if cols.is_empty() => {
                return Err(ConfigError::EmptyDisplayColumns {
                    table: name.to_string(),
                })
            }
            Some(cols) => cols
                .iter()
                .map(|c| parse_display_column(name, c, &known))
                .collect::<Result<Vec<_>, _>>()?,
        };

        let mut seen = HashSet::new();
        for col in &display_columns {
            if !seen.insert(col.output_name().to_string()) {
                return Err(ConfigError::InvalidDisplayColumn {
                    table: name.to_string(),
                    value: format!("{} (duplicate output name)", col),
                });
            }
        }

        let filters = raw.filters;
        let invalid_filter = |reason: String| ConfigError::InvalidFilter {
            table: name.to_string(),
            reason,
        };

        let time_filter = match (filters.time_column.as_deref(), filters.default_hours) {
            (None, Some(_)) => {
                return Err(invalid_filter(
                    "default_hours is set but time_column is missing".to_string(),
                ))
            }
            (None, None) => None,
            (Some(col), hours) => {
                let default_hours = hours.unwrap_or(DEFAULT_HOURS);
                if default_hours <= 0 {
                    return Err(invalid_filter(format!(
                        "default_hours must be positive, got {}",
                        default_hours
                    )));
                }
                Some(TimeFilter {
                    column: ident("time_column", col)?,
                    default_hours,
                })
            }
        };

        let confidence_filter = match (
            filters.confidence_column.as_deref(),
            filters.default_min_confidence,
        ) {
            (None, Some(_)) => {
                return Err(invalid_filter(
                    "default_min_confidence is set but confidence_column is missing".to_string(),
                ))
            }
            (None, None) => None,
            (Some(col), min) => {
                let default_min_confidence = min.unwrap_or(DEFAULT_MIN_CONFIDENCE);
                if !(0.0..=1.0).contains(&default_min_confidence) {
                    return Err(invalid_filter(format!(
                        "default_min_confidence must be within [0, 1], got {}",
                        default_min_confidence
                    )));
                }
                Some(ConfidenceFilter {
                    column: ident("confidence_column", col)?,
                    default_min_confidence,
                })
            }
        };

        let embedding = ColumnRef::qualified(&alias, &embedding_column);

        Ok(Self {
            name: name.to_string(),
            description: raw.description,
            table,
            alias,
            content_column,
            embedding_column,
            display_columns,
            joins,
            time_filter,
            confidence_filter,
            embedding,
        })
    }

    /// Built-in view over the code index written by the indexer.
    pub fn code_elements() -> Result<Self, ConfigError> {
        let display_columns = [
            "c.id",
            "c.file_path",
            "c.element_name",
            "c.element_type",
            "c.signature",
            "c.docstring",
        ];
        Self::from_raw(
            "code",
            RawTableConfig {
                table: CODE_TABLE.to_string(),
                alias: Some("c".to_string()),
                description: Some("Indexed source definitions".to_string()),
                content_column: "searchable_text".to_string(),
                embedding_column: "embedding".to_string(),
                display_columns: Some(display_columns.iter().map(|c| c.to_string()).collect()),
                ..RawTableConfig::default()
            },
        )
    }

    /// `alias.embedding_column`
    pub fn embedding_ref(&self) -> &ColumnRef {
        &self.embedding
    }

    /// Keys of a result record, in projection order.
    pub fn output_names(&self) -> Vec<&str> {
        self.display_columns.iter().map(|c| c.output_name()).collect()
    }
}

fn parse_display_column(table: &str, value: &str, known: &[String]) -> Result<ColumnRef, ConfigError> {
    let col = ColumnRef::parse(value).ok_or_else(|| ConfigError::InvalidDisplayColumn {
        table: table.to_string(),
        value: value.to_string(),
    })?;

    if col.output_name() == SCORE_COLUMN {
        return Err(ConfigError::InvalidDisplayColumn {
            table: table.to_string(),
            value: format!("{} ({} is reserved)", value, SCORE_COLUMN),
        });
    }

    if let Some(q) = &col.qualifier {
        if !known.iter().any(|k| k == q.as_str()) {
            return Err(ConfigError::UnknownQualifier {
                table: table.to_string(),
                value: value.to_string(),
                qualifier: q.to_string(),
                known: known.to_vec(),
            });
        }
    }

    Ok(col)
}

/// Read-only collection of validated table configurations.
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    tables: BTreeMap<String, TableConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct TablesDocument {
    #[serde(default)]
    tables: BTreeMap<String, RawTableConfig>,
}

impl TableRegistry {
    /// Load the `tables:` section of a YAML document.
    ///
    /// A missing file or an empty document yields an empty registry.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let doc: Option<TablesDocument> = serde_yaml::from_str(content)?;
        Self::from_raw(doc.unwrap_or_default().tables)
    }

    pub fn from_raw(raw: BTreeMap<String, RawTableConfig>) -> Result<Self, ConfigError> {
        let tables = raw
            .into_iter()
            .map(|(name, cfg)| TableConfig::from_raw(&name, cfg).map(|t| (name, t)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(Self { tables })
    }

    /// Look up a logical table.
    pub fn resolve(&self, name: &str) -> Result<&TableConfig> {
        self.tables.get(name).ok_or_else(|| SearchError::UnknownTable {
            name: name.to_string(),
            available: self.names(),
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableConfig> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(entry: &str) -> Result<TableRegistry, ConfigError> {
        TableRegistry::from_yaml_str(&format!("tables:\n  t:\n{}", entry))
    }

    #[test]
    fn test_empty_sources() {
        assert!(TableRegistry::from_yaml_str("").unwrap().is_empty());
        assert!(TableRegistry::from_yaml_str("   \n").unwrap().is_empty());
        assert!(TableRegistry::from_yaml_str("tables: {}").unwrap().is_empty());
        assert!(TableRegistry::from_yaml_str("store:\n  dims: 4\n").unwrap().is_empty());
        let missing = TableRegistry::load(Path::new("/nonexistent/tables.yaml")).unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_defaults() {
        let reg = single(
            "    table: messages\n    content_column: content\n    embedding_column: embedding\n",
        )
        .unwrap();
        let t = reg.resolve("t").unwrap();
        assert_eq!(t.alias.as_str(), "m");
        assert_eq!(t.output_names(), vec!["id", "content"]);
        assert_eq!(t.embedding_ref().to_string(), "m.embedding");
        assert!(t.joins.is_empty());
        assert!(t.time_filter.is_none());
        assert!(t.confidence_filter.is_none());
    }

    #[test]
    fn test_code_elements_view() {
        let t = TableConfig::code_elements().unwrap();
        assert_eq!(t.table.as_str(), "code_elements");
        assert_eq!(
            t.output_names(),
            vec!["id", "file_path", "element_name", "element_type", "signature", "docstring"]
        );
    }

    #[test]
    fn test_filter_defaults() {
        let reg = single(
            "    table: m\n    content_column: c\n    embedding_column: e\n    filters:\n      time_column: created_at\n      confidence_column: confidence\n",
        )
        .unwrap();
        let t = reg.resolve("t").unwrap();
        assert_eq!(t.time_filter.as_ref().unwrap().default_hours, DEFAULT_HOURS);
        assert_eq!(
            t.confidence_filter.as_ref().unwrap().default_min_confidence,
            DEFAULT_MIN_CONFIDENCE
        );
    }

    #[test]
    fn test_unknown_table_lists_names() {
        let reg = TableRegistry::from_yaml_str(
            "tables:\n  b:\n    table: x\n    content_column: c\n    embedding_column: e\n  a:\n    table: y\n    content_column: c\n    embedding_column: e\n",
        )
        .unwrap();
        match reg.resolve("nope") {
            Err(SearchError::UnknownTable { name, available }) => {
                assert_eq!(name, "nope");
                assert_eq!(available, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected UnknownTable, got {:?}", other),
        }
        let msg = reg.resolve("nope").unwrap_err().to_string();
        assert!(msg.contains("Available: [a, b]"));
    }

    #[test]
    fn test_rejects_bad_identifiers() {
        let err = single("    table: \"x; drop\"\n    content_column: c\n    embedding_column: e\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIdentifier { field: "table", .. }));

        let err = single(
            "    table: x\n    content_column: c\n    embedding_column: e\n    filters:\n      time_column: \"ts > 0 OR 1\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIdentifier { field: "time_column", .. }));
    }

    #[test]
    fn test_rejects_unresolvable_display_columns() {
        let err = single(
            "    table: facts\n    alias: f\n    content_column: c\n    embedding_column: e\n    display_columns: [f.id, p.name]\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownQualifier { ref qualifier, .. } if qualifier == "p"));

        let ok = single(
            "    table: facts\n    alias: f\n    content_column: c\n    embedding_column: e\n    display_columns: [f.id, p.name AS person]\n    joins: [\"JOIN people p ON p.id = f.person_id\"]\n",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_rejects_malformed_display_columns() {
        let err = single(
            "    table: x\n    content_column: c\n    embedding_column: e\n    display_columns: []\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyDisplayColumns { .. }));

        let err = single(
            "    table: x\n    content_column: c\n    embedding_column: e\n    display_columns: [\"x.a, (SELECT 1)\"]\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDisplayColumn { .. }));

        let err = single(
            "    table: x\n    content_column: c\n    embedding_column: e\n    display_columns: [x.a AS similarity_score]\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDisplayColumn { .. }));

        let err = single(
            "    table: x\n    content_column: c\n    embedding_column: e\n    display_columns: [x.a, x.b AS a]\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDisplayColumn { .. }));
    }

    #[test]
    fn test_rejects_orphan_filter_defaults() {
        let err = single(
            "    table: x\n    content_column: c\n    embedding_column: e\n    filters:\n      default_hours: 24\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFilter { .. }));

        let err = single(
            "    table: x\n    content_column: c\n    embedding_column: e\n    filters:\n      default_min_confidence: 0.5\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFilter { .. }));

        let err = single(
            "    table: x\n    content_column: c\n    embedding_column: e\n    filters:\n      confidence_column: conf\n      default_min_confidence: 1.5\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFilter { .. }));

        let err = single(
            "    table: x\n    content_column: c\n    embedding_column: e\n    filters:\n      time_column: ts\n      default_hours: 0\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFilter { .. }));
    }

    #[test]
    fn test_rejects_bad_joins_and_unknown_keys() {
        let err = single(
            "    table: x\n    content_column: c\n    embedding_column: e\n    joins: [\"JOIN y ON y.id = x.id; DELETE FROM y\"]\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidJoin { .. }));

        let err = single(
            "    table: x\n    content_column: c\n    embedding_column: e\n    colums: [x.a]\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
