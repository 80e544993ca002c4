//! Query compiler - turns a table configuration plus a query vector into one
//! parameterized similarity statement.
//!
//! Identifiers reach the SQL text only through the typed fragments below
//! ([`Ident`], [`ColumnRef`], [`JoinClause`]), which can only be built from
//! validated configuration. Request-time values (query vector, time window,
//! confidence bound, limit) are only ever appended as [`SqlParam`]s and
//! referenced through numbered placeholders.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::types::{ToSql, ToSqlOutput, Value};

use super::registry::TableConfig;
use super::vectordb::{embedding_to_blob, first_non_finite};
use crate::error::{Result, SearchError};

/// Name of the projected similarity column.
pub const SCORE_COLUMN: &str = "similarity_score";

/// SQL scalar function computing cosine distance between two embedding BLOBs.
pub const COSINE_DISTANCE_FN: &str = "vec_distance_cosine";

lazy_static! {
    static ref IDENT_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    static ref COLUMN_RE: Regex = Regex::new(
        r"(?i)^\s*(?:([A-Za-z_][A-Za-z0-9_]*)\.)?([A-Za-z_][A-Za-z0-9_]*)(?:\s+AS\s+([A-Za-z_][A-Za-z0-9_]*))?\s*$"
    )
    .unwrap();
    static ref JOIN_RE: Regex = Regex::new(
        r"(?is)^\s*(NATURAL\s+)?(?:(INNER|LEFT(?:\s+OUTER)?|RIGHT(?:\s+OUTER)?|FULL(?:\s+OUTER)?|CROSS)\s+)?JOIN\s+([A-Za-z_][A-Za-z0-9_]*)(?:\s+(?:AS\s+)?([A-Za-z_][A-Za-z0-9_]*))?(?:\s+((?:ON|USING)\b.*?))?\s*$"
    )
    .unwrap();
}

/// A plain SQL identifier taken from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident(String);

impl Ident {
    pub fn new(value: &str) -> Option<Self> {
        IDENT_RE.is_match(value).then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `[qualifier.]column [AS label]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub qualifier: Option<Ident>,
    pub column: Ident,
    pub label: Option<Ident>,
}

impl ColumnRef {
    pub fn parse(value: &str) -> Option<Self> {
        let caps = COLUMN_RE.captures(value)?;
        Some(Self {
            qualifier: caps.get(1).and_then(|m| Ident::new(m.as_str())),
            column: Ident::new(caps.get(2)?.as_str())?,
            label: caps.get(3).and_then(|m| Ident::new(m.as_str())),
        })
    }

    pub fn qualified(qualifier: &Ident, column: &Ident) -> Self {
        Self {
            qualifier: Some(qualifier.clone()),
            column: column.clone(),
            label: None,
        }
    }

    /// Key under which the value shows up in a result row.
    pub fn output_name(&self) -> &str {
        self.label.as_ref().unwrap_or(&self.column).as_str()
    }

    fn write_reference(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{}.{}", q, self.column),
            None => write!(f, "{}", self.column),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_reference(f)?;
        if let Some(label) = &self.label {
            write!(f, " AS {}", label)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Plain,
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinKind {
    fn keyword(self) -> &'static str {
        match self {
            Self::Plain => "JOIN",
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
            Self::Full => "FULL JOIN",
            Self::Cross => "CROSS JOIN",
        }
    }
}

/// One configured join. The constraint (`ON ...` / `USING (...)`) is trusted
/// configuration text and is emitted as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinClause {
    pub natural: bool,
    pub kind: JoinKind,
    pub table: Ident,
    pub alias: Option<Ident>,
    pub constraint: Option<String>,
}

impl JoinClause {
    pub fn parse(value: &str) -> std::result::Result<Self, &'static str> {
        if value.contains(';') || value.contains("--") || value.contains("/*") {
            return Err("statement separators and comments are not allowed");
        }
        if value.contains('?') {
            return Err("placeholders are not allowed in join fragments");
        }

        let caps = JOIN_RE
            .captures(value)
            .ok_or("expected [NATURAL] [INNER|LEFT|RIGHT|FULL|CROSS] JOIN <table> [alias] ON ...")?;

        let natural = caps.get(1).is_some();
        let kind = match caps.get(2).map(|m| m.as_str().to_ascii_uppercase()) {
            None => JoinKind::Plain,
            Some(k) if k == "INNER" => JoinKind::Inner,
            Some(k) if k == "CROSS" => JoinKind::Cross,
            Some(k) if k.starts_with("LEFT") => JoinKind::Left,
            Some(k) if k.starts_with("RIGHT") => JoinKind::Right,
            Some(_) => JoinKind::Full,
        };
        let table = caps
            .get(3)
            .and_then(|m| Ident::new(m.as_str()))
            .ok_or("invalid join table name")?;
        let alias = caps.get(4).and_then(|m| Ident::new(m.as_str()));
        let constraint = caps.get(5).map(|m| m.as_str().trim().to_string());

        if natural {
            if kind == JoinKind::Cross {
                return Err("NATURAL cannot be combined with CROSS JOIN");
            }
            if constraint.is_some() {
                return Err("NATURAL JOIN takes no ON/USING constraint");
            }
        } else if constraint.is_none() && kind != JoinKind::Cross {
            return Err("only CROSS and NATURAL joins may omit the ON/USING constraint");
        }

        Ok(Self {
            natural,
            kind,
            table,
            alias,
            constraint,
        })
    }

    /// Name that columns from this join are qualified with.
    pub fn binding(&self) -> &Ident {
        self.alias.as_ref().unwrap_or(&self.table)
    }
}

impl fmt::Display for JoinClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.natural {
            f.write_str("NATURAL ")?;
        }
        write!(f, "{} {}", self.kind.keyword(), self.table)?;
        if let Some(alias) = &self.alias {
            write!(f, " {}", alias)?;
        }
        if let Some(constraint) = &self.constraint {
            write!(f, " {}", constraint)?;
        }
        Ok(())
    }
}

/// A bound runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Vector(Vec<f32>),
    Integer(i64),
    Real(f64),
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Vector(v) => ToSqlOutput::Owned(Value::Blob(embedding_to_blob(v))),
            Self::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            Self::Real(r) => ToSqlOutput::Owned(Value::Real(*r)),
        })
    }
}

impl fmt::Display for SqlParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vector(v) => write!(f, "<vector dims={}>", v.len()),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Real(r) => write!(f, "{}", r),
        }
    }
}

/// Numbered placeholder (`?N`) handed out by the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placeholder(usize);

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.0)
    }
}

enum Expr<'a> {
    Column(&'a ColumnRef),
    CosineDistance(&'a ColumnRef, Placeholder),
    Similarity(&'a ColumnRef, Placeholder),
}

impl fmt::Display for Expr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(c) => write!(f, "{}", c),
            Self::CosineDistance(c, p) => {
                write!(f, "{}(", COSINE_DISTANCE_FN)?;
                c.write_reference(f)?;
                write!(f, ", {})", p)
            }
            Self::Similarity(c, p) => {
                write!(f, "1 - {} AS {}", Expr::CosineDistance(c, *p), SCORE_COLUMN)
            }
        }
    }
}

enum Predicate {
    NotNull(ColumnRef),
    AtLeast(ColumnRef, Placeholder),
    WithinHours(ColumnRef, Placeholder),
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotNull(c) => write!(f, "{} IS NOT NULL", c),
            Self::AtLeast(c, p) => write!(f, "{} >= {}", c, p),
            Self::WithinHours(c, p) => {
                write!(f, "{} >= datetime('now', '-' || {} || ' hours')", c, p)
            }
        }
    }
}

/// Minimal SELECT builder. Every fragment is typed; values go to `params`.
#[derive(Default)]
struct SelectBuilder<'a> {
    projection: Vec<Expr<'a>>,
    from: Option<(&'a Ident, &'a Ident)>,
    joins: Vec<&'a JoinClause>,
    predicates: Vec<Predicate>,
    order_by: Option<Expr<'a>>,
    limit: Option<Placeholder>,
    params: Vec<SqlParam>,
}

impl<'a> SelectBuilder<'a> {
    fn bind(&mut self, param: SqlParam) -> Placeholder {
        self.params.push(param);
        Placeholder(self.params.len())
    }

    fn build(self) -> CompiledQuery {
        let projection = self
            .projection
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!("SELECT {}", projection);
        if let Some((table, alias)) = self.from {
            sql.push_str(&format!(" FROM {} {}", table, alias));
        }
        for join in &self.joins {
            sql.push_str(&format!(" {}", join));
        }
        if !self.predicates.is_empty() {
            let predicates = self
                .predicates
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(" AND ");
            sql.push_str(&format!(" WHERE {}", predicates));
        }
        if let Some(order) = &self.order_by {
            sql.push_str(&format!(" ORDER BY {} ASC", order));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        CompiledQuery {
            sql,
            params: self.params,
        }
    }
}

/// A statement ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl CompiledQuery {
    /// Statement plus parameter summaries, safe for logs and error messages.
    pub fn describe(&self) -> String {
        let params = self
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| format!("?{}={}", i + 1, p))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} [{}]", self.sql, params)
    }
}

/// Runtime inputs of one search.
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest<'a> {
    pub query_vector: &'a [f32],
    pub limit: i64,
    pub hours: Option<i64>,
    pub min_confidence: Option<f64>,
}

impl<'a> SearchRequest<'a> {
    pub fn new(query_vector: &'a [f32], limit: i64) -> Self {
        Self {
            query_vector,
            limit,
            hours: None,
            min_confidence: None,
        }
    }

    pub fn hours(mut self, hours: Option<i64>) -> Self {
        self.hours = hours;
        self
    }

    pub fn min_confidence(mut self, min_confidence: Option<f64>) -> Self {
        self.min_confidence = min_confidence;
        self
    }
}

/// Compiles [`TableConfig`]s into similarity statements for a store of fixed
/// embedding dimension.
#[derive(Debug, Clone, Copy)]
pub struct QueryCompiler {
    dims: usize,
}

impl QueryCompiler {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn compile(&self, table: &TableConfig, request: &SearchRequest<'_>) -> Result<CompiledQuery> {
        if request.limit <= 0 {
            return Err(SearchError::InvalidLimit(request.limit));
        }
        if request.query_vector.len() != self.dims {
            return Err(SearchError::DimensionMismatch {
                expected: self.dims,
                actual: request.query_vector.len(),
            });
        }
        if let Some(index) = first_non_finite(request.query_vector) {
            return Err(SearchError::InvalidQueryVector { index });
        }
        if let Some(hours) = request.hours {
            if hours < 0 {
                return Err(SearchError::InvalidFilter {
                    name: "hours",
                    reason: format!("must be >= 0, got {}", hours),
                });
            }
        }
        if let Some(conf) = request.min_confidence {
            if !(0.0..=1.0).contains(&conf) {
                return Err(SearchError::InvalidFilter {
                    name: "min_confidence",
                    reason: format!("must be within [0, 1], got {}", conf),
                });
            }
        }

        let embedding = table.embedding_ref();
        let mut builder = SelectBuilder::default();

        let vector = builder.bind(SqlParam::Vector(request.query_vector.to_vec()));

        builder.projection = table.display_columns.iter().map(Expr::Column).collect();
        builder.projection.push(Expr::Similarity(embedding, vector));

        builder.from = Some((&table.table, &table.alias));
        builder.joins = table.joins.iter().collect();

        builder.predicates.push(Predicate::NotNull(embedding.clone()));

        if let Some(filter) = &table.time_filter {
            let hours = request.hours.unwrap_or(filter.default_hours);
            let p = builder.bind(SqlParam::Integer(hours));
            builder.predicates.push(Predicate::WithinHours(
                ColumnRef::qualified(&table.alias, &filter.column),
                p,
            ));
        }

        if let Some(filter) = &table.confidence_filter {
            let min = request.min_confidence.unwrap_or(filter.default_min_confidence);
            let p = builder.bind(SqlParam::Real(min));
            builder.predicates.push(Predicate::AtLeast(
                ColumnRef::qualified(&table.alias, &filter.column),
                p,
            ));
        }

        builder.order_by = Some(Expr::CosineDistance(embedding, vector));
        builder.limit = Some(builder.bind(SqlParam::Integer(request.limit)));

        Ok(builder.build())
    }
}
