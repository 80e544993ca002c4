pub mod find;
pub mod index;
pub mod list_tables;
pub mod search_table;
pub mod stats;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use unicode_width::UnicodeWidthChar;

use tablesearch::core::config::Settings;
use tablesearch::core::paths::ToolPaths;
use tablesearch::search::embedding::create_provider;
use tablesearch::search::registry::TableRegistry;
use tablesearch::search::vectordb::VectorStore;
use tablesearch::SearchEngine;

/// Global flags shared by every command.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub config: Option<PathBuf>,
    pub db: Option<PathBuf>,
}

impl Context {
    pub fn load(&self) -> Result<(Settings, TableRegistry)> {
        let paths = ToolPaths::new();
        let (mut settings, registry) =
            Settings::load(self.config.as_deref(), &paths).context("Failed to load configuration")?;
        if let Some(db) = &self.db {
            settings.store.path = db.clone();
        }
        tracing::debug!(
            config = ?settings.source,
            db = %settings.store.path.display(),
            tables = registry.len(),
            "configuration loaded"
        );
        Ok((settings, registry))
    }

    /// Open the store (creating its directory) and build an engine.
    ///
    /// `embed` attaches the configured embedding provider; commands that never
    /// embed text skip it so a missing API key does not block them.
    pub fn open_engine(&self, embed: bool) -> Result<SearchEngine> {
        let (settings, registry) = self.load()?;

        if let Some(parent) = settings.store.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let store = VectorStore::open(&settings.store)
            .with_context(|| format!("Failed to open index {}", settings.store.path.display()))?;
        let engine = SearchEngine::new(store, registry)?;

        if embed {
            let provider = create_provider(&settings.embedding)?;
            Ok(engine.with_provider(provider)?)
        } else {
            Ok(engine)
        }
    }
}

/// Cut `text` to at most `width` terminal columns, appending `...` when cut.
pub fn truncate(text: &str, width: usize) -> String {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut used = 0;
    let mut out = String::new();
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > width {
            out.push_str("...");
            return out;
        }
        used += w;
        out.push(c);
    }
    out
}

/// Display form of a record value.
pub fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format!("{:.2}", f),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}
