//! Indexing engine - embeds source units and appends them to the code index.

use std::time::Instant;

use serde::Serialize;

use super::embedding::EmbeddingProvider;
use super::vectordb::{first_non_finite, CodeElement, VectorStore};
use crate::error::Result;

/// Text embedded for one unit: name, signature and description, in that
/// order, blank fields skipped.
pub fn searchable_text(
    name: Option<&str>,
    signature: Option<&str>,
    description: Option<&str>,
) -> String {
    [name, signature, description]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Indexing statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexingStats {
    pub indexed: usize,
    pub failed: usize,
    pub duration_ms: u128,
}

pub struct Indexer<'a, P: EmbeddingProvider + ?Sized> {
    store: &'a VectorStore,
    provider: &'a P,
}

impl<'a, P: EmbeddingProvider + ?Sized> Indexer<'a, P> {
    pub fn new(store: &'a VectorStore, provider: &'a P) -> Self {
        Self { store, provider }
    }

    /// Embed and insert every unit.
    ///
    /// A unit whose embedding fails, comes back with the wrong dimension or
    /// holds a NaN/infinite component is skipped and counted in `failed`.
    /// Storage errors abort the run.
    pub fn index<I>(&self, units: I) -> Result<IndexingStats>
    where
        I: IntoIterator<Item = CodeElement>,
    {
        let start = Instant::now();
        let mut stats = IndexingStats::default();

        for unit in units {
            let embedding = match self.provider.embed(&unit.searchable_text()) {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(
                        file = %unit.file_path,
                        element = %unit.element_name,
                        "embedding failed, skipping: {:#}",
                        e
                    );
                    stats.failed += 1;
                    continue;
                }
            };

            if embedding.len() != self.store.dims() {
                tracing::warn!(
                    file = %unit.file_path,
                    element = %unit.element_name,
                    "embedding has {} dimensions, expected {}, skipping",
                    embedding.len(),
                    self.store.dims()
                );
                stats.failed += 1;
                continue;
            }
            if let Some(index) = first_non_finite(&embedding) {
                tracing::warn!(
                    file = %unit.file_path,
                    element = %unit.element_name,
                    "embedding component {} is not finite, skipping",
                    index
                );
                stats.failed += 1;
                continue;
            }

            self.store.insert(&unit, &embedding)?;
            stats.indexed += 1;
        }

        stats.duration_ms = start.elapsed().as_millis();

        let total = self.store.stats()?.total;
        self.store.set_meta("indexed_count", &total.to_string())?;
        self.store.set_meta(
            "last_full_index",
            &chrono::Utc::now().timestamp().to_string(),
        )?;

        tracing::info!(
            indexed = stats.indexed,
            failed = stats.failed,
            duration_ms = stats.duration_ms as u64,
            model = self.provider.model_name(),
            "index run complete"
        );

        Ok(stats)
    }
}
