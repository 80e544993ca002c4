//! The declarative configuration document.
//!
//! A single YAML file carries three optional sections:
//!
//! ```yaml
//! store:
//!   path: .tablesearch/index.db
//!   dims: 384
//! embedding:
//!   provider: htp
//! tables:
//!   facts: { table: person_facts, content_column: fact, embedding_column: embedding }
//! ```
//!
//! `tables` is handed to [`TableRegistry`]; the rest becomes [`Settings`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::paths::ToolPaths;
use crate::error::ConfigError;
use crate::search::embedding::HTP_DIMS;
use crate::search::registry::{RawTableConfig, TableRegistry};
use crate::search::vectordb::StoreConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    store: StoreSection,
    #[serde(default)]
    embedding: EmbeddingConfig,
    #[serde(default)]
    tables: BTreeMap<String, RawTableConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoreSection {
    path: Option<PathBuf>,
    dims: Option<usize>,
}

/// `embedding:` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "htp".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

/// Everything except the table registry, resolved against defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
    /// File the settings were read from, if any.
    pub source: Option<PathBuf>,
}

impl Settings {
    /// Load `path`, or the first default candidate that exists.
    ///
    /// No file at all is not an error: defaults apply and the registry is
    /// empty. An explicit `path` that does not exist is logged as a warning.
    pub fn load(path: Option<&Path>, paths: &ToolPaths) -> Result<(Self, TableRegistry), ConfigError> {
        let source = match path {
            Some(p) => Some(p.to_path_buf()),
            None => paths.config_candidates().into_iter().find(|p| p.exists()),
        };

        let file = match &source {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(p).map_err(|e| ConfigError::Io {
                    path: p.clone(),
                    source: e,
                })?;
                parse(&content)?
            }
            Some(p) => {
                tracing::warn!(path = %p.display(), "config file not found, no tables configured");
                ConfigFile::default()
            }
            None => ConfigFile::default(),
        };

        Self::from_file(file, source, paths)
    }

    /// Parse an in-memory document.
    pub fn from_yaml_str(content: &str, paths: &ToolPaths) -> Result<(Self, TableRegistry), ConfigError> {
        Self::from_file(parse(content)?, None, paths)
    }

    fn from_file(
        file: ConfigFile,
        source: Option<PathBuf>,
        paths: &ToolPaths,
    ) -> Result<(Self, TableRegistry), ConfigError> {
        let provider_dims = match file.embedding.provider.as_str() {
            "htp" => Some(HTP_DIMS),
            _ => file.embedding.dims,
        };

        let dims = file.store.dims.or(provider_dims).unwrap_or(HTP_DIMS);
        if dims == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "store.dims",
                reason: "must be positive".to_string(),
            });
        }
        if let Some(p) = provider_dims {
            if p != dims {
                return Err(ConfigError::InvalidSetting {
                    field: "store.dims",
                    reason: format!(
                        "{} does not match the {} provider's {} dimensions",
                        dims, file.embedding.provider, p
                    ),
                });
            }
        }

        // Relative store paths are resolved next to the config file.
        let path = match (file.store.path, &source) {
            (Some(p), Some(src)) if p.is_relative() => src
                .parent()
                .map(|dir| dir.join(&p))
                .unwrap_or(p),
            (Some(p), _) => p,
            (None, _) => paths.default_db(),
        };

        let registry = TableRegistry::from_raw(file.tables)?;

        Ok((
            Self {
                store: StoreConfig { path, dims },
                embedding: file.embedding,
                source,
            },
            registry,
        ))
    }
}

fn parse(content: &str) -> Result<ConfigFile, ConfigError> {
    if content.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    let file: Option<ConfigFile> = serde_yaml::from_str(content)?;
    Ok(file.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_missing_explicit_path_warns() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("tabels.yaml");
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let (_, registry) = tracing::subscriber::with_default(subscriber, || {
            Settings::load(Some(&missing), &ToolPaths::from_root(dir.path().to_path_buf()))
        })
        .unwrap();
        assert!(registry.is_empty());

        let logged = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("WARN"));
        assert!(logged.contains("tabels.yaml"));
    }

    fn paths() -> ToolPaths {
        ToolPaths::from_root(PathBuf::from("/work"))
    }

    #[test]
    fn test_defaults_without_file() {
        let (settings, registry) = Settings::from_yaml_str("", &paths()).unwrap();
        assert_eq!(settings.store.dims, HTP_DIMS);
        assert_eq!(settings.store.path, paths().default_db());
        assert_eq!(settings.embedding.provider, "htp");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_openai_section() {
        let doc = "embedding:\n  provider: openai\n  model: text-embedding-3-small\n  dims: 1536\n";
        let (settings, _) = Settings::from_yaml_str(doc, &paths()).unwrap();
        assert_eq!(settings.store.dims, 1536);
        assert_eq!(settings.embedding.model.as_deref(), Some("text-embedding-3-small"));
        assert_eq!(settings.embedding.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn test_dimension_conflict_rejected() {
        let doc = "store:\n  dims: 1536\n";
        assert!(matches!(
            Settings::from_yaml_str(doc, &paths()),
            Err(ConfigError::InvalidSetting { field: "store.dims", .. })
        ));
    }

    #[test]
    fn test_unknown_section_rejected() {
        assert!(matches!(
            Settings::from_yaml_str("tabels: {}\n", &paths()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_resolves_relative_store_path() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tables.yaml");
        let mut f = std::fs::File::create(&config_path).unwrap();
        writeln!(
            f,
            "store:\n  path: data/index.db\ntables:\n  notes:\n    table: notes\n    content_column: body\n    embedding_column: embedding\n"
        )
        .unwrap();

        let (settings, registry) = Settings::load(Some(&config_path), &paths()).unwrap();
        assert_eq!(settings.store.path, dir.path().join("data/index.db"));
        assert_eq!(settings.source.as_deref(), Some(config_path.as_path()));
        assert_eq!(registry.names(), vec!["notes".to_string()]);
    }

    #[test]
    fn test_load_missing_explicit_file_is_empty() {
        let (settings, registry) =
            Settings::load(Some(Path::new("/nonexistent/tables.yaml")), &paths()).unwrap();
        assert!(registry.is_empty());
        assert_eq!(settings.store.path, paths().default_db());
    }
}
