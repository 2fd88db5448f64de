//! TOML configuration parsing and validation.
//!
//! Every section except `[db]` is optional and falls back to defaults that
//! match a single-host deployment with a local directory corpus store.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub corpora: CorporaConfig,
    #[serde(default)]
    pub corpus_store: CorpusStoreConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Where approved correction artifacts are written before ingestion.
    /// Defaults to `<data_dir>/correction_docs`.
    #[serde(default)]
    pub correction_docs_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            correction_docs_dir: None,
        }
    }
}

impl StorageConfig {
    pub fn correction_docs_dir(&self) -> PathBuf {
        self.correction_docs_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("correction_docs"))
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct CorporaConfig {
    #[serde(default = "default_primary_name")]
    pub primary_display_name: String,
    #[serde(default = "default_correction_name")]
    pub correction_display_name: String,
}

impl Default for CorporaConfig {
    fn default() -> Self {
        Self {
            primary_display_name: default_primary_name(),
            correction_display_name: default_correction_name(),
        }
    }
}

fn default_primary_name() -> String {
    "regulations-primary".to_string()
}
fn default_correction_name() -> String {
    "regulations-corrections".to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct CorpusStoreConfig {
    #[serde(default = "default_corpus_provider")]
    pub provider: String,
    /// Mirror root for the `directory` provider.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_poll")]
    pub max_poll_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for CorpusStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_corpus_provider(),
            root: None,
            poll_interval_secs: default_poll_interval(),
            max_poll_secs: default_max_poll(),
            timeout_secs: default_timeout_secs(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_corpus_provider() -> String {
    "directory".to_string()
}
fn default_poll_interval() -> u64 {
    5
}
fn default_max_poll() -> u64 {
    300
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "gemini-2.5-flash-lite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ClassifierConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Fixed delay before every classification attempt.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    /// Attempts per file, counting the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Wait used when a rate-limit response carries no retry hint.
    #[serde(default = "default_wait_secs")]
    pub default_wait_secs: u64,
    /// Added on top of a server-suggested retry delay.
    #[serde(default = "default_margin_secs")]
    pub retry_margin_secs: u64,
    /// Upper bound on any single rate-limit wait.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pacing_ms: default_pacing_ms(),
            max_attempts: default_max_attempts(),
            default_wait_secs: default_wait_secs(),
            retry_margin_secs: default_margin_secs(),
            max_wait_secs: default_max_wait_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_pacing_ms() -> u64 {
    4000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_wait_secs() -> u64 {
    60
}
fn default_margin_secs() -> u64 {
    2
}
fn default_max_wait_secs() -> u64 {
    300
}

/// How wide `set-latest` clears the latest flag.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverrideScope {
    /// Every document in the version group, across both corpora.
    #[default]
    Group,
    /// Only documents sharing the chosen document's corpus type.
    Corpus,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    #[serde(default)]
    pub manual_override_scope: OverrideScope,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct IngestConfig {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub recursive: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            exclude_globs: default_exclude_globs(),
            recursive: false,
        }
    }
}

fn default_extensions() -> Vec<String> {
    ["hwp", "pdf", "docx", "doc", "txt", "json", "xlsx", "md", "csv"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_exclude_globs() -> Vec<String> {
    vec!["~$*".to_string(), ".*".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Request body cap for `/api/admin/upload`, in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_max_upload_bytes() -> usize {
    200 * 1024 * 1024
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.corpus_store.provider.as_str() {
        "directory" => {
            if config.corpus_store.root.is_none() {
                anyhow::bail!("corpus_store.root must be set when provider is 'directory'");
            }
        }
        "gemini" => {}
        other => anyhow::bail!(
            "Unknown corpus store provider: '{}'. Must be directory or gemini.",
            other
        ),
    }

    if config.corpus_store.poll_interval_secs == 0 {
        anyhow::bail!("corpus_store.poll_interval_secs must be > 0");
    }

    match config.generation.provider.as_str() {
        "disabled" | "gemini" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or gemini.",
            other
        ),
    }

    if config.classifier.max_attempts == 0 || config.classifier.max_attempts > 10 {
        anyhow::bail!("classifier.max_attempts must be in 1..=10");
    }

    if config.corpora.primary_display_name == config.corpora.correction_display_name {
        anyhow::bail!("corpora.primary_display_name and correction_display_name must differ");
    }

    if config.server.max_upload_bytes == 0 {
        anyhow::bail!("server.max_upload_bytes must be > 0");
    }

    if config.ingest.extensions.is_empty() {
        anyhow::bail!("ingest.extensions must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Result<Config> {
        let config: Config = toml::from_str(src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse(
            r#"
            [db]
            path = "data/kb.sqlite"

            [corpus_store]
            root = "data/corpora"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.classifier.max_attempts, 3);
        assert_eq!(cfg.registry.manual_override_scope, OverrideScope::Group);
        assert!(!cfg.generation.is_enabled());
        assert_eq!(
            cfg.storage.correction_docs_dir(),
            PathBuf::from("./data/correction_docs")
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = parse(
            r#"
            [db]
            path = "kb.sqlite"
            colour = "blue"
            "#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_directory_provider_requires_root() {
        let err = parse("[db]\npath = \"kb.sqlite\"\n").unwrap_err();
        assert!(err.to_string().contains("corpus_store.root"));
    }

    #[test]
    fn test_override_scope_corpus() {
        let cfg = parse(
            r#"
            [db]
            path = "kb.sqlite"
            [corpus_store]
            root = "corpora"
            [registry]
            manual_override_scope = "corpus"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.registry.manual_override_scope, OverrideScope::Corpus);
    }
}
