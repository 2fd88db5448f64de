//! Batch document ingestion.
//!
//! Each file goes through the same pipeline, independently of the others:
//!
//! 1. skip if the registry already holds the file name in the target corpus
//!    ([`IngestOutcome::ConflictIgnored`]),
//! 2. push it into the corpus store and wait for indexing,
//! 3. resolve lineage and provenance ([`crate::metadata::resolve`]),
//! 4. classify it (best-effort),
//! 5. commit it to the [`VersionRegistry`].
//!
//! A failure in steps 1, 2 or 5 is captured in that file's report; the rest of
//! the batch carries on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::classifier::CategoryClassifier;
use crate::config::{CorporaConfig, IngestConfig};
use crate::corpus::CorpusStore;
use crate::error::{GatewayError, GatewayResult};
use crate::metadata;
use crate::models::{Category, CorpusType, NewDocument};
use crate::registry::VersionRegistry;

/// Who is uploading, and where to.
#[derive(Debug, Clone)]
pub struct IngestTarget {
    pub corpus_type: CorpusType,
    pub explicit_group: Option<String>,
    pub uploaded_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Ingested {
        document_id: String,
        version_group: String,
        version_date: String,
        category: Option<Category>,
        is_latest: bool,
    },
    ConflictIgnored {
        existing_id: String,
    },
    Failed {
        code: &'static str,
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub file: String,
    #[serde(flatten)]
    pub outcome: IngestOutcome,
}

impl IngestReport {
    pub fn is_ingested(&self) -> bool {
        matches!(self.outcome, IngestOutcome::Ingested { .. })
    }
}

pub struct Ingestor {
    store: Arc<dyn CorpusStore>,
    registry: VersionRegistry,
    classifier: CategoryClassifier,
    corpora: CorporaConfig,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn CorpusStore>,
        registry: VersionRegistry,
        classifier: CategoryClassifier,
        corpora: CorporaConfig,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            registry,
            classifier,
            corpora,
            config,
        }
    }

    /// Ingest a single file or every supported file in a directory.
    pub async fn ingest_path(
        &self,
        path: &Path,
        target: &IngestTarget,
    ) -> GatewayResult<Vec<IngestReport>> {
        let files = self.collect_files(path)?;
        let mut reports = Vec::with_capacity(files.len());
        for file in &files {
            reports.push(self.ingest_file(file, target).await);
        }

        let ingested = reports.iter().filter(|r| r.is_ingested()).count();
        info!(path = %path.display(), ingested, total = reports.len(), "batch finished");
        Ok(reports)
    }

    pub async fn ingest_file(&self, path: &Path, target: &IngestTarget) -> IngestReport {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        let outcome = match self.run_pipeline(path, &file_name, target).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(file = %file_name, error = %e, "ingest failed");
                IngestOutcome::Failed {
                    code: e.code(),
                    error: e.to_string(),
                }
            }
        };
        IngestReport {
            file: file_name,
            outcome,
        }
    }

    async fn run_pipeline(
        &self,
        path: &Path,
        file_name: &str,
        target: &IngestTarget,
    ) -> GatewayResult<IngestOutcome> {
        if let Some(existing) = self
            .registry
            .find_by_name(file_name, target.corpus_type)
            .await?
        {
            info!(file = file_name, existing = %existing.id, "already registered, skipping");
            return Ok(IngestOutcome::ConflictIgnored {
                existing_id: existing.id,
            });
        }

        if !self.is_supported(path) {
            return Err(GatewayError::Validation(format!(
                "unsupported file type: {}",
                file_name
            )));
        }

        let display_name = match target.corpus_type {
            CorpusType::Primary => &self.corpora.primary_display_name,
            CorpusType::Correction => &self.corpora.correction_display_name,
        };
        let corpus = self.store.ensure_corpus(display_name).await?;
        let store_ref = self.store.ingest(&corpus, path, file_name).await?;

        let resolved = metadata::resolve(path);
        let category = if self.classifier.is_enabled() {
            Some(self.classifier.classify(file_name).await)
        } else {
            None
        };

        let doc = self
            .registry
            .commit(
                NewDocument {
                    file_name: file_name.to_string(),
                    display_name: file_name.to_string(),
                    metadata: resolved,
                    category,
                    store_ref: Some(store_ref),
                    uploaded_by: target.uploaded_by.clone(),
                },
                target.corpus_type,
                target.explicit_group.as_deref(),
            )
            .await?;

        Ok(IngestOutcome::Ingested {
            document_id: doc.id,
            version_group: doc.version_group,
            version_date: doc.version_date,
            category: doc.category,
            is_latest: doc.is_latest,
        })
    }

    fn is_supported(&self, path: &Path) -> bool {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        self.config.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
    }

    /// Files under `path`, sorted. A file path is returned as-is so an
    /// unsupported type is reported rather than silently dropped.
    fn collect_files(&self, path: &Path) -> GatewayResult<Vec<PathBuf>> {
        let meta = std::fs::metadata(path).map_err(|e| GatewayError::io(path, e))?;
        if meta.is_file() {
            return Ok(vec![path.to_path_buf()]);
        }

        let excludes = build_globset(&self.config.exclude_globs)?;
        let max_depth = if self.config.recursive { usize::MAX } else { 1 };

        let mut files = Vec::new();
        for entry in WalkDir::new(path).max_depth(max_depth) {
            let entry = entry.map_err(|e| {
                let io = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
                GatewayError::io(path, io)
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if excludes.is_match(&*name) || !self.is_supported(entry.path()) {
                continue;
            }
            files.push(entry.into_path());
        }

        files.sort();
        Ok(files)
    }
}

fn build_globset(patterns: &[String]) -> GatewayResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| GatewayError::Validation(format!("bad exclude glob {}: {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| GatewayError::Validation(e.to_string()))
}
