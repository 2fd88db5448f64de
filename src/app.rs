//! Component wiring.
//!
//! [`App::open`] builds every component from a [`Config`] around one shared
//! SQLite pool and one corpus store handle. Both the CLI and the HTTP server
//! go through it; nothing holds a process-wide connection.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::classifier::CategoryClassifier;
use crate::config::Config;
use crate::corpus::{self, CorpusStore};
use crate::corrections::CorrectionWorkflow;
use crate::db;
use crate::feedback::FeedbackAnalyzer;
use crate::gateway::KnowledgeGateway;
use crate::generation::{self, GenerationService};
use crate::ingest::Ingestor;
use crate::migrate;
use crate::registry::VersionRegistry;

pub struct App {
    pub config: Config,
    pub pool: SqlitePool,
    pub store: Arc<dyn CorpusStore>,
    pub registry: VersionRegistry,
    pub ingestor: Ingestor,
    pub corrections: CorrectionWorkflow,
    pub gateway: KnowledgeGateway,
}

impl App {
    /// Connect, migrate, and construct all components.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config)
            .await
            .with_context(|| format!("Failed to open database {}", config.db.path.display()))?;
        migrate::run_migrations(&pool).await?;

        let store = corpus::create_store(&config.corpus_store)?;
        let generation: Arc<dyn GenerationService> =
            generation::create_service(&config.generation)?;

        Ok(Self::with_parts(config, pool, store, generation))
    }

    /// Assemble from already-built collaborators.
    pub fn with_parts(
        config: Config,
        pool: SqlitePool,
        store: Arc<dyn CorpusStore>,
        generation: Arc<dyn GenerationService>,
    ) -> Self {
        let registry = VersionRegistry::new(pool.clone(), config.registry.manual_override_scope);

        let mut classifier_config = config.classifier.clone();
        classifier_config.enabled &= config.generation.is_enabled();
        let classifier = CategoryClassifier::new(generation.clone(), classifier_config);

        let ingestor = Ingestor::new(
            store.clone(),
            registry.clone(),
            classifier,
            config.corpora.clone(),
            config.ingest.clone(),
        );

        let corrections = CorrectionWorkflow::new(
            pool.clone(),
            store.clone(),
            registry.clone(),
            FeedbackAnalyzer::new(generation.clone()),
            config.storage.correction_docs_dir(),
            config.corpora.correction_display_name.clone(),
        );

        let gateway = KnowledgeGateway::new(
            pool.clone(),
            store.clone(),
            generation,
            config.corpora.clone(),
        );

        Self {
            config,
            pool,
            store,
            registry,
            ingestor,
            corrections,
            gateway,
        }
    }
}
