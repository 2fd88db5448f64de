//! Registry maintenance against the corpus store.
//!
//! The corpus store is authoritative for what can actually be retrieved;
//! the registry is authoritative for lineage. These operations repair drift
//! between the two.
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | [`list`] | corpora and their documents, as the store reports them |
//! | [`reconcile`] | registry rows added/removed to match the store |
//! | [`reset`] | every document removed from both corpora, registry cleared |

use serde::Serialize;
use tracing::{info, warn};

use crate::config::CorporaConfig;
use crate::corpus::{CorpusRef, CorpusStore, RemoteDocument};
use crate::error::GatewayResult;
use crate::models::CorpusType;
use crate::registry::{ReconcileReport, VersionRegistry};

#[derive(Debug, Clone, Serialize)]
pub struct CorpusListing {
    pub corpus: CorpusRef,
    pub documents: Vec<RemoteDocument>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    pub remote_removed: usize,
    pub remote_failed: usize,
    pub registry_cleared: u64,
}

fn corpus_types(corpora: &CorporaConfig) -> [(&str, CorpusType); 2] {
    [
        (corpora.primary_display_name.as_str(), CorpusType::Primary),
        (corpora.correction_display_name.as_str(), CorpusType::Correction),
    ]
}

/// Look up a corpus by display name without creating it.
async fn find_corpus(store: &dyn CorpusStore, display_name: &str) -> GatewayResult<Option<String>> {
    Ok(store
        .list_corpora()
        .await?
        .into_iter()
        .find(|c| c.display_name == display_name)
        .map(|c| c.name))
}

pub async fn list(store: &dyn CorpusStore) -> GatewayResult<Vec<CorpusListing>> {
    let mut out = Vec::new();
    for corpus in store.list_corpora().await? {
        let documents = store.list_documents(&corpus.name).await?;
        out.push(CorpusListing { corpus, documents });
    }
    Ok(out)
}

pub async fn reconcile(
    store: &dyn CorpusStore,
    registry: &VersionRegistry,
    corpora: &CorporaConfig,
) -> GatewayResult<ReconcileReport> {
    let mut remote = Vec::new();
    for (display_name, corpus_type) in corpus_types(corpora) {
        let Some(corpus) = find_corpus(store, display_name).await? else {
            continue;
        };
        for doc in store.list_documents(&corpus).await? {
            remote.push((doc.display_name, corpus_type));
        }
    }
    registry.reconcile(&remote).await
}

/// Empty both corpora and the registry.
///
/// Individual remote deletions that fail are counted and logged; the
/// registry is cleared regardless so the next upload starts fresh.
pub async fn reset(
    store: &dyn CorpusStore,
    registry: &VersionRegistry,
    corpora: &CorporaConfig,
) -> GatewayResult<ResetReport> {
    let mut report = ResetReport::default();
    for (display_name, _) in corpus_types(corpora) {
        let Some(corpus) = find_corpus(store, display_name).await? else {
            continue;
        };
        for doc in store.list_documents(&corpus).await? {
            match store.remove(&doc.name).await {
                Ok(()) => report.remote_removed += 1,
                Err(e) => {
                    warn!(document = %doc.name, error = %e, "remote delete failed");
                    report.remote_failed += 1;
                }
            }
        }
    }
    report.registry_cleared = registry.reset().await?;
    info!(?report, "store reset");
    Ok(report)
}
