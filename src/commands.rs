//! CLI command implementations.
//!
//! Each `run_*` function prints a plain-text summary to stdout. Typed
//! failures from the registry and workflow are wrapped with context and
//! returned, so the process exits non-zero with a specific message.

use std::path::Path;

use anyhow::{Context, Result};

use crate::app::App;
use crate::ingest::{IngestOutcome, IngestTarget};
use crate::models::{Correction, CorrectionStatus, CorpusType, Document};
use crate::sync;

pub async fn run_init(app: &App) -> Result<()> {
    for name in [
        &app.config.corpora.primary_display_name,
        &app.config.corpora.correction_display_name,
    ] {
        let corpus = app
            .store
            .ensure_corpus(name)
            .await
            .with_context(|| format!("Failed to prepare corpus {}", name))?;
        println!("corpus {} ready ({})", name, corpus);
    }
    println!("Database initialized successfully.");
    Ok(())
}

pub async fn run_upload(
    app: &App,
    path: &Path,
    corpus: CorpusType,
    group: Option<String>,
    user: Option<String>,
) -> Result<()> {
    let target = IngestTarget {
        corpus_type: corpus,
        explicit_group: group,
        uploaded_by: user,
    };
    let reports = app
        .ingestor
        .ingest_path(path, &target)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    println!("upload {} ({})", path.display(), corpus);
    for report in &reports {
        match &report.outcome {
            IngestOutcome::Ingested {
                document_id,
                version_group,
                version_date,
                category,
                is_latest,
            } => {
                println!(
                    "  ingested  {}  group={} date={} category={}{}  [{}]",
                    report.file,
                    version_group,
                    if version_date.is_empty() { "-" } else { version_date.as_str() },
                    category.map(|c| c.as_str()).unwrap_or("-"),
                    if *is_latest { " latest" } else { "" },
                    document_id
                );
            }
            IngestOutcome::ConflictIgnored { existing_id } => {
                println!("  skipped   {}  already registered as {}", report.file, existing_id);
            }
            IngestOutcome::Failed { code, error } => {
                println!("  failed    {}  {}: {}", report.file, code, error);
            }
        }
    }
    let ingested = reports.iter().filter(|r| r.is_ingested()).count();
    println!("{}/{} files ingested", ingested, reports.len());
    Ok(())
}

fn print_document(doc: &Document) {
    println!(
        "  {} {}  {}  {}  {}  {}",
        if doc.is_latest { "*" } else { " " },
        doc.id,
        doc.file_name,
        if doc.version_date.is_empty() { "-" } else { doc.version_date.as_str() },
        doc.corpus_type,
        doc.category.map(|c| c.as_str()).unwrap_or("-"),
    );
}

pub async fn run_documents(app: &App, search: Option<&str>) -> Result<()> {
    let groups = app.registry.list_groups(search).await?;
    if groups.is_empty() {
        println!("No documents registered.");
        return Ok(());
    }
    for group in &groups {
        println!("{}", group.version_group);
        for doc in &group.documents {
            print_document(doc);
        }
    }
    let total: usize = groups.iter().map(|g| g.documents.len()).sum();
    println!("{} documents in {} groups", total, groups.len());
    Ok(())
}

pub async fn run_group(app: &App, group: &str) -> Result<()> {
    let docs = app.registry.group_documents(group).await?;
    if docs.is_empty() {
        anyhow::bail!("version group not found: {}", group);
    }
    println!("{}", group);
    for doc in &docs {
        print_document(doc);
    }
    Ok(())
}

pub async fn run_set_latest(app: &App, id: &str) -> Result<()> {
    let doc = app
        .registry
        .set_latest_manually(id)
        .await
        .with_context(|| format!("Failed to set latest for {}", id))?;
    println!(
        "{} is now latest for {} ({})",
        doc.file_name, doc.version_group, doc.corpus_type
    );
    Ok(())
}

pub async fn run_sync(app: &App, list: bool, reset: bool) -> Result<()> {
    let corpora = &app.config.corpora;
    if list {
        for listing in sync::list(app.store.as_ref()).await? {
            println!(
                "{} ({}): {} documents",
                listing.corpus.display_name,
                listing.corpus.name,
                listing.documents.len()
            );
            for doc in &listing.documents {
                println!("  {}", doc.display_name);
            }
        }
        return Ok(());
    }

    if reset {
        let report = sync::reset(app.store.as_ref(), &app.registry, corpora).await?;
        println!("reset");
        println!("  remote documents removed: {}", report.remote_removed);
        if report.remote_failed > 0 {
            println!("  remote deletions failed: {}", report.remote_failed);
        }
        println!("  registry rows cleared: {}", report.registry_cleared);
        return Ok(());
    }

    let report = sync::reconcile(app.store.as_ref(), &app.registry, corpora).await?;
    println!("sync");
    println!("  added: {}", report.added);
    println!("  removed: {}", report.removed);
    println!("ok");
    Ok(())
}

fn print_correction(c: &Correction) {
    println!("{}  [{}]  by {}", c.id, c.status, c.submitted_by);
    println!("  question: {}", c.original_question);
    println!("  fact:     {}", c.extracted_fact);
    println!("  confidence: {:.2}", c.confidence);
    if let Some(ref reviewer) = c.reviewed_by {
        println!("  reviewed by: {}", reviewer);
    }
    if let Some(ref reason) = c.reject_reason {
        println!("  reason: {}", reason);
    }
}

pub async fn run_corrections_list(app: &App, status: Option<CorrectionStatus>) -> Result<()> {
    let corrections = app.corrections.list(status).await?;
    if corrections.is_empty() {
        println!("No corrections.");
        return Ok(());
    }
    for c in &corrections {
        print_correction(c);
    }
    Ok(())
}

pub async fn run_corrections_stats(app: &App) -> Result<()> {
    let stats = app.corrections.stats().await?;
    println!("pending:    {}", stats.pending);
    println!("approved:   {}", stats.approved);
    println!("rejected:   {}", stats.rejected);
    println!("superseded: {}", stats.superseded);
    println!("total:      {}", stats.total);
    Ok(())
}

pub async fn run_approve(app: &App, id: &str, reviewer: &str) -> Result<()> {
    let c = app
        .corrections
        .approve(id, reviewer)
        .await
        .with_context(|| format!("Failed to approve {}", id))?;
    println!("approved {}", c.id);
    if let Some(ref doc_ref) = c.store_document_ref {
        println!("  ingested as {}", doc_ref);
    }
    Ok(())
}

pub async fn run_reject(app: &App, id: &str, reviewer: &str, reason: &str) -> Result<()> {
    let c = app
        .corrections
        .reject(id, reviewer, reason)
        .await
        .with_context(|| format!("Failed to reject {}", id))?;
    println!("rejected {}", c.id);
    Ok(())
}

pub async fn run_feedback(
    app: &App,
    session: &str,
    message_index: usize,
    text: &str,
    user: &str,
) -> Result<()> {
    let c = app
        .corrections
        .submit_feedback(session, message_index, text, user)
        .await
        .context("Failed to submit feedback")?;
    println!("submitted {}", c.id);
    print_correction(&c);
    Ok(())
}

pub async fn run_ask(
    app: &App,
    question: &str,
    session: Option<&str>,
    include_corrections: bool,
) -> Result<()> {
    let answer = app
        .gateway
        .ask(question, session, include_corrections)
        .await
        .context("Failed to answer")?;
    println!("{}", answer.text);
    if !answer.citations.is_empty() {
        println!();
        println!("Sources:");
        for c in &answer.citations {
            println!("  - {}", if c.title.is_empty() { &c.uri } else { &c.title });
        }
    }
    Ok(())
}
