//! Correction lifecycle.
//!
//! ```text
//!            approve (artifact ingested)
//!  pending ───────────────────────────────▶ approved ┄┄▶ superseded
//!     │
//!     └───────────────────────────────────▶ rejected
//!            reject (non-blank reason)
//! ```
//!
//! A correction leaves `pending` at most once. Every status update is a
//! conditional `UPDATE ... WHERE status = 'pending'`, so two reviewers racing
//! on the same id cannot both succeed.
//!
//! Approval is all-or-nothing from the caller's point of view: the rendered
//! fact is written to `<correction_docs_dir>/<id>.txt` and pushed into the
//! correction corpus, and only once the corpus store confirms indexing does
//! the row become `approved`. A failed push leaves the row `pending` with
//! the artifact on disk; the artifact is rewritten on the next attempt. If
//! the row left `pending` while the push was in flight, the pushed document
//! is removed from the corpus again before the conflict is reported.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::corpus::CorpusStore;
use crate::error::{GatewayError, GatewayResult};
use crate::feedback::{render_correction_text, FeedbackAnalyzer};
use crate::messages;
use crate::metadata;
use crate::models::{Correction, CorrectionStatus, CorpusType, ExtractedFields, NewDocument};
use crate::registry::VersionRegistry;

const CORRECTION_COLUMNS: &str = "id, session_id, submitted_by, status, original_question, \
     ai_wrong_answer, user_correction, extracted_fact, confidence, correction_text, \
     store_document_ref, reviewed_by, reviewed_at, reject_reason, created_at";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CorrectionStats {
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
    pub superseded: i64,
    pub total: i64,
}

pub struct CorrectionWorkflow {
    pool: SqlitePool,
    store: Arc<dyn CorpusStore>,
    registry: VersionRegistry,
    analyzer: FeedbackAnalyzer,
    docs_dir: PathBuf,
    corpus_display_name: String,
}

impl CorrectionWorkflow {
    pub fn new(
        pool: SqlitePool,
        store: Arc<dyn CorpusStore>,
        registry: VersionRegistry,
        analyzer: FeedbackAnalyzer,
        docs_dir: PathBuf,
        corpus_display_name: String,
    ) -> Self {
        Self {
            pool,
            store,
            registry,
            analyzer,
            docs_dir,
            corpus_display_name,
        }
    }

    /// Record a new correction in `pending`. Returns its id.
    pub async fn submit(
        &self,
        session_id: Option<&str>,
        submitted_by: &str,
        fields: ExtractedFields,
    ) -> GatewayResult<String> {
        if submitted_by.trim().is_empty() {
            return Err(GatewayError::Validation("submitter must not be empty".into()));
        }
        if fields.extracted_fact.trim().is_empty() {
            return Err(GatewayError::Validation("extracted fact must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&fields.confidence) {
            return Err(GatewayError::Validation(format!(
                "confidence {} is outside [0, 1]",
                fields.confidence
            )));
        }

        let id = format!("corr_{}", Uuid::new_v4().simple());
        let correction_text = render_correction_text(&fields);

        sqlx::query(
            r#"
            INSERT INTO corrections (id, session_id, submitted_by, status, original_question,
                ai_wrong_answer, user_correction, extracted_fact, confidence, correction_text,
                created_at)
            VALUES (?, ?, ?, 'pending', ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(session_id)
        .bind(submitted_by)
        .bind(&fields.original_question)
        .bind(&fields.ai_wrong_answer)
        .bind(&fields.user_correction)
        .bind(&fields.extracted_fact)
        .bind(fields.confidence)
        .bind(&correction_text)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        info!(id = %id, submitted_by, "correction submitted");
        Ok(id)
    }

    /// Dispute the assistant answer at `message_index` of a session.
    pub async fn submit_feedback(
        &self,
        session_id: &str,
        message_index: usize,
        feedback: &str,
        submitted_by: &str,
    ) -> GatewayResult<Correction> {
        if feedback.trim().is_empty() {
            return Err(GatewayError::Validation("feedback must not be empty".into()));
        }
        let turns = messages::load(&self.pool, session_id).await?;
        let (question, answer) = messages::disputed_exchange(&turns, message_index)?;

        let fields = self.analyzer.analyze(&question, &answer, feedback).await;
        let id = self.submit(Some(session_id), submitted_by, fields).await?;
        self.get(&id).await
    }

    pub async fn approve(&self, id: &str, reviewer: &str) -> GatewayResult<Correction> {
        let correction = self.get(id).await?;
        ensure_pending(&correction)?;

        let file_name = format!("{}.txt", correction.id);
        let artifact = self.docs_dir.join(&file_name);
        tokio::fs::create_dir_all(&self.docs_dir)
            .await
            .map_err(|e| GatewayError::io(&self.docs_dir, e))?;
        tokio::fs::write(&artifact, &correction.correction_text)
            .await
            .map_err(|e| GatewayError::io(&artifact, e))?;

        let pushed = async {
            let corpus = self.store.ensure_corpus(&self.corpus_display_name).await?;
            self.store.ingest(&corpus, &artifact, &file_name).await
        }
        .await;
        let doc_ref = match pushed {
            Ok(doc_ref) => doc_ref,
            Err(e) => {
                warn!(id, error = %e, "correction ingest failed, leaving pending");
                return Err(e);
            }
        };

        let updated = sqlx::query(
            "UPDATE corrections \
             SET status = 'approved', reviewed_by = ?, reviewed_at = ?, store_document_ref = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(reviewer)
        .bind(chrono::Utc::now().timestamp())
        .bind(&doc_ref)
        .bind(id)
        .execute(&self.pool)
        .await;
        match updated {
            Ok(result) if result.rows_affected() > 0 => {}
            Ok(_) => {
                self.withdraw(id, &doc_ref).await;
                return Err(self.lost_race(id).await);
            }
            Err(e) => {
                self.withdraw(id, &doc_ref).await;
                return Err(e.into());
            }
        }

        // Ids are random hex and may contain digit runs that look like dates.
        let mut resolved = metadata::resolve(&artifact);
        resolved.version_date = chrono::Local::now().format("%Y%m%d").to_string();
        let registered = self
            .registry
            .commit(
                NewDocument {
                    file_name: file_name.clone(),
                    display_name: file_name.clone(),
                    metadata: resolved,
                    category: None,
                    store_ref: Some(doc_ref.clone()),
                    uploaded_by: Some(reviewer.to_string()),
                },
                CorpusType::Correction,
                Some(&correction.id),
            )
            .await;
        if let Err(e) = registered {
            // The corpus already holds the artifact; `sync` will pick it up.
            warn!(id, error = %e, "approved correction not registered");
        }

        info!(id, reviewer, doc_ref = %doc_ref, "correction approved");
        self.get(id).await
    }

    pub async fn reject(&self, id: &str, reviewer: &str, reason: &str) -> GatewayResult<Correction> {
        let correction = self.get(id).await?;
        ensure_pending(&correction)?;
        if reason.trim().is_empty() {
            return Err(GatewayError::Validation(
                "a rejection reason is required".into(),
            ));
        }

        let result = sqlx::query(
            "UPDATE corrections \
             SET status = 'rejected', reviewed_by = ?, reviewed_at = ?, reject_reason = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(reviewer)
        .bind(chrono::Utc::now().timestamp())
        .bind(reason.trim())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(self.lost_race(id).await);
        }

        info!(id, reviewer, "correction rejected");
        self.get(id).await
    }

    pub async fn get(&self, id: &str) -> GatewayResult<Correction> {
        let sql = format!("SELECT {} FROM corrections WHERE id = ?", CORRECTION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| GatewayError::not_found("correction", id))?;
        row_to_correction(&row)
    }

    /// Newest first, optionally filtered by status.
    pub async fn list(&self, status: Option<CorrectionStatus>) -> GatewayResult<Vec<Correction>> {
        let sql = format!(
            "SELECT {} FROM corrections WHERE ?1 IS NULL OR status = ?1 \
             ORDER BY created_at DESC, rowid DESC",
            CORRECTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_correction).collect()
    }

    pub async fn stats(&self) -> GatewayResult<CorrectionStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS cnt FROM corrections GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = CorrectionStats::default();
        for row in &rows {
            let count: i64 = row.get("cnt");
            match row.get::<String, _>("status").parse()? {
                CorrectionStatus::Pending => stats.pending = count,
                CorrectionStatus::Approved => stats.approved = count,
                CorrectionStatus::Rejected => stats.rejected = count,
                CorrectionStatus::Superseded => stats.superseded = count,
            }
            stats.total += count;
        }
        Ok(stats)
    }

    /// Take a pushed artifact back out of the correction corpus. Only a
    /// correction that reached `approved` may stay searchable.
    async fn withdraw(&self, id: &str, doc_ref: &str) {
        match self.store.remove(doc_ref).await {
            Ok(()) => info!(id, doc_ref, "withdrew artifact of unapproved correction"),
            Err(e) => warn!(id, doc_ref, error = %e, "could not withdraw artifact"),
        }
    }

    /// Error for a conditional update that matched nothing.
    async fn lost_race(&self, id: &str) -> GatewayError {
        match self.get(id).await {
            Ok(current) => GatewayError::InvalidState {
                id: id.to_string(),
                status: current.status.to_string(),
            },
            Err(e) => e,
        }
    }
}

fn ensure_pending(correction: &Correction) -> GatewayResult<()> {
    if correction.status != CorrectionStatus::Pending {
        return Err(GatewayError::InvalidState {
            id: correction.id.clone(),
            status: correction.status.to_string(),
        });
    }
    Ok(())
}

fn row_to_correction(row: &SqliteRow) -> GatewayResult<Correction> {
    let status: String = row.get("status");
    Ok(Correction {
        id: row.get("id"),
        session_id: row.get("session_id"),
        submitted_by: row.get("submitted_by"),
        status: status.parse()?,
        original_question: row.get("original_question"),
        ai_wrong_answer: row.get("ai_wrong_answer"),
        user_correction: row.get("user_correction"),
        extracted_fact: row.get("extracted_fact"),
        confidence: row.get("confidence"),
        correction_text: row.get("correction_text"),
        store_document_ref: row.get("store_document_ref"),
        reviewed_by: row.get("reviewed_by"),
        reviewed_at: row.get("reviewed_at"),
        reject_reason: row.get("reject_reason"),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverrideScope;
    use crate::corpus::{CorpusRef, DirectoryCorpusStore, RemoteDocument};
    use crate::generation::DisabledGeneration;
    use crate::{db, migrate};
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::TempDir;

    /// Corpus store whose ingest always fails with the given error kind.
    struct FailingStore {
        timeout: bool,
    }

    #[async_trait]
    impl CorpusStore for FailingStore {
        async fn ensure_corpus(&self, display_name: &str) -> GatewayResult<String> {
            Ok(display_name.to_string())
        }
        async fn list_corpora(&self) -> GatewayResult<Vec<CorpusRef>> {
            Ok(Vec::new())
        }
        async fn ingest(&self, _: &str, _: &Path, name: &str) -> GatewayResult<String> {
            if self.timeout {
                Err(GatewayError::Timeout(format!("indexing {}", name)))
            } else {
                Err(GatewayError::ExternalService("503 from store".into()))
            }
        }
        async fn list_documents(&self, _: &str) -> GatewayResult<Vec<RemoteDocument>> {
            Ok(Vec::new())
        }
        async fn remove(&self, _: &str) -> GatewayResult<()> {
            Ok(())
        }
        async fn delete_corpus(&self, _: &str, _: bool) -> GatewayResult<()> {
            Ok(())
        }
    }

    /// Directory store that lets another reviewer reject the correction
    /// while its artifact is being indexed.
    struct RejectDuringIngest {
        inner: DirectoryCorpusStore,
        pool: SqlitePool,
    }

    #[async_trait]
    impl CorpusStore for RejectDuringIngest {
        async fn ensure_corpus(&self, display_name: &str) -> GatewayResult<String> {
            self.inner.ensure_corpus(display_name).await
        }
        async fn list_corpora(&self) -> GatewayResult<Vec<CorpusRef>> {
            self.inner.list_corpora().await
        }
        async fn ingest(&self, corpus: &str, path: &Path, name: &str) -> GatewayResult<String> {
            let doc_ref = self.inner.ingest(corpus, path, name).await?;
            sqlx::query(
                "UPDATE corrections SET status = 'rejected', reviewed_by = 'other-admin', \
                 reject_reason = 'duplicate' WHERE status = 'pending'",
            )
            .execute(&self.pool)
            .await?;
            Ok(doc_ref)
        }
        async fn list_documents(&self, corpus: &str) -> GatewayResult<Vec<RemoteDocument>> {
            self.inner.list_documents(corpus).await
        }
        async fn remove(&self, document: &str) -> GatewayResult<()> {
            self.inner.remove(document).await
        }
        async fn delete_corpus(&self, corpus: &str, cascade: bool) -> GatewayResult<()> {
            self.inner.delete_corpus(corpus, cascade).await
        }
    }

    struct Fixture {
        tmp: TempDir,
        pool: SqlitePool,
        registry: VersionRegistry,
    }

    impl Fixture {
        async fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let pool = db::connect_path(&tmp.path().join("kb.sqlite")).await.unwrap();
            migrate::run_migrations(&pool).await.unwrap();
            let registry = VersionRegistry::new(pool.clone(), OverrideScope::Group);
            Self {
                tmp,
                pool,
                registry,
            }
        }

        fn workflow(&self, store: Arc<dyn CorpusStore>) -> CorrectionWorkflow {
            CorrectionWorkflow::new(
                self.pool.clone(),
                store,
                self.registry.clone(),
                FeedbackAnalyzer::new(Arc::new(DisabledGeneration)),
                self.tmp.path().join("correction_docs"),
                "regulations-corrections".to_string(),
            )
        }

        fn directory_workflow(&self) -> CorrectionWorkflow {
            self.workflow(Arc::new(DirectoryCorpusStore::new(
                self.tmp.path().join("corpora"),
            )))
        }
    }

    fn fields() -> ExtractedFields {
        ExtractedFields {
            original_question: "연차휴가는 며칠인가요?".into(),
            ai_wrong_answer: "15일입니다.".into(),
            user_correction: "2026년 개정으로 16일입니다.".into(),
            extracted_fact: "연차휴가는 16일이다.".into(),
            confidence: 0.9,
        }
    }

    #[tokio::test]
    async fn test_submit_starts_pending() {
        let fx = Fixture::new().await;
        let wf = fx.directory_workflow();
        let id = wf.submit(Some("sess-1"), "user-7", fields()).await.unwrap();
        assert!(id.starts_with("corr_"));

        let c = wf.get(&id).await.unwrap();
        assert_eq!(c.status, CorrectionStatus::Pending);
        assert!(c.correction_text.contains("정답: 연차휴가는 16일이다."));
        assert_eq!(c.reviewed_by, None);
    }

    #[tokio::test]
    async fn test_submit_rejects_malformed_input() {
        let fx = Fixture::new().await;
        let wf = fx.directory_workflow();
        let mut bad = fields();
        bad.confidence = 1.5;
        assert_eq!(
            wf.submit(None, "u", bad).await.unwrap_err().code(),
            "validation_error"
        );
        assert_eq!(
            wf.submit(None, " ", fields()).await.unwrap_err().code(),
            "validation_error"
        );
    }

    #[tokio::test]
    async fn test_approve_ingests_and_registers() {
        let fx = Fixture::new().await;
        let wf = fx.directory_workflow();
        let id = wf.submit(None, "user-7", fields()).await.unwrap();

        let approved = wf.approve(&id, "admin").await.unwrap();
        assert_eq!(approved.status, CorrectionStatus::Approved);
        assert_eq!(approved.reviewed_by.as_deref(), Some("admin"));
        assert!(approved.reviewed_at.is_some());

        let expected_ref = format!("regulations-corrections/{}.txt", id);
        assert_eq!(approved.store_document_ref.as_deref(), Some(expected_ref.as_str()));
        assert!(fx
            .tmp
            .path()
            .join("corpora/regulations-corrections")
            .join(format!("{}.txt", id))
            .exists());

        let doc = fx
            .registry
            .find_by_name(&format!("{}.txt", id), CorpusType::Correction)
            .await
            .unwrap()
            .unwrap();
        assert!(doc.is_latest);
    }

    #[tokio::test]
    async fn test_approve_unknown_is_not_found() {
        let fx = Fixture::new().await;
        let wf = fx.directory_workflow();
        assert_eq!(
            wf.approve("corr_missing", "admin").await.unwrap_err().code(),
            "not_found"
        );
    }

    #[tokio::test]
    async fn test_approve_rejected_is_invalid_state_and_unchanged() {
        let fx = Fixture::new().await;
        let wf = fx.directory_workflow();
        let id = wf.submit(None, "user-7", fields()).await.unwrap();
        let rejected = wf.reject(&id, "admin", "근거 없음").await.unwrap();

        let err = wf.approve(&id, "other-admin").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidState { ref status, .. } if status == "rejected"));

        let after = wf.get(&id).await.unwrap();
        assert_eq!(after.status, CorrectionStatus::Rejected);
        assert_eq!(after.reviewed_by, rejected.reviewed_by);
        assert_eq!(after.reviewed_at, rejected.reviewed_at);
        assert_eq!(after.reject_reason.as_deref(), Some("근거 없음"));
        assert_eq!(after.store_document_ref, None);
    }

    #[tokio::test]
    async fn test_reject_requires_reason() {
        let fx = Fixture::new().await;
        let wf = fx.directory_workflow();
        let id = wf.submit(None, "user-7", fields()).await.unwrap();

        let err = wf.reject(&id, "admin", "   ").await.unwrap_err();
        assert_eq!(err.code(), "validation_error");
        assert_eq!(wf.get(&id).await.unwrap().status, CorrectionStatus::Pending);
    }

    #[tokio::test]
    async fn test_transition_happens_once() {
        let fx = Fixture::new().await;
        let wf = fx.directory_workflow();
        let id = wf.submit(None, "user-7", fields()).await.unwrap();
        wf.approve(&id, "admin").await.unwrap();

        assert_eq!(wf.approve(&id, "admin").await.unwrap_err().code(), "invalid_state");
        assert_eq!(
            wf.reject(&id, "admin", "late").await.unwrap_err().code(),
            "invalid_state"
        );
    }

    #[tokio::test]
    async fn test_failed_ingest_stays_pending() {
        let fx = Fixture::new().await;
        for timeout in [false, true] {
            let wf = fx.workflow(Arc::new(FailingStore { timeout }));
            let id = wf.submit(None, "user-7", fields()).await.unwrap();

            let err = wf.approve(&id, "admin").await.unwrap_err();
            let expected = if timeout { "timeout" } else { "external_service_failure" };
            assert_eq!(err.code(), expected);

            let c = wf.get(&id).await.unwrap();
            assert_eq!(c.status, CorrectionStatus::Pending);
            assert_eq!(c.reviewed_by, None);
            // artifact is left behind for the retry
            assert!(fx
                .tmp
                .path()
                .join("correction_docs")
                .join(format!("{}.txt", id))
                .exists());
        }
    }

    #[tokio::test]
    async fn test_concurrent_reject_withdraws_pushed_artifact() {
        let fx = Fixture::new().await;
        let corpora = fx.tmp.path().join("corpora");
        let wf = fx.workflow(Arc::new(RejectDuringIngest {
            inner: DirectoryCorpusStore::new(corpora.clone()),
            pool: fx.pool.clone(),
        }));
        let id = wf.submit(None, "user-7", fields()).await.unwrap();

        let err = wf.approve(&id, "admin").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidState { ref status, .. } if status == "rejected"));

        let c = wf.get(&id).await.unwrap();
        assert_eq!(c.status, CorrectionStatus::Rejected);
        assert_eq!(c.reviewed_by.as_deref(), Some("other-admin"));
        assert_eq!(c.store_document_ref, None);

        // nothing searchable and nothing registered
        assert!(!corpora
            .join("regulations-corrections")
            .join(format!("{}.txt", id))
            .exists());
        assert!(fx
            .registry
            .find_by_name(&format!("{}.txt", id), CorpusType::Correction)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_feedback_from_transcript() {
        let fx = Fixture::new().await;
        let wf = fx.directory_workflow();
        messages::append_exchange(&fx.pool, "sess-9", "병가는 며칠인가요?", "30일입니다.")
            .await
            .unwrap();

        let c = wf
            .submit_feedback("sess-9", 1, "60일로 개정되었습니다.", "user-3")
            .await
            .unwrap();
        // disabled generation falls back to the raw exchange
        assert_eq!(c.original_question, "병가는 며칠인가요?");
        assert_eq!(c.ai_wrong_answer, "30일입니다.");
        assert_eq!(c.extracted_fact, "60일로 개정되었습니다.");
        assert_eq!(c.session_id.as_deref(), Some("sess-9"));

        let err = wf
            .submit_feedback("sess-9", 5, "wrong", "user-3")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[tokio::test]
    async fn test_list_and_stats() {
        let fx = Fixture::new().await;
        let wf = fx.directory_workflow();
        let a = wf.submit(None, "u", fields()).await.unwrap();
        let b = wf.submit(None, "u", fields()).await.unwrap();
        wf.submit(None, "u", fields()).await.unwrap();
        wf.approve(&a, "admin").await.unwrap();
        wf.reject(&b, "admin", "duplicate").await.unwrap();

        let stats = wf.stats().await.unwrap();
        assert_eq!(
            stats,
            CorrectionStats {
                pending: 1,
                approved: 1,
                rejected: 1,
                superseded: 0,
                total: 3,
            }
        );
        assert_eq!(wf.list(None).await.unwrap().len(), 3);
        let pending = wf.list(Some(CorrectionStatus::Pending)).await.unwrap();
        assert_eq!(pending.len(), 1);
    }
}
