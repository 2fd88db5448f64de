//! Version registry: document lineages and the "latest" designation.
//!
//! Every document belongs to a version group (lineage) inside one corpus
//! type. For each non-empty `(version_group, corpus_type)` pair exactly one
//! row carries `is_latest = 1`. All flag changes happen inside a single
//! transaction so readers never see zero or two latest rows for a group.
//!
//! # Ordering
//!
//! A dated document is newer than an undated one, and between two dated
//! documents the larger `YYYYMMDD` wins. On [`VersionRegistry::commit`] the
//! incoming document becomes latest unless the current latest is strictly
//! newer, so uploading an old revision after a new one leaves the new one
//! authoritative. Equal dates favour the incoming upload.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::OverrideScope;
use crate::error::{GatewayError, GatewayResult};
use crate::metadata;
use crate::models::{Category, CorpusType, Document, NewDocument};

const DOCUMENT_COLUMNS: &str = "id, file_name, display_name, version_group, version_date, \
     is_latest, corpus_type, category, size, created_at, modified_at, store_ref, uploaded_by";

/// Documents of one lineage, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentGroup {
    pub version_group: String,
    pub documents: Vec<Document>,
}

impl DocumentGroup {
    pub fn latest(&self) -> impl Iterator<Item = &Document> {
        self.documents.iter().filter(|d| d.is_latest)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub added: usize,
    pub removed: usize,
}

/// True when version date `a` is strictly newer than `b`.
pub fn is_newer(a: &str, b: &str) -> bool {
    match (a.is_empty(), b.is_empty()) {
        (false, true) => true,
        (true, _) => false,
        (false, false) => a > b,
    }
}

#[derive(Clone)]
pub struct VersionRegistry {
    pool: SqlitePool,
    scope: OverrideScope,
}

impl VersionRegistry {
    pub fn new(pool: SqlitePool, scope: OverrideScope) -> Self {
        Self { pool, scope }
    }

    /// Register a freshly ingested document and settle its lineage.
    pub async fn commit(
        &self,
        doc: NewDocument,
        corpus_type: CorpusType,
        explicit_group: Option<&str>,
    ) -> GatewayResult<Document> {
        let version_group = match explicit_group.map(str::trim) {
            Some(g) if !g.is_empty() => g.to_string(),
            _ => doc.metadata.version_group.clone(),
        };
        let version_date = doc.metadata.version_date.clone();
        let id = format!("doc_{}", Uuid::new_v4().simple());

        let mut tx = self.pool.begin().await?;

        let current: Vec<String> = sqlx::query_scalar(
            "SELECT version_date FROM documents \
             WHERE version_group = ? AND corpus_type = ? AND is_latest = 1",
        )
        .bind(&version_group)
        .bind(corpus_type.as_str())
        .fetch_all(&mut *tx)
        .await?;

        let becomes_latest = !current.iter().any(|d| is_newer(d, &version_date));

        if becomes_latest {
            sqlx::query(
                "UPDATE documents SET is_latest = 0 WHERE version_group = ? AND corpus_type = ?",
            )
            .bind(&version_group)
            .bind(corpus_type.as_str())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO documents (id, file_name, display_name, version_group, version_date,
                is_latest, corpus_type, category, size, created_at, modified_at, store_ref,
                uploaded_by, registered_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&doc.file_name)
        .bind(&doc.display_name)
        .bind(&version_group)
        .bind(&version_date)
        .bind(becomes_latest as i64)
        .bind(corpus_type.as_str())
        .bind(doc.category.map(|c| c.as_str()))
        .bind(doc.metadata.size)
        .bind(doc.metadata.created_at)
        .bind(doc.metadata.modified_at)
        .bind(&doc.store_ref)
        .bind(&doc.uploaded_by)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            id = %id,
            group = %version_group,
            date = %version_date,
            corpus = %corpus_type,
            latest = becomes_latest,
            "document registered"
        );

        self.get(&id).await
    }

    /// Force `id` to be the latest of its lineage.
    ///
    /// With [`OverrideScope::Group`] the flag is cleared across both corpus
    /// types of the group, which can leave the other corpus type without a
    /// latest member. [`OverrideScope::Corpus`] confines the change to the
    /// document's own corpus type, matching [`commit`](Self::commit).
    pub async fn set_latest_manually(&self, id: &str) -> GatewayResult<Document> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT version_group, corpus_type FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| GatewayError::not_found("document", id))?;
        let group: String = row.get("version_group");
        let corpus: String = row.get("corpus_type");

        match self.scope {
            OverrideScope::Group => {
                sqlx::query("UPDATE documents SET is_latest = 0 WHERE version_group = ?")
                    .bind(&group)
                    .execute(&mut *tx)
                    .await?;
            }
            OverrideScope::Corpus => {
                sqlx::query(
                    "UPDATE documents SET is_latest = 0 \
                     WHERE version_group = ? AND corpus_type = ?",
                )
                .bind(&group)
                .bind(&corpus)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query("UPDATE documents SET is_latest = 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(id, group = %group, scope = ?self.scope, "latest set manually");

        self.get(id).await
    }

    /// Bring the registry in line with what the corpus store actually holds.
    ///
    /// Pairs present remotely but unknown locally are inserted undated;
    /// local rows with no remote counterpart are deleted. Correction
    /// artifacts are named after their correction id, which is also their
    /// version group, so their stem is used as-is. A lineage that
    /// loses its latest member, or gains its first, gets its newest member
    /// promoted.
    pub async fn reconcile(
        &self,
        remote: &[(String, CorpusType)],
    ) -> GatewayResult<ReconcileReport> {
        let remote: HashSet<(String, CorpusType)> = remote.iter().cloned().collect();
        let mut report = ReconcileReport::default();
        let mut touched: HashSet<(String, CorpusType)> = HashSet::new();

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query("SELECT id, display_name, version_group, corpus_type FROM documents")
            .fetch_all(&mut *tx)
            .await?;

        let mut local: HashSet<(String, CorpusType)> = HashSet::new();
        for row in &rows {
            let display_name: String = row.get("display_name");
            let corpus: CorpusType = row.get::<String, _>("corpus_type").parse()?;
            let key = (display_name, corpus);
            if remote.contains(&key) {
                local.insert(key);
                continue;
            }
            let id: String = row.get("id");
            sqlx::query("DELETE FROM documents WHERE id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            debug!(id = %id, name = %key.0, "removed orphaned registry row");
            touched.insert((row.get("version_group"), corpus));
            report.removed += 1;
        }

        let now = chrono::Utc::now().timestamp();
        for (display_name, corpus) in remote.difference(&local) {
            let stem = Path::new(display_name)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| display_name.clone());
            let group = match corpus {
                CorpusType::Primary => metadata::derive_version_group(&stem),
                CorpusType::Correction => stem,
            };

            sqlx::query(
                r#"
                INSERT INTO documents (id, file_name, display_name, version_group, version_date,
                    is_latest, corpus_type, registered_at)
                VALUES (?, ?, ?, ?, '', 0, ?, ?)
                "#,
            )
            .bind(format!("doc_{}", Uuid::new_v4().simple()))
            .bind(display_name)
            .bind(display_name)
            .bind(&group)
            .bind(corpus.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
            debug!(name = %display_name, corpus = %corpus, "registered remote-only document");
            touched.insert((group, *corpus));
            report.added += 1;
        }

        for (group, corpus) in &touched {
            ensure_latest(&mut tx, group, *corpus).await?;
        }

        tx.commit().await?;

        if report != ReconcileReport::default() {
            info!(added = report.added, removed = report.removed, "registry reconciled");
        }
        Ok(report)
    }

    pub async fn get(&self, id: &str) -> GatewayResult<Document> {
        let sql = format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| GatewayError::not_found("document", id))?;
        row_to_document(&row)
    }

    pub async fn find_by_name(
        &self,
        file_name: &str,
        corpus_type: CorpusType,
    ) -> GatewayResult<Option<Document>> {
        let sql = format!(
            "SELECT {} FROM documents WHERE file_name = ? AND corpus_type = ? LIMIT 1",
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(file_name)
            .bind(corpus_type.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    /// Every member of one lineage, newest first.
    pub async fn group_documents(&self, version_group: &str) -> GatewayResult<Vec<Document>> {
        let sql = format!(
            "SELECT {} FROM documents WHERE version_group = ? \
             ORDER BY corpus_type, version_date DESC, registered_at DESC",
            DOCUMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(version_group)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_document).collect()
    }

    /// All documents bucketed by lineage, optionally filtered by a
    /// case-insensitive substring of the file name or group.
    pub async fn list_groups(&self, search: Option<&str>) -> GatewayResult<Vec<DocumentGroup>> {
        let search = search.map(str::trim).filter(|s| !s.is_empty());
        let sql = format!(
            "SELECT {} FROM documents \
             WHERE ?1 IS NULL \
                OR instr(lower(file_name), lower(?1)) > 0 \
                OR instr(lower(version_group), lower(?1)) > 0 \
             ORDER BY version_group, version_date DESC, registered_at DESC",
            DOCUMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(search)
            .fetch_all(&self.pool)
            .await?;

        let mut groups: BTreeMap<String, Vec<Document>> = BTreeMap::new();
        for row in &rows {
            let doc = row_to_document(row)?;
            groups.entry(doc.version_group.clone()).or_default().push(doc);
        }
        Ok(groups
            .into_iter()
            .map(|(version_group, documents)| DocumentGroup {
                version_group,
                documents,
            })
            .collect())
    }

    /// Delete every registry row. Returns the number removed.
    pub async fn reset(&self) -> GatewayResult<u64> {
        let result = sqlx::query("DELETE FROM documents")
            .execute(&self.pool)
            .await?;
        info!(removed = result.rows_affected(), "registry cleared");
        Ok(result.rows_affected())
    }
}

/// Promote the newest member when a lineage has no latest row.
async fn ensure_latest(
    tx: &mut Transaction<'_, Sqlite>,
    group: &str,
    corpus: CorpusType,
) -> GatewayResult<()> {
    let latest: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM documents \
         WHERE version_group = ? AND corpus_type = ? AND is_latest = 1",
    )
    .bind(group)
    .bind(corpus.as_str())
    .fetch_one(&mut **tx)
    .await?;
    if latest > 0 {
        return Ok(());
    }

    sqlx::query(
        r#"
        UPDATE documents SET is_latest = 1 WHERE id = (
            SELECT id FROM documents
            WHERE version_group = ? AND corpus_type = ?
            ORDER BY version_date DESC, registered_at DESC, rowid DESC
            LIMIT 1
        )
        "#,
    )
    .bind(group)
    .bind(corpus.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn row_to_document(row: &SqliteRow) -> GatewayResult<Document> {
    let corpus_type: String = row.get("corpus_type");
    let category: Option<String> = row.get("category");
    let is_latest: i64 = row.get("is_latest");
    Ok(Document {
        id: row.get("id"),
        file_name: row.get("file_name"),
        display_name: row.get("display_name"),
        version_group: row.get("version_group"),
        version_date: row.get("version_date"),
        is_latest: is_latest != 0,
        corpus_type: corpus_type.parse()?,
        category: category.as_deref().and_then(Category::parse),
        size: row.get("size"),
        created_at: row.get("created_at"),
        modified_at: row.get("modified_at"),
        store_ref: row.get("store_ref"),
        uploaded_by: row.get("uploaded_by"),
    })
}
