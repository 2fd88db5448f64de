use anyhow::Result;
use sqlx::SqlitePool;

/// Create every table and index. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            display_name TEXT NOT NULL,
            version_group TEXT NOT NULL,
            version_date TEXT NOT NULL DEFAULT '',
            is_latest INTEGER NOT NULL DEFAULT 0,
            corpus_type TEXT NOT NULL DEFAULT 'primary'
                CHECK(corpus_type IN ('primary', 'correction')),
            category TEXT,
            size INTEGER,
            created_at INTEGER,
            modified_at INTEGER,
            store_ref TEXT,
            uploaded_by TEXT,
            registered_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS corrections (
            id TEXT PRIMARY KEY,
            session_id TEXT,
            submitted_by TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK(status IN ('pending', 'approved', 'rejected', 'superseded')),
            original_question TEXT NOT NULL DEFAULT '',
            ai_wrong_answer TEXT NOT NULL DEFAULT '',
            user_correction TEXT NOT NULL DEFAULT '',
            extracted_fact TEXT NOT NULL DEFAULT '',
            confidence REAL NOT NULL DEFAULT 0.5,
            correction_text TEXT NOT NULL DEFAULT '',
            store_document_ref TEXT,
            reviewed_by TEXT,
            reviewed_at INTEGER,
            reject_reason TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chat transcript rows; only read here, to give corrections their context.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            role TEXT NOT NULL CHECK(role IN ('user', 'assistant')),
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_lineage ON documents(version_group, corpus_type)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_name ON documents(file_name, corpus_type)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_corrections_status ON corrections(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, id)")
        .execute(pool)
        .await?;

    Ok(())
}
