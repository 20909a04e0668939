use anyhow::Result;
use sqlx::SqlitePool;

/// Create the retrieval index tables. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per ingested commit
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS commits (
            owner TEXT NOT NULL,
            repo TEXT NOT NULL,
            commit_sha TEXT NOT NULL,
            ingested_at TEXT NOT NULL,
            PRIMARY KEY (owner, repo, commit_sha)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chunk locations; ids hash only the path, so the latest parse wins
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            owner TEXT NOT NULL,
            repo TEXT NOT NULL,
            id TEXT NOT NULL,
            commit_sha TEXT NOT NULL,
            file_path TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            lang TEXT NOT NULL,
            hash TEXT NOT NULL,
            PRIMARY KEY (owner, repo, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vectors, one per (chunk, provider)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            owner TEXT NOT NULL,
            repo TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            provider TEXT NOT NULL,
            dim INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (owner, repo, chunk_id, provider)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embeddings_scope ON embeddings(owner, repo, provider)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
