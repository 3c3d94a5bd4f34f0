use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    if current_version < 2 {
        debug!("Running migration v2");
        run_migration_v2(pool).await?;
        set_schema_version(pool, 2).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM _schema_version")
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: creating initial schema");

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS keywords (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            text TEXT UNIQUE NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create keywords table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS articles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            canonical_url TEXT UNIQUE NOT NULL,
            title TEXT NOT NULL,
            author TEXT,
            body_text TEXT NOT NULL,
            word_count INTEGER NOT NULL DEFAULT 0,
            publication_number INTEGER UNIQUE NOT NULL,
            source_keyword_id INTEGER REFERENCES keywords(id),
            ingested_at TEXT NOT NULL DEFAULT (datetime('now')),
            render_status TEXT NOT NULL DEFAULT 'pending'
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create articles table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            keyword_id INTEGER NOT NULL REFERENCES keywords(id),
            kind TEXT NOT NULL DEFAULT 'manual',
            state TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            started_at TEXT,
            completed_at TEXT,
            result_summary TEXT,
            error TEXT
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create tasks table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS publication_counter (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_number INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create publication_counter table")?;

    sqlx::query("INSERT OR IGNORE INTO publication_counter (id, last_number) VALUES (1, 0)")
        .execute(pool)
        .await
        .context("Failed to seed publication counter")?;

    Ok(())
}

async fn run_migration_v2(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v2: status view indexes");

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at)")
        .execute(pool)
        .await
        .context("Failed to create tasks created_at index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_state ON tasks(state)")
        .execute(pool)
        .await
        .context("Failed to create tasks state index")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_articles_keyword ON articles(source_keyword_id, ingested_at)",
    )
    .execute(pool)
    .await
    .context("Failed to create articles keyword index")?;

    Ok(())
}
