use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;

use super::models::{
    Article, ArticleUpsert, Keyword, KeywordStatus, NewArticle, RelatedArticle, RenderStatus,
    RenderTarget, StoreStats, Task, TaskKind, TaskState, TaskTransition,
};

// ========== Keywords ==========

/// Add a keyword if absent, returning its ID either way.
pub async fn add_keyword(pool: &SqlitePool, text: &str) -> Result<i64> {
    let text = text.trim();
    if text.is_empty() {
        bail!("Keyword cannot be empty");
    }

    sqlx::query("INSERT INTO keywords (text) VALUES (?) ON CONFLICT(text) DO NOTHING")
        .bind(text)
        .execute(pool)
        .await
        .context("Failed to insert keyword")?;

    let (id,): (i64,) = sqlx::query_as("SELECT id FROM keywords WHERE text = ?")
        .bind(text)
        .fetch_one(pool)
        .await
        .context("Failed to fetch keyword id")?;

    Ok(id)
}

/// Get a keyword by ID.
pub async fn get_keyword(pool: &SqlitePool, id: i64) -> Result<Option<Keyword>> {
    sqlx::query_as("SELECT * FROM keywords WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch keyword")
}

/// Get a keyword by its text.
pub async fn get_keyword_by_text(pool: &SqlitePool, text: &str) -> Result<Option<Keyword>> {
    sqlx::query_as("SELECT * FROM keywords WHERE text = ?")
        .bind(text.trim())
        .fetch_optional(pool)
        .await
        .context("Failed to fetch keyword by text")
}

/// List keywords, newest first, optionally filtered by status.
pub async fn list_keywords(
    pool: &SqlitePool,
    status: Option<KeywordStatus>,
) -> Result<Vec<Keyword>> {
    let status = status.map(|s| s.as_str());
    sqlx::query_as(
        r"
        SELECT * FROM keywords
        WHERE (?1 IS NULL OR status = ?1)
        ORDER BY created_at DESC, id DESC
        ",
    )
    .bind(status)
    .fetch_all(pool)
    .await
    .context("Failed to list keywords")
}

/// Pause or reactivate a keyword. Returns false if it does not exist.
pub async fn set_keyword_status(pool: &SqlitePool, id: i64, status: KeywordStatus) -> Result<bool> {
    let result = sqlx::query("UPDATE keywords SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update keyword status")?;

    Ok(result.rows_affected() > 0)
}

// ========== Publication Counter ==========

/// Issue the next publication number.
///
/// The increment and read happen in one statement, so concurrent callers
/// are serialized by SQLite's writer lock and never share a number.
pub async fn next_publication_number(pool: &SqlitePool) -> Result<i64> {
    let (number,): (i64,) = sqlx::query_as(
        r"
        UPDATE publication_counter
        SET last_number = last_number + 1, updated_at = datetime('now')
        WHERE id = 1
        RETURNING last_number
        ",
    )
    .fetch_one(pool)
    .await
    .context("Failed to allocate publication number")?;

    Ok(number)
}

/// Last publication number issued, 0 if none.
pub async fn last_publication_number(pool: &SqlitePool) -> Result<i64> {
    let (number,): (i64,) =
        sqlx::query_as("SELECT last_number FROM publication_counter WHERE id = 1")
            .fetch_one(pool)
            .await
            .context("Failed to read publication counter")?;

    Ok(number)
}

// ========== Articles ==========

/// Insert or overwrite an article keyed by canonical URL.
///
/// A known URL keeps its publication number; only new URLs draw one from the
/// counter. If two callers race on the same new URL, the loser's number is
/// left unused rather than reassigned.
pub async fn add_article(
    pool: &SqlitePool,
    article: &NewArticle,
    keyword_id: Option<i64>,
) -> Result<ArticleUpsert> {
    let existing: Option<(i64, i64)> = sqlx::query_as(
        r"
        UPDATE articles
        SET title = ?, author = ?, body_text = ?, word_count = ?,
            source_keyword_id = COALESCE(?, source_keyword_id),
            render_status = 'pending'
        WHERE canonical_url = ?
        RETURNING id, publication_number
        ",
    )
    .bind(&article.title)
    .bind(&article.author)
    .bind(&article.body_text)
    .bind(article.word_count)
    .bind(keyword_id)
    .bind(&article.canonical_url)
    .fetch_optional(pool)
    .await
    .context("Failed to update existing article")?;

    if let Some((id, publication_number)) = existing {
        return Ok(ArticleUpsert {
            id,
            publication_number,
            inserted: false,
        });
    }

    let number = next_publication_number(pool).await?;

    let (id, publication_number): (i64, i64) = sqlx::query_as(
        r"
        INSERT INTO articles
            (canonical_url, title, author, body_text, word_count, publication_number, source_keyword_id)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(canonical_url) DO UPDATE SET
            title = excluded.title,
            author = excluded.author,
            body_text = excluded.body_text,
            word_count = excluded.word_count,
            source_keyword_id = COALESCE(excluded.source_keyword_id, articles.source_keyword_id),
            render_status = 'pending'
        RETURNING id, publication_number
        ",
    )
    .bind(&article.canonical_url)
    .bind(&article.title)
    .bind(&article.author)
    .bind(&article.body_text)
    .bind(article.word_count)
    .bind(number)
    .bind(keyword_id)
    .fetch_one(pool)
    .await
    .context("Failed to insert article")?;

    Ok(ArticleUpsert {
        id,
        publication_number,
        inserted: publication_number == number,
    })
}

/// Get an article by canonical URL.
pub async fn get_article_by_url(pool: &SqlitePool, canonical_url: &str) -> Result<Option<Article>> {
    sqlx::query_as("SELECT * FROM articles WHERE canonical_url = ?")
        .bind(canonical_url)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch article by url")
}

/// Get an article by publication number.
pub async fn get_article_by_publication_number(
    pool: &SqlitePool,
    number: i64,
) -> Result<Option<Article>> {
    sqlx::query_as("SELECT * FROM articles WHERE publication_number = ?")
        .bind(number)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch article by publication number")
}

/// Check whether a canonical URL has been ingested.
pub async fn article_exists(pool: &SqlitePool, canonical_url: &str) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM articles WHERE canonical_url = ?")
        .bind(canonical_url)
        .fetch_optional(pool)
        .await
        .context("Failed to check article existence")?;

    Ok(row.is_some())
}

/// Snapshot of every ingested canonical URL.
pub async fn ingested_urls(pool: &SqlitePool) -> Result<HashSet<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT canonical_url FROM articles")
        .fetch_all(pool)
        .await
        .context("Failed to load ingested urls")?;

    Ok(rows.into_iter().map(|(url,)| url).collect())
}

/// List articles newest first, optionally for a single keyword.
pub async fn list_articles(
    pool: &SqlitePool,
    keyword_id: Option<i64>,
    limit: i64,
) -> Result<Vec<Article>> {
    sqlx::query_as(
        r"
        SELECT * FROM articles
        WHERE (?1 IS NULL OR source_keyword_id = ?1)
        ORDER BY ingested_at DESC, id DESC
        LIMIT ?2
        ",
    )
    .bind(keyword_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to list articles")
}

/// Record the rendering collaborator's outcome for an article.
pub async fn set_render_status(pool: &SqlitePool, id: i64, status: RenderStatus) -> Result<()> {
    sqlx::query("UPDATE articles SET render_status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update render status")?;

    Ok(())
}

/// Random articles, excluding one canonical URL.
pub async fn random_sample(
    pool: &SqlitePool,
    limit: i64,
    excluding_url: Option<&str>,
) -> Result<Vec<RelatedArticle>> {
    sqlx::query_as(
        r"
        SELECT id, canonical_url, title, author, publication_number, ingested_at
        FROM articles
        WHERE (?1 IS NULL OR canonical_url != ?1)
        ORDER BY RANDOM()
        LIMIT ?2
        ",
    )
    .bind(excluding_url)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to sample articles")
}

/// Related-reading sample for the page being rendered.
///
/// The page is excluded by publication number, else by canonical URL, and
/// only by title when neither identity is known.
pub async fn related_reading(
    pool: &SqlitePool,
    target: &RenderTarget,
    limit: i64,
) -> Result<Vec<RelatedArticle>> {
    if let Some(number) = target.publication_number {
        return sqlx::query_as(
            r"
            SELECT id, canonical_url, title, author, publication_number, ingested_at
            FROM articles
            WHERE publication_number != ?
            ORDER BY RANDOM()
            LIMIT ?
            ",
        )
        .bind(number)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("Failed to sample related articles");
    }

    if let Some(url) = target.canonical_url.as_deref() {
        return random_sample(pool, limit, Some(url)).await;
    }

    sqlx::query_as(
        r"
        SELECT id, canonical_url, title, author, publication_number, ingested_at
        FROM articles
        WHERE title != ?
        ORDER BY RANDOM()
        LIMIT ?
        ",
    )
    .bind(&target.title)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to sample related articles")
}

// ========== Tasks ==========

const TASK_SELECT: &str = r"
    SELECT t.*, k.text AS keyword
    FROM tasks t
    LEFT JOIN keywords k ON t.keyword_id = k.id
";

/// Open a task in the pending state.
pub async fn record_task(pool: &SqlitePool, keyword_id: i64, kind: TaskKind) -> Result<i64> {
    let result = sqlx::query("INSERT INTO tasks (keyword_id, kind, state) VALUES (?, ?, 'pending')")
        .bind(keyword_id)
        .bind(kind.as_str())
        .execute(pool)
        .await
        .context("Failed to insert task")?;

    Ok(result.last_insert_rowid())
}

/// Move a task forward.
///
/// Each transition is a single guarded UPDATE, so a task can never leave a
/// terminal state or go back to pending.
pub async fn update_task_state(
    pool: &SqlitePool,
    id: i64,
    transition: &TaskTransition,
) -> Result<()> {
    let result = match transition {
        TaskTransition::Start => sqlx::query(
            r"
            UPDATE tasks SET state = 'running', started_at = datetime('now')
            WHERE id = ? AND state = 'pending'
            ",
        )
        .bind(id)
        .execute(pool)
        .await,
        TaskTransition::Complete { result_summary } => sqlx::query(
            r"
            UPDATE tasks
            SET state = 'completed', completed_at = datetime('now'), result_summary = ?
            WHERE id = ? AND state IN ('pending', 'running')
            ",
        )
        .bind(result_summary)
        .bind(id)
        .execute(pool)
        .await,
        TaskTransition::Fail { error } => sqlx::query(
            r"
            UPDATE tasks
            SET state = 'failed', completed_at = datetime('now'), error = ?
            WHERE id = ? AND state IN ('pending', 'running')
            ",
        )
        .bind(error)
        .bind(id)
        .execute(pool)
        .await,
    }
    .context("Failed to update task state")?;

    if result.rows_affected() == 0 {
        let target = transition.target().as_str();
        match get_task(pool, id).await? {
            Some(task) if task.state().is_some_and(|s| s.is_terminal()) => {
                bail!("Task {id} is already {}, cannot move to {target}", task.state)
            }
            Some(task) => bail!("Task {id} cannot move from {} to {target}", task.state),
            None => bail!("Task {id} does not exist"),
        }
    }

    Ok(())
}

/// Get a task by ID.
pub async fn get_task(pool: &SqlitePool, id: i64) -> Result<Option<Task>> {
    sqlx::query_as(&format!("{TASK_SELECT} WHERE t.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch task")
}

/// Most recent tasks, optionally filtered by state.
pub async fn recent_tasks(
    pool: &SqlitePool,
    state: Option<TaskState>,
    limit: i64,
) -> Result<Vec<Task>> {
    sqlx::query_as(&format!(
        "{TASK_SELECT} WHERE (?1 IS NULL OR t.state = ?1) ORDER BY t.created_at DESC, t.id DESC LIMIT ?2"
    ))
    .bind(state.map(|s| s.as_str()))
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to list tasks")
}

// ========== Stats ==========

/// Aggregate counts across keywords, articles and tasks.
pub async fn stats(pool: &SqlitePool) -> Result<StoreStats> {
    let (active_keywords,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM keywords WHERE status = 'active'")
            .fetch_one(pool)
            .await
            .context("Failed to count keywords")?;

    let (articles,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles")
        .fetch_one(pool)
        .await
        .context("Failed to count articles")?;

    let (articles_today,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM articles WHERE date(ingested_at) = date('now')",
    )
    .fetch_one(pool)
    .await
    .context("Failed to count today's articles")?;

    let task_rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT state, COUNT(*) FROM tasks GROUP BY state")
            .fetch_all(pool)
            .await
            .context("Failed to count tasks")?;

    Ok(StoreStats {
        active_keywords,
        articles,
        articles_today,
        tasks_by_state: task_rows.into_iter().collect(),
    })
}
