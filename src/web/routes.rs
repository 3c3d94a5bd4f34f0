use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::AppState;
use crate::db::{
    get_article_by_publication_number, list_articles, list_keywords, recent_tasks,
    set_keyword_status, stats, KeywordStatus, RenderTarget, TaskState,
};
use crate::scheduler::StartOutcome;

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;

/// Create the router with all routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/keywords", get(api_keywords).post(api_add_keyword))
        .route("/api/keywords/:id/status", post(api_keyword_status))
        .route("/api/articles", get(api_articles))
        .route("/api/articles/:number", get(api_article))
        .route("/api/articles/:number/related", get(api_related))
        .route("/api/tasks", get(api_tasks))
        .route("/api/campaigns", post(api_run_campaign))
        .route("/api/scheduler/start", post(api_scheduler_start))
        .route("/api/scheduler/stop", post(api_scheduler_stop))
        .route("/api/scheduler/settings", post(api_scheduler_settings))
        .route("/api/scheduler/status", get(api_scheduler_status))
        .route("/api/stats", get(api_stats))
}

/// Envelope for command responses.
#[derive(Debug, Serialize)]
pub struct ApiMessage {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
}

impl ApiMessage {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            id: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            id: None,
        }
    }

    fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    fn respond(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

fn database_error(e: &anyhow::Error) -> Response {
    error!("Database error: {e:#}");
    ApiMessage::error("Database error").respond(StatusCode::INTERNAL_SERVER_ERROR)
}

fn list_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

async fn health() -> &'static str {
    "OK"
}

// ========== Keywords ==========

#[derive(Debug, Deserialize)]
pub struct KeywordListParams {
    status: Option<KeywordStatus>,
}

async fn api_keywords(
    State(state): State<AppState>,
    Query(params): Query<KeywordListParams>,
) -> Response {
    match list_keywords(state.harvester.db().pool(), params.status).await {
        Ok(keywords) => Json(keywords).into_response(),
        Err(e) => database_error(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct AddKeywordRequest {
    text: String,
}

async fn api_add_keyword(
    State(state): State<AppState>,
    Json(request): Json<AddKeywordRequest>,
) -> Response {
    if request.text.trim().is_empty() {
        return ApiMessage::error("Keyword cannot be empty").respond(StatusCode::BAD_REQUEST);
    }

    match state.harvester.add_keyword(&request.text).await {
        Ok(id) => ApiMessage::ok("Keyword added")
            .with_id(id)
            .respond(StatusCode::OK),
        Err(e) => database_error(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct KeywordStatusRequest {
    status: KeywordStatus,
}

async fn api_keyword_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<KeywordStatusRequest>,
) -> Response {
    match set_keyword_status(state.harvester.db().pool(), id, request.status).await {
        Ok(true) => ApiMessage::ok(format!("Keyword {}", request.status.as_str()))
            .with_id(id)
            .respond(StatusCode::OK),
        Ok(false) => ApiMessage::error("Keyword not found").respond(StatusCode::NOT_FOUND),
        Err(e) => database_error(&e),
    }
}

// ========== Articles ==========

#[derive(Debug, Deserialize)]
pub struct ArticleListParams {
    keyword_id: Option<i64>,
    limit: Option<i64>,
}

async fn api_articles(
    State(state): State<AppState>,
    Query(params): Query<ArticleListParams>,
) -> Response {
    let pool = state.harvester.db().pool();
    match list_articles(pool, params.keyword_id, list_limit(params.limit)).await {
        Ok(articles) => Json(articles).into_response(),
        Err(e) => database_error(&e),
    }
}

async fn api_article(State(state): State<AppState>, Path(number): Path<i64>) -> Response {
    match get_article_by_publication_number(state.harvester.db().pool(), number).await {
        Ok(Some(article)) => Json(article).into_response(),
        Ok(None) => ApiMessage::error("Article not found").respond(StatusCode::NOT_FOUND),
        Err(e) => database_error(&e),
    }
}

async fn api_related(State(state): State<AppState>, Path(number): Path<i64>) -> Response {
    let article =
        match get_article_by_publication_number(state.harvester.db().pool(), number).await {
            Ok(Some(article)) => article,
            Ok(None) => {
                return ApiMessage::error("Article not found").respond(StatusCode::NOT_FOUND)
            }
            Err(e) => return database_error(&e),
        };

    let target = RenderTarget {
        publication_number: Some(article.publication_number),
        canonical_url: Some(article.canonical_url),
        title: article.title,
    };

    match state.harvester.related_reading(&target).await {
        Ok(related) => Json(related).into_response(),
        Err(e) => database_error(&e),
    }
}

// ========== Tasks & Campaigns ==========

#[derive(Debug, Deserialize)]
pub struct TaskListParams {
    state: Option<TaskState>,
    limit: Option<i64>,
}

async fn api_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskListParams>,
) -> Response {
    let pool = state.harvester.db().pool();
    match recent_tasks(pool, params.state, list_limit(params.limit)).await {
        Ok(tasks) => Json(tasks).into_response(),
        Err(e) => database_error(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct RunCampaignRequest {
    keyword: String,
    max_articles: Option<usize>,
}

/// Start a manual campaign in the background; progress shows up in tasks.
async fn api_run_campaign(
    State(state): State<AppState>,
    Json(request): Json<RunCampaignRequest>,
) -> Response {
    let keyword = request.keyword.trim().to_string();
    if keyword.is_empty() {
        return ApiMessage::error("Keyword cannot be empty").respond(StatusCode::BAD_REQUEST);
    }
    let max_articles = request
        .max_articles
        .unwrap_or(state.config.max_articles_per_keyword);
    if max_articles == 0 {
        return ApiMessage::error("max_articles must be at least 1")
            .respond(StatusCode::BAD_REQUEST);
    }

    let harvester = state.harvester.clone();
    let background_keyword = keyword.clone();
    tokio::spawn(async move {
        if let Err(e) = harvester
            .run_keyword(&background_keyword, max_articles)
            .await
        {
            error!(keyword = %background_keyword, "Manual campaign failed: {e:#}");
        }
    });

    info!(keyword = %keyword, max_articles, "Manual campaign queued");
    ApiMessage::ok(format!("Campaign for \"{keyword}\" started")).respond(StatusCode::ACCEPTED)
}

// ========== Scheduler ==========

#[derive(Debug, Deserialize)]
pub struct SchedulerStartRequest {
    #[serde(default)]
    keywords: Vec<String>,
    interval_hours: Option<u64>,
    max_per_keyword: Option<usize>,
}

async fn api_scheduler_start(
    State(state): State<AppState>,
    Json(request): Json<SchedulerStartRequest>,
) -> Response {
    let config = &state.config;
    let keywords = if request.keywords.is_empty() {
        config.schedule_keywords.clone()
    } else {
        request.keywords
    };
    let interval_hours = request
        .interval_hours
        .unwrap_or(config.schedule_interval.as_secs() / 3600);
    let max_per_keyword = request
        .max_per_keyword
        .unwrap_or(config.max_articles_per_keyword);

    match state
        .harvester
        .start(keywords, interval_hours, max_per_keyword)
    {
        Ok(StartOutcome::Started) => {
            ApiMessage::ok("Scheduler started").respond(StatusCode::OK)
        }
        Ok(StartOutcome::AlreadyRunning) => {
            ApiMessage::error("Scheduler is already running").respond(StatusCode::CONFLICT)
        }
        Ok(StartOutcome::StillStopping) => {
            ApiMessage::error("Scheduler is still stopping").respond(StatusCode::CONFLICT)
        }
        Err(e) => ApiMessage::error(format!("{e:#}")).respond(StatusCode::BAD_REQUEST),
    }
}

async fn api_scheduler_stop(State(state): State<AppState>) -> Response {
    if state.harvester.stop() {
        ApiMessage::ok("Scheduler stopping").respond(StatusCode::OK)
    } else {
        ApiMessage::error("Scheduler is not running").respond(StatusCode::OK)
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchSettingsRequest {
    batch_size: u32,
    rest_minutes: u64,
}

async fn api_scheduler_settings(
    State(state): State<AppState>,
    Json(request): Json<BatchSettingsRequest>,
) -> Response {
    match state
        .harvester
        .set_batch_settings(request.batch_size, request.rest_minutes)
    {
        Ok(_) => ApiMessage::ok("Batch settings updated").respond(StatusCode::OK),
        Err(e) => ApiMessage::error(format!("{e:#}")).respond(StatusCode::BAD_REQUEST),
    }
}

async fn api_scheduler_status(State(state): State<AppState>) -> Response {
    match state.harvester.status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => database_error(&e),
    }
}

async fn api_stats(State(state): State<AppState>) -> Response {
    match stats(state.harvester.db().pool()).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => database_error(&e),
    }
}
