use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Keyword status. Keywords are never deleted, only paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordStatus {
    Active,
    Paused,
}

impl KeywordStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }
}

/// A search keyword driving campaigns.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Keyword {
    pub id: i64,
    pub text: String,
    pub status: String,
    pub created_at: String,
}

impl Keyword {
    #[must_use]
    pub fn is_paused(&self) -> bool {
        KeywordStatus::from_str(&self.status) == Some(KeywordStatus::Paused)
    }
}

/// Whether the rendering collaborator has produced a page for an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderStatus {
    Pending,
    Rendered,
    Failed,
}

impl RenderStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Rendered => "rendered",
            Self::Failed => "failed",
        }
    }
}

/// An ingested article, unique by canonical URL.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub canonical_url: String,
    pub title: String,
    pub author: Option<String>,
    pub body_text: String,
    pub word_count: i64,
    pub publication_number: i64,
    pub source_keyword_id: Option<i64>,
    pub ingested_at: String,
    pub render_status: String,
}

/// Fields for ingesting an article.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub canonical_url: String,
    pub title: String,
    pub author: Option<String>,
    pub body_text: String,
    pub word_count: i64,
}

/// Result of an article upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArticleUpsert {
    pub id: i64,
    pub publication_number: i64,
    /// False when an existing row was overwritten.
    pub inserted: bool,
}

/// Lightweight article row for related-reading lists.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RelatedArticle {
    pub id: i64,
    pub canonical_url: String,
    pub title: String,
    pub author: Option<String>,
    pub publication_number: i64,
    pub ingested_at: String,
}

/// The page being rendered, used to exclude it from its own recommendations.
#[derive(Debug, Clone, Default)]
pub struct RenderTarget {
    pub publication_number: Option<i64>,
    pub canonical_url: Option<String>,
    pub title: String,
}

/// What started a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Manual,
    Scheduled,
}

impl TaskKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
        }
    }
}

/// Task state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A requested task state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskTransition {
    /// pending → running
    Start,
    /// pending | running → completed, with a JSON result summary
    Complete { result_summary: String },
    /// pending | running → failed, with the error text
    Fail { error: String },
}

impl TaskTransition {
    #[must_use]
    pub fn target(&self) -> TaskState {
        match self {
            Self::Start => TaskState::Running,
            Self::Complete { .. } => TaskState::Completed,
            Self::Fail { .. } => TaskState::Failed,
        }
    }
}

/// One campaign run for one keyword.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: i64,
    pub keyword_id: i64,
    pub kind: String,
    pub state: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub result_summary: Option<String>,
    pub error: Option<String>,
    /// Keyword text, joined in for status views.
    pub keyword: Option<String>,
}

impl Task {
    #[must_use]
    pub fn state(&self) -> Option<TaskState> {
        TaskState::from_str(&self.state)
    }
}

/// Aggregate counts for status views.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub active_keywords: i64,
    pub articles: i64,
    pub articles_today: i64,
    pub tasks_by_state: BTreeMap<String, i64>,
}
