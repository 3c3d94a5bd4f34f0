//! Keyword campaigns: search, extract, fetch and persist for one keyword.

mod pacing;
mod runner;

pub use pacing::{
    BatchSettings, BatchThrottle, DelayRange, Pacing, RunnerSettings, Sleeper, TokioSleeper,
};
pub use runner::CampaignRunner;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::TaskKind;

/// Counts written to the task's result summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub ingested: u32,
    pub failed: u32,
    pub total_candidates: u32,
}

/// What one campaign invocation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignOutcome {
    /// `None` when the campaign was skipped before a task was opened.
    pub task_id: Option<i64>,
    pub keyword_id: i64,
    pub summary: CampaignSummary,
    pub challenged_pages: u32,
    pub skipped: bool,
}

/// One campaign for one keyword. The scheduler drives campaigns through this.
#[async_trait]
pub trait KeywordCampaign: Send + Sync {
    /// Run a campaign to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the campaign aborted. The task, when one was
    /// opened, has already been marked failed with the error text.
    async fn run_keyword(
        &self,
        keyword: &str,
        max_articles: usize,
        kind: TaskKind,
    ) -> Result<CampaignOutcome>;
}
