//! The harvester facade used by the admin API and the binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::info;

use crate::campaign::{BatchSettings, CampaignOutcome, CampaignRunner, KeywordCampaign, Sleeper};
use crate::config::Config;
use crate::db::{self, Database, RelatedArticle, RenderTarget, StoreStats, Task, TaskKind};
use crate::scheduler::{SchedulePlan, Scheduler, SchedulerSettings, SchedulerStatus, StartOutcome};

/// Tasks included in a status snapshot.
const STATUS_TASK_LIMIT: i64 = 20;

#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    #[serde(flatten)]
    pub settings: BatchSettings,
    /// Successful ingestions in the current batch.
    pub progress: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvesterStatus {
    pub scheduler: SchedulerStatus,
    pub batch: BatchStatus,
    pub stats: StoreStats,
    pub recent_tasks: Vec<Task>,
}

pub struct Harvester {
    db: Database,
    runner: Arc<CampaignRunner>,
    scheduler: Scheduler,
    related_reading_count: usize,
}

impl Harvester {
    #[must_use]
    pub fn new(
        db: Database,
        runner: Arc<CampaignRunner>,
        scheduler: Scheduler,
        related_reading_count: usize,
    ) -> Self {
        Self {
            db,
            runner,
            scheduler,
            related_reading_count,
        }
    }

    /// Wire a scheduler to `runner` using the configured keyword pacing.
    #[must_use]
    pub fn with_runner(
        config: &Config,
        db: Database,
        runner: Arc<CampaignRunner>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let campaign: Arc<dyn KeywordCampaign> = Arc::clone(&runner) as Arc<dyn KeywordCampaign>;
        let scheduler = Scheduler::new(
            campaign,
            sleeper,
            SchedulerSettings {
                keyword_delay: config.keyword_delay,
                round_error_cooldown: config.round_error_cooldown,
            },
        );
        Self::new(db, runner, scheduler, config.related_reading_count)
    }

    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Register a keyword, returning its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the keyword is empty or cannot be stored.
    pub async fn add_keyword(&self, text: &str) -> Result<i64> {
        let id = db::add_keyword(self.db.pool(), text).await?;
        info!(keyword = text.trim(), id, "Keyword registered");
        Ok(id)
    }

    /// Scheduler state, batch settings, store counts and recent tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn status(&self) -> Result<HarvesterStatus> {
        let throttle = self.runner.throttle();
        Ok(HarvesterStatus {
            scheduler: self.scheduler.status(),
            batch: BatchStatus {
                settings: throttle.settings(),
                progress: throttle.progress(),
            },
            stats: db::stats(self.db.pool()).await?,
            recent_tasks: db::recent_tasks(self.db.pool(), None, STATUS_TASK_LIMIT).await?,
        })
    }

    /// Start continuous scheduling over `keywords`.
    ///
    /// # Errors
    ///
    /// Returns an error if no usable keyword is given, the interval is zero
    /// or too large, or the cap is zero.
    pub fn start(
        &self,
        keywords: Vec<String>,
        interval_hours: u64,
        max_per_keyword: usize,
    ) -> Result<StartOutcome> {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            bail!("At least one keyword is required");
        }
        if interval_hours == 0 {
            bail!("Interval must be at least one hour");
        }
        let Some(interval_secs) = interval_hours.checked_mul(3600) else {
            bail!("Interval of {interval_hours} hours is too large");
        };
        if max_per_keyword == 0 {
            bail!("Per-keyword cap must be at least 1");
        }

        Ok(self.scheduler.start(SchedulePlan {
            keywords,
            interval: Duration::from_secs(interval_secs),
            max_per_keyword,
        }))
    }

    /// Stop continuous scheduling. Returns false if it was not running.
    pub fn stop(&self) -> bool {
        self.scheduler.stop()
    }

    /// Change the batch size and rest period for all campaigns.
    ///
    /// # Errors
    ///
    /// Returns an error if `batch_size` is zero or the rest period is too
    /// large.
    pub fn set_batch_settings(&self, batch_size: u32, rest_minutes: u64) -> Result<BatchSettings> {
        if batch_size == 0 {
            bail!("Batch size must be at least 1");
        }
        let Some(settings) = BatchSettings::checked(batch_size, rest_minutes) else {
            bail!("Rest period of {rest_minutes} minutes is too large");
        };
        self.runner.throttle().set_settings(settings);
        info!(batch_size, rest_minutes, "Batch settings updated");
        Ok(settings)
    }

    /// Run a one-off manual campaign. Paused keywords are still run.
    ///
    /// # Errors
    ///
    /// Returns an error if the campaign aborted.
    pub async fn run_keyword(&self, keyword: &str, max_articles: usize) -> Result<CampaignOutcome> {
        if max_articles == 0 {
            bail!("max_articles must be at least 1");
        }
        self.runner.run(keyword, max_articles, TaskKind::Manual).await
    }

    /// Related-reading sample for a page, excluding the page itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn related_reading(&self, target: &RenderTarget) -> Result<Vec<RelatedArticle>> {
        let limit = i64::try_from(self.related_reading_count).unwrap_or(i64::MAX);
        db::related_reading(self.db.pool(), target, limit).await
    }

    /// Stop the scheduler and wait for its activity to exit.
    pub async fn shutdown(&self) {
        self.scheduler.stop_and_wait().await;
    }
}
