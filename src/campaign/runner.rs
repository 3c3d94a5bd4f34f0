use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::pacing::{BatchThrottle, RunnerSettings, Sleeper, TokioSleeper};
use super::{CampaignOutcome, CampaignSummary, KeywordCampaign};
use crate::db::{
    add_article, add_keyword, get_keyword, ingested_urls, record_task, update_task_state,
    Database, NewArticle, TaskKind, TaskTransition,
};
use crate::fetcher::ArticleFetcher;
use crate::http::FetchError;
use crate::search::{extract_links, Extraction, LinkRules, SearchPortal};

/// Candidates gathered from the search pages of one campaign.
#[derive(Debug, Default)]
struct Discovery {
    candidates: Vec<String>,
    challenged_pages: u32,
}

/// Runs keyword campaigns one candidate at a time.
pub struct CampaignRunner {
    db: Database,
    portal: Arc<dyn SearchPortal>,
    fetcher: Arc<dyn ArticleFetcher>,
    rules: LinkRules,
    settings: RunnerSettings,
    throttle: Arc<BatchThrottle>,
    sleeper: Arc<dyn Sleeper>,
}

impl CampaignRunner {
    #[must_use]
    pub fn new(
        db: Database,
        portal: Arc<dyn SearchPortal>,
        fetcher: Arc<dyn ArticleFetcher>,
        rules: LinkRules,
        settings: RunnerSettings,
        throttle: Arc<BatchThrottle>,
    ) -> Self {
        Self {
            db,
            portal,
            fetcher,
            rules,
            settings,
            throttle,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the sleeper used for every pacing delay.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// The batch throttle shared by every campaign of this runner.
    #[must_use]
    pub fn throttle(&self) -> &Arc<BatchThrottle> {
        &self.throttle
    }

    /// Run one campaign for `keyword`, ingesting at most `max_articles`.
    ///
    /// Scheduled runs of a paused keyword are skipped without opening a task.
    ///
    /// # Errors
    ///
    /// Returns an error if the keyword or task cannot be recorded, or if the
    /// campaign aborts. An aborted campaign leaves its task `failed`.
    pub async fn run(
        &self,
        keyword: &str,
        max_articles: usize,
        kind: TaskKind,
    ) -> Result<CampaignOutcome> {
        let pool = self.db.pool();
        let keyword = keyword.trim();
        let keyword_id = add_keyword(pool, keyword).await?;

        if kind == TaskKind::Scheduled {
            let record = get_keyword(pool, keyword_id).await?;
            if record.is_some_and(|k| k.is_paused()) {
                info!(keyword, "Keyword is paused, skipping campaign");
                return Ok(CampaignOutcome {
                    task_id: None,
                    keyword_id,
                    summary: CampaignSummary::default(),
                    challenged_pages: 0,
                    skipped: true,
                });
            }
        }

        let task_id = record_task(pool, keyword_id, kind).await?;
        update_task_state(pool, task_id, &TaskTransition::Start).await?;
        info!(keyword, task_id, kind = kind.as_str(), max_articles, "Campaign started");

        let result = match self.execute(keyword, keyword_id, max_articles).await {
            Ok((summary, challenged_pages)) => self
                .complete_task(task_id, &summary)
                .await
                .map(|()| (summary, challenged_pages)),
            Err(e) => Err(e),
        };

        match result {
            Ok((summary, challenged_pages)) => {
                info!(
                    keyword,
                    task_id,
                    ingested = summary.ingested,
                    failed = summary.failed,
                    total_candidates = summary.total_candidates,
                    challenged_pages,
                    "Campaign finished"
                );
                Ok(CampaignOutcome {
                    task_id: Some(task_id),
                    keyword_id,
                    summary,
                    challenged_pages,
                    skipped: false,
                })
            }
            Err(e) => {
                error!(keyword, task_id, "Campaign failed: {e:#}");
                let transition = TaskTransition::Fail {
                    error: format!("{e:#}"),
                };
                if let Err(update_err) = update_task_state(pool, task_id, &transition).await {
                    error!(task_id, "Failed to mark task failed: {update_err:#}");
                }
                Err(e)
            }
        }
    }

    async fn complete_task(&self, task_id: i64, summary: &CampaignSummary) -> Result<()> {
        let result_summary =
            serde_json::to_string(summary).context("Failed to encode result summary")?;
        update_task_state(
            self.db.pool(),
            task_id,
            &TaskTransition::Complete { result_summary },
        )
        .await
    }

    async fn execute(
        &self,
        keyword: &str,
        keyword_id: i64,
        max_articles: usize,
    ) -> Result<(CampaignSummary, u32)> {
        let seen = ingested_urls(self.db.pool())
            .await
            .context("Failed to load already-ingested URLs")?;

        let mut discovery = self.discover(keyword, max_articles, &seen).await;
        discovery.candidates.truncate(max_articles);
        debug!(
            keyword,
            candidates = discovery.candidates.len(),
            "Search complete"
        );

        let summary = self.ingest(&discovery.candidates, keyword_id).await;
        Ok((summary, discovery.challenged_pages))
    }

    /// Walk the search pages, collecting unseen candidates in discovery order.
    ///
    /// Stops paging once enough candidates are queued. A failed or challenged
    /// page contributes nothing and is not retried.
    async fn discover(
        &self,
        keyword: &str,
        max_articles: usize,
        seen: &HashSet<String>,
    ) -> Discovery {
        let mut discovery = Discovery::default();
        let mut queued: HashSet<String> = HashSet::new();

        for page in 1..=self.settings.search_pages {
            if discovery.candidates.len() >= max_articles {
                break;
            }

            self.sleeper
                .sleep(self.settings.pacing.search_delay.sample())
                .await;

            let result = match self.portal.search_page(keyword, page).await {
                Ok(result) => result,
                Err(FetchError::Challenge { url }) => {
                    self.on_challenge(keyword, page, &url, &mut discovery).await;
                    continue;
                }
                Err(e) => {
                    warn!(keyword, page, error = %e, "Search page failed, skipping");
                    continue;
                }
            };

            let extraction = extract_links(&result.body, &result.url, &self.rules, |url| {
                seen.contains(url) || queued.contains(url)
            });

            match extraction {
                Extraction::Challenge => {
                    self.on_challenge(keyword, page, result.url.as_str(), &mut discovery)
                        .await;
                }
                Extraction::Candidates(found) => {
                    debug!(keyword, page, found = found.len(), "Extracted candidates");
                    for url in found {
                        if queued.insert(url.clone()) {
                            discovery.candidates.push(url);
                        }
                    }
                }
            }
        }

        discovery
    }

    async fn on_challenge(&self, keyword: &str, page: u32, url: &str, discovery: &mut Discovery) {
        discovery.challenged_pages += 1;
        let cooldown = self.settings.pacing.challenge_cooldown;
        warn!(
            keyword,
            page,
            url,
            cooldown_secs = cooldown.as_secs(),
            "Challenge page served, cooling down"
        );
        self.sleeper.sleep(cooldown).await;
    }

    /// Fetch and persist each candidate in order. Item failures are counted,
    /// never propagated.
    async fn ingest(&self, candidates: &[String], keyword_id: i64) -> CampaignSummary {
        let mut summary = CampaignSummary {
            total_candidates: u32::try_from(candidates.len()).unwrap_or(u32::MAX),
            ..CampaignSummary::default()
        };

        for (index, url) in candidates.iter().enumerate() {
            if index > 0 {
                self.sleeper
                    .sleep(self.settings.pacing.item_delay.sample())
                    .await;
            }

            let article = match self.fetcher.fetch(url).await {
                Ok(article) => article,
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        url = %url,
                        error = %e,
                        transient = e.is_transient(),
                        parse_failure = e.is_parse_failure(),
                        "Failed to fetch article"
                    );
                    continue;
                }
            };

            let new_article = NewArticle {
                canonical_url: url.clone(),
                title: article.title,
                author: article.author,
                body_text: article.body_text,
                word_count: article.word_count,
            };

            match add_article(self.db.pool(), &new_article, Some(keyword_id)).await {
                Ok(upsert) => {
                    summary.ingested += 1;
                    debug!(
                        url = %url,
                        publication_number = upsert.publication_number,
                        inserted = upsert.inserted,
                        "Article stored"
                    );
                    self.rest_if_batch_full().await;
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(url = %url, "Failed to store article: {e:#}");
                }
            }
        }

        summary
    }

    async fn rest_if_batch_full(&self) {
        if let Some(rest) = self.throttle.record_success() {
            info!(
                batch_size = self.throttle.settings().batch_size,
                rest_secs = rest.as_secs(),
                "Batch complete, resting"
            );
            self.sleeper.sleep(rest).await;
            self.throttle.reset();
        }
    }
}

#[async_trait]
impl KeywordCampaign for CampaignRunner {
    async fn run_keyword(
        &self,
        keyword: &str,
        max_articles: usize,
        kind: TaskKind,
    ) -> Result<CampaignOutcome> {
        self.run(keyword, max_articles, kind).await
    }
}
