//! Integration tests for the continuous scheduler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use article_harvester::campaign::{
    CampaignOutcome, CampaignSummary, DelayRange, KeywordCampaign, TokioSleeper,
};
use article_harvester::db::TaskKind;
use article_harvester::scheduler::{SchedulePlan, Scheduler, SchedulerSettings, StartOutcome};
use async_trait::async_trait;
use tokio::sync::Semaphore;

/// Campaign that records keywords and optionally waits on a gate per call.
struct FakeCampaign {
    calls: Mutex<Vec<String>>,
    gate: Option<Arc<Semaphore>>,
    panic_on_call: Option<usize>,
    fail_keyword: Option<String>,
    counter: AtomicUsize,
}

impl FakeCampaign {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            gate: None,
            panic_on_call: None,
            fail_keyword: None,
            counter: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl KeywordCampaign for FakeCampaign {
    async fn run_keyword(
        &self,
        keyword: &str,
        _max_articles: usize,
        kind: TaskKind,
    ) -> Result<CampaignOutcome> {
        assert_eq!(kind, TaskKind::Scheduled);
        let call = self.counter.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(keyword.to_string());

        if self.panic_on_call == Some(call) {
            panic!("campaign blew up");
        }
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.fail_keyword.as_deref() == Some(keyword) {
            anyhow::bail!("portal unreachable");
        }

        Ok(CampaignOutcome {
            task_id: Some(call as i64 + 1),
            keyword_id: 1,
            summary: CampaignSummary {
                ingested: 1,
                failed: 0,
                total_candidates: 1,
            },
            challenged_pages: 0,
            skipped: false,
        })
    }
}

fn scheduler(campaign: Arc<FakeCampaign>) -> Scheduler {
    Scheduler::new(
        campaign,
        Arc::new(TokioSleeper),
        SchedulerSettings {
            keyword_delay: DelayRange::ZERO,
            round_error_cooldown: Duration::from_millis(10),
        },
    )
}

fn plan(keywords: &[&str]) -> SchedulePlan {
    SchedulePlan {
        keywords: keywords.iter().map(ToString::to_string).collect(),
        interval: Duration::from_secs(3600),
        max_per_keyword: 5,
    }
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Condition not reached in time");
}

#[tokio::test]
async fn test_round_runs_keywords_in_order_then_waits() {
    let campaign = Arc::new(FakeCampaign {
        fail_keyword: Some("b".to_string()),
        ..FakeCampaign::new()
    });
    let scheduler = scheduler(campaign.clone());

    assert_eq!(scheduler.start(plan(&["a", "b", "c"])), StartOutcome::Started);

    wait_until(|| scheduler.status().rounds_completed == 1).await;
    assert_eq!(campaign.calls(), vec!["a", "b", "c"]);

    let report = scheduler.status().last_round.unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.ingested, 2);
    assert!(!report.interrupted);

    // Still sleeping out the interval
    assert!(scheduler.is_running());

    scheduler.stop_and_wait().await;
    assert!(!scheduler.status().activity_alive);
    assert_eq!(campaign.calls().len(), 3);
}

#[tokio::test]
async fn test_start_is_single_flight() {
    let campaign = Arc::new(FakeCampaign::new());
    let scheduler = scheduler(campaign);

    assert_eq!(scheduler.start(plan(&["a"])), StartOutcome::Started);
    assert_eq!(scheduler.start(plan(&["b"])), StartOutcome::AlreadyRunning);

    let status = scheduler.status();
    assert!(status.running);
    assert_eq!(status.plan.unwrap().keywords, vec!["a"]);

    scheduler.stop_and_wait().await;
    assert!(!scheduler.stop(), "second stop reports not running");
}

#[tokio::test]
async fn test_stop_mid_round_finishes_current_keyword_then_exits() {
    let gate = Arc::new(Semaphore::new(0));
    let campaign = Arc::new(FakeCampaign {
        gate: Some(gate.clone()),
        ..FakeCampaign::new()
    });
    let scheduler = scheduler(campaign.clone());

    scheduler.start(plan(&["first", "second", "third"]));
    wait_until(|| campaign.calls().len() == 1).await;

    assert!(scheduler.stop());
    // The flag clears before the activity exits
    assert!(!scheduler.is_running());
    assert!(scheduler.status().activity_alive);

    // Let the in-flight campaign finish
    gate.add_permits(10);
    wait_until(|| !scheduler.status().activity_alive).await;

    assert_eq!(campaign.calls(), vec!["first"]);
    let report = scheduler.status().last_round.unwrap();
    assert_eq!(report.succeeded, 1);
    assert!(report.interrupted);
}

#[tokio::test]
async fn test_start_refused_while_previous_activity_drains() {
    let gate = Arc::new(Semaphore::new(0));
    let campaign = Arc::new(FakeCampaign {
        gate: Some(gate.clone()),
        ..FakeCampaign::new()
    });
    let scheduler = scheduler(campaign.clone());

    scheduler.start(plan(&["old"]));
    wait_until(|| campaign.calls().len() == 1).await;
    assert!(scheduler.stop());

    assert_eq!(scheduler.start(plan(&["new"])), StartOutcome::StillStopping);
    assert!(!scheduler.is_running());
    assert!(scheduler.status().activity_alive);

    gate.add_permits(10);
    wait_until(|| !scheduler.status().activity_alive).await;
    assert_eq!(campaign.calls(), vec!["old"]);

    assert_eq!(scheduler.start(plan(&["new"])), StartOutcome::Started);
    wait_until(|| campaign.calls().len() == 2).await;
    let status = scheduler.status();
    assert!(status.running);
    assert!(status.activity_alive);
    assert_eq!(campaign.calls(), vec!["old", "new"]);

    scheduler.stop_and_wait().await;
    assert!(!scheduler.status().activity_alive);
}

#[tokio::test]
async fn test_crashed_round_does_not_kill_activity() {
    let campaign = Arc::new(FakeCampaign {
        panic_on_call: Some(0),
        ..FakeCampaign::new()
    });
    let scheduler = scheduler(campaign.clone());

    scheduler.start(plan(&["k"]));

    // The crashed round is followed by a cooldown and a fresh round
    wait_until(|| scheduler.status().rounds_completed == 1).await;
    assert_eq!(campaign.calls(), vec!["k", "k"]);
    assert!(scheduler.is_running());
    assert!(scheduler.status().activity_alive);

    scheduler.stop_and_wait().await;
    assert!(!scheduler.status().activity_alive);
}

#[tokio::test]
async fn test_restart_after_stop() {
    let campaign = Arc::new(FakeCampaign::new());
    let scheduler = scheduler(campaign.clone());

    scheduler.start(plan(&["a"]));
    wait_until(|| scheduler.status().rounds_completed == 1).await;
    scheduler.stop_and_wait().await;

    assert_eq!(scheduler.start(plan(&["b"])), StartOutcome::Started);
    wait_until(|| campaign.calls().len() == 2).await;
    assert_eq!(campaign.calls(), vec!["a", "b"]);

    scheduler.stop_and_wait().await;
}
