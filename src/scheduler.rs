//! Continuous scheduling of keyword campaigns.
//!
//! One background activity runs rounds over a keyword list. Each round runs
//! the campaigns sequentially, then the activity sleeps for the interval. The
//! activity checks its cancellation token between keywords and between rounds,
//! so a stop lets the in-flight campaign finish before the activity exits.
//! A new activity cannot start until the previous one has exited.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::campaign::{DelayRange, KeywordCampaign, Sleeper};
use crate::db::TaskKind;

/// What a scheduler run works through each round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulePlan {
    pub keywords: Vec<String>,
    #[serde(rename = "interval_secs", serialize_with = "serialize_secs")]
    pub interval: Duration,
    pub max_per_keyword: usize,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    /// Delay between consecutive keywords within a round.
    pub keyword_delay: DelayRange,
    /// Sleep after a round crashes, before the next one starts.
    pub round_error_cooldown: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// A stopped activity is still finishing its in-flight campaign.
    StillStopping,
}

/// Per-round aggregate of campaign outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoundReport {
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
    pub ingested: u32,
    /// True when the round was cut short by a stop.
    pub interrupted: bool,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub plan: Option<SchedulePlan>,
    pub started_at: Option<DateTime<Utc>>,
    /// Whether a background activity is still alive, possibly draining
    /// after a stop.
    pub activity_alive: bool,
    pub rounds_completed: u64,
    pub last_round: Option<RoundReport>,
}

enum ServiceState {
    Idle,
    Running {
        plan: SchedulePlan,
        token: CancellationToken,
        started_at: DateTime<Utc>,
    },
}

/// State shared with the background activity.
struct Shared {
    campaign: Arc<dyn KeywordCampaign>,
    sleeper: Arc<dyn Sleeper>,
    settings: SchedulerSettings,
    rounds_completed: AtomicU64,
    last_round: Mutex<Option<RoundReport>>,
}

/// Single-flight scheduler for continuous keyword campaigns.
pub struct Scheduler {
    shared: Arc<Shared>,
    state: Mutex<ServiceState>,
    activity: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        campaign: Arc<dyn KeywordCampaign>,
        sleeper: Arc<dyn Sleeper>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                campaign,
                sleeper,
                settings,
                rounds_completed: AtomicU64::new(0),
                last_round: Mutex::new(None),
            }),
            state: Mutex::new(ServiceState::Idle),
            activity: Mutex::new(None),
        }
    }

    /// Launch the background activity unless one is running or still
    /// draining after a stop.
    pub fn start(&self, plan: SchedulePlan) -> StartOutcome {
        let mut state = lock(&self.state);
        if matches!(*state, ServiceState::Running { .. }) {
            return StartOutcome::AlreadyRunning;
        }

        let mut activity = lock(&self.activity);
        if activity.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return StartOutcome::StillStopping;
        }

        let token = CancellationToken::new();
        info!(
            keywords = plan.keywords.len(),
            interval_secs = plan.interval.as_secs(),
            max_per_keyword = plan.max_per_keyword,
            "Scheduler started"
        );

        let handle = tokio::spawn(run_activity(
            Arc::clone(&self.shared),
            plan.clone(),
            token.clone(),
        ));
        *activity = Some(handle);

        *state = ServiceState::Running {
            plan,
            token,
            started_at: Utc::now(),
        };
        StartOutcome::Started
    }

    /// Ask the activity to stop. Returns false if it was not running.
    ///
    /// The running flag clears immediately; the activity exits once its
    /// in-flight campaign finishes.
    pub fn stop(&self) -> bool {
        let previous = std::mem::replace(&mut *lock(&self.state), ServiceState::Idle);
        match previous {
            ServiceState::Running { token, .. } => {
                token.cancel();
                info!("Scheduler stop requested");
                true
            }
            ServiceState::Idle => false,
        }
    }

    /// Stop and wait for the activity to exit.
    pub async fn stop_and_wait(&self) {
        self.stop();
        let handle = lock(&self.activity).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Scheduler activity ended abnormally: {e}");
            }
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(*lock(&self.state), ServiceState::Running { .. })
    }

    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        let (running, plan, started_at) = match &*lock(&self.state) {
            ServiceState::Idle => (false, None, None),
            ServiceState::Running {
                plan, started_at, ..
            } => (true, Some(plan.clone()), Some(*started_at)),
        };

        SchedulerStatus {
            running,
            plan,
            started_at,
            activity_alive: lock(&self.activity)
                .as_ref()
                .is_some_and(|handle| !handle.is_finished()),
            rounds_completed: self.shared.rounds_completed.load(Ordering::SeqCst),
            last_round: lock(&self.shared.last_round).clone(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sleep unless cancelled first. Returns false on cancellation.
async fn sleep_or_cancel(
    sleeper: &dyn Sleeper,
    duration: Duration,
    token: &CancellationToken,
) -> bool {
    tokio::select! {
        () = token.cancelled() => false,
        () = sleeper.sleep(duration) => !token.is_cancelled(),
    }
}

async fn run_activity(shared: Arc<Shared>, plan: SchedulePlan, token: CancellationToken) {
    while !token.is_cancelled() {
        // A panicking campaign surfaces here as a JoinError instead of
        // unwinding through the activity.
        let round = tokio::spawn(run_round(
            Arc::clone(&shared),
            plan.clone(),
            token.clone(),
        ));

        match round.await {
            Ok(report) => {
                info!(
                    succeeded = report.succeeded,
                    failed = report.failed,
                    skipped = report.skipped,
                    ingested = report.ingested,
                    interrupted = report.interrupted,
                    "Scheduler round finished"
                );
                shared.rounds_completed.fetch_add(1, Ordering::SeqCst);
                *lock(&shared.last_round) = Some(report);
            }
            Err(e) => {
                let cooldown = shared.settings.round_error_cooldown;
                error!(
                    cooldown_secs = cooldown.as_secs(),
                    "Scheduler round crashed: {e}"
                );
                if !sleep_or_cancel(shared.sleeper.as_ref(), cooldown, &token).await {
                    break;
                }
                continue;
            }
        }

        if !sleep_or_cancel(shared.sleeper.as_ref(), plan.interval, &token).await {
            break;
        }
    }

    info!("Scheduler activity exited");
}

async fn run_round(
    shared: Arc<Shared>,
    plan: SchedulePlan,
    token: CancellationToken,
) -> RoundReport {
    let mut report = RoundReport::default();

    for (index, keyword) in plan.keywords.iter().enumerate() {
        if token.is_cancelled() {
            report.interrupted = true;
            break;
        }

        if index > 0 {
            let delay = shared.settings.keyword_delay.sample();
            if !sleep_or_cancel(shared.sleeper.as_ref(), delay, &token).await {
                report.interrupted = true;
                break;
            }
        }

        match shared
            .campaign
            .run_keyword(keyword, plan.max_per_keyword, TaskKind::Scheduled)
            .await
        {
            Ok(outcome) if outcome.skipped => report.skipped += 1,
            Ok(outcome) => {
                report.succeeded += 1;
                report.ingested += outcome.summary.ingested;
            }
            Err(e) => {
                report.failed += 1;
                warn!(keyword = %keyword, "Scheduled campaign failed: {e:#}");
            }
        }
    }

    report.finished_at = Some(Utc::now());
    report
}
