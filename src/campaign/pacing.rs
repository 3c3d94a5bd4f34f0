//! Request pacing: randomized delays, batch rests and the sleep seam.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;

/// An inclusive range a delay is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub const ZERO: Self = Self::fixed(Duration::ZERO);

    #[must_use]
    pub const fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            min: delay,
            max: delay,
        }
    }

    /// Draw a delay uniformly from the range.
    #[must_use]
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..=self.max)
    }
}

/// Delays applied by a campaign between outbound requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Before each search-result page request.
    pub search_delay: DelayRange,
    /// Between consecutive article fetches.
    pub item_delay: DelayRange,
    /// After a search page turns out to be a challenge page.
    pub challenge_cooldown: Duration,
}

impl Pacing {
    pub const NONE: Self = Self {
        search_delay: DelayRange::ZERO,
        item_delay: DelayRange::ZERO,
        challenge_cooldown: Duration::ZERO,
    };
}

/// Fixed settings for the campaign runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    pub search_pages: u32,
    pub pacing: Pacing,
}

/// Rest for `rest` after every `batch_size` successful ingestions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSettings {
    pub batch_size: u32,
    #[serde(serialize_with = "serialize_minutes", rename = "rest_minutes")]
    pub rest: Duration,
}

impl BatchSettings {
    /// Settings with a rest period in minutes, saturating on overflow.
    #[must_use]
    pub const fn new(batch_size: u32, rest_minutes: u64) -> Self {
        Self {
            batch_size,
            rest: Duration::from_secs(rest_minutes.saturating_mul(60)),
        }
    }

    /// Like [`BatchSettings::new`], but `None` when the rest period overflows.
    #[must_use]
    pub fn checked(batch_size: u32, rest_minutes: u64) -> Option<Self> {
        let secs = rest_minutes.checked_mul(60)?;
        Some(Self {
            batch_size,
            rest: Duration::from_secs(secs),
        })
    }
}

fn serialize_minutes<S: serde::Serializer>(rest: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(rest.as_secs() / 60)
}

#[derive(Debug)]
struct ThrottleState {
    settings: BatchSettings,
    count: u32,
}

/// Rolling count of successful ingestions, shared by every campaign.
///
/// Settings can be changed while campaigns are running; the new batch size
/// applies from the next recorded success.
#[derive(Debug)]
pub struct BatchThrottle {
    state: Mutex<ThrottleState>,
}

impl BatchThrottle {
    #[must_use]
    pub fn new(settings: BatchSettings) -> Self {
        Self {
            state: Mutex::new(ThrottleState { settings, count: 0 }),
        }
    }

    /// Count one success. Returns the rest to take once the batch is full.
    pub fn record_success(&self) -> Option<Duration> {
        let mut state = self.lock();
        state.count += 1;
        (state.count >= state.settings.batch_size).then_some(state.settings.rest)
    }

    /// Start a new batch. Called after the rest has been taken.
    pub fn reset(&self) {
        self.lock().count = 0;
    }

    /// Successes counted in the current batch.
    #[must_use]
    pub fn progress(&self) -> u32 {
        self.lock().count
    }

    #[must_use]
    pub fn settings(&self) -> BatchSettings {
        self.lock().settings
    }

    pub fn set_settings(&self, settings: BatchSettings) {
        self.lock().settings = settings;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Suspension point for every pacing delay.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_stays_in_range() {
        let range = DelayRange::new(Duration::from_millis(10), Duration::from_millis(20));
        for _ in 0..100 {
            let d = range.sample();
            assert!(d >= range.min && d <= range.max);
        }
        assert_eq!(DelayRange::ZERO.sample(), Duration::ZERO);
    }

    #[test]
    fn test_fixed_range() {
        let range = DelayRange::fixed(Duration::from_secs(3));
        assert_eq!(range.sample(), Duration::from_secs(3));
    }

    #[test]
    fn test_throttle_signals_rest_at_batch_size() {
        let throttle = BatchThrottle::new(BatchSettings::new(3, 5));
        assert_eq!(throttle.record_success(), None);
        assert_eq!(throttle.record_success(), None);
        assert_eq!(throttle.record_success(), Some(Duration::from_secs(300)));
        assert_eq!(throttle.progress(), 3);

        throttle.reset();
        assert_eq!(throttle.progress(), 0);
        assert_eq!(throttle.record_success(), None);
    }

    #[test]
    fn test_shrinking_batch_applies_immediately() {
        let throttle = BatchThrottle::new(BatchSettings::new(10, 1));
        throttle.record_success();
        throttle.record_success();
        throttle.set_settings(BatchSettings::new(2, 1));
        assert_eq!(throttle.record_success(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_batch_settings_overflowing_rest() {
        assert_eq!(BatchSettings::checked(1, u64::MAX), None);
        assert_eq!(BatchSettings::checked(1, 2), Some(BatchSettings::new(1, 2)));
        assert_eq!(BatchSettings::new(1, u64::MAX).rest, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_batch_settings_serialize_minutes() {
        let json = serde_json::to_value(BatchSettings::new(50, 7)).unwrap();
        assert_eq!(json["batch_size"], 50);
        assert_eq!(json["rest_minutes"], 7);
    }
}
