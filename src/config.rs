use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::campaign::{BatchSettings, DelayRange, Pacing, RunnerSettings};
use crate::search::LinkRules;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_path: PathBuf,

    // Search portal and article site
    pub portal_search_url: String,
    pub article_host: String,
    pub article_path_prefix: String,
    pub search_pages: u32,
    pub request_timeout: Duration,

    // Pacing
    pub search_delay: DelayRange,
    pub item_delay: DelayRange,
    pub keyword_delay: DelayRange,
    pub challenge_cooldown: Duration,
    pub round_error_cooldown: Duration,

    // Batch throttling
    pub batch_size: u32,
    pub batch_rest: Duration,

    // Continuous scheduling
    pub schedule_keywords: Vec<String>,
    pub schedule_interval: Duration,
    pub max_articles_per_keyword: usize,
    pub autostart: bool,

    // Rendering collaborator
    pub related_reading_count: usize,

    // Web Server
    pub web_host: String,
    pub web_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_path: PathBuf::from(env_or_default(
                "DATABASE_PATH",
                "./data/articles.sqlite",
            )),

            portal_search_url: env_or_default(
                "PORTAL_SEARCH_URL",
                "https://weixin.sogou.com/weixin",
            ),
            article_host: env_or_default("ARTICLE_HOST", "mp.weixin.qq.com"),
            article_path_prefix: env_or_default("ARTICLE_PATH_PREFIX", "/s"),
            search_pages: parse_env_u32("SEARCH_PAGES", 3)?,
            request_timeout: Duration::from_secs(parse_env_u64("REQUEST_TIMEOUT_SECS", 30)?),

            search_delay: parse_env_range("SEARCH_DELAY_MS", (2000, 4000))?
                .into_delay(Duration::from_millis),
            item_delay: parse_env_range("ITEM_DELAY_MS", (3000, 6000))?
                .into_delay(Duration::from_millis),
            keyword_delay: parse_env_range("KEYWORD_DELAY_SECS", (10, 20))?
                .into_delay(Duration::from_secs),
            challenge_cooldown: Duration::from_secs(parse_env_u64("CHALLENGE_COOLDOWN_SECS", 120)?),
            round_error_cooldown: Duration::from_secs(parse_env_u64(
                "ROUND_ERROR_COOLDOWN_SECS",
                300,
            )?),

            batch_size: parse_env_u32("BATCH_SIZE", 100)?,
            batch_rest: parse_env_duration("BATCH_REST_MINUTES", 5, 60)?,

            schedule_keywords: parse_keyword_list(&env_or_default("SCHEDULE_KEYWORDS", "")),
            schedule_interval: parse_env_duration("SCHEDULE_INTERVAL_HOURS", 6, 3600)?,
            max_articles_per_keyword: parse_env_usize("MAX_ARTICLES_PER_KEYWORD", 5)?,
            autostart: parse_env_bool("AUTOSTART", false)?,

            related_reading_count: parse_env_usize("RELATED_READING_COUNT", 15)?,

            web_host: env_or_default("WEB_HOST", "0.0.0.0"),
            web_port: parse_env_u16("WEB_PORT", 5001)?,
        })
    }

    /// Zero-delay configuration pointing at nothing in particular.
    ///
    /// Tests override the portal URL and database path as needed.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            database_path: PathBuf::from("./test.sqlite"),
            portal_search_url: "http://127.0.0.1:9/weixin".to_string(),
            article_host: "mp.weixin.qq.com".to_string(),
            article_path_prefix: "/s".to_string(),
            search_pages: 1,
            request_timeout: Duration::from_secs(5),
            search_delay: DelayRange::ZERO,
            item_delay: DelayRange::ZERO,
            keyword_delay: DelayRange::ZERO,
            challenge_cooldown: Duration::ZERO,
            round_error_cooldown: Duration::ZERO,
            batch_size: 100,
            batch_rest: Duration::ZERO,
            schedule_keywords: Vec::new(),
            schedule_interval: Duration::from_secs(3600),
            max_articles_per_keyword: 5,
            autostart: false,
            related_reading_count: 15,
            web_host: "127.0.0.1".to_string(),
            web_port: 0,
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(invalid("BATCH_SIZE", "must be at least 1"));
        }
        if self.search_pages == 0 {
            return Err(invalid("SEARCH_PAGES", "must be at least 1"));
        }
        if self.article_host.is_empty() {
            return Err(invalid("ARTICLE_HOST", "cannot be empty"));
        }
        if let Err(e) = Url::parse(&self.portal_search_url) {
            return Err(invalid("PORTAL_SEARCH_URL", &e.to_string()));
        }
        if self.autostart && self.schedule_keywords.is_empty() {
            return Err(invalid(
                "SCHEDULE_KEYWORDS",
                "at least one keyword is required when AUTOSTART is enabled",
            ));
        }
        Ok(())
    }

    /// Link-matching rules for the configured article site.
    #[must_use]
    pub fn link_rules(&self) -> LinkRules {
        LinkRules::new(&self.article_host, &self.article_path_prefix)
    }

    /// Settings for the campaign runner.
    #[must_use]
    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            search_pages: self.search_pages,
            pacing: Pacing {
                search_delay: self.search_delay,
                item_delay: self.item_delay,
                challenge_cooldown: self.challenge_cooldown,
            },
        }
    }

    /// Initial batch throttling settings.
    #[must_use]
    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            batch_size: self.batch_size,
            rest: self.batch_rest,
        }
    }
}

/// An inclusive `min-max` pair as written in the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RawRange(u64, u64);

impl RawRange {
    fn into_delay(self, unit: fn(u64) -> Duration) -> DelayRange {
        DelayRange::new(unit(self.0), unit(self.1))
    }
}

fn invalid(name: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message: message.to_string(),
    }
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.trim().parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

/// Parse a count of `unit_secs`-long units, rejecting counts that overflow.
fn parse_env_duration(name: &str, default: u64, unit_secs: u64) -> Result<Duration, ConfigError> {
    parse_env_u64(name, default)?
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| invalid(name, "value is too large"))
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.trim().parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u16(name: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.trim().parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.trim().parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

fn parse_env_range(name: &str, default: (u64, u64)) -> Result<RawRange, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => parse_range(name, &val),
        _ => Ok(RawRange(default.0, default.1)),
    }
}

fn parse_range(name: &str, value: &str) -> Result<RawRange, ConfigError> {
    let parse = |part: &str| {
        part.trim().parse::<u64>().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        })
    };

    let (min, max) = match value.split_once('-') {
        Some((min, max)) => (parse(min)?, parse(max)?),
        None => {
            let fixed = parse(value)?;
            (fixed, fixed)
        }
    };

    if min > max {
        return Err(invalid(name, &format!("range start {min} exceeds end {max}")));
    }
    Ok(RawRange(min, max))
}

fn parse_keyword_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(ToString::to_string)
        .collect()
}
