//! Outbound HTTP plumbing shared by the search portal and the article fetcher.

use std::time::Duration;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use thiserror::Error;

use crate::constants::BROWSER_USER_AGENTS;

/// Why a single page could not be turned into usable content.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("{url} served an anti-bot challenge page")]
    Challenge { url: String },
    #[error("no selector matched the article {field}")]
    MissingStructure { field: &'static str },
    #[error("{url} has no article body")]
    EmptyContent { url: String },
}

impl FetchError {
    /// Network, timeout and non-success statuses; retried by the next campaign.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Status { .. })
    }

    /// Missing structure or empty body.
    #[must_use]
    pub fn is_parse_failure(&self) -> bool {
        matches!(self, Self::MissingStructure { .. } | Self::EmptyContent { .. })
    }
}

/// Build the cookie-keeping client shared by every outbound request.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .cookie_store(true)
        .gzip(true)
        .build()
        .context("Failed to build HTTP client")
}

/// Headers resembling a desktop browser, with a randomly chosen user agent.
#[must_use]
pub fn browser_headers() -> HeaderMap {
    let agent = BROWSER_USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(BROWSER_USER_AGENTS[0]);

    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(agent));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
    );
    headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
    headers
}
