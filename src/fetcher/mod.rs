//! Retrieval and normalization of single articles.

mod clean;
mod extract;

pub use clean::{clean_text, word_count};
pub use extract::{extract_article, ExtractedArticle};

use async_trait::async_trait;
use tracing::debug;

use crate::http::{browser_headers, FetchError};

/// Fetches one article and returns its normalized fields.
///
/// Any network, parse or empty-content outcome is an error; there are no
/// partial records.
#[async_trait]
pub trait ArticleFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ExtractedArticle, FetchError>;
}

/// Article fetcher backed by the shared HTTP client.
#[derive(Debug, Clone)]
pub struct HttpArticleFetcher {
    client: reqwest::Client,
}

impl HttpArticleFetcher {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArticleFetcher for HttpArticleFetcher {
    async fn fetch(&self, url: &str) -> Result<ExtractedArticle, FetchError> {
        let response = self
            .client
            .get(url)
            .headers(browser_headers())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let html = response.text().await?;
        let article = extract_article(&html, url)?;
        debug!(url, title = %article.title, word_count = article.word_count, "Fetched article");
        Ok(article)
    }
}
