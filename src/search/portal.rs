use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::constants::CHALLENGE_PATH;
use crate::http::{browser_headers, FetchError};

/// One raw search-results page.
#[derive(Debug, Clone)]
pub struct SearchPage {
    /// Final URL after redirects; challenge redirects show up here.
    pub url: Url,
    pub body: Vec<u8>,
}

/// Source of search-results pages for a keyword.
#[async_trait]
pub trait SearchPortal: Send + Sync {
    /// Fetch result page `page` (1-based) for `keyword`.
    async fn search_page(&self, keyword: &str, page: u32) -> Result<SearchPage, FetchError>;
}

/// HTTP client for the article search portal.
#[derive(Debug, Clone)]
pub struct PortalClient {
    client: reqwest::Client,
    search_url: Url,
}

impl PortalClient {
    #[must_use]
    pub fn new(client: reqwest::Client, search_url: Url) -> Self {
        Self { client, search_url }
    }

    /// Build the results URL for one page.
    #[must_use]
    pub fn page_url(&self, keyword: &str, page: u32) -> Url {
        let mut url = self.search_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("type", "2")
                .append_pair("query", keyword)
                .append_pair("ie", "utf8");
            if page > 1 {
                query.append_pair("page", &page.to_string());
            }
        }
        url
    }
}

#[async_trait]
impl SearchPortal for PortalClient {
    async fn search_page(&self, keyword: &str, page: u32) -> Result<SearchPage, FetchError> {
        let url = self.page_url(keyword, page);
        debug!(%url, keyword, page, "Requesting search page");

        let response = self
            .client
            .get(url.clone())
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

        // A blocked session is redirected to the verification page
        let final_url = response.url().clone();
        if final_url.path().starts_with(CHALLENGE_PATH) {
            return Err(FetchError::Challenge {
                url: final_url.to_string(),
            });
        }

        let body = response.bytes().await?;

        Ok(SearchPage {
            url: final_url,
            body: body.to_vec(),
        })
    }
}
