use url::Url;

/// Share and session parameters the article site appends to otherwise identical links.
const TRACKING_PARAMS: &[&str] = &[
    "scene",
    "subscene",
    "ascene",
    "chksm",
    "from",
    "isappinstalled",
    "clicktime",
    "enterid",
    "sessionid",
    "devicetype",
    "version",
    "nettype",
    "lang",
    "exportkey",
    "pass_ticket",
    "wx_header",
    "abtest_cookie",
    "poc_token",
    "key",
];

/// What counts as an article address on the target site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRules {
    article_host: String,
    path_prefix: String,
}

impl LinkRules {
    #[must_use]
    pub fn new(article_host: &str, path_prefix: &str) -> Self {
        Self {
            article_host: article_host.trim().to_ascii_lowercase(),
            path_prefix: path_prefix.to_string(),
        }
    }

    #[must_use]
    pub fn article_host(&self) -> &str {
        &self.article_host
    }

    /// Resolve a root-relative href such as `/s?__biz=...` against the article
    /// site. Only hrefs whose first path segment is the article prefix qualify.
    #[must_use]
    pub fn root_relative_article(&self, href: &str) -> Option<Url> {
        if !href.starts_with('/') || href.starts_with("//") {
            return None;
        }
        let base = Url::parse(&format!("https://{}/", self.article_host)).ok()?;
        let url = base.join(href).ok()?;
        let rest = url.path().strip_prefix(self.path_prefix.as_str())?;
        (rest.is_empty() || rest.starts_with('/')).then_some(url)
    }

    /// Check whether a parsed URL points at the article site.
    #[must_use]
    pub fn is_article(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
            && url
                .host_str()
                .is_some_and(|h| h.eq_ignore_ascii_case(&self.article_host))
            && url.path().starts_with(&self.path_prefix)
    }

    /// Derive the canonical form of an article address.
    ///
    /// Accepts absolute and protocol-relative input. Returns `None` when the
    /// address does not belong to the article site.
    #[must_use]
    pub fn canonicalize(&self, raw: &str) -> Option<String> {
        let raw = raw.trim().replace("&amp;", "&");
        let absolute = if raw.starts_with("//") {
            format!("https:{raw}")
        } else {
            raw
        };

        let parsed = Url::parse(&absolute).ok()?;
        if !self.is_article(&parsed) {
            return None;
        }
        Some(normalize_article_url(parsed))
    }
}

/// Apply the transformations that make two links to one article compare equal.
fn normalize_article_url(mut url: Url) -> String {
    if url.scheme() == "http" {
        let _ = url.set_scheme("https");
    }

    if url.port() == Some(443) || url.port() == Some(80) {
        let _ = url.set_port(None);
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    url.set_fragment(None);

    let path = url.path().to_string();
    if path.ends_with('/') && path.len() > 1 {
        url.set_path(path.trim_end_matches('/'));
    }

    url.to_string()
}

fn is_tracking_param(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    TRACKING_PARAMS.contains(&lower.as_str())
        || lower.starts_with("utm_")
        || lower.starts_with("sharer_")
}
