use std::collections::HashSet;

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use url::Url;

use super::decode::{resolve_link, LinkDecoder};
use super::normalize::LinkRules;
use crate::constants::{CHALLENGE_MARKERS, CHALLENGE_PATH};

static ANCHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("Invalid selector"));

/// Result containers the portal has used for organic hits, newest markup first.
static CONTAINER_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        "ul.news-list > li, div.txt-box, div[id^='sogou_vr_'], div.results > div.vrwrap, div.result",
    )
    .expect("Invalid selector")
});

/// Anything inside a container that may carry a target address.
static CONTAINER_LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("[href], [data-url], [data-href], [data-share], [data-link]")
        .expect("Invalid selector")
});

const CONTAINER_LINK_ATTRS: &[&str] = &["href", "data-url", "data-href", "data-share", "data-link"];

/// Outcome of scanning one search-results page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Unseen candidate article URLs in discovery order.
    Candidates(Vec<String>),
    /// The portal served an anti-bot interstitial; try again later.
    Challenge,
}

impl Extraction {
    #[must_use]
    pub fn is_challenge(&self) -> bool {
        matches!(self, Self::Challenge)
    }

    /// Candidates, or nothing for a challenge page.
    #[must_use]
    pub fn into_candidates(self) -> Vec<String> {
        match self {
            Self::Candidates(urls) => urls,
            Self::Challenge => Vec::new(),
        }
    }
}

/// Extract candidate article URLs from a raw search-results page.
///
/// Direct article links come first, then decoded redirect links, each in
/// document order. When neither pass finds anything the structurally-marked
/// result containers are scanned as a fallback. Candidates are de-duplicated
/// by canonical URL and anything `already_seen` reports as ingested is
/// dropped.
pub fn extract_links<F>(
    page: &[u8],
    page_url: &Url,
    rules: &LinkRules,
    mut already_seen: F,
) -> Extraction
where
    F: FnMut(&str) -> bool,
{
    let html = String::from_utf8_lossy(page);
    if is_challenge_page(&html, page_url) {
        return Extraction::Challenge;
    }

    let document = Html::parse_document(&html);

    let mut direct = Vec::new();
    let mut redirected = Vec::new();
    for element in document.select(&ANCHOR_SELECTOR) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        match resolve_href(href, page_url, rules) {
            Some((LinkDecoder::Direct, url)) => direct.push(url),
            Some((_, url)) => redirected.push(url),
            None => {}
        }
    }

    let mut discovered: Vec<String> = direct.into_iter().chain(redirected).collect();
    if discovered.is_empty() {
        discovered = scan_result_containers(&document, page_url, rules);
    }

    let mut seen_in_page = HashSet::new();
    let candidates = discovered
        .into_iter()
        .filter(|url| seen_in_page.insert(url.clone()))
        .filter(|url| !already_seen(url))
        .collect();

    Extraction::Candidates(candidates)
}

/// Check whether a page is an anti-bot interstitial rather than results.
#[must_use]
pub fn is_challenge_page(html: &str, page_url: &Url) -> bool {
    page_url.path().starts_with(CHALLENGE_PATH)
        || CHALLENGE_MARKERS.iter().any(|marker| html.contains(marker))
}

/// Fallback pass over result containers, reading every attribute that may hold a target.
fn scan_result_containers(document: &Html, page_url: &Url, rules: &LinkRules) -> Vec<String> {
    let mut found = Vec::new();
    for container in document.select(&CONTAINER_SELECTOR) {
        for element in container.select(&CONTAINER_LINK_SELECTOR) {
            for attr in CONTAINER_LINK_ATTRS {
                if let Some(value) = element.value().attr(attr) {
                    if let Some((_, url)) = resolve_href(value, page_url, rules) {
                        found.push(url);
                    }
                }
            }
        }
    }
    found
}

fn resolve_href(href: &str, page_url: &Url, rules: &LinkRules) -> Option<(LinkDecoder, String)> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
    {
        return None;
    }

    // Covers absolute, protocol-relative and portal-relative forms
    let absolute = page_url.join(href).ok()?;
    resolve_link(&absolute, rules).or_else(|| {
        // Root-relative article paths belong to the article site
        let on_article_site = rules.root_relative_article(href)?;
        resolve_link(&on_article_site, rules)
    })
}
