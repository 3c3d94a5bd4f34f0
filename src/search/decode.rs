//! Decoder strategies for the link forms the portal emits.
//!
//! Each strategy either yields a canonical article URL or declines. A link is
//! offered to the strategies in [`LinkDecoder::PRIORITY`] order and the first
//! one that succeeds wins.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use url::Url;

use super::normalize::LinkRules;

/// Query parameters that carry the wrapped target on portal redirect links.
const TARGET_PARAMS: &[&str] = &["url", "target", "u"];

/// How an article URL was recovered from a raw href.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDecoder {
    /// The href already points at the article site.
    Direct,
    /// A redirect whose target parameter is percent-encoded.
    PercentEncoded,
    /// A redirect whose target parameter is Base64, then percent-encoded.
    PercentThenBase64,
}

impl LinkDecoder {
    pub const PRIORITY: [Self; 3] = [Self::Direct, Self::PercentEncoded, Self::PercentThenBase64];

    /// Try to recover a canonical article URL from an absolute href.
    #[must_use]
    pub fn decode(self, href: &Url, rules: &LinkRules) -> Option<String> {
        match self {
            Self::Direct => rules.canonicalize(href.as_str()),
            Self::PercentEncoded => target_values(href)
                .find_map(|raw| percent_decode(raw).and_then(|t| rules.canonicalize(&t))),
            Self::PercentThenBase64 => target_values(href).find_map(|raw| {
                percent_decode(raw)
                    .and_then(|t| base64_decode(&t))
                    .and_then(|t| rules.canonicalize(&t))
            }),
        }
    }
}

/// Run every strategy in priority order, stopping at the first match.
#[must_use]
pub fn resolve_link(href: &Url, rules: &LinkRules) -> Option<(LinkDecoder, String)> {
    LinkDecoder::PRIORITY
        .into_iter()
        .find_map(|decoder| decoder.decode(href, rules).map(|url| (decoder, url)))
}

/// Raw (still encoded) values of the redirect target parameters.
///
/// `Url::query_pairs` would decode eagerly and turn `+` into spaces, which
/// corrupts Base64 payloads, so the query is split by hand.
fn target_values(href: &Url) -> impl Iterator<Item = &str> {
    href.query()
        .unwrap_or("")
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, value)| !value.is_empty() && TARGET_PARAMS.contains(key))
        .map(|(_, value)| value)
}

fn percent_decode(raw: &str) -> Option<String> {
    urlencoding::decode(raw).ok().map(std::borrow::Cow::into_owned)
}

/// Decode standard or URL-safe Base64, repairing stripped padding first.
fn base64_decode(raw: &str) -> Option<String> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let trimmed = compact.trim_end_matches('=');
    if trimmed.is_empty() || trimmed.len() % 4 == 1 {
        return None;
    }

    let mut padded = trimmed.to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }

    let bytes = STANDARD
        .decode(&padded)
        .or_else(|_| URL_SAFE.decode(&padded))
        .ok()?;
    String::from_utf8(bytes).ok()
}
