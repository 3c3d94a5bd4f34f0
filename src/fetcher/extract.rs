//! Field extraction from article pages.
//!
//! Each field has an ordered list of selectors. The first one that matches an
//! element with non-empty text wins, so markup drift degrades to a less
//! specific selector instead of failing outright.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use super::clean::{clean_text, word_count};
use crate::http::FetchError;

/// Where the text of a matched element lives.
#[derive(Debug, Clone, Copy)]
enum TextSource {
    Text,
    Attr(&'static str),
    AttrOrText(&'static str),
}

struct FieldSelector {
    selector: Selector,
    source: TextSource,
}

impl FieldSelector {
    fn new(css: &str, source: TextSource) -> Self {
        Self {
            selector: Selector::parse(css).expect("Invalid selector"),
            source,
        }
    }

    fn read(&self, element: &ElementRef) -> Option<String> {
        let value = match self.source {
            TextSource::Text => element.text().collect::<String>(),
            TextSource::Attr(name) => element.value().attr(name)?.to_string(),
            TextSource::AttrOrText(name) => element
                .value()
                .attr(name)
                .map_or_else(|| element.text().collect::<String>(), ToString::to_string),
        };
        Some(value)
    }
}

static TITLE_SELECTORS: Lazy<Vec<FieldSelector>> = Lazy::new(|| {
    vec![
        FieldSelector::new("h1#activity-name", TextSource::Text),
        FieldSelector::new("h1.rich_media_title", TextSource::Text),
        FieldSelector::new(r#"meta[property="og:title"]"#, TextSource::Attr("content")),
        FieldSelector::new("title", TextSource::Text),
        FieldSelector::new("h1", TextSource::Text),
    ]
});

static AUTHOR_SELECTORS: Lazy<Vec<FieldSelector>> = Lazy::new(|| {
    vec![
        FieldSelector::new("#js_name", TextSource::Text),
        FieldSelector::new(".rich_media_meta_text", TextSource::Text),
        FieldSelector::new(".rich_media_meta_nickname", TextSource::Text),
        FieldSelector::new(r#"meta[name="author"]"#, TextSource::Attr("content")),
        FieldSelector::new(".author", TextSource::Text),
        FieldSelector::new("[data-author]", TextSource::AttrOrText("data-author")),
    ]
});

static CONTENT_SELECTORS: Lazy<Vec<FieldSelector>> = Lazy::new(|| {
    vec![
        FieldSelector::new("#js_content", TextSource::Text),
        FieldSelector::new(".rich_media_content", TextSource::Text),
        FieldSelector::new(".content", TextSource::Text),
        FieldSelector::new("article", TextSource::Text),
        FieldSelector::new("main", TextSource::Text),
    ]
});

/// Normalized fields of a single article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedArticle {
    pub title: String,
    pub author: Option<String>,
    pub body_text: String,
    pub word_count: i64,
}

/// Extract title, author and cleaned body from an article page.
///
/// # Errors
///
/// Returns [`FetchError::MissingStructure`] when no title selector matches and
/// [`FetchError::EmptyContent`] when the cleaned body is empty.
pub fn extract_article(html: &str, url: &str) -> Result<ExtractedArticle, FetchError> {
    let document = Html::parse_document(html);

    let title = first_match(&document, &TITLE_SELECTORS)
        .ok_or(FetchError::MissingStructure { field: "title" })?;
    let author = first_match(&document, &AUTHOR_SELECTORS);

    let body_text = first_match(&document, &CONTENT_SELECTORS)
        .map(|raw| clean_text(&raw))
        .unwrap_or_default();
    if body_text.is_empty() {
        return Err(FetchError::EmptyContent {
            url: url.to_string(),
        });
    }

    Ok(ExtractedArticle {
        title,
        author,
        word_count: word_count(&body_text),
        body_text,
    })
}

fn first_match(document: &Html, selectors: &[FieldSelector]) -> Option<String> {
    selectors.iter().find_map(|field| {
        document
            .select(&field.selector)
            .filter_map(|element| field.read(&element))
            .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
            .find(|text| !text.is_empty())
    })
}
