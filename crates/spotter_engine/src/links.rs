use std::sync::LazyLock;

use scraper::{Html, Selector};
use url::Url;

const DEFAULT_MAX_LINKS: usize = 5_000;

static ANCHORS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid anchor selector"));
static IMAGES: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img[src]").expect("valid image selector"));

/// An `<img>` reference with its raw size attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub url: Url,
    pub width: Option<String>,
    pub height: Option<String>,
}

/// Absolute link targets found on one page, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageLinks {
    pub anchors: Vec<Url>,
    pub images: Vec<ImageRef>,
}

/// Pulls anchors and images out of an HTML document. Each list is capped so a
/// pathological page cannot flood the frontier.
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    max_links: usize,
}

impl LinkExtractor {
    pub fn new() -> Self {
        Self::with_max_links(DEFAULT_MAX_LINKS)
    }

    pub fn with_max_links(max_links: usize) -> Self {
        Self { max_links }
    }

    pub fn extract(&self, html: &str, base_url: &str) -> PageLinks {
        let document = Html::parse_document(html);
        let base = Url::parse(base_url).ok();

        let anchors = document
            .select(&ANCHORS)
            .filter_map(|element| element.value().attr("href"))
            .filter_map(|href| resolve_url(href, base.as_ref()))
            .take(self.max_links)
            .collect();

        let images = document
            .select(&IMAGES)
            .filter_map(|element| {
                let src = element.value().attr("src")?;
                let url = resolve_url(src, base.as_ref())?;
                Some(ImageRef {
                    url,
                    width: element.value().attr("width").map(str::to_string),
                    height: element.value().attr("height").map(str::to_string),
                })
            })
            .take(self.max_links)
            .collect();

        PageLinks { anchors, images }
    }
}

impl Default for LinkExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves a raw attribute value against the page URL, dropping empty,
/// fragment-only and non-navigable references.
fn resolve_url(reference: &str, base: Option<&Url>) -> Option<Url> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with('#')
        || lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("data:")
    {
        return None;
    }
    if let Ok(url) = Url::parse(trimmed) {
        return Some(url);
    }
    base.and_then(|base| base.join(trimmed).ok())
}
