// ExtractionStrategy trait and common types

use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::courier::models::DiscoveredVia;
use crate::courier::utils::normalize_url;

/// Parsed page handed to every strategy
pub struct PageDocument {
    pub html: Html,
    pub base_url: Url,
    pub raw: String,
}

impl PageDocument {
    pub fn parse(body: &str, base_url: &Url) -> Self {
        Self {
            html: Html::parse_document(body),
            base_url: base_url.clone(),
            raw: body.to_string(),
        }
    }

    /// Resolve an attribute value against the page URL
    pub fn absolute(&self, raw: &str) -> Option<Url> {
        normalize_url(raw, &self.base_url)
    }

    /// Visible text of the whole document, whitespace-joined
    pub fn text(&self) -> String {
        self.html
            .root_element()
            .text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Media URL as found by a strategy, before filtering and tagging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCandidate {
    pub url: Url,
    pub discovered_via: DiscoveredVia,
}

impl RawCandidate {
    pub fn new(url: Url, discovered_via: DiscoveredVia) -> Self {
        Self { url, discovered_via }
    }
}

/// One named way of pulling items out of a page
pub trait ExtractionStrategy: Send + Sync {
    type Item;

    /// Name of the strategy (for the attempt log)
    fn name(&self) -> &'static str;

    /// Produce zero or more items; `Err` marks the strategy as errored
    fn attempt(&self, page: &PageDocument) -> Result<Vec<Self::Item>, String>;
}

lazy_static! {
    static ref LINK_PARENT: Selector = Selector::parse("a[href]").unwrap();
}

/// Trimmed, whitespace-collapsed text of an element
pub fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// `href` of the `<a>` directly wrapping this element, if any
pub fn parent_link(el: &ElementRef<'_>) -> Option<String> {
    let parent = el.parent().and_then(ElementRef::wrap)?;
    if LINK_PARENT.matches(&parent) {
        parent.value().attr("href").map(|s| s.to_string())
    } else {
        None
    }
}

/// Lazy-loading aware image source: data-src, else the last srcset entry, else src
pub fn image_source(el: &ElementRef<'_>) -> Option<String> {
    let attrs = el.value();
    if let Some(v) = attrs.attr("data-src").filter(|v| !v.trim().is_empty()) {
        return Some(v.to_string());
    }
    if let Some(srcset) = attrs.attr("srcset").or_else(|| attrs.attr("data-srcset")) {
        let last = srcset
            .split(',')
            .filter_map(|part| part.split_whitespace().next())
            .last();
        if let Some(u) = last {
            return Some(u.to_string());
        }
    }
    attrs
        .attr("src")
        .filter(|v| !v.trim().is_empty())
        .map(|s| s.to_string())
}
