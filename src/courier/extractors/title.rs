// Title strategies and the title-cleaning transform

use lazy_static::lazy_static;
use regex::Regex;
use scraper::Selector;
use tracing::warn;

use super::traits::{element_text, ExtractionStrategy, PageDocument};

lazy_static! {
    static ref SITE_SIGNATURE_TITLES: Vec<Selector> = [
        "span.ipsType_break.ipsContained span",
        "h1.ipsType_pageTitle",
        "h1.text-xl",
    ]
    .iter()
    .map(|s| Selector::parse(s).unwrap())
    .collect();
    static ref DOCUMENT_TITLE: Selector = Selector::parse("title").unwrap();
    static ref META_TITLES: Vec<Selector> = [
        r#"meta[property="og:title"]"#,
        r#"meta[name="twitter:title"]"#,
    ]
    .iter()
    .map(|s| Selector::parse(s).unwrap())
    .collect();
    static ref FIRST_HEADING: Selector = Selector::parse("h1").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

fn first_text(page: &PageDocument, selectors: &[Selector]) -> Vec<String> {
    for selector in selectors {
        for el in page.html.select(selector) {
            let text = element_text(&el);
            if !text.is_empty() {
                return vec![text];
            }
        }
    }
    Vec::new()
}

/// Forum thread titles and gallery headings
pub struct SiteSignatureTitle;

impl ExtractionStrategy for SiteSignatureTitle {
    type Item = String;

    fn name(&self) -> &'static str {
        "site-signature-title"
    }

    fn attempt(&self, page: &PageDocument) -> Result<Vec<String>, String> {
        Ok(first_text(page, &SITE_SIGNATURE_TITLES))
    }
}

pub struct DocumentTitle;

impl ExtractionStrategy for DocumentTitle {
    type Item = String;

    fn name(&self) -> &'static str {
        "document-title"
    }

    fn attempt(&self, page: &PageDocument) -> Result<Vec<String>, String> {
        Ok(first_text(page, std::slice::from_ref(&*DOCUMENT_TITLE)))
    }
}

/// og:title, then twitter:title
pub struct StructuredMetadataTitle;

impl ExtractionStrategy for StructuredMetadataTitle {
    type Item = String;

    fn name(&self) -> &'static str {
        "structured-metadata-title"
    }

    fn attempt(&self, page: &PageDocument) -> Result<Vec<String>, String> {
        for selector in META_TITLES.iter() {
            let found = page
                .html
                .select(selector)
                .filter_map(|el| el.value().attr("content"))
                .map(|c| c.trim().to_string())
                .find(|c| !c.is_empty());
            if let Some(title) = found {
                return Ok(vec![title]);
            }
        }
        Ok(Vec::new())
    }
}

pub struct FirstHeadingTitle;

impl ExtractionStrategy for FirstHeadingTitle {
    type Item = String;

    fn name(&self) -> &'static str {
        "first-heading-title"
    }

    fn attempt(&self, page: &PageDocument) -> Result<Vec<String>, String> {
        Ok(first_text(page, std::slice::from_ref(&*FIRST_HEADING)))
    }
}

/// Title strategies in priority order
pub fn default_title_strategies() -> Vec<Box<dyn ExtractionStrategy<Item = String>>> {
    vec![
        Box::new(SiteSignatureTitle),
        Box::new(DocumentTitle),
        Box::new(StructuredMetadataTitle),
        Box::new(FirstHeadingTitle),
    ]
}

/// Strips site suffixes and escapes markup-significant characters
#[derive(Debug, Clone)]
pub struct TitleCleaner {
    patterns: Vec<Regex>,
}

impl TitleCleaner {
    /// Patterns are applied case-insensitively, in order; invalid ones are skipped
    pub fn new(patterns: &[String]) -> Self {
        let compiled = patterns
            .iter()
            .filter_map(|p| match Regex::new(&format!("(?i){}", p)) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("[Title] Skipping invalid pattern {:?}: {}", p, e);
                    None
                }
            })
            .collect();
        Self { patterns: compiled }
    }

    pub fn clean(&self, raw: &str) -> String {
        let mut title = raw.trim().to_string();
        for re in &self.patterns {
            let stripped = re.replace_all(&title, "").trim().to_string();
            // A pattern that would erase the whole title is not a suffix
            if !stripped.is_empty() {
                title = stripped;
            }
        }
        let collapsed = WHITESPACE.replace_all(title.trim(), " ");
        escape_markup(&collapsed)
    }
}

/// Escape characters the delivery platform's Markdown treats specially
pub fn escape_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '_' | '*' | '[' | ']' | '`') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
