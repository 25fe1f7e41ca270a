// Video strategies: host links, embedded players, text patterns

use std::sync::Arc;

use lazy_static::lazy_static;
use scraper::Selector;
use url::Url;

use super::images::has_video_extension;
use super::traits::{ExtractionStrategy, PageDocument, RawCandidate};
use crate::courier::hosts::HostRegistry;
use crate::courier::models::DiscoveredVia;

lazy_static! {
    static ref ANCHOR: Selector = Selector::parse("a[href]").unwrap();
    static ref FRAMES: Selector = Selector::parse("iframe[src], iframe[data-src], embed[src]").unwrap();
    static ref MEDIA_TAGS: Selector = Selector::parse("video[src], video source[src], source[src]").unwrap();
    static ref SPOTLIGHT: Selector = Selector::parse("a.spotlight[href]").unwrap();
}

fn is_stream_file(url: &Url) -> bool {
    has_video_extension(url) || url.path().to_ascii_lowercase().ends_with(".m3u8")
}

/// Anchors pointing at registered video hosts
pub struct HostLinkVideos {
    hosts: Arc<HostRegistry>,
}

impl HostLinkVideos {
    pub fn new(hosts: Arc<HostRegistry>) -> Self {
        Self { hosts }
    }
}

impl ExtractionStrategy for HostLinkVideos {
    type Item = RawCandidate;

    fn name(&self) -> &'static str {
        "host-link-videos"
    }

    fn attempt(&self, page: &PageDocument) -> Result<Vec<RawCandidate>, String> {
        Ok(page
            .html
            .select(&ANCHOR)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|h| page.absolute(h))
            .filter(|u| self.hosts.is_video_host(u))
            .map(|u| RawCandidate::new(u, DiscoveredVia::Link))
            .collect())
    }
}

/// Player iframes on video hosts and inline `<video>` sources
pub struct EmbeddedPlayerVideos {
    hosts: Arc<HostRegistry>,
}

impl EmbeddedPlayerVideos {
    pub fn new(hosts: Arc<HostRegistry>) -> Self {
        Self { hosts }
    }
}

impl ExtractionStrategy for EmbeddedPlayerVideos {
    type Item = RawCandidate;

    fn name(&self) -> &'static str {
        "embedded-player-videos"
    }

    fn attempt(&self, page: &PageDocument) -> Result<Vec<RawCandidate>, String> {
        let mut out = Vec::new();

        for frame in page.html.select(&FRAMES) {
            let attrs = frame.value();
            let src = attrs.attr("src").or_else(|| attrs.attr("data-src"));
            if let Some(url) = src.and_then(|s| page.absolute(s)) {
                if self.hosts.is_video_host(&url) {
                    out.push(RawCandidate::new(url, DiscoveredVia::Embed));
                }
            }
        }

        for media in page.html.select(&MEDIA_TAGS) {
            let url = media.value().attr("src").and_then(|s| page.absolute(s));
            if let Some(url) = url.filter(is_stream_file) {
                out.push(RawCandidate::new(url, DiscoveredVia::Embed));
            }
        }

        for link in page.html.select(&SPOTLIGHT) {
            let url = link.value().attr("href").and_then(|h| page.absolute(h));
            if let Some(url) = url.filter(has_video_extension) {
                out.push(RawCandidate::new(url, DiscoveredVia::Embed));
            }
        }

        Ok(out)
    }
}

/// Video-host URLs written out as plain text
pub struct TextPatternVideos {
    hosts: Arc<HostRegistry>,
}

impl TextPatternVideos {
    pub fn new(hosts: Arc<HostRegistry>) -> Self {
        Self { hosts }
    }
}

impl ExtractionStrategy for TextPatternVideos {
    type Item = RawCandidate;

    fn name(&self) -> &'static str {
        "text-pattern-videos"
    }

    fn attempt(&self, page: &PageDocument) -> Result<Vec<RawCandidate>, String> {
        Ok(self
            .hosts
            .scan_video_text(&page.text())
            .into_iter()
            .filter_map(|(_, raw)| Url::parse(&raw).ok())
            .map(|u| RawCandidate::new(u, DiscoveredVia::TextPattern))
            .collect())
    }
}

/// Video strategies in priority order
pub fn default_video_strategies(
    hosts: Arc<HostRegistry>,
) -> Vec<Box<dyn ExtractionStrategy<Item = RawCandidate>>> {
    vec![
        Box::new(HostLinkVideos::new(hosts.clone())),
        Box::new(EmbeddedPlayerVideos::new(hosts.clone())),
        Box::new(TextPatternVideos::new(hosts)),
    ]
}
