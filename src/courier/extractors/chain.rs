// Strategy chain driver and the page-level extractor
//
// Strategies run in priority order; the first one whose post-processed
// output is non-empty wins and the rest are never invoked. Every strategy
// that did run leaves one entry in the attempt log.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Url;

use super::images::{default_image_strategies, wordpress_original};
use super::title::{default_title_strategies, TitleCleaner};
use super::traits::{ExtractionStrategy, PageDocument, RawCandidate};
use super::videos::default_video_strategies;
use crate::courier::config::CourierConfig;
use crate::courier::hosts::HostRegistry;
use crate::courier::models::{
    group_videos, AttemptLog, AttemptOutcome, ContentType, ExtractionAttempt, MediaCandidate,
    MediaKind, VideoSourceGroup,
};

/// Ordered strategies for one content type
pub struct StrategyChain<T> {
    content_type: ContentType,
    strategies: Vec<Box<dyn ExtractionStrategy<Item = T>>>,
}

impl<T> StrategyChain<T> {
    pub fn new(content_type: ContentType, strategies: Vec<Box<dyn ExtractionStrategy<Item = T>>>) -> Self {
        Self {
            content_type,
            strategies,
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run until a strategy yields at least one item after `post`
    pub fn run<F>(&self, page: &PageDocument, log: &mut AttemptLog, post: F) -> Vec<T>
    where
        F: Fn(Vec<T>) -> Vec<T>,
    {
        for strategy in &self.strategies {
            let name = strategy.name();
            match strategy.attempt(page) {
                Err(detail) => {
                    warn!("[Chain] {} {} failed: {}", self.content_type, name, detail);
                    self.record(log, name, AttemptOutcome::error("StrategyError", detail), 0);
                }
                Ok(raw) => {
                    let items = post(raw);
                    if items.is_empty() {
                        debug!("[Chain] {} {} found nothing", self.content_type, name);
                        self.record(log, name, AttemptOutcome::Empty, 0);
                        continue;
                    }
                    info!("[Chain] ✓ {} {} found {} item(s)", self.content_type, name, items.len());
                    self.record(log, name, AttemptOutcome::Success, items.len());
                    return items;
                }
            }
        }
        Vec::new()
    }

    fn record(&self, log: &mut AttemptLog, name: &str, outcome: AttemptOutcome, produced_items: usize) {
        log.push(ExtractionAttempt {
            strategy_name: name.to_string(),
            content_type: self.content_type,
            outcome,
            produced_items,
        });
    }
}

/// Path substrings marking non-content assets
#[derive(Debug, Clone, Default)]
pub struct Denylist {
    patterns: Vec<String>,
}

impl Denylist {
    pub fn new(patterns: &[String]) -> Self {
        Self {
            patterns: patterns
                .iter()
                .map(|p| p.trim().to_ascii_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn is_denied(&self, url: &Url) -> bool {
        let haystack = format!(
            "{}{}",
            url.host_str().unwrap_or_default(),
            url.path()
        )
        .to_ascii_lowercase();
        self.patterns.iter().any(|p| haystack.contains(p.as_str()))
    }
}

/// Everything pulled out of one page
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    pub title: Option<String>,
    pub images: Vec<MediaCandidate>,
    pub videos: Vec<MediaCandidate>,
    pub attempts: AttemptLog,
}

impl ExtractionReport {
    /// No media found; a valid result, not an error
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.videos.is_empty()
    }

    pub fn video_groups(&self) -> Vec<VideoSourceGroup> {
        group_videos(&self.videos)
    }
}

/// Title, image and video chains over one parsed page
pub struct PageExtractor {
    title: StrategyChain<String>,
    images: StrategyChain<RawCandidate>,
    videos: StrategyChain<RawCandidate>,
    hosts: Arc<HostRegistry>,
    denylist: Denylist,
    cleaner: TitleCleaner,
}

impl PageExtractor {
    pub fn new(config: &CourierConfig, hosts: Arc<HostRegistry>) -> Self {
        Self {
            title: StrategyChain::new(ContentType::Title, default_title_strategies()),
            images: StrategyChain::new(ContentType::Image, default_image_strategies(hosts.clone())),
            videos: StrategyChain::new(ContentType::Video, default_video_strategies(hosts.clone())),
            hosts,
            denylist: Denylist::new(&config.denylist),
            cleaner: TitleCleaner::new(&config.title_patterns),
        }
    }

    /// Parse `body` and run all three chains. Synchronous: the parsed
    /// document never crosses an await point.
    pub fn extract(&self, body: &str, base_url: &Url) -> ExtractionReport {
        let page = PageDocument::parse(body, base_url);
        let mut attempts = AttemptLog::new();

        let title = self
            .title
            .run(&page, &mut attempts, |raw| {
                raw.iter()
                    .map(|t| self.cleaner.clean(t))
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .into_iter()
            .next();

        let images = self.images.run(&page, &mut attempts, |raw| {
            let raw = raw
                .into_iter()
                .map(|c| RawCandidate::new(wordpress_original(c.url), c.discovered_via))
                .collect();
            self.filter(raw)
        });

        let videos = self
            .videos
            .run(&page, &mut attempts, |raw| self.filter(raw));

        let report = ExtractionReport {
            title,
            images: self.tag(images, MediaKind::Image),
            videos: self.tag(videos, MediaKind::Video),
            attempts,
        };
        info!(
            "[Chain] {}: title={} images={} videos={}",
            base_url,
            report.title.is_some(),
            report.images.len(),
            report.videos.len()
        );
        report
    }

    /// Denylist, then dedup by normalized URL keeping first-seen order
    fn filter(&self, raw: Vec<RawCandidate>) -> Vec<RawCandidate> {
        let mut seen = HashSet::new();
        raw.into_iter()
            .filter(|c| !self.denylist.is_denied(&c.url))
            .filter(|c| seen.insert(c.url.to_string()))
            .collect()
    }

    fn tag(&self, raw: Vec<RawCandidate>, kind: MediaKind) -> Vec<MediaCandidate> {
        raw.into_iter()
            .map(|c| MediaCandidate {
                source_host_tag: self.hosts.tag_for(&c.url),
                url: c.url,
                kind,
                discovered_via: c.discovered_via,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::courier::models::DiscoveredVia;

    struct Fixed {
        name: &'static str,
        result: Result<Vec<String>, String>,
    }

    impl ExtractionStrategy for Fixed {
        type Item = String;

        fn name(&self) -> &'static str {
            self.name
        }

        fn attempt(&self, _page: &PageDocument) -> Result<Vec<String>, String> {
            self.result.clone()
        }
    }

    fn fixed(name: &'static str, result: Result<Vec<&str>, &str>) -> Box<dyn ExtractionStrategy<Item = String>> {
        Box::new(Fixed {
            name,
            result: result
                .map(|v| v.into_iter().map(String::from).collect())
                .map_err(String::from),
        })
    }

    fn base() -> Url {
        Url::parse("https://forum.example.com/threads/7/").unwrap()
    }

    const GALLERY: &str = r#"<html><head><title>Beach Day | ExampleForum</title></head><body>
        <div data-role="commentContent">
          <img src="/media/a.jpg">
          <img src="https://forum.example.com/media/a.jpg">
          <img src="/styles/avatar/u1.png">
          <a href="https://vidoza.net/abc.html">vidoza</a>
          <a href="https://streamtape.com/v/Qx9/clip">streamtape</a>
          <a href="https://vidoza.net/abc.html">again</a>
        </div></body></html>"#;

    #[test]
    fn test_chain_stops_at_first_hit() {
        let chain = StrategyChain::new(
            ContentType::Title,
            vec![
                fixed("broken", Err("selector blew up")),
                fixed("empty", Ok(vec![])),
                fixed("hit", Ok(vec!["Title"])),
                fixed("never", Ok(vec!["Other"])),
            ],
        );
        let page = PageDocument::parse("<html></html>", &base());
        let mut log = AttemptLog::new();
        let items = chain.run(&page, &mut log, |v| v);

        assert_eq!(items, vec!["Title".to_string()]);
        let names: Vec<_> = log.entries().iter().map(|a| a.strategy_name.as_str()).collect();
        assert_eq!(names, vec!["broken", "empty", "hit"]);
        assert!(matches!(log.entries()[0].outcome, AttemptOutcome::Error { .. }));
        assert_eq!(log.entries()[1].outcome, AttemptOutcome::Empty);
        assert_eq!(log.entries()[2].produced_items, 1);
    }

    #[test]
    fn test_post_processing_can_empty_a_strategy() {
        let chain = StrategyChain::new(
            ContentType::Title,
            vec![fixed("first", Ok(vec!["   "])), fixed("second", Ok(vec!["Kept"]))],
        );
        let page = PageDocument::parse("<html></html>", &base());
        let mut log = AttemptLog::new();
        let items = chain.run(&page, &mut log, |v| {
            v.into_iter().filter(|s| !s.trim().is_empty()).collect()
        });
        assert_eq!(items, vec!["Kept".to_string()]);
        assert_eq!(log.entries()[0].outcome, AttemptOutcome::Empty);
    }

    #[test]
    fn test_denylist_matches_path_substrings() {
        let denylist = Denylist::new(&["Avatar".to_string(), "/ads/".to_string(), " ".to_string()]);
        assert!(denylist.is_denied(&Url::parse("https://a.test/data/avatars/1.png").unwrap()));
        assert!(denylist.is_denied(&Url::parse("https://a.test/ads/banner.gif").unwrap()));
        assert!(!denylist.is_denied(&Url::parse("https://a.test/media/photo.jpg").unwrap()));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let extractor = PageExtractor::new(&CourierConfig::default(), Arc::new(HostRegistry::default()));
        let first = extractor.extract(GALLERY, &base());
        let second = extractor.extract(GALLERY, &base());
        assert_eq!(first.attempts, second.attempts);
        assert_eq!(first.images, second.images);
        assert_eq!(first.videos, second.videos);
        assert_eq!(first.title, second.title);
    }

    #[test]
    fn test_relative_and_absolute_forms_collapse() {
        let extractor = PageExtractor::new(&CourierConfig::default(), Arc::new(HostRegistry::default()));
        let report = extractor.extract(GALLERY, &base());

        assert_eq!(report.title.as_deref(), Some("Beach Day"));
        assert_eq!(report.images.len(), 1);
        assert_eq!(report.images[0].url.as_str(), "https://forum.example.com/media/a.jpg");
        assert_eq!(report.images[0].source_host_tag, "forum.example.com");

        let videos: Vec<_> = report.videos.iter().map(|v| v.source_host_tag.as_str()).collect();
        assert_eq!(videos, vec!["vidoza", "streamtape"]);
        assert!(report.videos.iter().all(|v| v.discovered_via == DiscoveredVia::Link));
        assert_eq!(report.video_groups().len(), 2);
    }

    #[test]
    fn test_empty_page_is_not_an_error() {
        let extractor = PageExtractor::new(&CourierConfig::default(), Arc::new(HostRegistry::default()));
        let report = extractor.extract("<html><body><p>nothing here</p></body></html>", &base());
        assert!(report.is_empty());
        assert!(report.title.is_none());
        assert!(report
            .attempts
            .entries()
            .iter()
            .all(|a| a.outcome == AttemptOutcome::Empty));
        assert_eq!(report.attempts.for_type(ContentType::Image).count(), 4);
        assert_eq!(report.attempts.for_type(ContentType::Video).count(), 3);
    }
}
