// Image strategies: host signatures, gallery markup, content area, generic scan

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use scraper::Selector;
use url::Url;

use super::traits::{image_source, parent_link, ExtractionStrategy, PageDocument, RawCandidate};
use crate::courier::hosts::HostRegistry;
use crate::courier::models::DiscoveredVia;

pub const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp"];
const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".webm", ".mov", ".m4v"];

lazy_static! {
    static ref IMG: Selector = Selector::parse("img").unwrap();
    static ref ANCHOR: Selector = Selector::parse("a[href]").unwrap();
    static ref GALLERY_IMAGES: Selector =
        Selector::parse("img.rounded.object-contain.shadow-lg, img.img-front").unwrap();
    static ref SPOTLIGHT: Selector = Selector::parse("a.spotlight[href]").unwrap();
    static ref CONTENT_AREAS: Vec<Selector> = [
        r#"div[data-role="commentContent"]"#,
        "div.content",
        "main",
        "article",
        "body",
    ]
    .iter()
    .map(|s| Selector::parse(s).unwrap())
    .collect();
    static ref IMAGE_URL_TEXT: Regex = Regex::new(
        r#"(?i)https?://[^\s"'<>()]+?\.(?:jpe?g|png|gif|webp|bmp)(?:\?[^\s"'<>()]*)?"#
    )
    .unwrap();
    static ref WP_SIZE_VARIANT: Regex = Regex::new(
        r"(?i)^(?P<stem>.+?)-(?:\d+x\d+|scaled|thumbnail|thumb|small|medium|large)(?P<ext>\.(?:jpe?g|png|gif|webp))$"
    )
    .unwrap();
}

pub fn has_image_extension(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

pub fn has_video_extension(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn is_wp_upload(url: &Url) -> bool {
    url.path().contains("/wp-content/uploads/")
}

/// Full-size variant of image-host thumbnail paths (`/th/` -> `/i/`)
pub fn full_size_host_url(url: Url) -> Url {
    if !url.path().contains("/th/") {
        return url;
    }
    let mut out = url.clone();
    out.set_path(&url.path().replacen("/th/", "/i/", 1));
    out
}

/// Original upload behind a WordPress size variant (`-300x200`, `-scaled`, ...)
pub fn wordpress_original(url: Url) -> Url {
    if !is_wp_upload(&url) {
        return url;
    }
    let path = url.path().to_string();
    match WP_SIZE_VARIANT.captures(&path) {
        Some(caps) => {
            let mut out = url.clone();
            out.set_path(&format!("{}{}", &caps["stem"], &caps["ext"]));
            out
        }
        None => url,
    }
}

/// Images served from registered image hosts or WordPress uploads
pub struct HostSignatureImages {
    hosts: Arc<HostRegistry>,
}

impl HostSignatureImages {
    pub fn new(hosts: Arc<HostRegistry>) -> Self {
        Self { hosts }
    }
}

impl ExtractionStrategy for HostSignatureImages {
    type Item = RawCandidate;

    fn name(&self) -> &'static str {
        "host-signature-images"
    }

    fn attempt(&self, page: &PageDocument) -> Result<Vec<RawCandidate>, String> {
        let mut out = Vec::new();
        for img in page.html.select(&IMG) {
            let linked = parent_link(&img)
                .and_then(|href| page.absolute(&href))
                .filter(|u| self.hosts.is_image_host(u));
            if let Some(href) = linked {
                out.push(RawCandidate::new(href, DiscoveredVia::Link));
                continue;
            }

            let src = image_source(&img).and_then(|s| page.absolute(&s));
            if let Some(src) = src {
                if self.hosts.is_image_host(&src) || is_wp_upload(&src) {
                    out.push(RawCandidate::new(full_size_host_url(src), DiscoveredVia::Embed));
                }
            }
        }
        Ok(out)
    }
}

/// Gallery-style markup (lazy images and spotlight links)
pub struct GalleryMarkupImages;

impl ExtractionStrategy for GalleryMarkupImages {
    type Item = RawCandidate;

    fn name(&self) -> &'static str {
        "gallery-markup-images"
    }

    fn attempt(&self, page: &PageDocument) -> Result<Vec<RawCandidate>, String> {
        let mut out = Vec::new();
        for img in page.html.select(&GALLERY_IMAGES) {
            if let Some(url) = image_source(&img).and_then(|s| page.absolute(&s)) {
                out.push(RawCandidate::new(url, DiscoveredVia::Embed));
            }
        }
        for link in page.html.select(&SPOTLIGHT) {
            let url = link.value().attr("href").and_then(|h| page.absolute(h));
            if let Some(url) = url.filter(|u| !has_video_extension(u)) {
                out.push(RawCandidate::new(url, DiscoveredVia::Link));
            }
        }
        Ok(out)
    }
}

/// Every image inside the main content container
pub struct ContentAreaImages {
    hosts: Arc<HostRegistry>,
}

impl ContentAreaImages {
    pub fn new(hosts: Arc<HostRegistry>) -> Self {
        Self { hosts }
    }
}

impl ExtractionStrategy for ContentAreaImages {
    type Item = RawCandidate;

    fn name(&self) -> &'static str {
        "content-area-images"
    }

    fn attempt(&self, page: &PageDocument) -> Result<Vec<RawCandidate>, String> {
        let area = CONTENT_AREAS
            .iter()
            .find_map(|sel| page.html.select(sel).next());
        let Some(area) = area else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        for img in area.select(&IMG) {
            let linked = parent_link(&img)
                .and_then(|href| page.absolute(&href))
                .filter(|u| self.hosts.is_image_host(u) || has_image_extension(u));
            if let Some(href) = linked {
                out.push(RawCandidate::new(href, DiscoveredVia::Link));
                continue;
            }
            if let Some(src) = image_source(&img).and_then(|s| page.absolute(&s)) {
                out.push(RawCandidate::new(full_size_host_url(src), DiscoveredVia::Embed));
            }
        }
        Ok(out)
    }
}

/// Anchors and free text ending in an image extension
pub struct GenericPatternImages;

impl ExtractionStrategy for GenericPatternImages {
    type Item = RawCandidate;

    fn name(&self) -> &'static str {
        "generic-pattern-images"
    }

    fn attempt(&self, page: &PageDocument) -> Result<Vec<RawCandidate>, String> {
        let mut out = Vec::new();
        for a in page.html.select(&ANCHOR) {
            let url = a.value().attr("href").and_then(|h| page.absolute(h));
            if let Some(url) = url.filter(has_image_extension) {
                out.push(RawCandidate::new(url, DiscoveredVia::Link));
            }
        }
        for m in IMAGE_URL_TEXT.find_iter(&page.text()) {
            if let Some(url) = page.absolute(m.as_str()) {
                out.push(RawCandidate::new(url, DiscoveredVia::TextPattern));
            }
        }
        Ok(out)
    }
}

/// Image strategies in priority order
pub fn default_image_strategies(
    hosts: Arc<HostRegistry>,
) -> Vec<Box<dyn ExtractionStrategy<Item = RawCandidate>>> {
    vec![
        Box::new(HostSignatureImages::new(hosts.clone())),
        Box::new(GalleryMarkupImages),
        Box::new(ContentAreaImages::new(hosts)),
        Box::new(GenericPatternImages),
    ]
}
