// Player page scanning - direct files, jwplayer setups, script-embedded streams

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use super::token::has_token_script;
use crate::courier::utils::normalize_url;

lazy_static! {
    static ref HTML5_PLAYER: Selector = Selector::parse("video#player_html5_api[src]").unwrap();
    static ref MP4_SOURCE: Selector = Selector::parse(r#"source[type="video/mp4"][src]"#).unwrap();
    static ref ANY_VIDEO: Selector = Selector::parse("video[src], video source[src]").unwrap();
    static ref SCRIPT: Selector = Selector::parse("script").unwrap();
    static ref JWPLAYER_FILE: Regex = Regex::new(
        r#"(?is)jwplayer\s*\(\s*["'][^"']*["']\s*\)\s*\.setup\s*\(\s*\{.*?sources\s*:\s*\[\s*\{[^}]*?file\s*:\s*["']([^"']+)["']"#
    )
    .unwrap();
    static ref SCRIPT_MP4: Regex = Regex::new(r#"https?://[^"'\s<>]+?\.mp4(?:\?[^"'\s<>]*)?"#).unwrap();
    static ref SCRIPT_M3U8: Regex = Regex::new(r#"https?://[^"'\s<>]+?\.m3u8(?:\?[^"'\s<>]*)?"#).unwrap();
}

/// What a player page turned out to contain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageFinding {
    DirectFile(Url),
    HlsMaster(Url),
    /// Token-building script present; decode against the same body
    TokenRedirect,
    Nothing,
}

fn classify(url: Url) -> PageFinding {
    if url.path().to_ascii_lowercase().ends_with(".m3u8") {
        PageFinding::HlsMaster(url)
    } else {
        PageFinding::DirectFile(url)
    }
}

/// Stream kind implied by the URL alone, without fetching anything
pub fn classify_by_extension(url: &Url) -> Option<PageFinding> {
    let path = url.path().to_ascii_lowercase();
    if path.ends_with(".mp4") {
        Some(PageFinding::DirectFile(url.clone()))
    } else if path.ends_with(".m3u8") {
        Some(PageFinding::HlsMaster(url.clone()))
    } else {
        None
    }
}

/// Scan a player page for a playable stream, strongest signal first
pub fn scan_player_page(html: &str, page_url: &Url) -> PageFinding {
    let doc = Html::parse_document(html);
    let resolve = |raw: &str| normalize_url(raw, page_url);

    let html5 = doc
        .select(&HTML5_PLAYER)
        .filter_map(|el| el.value().attr("src"))
        .find(|src| src.ends_with(".mp4"))
        .and_then(resolve);
    if let Some(url) = html5 {
        return PageFinding::DirectFile(url);
    }

    let typed = doc
        .select(&MP4_SOURCE)
        .filter_map(|el| el.value().attr("src"))
        .find(|src| src.ends_with(".mp4"))
        .and_then(resolve);
    if let Some(url) = typed {
        return PageFinding::DirectFile(url);
    }

    let any = doc
        .select(&ANY_VIDEO)
        .filter_map(|el| el.value().attr("src"))
        .find(|src| src.contains(".mp4"))
        .and_then(resolve);
    if let Some(url) = any {
        return PageFinding::DirectFile(url);
    }

    let scripts: String = doc
        .select(&SCRIPT)
        .map(|s| s.text().collect::<String>())
        .collect::<Vec<_>>()
        .join("\n");

    if let Some(url) = JWPLAYER_FILE
        .captures(&scripts)
        .and_then(|c| c.get(1))
        .and_then(|m| resolve(m.as_str()))
    {
        return classify(url);
    }

    if has_token_script(html) {
        return PageFinding::TokenRedirect;
    }

    if let Some(url) = SCRIPT_MP4.find(&scripts).and_then(|m| Url::parse(m.as_str()).ok()) {
        return PageFinding::DirectFile(url);
    }
    if let Some(url) = SCRIPT_M3U8.find(&scripts).and_then(|m| Url::parse(m.as_str()).ok()) {
        return PageFinding::HlsMaster(url);
    }

    PageFinding::Nothing
}
