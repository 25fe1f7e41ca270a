// Host registry - per-host headers, referers and link patterns
//
// Site heuristics live here as data so that supporting a new host means
// appending a profile (in code or in the TOML config) rather than editing
// the extraction, bypass or resolution logic.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use super::models::MediaKind;

/// Everything the pipeline knows about one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostProfile {
    /// Short tag used for grouping and display (e.g. "streamtape")
    pub tag: String,
    /// Registrable domains; subdomains match too
    pub domains: Vec<String>,
    /// What this host serves; None for plain content sites
    #[serde(default)]
    pub kind: Option<MediaKind>,
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
    /// Extra headers sent on the site-specific bypass rung
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Skip page inspection and hand the URL straight to the external downloader
    #[serde(default)]
    pub prefer_external_tool: bool,
    /// Politeness delay before the site-specific rung, in milliseconds
    #[serde(default)]
    pub delay_ms: u64,
    /// Regex recognizing this host's media pages in free text
    #[serde(default)]
    pub link_pattern: Option<String>,
}

impl HostProfile {
    fn new(tag: &str, domains: &[&str], kind: Option<MediaKind>) -> Self {
        Self {
            tag: tag.to_string(),
            domains: domains.iter().map(|d| d.to_string()).collect(),
            kind,
            referer: None,
            origin: None,
            headers: BTreeMap::new(),
            prefer_external_tool: false,
            delay_ms: 0,
            link_pattern: None,
        }
    }

    fn video(tag: &str, domains: &[&str]) -> Self {
        Self::new(tag, domains, Some(MediaKind::Video))
    }

    fn image(tag: &str, domains: &[&str]) -> Self {
        Self::new(tag, domains, Some(MediaKind::Image))
    }

    fn with_referer(mut self, referer: &str) -> Self {
        self.referer = Some(referer.to_string());
        self
    }

    fn with_pattern(mut self, pattern: &str) -> Self {
        self.link_pattern = Some(pattern.to_string());
        self
    }

    fn external(mut self) -> Self {
        self.prefer_external_tool = true;
        self
    }

    /// Whether `host` is one of this profile's domains or a subdomain of one
    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.trim_start_matches("www.").to_ascii_lowercase();
        self.domains.iter().any(|d| {
            let d = d.to_ascii_lowercase();
            host == d || host.ends_with(&format!(".{}", d))
        })
    }

    /// Text pattern for this host, derived from its domains when not given
    fn text_pattern(&self) -> String {
        if let Some(p) = &self.link_pattern {
            return p.clone();
        }
        let alternatives: Vec<String> = self.domains.iter().map(|d| regex::escape(d)).collect();
        format!(
            r#"https?://(?:www\.)?(?:{})/[^\s"'<>]+"#,
            alternatives.join("|")
        )
    }
}

/// Built-in host profiles
pub fn default_profiles() -> Vec<HostProfile> {
    vec![
        // Video hosts
        HostProfile::video("vidoza", &["vidoza.net", "vidoza.co"])
            .with_referer("https://vidoza.net/")
            .with_pattern(r"https?://(?:www\.)?vidoza\.(?:net|co)/[a-zA-Z0-9]+\.html"),
        HostProfile::video("streamtape", &["streamtape.com", "streamtape.to", "streamtape.net"])
            .with_referer("https://streamtape.com/")
            .with_pattern(
                r"https?://(?:www\.)?streamtape\.(?:to|com|net)/(?:v|e)/[a-zA-Z0-9]+(?:/[^/\s<>]*)?(?:\.html)?",
            ),
        HostProfile::video("stream2z", &["stream2z.com"]).with_referer("https://stream2z.com/"),
        HostProfile::video("luluvid", &["luluvid.com", "luluvdo.com"]).with_referer("https://luluvid.com/"),
        HostProfile::video("doodstream", &["doodstream.com", "dood.to", "dood.watch", "dood.so", "d000d.com"]).external(),
        HostProfile::video("streamlare", &["streamlare.com"]).external(),
        HostProfile::video("upstream", &["upstream.to"]),
        HostProfile::video("streamhub", &["streamhub.to"]),
        HostProfile::video("streamwish", &["streamwish.com", "streamwish.to"]),
        HostProfile::video("filemoon", &["filemoon.sx", "filemoon.to"]),
        HostProfile::video("streamvid", &["streamvid.net"]),
        HostProfile::video("voe", &["voe.sx"]),
        HostProfile::video("youtube", &["youtube.com", "youtu.be"]).external(),
        HostProfile::video("vimeo", &["vimeo.com"]).external(),
        HostProfile::video("dailymotion", &["dailymotion.com"]).external(),
        // Image hosts
        HostProfile::image("imagetwist", &["imagetwist.com"]).with_referer("https://imagetwist.com/"),
        HostProfile::image("imgbox", &["imgbox.com"]).with_referer("https://imgbox.com/"),
        HostProfile::image("imagebam", &["imagebam.com"]).with_referer("https://imagebam.com/"),
        HostProfile::image("imgur", &["imgur.com"]),
        HostProfile::image("postimg", &["postimg.cc", "postimages.org"]),
        HostProfile::image("pixhost", &["pixhost.org", "pixhost.to"]),
        HostProfile::image("imgpile", &["imgpile.com"]),
        HostProfile::image("imgbb", &["imgbb.com", "ibb.co"]),
        HostProfile::image("freeimage", &["freeimage.host"]),
        HostProfile::image("imgshare", &["imgshare.net"]),
        HostProfile::image("hotpic", &["hotpic.cc", "hotpic.com"]),
    ]
}

/// Lookup structure over the configured profiles
#[derive(Debug, Clone)]
pub struct HostRegistry {
    profiles: Vec<HostProfile>,
    video_patterns: Vec<(usize, Regex)>,
}

impl HostRegistry {
    pub fn new(profiles: Vec<HostProfile>) -> Self {
        let mut video_patterns = Vec::new();
        for (i, profile) in profiles.iter().enumerate() {
            if profile.kind != Some(MediaKind::Video) {
                continue;
            }
            match Regex::new(&profile.text_pattern()) {
                Ok(re) => video_patterns.push((i, re)),
                Err(e) => warn!("[Hosts] Skipping invalid link pattern for {}: {}", profile.tag, e),
            }
        }
        Self {
            profiles,
            video_patterns,
        }
    }

    pub fn profiles(&self) -> &[HostProfile] {
        &self.profiles
    }

    pub fn lookup(&self, url: &Url) -> Option<&HostProfile> {
        let host = url.host_str()?;
        self.profiles.iter().find(|p| p.matches_host(host))
    }

    /// Registered profile of the given kind serving this URL
    pub fn lookup_kind(&self, url: &Url, kind: MediaKind) -> Option<&HostProfile> {
        self.lookup(url).filter(|p| p.kind == Some(kind))
    }

    pub fn is_video_host(&self, url: &Url) -> bool {
        self.lookup_kind(url, MediaKind::Video).is_some()
    }

    pub fn is_image_host(&self, url: &Url) -> bool {
        self.lookup_kind(url, MediaKind::Image).is_some()
    }

    /// Tag used for grouping: the profile tag, else the bare host name
    pub fn tag_for(&self, url: &Url) -> String {
        match self.lookup(url) {
            Some(p) => p.tag.clone(),
            None => url
                .host_str()
                .map(|h| h.trim_start_matches("www.").to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }

    /// Referer for hotlink-protected fetches; falls back to the origin page
    pub fn referer_for(&self, url: &Url, origin_page: Option<&Url>) -> Option<String> {
        self.lookup(url)
            .and_then(|p| p.referer.clone())
            .or_else(|| origin_page.map(|u| u.to_string()))
    }

    /// Headers for the site-specific bypass rung. Unregistered hosts get a
    /// same-origin profile derived from the URL itself.
    pub fn site_headers(&self, url: &Url) -> Vec<(String, String)> {
        let site_root = origin_of(url);
        let mut headers = Vec::new();

        match self.lookup(url) {
            Some(profile) => {
                let referer = profile.referer.clone().unwrap_or_else(|| format!("{}/", site_root));
                let origin = profile.origin.clone().unwrap_or_else(|| site_root.clone());
                headers.push(("Referer".to_string(), referer));
                headers.push(("Origin".to_string(), origin));
                for (k, v) in &profile.headers {
                    headers.push((k.clone(), v.clone()));
                }
            }
            None => {
                headers.push(("Referer".to_string(), format!("{}/", site_root)));
                headers.push(("Origin".to_string(), site_root));
            }
        }

        if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("Sec-Fetch-Site")) {
            headers.push(("Sec-Fetch-Site".to_string(), "same-origin".to_string()));
        }
        headers
    }

    /// Politeness delay configured for the host
    pub fn delay_for(&self, url: &Url) -> u64 {
        self.lookup(url).map(|p| p.delay_ms).unwrap_or(0)
    }

    /// Video-host URLs found in free text, tagged, in match order
    pub fn scan_video_text(&self, text: &str) -> Vec<(String, String)> {
        let mut found = Vec::new();
        for (i, re) in &self.video_patterns {
            for m in re.find_iter(text) {
                let url = m.as_str().trim_end_matches(['.', ',', ')', ';']);
                found.push((self.profiles[*i].tag.clone(), url.to_string()));
            }
        }
        found
    }
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self::new(default_profiles())
    }
}

/// `scheme://host[:port]` of a URL
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}
