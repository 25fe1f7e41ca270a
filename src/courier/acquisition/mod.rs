// Acquisition executor - downloads, validates and stores media artifacts
//
// Images run with bounded concurrency and keep page order. Every artifact
// is validated from its bytes before it leaves this module; failures are
// deleted on the spot.

mod segments;
mod storage;
mod validate;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use lazy_static::lazy_static;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use crate::courier::bypass::{BypassLadder, FetchConstraints};
use crate::courier::config::{AcquisitionConfig, CourierConfig};
use crate::courier::errors::{CourierError, ValidationFailure};
use crate::courier::models::{AttemptLog, HttpRequest, MediaArtifact, MediaCandidate, MediaKind, SignatureStatus};
use crate::courier::resolver::hls::MANIFEST_ACCEPT;
use crate::courier::resolver::VideoDescriptor;
use crate::courier::tools::remux_faststart;
use crate::courier::traits::Transport;
use crate::courier::utils::{backoff_delay, normalize_url, url_basename};

pub use segments::{download_segments, SegmentPolicy, SegmentReport};
pub use storage::RunStorage;
pub use validate::{looks_like_html, validate_file, validate_payload, ValidationRules};

pub const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";
pub const VIDEO_ACCEPT: &str = "video/*,*/*;q=0.8";

const MAX_BACKOFF_MS: u64 = 60_000;

/// Tried in order when a media URL keeps answering with HTML
const ALT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Android 14; Mobile; rv:121.0) Gecko/121.0 Firefox/121.0",
];

lazy_static! {
    static ref HOSTED_IMAGE: Selector =
        Selector::parse("img.pic, img#image, img.image, img.main-image").unwrap();
}

/// Full-size image embedded in an image host's viewer page
pub fn hosted_image(html: &str, page_url: &Url) -> Option<Url> {
    let document = Html::parse_document(html);
    document
        .select(&HOSTED_IMAGE)
        .filter_map(|el| el.value().attr("src"))
        .find_map(|src| normalize_url(src, page_url))
}

/// One download target with the headers it needs
struct Fetch<'a> {
    url: &'a Url,
    referer: Option<&'a str>,
    accept: &'a str,
    user_agent: &'a str,
}

pub struct Acquirer {
    transport: Arc<dyn Transport>,
    ladder: Arc<BypassLadder>,
    config: AcquisitionConfig,
    rules: ValidationRules,
    user_agent: String,
    media_timeout: Duration,
    ffmpeg: Option<String>,
    remux_timeout: Duration,
}

impl Acquirer {
    pub fn new(
        transport: Arc<dyn Transport>,
        ladder: Arc<BypassLadder>,
        config: &CourierConfig,
        ffmpeg: Option<String>,
    ) -> Self {
        Self {
            transport,
            ladder,
            config: config.acquisition.clone(),
            rules: ValidationRules::from(&config.acquisition),
            user_agent: config.network.user_agent.clone(),
            media_timeout: Duration::from_secs(config.network.media_timeout_secs),
            ffmpeg: ffmpeg.filter(|_| config.external.remux),
            remux_timeout: Duration::from_secs(config.external.timeout_secs),
        }
    }

    /// Download every image candidate, at most `image_concurrency` at a time.
    /// Results come back in candidate order.
    pub async fn acquire_images(
        &self,
        candidates: &[MediaCandidate],
        origin_page: &Url,
        storage: &RunStorage,
    ) -> Vec<Result<MediaArtifact, CourierError>> {
        let cap = self.config.image_concurrency.max(1);
        info!("[Acquire] {} images, {} at a time", candidates.len(), cap);

        stream::iter(candidates.iter().cloned())
            .map(|candidate| async move { self.acquire_image(&candidate, origin_page, storage).await })
            .buffered(cap)
            .collect()
            .await
    }

    pub async fn acquire_image(
        &self,
        candidate: &MediaCandidate,
        origin_page: &Url,
        storage: &RunStorage,
    ) -> Result<MediaArtifact, CourierError> {
        let referer = self.ladder.hosts().referer_for(&candidate.url, Some(origin_page));
        let dest = storage.allocate(MediaKind::Image, url_basename(&candidate.url).as_deref(), "jpg");
        let fetch = Fetch {
            url: &candidate.url,
            referer: referer.as_deref(),
            accept: IMAGE_ACCEPT,
            user_agent: &self.user_agent,
        };

        match self.download_validated(&fetch, &dest, MediaKind::Image).await {
            Ok(byte_size) => {
                debug!("[Acquire] ✓ {} ({} bytes)", candidate.url, byte_size);
                Ok(artifact(candidate, dest, byte_size, referer))
            }
            Err(e) => {
                warn!("[Acquire] ✗ {}: {}", candidate.url, e);
                discard(&dest).await;
                Err(e)
            }
        }
    }

    /// Turn a resolved video into a stored artifact
    pub async fn acquire_video(
        &self,
        candidate: &MediaCandidate,
        descriptor: VideoDescriptor,
        storage: &RunStorage,
    ) -> Result<MediaArtifact, CourierError> {
        let result = match descriptor {
            VideoDescriptor::DirectFile { url, referer } => {
                let dest = storage.allocate(MediaKind::Video, url_basename(&url).as_deref(), "mp4");
                let fetch = Fetch {
                    url: &url,
                    referer: referer.as_deref(),
                    accept: VIDEO_ACCEPT,
                    user_agent: &self.user_agent,
                };
                match self.download_validated(&fetch, &dest, MediaKind::Video).await {
                    Ok(size) => Ok((dest, size, referer)),
                    Err(e) => {
                        discard(&dest).await;
                        Err(e)
                    }
                }
            }
            VideoDescriptor::HlsIndex { url, referer } => self
                .acquire_hls(&url, referer.as_deref(), storage)
                .await
                .map(|(path, size)| (path, size, referer)),
            VideoDescriptor::LocalFile { path } => match validate_file(&path, MediaKind::Video, &self.rules).await {
                Ok(size) => Ok((path, size, None)),
                Err(e) => {
                    discard(&path).await;
                    Err(e.into())
                }
            },
        };

        match result {
            Ok((path, size, referer)) => {
                info!("[Acquire] ✓ video {} ({} bytes)", candidate.url, size);
                Ok(artifact(candidate, path, size, referer))
            }
            Err(e) => {
                warn!("[Acquire] ✗ video {}: {}", candidate.url, e);
                Err(e)
            }
        }
    }

    async fn acquire_hls(
        &self,
        index_url: &Url,
        referer: Option<&str>,
        storage: &RunStorage,
    ) -> Result<(PathBuf, u64), CourierError> {
        let ts = storage.allocate(MediaKind::Video, None, "ts");
        let mut template = HttpRequest::new(index_url.clone(), self.media_timeout).with_headers([
            ("User-Agent", self.user_agent.as_str()),
            ("Accept", MANIFEST_ACCEPT),
        ]);
        if let Some(referer) = referer {
            template.set_header("Referer", referer);
        }
        let policy = SegmentPolicy {
            max_failed: self.config.max_failed_segments,
            limit: self.config.segment_limit,
        };

        if let Err(e) = download_segments(self.transport.as_ref(), index_url, &template, &ts, policy).await {
            discard(&ts).await;
            return Err(e);
        }

        let path = match &self.ffmpeg {
            Some(ffmpeg) => {
                let mp4 = ts.with_extension("mp4");
                match remux_faststart(ffmpeg, &ts, &mp4, self.remux_timeout).await {
                    Ok(()) => {
                        discard(&ts).await;
                        mp4
                    }
                    Err(e) => {
                        warn!("[Acquire] Remux failed, sending transport stream: {}", e);
                        discard(&mp4).await;
                        ts
                    }
                }
            }
            None => ts,
        };

        match validate_file(&path, MediaKind::Video, &self.rules).await {
            Ok(size) => Ok((path, size)),
            Err(e) => {
                discard(&path).await;
                Err(e.into())
            }
        }
    }

    /// Retry loop around one download; only transient errors are retried.
    /// A 403 goes through the bypass ladder at most once per download.
    async fn download_validated(&self, fetch: &Fetch<'_>, dest: &Path, kind: MediaKind) -> Result<u64, CourierError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();
        let mut rerouted = false;

        for attempt in 1..=max_attempts {
            match self.download_once(fetch, dest, kind, &mut rerouted).await {
                Ok(size) => return Ok(size),
                Err(e) if e.is_transient() => {
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        let delay = backoff_delay(attempt - 1, self.config.base_backoff_ms, MAX_BACKOFF_MS);
                        debug!(
                            "[Acquire] Attempt {}/{} for {} failed ({}), retrying in {:?}",
                            attempt, max_attempts, fetch.url, e, delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(CourierError::AcquisitionExhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    async fn download_once(
        &self,
        fetch: &Fetch<'_>,
        dest: &Path,
        kind: MediaKind,
        rerouted: &mut bool,
    ) -> Result<u64, CourierError> {
        let request = self.request(fetch);
        let file = self.transport.download_to(&request, dest).await?;

        match file.status {
            200..=299 => self.check(fetch, dest, kind).await,
            403 if !*rerouted => {
                *rerouted = true;
                debug!("[Acquire] 403 for {}, rerouting through the bypass ladder", fetch.url);
                let constraints = FetchConstraints::binary(fetch.accept, fetch.referer.map(str::to_string));
                let mut log = AttemptLog::new();
                let page = self.ladder.fetch(fetch.url, &constraints, &mut log).await?;
                tokio::fs::write(dest, &page.body).await?;
                self.check(fetch, dest, kind).await
            }
            429 | 500..=599 => Err(CourierError::Network(format!("HTTP {} from {}", file.status, fetch.url))),
            status => Err(CourierError::HttpStatus {
                url: fetch.url.to_string(),
                status,
            }),
        }
    }

    async fn check(&self, fetch: &Fetch<'_>, dest: &Path, kind: MediaKind) -> Result<u64, CourierError> {
        match validate_file(dest, kind, &self.rules).await {
            Ok(size) => Ok(size),
            Err(ValidationFailure::HtmlPayload) => self.html_fallback(fetch, dest, kind).await,
            Err(e) => {
                discard(dest).await;
                Err(e.into())
            }
        }
    }

    /// The host answered with a page instead of media. For images, pull the
    /// one embedded in the host's viewer page; then retry the original URL
    /// under other user agents.
    async fn html_fallback(&self, fetch: &Fetch<'_>, dest: &Path, kind: MediaKind) -> Result<u64, CourierError> {
        let html = match kind {
            MediaKind::Image => tokio::fs::read_to_string(dest).await.unwrap_or_default(),
            MediaKind::Video => String::new(),
        };
        if let Some(image_url) = hosted_image(&html, fetch.url) {
            debug!("[Acquire] Hosted page {} embeds {}", fetch.url, image_url);
            let page = fetch.url.to_string();
            let inner = Fetch {
                url: &image_url,
                referer: Some(page.as_str()),
                accept: IMAGE_ACCEPT,
                user_agent: fetch.user_agent,
            };
            if let Ok(size) = self.fetch_plain(&inner, dest, kind).await {
                return Ok(size);
            }
        }

        for ua in ALT_USER_AGENTS {
            let alt = Fetch {
                url: fetch.url,
                referer: fetch.referer,
                accept: "*/*",
                user_agent: ua,
            };
            match self.fetch_plain(&alt, dest, kind).await {
                Ok(size) => {
                    debug!("[Acquire] ✓ {} accepted an alternate user agent", fetch.url);
                    return Ok(size);
                }
                Err(e) => debug!("[Acquire] Alternate user agent failed for {}: {}", fetch.url, e),
            }
        }

        discard(dest).await;
        Err(ValidationFailure::HtmlPayload.into())
    }

    /// Single attempt with no fallbacks
    async fn fetch_plain(&self, fetch: &Fetch<'_>, dest: &Path, kind: MediaKind) -> Result<u64, CourierError> {
        let file = self.transport.download_to(&self.request(fetch), dest).await?;
        if !(200..300).contains(&file.status) {
            return Err(CourierError::HttpStatus {
                url: fetch.url.to_string(),
                status: file.status,
            });
        }
        Ok(validate_file(dest, kind, &self.rules).await?)
    }

    fn request(&self, fetch: &Fetch<'_>) -> HttpRequest {
        let mut request = HttpRequest::new(fetch.url.clone(), self.media_timeout)
            .with_headers([("User-Agent", fetch.user_agent), ("Accept", fetch.accept)]);
        if let Some(referer) = fetch.referer {
            request.set_header("Referer", referer);
        }
        request
    }
}

fn artifact(candidate: &MediaCandidate, path: PathBuf, byte_size: u64, referrer_used: Option<String>) -> MediaArtifact {
    MediaArtifact {
        origin: candidate.clone(),
        path,
        byte_size,
        content_signature: SignatureStatus::Validated,
        referrer_used,
    }
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("[Acquire] Could not remove {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::courier::errors::TransportError;
    use crate::courier::hosts::HostRegistry;
    use crate::courier::models::DiscoveredVia;
    use crate::courier::testing::{jpeg_bytes, mp4_bytes, png_bytes, url, ScriptedTransport};

    const ORIGIN: &str = "https://forum.example.com/t/42";

    fn config() -> CourierConfig {
        let mut config = CourierConfig::default();
        config.acquisition.base_backoff_ms = 1;
        config.acquisition.min_video_bytes = 1000;
        config.ladder.retry_jitter_min_ms = 1;
        config.ladder.retry_jitter_max_ms = 1;
        config.ladder.transport_backoff_ms = 1;
        config
    }

    fn acquirer(transport: Arc<ScriptedTransport>, config: &CourierConfig) -> Acquirer {
        let ladder = Arc::new(BypassLadder::new(
            transport.clone(),
            None,
            Arc::new(HostRegistry::default()),
            config.ladder.clone(),
            config.network.user_agent.clone(),
        ));
        Acquirer::new(transport, ladder, config, None)
    }

    fn candidate(u: &str, kind: MediaKind) -> MediaCandidate {
        MediaCandidate {
            url: url(u),
            source_host_tag: "generic".to_string(),
            kind,
            discovered_via: DiscoveredVia::Link,
        }
    }

    #[tokio::test]
    async fn test_image_downloaded_with_origin_referer() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond_bytes("https://img.example/a.jpg", 200, "image/jpeg", jpeg_bytes(4000));
        let acq = acquirer(t.clone(), &config());
        let storage = RunStorage::new().unwrap();

        let art = acq
            .acquire_image(&candidate("https://img.example/a.jpg", MediaKind::Image), &url(ORIGIN), &storage)
            .await
            .unwrap();

        assert_eq!(art.byte_size, 4000);
        assert_eq!(art.content_signature, SignatureStatus::Validated);
        assert_eq!(art.referrer_used.as_deref(), Some(ORIGIN));
        assert!(art.path.exists());
        let req = &t.requests()[0];
        assert_eq!(req.header("Referer"), Some(ORIGIN));
        assert_eq!(req.header("Accept"), Some(IMAGE_ACCEPT));
    }

    #[tokio::test]
    async fn test_invalid_payloads_rejected_and_deleted() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond_bytes("https://img.example/small.jpg", 200, "image/jpeg", jpeg_bytes(999));
        // Advertised as an image, but the bytes say otherwise
        t.respond_bytes("https://img.example/fake.jpg", 200, "image/jpeg", vec![b'z'; 5000]);
        let acq = acquirer(t.clone(), &config());
        let storage = RunStorage::new().unwrap();
        let origin = url(ORIGIN);

        let small = acq
            .acquire_image(&candidate("https://img.example/small.jpg", MediaKind::Image), &origin, &storage)
            .await
            .unwrap_err();
        assert!(matches!(
            small,
            CourierError::ValidationFailed(ValidationFailure::TooSmall { size: 999, .. })
        ));

        let fake = acq
            .acquire_image(&candidate("https://img.example/fake.jpg", MediaKind::Image), &origin, &storage)
            .await
            .unwrap_err();
        assert!(matches!(fake, CourierError::ValidationFailed(ValidationFailure::BadSignature(_))));
        assert_eq!(storage.file_count(), 0);
        assert_eq!(t.request_count("https://img.example/fake.jpg"), 1);
    }

    #[tokio::test]
    async fn test_hosted_page_image_is_followed() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond(
            "https://imgbox.com/abc",
            200,
            "text/html",
            r#"<!DOCTYPE html><html><body><img id="image" class="x" src="/full/abc.png"></body></html>"#,
        );
        t.respond_bytes("https://imgbox.com/full/abc.png", 200, "image/png", png_bytes(3000));
        let acq = acquirer(t.clone(), &config());
        let storage = RunStorage::new().unwrap();

        let art = acq
            .acquire_image(&candidate("https://imgbox.com/abc", MediaKind::Image), &url(ORIGIN), &storage)
            .await
            .unwrap();
        assert_eq!(art.byte_size, 3000);
        let inner = t
            .requests()
            .into_iter()
            .find(|r| r.url.as_str() == "https://imgbox.com/full/abc.png")
            .unwrap();
        assert_eq!(inner.header("Referer"), Some("https://imgbox.com/abc"));
    }

    #[tokio::test]
    async fn test_html_answer_rotates_user_agents() {
        let t = Arc::new(ScriptedTransport::new());
        let page = "<html><body>please enable javascript</body></html>";
        t.respond("https://pics.test/p.jpg", 200, "text/html", page);
        t.respond("https://pics.test/p.jpg", 200, "text/html", page);
        t.respond_bytes("https://pics.test/p.jpg", 200, "image/jpeg", jpeg_bytes(2000));
        let acq = acquirer(t.clone(), &config());
        let storage = RunStorage::new().unwrap();

        let art = acq
            .acquire_image(&candidate("https://pics.test/p.jpg", MediaKind::Image), &url(ORIGIN), &storage)
            .await
            .unwrap();
        assert_eq!(art.byte_size, 2000);

        let requests = t.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2].header("User-Agent"), Some(ALT_USER_AGENTS[1]));
        assert_eq!(requests[2].header("Accept"), Some("*/*"));
    }

    #[tokio::test]
    async fn test_forbidden_is_rerouted_through_ladder() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond("https://cdn.test/v.jpg", 403, "text/html", "forbidden");
        t.respond_bytes("https://cdn.test/v.jpg", 200, "image/jpeg", jpeg_bytes(5000));
        let acq = acquirer(t.clone(), &config());
        let storage = RunStorage::new().unwrap();

        let art = acq
            .acquire_image(&candidate("https://cdn.test/v.jpg", MediaKind::Image), &url(ORIGIN), &storage)
            .await
            .unwrap();
        assert_eq!(art.byte_size, 5000);
        assert_eq!(t.request_count("https://cdn.test/v.jpg"), 2);
    }

    #[tokio::test]
    async fn test_forbidden_reroutes_only_once() {
        let t = Arc::new(ScriptedTransport::new());
        let mut cfg = config();
        cfg.ladder.transport_attempts = 2;
        t.respond("https://cdn.test/w.jpg", 403, "text/html", "forbidden");
        // The ladder's own attempts time out, then the host keeps refusing
        t.fail_then_respond("https://cdn.test/w.jpg", TransportError::Timeout, 2, 403, "forbidden");
        let acq = acquirer(t.clone(), &cfg);
        let storage = RunStorage::new().unwrap();

        let err = acq
            .acquire_image(&candidate("https://cdn.test/w.jpg", MediaKind::Image), &url(ORIGIN), &storage)
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::HttpStatus { status: 403, .. }));
        // first download, two ladder attempts, second download
        assert_eq!(t.request_count("https://cdn.test/w.jpg"), 4);
        assert_eq!(storage.file_count(), 0);
    }

    #[tokio::test]
    async fn test_html_answer_for_video_rotates_user_agents() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond(
            "https://cdn.test/clip.mp4",
            200,
            "text/html",
            "<html><body>Click to continue to your video</body></html>",
        );
        t.respond_bytes("https://cdn.test/clip.mp4", 200, "video/mp4", mp4_bytes(20_000));
        let acq = acquirer(t.clone(), &config());
        let storage = RunStorage::new().unwrap();

        let art = acq
            .acquire_video(
                &candidate("https://host.test/v/1", MediaKind::Video),
                VideoDescriptor::DirectFile {
                    url: url("https://cdn.test/clip.mp4"),
                    referer: None,
                },
                &storage,
            )
            .await
            .unwrap();
        assert_eq!(art.byte_size, 20_000);

        let requests = t.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].header("User-Agent"), Some(ALT_USER_AGENTS[0]));
        assert_eq!(requests[1].header("Accept"), Some("*/*"));
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_attempts() {
        let t = Arc::new(ScriptedTransport::new());
        t.fail_then_respond("https://cdn.test/slow.jpg", TransportError::Timeout, 5, 200, "late");
        let acq = acquirer(t.clone(), &config());
        let storage = RunStorage::new().unwrap();

        let err = acq
            .acquire_image(&candidate("https://cdn.test/slow.jpg", MediaKind::Image), &url(ORIGIN), &storage)
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::AcquisitionExhausted { attempts: 3, .. }));
        assert_eq!(t.request_count("https://cdn.test/slow.jpg"), 3);
    }

    #[tokio::test]
    async fn test_images_keep_page_order() {
        let t = Arc::new(ScriptedTransport::new());
        let candidates: Vec<_> = (0..8)
            .map(|i| {
                let u = format!("https://img.example/{}.jpg", i);
                if i == 3 {
                    t.respond_bytes(&u, 404, "text/html", Vec::new());
                } else {
                    t.respond_bytes(&u, 200, "image/jpeg", jpeg_bytes(1000 + i * 10));
                }
                candidate(&u, MediaKind::Image)
            })
            .collect();
        let acq = acquirer(t.clone(), &config());
        let storage = RunStorage::new().unwrap();

        let results = acq.acquire_images(&candidates, &url(ORIGIN), &storage).await;
        assert_eq!(results.len(), 8);
        for (i, result) in results.iter().enumerate() {
            match result {
                Ok(art) => assert_eq!(art.origin, candidates[i]),
                Err(_) => assert_eq!(i, 3),
            }
        }
    }

    #[tokio::test]
    async fn test_hls_video_assembled_from_segments() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond(
            "https://cdn.test/hls/index.m3u8",
            200,
            "application/vnd.apple.mpegurl",
            "#EXTM3U\n#EXTINF:4,\na.ts\n#EXTINF:4,\nb.ts\n#EXTINF:4,\nc.ts\n",
        );
        t.respond_bytes("https://cdn.test/hls/a.ts", 200, "video/mp2t", vec![0x47; 600]);
        t.respond_bytes("https://cdn.test/hls/c.ts", 200, "video/mp2t", vec![0x47; 600]);
        let acq = acquirer(t.clone(), &config());
        let storage = RunStorage::new().unwrap();
        let descriptor = VideoDescriptor::HlsIndex {
            url: url("https://cdn.test/hls/index.m3u8"),
            referer: Some("https://luluvid.com/".to_string()),
        };

        let art = acq
            .acquire_video(&candidate("https://luluvid.com/e/x", MediaKind::Video), descriptor, &storage)
            .await
            .unwrap();
        assert_eq!(art.byte_size, 1200);
        assert_eq!(art.path.extension().unwrap(), "ts");
        assert_eq!(art.referrer_used.as_deref(), Some("https://luluvid.com/"));
    }

    #[tokio::test]
    async fn test_direct_and_local_videos() {
        let t = Arc::new(ScriptedTransport::new());
        t.respond_bytes("https://cdn.test/clip.mp4", 200, "video/mp4", mp4_bytes(20_000));
        let acq = acquirer(t.clone(), &config());
        let storage = RunStorage::new().unwrap();
        let video = candidate("https://cdn.test/clip.mp4", MediaKind::Video);

        let direct = acq
            .acquire_video(
                &video,
                VideoDescriptor::DirectFile {
                    url: url("https://cdn.test/clip.mp4"),
                    referer: Some(ORIGIN.to_string()),
                },
                &storage,
            )
            .await
            .unwrap();
        assert_eq!(direct.byte_size, 20_000);
        assert_eq!(t.requests()[0].header("Accept"), Some(VIDEO_ACCEPT));

        let local = storage.path().join("tiny.mp4");
        tokio::fs::write(&local, mp4_bytes(10)).await.unwrap();
        let err = acq
            .acquire_video(&video, VideoDescriptor::LocalFile { path: local.clone() }, &storage)
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::ValidationFailed(ValidationFailure::TooSmall { .. })));
        assert!(!local.exists());
    }

    #[test]
    fn test_hosted_image_selectors() {
        let page = url("https://imagetwist.com/x/y.html");
        let html = r#"<img src="/logo.png"><img class="pic img" src="https://i.imagetwist.com/i/big.jpg">"#;
        assert_eq!(hosted_image(html, &page), Some(url("https://i.imagetwist.com/i/big.jpg")));
        assert_eq!(hosted_image("<img src='a.jpg'>", &page), None);
    }
}
