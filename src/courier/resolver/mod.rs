// Video resolution - turns a video candidate into something fetchable
//
// State machine per candidate:
//   Unresolved -> DirectFile -> Ready
//   Unresolved -> HlsMaster -> HlsIndex -> Ready
//   Unresolved -> TokenRedirect -> DirectFile -> Ready
//   TokenRedirect (decode failure) -> ExternalTool -> Ready
//   any -> Failed(reason)

pub mod external;
pub mod hls;
pub mod page;
pub mod token;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Url;

use crate::courier::bypass::{BypassLadder, FetchConstraints};
use crate::courier::errors::ResolutionFailure;
use crate::courier::models::{AttemptLog, MediaCandidate};
use crate::courier::traits::{StreamDownloader, StreamJob};
use crate::courier::utils::sanitize_file_stem;

use hls::{locate_index, MANIFEST_ACCEPT};
use page::{classify_by_extension, scan_player_page, PageFinding};
use token::{decode_token_redirect, watch_url};

pub use external::YtDlpDownloader;

/// Resolved form of a video, ready for acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoDescriptor {
    DirectFile { url: Url, referer: Option<String> },
    /// Index playlist; segments are fetched during acquisition
    HlsIndex { url: Url, referer: Option<String> },
    /// Already downloaded by the external tool
    LocalFile { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionState {
    Unresolved,
    DirectFile(Url),
    HlsMaster(Url),
    HlsIndex(Url),
    /// Page body carrying the token script
    TokenRedirect(String),
    ExternalTool,
    Ready(VideoDescriptor),
    Failed(ResolutionFailure),
}

impl ResolutionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::DirectFile(_) => "direct-file",
            Self::HlsMaster(_) => "hls-master",
            Self::HlsIndex(_) => "hls-index",
            Self::TokenRedirect(_) => "token-redirect",
            Self::ExternalTool => "external-tool",
            Self::Ready(_) => "ready",
            Self::Failed(_) => "failed",
        }
    }
}

/// Outcome of one resolution plus the states it went through
#[derive(Debug, Clone)]
pub struct Resolution {
    pub result: Result<VideoDescriptor, ResolutionFailure>,
    pub trace: Vec<&'static str>,
}

pub struct VideoResolver {
    ladder: Arc<BypassLadder>,
    downloader: Arc<dyn StreamDownloader>,
    user_agent: String,
    counter: AtomicUsize,
}

impl VideoResolver {
    pub fn new(ladder: Arc<BypassLadder>, downloader: Arc<dyn StreamDownloader>, user_agent: String) -> Self {
        Self {
            ladder,
            downloader,
            user_agent,
            counter: AtomicUsize::new(0),
        }
    }

    pub async fn resolve(
        &self,
        candidate: &MediaCandidate,
        origin_page: &Url,
        storage_dir: &Path,
        log: &mut AttemptLog,
    ) -> Result<VideoDescriptor, ResolutionFailure> {
        self.resolve_traced(candidate, origin_page, storage_dir, log)
            .await
            .result
    }

    /// Drive the state machine to Ready or Failed
    pub async fn resolve_traced(
        &self,
        candidate: &MediaCandidate,
        origin_page: &Url,
        storage_dir: &Path,
        log: &mut AttemptLog,
    ) -> Resolution {
        let direct = classify_by_extension(&candidate.url).is_some();
        // Streams linked straight from the page are hotlinked from it;
        // player pages are the referer of the streams they embed
        let referer_base = if direct { origin_page } else { &candidate.url };
        let referer = self
            .ladder
            .hosts()
            .referer_for(&candidate.url, Some(referer_base));

        let mut state = ResolutionState::Unresolved;
        let mut trace = vec![state.name()];

        loop {
            state = match state {
                ResolutionState::Unresolved => self.inspect(candidate, origin_page, log).await,
                ResolutionState::DirectFile(url) => ResolutionState::Ready(VideoDescriptor::DirectFile {
                    url,
                    referer: referer.clone(),
                }),
                ResolutionState::HlsMaster(url) => self.open_master(&url, referer.clone(), log).await,
                ResolutionState::HlsIndex(url) => ResolutionState::Ready(VideoDescriptor::HlsIndex {
                    url,
                    referer: referer.clone(),
                }),
                ResolutionState::TokenRedirect(body) => match decode_token_redirect(&body) {
                    Ok(url) => ResolutionState::DirectFile(url),
                    Err(e) => {
                        warn!("[Resolver] {} for {}, falling back to external tool", e, candidate.url);
                        ResolutionState::ExternalTool
                    }
                },
                ResolutionState::ExternalTool => {
                    self.run_external(candidate, referer.clone(), storage_dir).await
                }
                ResolutionState::Ready(descriptor) => {
                    info!("[Resolver] ✓ {} -> {:?}", candidate.url, trace);
                    return Resolution {
                        result: Ok(descriptor),
                        trace,
                    };
                }
                ResolutionState::Failed(reason) => {
                    warn!("[Resolver] ✗ {}: {}", candidate.url, reason);
                    return Resolution {
                        result: Err(reason),
                        trace,
                    };
                }
            };
            trace.push(state.name());
        }
    }

    /// Unresolved: classify without fetching when possible, else scan the page
    async fn inspect(&self, candidate: &MediaCandidate, origin_page: &Url, log: &mut AttemptLog) -> ResolutionState {
        if let Some(finding) = classify_by_extension(&candidate.url) {
            return finding_state(finding, String::new());
        }

        let prefers_external = self
            .ladder
            .hosts()
            .lookup(&candidate.url)
            .map_or(false, |p| p.prefer_external_tool);
        if prefers_external {
            debug!("[Resolver] {} prefers the external tool", candidate.url);
            return ResolutionState::ExternalTool;
        }

        let mut urls = vec![candidate.url.clone()];
        let watch = watch_url(&candidate.url);
        if watch != candidate.url {
            urls.push(watch);
        }

        let mut last_error = None;
        for url in urls {
            let constraints = FetchConstraints::page().with_referer(Some(origin_page.to_string()));
            match self.ladder.fetch(&url, &constraints, log).await {
                Ok(page) => {
                    let body = page.text();
                    let finding = scan_player_page(&body, &page.effective_url);
                    debug!("[Resolver] {} -> {:?}", url, finding);
                    if finding != PageFinding::Nothing {
                        return finding_state(finding, body);
                    }
                    last_error = None;
                }
                Err(e) => {
                    warn!("[Resolver] Player page {} unavailable: {}", url, e);
                    last_error = Some(e.to_string());
                }
            }
        }

        match last_error {
            Some(_) if self.downloader.is_available() => ResolutionState::ExternalTool,
            Some(e) => ResolutionState::Failed(ResolutionFailure::PageUnavailable(e)),
            None => ResolutionState::Failed(ResolutionFailure::NoStreamFound(candidate.url.to_string())),
        }
    }

    /// HlsMaster: fetch the master and pick its index playlist
    async fn open_master(&self, url: &Url, referer: Option<String>, log: &mut AttemptLog) -> ResolutionState {
        let constraints = FetchConstraints::binary(MANIFEST_ACCEPT, referer);
        match self.ladder.fetch(url, &constraints, log).await {
            Ok(page) => match locate_index(&page.effective_url, &page.text()) {
                Ok(index) => ResolutionState::HlsIndex(index),
                Err(e) => ResolutionState::Failed(e),
            },
            Err(e) => ResolutionState::Failed(ResolutionFailure::PageUnavailable(e.to_string())),
        }
    }

    /// ExternalTool: resolve and download in one step
    async fn run_external(
        &self,
        candidate: &MediaCandidate,
        referer: Option<String>,
        storage_dir: &Path,
    ) -> ResolutionState {
        if !self.downloader.is_available() {
            return ResolutionState::Failed(ResolutionFailure::ExternalToolUnavailable);
        }
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let job = StreamJob {
            url: candidate.url.clone(),
            referer,
            user_agent: self.user_agent.clone(),
            output_dir: storage_dir.to_path_buf(),
            stem: sanitize_file_stem(&format!("video-{}-{}", candidate.source_host_tag, n)),
        };
        info!("[Resolver] {} via {}", candidate.url, self.downloader.name());
        match self.downloader.download(&job).await {
            Ok(path) => ResolutionState::Ready(VideoDescriptor::LocalFile { path }),
            Err(e) => ResolutionState::Failed(e),
        }
    }
}

fn finding_state(finding: PageFinding, body: String) -> ResolutionState {
    match finding {
        PageFinding::DirectFile(url) => ResolutionState::DirectFile(url),
        PageFinding::HlsMaster(url) => ResolutionState::HlsMaster(url),
        PageFinding::TokenRedirect => ResolutionState::TokenRedirect(body),
        PageFinding::Nothing => ResolutionState::Failed(ResolutionFailure::NoStreamFound(String::new())),
    }
}
