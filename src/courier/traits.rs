// Collaborator traits - HTTP transport, scripted browser, destination, stream downloader

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use url::Url;

use super::errors::{DestinationError, ResolutionFailure, TransportError};
use super::models::{
    DeliveryTarget, DownloadedFile, EventKind, HttpRequest, HttpResponse, PipelineEvent, SessionId,
    VideoAttributes,
};

/// Plain HTTP fetching
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch and buffer the whole body
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Stream the body into `dest`. Non-2xx responses write nothing.
    async fn download_to(
        &self,
        request: &HttpRequest,
        dest: &Path,
    ) -> Result<DownloadedFile, TransportError>;
}

/// Fetcher that runs the page's anti-bot challenge in a real browser
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    /// Name of the solver (for logging)
    fn name(&self) -> &'static str;

    /// Load `request.url` and return the rendered document
    async fn solve(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Messaging destination that receives the delivered media
#[async_trait]
pub trait Destination: Send + Sync {
    /// Name of the destination (for logging)
    fn name(&self) -> &'static str;

    async fn send_text(&self, target: &DeliveryTarget, text: &str) -> Result<(), DestinationError>;

    async fn send_photo(&self, target: &DeliveryTarget, path: &Path) -> Result<(), DestinationError>;

    /// Videos are sent without caption
    async fn send_video(
        &self,
        target: &DeliveryTarget,
        path: &Path,
        attributes: &VideoAttributes,
    ) -> Result<(), DestinationError>;
}

/// What the external stream downloader should fetch
#[derive(Debug, Clone)]
pub struct StreamJob {
    pub url: Url,
    pub referer: Option<String>,
    pub user_agent: String,
    pub output_dir: PathBuf,
    /// File stem; the tool picks the extension
    pub stem: String,
}

/// General-purpose stream downloader that resolves and downloads in one step
#[async_trait]
pub trait StreamDownloader: Send + Sync {
    /// Name of the downloader (for logging)
    fn name(&self) -> &'static str;

    /// Check if this downloader can run at all
    fn is_available(&self) -> bool;

    /// Download the stream; returns the file written to local storage
    async fn download(&self, job: &StreamJob) -> Result<PathBuf, ResolutionFailure>;
}

/// Progress emitter for one request
#[derive(Clone)]
pub struct EventEmitter {
    sender: UnboundedSender<PipelineEvent>,
    request_id: u64,
    session_id: SessionId,
}

impl EventEmitter {
    pub fn new(sender: UnboundedSender<PipelineEvent>, request_id: u64, session_id: SessionId) -> Self {
        Self {
            sender,
            request_id,
            session_id,
        }
    }

    pub fn emit(&self, kind: EventKind) {
        let _ = self.sender.send(PipelineEvent {
            request_id: self.request_id,
            session_id: self.session_id.clone(),
            kind,
        });
    }

    pub fn status(&self, text: impl Into<String>) {
        self.emit(EventKind::Status { text: text.into() });
    }
}
