// Common data models for the courier pipeline

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

/// Identifier of the requester conversation (chat, console, ...)
pub type SessionId = String;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// One inbound URL to process. Immutable once created.
#[derive(Debug, Clone)]
pub struct ContentRequest {
    pub id: u64,
    pub source_url: Url,
    pub requester_session_id: SessionId,
    pub created_at: OffsetDateTime,
}

impl ContentRequest {
    pub fn new(source_url: Url, requester_session_id: impl Into<SessionId>) -> Self {
        Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            source_url,
            requester_session_id: requester_session_id.into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// What a strategy (or bypass rung) was trying to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Page body fetched through the bypass ladder
    Page,
    Title,
    Image,
    Video,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Page => write!(f, "page"),
            Self::Title => write!(f, "title"),
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Success,
    Empty,
    Error { kind: String, detail: String },
}

impl AttemptOutcome {
    pub fn error(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Error {
            kind: kind.into(),
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// One strategy invocation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionAttempt {
    pub strategy_name: String,
    pub content_type: ContentType,
    pub outcome: AttemptOutcome,
    pub produced_items: usize,
}

/// Append-only, ordered log of attempts for one request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttemptLog {
    entries: Vec<ExtractionAttempt>,
}

impl AttemptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, attempt: ExtractionAttempt) {
        self.entries.push(attempt);
    }

    pub fn entries(&self) -> &[ExtractionAttempt] {
        &self.entries
    }

    pub fn for_type(&self, content_type: ContentType) -> impl Iterator<Item = &ExtractionAttempt> {
        self.entries
            .iter()
            .filter(move |a| a.content_type == content_type)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn extend(&mut self, other: AttemptLog) {
        self.entries.extend(other.entries);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveredVia {
    Link,
    TextPattern,
    Embed,
}

/// A media URL found on the page, already absolute and normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaCandidate {
    pub url: Url,
    pub source_host_tag: String,
    pub kind: MediaKind,
    pub discovered_via: DiscoveredVia,
}

/// Video candidates sharing one host tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSourceGroup {
    pub host_tag: String,
    pub candidates: Vec<MediaCandidate>,
}

/// Group video candidates by host tag, keeping first-seen order
pub fn group_videos(candidates: &[MediaCandidate]) -> Vec<VideoSourceGroup> {
    let mut groups: Vec<VideoSourceGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for candidate in candidates.iter().filter(|c| c.kind == MediaKind::Video) {
        match index.get(&candidate.source_host_tag) {
            Some(&i) => groups[i].candidates.push(candidate.clone()),
            None => {
                index.insert(candidate.source_host_tag.clone(), groups.len());
                groups.push(VideoSourceGroup {
                    host_tag: candidate.source_host_tag.clone(),
                    candidates: vec![candidate.clone()],
                });
            }
        }
    }

    groups
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureStatus {
    Validated,
    Rejected,
    Pending,
}

/// A validated, locally stored media file owned by one pipeline run
#[derive(Debug, Clone)]
pub struct MediaArtifact {
    pub origin: MediaCandidate,
    pub path: PathBuf,
    pub byte_size: u64,
    pub content_signature: SignatureStatus,
    pub referrer_used: Option<String>,
}

impl MediaArtifact {
    pub fn kind(&self) -> MediaKind {
        self.origin.kind
    }

    /// Remove the backing file. Missing files are not an error.
    pub async fn discard(&self) -> std::io::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// A fixed group of artifacts uploaded together
#[derive(Debug, Clone)]
pub struct DeliveryBatch {
    pub batch_index: usize,
    pub artifacts: Vec<MediaArtifact>,
    pub attempt_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Delivered,
    Abandoned { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub batch_index: usize,
    pub size: usize,
    pub attempt_count: u32,
    pub delivered: usize,
    pub failed: usize,
    pub status: BatchStatus,
}

/// Outcome of one delivery run, partial success included
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub title_sent: bool,
    pub batches: Vec<BatchReport>,
    pub images_total: usize,
    pub images_delivered: usize,
    pub videos_total: usize,
    pub videos_delivered: usize,
}

impl DeliveryReport {
    pub fn delivered(&self) -> usize {
        self.images_delivered + self.videos_delivered
    }

    pub fn total(&self) -> usize {
        self.images_total + self.videos_total
    }

    pub fn is_complete(&self) -> bool {
        self.delivered() == self.total()
    }

    /// Requester-facing summary, e.g. "3/5 images delivered"
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if self.images_total > 0 {
            parts.push(format!(
                "{}/{} images delivered",
                self.images_delivered, self.images_total
            ));
        }
        if self.videos_total > 0 {
            parts.push(format!(
                "{}/{} videos delivered",
                self.videos_delivered, self.videos_total
            ));
        }
        if parts.is_empty() {
            return "no media delivered".to_string();
        }
        parts.join(", ")
    }
}

/// Streaming-friendly attributes attached to every video message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VideoAttributes {
    pub width: u32,
    pub height: u32,
    pub duration: u32,
    pub supports_streaming: bool,
}

impl Default for VideoAttributes {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            duration: 0,
            supports_streaming: true,
        }
    }
}

/// Where delivery goes on the messaging platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryTarget {
    pub channel_id: String,
    pub topic_id: Option<String>,
}

/// Outbound HTTP request description
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(url: Url, timeout: Duration) -> Self {
        Self {
            url,
            headers: Vec::new(),
            timeout,
        }
    }

    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in headers {
            self.set_header(k, v);
        }
        self
    }

    /// Insert or replace a header (case-insensitive name match)
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Fully buffered HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub final_url: Url,
    pub content_type: Option<String>,
    pub retry_after: Option<Duration>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Result of streaming a response body to disk
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub status: u16,
    pub final_url: Url,
    pub content_type: Option<String>,
    pub bytes_written: u64,
}

/// Progress notifications for the requester
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Started { url: String },
    SelectionPrompt { text: String },
    Status { text: String },
    Completed { summary: String },
    Failed { reason: String },
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineEvent {
    pub request_id: u64,
    pub session_id: SessionId,
    #[serde(flatten)]
    pub kind: EventKind,
}
