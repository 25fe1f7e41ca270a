// Scripted fakes of the collaborator traits, shared by unit tests

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::errors::{DestinationError, ResolutionFailure, TransportError};
use super::models::{DeliveryTarget, DownloadedFile, HttpRequest, HttpResponse, VideoAttributes};
use super::traits::{ChallengeSolver, Destination, StreamDownloader, StreamJob, Transport};

#[derive(Debug, Clone)]
enum Scripted {
    Response {
        status: u16,
        content_type: String,
        body: Vec<u8>,
        retry_after: Option<Duration>,
    },
    Error(TransportError),
}

/// Transport answering from per-URL queues; the last entry repeats
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
    log: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, url: &str, entry: Scripted) {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(entry);
    }

    pub fn respond(&self, url: &str, status: u16, content_type: &str, body: &str) {
        self.respond_bytes(url, status, content_type, body.as_bytes().to_vec());
    }

    pub fn respond_bytes(&self, url: &str, status: u16, content_type: &str, body: Vec<u8>) {
        self.push(
            url,
            Scripted::Response {
                status,
                content_type: content_type.to_string(),
                body,
                retry_after: None,
            },
        );
    }

    pub fn respond_sequence(&self, url: &str, responses: Vec<(u16, &str)>) {
        for (status, body) in responses {
            self.respond(url, status, "text/html", body);
        }
    }

    pub fn fail_then_respond(&self, url: &str, error: TransportError, times: usize, status: u16, body: &str) {
        for _ in 0..times {
            self.push(url, Scripted::Error(error.clone()));
        }
        self.respond(url, status, "text/html", body);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().unwrap().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.as_str() == url)
            .count()
    }

    fn next(&self, request: &HttpRequest) -> Scripted {
        self.log.lock().unwrap().push(request.clone());
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(request.url.as_str()) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Scripted::Response {
                status: 404,
                content_type: "text/html".to_string(),
                body: b"not found".to_vec(),
                retry_after: None,
            },
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        match self.next(request) {
            Scripted::Response {
                status,
                content_type,
                body,
                retry_after,
            } => Ok(HttpResponse {
                status,
                final_url: request.url.clone(),
                content_type: Some(content_type),
                retry_after,
                body,
            }),
            Scripted::Error(e) => Err(e),
        }
    }

    async fn download_to(&self, request: &HttpRequest, dest: &Path) -> Result<DownloadedFile, TransportError> {
        match self.next(request) {
            Scripted::Response {
                status,
                content_type,
                body,
                ..
            } => {
                let bytes_written = if (200..300).contains(&status) {
                    tokio::fs::write(dest, &body).await?;
                    body.len() as u64
                } else {
                    0
                };
                Ok(DownloadedFile {
                    status,
                    final_url: request.url.clone(),
                    content_type: Some(content_type),
                    bytes_written,
                })
            }
            Scripted::Error(e) => Err(e),
        }
    }
}

/// Browser rung fake returning a fixed document
pub struct ScriptedSolver {
    status: u16,
    body: String,
    calls: AtomicUsize,
}

impl ScriptedSolver {
    pub fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChallengeSolver for ScriptedSolver {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn solve(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(HttpResponse {
            status: self.status,
            final_url: request.url.clone(),
            content_type: Some("text/html".to_string()),
            retry_after: None,
            body: self.body.as_bytes().to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(String),
    Photo(String),
    Video(String),
}

/// Destination recording every call; failures are scripted per call index
#[derive(Default)]
pub struct RecordingDestination {
    sent: Mutex<Vec<Sent>>,
    calls: AtomicUsize,
    failures: Mutex<HashMap<usize, DestinationError>>,
}

impl RecordingDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `n`-th media upload (0-based, counting every attempt)
    pub fn fail_call(&self, n: usize, error: DestinationError) {
        self.failures.lock().unwrap().insert(n, error);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn media_call(&self, entry: Sent) -> Result<(), DestinationError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.failures.lock().unwrap().remove(&n) {
            return Err(e);
        }
        self.sent.lock().unwrap().push(entry);
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl Destination for RecordingDestination {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send_text(&self, _target: &DeliveryTarget, text: &str) -> Result<(), DestinationError> {
        self.sent.lock().unwrap().push(Sent::Text(text.to_string()));
        Ok(())
    }

    async fn send_photo(&self, _target: &DeliveryTarget, path: &Path) -> Result<(), DestinationError> {
        self.media_call(Sent::Photo(file_name(path)))
    }

    async fn send_video(
        &self,
        _target: &DeliveryTarget,
        path: &Path,
        _attributes: &VideoAttributes,
    ) -> Result<(), DestinationError> {
        self.media_call(Sent::Video(file_name(path)))
    }
}

/// Stream downloader fake that writes a fixed payload
pub struct FakeStreamDownloader {
    available: bool,
    payload: Vec<u8>,
    jobs: Mutex<Vec<Url>>,
}

impl FakeStreamDownloader {
    pub fn new(available: bool, payload: Vec<u8>) -> Self {
        Self {
            available,
            payload,
            jobs: Mutex::new(Vec::new()),
        }
    }

    pub fn jobs(&self) -> Vec<Url> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamDownloader for FakeStreamDownloader {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn download(&self, job: &StreamJob) -> Result<PathBuf, ResolutionFailure> {
        self.jobs.lock().unwrap().push(job.url.clone());
        if !self.available {
            return Err(ResolutionFailure::ExternalToolUnavailable);
        }
        let path = job.output_dir.join(format!("{}.mp4", job.stem));
        tokio::fs::write(&path, &self.payload)
            .await
            .map_err(|e| ResolutionFailure::ExternalToolFailed(e.to_string()))?;
        Ok(path)
    }
}

/// Minimal valid JPEG-looking payload of the given size
pub fn jpeg_bytes(size: usize) -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];
    data.resize(size.max(data.len()), 0x11);
    data
}

/// Minimal PNG-looking payload of the given size
pub fn png_bytes(size: usize) -> Vec<u8> {
    let mut data = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, b'I', b'H', b'D', b'R'];
    data.resize(size.max(data.len()), 0x22);
    data
}

/// MP4-looking payload (ftyp box) of the given size
pub fn mp4_bytes(size: usize) -> Vec<u8> {
    let mut data = vec![0, 0, 0, 0x18, b'f', b't', b'y', b'p', b'i', b's', b'o', b'm', 0, 0, 0, 0];
    data.resize(size.max(data.len()), 0x33);
    data
}

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}
