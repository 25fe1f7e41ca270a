// Courier pipeline - one parameterized run per content request
//
// fetch (bypass ladder) -> extract -> [selection gate] -> resolve + acquire -> deliver

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use super::acquisition::{Acquirer, RunStorage};
use super::bypass::{BypassLadder, FetchConstraints};
use super::config::CourierConfig;
use super::delivery::DeliveryBatcher;
use super::errors::CourierError;
use super::extractors::{ExtractionReport, PageExtractor};
use super::hosts::HostRegistry;
use super::models::{
    AttemptLog, ContentRequest, DeliveryReport, EventKind, MediaArtifact, MediaCandidate, PipelineEvent, SessionId,
    VideoSourceGroup,
};
use super::resolver::VideoResolver;
use super::selection::{GateEvent, GateState, ReplyOutcome, SelectionGate, SelectionSession, SessionStore};
use super::traits::{ChallengeSolver, Destination, EventEmitter, StreamDownloader, Transport};
use super::utils::find_urls;

/// External collaborators the pipeline talks to
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub solver: Option<Arc<dyn ChallengeSolver>>,
    pub downloader: Arc<dyn StreamDownloader>,
    pub destination: Arc<dyn Destination>,
    /// ffmpeg used to remux concatenated HLS streams
    pub ffmpeg: Option<String>,
}

pub struct Courier {
    config: CourierConfig,
    ladder: Arc<BypassLadder>,
    extractor: PageExtractor,
    resolver: VideoResolver,
    acquirer: Acquirer,
    batcher: DeliveryBatcher,
    sessions: SessionStore,
    events: UnboundedSender<PipelineEvent>,
}

impl Courier {
    pub fn new(
        config: CourierConfig,
        collaborators: Collaborators,
        events: UnboundedSender<PipelineEvent>,
    ) -> Result<Arc<Self>, CourierError> {
        config.validate()?;

        let hosts = Arc::new(HostRegistry::new(config.hosts.clone()));
        let user_agent = config.network.user_agent.clone();
        let ladder = Arc::new(BypassLadder::new(
            collaborators.transport.clone(),
            collaborators.solver,
            hosts.clone(),
            config.ladder.clone(),
            user_agent.clone(),
        ));
        let extractor = PageExtractor::new(&config, hosts);
        let resolver = VideoResolver::new(ladder.clone(), collaborators.downloader, user_agent);
        let acquirer = Acquirer::new(collaborators.transport, ladder.clone(), &config, collaborators.ffmpeg);
        let batcher = DeliveryBatcher::new(
            collaborators.destination,
            config.target(),
            config.delivery.clone(),
            Arc::new(Mutex::new(())),
        );

        Ok(Arc::new(Self {
            config,
            ladder,
            extractor,
            resolver,
            acquirer,
            batcher,
            sessions: SessionStore::new(),
            events,
        }))
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Route one inbound message: a pending selection gets first refusal,
    /// otherwise every URL in the text becomes a request, run in order on
    /// a spawned task. Returns None when the message was consumed or had no URL.
    pub fn handle_message(self: &Arc<Self>, session_id: &str, text: &str) -> Option<JoinHandle<()>> {
        match self.sessions.route_reply(session_id, text) {
            ReplyOutcome::Accepted { request_id, host_tag, .. } => {
                self.emitter(request_id, session_id)
                    .status(format!("Using {} videos", host_tag));
                return None;
            }
            ReplyOutcome::Invalid { request_id } => {
                debug!("[Pipeline] Invalid selection reply for request {}", request_id);
                return None;
            }
            ReplyOutcome::NotPending => {}
        }

        let urls = find_urls(text);
        if urls.is_empty() {
            debug!("[Pipeline] No URL in message from {}", session_id);
            return None;
        }

        let courier = Arc::clone(self);
        let session_id: SessionId = session_id.to_string();
        Some(tokio::spawn(async move {
            for url in urls {
                let request = ContentRequest::new(url, session_id.clone());
                courier.run(request).await;
            }
        }))
    }

    /// Process one request end to end, reporting through events
    pub async fn run(&self, request: ContentRequest) -> Option<DeliveryReport> {
        let emitter = self.emitter(request.id, &request.requester_session_id);
        emitter.emit(EventKind::Started {
            url: request.source_url.to_string(),
        });

        match self.process(&request, &emitter).await {
            Ok(report) => {
                emitter.emit(EventKind::Completed {
                    summary: report.summary(),
                });
                Some(report)
            }
            Err(CourierError::SelectionTimeout) => {
                emitter.emit(EventKind::TimedOut);
                None
            }
            Err(e) => {
                error!("[Pipeline] ✗ Request {} failed: {}", request.id, e);
                emitter.emit(EventKind::Failed { reason: e.to_string() });
                None
            }
        }
    }

    /// The pipeline proper. Stages run strictly in order for one request.
    pub async fn process(&self, request: &ContentRequest, emitter: &EventEmitter) -> Result<DeliveryReport, CourierError> {
        let mut gate = SelectionGate::new();
        gate.apply(GateEvent::Start)?;

        let mut log = AttemptLog::new();
        let extraction = match self.fetch_and_extract(&request.source_url, &mut log).await {
            Ok(report) => report,
            Err(e) => {
                gate.apply(GateEvent::Failed)?;
                return Err(e);
            }
        };
        log.extend(extraction.attempts.clone());

        let groups = extraction.video_groups();
        info!(
            "[Pipeline] Request {}: title {:?}, {} images, {} videos in {} groups",
            request.id,
            extraction.title,
            extraction.images.len(),
            extraction.videos.len(),
            groups.len()
        );
        emitter.status(format!(
            "Found {} images and {} videos",
            extraction.images.len(),
            extraction.videos.len()
        ));
        gate.apply(GateEvent::Extracted { groups: groups.len() })?;

        let video_candidates = if groups.len() > 1 {
            match self.await_selection(request, &groups, &mut gate, emitter).await {
                Ok(chosen) => chosen.candidates,
                Err(e) => {
                    if gate.state() == GateState::AwaitingSelection {
                        gate.apply(GateEvent::Failed)?;
                    }
                    return Err(e);
                }
            }
        } else {
            extraction.videos.clone()
        };

        // Owned by this run; removed on every exit path below
        let storage = RunStorage::new()?;
        let (images, (videos, video_log)) = tokio::join!(
            self.acquire_images(&extraction.images, &request.source_url, &storage),
            self.acquire_videos(&video_candidates, &request.source_url, &storage),
        );
        log.extend(video_log);

        let wanted = extraction.images.len() + videos.wanted;
        let got = images.artifacts.len() + videos.artifacts.len();
        if wanted > 0 && got == 0 {
            gate.apply(GateEvent::Failed)?;
            let error = images
                .first_error
                .or(videos.first_error)
                .unwrap_or_else(|| CourierError::Network("every candidate failed".to_string()));
            return Err(error);
        }
        gate.apply(GateEvent::Resolved)?;
        emitter.status(format!("Acquired {} of {} media files, uploading", got, wanted));

        let report = self
            .batcher
            .deliver(extraction.title.as_deref(), images.artifacts, videos.artifacts)
            .await;
        gate.apply(GateEvent::Delivered)?;

        debug!(
            "[Pipeline] Request {} done: {} attempts logged, {} files left in storage",
            request.id,
            log.len(),
            storage.file_count()
        );
        Ok(report)
    }

    async fn fetch_and_extract(&self, url: &Url, log: &mut AttemptLog) -> Result<ExtractionReport, CourierError> {
        let page = self.ladder.fetch(url, &FetchConstraints::page(), log).await?;
        let body = page.text();
        Ok(self.extractor.extract(&body, &page.effective_url))
    }

    async fn await_selection(
        &self,
        request: &ContentRequest,
        groups: &[VideoSourceGroup],
        gate: &mut SelectionGate,
        emitter: &EventEmitter,
    ) -> Result<VideoSourceGroup, CourierError> {
        let session_id = &request.requester_session_id;
        let session = SelectionSession::new(request.id, groups, self.config.selection.timeout());
        let prompt = session.prompt();
        let replies = self.sessions.open(session_id, session)?;
        emitter.emit(EventKind::SelectionPrompt { text: prompt.clone() });

        let reprompt = || emitter.emit(EventKind::SelectionPrompt { text: prompt.clone() });
        let index = self
            .sessions
            .wait_for_choice(session_id, request.id, replies, self.config.selection.timeout(), gate, reprompt)
            .await?;
        groups
            .get(index)
            .cloned()
            .ok_or(CourierError::InvalidTransition {
                from: "awaiting-selection",
                event: "valid-reply",
            })
    }

    async fn acquire_images(&self, candidates: &[MediaCandidate], origin: &Url, storage: &RunStorage) -> Acquired {
        let mut acquired = Acquired::new(candidates.len());
        for result in self.acquirer.acquire_images(candidates, origin, storage).await {
            acquired.record(result);
        }
        acquired
    }

    /// Each video goes through resolution then download before the next starts
    async fn acquire_videos(
        &self,
        candidates: &[MediaCandidate],
        origin: &Url,
        storage: &RunStorage,
    ) -> (Acquired, AttemptLog) {
        let mut acquired = Acquired::new(candidates.len());
        let mut log = AttemptLog::new();
        for candidate in candidates {
            let result = match self.resolver.resolve(candidate, origin, storage.path(), &mut log).await {
                Ok(descriptor) => self.acquirer.acquire_video(candidate, descriptor, storage).await,
                Err(reason) => Err(CourierError::ResolutionFailed(reason)),
            };
            acquired.record(result);
        }
        (acquired, log)
    }

    fn emitter(&self, request_id: u64, session_id: &str) -> EventEmitter {
        EventEmitter::new(self.events.clone(), request_id, session_id.to_string())
    }
}

/// Artifacts of one media kind plus the first failure seen
struct Acquired {
    wanted: usize,
    artifacts: Vec<MediaArtifact>,
    first_error: Option<CourierError>,
}

impl Acquired {
    fn new(wanted: usize) -> Self {
        Self {
            wanted,
            artifacts: Vec::with_capacity(wanted),
            first_error: None,
        }
    }

    fn record(&mut self, result: Result<MediaArtifact, CourierError>) {
        match result {
            Ok(artifact) => self.artifacts.push(artifact),
            Err(e) => {
                warn!("[Pipeline] Dropping candidate: {}", e);
                if self.first_error.is_none() {
                    self.first_error = Some(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::courier::models::{ContentType, EventKind};
    use crate::courier::testing::{
        jpeg_bytes, mp4_bytes, url, FakeStreamDownloader, RecordingDestination, ScriptedSolver, ScriptedTransport, Sent,
    };
    use std::time::Duration;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    const PAGE: &str = "https://forum.example.com/threads/7/";

    const ONE_GROUP: &str = r#"<html><head><title>Beach Day | ExampleForum</title></head><body>
        <div data-role="commentContent">
          <img src="/media/a.jpg">
          <img src="https://forum.example.com/media/b.jpg">
          <a href="https://streamtape.com/v/Qx9/clip">streamtape</a>
        </div></body></html>"#;

    const TWO_GROUPS: &str = r#"<html><head><title>Beach Day | ExampleForum</title></head><body>
        <div data-role="commentContent">
          <img src="/media/a.jpg">
          <a href="https://vidoza.net/abc.html">vidoza 1</a>
          <a href="https://vidoza.net/def.html">vidoza 2</a>
          <a href="https://streamtape.com/v/Qx9/clip">streamtape</a>
        </div></body></html>"#;

    const STREAMTAPE_PLAYER: &str =
        r#"<html><body><video><source type="video/mp4" src="https://tapecontent.test/clip.mp4"></video></body></html>"#;

    struct Harness {
        courier: Arc<Courier>,
        transport: Arc<ScriptedTransport>,
        destination: Arc<RecordingDestination>,
        events: UnboundedReceiver<PipelineEvent>,
    }

    fn harness(page: &str, solver: Option<Arc<dyn ChallengeSolver>>) -> Harness {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(PAGE, 200, "text/html", page);
        transport.respond_bytes("https://forum.example.com/media/a.jpg", 200, "image/jpeg", jpeg_bytes(3000));
        transport.respond_bytes("https://forum.example.com/media/b.jpg", 200, "image/jpeg", jpeg_bytes(4000));
        transport.respond("https://streamtape.com/v/Qx9/clip", 200, "text/html", STREAMTAPE_PLAYER);
        transport.respond_bytes("https://tapecontent.test/clip.mp4", 200, "video/mp4", mp4_bytes(200_000));

        let mut config = CourierConfig::default().with_channel("chan", None);
        config.delivery.pacing_ms = 1;
        config.ladder.retry_jitter_min_ms = 1;
        config.ladder.retry_jitter_max_ms = 1;

        let destination = Arc::new(RecordingDestination::new());
        let (tx, rx) = unbounded_channel();
        let courier = Courier::new(
            config,
            Collaborators {
                transport: transport.clone(),
                solver,
                downloader: Arc::new(FakeStreamDownloader::new(false, Vec::new())),
                destination: destination.clone(),
                ffmpeg: None,
            },
            tx,
        )
        .unwrap();

        Harness {
            courier,
            transport,
            destination,
            events: rx,
        }
    }

    fn drain(events: &mut UnboundedReceiver<PipelineEvent>) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }

    #[tokio::test]
    async fn test_single_group_runs_end_to_end() {
        let mut h = harness(ONE_GROUP, None);
        let report = h.courier.run(ContentRequest::new(url(PAGE), "chat-1")).await.unwrap();

        assert!(report.title_sent);
        assert_eq!(report.summary(), "2/2 images delivered, 1/1 videos delivered");
        assert_eq!(
            h.destination.sent(),
            vec![
                Sent::Text("Beach Day".to_string()),
                Sent::Photo("001-image-a.jpg".to_string()),
                Sent::Photo("002-image-b.jpg".to_string()),
                Sent::Video("003-video-clip.mp4".to_string()),
            ]
        );
        let video = h
            .transport
            .requests()
            .into_iter()
            .find(|r| r.url.as_str() == "https://tapecontent.test/clip.mp4")
            .unwrap();
        assert_eq!(video.header("Referer"), Some("https://streamtape.com/"));

        let events = drain(&mut h.events);
        assert!(matches!(events.first(), Some(EventKind::Started { .. })));
        assert_eq!(
            events.last(),
            Some(&EventKind::Completed {
                summary: "2/2 images delivered, 1/1 videos delivered".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_selection_resolves_only_chosen_group() {
        let mut h = harness(TWO_GROUPS, None);
        let courier = h.courier.clone();
        let run = tokio::spawn(async move { courier.run(ContentRequest::new(url(PAGE), "chat-1")).await });

        let prompt = loop {
            match h.events.recv().await.unwrap().kind {
                EventKind::SelectionPrompt { text } => break text,
                _ => continue,
            }
        };
        assert!(prompt.contains("1. vidoza (2 videos)"));
        assert!(prompt.contains("2. streamtape (1 video)"));
        assert!(!prompt.contains("3."));

        assert!(h.courier.handle_message("chat-1", "5").is_none());
        assert!(h.courier.sessions().is_pending("chat-1"));
        // The waiting run answers an invalid reply with the same prompt
        let reprompt = loop {
            match h.events.recv().await.unwrap().kind {
                EventKind::SelectionPrompt { text } => break text,
                _ => continue,
            }
        };
        assert_eq!(reprompt, prompt);
        assert!(h.courier.handle_message("chat-1", "2").is_none());

        let report = run.await.unwrap().unwrap();
        assert_eq!(report.summary(), "1/1 images delivered, 1/1 videos delivered");
        assert_eq!(h.transport.request_count("https://vidoza.net/abc.html"), 0);
        assert_eq!(h.transport.request_count("https://vidoza.net/def.html"), 0);
        assert_eq!(h.transport.request_count("https://streamtape.com/v/Qx9/clip"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_timeout_stops_the_run() {
        let mut h = harness(TWO_GROUPS, None);
        let courier = h.courier.clone();
        let run = tokio::spawn(async move { courier.run(ContentRequest::new(url(PAGE), "chat-1")).await });

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(run.await.unwrap().is_none());

        let events = drain(&mut h.events);
        assert_eq!(events.last(), Some(&EventKind::TimedOut));
        assert!(h.destination.sent().is_empty());
        assert_eq!(h.transport.request_count("https://forum.example.com/media/a.jpg"), 0);
        assert!(!h.courier.sessions().is_pending("chat-1"));
        // A late reply is just a message without a URL
        assert!(h.courier.handle_message("chat-1", "1").is_none());
    }

    #[tokio::test]
    async fn test_blocked_page_reports_failure() {
        let mut h = harness(ONE_GROUP, None);
        let blocked = "https://blocked.example.com/p";
        h.transport.respond(blocked, 403, "text/html", "Access denied");

        assert!(h.courier.run(ContentRequest::new(url(blocked), "chat-1")).await.is_none());
        let events = drain(&mut h.events);
        match events.last() {
            Some(EventKind::Failed { reason }) => assert!(reason.contains("blocked")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(h.destination.sent().is_empty());
    }

    #[tokio::test]
    async fn test_challenge_escalates_to_scripted_browser() {
        let solver = Arc::new(ScriptedSolver::new(200, ONE_GROUP));
        let h = harness("", Some(solver.clone()));
        let guarded = "https://guarded.example.com/threads/7/";
        h.transport.respond(guarded, 403, "text/html", "Forbidden");

        let mut log = AttemptLog::new();
        let extraction = h.courier.fetch_and_extract(&url(guarded), &mut log).await.unwrap();

        assert_eq!(solver.calls(), 1);
        assert_eq!(extraction.title.as_deref(), Some("Beach Day"));
        let page_attempts: Vec<_> = log.for_type(ContentType::Page).collect();
        assert_eq!(page_attempts.len(), 3);
        assert!(page_attempts[2].outcome.is_success());
    }

    #[tokio::test]
    async fn test_message_with_urls_spawns_requests() {
        let mut h = harness(ONE_GROUP, None);
        assert!(h.courier.handle_message("chat-1", "hello there").is_none());

        let handle = h
            .courier
            .handle_message("chat-1", &format!("look at {} please", PAGE))
            .unwrap();
        handle.await.unwrap();
        let events = drain(&mut h.events);
        assert!(events.iter().any(|e| matches!(e, EventKind::Completed { .. })));
    }

    #[tokio::test]
    async fn test_every_candidate_failing_fails_request() {
        let mut h = harness(ONE_GROUP, None);
        let page = "https://forum.example.com/threads/8/";
        h.transport.respond(
            page,
            200,
            "text/html",
            r#"<html><body><main><img src="/media/gone.jpg"></main></body></html>"#,
        );

        assert!(h.courier.run(ContentRequest::new(url(page), "chat-1")).await.is_none());
        let events = drain(&mut h.events);
        assert!(matches!(events.last(), Some(EventKind::Failed { .. })));
        assert!(h.destination.sent().is_empty());
    }

    #[test]
    fn test_missing_channel_is_fatal() {
        let (tx, _rx) = unbounded_channel();
        let err = Courier::new(
            CourierConfig::default(),
            Collaborators {
                transport: Arc::new(ScriptedTransport::new()),
                solver: None,
                downloader: Arc::new(FakeStreamDownloader::new(false, Vec::new())),
                destination: Arc::new(RecordingDestination::new()),
                ffmpeg: None,
            },
            tx,
        )
        .err()
        .unwrap();
        assert!(matches!(err, CourierError::ConfigurationMissing(_)));
    }
}
