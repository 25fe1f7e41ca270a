// Bypass ladder - plain request, site-specific headers, scripted browser
//
// Each rung is retried once after a short random delay when the host
// answers with a blocking status (403/429/503) or a challenge page; then
// the ladder escalates. Transport failures are retried in place with
// backoff and never escalate.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use super::diagnostics::{diagnose_response, BlockingReason};
use crate::courier::config::LadderConfig;
use crate::courier::errors::{CourierError, TransportError};
use crate::courier::hosts::HostRegistry;
use crate::courier::models::{
    AttemptLog, AttemptOutcome, ContentType, ExtractionAttempt, HttpRequest, HttpResponse,
};
use crate::courier::traits::{ChallengeSolver, Transport};
use crate::courier::utils::{backoff_delay, jitter};

pub const HTML_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// One level of the ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rung {
    Plain,
    SiteHeaders,
    ScriptedBrowser,
}

impl Rung {
    pub const ALL: [Rung; 3] = [Rung::Plain, Rung::SiteHeaders, Rung::ScriptedBrowser];

    pub fn name(&self) -> &'static str {
        match self {
            Rung::Plain => "plain-request",
            Rung::SiteHeaders => "site-headers",
            Rung::ScriptedBrowser => "scripted-browser",
        }
    }

    pub fn next(&self) -> Option<Rung> {
        match self {
            Rung::Plain => Some(Rung::SiteHeaders),
            Rung::SiteHeaders => Some(Rung::ScriptedBrowser),
            Rung::ScriptedBrowser => None,
        }
    }
}

/// Classification of a single rung response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RungVerdict {
    Accept,
    Blocked(BlockingReason),
    /// Non-blocking error status (404, 500, ...) that escalation cannot fix
    Terminal(u16),
}

pub fn verdict(status: u16, body: &[u8]) -> RungVerdict {
    match diagnose_response(status, body) {
        Some(reason) => RungVerdict::Blocked(reason),
        None if (200..300).contains(&status) => RungVerdict::Accept,
        None => RungVerdict::Terminal(status),
    }
}

/// Next move of the ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Done,
    RetrySame,
    Escalate(Rung),
    Exhausted,
    Fail(u16),
}

/// Transition table: (rung, verdict, already retried) -> next step
pub fn transition(rung: Rung, verdict: RungVerdict, retried: bool) -> Step {
    match (verdict, retried) {
        (RungVerdict::Accept, _) => Step::Done,
        (RungVerdict::Terminal(status), _) => Step::Fail(status),
        (RungVerdict::Blocked(reason), _) if reason.is_permanent() => Step::Exhausted,
        (RungVerdict::Blocked(_), false) => Step::RetrySame,
        (RungVerdict::Blocked(reason), true) if reason.warrants_escalation() => match rung.next() {
            Some(next) => Step::Escalate(next),
            None => Step::Exhausted,
        },
        (RungVerdict::Blocked(_), true) => Step::Exhausted,
    }
}

/// Caller-supplied shaping of the request
#[derive(Debug, Clone)]
pub struct FetchConstraints {
    pub accept: String,
    pub referer: Option<String>,
    /// The browser rung returns rendered HTML, useless for binary payloads
    pub allow_browser: bool,
}

impl FetchConstraints {
    pub fn page() -> Self {
        Self {
            accept: HTML_ACCEPT.to_string(),
            referer: None,
            allow_browser: true,
        }
    }

    pub fn binary(accept: &str, referer: Option<String>) -> Self {
        Self {
            accept: accept.to_string(),
            referer,
            allow_browser: false,
        }
    }

    pub fn with_referer(mut self, referer: Option<String>) -> Self {
        self.referer = referer;
        self
    }
}

/// Body returned by the first rung that got through
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub body: Vec<u8>,
    pub effective_url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    pub rung: Rung,
}

impl FetchedPage {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl From<(HttpResponse, Rung)> for FetchedPage {
    fn from((response, rung): (HttpResponse, Rung)) -> Self {
        Self {
            body: response.body,
            effective_url: response.final_url,
            status: response.status,
            content_type: response.content_type,
            rung,
        }
    }
}

pub struct BypassLadder {
    transport: Arc<dyn Transport>,
    solver: Option<Arc<dyn ChallengeSolver>>,
    hosts: Arc<HostRegistry>,
    config: LadderConfig,
    user_agent: String,
}

impl BypassLadder {
    pub fn new(
        transport: Arc<dyn Transport>,
        solver: Option<Arc<dyn ChallengeSolver>>,
        hosts: Arc<HostRegistry>,
        config: LadderConfig,
        user_agent: String,
    ) -> Self {
        Self {
            transport,
            solver,
            hosts,
            config,
            user_agent,
        }
    }

    pub fn hosts(&self) -> &HostRegistry {
        &self.hosts
    }

    /// Fetch through the ladder, appending one attempt per rung to `log`
    pub async fn fetch(
        &self,
        url: &Url,
        constraints: &FetchConstraints,
        log: &mut AttemptLog,
    ) -> Result<FetchedPage, CourierError> {
        let mut rung = Rung::Plain;
        let mut retried = false;
        let mut last_status: Option<u16> = None;
        let mut last_reason = BlockingReason::Unknown;

        loop {
            if rung == Rung::ScriptedBrowser && (!constraints.allow_browser || self.solver.is_none()) {
                let detail = if constraints.allow_browser {
                    "no scripted browser configured"
                } else {
                    "not applicable to binary content"
                };
                debug!("[Ladder] Skipping {} for {}: {}", rung.name(), url, detail);
                record(log, rung, AttemptOutcome::error("Unavailable", detail), 0);
                break;
            }

            if rung == Rung::SiteHeaders && !retried {
                let delay = self.hosts.delay_for(url);
                if delay > 0 {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }

            info!("[Ladder] Trying {} for {}", rung.name(), url);
            let response = match self.attempt_with_retries(rung, url, constraints).await {
                Ok(r) => r,
                Err(e) => {
                    warn!("[Ladder] ✗ {} transport failure: {}", rung.name(), e);
                    record(log, rung, AttemptOutcome::error("Network", e.to_string()), 0);
                    if rung == Rung::ScriptedBrowser {
                        break;
                    }
                    return Err(e.into());
                }
            };

            let v = verdict(response.status, &response.body);
            if let RungVerdict::Blocked(reason) = v {
                last_status = Some(response.status);
                last_reason = reason;
            }

            match transition(rung, v, retried) {
                Step::Done => {
                    info!("[Ladder] ✓ {} succeeded for {}", rung.name(), url);
                    record(log, rung, AttemptOutcome::Success, 1);
                    return Ok(FetchedPage::from((response, rung)));
                }
                Step::Fail(status) => {
                    record(
                        log,
                        rung,
                        AttemptOutcome::error("HttpStatus", format!("HTTP {}", status)),
                        0,
                    );
                    return Err(CourierError::HttpStatus {
                        url: url.to_string(),
                        status,
                    });
                }
                Step::RetrySame => {
                    let delay = jitter(self.config.retry_jitter_min_ms, self.config.retry_jitter_max_ms);
                    debug!(
                        "[Ladder] {} blocked ({}), retrying in {:?}",
                        rung.name(),
                        last_reason.description(),
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    retried = true;
                }
                Step::Escalate(next) => {
                    warn!(
                        "[Ladder] ✗ {} blocked ({}), escalating to {}",
                        rung.name(),
                        last_reason.description(),
                        next.name()
                    );
                    record(log, rung, blocked_outcome(last_reason, last_status), 0);
                    rung = next;
                    retried = false;
                }
                Step::Exhausted => {
                    record(log, rung, blocked_outcome(last_reason, last_status), 0);
                    break;
                }
            }
        }

        warn!("[Ladder] All rungs exhausted for {}", url);
        Err(CourierError::Blocked {
            url: url.to_string(),
            last_status,
        })
    }

    /// One rung, retrying transport failures with exponential backoff
    async fn attempt_with_retries(
        &self,
        rung: Rung,
        url: &Url,
        constraints: &FetchConstraints,
    ) -> Result<HttpResponse, TransportError> {
        let attempts = self.config.transport_attempts.max(1);
        let mut last_error = TransportError::Other("no attempt made".to_string());

        for attempt in 0..attempts {
            match self.attempt(rung, url, constraints).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = backoff_delay(attempt, self.config.transport_backoff_ms, 30_000);
                    debug!("[Ladder] {} transient error ({}), backing off {:?}", rung.name(), e, delay);
                    tokio::time::sleep(delay).await;
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }

    async fn attempt(
        &self,
        rung: Rung,
        url: &Url,
        constraints: &FetchConstraints,
    ) -> Result<HttpResponse, TransportError> {
        let request = self.request_for(rung, url, constraints);
        match rung {
            Rung::Plain | Rung::SiteHeaders => self.transport.get(&request).await,
            Rung::ScriptedBrowser => match &self.solver {
                Some(solver) => solver.solve(&request).await,
                None => Err(TransportError::Unavailable("no scripted browser".to_string())),
            },
        }
    }

    /// Headers for a rung; the site rung layers host hints over the plain set
    pub fn request_for(&self, rung: Rung, url: &Url, constraints: &FetchConstraints) -> HttpRequest {
        let timeout = Duration::from_secs(match rung {
            Rung::Plain => self.config.plain_timeout_secs,
            Rung::SiteHeaders => self.config.site_timeout_secs,
            Rung::ScriptedBrowser => self.config.browser_timeout_secs,
        });

        let mut request = HttpRequest::new(url.clone(), timeout).with_headers([
            ("User-Agent", self.user_agent.as_str()),
            ("Accept", constraints.accept.as_str()),
            ("Accept-Language", "en-US,en;q=0.9"),
            ("Upgrade-Insecure-Requests", "1"),
            ("Sec-Fetch-Dest", "document"),
            ("Sec-Fetch-Mode", "navigate"),
            ("Sec-Fetch-Site", "none"),
        ]);
        if let Some(referer) = &constraints.referer {
            request.set_header("Referer", referer.clone());
        }

        if rung == Rung::SiteHeaders {
            for (k, v) in self.hosts.site_headers(url) {
                // An explicit referer from the caller wins over the host default
                if k.eq_ignore_ascii_case("Referer") && constraints.referer.is_some() {
                    continue;
                }
                request.set_header(k, v);
            }
            request.set_header("Cache-Control", "no-cache");
        }

        request
    }
}

fn blocked_outcome(reason: BlockingReason, status: Option<u16>) -> AttemptOutcome {
    let detail = match status {
        Some(code) => format!("{} (HTTP {})", reason.description(), code),
        None => reason.description().to_string(),
    };
    AttemptOutcome::error("BlockedError", detail)
}

fn record(log: &mut AttemptLog, rung: Rung, outcome: AttemptOutcome, produced_items: usize) {
    log.push(ExtractionAttempt {
        strategy_name: rung.name().to_string(),
        content_type: ContentType::Page,
        outcome,
        produced_items,
    });
}
