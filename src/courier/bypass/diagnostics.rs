// Blocking diagnostics - identifies why a host refused us
//
// Analyzes responses and tool output to determine:
// - Type of blocking (403, 429, challenge page, ...)
// - Whether escalating to a stronger bypass rung might help

use serde::{Deserialize, Serialize};

/// How much of a body is scanned for challenge markers
const CHALLENGE_SCAN_BYTES: usize = 32 * 1024;

/// Markers of anti-bot interstitials (Cloudflare, DDoS-Guard, Sucuri)
const CHALLENGE_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "cf_chl_opt",
    "challenge-platform",
    "<title>just a moment...</title>",
    "attention required! | cloudflare",
    "checking your browser before accessing",
    "enable javascript and cookies to continue",
    "ddos-guard",
    "sucuri website firewall",
];

/// Reasons why a host might block a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockingReason {
    /// HTTP 403 Forbidden
    Forbidden,

    /// HTTP 429 or "too many requests"
    RateLimited,

    /// HTTP 503, typically the anti-bot front returning early
    ServiceUnavailable,

    /// 2xx response whose body is an anti-bot interstitial
    ChallengePage,

    /// Captcha or "unusual traffic" wording in tool output
    BotDetection,

    /// Network timeout (soft IP block)
    NetworkTimeout,

    /// Content removed or never existed
    Unavailable,

    /// Generic/unknown blocking
    Unknown,
}

impl BlockingReason {
    /// Whether a stronger bypass rung might get through
    pub fn warrants_escalation(&self) -> bool {
        matches!(
            self,
            Self::Forbidden | Self::RateLimited | Self::ServiceUnavailable | Self::ChallengePage
        )
    }

    /// Check if this is a permanent condition (no workaround)
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Unavailable)
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::Forbidden => "Access denied (HTTP 403)",
            Self::RateLimited => "Rate limited (HTTP 429)",
            Self::ServiceUnavailable => "Service unavailable (HTTP 503)",
            Self::ChallengePage => "Anti-bot challenge page",
            Self::BotDetection => "Bot detection triggered",
            Self::NetworkTimeout => "Network timeout (possible IP throttling)",
            Self::Unavailable => "Content unavailable",
            Self::Unknown => "Unknown blocking reason",
        }
    }
}

/// Blocking status codes; every other status is either accepted or terminal
pub fn blocking_status(status: u16) -> Option<BlockingReason> {
    match status {
        403 => Some(BlockingReason::Forbidden),
        429 => Some(BlockingReason::RateLimited),
        503 => Some(BlockingReason::ServiceUnavailable),
        _ => None,
    }
}

/// Whether a body is recognizably an anti-bot interstitial
pub fn is_challenge_page(body: &[u8]) -> bool {
    let head = &body[..body.len().min(CHALLENGE_SCAN_BYTES)];
    let lower = String::from_utf8_lossy(head).to_lowercase();
    CHALLENGE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Analyze a response and return the blocking reason, if any
pub fn diagnose_response(status: u16, body: &[u8]) -> Option<BlockingReason> {
    if let Some(reason) = blocking_status(status) {
        return Some(reason);
    }
    if (200..300).contains(&status) && is_challenge_page(body) {
        return Some(BlockingReason::ChallengePage);
    }
    None
}

/// Analyze an error message (e.g. external tool stderr) and return blocking reason
pub fn diagnose_error(error: &str) -> Option<BlockingReason> {
    let lower = error.to_lowercase();

    // Challenge wording before raw status codes: Cloudflare pages also say 403
    if CHALLENGE_MARKERS.iter().any(|m| lower.contains(m)) || lower.contains("cloudflare") {
        return Some(BlockingReason::ChallengePage);
    }

    if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests") {
        return Some(BlockingReason::RateLimited);
    }

    if lower.contains("captcha") || lower.contains("unusual traffic") || lower.contains("are you a robot") {
        return Some(BlockingReason::BotDetection);
    }

    if lower.contains("403") || lower.contains("forbidden") {
        return Some(BlockingReason::Forbidden);
    }

    if lower.contains("503") || lower.contains("service unavailable") {
        return Some(BlockingReason::ServiceUnavailable);
    }

    if lower.contains("404")
        || lower.contains("not found")
        || lower.contains("file was deleted")
        || lower.contains("video is unavailable")
    {
        return Some(BlockingReason::Unavailable);
    }

    if lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection refused")
        || lower.contains("network unreachable")
    {
        return Some(BlockingReason::NetworkTimeout);
    }

    if !error.is_empty() {
        return Some(BlockingReason::Unknown);
    }

    None
}
