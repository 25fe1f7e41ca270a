// Bypass ladder module - escalating fetch strategies for blocked hosts
//
// Rungs, in order:
// - plain request with browser-like headers
// - site-specific headers/referer from the host registry
// - scripted browser (feature "browser") that runs the challenge script

mod diagnostics;
mod ladder;

#[cfg(feature = "browser")]
mod browser;

pub use diagnostics::{blocking_status, diagnose_error, diagnose_response, is_challenge_page, BlockingReason};
pub use ladder::{
    transition, verdict, BypassLadder, FetchConstraints, FetchedPage, Rung, RungVerdict, Step, HTML_ACCEPT,
};

#[cfg(feature = "browser")]
pub use browser::HeadlessBrowser;
