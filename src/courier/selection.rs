// Selection gate - per-request state machine and the session store that
// routes a requester's numeric reply to the run waiting for it
//
//   Idle -> Extracting -> AwaitingSelection -> Resolving -> Uploading -> Done
//                      \-> Resolving
//   AwaitingSelection --timeout--> Idle
//   any non-terminal --failure--> Error

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::courier::errors::CourierError;
use crate::courier::models::{SessionId, VideoSourceGroup};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Extracting,
    AwaitingSelection,
    Resolving,
    Uploading,
    Done,
    Error,
}

impl GateState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Extracting => "extracting",
            Self::AwaitingSelection => "awaiting-selection",
            Self::Resolving => "resolving",
            Self::Uploading => "uploading",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEvent {
    Start,
    /// Extraction finished; `groups` is the number of video host groups
    Extracted { groups: usize },
    ValidReply,
    InvalidReply,
    Timeout,
    Resolved,
    Delivered,
    Failed,
}

impl GateEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Extracted { .. } => "extracted",
            Self::ValidReply => "valid-reply",
            Self::InvalidReply => "invalid-reply",
            Self::Timeout => "timeout",
            Self::Resolved => "resolved",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }
}

/// Transition table; None means the event is invalid in that state
pub fn next_state(state: GateState, event: GateEvent) -> Option<GateState> {
    use GateEvent as E;
    use GateState as S;

    match (state, event) {
        (S::Idle, E::Start) => Some(S::Extracting),
        (S::Extracting, E::Extracted { groups }) if groups > 1 => Some(S::AwaitingSelection),
        (S::Extracting, E::Extracted { .. }) => Some(S::Resolving),
        (S::AwaitingSelection, E::ValidReply) => Some(S::Resolving),
        (S::AwaitingSelection, E::InvalidReply) => Some(S::AwaitingSelection),
        (S::AwaitingSelection, E::Timeout) => Some(S::Idle),
        (S::Resolving, E::Resolved) => Some(S::Uploading),
        (S::Uploading, E::Delivered) => Some(S::Done),
        (s, E::Failed) if !s.is_terminal() && s != S::Idle => Some(S::Error),
        _ => None,
    }
}

/// One request's gate. Never reused across requests.
#[derive(Debug)]
pub struct SelectionGate {
    state: GateState,
}

impl Default for SelectionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionGate {
    pub fn new() -> Self {
        Self { state: GateState::Idle }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn apply(&mut self, event: GateEvent) -> Result<GateState, CourierError> {
        match next_state(self.state, event) {
            Some(next) => {
                debug!("[Gate] {} --{}--> {}", self.state, event.name(), next);
                self.state = next;
                Ok(next)
            }
            None => Err(CourierError::InvalidTransition {
                from: self.state.name(),
                event: event.name(),
            }),
        }
    }
}

/// Pending choice among video host groups
#[derive(Debug, Clone)]
pub struct SelectionSession {
    pub request_id: u64,
    /// (host tag, candidate count) in presentation order
    pub groups: Vec<(String, usize)>,
    pub chosen_group: Option<usize>,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl SelectionSession {
    pub fn new(request_id: u64, groups: &[VideoSourceGroup], timeout: Duration) -> Self {
        let created_at = OffsetDateTime::now_utc();
        Self {
            request_id,
            groups: groups
                .iter()
                .map(|g| (g.host_tag.clone(), g.candidates.len()))
                .collect(),
            chosen_group: None,
            created_at,
            expires_at: created_at + timeout,
        }
    }

    /// Enumerated `1..N` prompt
    pub fn prompt(&self) -> String {
        let mut text = String::from("Several video sources were found. Reply with a number:");
        for (i, (tag, count)) in self.groups.iter().enumerate() {
            let noun = if *count == 1 { "video" } else { "videos" };
            text.push_str(&format!("\n{}. {} ({} {})", i + 1, tag, count, noun));
        }
        text
    }

    /// 0-based group index for a reply, if it is an in-range number
    pub fn parse_choice(&self, reply: &str) -> Option<usize> {
        let n = reply.trim().trim_end_matches('.').parse::<usize>().ok()?;
        (1..=self.groups.len()).contains(&n).then(|| n - 1)
    }
}

/// A requester reply forwarded to the run awaiting it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReply {
    Invalid,
    Chosen(usize),
}

pub type SelectionReplies = UnboundedReceiver<SelectionReply>;

struct PendingSelection {
    session: SelectionSession,
    replies: UnboundedSender<SelectionReply>,
}

/// What happened to an inbound message offered to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// No selection pending for this session; treat as a normal message
    NotPending,
    /// Out of range or not a number; the waiting run re-prompts
    Invalid { request_id: u64 },
    Accepted { request_id: u64, group: usize, host_tag: String },
}

/// Pending selections keyed by requester session
#[derive(Default)]
pub struct SessionStore {
    pending: Mutex<HashMap<SessionId, PendingSelection>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a selection; fails if this session already has one pending
    pub fn open(
        &self,
        session_id: &str,
        session: SelectionSession,
    ) -> Result<SelectionReplies, CourierError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| CourierError::SelectionBusy(session_id.to_string()))?;
        if pending.contains_key(session_id) {
            return Err(CourierError::SelectionBusy(session_id.to_string()));
        }
        let (tx, rx) = unbounded_channel();
        info!(
            "[Gate] Session {} awaiting selection among {} groups",
            session_id,
            session.groups.len()
        );
        pending.insert(session_id.to_string(), PendingSelection { session, replies: tx });
        Ok(rx)
    }

    pub fn is_pending(&self, session_id: &str) -> bool {
        self.pending
            .lock()
            .map(|p| p.contains_key(session_id))
            .unwrap_or(false)
    }

    /// Offer a requester message to the pending selection of its session
    pub fn route_reply(&self, session_id: &str, text: &str) -> ReplyOutcome {
        let Ok(mut pending) = self.pending.lock() else {
            return ReplyOutcome::NotPending;
        };
        let Some(entry) = pending.get(session_id) else {
            return ReplyOutcome::NotPending;
        };
        let Some(group) = entry.session.parse_choice(text) else {
            debug!("[Gate] Invalid reply {:?} from {}", text, session_id);
            if entry.replies.send(SelectionReply::Invalid).is_err() {
                return ReplyOutcome::NotPending;
            }
            return ReplyOutcome::Invalid {
                request_id: entry.session.request_id,
            };
        };

        let Some(mut entry) = pending.remove(session_id) else {
            return ReplyOutcome::NotPending;
        };
        entry.session.chosen_group = Some(group);
        let host_tag = entry.session.groups[group].0.clone();
        if entry.replies.send(SelectionReply::Chosen(group)).is_err() {
            // The waiting run already gave up
            return ReplyOutcome::NotPending;
        }
        info!("[Gate] Session {} chose {} ({})", session_id, group + 1, host_tag);
        ReplyOutcome::Accepted {
            request_id: entry.session.request_id,
            group,
            host_tag,
        }
    }

    /// Drop the pending selection of `request_id`, if it is still there
    pub fn discard(&self, session_id: &str, request_id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            if pending
                .get(session_id)
                .map_or(false, |p| p.session.request_id == request_id)
            {
                pending.remove(session_id);
            }
        }
    }

    /// Drive `gate` through the replies routed by `route_reply` until a
    /// valid choice arrives. Invalid replies keep the original deadline and
    /// call `on_invalid`. On timeout the session is discarded, the gate
    /// falls back to Idle and `SelectionTimeout` is returned.
    pub async fn wait_for_choice(
        &self,
        session_id: &str,
        request_id: u64,
        mut replies: SelectionReplies,
        limit: Duration,
        gate: &mut SelectionGate,
        mut on_invalid: impl FnMut(),
    ) -> Result<usize, CourierError> {
        let deadline = Instant::now() + limit;
        loop {
            match tokio::time::timeout_at(deadline, replies.recv()).await {
                Ok(Some(SelectionReply::Chosen(group))) => {
                    gate.apply(GateEvent::ValidReply)?;
                    return Ok(group);
                }
                Ok(Some(SelectionReply::Invalid)) => {
                    gate.apply(GateEvent::InvalidReply)?;
                    on_invalid();
                }
                Ok(None) | Err(_) => {
                    warn!("[Gate] Selection for request {} timed out after {:?}", request_id, limit);
                    self.discard(session_id, request_id);
                    gate.apply(GateEvent::Timeout)?;
                    return Err(CourierError::SelectionTimeout);
                }
            }
        }
    }
}
