//! The review gate: predicate, pending queue, decisions, and expiry.
//!
//! High-risk commands are parked here instead of dispatched. A reviewer
//! decision (or a deadline expiry) produces a [`ReviewOutcome`] on the
//! broadcast feed; the pipeline's decision loop turns approvals back into
//! dispatchable commands and the rest into terminal failures.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use fr0g_core::error::PlatformError;
use fr0g_core::shutdown::ShutdownToken;
use fr0g_core::types::{OutputCommand, ReviewStatus};

/// Tokens that force review when present in command content.
pub const SENSITIVE_TOKENS: [&str; 4] = ["urgent", "emergency", "critical", "alert"];

/// Priority above which a command always goes to review.
pub const REVIEW_PRIORITY_THRESHOLD: u8 = 8;

/// Content length above which a command always goes to review.
pub const REVIEW_CONTENT_LIMIT: usize = 1000;

/// Whether the gate holds this command for review.
///
/// Already-decided commands (an approval re-entering the pipeline) are
/// never re-gated.
pub fn requires_review(command: &OutputCommand) -> bool {
    if command.review_status != ReviewStatus::None {
        return false;
    }
    if command.priority > REVIEW_PRIORITY_THRESHOLD {
        return true;
    }
    let lowered = command.content.to_lowercase();
    if SENSITIVE_TOKENS.iter().any(|t| lowered.contains(t)) {
        return true;
    }
    if command.metadata.get("external").map(String::as_str) == Some("true") {
        return true;
    }
    command.content.len() > REVIEW_CONTENT_LIMIT
}

/// A reviewer's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Dispatch the command.
    Approve,
    /// Terminate the command.
    Reject,
}

/// One decided command leaving the review queue.
#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    /// The command with its review fields stamped.
    pub command: OutputCommand,
}

/// One parked command, as listed on `/review/pending`.
#[derive(Debug, Clone, Serialize)]
pub struct PendingReview {
    /// The waiting command.
    pub command: OutputCommand,
    /// When it was parked.
    pub queued_at: chrono::DateTime<Utc>,
}

struct Parked {
    command: OutputCommand,
    queued_at: chrono::DateTime<Utc>,
    deadline: Option<Instant>,
}

/// The ordered store of commands awaiting review.
pub struct ReviewQueue {
    parked: Mutex<HashMap<String, Parked>>,
    outcomes: broadcast::Sender<ReviewOutcome>,
    deadline: Option<Duration>,
}

impl ReviewQueue {
    /// Create the queue. `deadline` bounds how long a command may wait.
    pub fn new(deadline: Option<Duration>) -> Self {
        Self {
            parked: Mutex::new(HashMap::new()),
            outcomes: broadcast::channel(64).0,
            deadline,
        }
    }

    /// Subscribe to decisions.
    pub fn subscribe(&self) -> broadcast::Receiver<ReviewOutcome> {
        self.outcomes.subscribe()
    }

    /// Park a command as pending. Returns `false` when the id is already
    /// parked; the caller suppresses that copy as a duplicate.
    pub fn park(&self, mut command: OutputCommand) -> bool {
        command.review_status = ReviewStatus::Pending;
        command.requires_review = true;
        let mut parked = self.parked.lock();
        if parked.contains_key(&command.id) {
            return false;
        }
        tracing::info!(command = %command.id, "command parked for review");
        parked.insert(
            command.id.clone(),
            Parked {
                command,
                queued_at: Utc::now(),
                deadline: self.deadline.map(|d| Instant::now() + d),
            },
        );
        true
    }

    /// Commands currently waiting, oldest first.
    pub fn pending(&self) -> Vec<PendingReview> {
        let mut list: Vec<PendingReview> = self
            .parked
            .lock()
            .values()
            .map(|p| PendingReview {
                command: p.command.clone(),
                queued_at: p.queued_at,
            })
            .collect();
        list.sort_by_key(|p| p.queued_at);
        list
    }

    /// Number of commands currently waiting.
    pub fn len(&self) -> usize {
        self.parked.lock().len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.parked.lock().is_empty()
    }

    /// Apply a reviewer decision to one pending command.
    pub fn decide(
        &self,
        command_id: &str,
        decision: Decision,
        reviewed_by: &str,
        comments: Option<String>,
    ) -> Result<(), PlatformError> {
        let mut parked = self.parked.lock();
        let Some(entry) = parked.remove(command_id) else {
            return Err(PlatformError::Validation(format!(
                "no pending review for command '{command_id}'"
            )));
        };
        drop(parked);

        let mut command = entry.command;
        command.review_status = match decision {
            Decision::Approve => ReviewStatus::Approved,
            Decision::Reject => ReviewStatus::Rejected,
        };
        command.reviewed_by = Some(reviewed_by.to_string());
        command.reviewed_at = Some(Utc::now());
        command.review_comments = comments;

        tracing::info!(
            command = %command.id,
            decision = ?decision,
            reviewed_by,
            "review decided"
        );
        let _ = self.outcomes.send(ReviewOutcome { command });
        Ok(())
    }

    /// Expire overdue commands. Returns how many expired.
    pub fn expire_overdue(&self) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        {
            let mut parked = self.parked.lock();
            let overdue: Vec<String> = parked
                .iter()
                .filter(|(_, p)| p.deadline.map(|d| now >= d).unwrap_or(false))
                .map(|(id, _)| id.clone())
                .collect();
            for id in overdue {
                if let Some(entry) = parked.remove(&id) {
                    expired.push(entry.command);
                }
            }
        }

        let count = expired.len();
        for mut command in expired {
            tracing::warn!(command = %command.id, "review deadline missed");
            command.review_status = ReviewStatus::Expired;
            command.reviewed_at = Some(Utc::now());
            let _ = self.outcomes.send(ReviewOutcome { command });
        }
        count
    }

    /// Deadline sweep loop, woken by a ticker.
    pub async fn run_expiry(&self, tick: Duration, mut shutdown: ShutdownToken) {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    self.expire_overdue();
                }
            }
        }
    }
}
