use crate::config::PostingConfig;
use crate::types::PostStatus;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Identity of the run currently holding the cycle lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    pub run_id: Uuid,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LockOwner {
    pub fn new(acquired_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pid: std::process::id(),
            acquired_at,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.acquired_at
    }

    /// A lock older than `timeout` is presumed abandoned by a crashed run.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.age(now) >= timeout
    }
}

/// Outcome of a lock acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired {
        /// The abandoned lock that was taken over, if any.
        reclaimed: Option<LockOwner>,
    },
    Held(LockOwner),
}

/// One ledger entry. Ledger positions (`seq`) start at 1 and are never reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub seq: u64,
    pub slug: String,
    pub product: String,
    pub product_link: String,
    pub title: String,
    pub timestamp: DateTime<Utc>,
    pub status: PostStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl PostRecord {
    pub fn is_published(&self) -> bool {
        self.status == PostStatus::Published
    }
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    #[serde(default)]
    pub last_post_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rotation_cursor: usize,
    #[serde(default)]
    pub lock_owner: Option<LockOwner>,
}

impl RunState {
    /// Take the lock unless a fresh one is held. A stale lock is replaced and
    /// reported back so the caller can log the takeover.
    pub fn try_lock(
        &mut self,
        owner: LockOwner,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> LockAttempt {
        match self.lock_owner.take() {
            Some(existing) if !existing.is_stale(now, stale_after) => {
                let held = existing.clone();
                self.lock_owner = Some(existing);
                LockAttempt::Held(held)
            }
            previous => {
                self.lock_owner = Some(owner);
                LockAttempt::Acquired {
                    reclaimed: previous,
                }
            }
        }
    }

    /// Clear the lock if `run_id` owns it. Returns false when someone else
    /// holds it (or nobody does).
    pub fn unlock(&mut self, run_id: Uuid) -> bool {
        if self.holds_lock(run_id) {
            self.lock_owner = None;
            true
        } else {
            false
        }
    }

    pub fn holds_lock(&self, run_id: Uuid) -> bool {
        self.lock_owner.as_ref().map(|o| o.run_id) == Some(run_id)
    }

    /// Cursor normalized against the current portfolio length, so a cursor
    /// saved under a longer portfolio still lands on a valid entry.
    pub fn cursor_for(&self, portfolio_len: usize) -> usize {
        if portfolio_len == 0 {
            0
        } else {
            self.rotation_cursor % portfolio_len
        }
    }

    pub fn next_due_at(&self, interval: Duration) -> Option<DateTime<Utc>> {
        self.last_post_at.and_then(|t| t.checked_add_signed(interval))
    }

    pub fn interval_elapsed(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        match self.last_post_at {
            None => true,
            Some(last) => now - last >= interval,
        }
    }
}

/// Whether a new post is due at `now`: the interval since the last post has
/// elapsed and, when capped, fewer than `max_posts_per_day` posts were
/// published in the trailing 24 hours.
pub fn is_due(
    state: &RunState,
    ledger: &[PostRecord],
    posting: &PostingConfig,
    now: DateTime<Utc>,
) -> bool {
    if !state.interval_elapsed(now, posting.interval()) {
        return false;
    }
    match posting.max_posts_per_day {
        Some(cap) => published_since(ledger, now - Duration::hours(24)) < cap as usize,
        None => true,
    }
}

fn published_since(ledger: &[PostRecord], since: DateTime<Utc>) -> usize {
    ledger
        .iter()
        .filter(|r| r.is_published() && r.timestamp > since)
        .count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
