use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// PostStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Published,
    Failed,
    /// Taken down by an operator or by retention; the slug stays reserved.
    Withdrawn,
}

impl PostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
            PostStatus::Withdrawn => "withdrawn",
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PostStatus {
    type Err = crate::error::PressmillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "published" => Ok(PostStatus::Published),
            "failed" => Ok(PostStatus::Failed),
            "withdrawn" => Ok(PostStatus::Withdrawn),
            _ => Err(crate::error::PressmillError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// SkipReason
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another run holds a fresh lock.
    Locked,
    /// The posting interval (or daily cap) has not elapsed.
    NotDue,
    EmptyPortfolio,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::Locked => "locked",
            SkipReason::NotDue => "not_due",
            SkipReason::EmptyPortfolio => "empty_portfolio",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CycleOutcome
// ---------------------------------------------------------------------------

/// Result of one gated scheduler cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Skipped { reason: SkipReason },
    Published { slug: String },
    Failed { product: String, error: String },
}

impl CycleOutcome {
    pub fn skipped(reason: SkipReason) -> Self {
        CycleOutcome::Skipped { reason }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, CycleOutcome::Published { .. })
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Skipped { reason } => write!(f, "skipped ({reason})"),
            CycleOutcome::Published { slug } => write!(f, "published {slug}"),
            CycleOutcome::Failed { product, error } => {
                write!(f, "failed for '{product}': {error}")
            }
        }
    }
}
