//! Per-PR automation state.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use fixloop_core::{CommentId, ParsedReview};
use serde::Serialize;

/// Identity of one automated PR: `(owner, repo, pr_number)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PrKey {
    pub owner: String,
    pub repo: String,
    pub pr_number: u64,
}

impl PrKey {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, pr_number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            pr_number,
        }
    }

    /// Build a key from a `owner/repo` full name.
    pub fn from_full_name(full_name: &str, pr_number: u64) -> Option<Self> {
        let (owner, repo) = full_name.split_once('/')?;
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return None;
        }
        Some(Self::new(owner, repo, pr_number))
    }
}

impl fmt::Display for PrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.pr_number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationStatus {
    Active,
    WaitingReview,
    Approved,
    Stopped,
}

impl AutomationStatus {
    /// Transitions allowed through `update_state`. Entering `Stopped` is only
    /// possible through `stop_monitoring`, and nothing leaves `Approved` or
    /// `Stopped` except a fresh takeover.
    pub fn can_transition_to(self, next: AutomationStatus) -> bool {
        use AutomationStatus::*;
        matches!(
            (self, next),
            (Active, WaitingReview)
                | (Active, Approved)
                | (WaitingReview, Approved)
                | (WaitingReview, WaitingReview)
                | (WaitingReview, Active)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AutomationStatus::Active => "active",
            AutomationStatus::WaitingReview => "waiting_review",
            AutomationStatus::Approved => "approved",
            AutomationStatus::Stopped => "stopped",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            AutomationStatus::Active => "🟢",
            AutomationStatus::WaitingReview => "🟡",
            AutomationStatus::Approved => "✅",
            AutomationStatus::Stopped => "🔴",
        }
    }
}

impl fmt::Display for AutomationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded fix attempt. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixAttempt {
    pub timestamp: DateTime<Utc>,
    pub issue_count: usize,
    pub fix_count: usize,
    pub success: bool,
    pub error: Option<String>,
}

/// Outcome of a fix attempt, before the store stamps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixOutcome {
    pub issue_count: usize,
    pub fix_count: usize,
    pub success: bool,
    pub error: Option<String>,
}

impl FixOutcome {
    pub fn succeeded(issue_count: usize, fix_count: usize) -> Self {
        Self {
            issue_count,
            fix_count,
            success: true,
            error: None,
        }
    }

    pub fn failed(issue_count: usize, error: impl Into<String>) -> Self {
        Self {
            issue_count,
            fix_count: 0,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Branch information captured at takeover.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MonitorOptions {
    pub branch: String,
    pub base_branch: String,
}

/// Partial update merged by `update_state`. `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub status: Option<AutomationStatus>,
    pub last_reviewer_event: Option<ParsedReview>,
}

impl StateUpdate {
    pub fn status(status: AutomationStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn reviewer_event(review: ParsedReview) -> Self {
        Self {
            last_reviewer_event: Some(review),
            ..Self::default()
        }
    }
}

/// The mutable automaton for one PR.
///
/// `monitored == false` implies `status == Stopped`.
#[derive(Debug, Clone, Serialize)]
pub struct PrAutomationState {
    pub monitored: bool,
    pub status: AutomationStatus,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub branch: String,
    pub base_branch: String,
    pub processed_comment_ids: HashSet<CommentId>,
    pub fix_attempts: Vec<FixAttempt>,
    pub last_reviewer_event: Option<ParsedReview>,
}

impl PrAutomationState {
    pub fn new(options: MonitorOptions, started_at: DateTime<Utc>) -> Self {
        Self {
            monitored: true,
            status: AutomationStatus::Active,
            started_at,
            stopped_at: None,
            branch: options.branch,
            base_branch: options.base_branch,
            processed_comment_ids: HashSet::new(),
            fix_attempts: Vec::new(),
            last_reviewer_event: None,
        }
    }

    pub fn successful_fix_count(&self) -> usize {
        self.fix_attempts.iter().filter(|a| a.success).count()
    }
}
