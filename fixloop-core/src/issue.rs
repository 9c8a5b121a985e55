//! Issue extraction from free-text review prose.
//!
//! Extraction is pattern based. Explicitly prefixed lines win; bullet and
//! numbered list items are only consulted when no prefixed line matched.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::comment::Location;

/// Extracted text must be strictly longer than this many characters.
pub const MIN_ISSUE_CHARS: usize = 10;

/// Prefixed-line patterns, tried in order. Group 1 is the issue text.
static PREFIXED_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(?:issue|problem|error|warning|concern):\s*(.+)",
        r"(?i)(?:fix|change|update|modify):\s*(.+)",
        r"❌\s*(.+)",
        r"⚠\x{FE0F}?\s*(.+)",
        r"🔴\s*(.+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("issue pattern must compile"))
    .collect()
});

static LIST_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-*•]|\d+\.)\s+(.+)").expect("list pattern must compile"));

/// Issue category, assigned by keyword match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Security,
    Performance,
    Bug,
    Style,
    Testing,
    Documentation,
    General,
}

/// Keyword vocabularies in priority order; the first category with a hit wins.
const CATEGORY_KEYWORDS: &[(IssueCategory, &[&str])] = &[
    (
        IssueCategory::Security,
        &["security", "vulnerability", "exploit", "injection"],
    ),
    (
        IssueCategory::Performance,
        &["performance", "slow", "optimize", "inefficient"],
    ),
    (IssueCategory::Bug, &["bug", "error", "crash", "fail"]),
    (
        IssueCategory::Style,
        &["style", "format", "convention", "lint"],
    ),
    (IssueCategory::Testing, &["test", "coverage", "spec"]),
    (
        IssueCategory::Documentation,
        &["documentation", "comment", "doc"],
    ),
];

impl IssueCategory {
    /// Categorize issue text. Falls back to `General`.
    pub fn categorize(text: &str) -> Self {
        let lowered = text.to_lowercase();
        CATEGORY_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|kw| lowered.contains(kw)))
            .map(|(category, _)| *category)
            .unwrap_or(IssueCategory::General)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Bug => "bug",
            Self::Style => "style",
            Self::Testing => "testing",
            Self::Documentation => "documentation",
            Self::General => "general",
        }
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured issue extracted from a reviewer comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub text: String,
    pub category: IssueCategory,
    /// The full text the pattern matched, before trimming.
    pub raw_match: String,
    #[serde(default)]
    pub location: Option<Location>,
}

impl Issue {
    pub fn new(text: impl Into<String>, raw_match: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            category: IssueCategory::categorize(&text),
            raw_match: raw_match.into(),
            text,
            location: None,
        }
    }

    /// Key used for dedup and loop detection.
    pub fn normalized(&self) -> String {
        normalize_issue_text(&self.text)
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }
}

/// Case-insensitive, whitespace-trimmed form of issue text.
pub fn normalize_issue_text(text: &str) -> String {
    text.trim().to_lowercase()
}

fn is_substantive(text: &str) -> bool {
    text.chars().count() > MIN_ISSUE_CHARS
}

/// Extract issues from a comment body.
///
/// Results are deduplicated by normalized text, keeping the first occurrence.
pub fn parse_issues(body: &str) -> Vec<Issue> {
    if body.trim().is_empty() {
        return Vec::new();
    }

    let mut issues = Vec::new();

    for pattern in PREFIXED_PATTERNS.iter() {
        for captures in pattern.captures_iter(body) {
            let text = captures[1].trim();
            if is_substantive(text) {
                issues.push(Issue::new(text, &captures[0]));
            }
        }
    }

    if issues.is_empty() {
        for line in body.lines() {
            let trimmed = line.trim();
            if let Some(captures) = LIST_ITEM.captures(trimmed) {
                let text = &captures[1];
                if is_substantive(text) {
                    issues.push(Issue::new(text, trimmed));
                }
            }
        }
    }

    let issues = dedup_issues(issues);
    debug!("Parsed {} issues from comment body", issues.len());
    issues
}

/// Drop issues whose normalized text was already seen. Order is preserved.
pub fn dedup_issues(issues: impl IntoIterator<Item = Issue>) -> Vec<Issue> {
    let mut seen = HashSet::new();
    issues
        .into_iter()
        .filter(|issue| seen.insert(issue.normalized()))
        .collect()
}
