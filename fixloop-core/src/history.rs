//! Historical reconciliation over a PR's full comment and commit history.
//!
//! Catches reviewer feedback that predates automation: the latest reviewer
//! comment is reduced to a list of issues, and each issue is checked against
//! commit messages for a plausible fix. This is a textual heuristic, so an
//! empty result means "no objection found", never "fix verified".

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::classifier::{is_approval, ReviewClassifier};
use crate::comment::{Comment, CommitInfo};
use crate::loops::{detect_loops, LoopReport};

static HISTORY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // 1. **Numbered bold item**
        r"(?m)^\d+\.\s*\*\*(.+?)\*\*",
        // - **Bulleted bold item**
        r"(?m)^[-*]\s*\*\*(.+?)\*\*",
        r"(?i)(?:issue|problem|error|warning|bug):\s*(.+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("history pattern must compile"))
    .collect()
});

static FIX_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:fix|resolve|address|correct)\b").expect("fix verb pattern must compile")
});

/// Content words must be longer than this to count as evidence.
const MIN_KEYWORD_CHARS: usize = 3;

/// Outcome of reconciling a PR's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryReport {
    /// Issues from the latest reviewer comment with no matching fix commit.
    pub unresolved_issues: Vec<String>,
    /// True when the latest reviewer comment is an approval.
    pub is_approved: bool,
    pub loops: LoopReport,
}

impl HistoryReport {
    pub fn has_unresolved(&self) -> bool {
        !self.unresolved_issues.is_empty()
    }
}

/// Extract issue titles from one comment body.
///
/// Three independent patterns are unioned; duplicates by exact trimmed text
/// are removed, first occurrence wins.
pub fn extract_issues(body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut issues = Vec::new();

    for pattern in HISTORY_PATTERNS.iter() {
        for captures in pattern.captures_iter(body) {
            let text = captures[1].trim();
            if !text.is_empty() && seen.insert(text.to_string()) {
                issues.push(text.to_string());
            }
        }
    }

    issues
}

/// Chronologically latest reviewer-authored comment, if any.
pub fn latest_reviewer_comment<'a>(
    classifier: &ReviewClassifier,
    comments: &'a [Comment],
) -> Option<&'a Comment> {
    comments
        .iter()
        .filter(|comment| classifier.is_from_reviewer(comment))
        .max_by_key(|comment| comment.created_at)
}

/// Issues raised by the latest reviewer comment.
///
/// An approval as the latest word clears everything, regardless of what
/// earlier comments listed.
pub fn extract_issues_from_latest_non_approval_comment(
    classifier: &ReviewClassifier,
    comments: &[Comment],
) -> Vec<String> {
    let Some(latest) = latest_reviewer_comment(classifier, comments) else {
        debug!("No reviewer comments in history");
        return Vec::new();
    };

    if is_approval(&latest.body) {
        info!("Latest reviewer comment {} is an approval", latest.id);
        return Vec::new();
    }

    extract_issues(&latest.body)
}

/// Lowercased words of the issue text long enough to be meaningful.
fn content_words(issue: &str) -> Vec<String> {
    issue
        .to_lowercase()
        .split_whitespace()
        .filter(|word| word.chars().count() > MIN_KEYWORD_CHARS)
        .map(str::to_string)
        .collect()
}

/// True iff some commit message carries a fix verb and at least one content
/// word from the issue text.
pub fn is_resolved(issue: &str, commits: &[CommitInfo]) -> bool {
    let keywords = content_words(issue);
    if keywords.is_empty() {
        return false;
    }

    commits.iter().any(|commit| {
        let message = commit.message.to_lowercase();
        FIX_VERB.is_match(&message) && keywords.iter().any(|kw| message.contains(kw.as_str()))
    })
}

/// Issues from the latest non-approval reviewer comment that no commit resolves.
pub fn unresolved_issues(
    classifier: &ReviewClassifier,
    comments: &[Comment],
    commits: &[CommitInfo],
) -> Vec<String> {
    extract_issues_from_latest_non_approval_comment(classifier, comments)
        .into_iter()
        .filter(|issue| !is_resolved(issue, commits))
        .collect()
}

/// Full reconciliation: unresolved issues plus loop detection over every
/// reviewer comment.
pub fn reconcile(
    classifier: &ReviewClassifier,
    comments: &[Comment],
    commits: &[CommitInfo],
) -> HistoryReport {
    let is_approved = latest_reviewer_comment(classifier, comments)
        .map(|comment| is_approval(&comment.body))
        .unwrap_or(false);

    let reviewer_comments: Vec<&Comment> = comments
        .iter()
        .filter(|comment| classifier.is_from_reviewer(comment))
        .collect();

    let report = HistoryReport {
        unresolved_issues: unresolved_issues(classifier, comments, commits),
        is_approved,
        loops: detect_loops(reviewer_comments),
    };

    info!(
        "Reconciled history: {} unresolved issues, {} loops, approved={}",
        report.unresolved_issues.len(),
        report.loops.loops.len(),
        report.is_approved
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comment::{Author, CommentId, CommentKind};
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn reviewer_comment(id: u64, minutes: i64, body: &str) -> Comment {
        Comment {
            id: CommentId(id),
            author: Author::new("codex", true),
            body: body.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
                + Duration::minutes(minutes),
            kind: CommentKind::IssueComment,
            location: None,
        }
    }

    fn human_comment(id: u64, minutes: i64, body: &str) -> Comment {
        Comment {
            author: Author::new("octocat", false),
            ..reviewer_comment(id, minutes, body)
        }
    }

    fn commits(messages: &[&str]) -> Vec<CommitInfo> {
        messages
            .iter()
            .enumerate()
            .map(|(i, msg)| CommitInfo::new(format!("sha{i}"), *msg))
            .collect()
    }

    #[test]
    fn test_extract_numbered_and_bulleted_bold_items() {
        let body = "Findings:\n1. **Missing null check**: user input\n2. **Unbounded retry**\n- **Leaky file handle** in loader";
        assert_eq!(
            extract_issues(body),
            vec!["Missing null check", "Unbounded retry", "Leaky file handle"]
        );
    }

    #[test]
    fn test_extract_keyword_lines() {
        let body = "Bug: panics on empty input\nwarning: slow path taken";
        assert_eq!(
            extract_issues(body),
            vec!["panics on empty input", "slow path taken"]
        );
    }

    #[test]
    fn test_identical_bold_items_collapse() {
        let body = "1. **Missing null check**\n2. **Missing null check**";
        assert_eq!(extract_issues(body), vec!["Missing null check"]);
    }

    #[test]
    fn test_latest_approval_clears_earlier_issues() {
        let classifier = ReviewClassifier::default();
        let comments = vec![
            reviewer_comment(1, 0, "1. **Missing null check**"),
            reviewer_comment(2, 30, "LGTM, ready to merge"),
        ];
        assert!(extract_issues_from_latest_non_approval_comment(&classifier, &comments).is_empty());

        let report = reconcile(&classifier, &comments, &[]);
        assert!(report.is_approved);
        assert!(!report.has_unresolved());
    }

    #[test]
    fn test_latest_is_chosen_by_timestamp_not_position() {
        let classifier = ReviewClassifier::default();
        let comments = vec![
            reviewer_comment(2, 30, "1. **Newer issue here**"),
            reviewer_comment(1, 0, "1. **Older issue here**"),
            human_comment(3, 60, "1. **Human note**"),
        ];
        assert_eq!(
            extract_issues_from_latest_non_approval_comment(&classifier, &comments),
            vec!["Newer issue here"]
        );
    }

    #[test]
    fn test_is_resolved_requires_verb_and_keyword() {
        let issue = "Missing null check for user input";
        assert!(is_resolved(issue, &commits(&["fix: add null check for input"])));
        assert!(!is_resolved(issue, &commits(&["refactor utils"])));
        // keyword without a fix verb
        assert!(!is_resolved(issue, &commits(&["add null check for input"])));
        // fix verb without any content word longer than three characters
        assert!(!is_resolved(issue, &commits(&["fix typo in readme"])));
        assert!(is_resolved(issue, &commits(&["Address USER feedback"])));
    }

    #[test]
    fn test_fix_verb_must_be_a_whole_word() {
        let issue = "Missing tests for parser edge cases";
        assert!(!is_resolved(issue, &commits(&["add fixtures for parser tests"])));
        assert!(!is_resolved(issue, &commits(&["move parser into addressbook"])));
        assert!(!is_resolved(issue, &commits(&["corrections to parser docs"])));
        assert!(!is_resolved(issue, &commits(&["new resolver for parser"])));
        assert!(!is_resolved(issue, &commits(&["Fixed parser edge cases"])));
        assert!(is_resolved(issue, &commits(&["fix parser edge cases"])));
    }

    #[test]
    fn test_indented_bold_items_are_not_titles() {
        let body = "Context:\n   1. **Nested numbered note**\n  - **Nested bullet note**\n1. **Top level issue**";
        assert_eq!(extract_issues(body), vec!["Top level issue"]);
    }

    #[test]
    fn test_short_words_are_not_evidence() {
        assert!(!is_resolved("add a nil map", &commits(&["fix a nil map"])));
    }

    #[test]
    fn test_unresolved_filters_resolved_issues() {
        let classifier = ReviewClassifier::default();
        let comments = vec![reviewer_comment(
            1,
            0,
            "1. **Missing null check**\n2. **Unbounded retry loop**",
        )];
        let history = commits(&["fix: null handling in parser"]);
        assert_eq!(
            unresolved_issues(&classifier, &comments, &history),
            vec!["Unbounded retry loop"]
        );
    }

    #[test]
    fn test_reconcile_reports_loops_across_all_reviewer_comments() {
        let classifier = ReviewClassifier::default();
        let body = "Issue: connection pool is never drained";
        let comments = vec![
            reviewer_comment(1, 0, body),
            reviewer_comment(2, 10, body),
            human_comment(3, 15, body),
            reviewer_comment(4, 20, body),
        ];
        let report = reconcile(&classifier, &comments, &[]);
        assert!(report.loops.has_loops);
        assert_eq!(report.loops.loops[0].occurrences.len(), 3);
        assert_eq!(report.unresolved_issues, vec!["connection pool is never drained"]);
    }

    #[test]
    fn test_no_reviewer_comments() {
        let classifier = ReviewClassifier::default();
        let comments = vec![human_comment(1, 0, "Issue: something is wrong")];
        let report = reconcile(&classifier, &comments, &[]);
        assert!(!report.is_approved);
        assert!(report.unresolved_issues.is_empty());
        assert!(!report.loops.has_loops);
    }

    proptest! {
        #[test]
        fn prop_extract_issues_is_idempotent_and_unique(body in "((\\d\\. \\*\\*[a-z ]{1,12}\\*\\*|Bug: [a-z ]{1,12})\n){0,6}") {
            let first = extract_issues(&body);
            prop_assert_eq!(&first, &extract_issues(&body));
            let unique: HashSet<_> = first.iter().collect();
            prop_assert_eq!(unique.len(), first.len());
        }
    }
}
