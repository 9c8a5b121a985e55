//! Reviewer comment classification.
//!
//! Decides whether a comment comes from the configured reviewer, whether it
//! signals approval, and which issues it raises.

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::comment::{Author, Comment, CommentId, Location};
use crate::issue::{parse_issues, Issue};

pub const DEFAULT_REVIEWER_ALIASES: &[&str] = &["codex", "codex-bot", "codex-reviewer"];
pub const DEFAULT_REVIEWER_BOT_PATTERN: &str = "codex";

/// Approval phrasings, matched case-insensitively as substrings.
const APPROVAL_PHRASES: &[&str] = &[
    "no major issues",
    "looks good",
    "lgtm",
    "approved",
    "no issues",
    "ready to merge",
    "all clear",
];

/// Affirmative markers that count as approval on their own.
const APPROVAL_MARKERS: &[&str] = &["👍", ":thumbsup:", ":+1:"];

/// Result of classifying one review or comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedReview {
    pub is_from_reviewer: bool,
    pub is_approval: bool,
    pub issues: Vec<Issue>,
    pub summary: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// An inline reviewer comment with its extracted issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerInlineComment {
    pub id: CommentId,
    pub body: String,
    pub location: Location,
    pub issues: Vec<Issue>,
    pub created_at: DateTime<Utc>,
}

/// Identifies the reviewer and classifies what it says.
#[derive(Debug, Clone)]
pub struct ReviewClassifier {
    aliases: Vec<String>,
    bot_pattern: Regex,
}

impl Default for ReviewClassifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_REVIEWER_ALIASES.iter().map(|s| s.to_string()),
            DEFAULT_REVIEWER_BOT_PATTERN,
        )
        .expect("default reviewer pattern must compile")
    }
}

impl ReviewClassifier {
    /// Build a classifier from reviewer aliases and a bot-handle pattern.
    ///
    /// Aliases are lowercased; blank aliases are dropped since an empty alias
    /// would match every author.
    pub fn new(
        aliases: impl IntoIterator<Item = String>,
        bot_pattern: &str,
    ) -> Result<Self, regex::Error> {
        let aliases = aliases
            .into_iter()
            .map(|alias| alias.trim().to_lowercase())
            .filter(|alias| !alias.is_empty())
            .collect();
        let bot_pattern = RegexBuilder::new(bot_pattern)
            .case_insensitive(true)
            .build()?;

        Ok(Self {
            aliases,
            bot_pattern,
        })
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// True if the handle contains a reviewer alias, or the account is a bot
    /// whose handle matches the reviewer pattern.
    pub fn is_reviewer(&self, author: &Author) -> bool {
        let login = author.login.to_lowercase();
        let matches_alias = self.aliases.iter().any(|alias| login.contains(alias));
        let matches_bot = author.is_bot && self.bot_pattern.is_match(&author.login);

        let is_reviewer = matches_alias || matches_bot;
        if is_reviewer {
            debug!("Detected reviewer comment from {}", author.login);
        }
        is_reviewer
    }

    pub fn is_from_reviewer(&self, comment: &Comment) -> bool {
        self.is_reviewer(&comment.author)
    }

    /// Extract issues from a body. Exposed here so callers only need the classifier.
    pub fn parse_issues(&self, body: &str) -> Vec<Issue> {
        parse_issues(body)
    }

    /// Classify a review. Non-reviewer input short-circuits: its body is
    /// never checked for approval or scanned for issues.
    pub fn parse_review(&self, review: &Comment) -> ParsedReview {
        let mut parsed = ParsedReview {
            is_from_reviewer: self.is_from_reviewer(review),
            is_approval: false,
            issues: Vec::new(),
            summary: None,
            timestamp: review.created_at,
        };

        if !parsed.is_from_reviewer {
            return parsed;
        }

        parsed.is_approval = is_approval(&review.body);
        if !review.body.is_empty() {
            parsed.issues = parse_issues(&review.body);
            parsed.summary = Some(review.body.clone());
        }

        parsed
    }

    /// Keep only reviewer-authored inline comments, extracting issues from each.
    ///
    /// Extracted issues carry the comment's location.
    pub fn parse_review_comments(&self, comments: &[Comment]) -> Vec<ReviewerInlineComment> {
        comments
            .iter()
            .filter(|comment| self.is_from_reviewer(comment))
            .map(inline_comment)
            .collect()
    }
}

/// Map an inline comment to its issues, without checking who wrote it.
pub fn inline_comment(comment: &Comment) -> ReviewerInlineComment {
    let location = comment.location.clone().unwrap_or_default();
    let issues = parse_issues(&comment.body)
        .into_iter()
        .map(|issue| issue.with_location(location.clone()))
        .collect();
    ReviewerInlineComment {
        id: comment.id,
        body: comment.body.clone(),
        location,
        issues,
        created_at: comment.created_at,
    }
}

/// True if the body carries an approval phrasing or affirmative marker.
pub fn is_approval(body: &str) -> bool {
    if body.is_empty() {
        return false;
    }

    let lowered = body.to_lowercase();
    let approved = APPROVAL_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
        || APPROVAL_MARKERS.iter().any(|marker| body.contains(marker));

    if approved {
        info!("Detected reviewer approval");
    }
    approved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comment::CommentKind;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn comment(id: u64, login: &str, is_bot: bool, body: &str) -> Comment {
        Comment {
            id: CommentId(id),
            author: Author::new(login, is_bot),
            body: body.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            kind: CommentKind::Review,
            location: None,
        }
    }

    #[test]
    fn test_alias_match_is_case_insensitive_substring() {
        let classifier = ReviewClassifier::default();
        assert!(classifier.is_reviewer(&Author::new("Codex", false)));
        assert!(classifier.is_reviewer(&Author::new("my-CODEX-bot", false)));
        assert!(!classifier.is_reviewer(&Author::new("octocat", false)));
    }

    #[test]
    fn test_bot_pattern_requires_bot_flag() {
        let classifier =
            ReviewClassifier::new(vec!["reviewer".to_string()], "^chatgpt").unwrap();
        assert!(classifier.is_reviewer(&Author::new("chatgpt-codex-connector[bot]", true)));
        assert!(!classifier.is_reviewer(&Author::new("chatgpt-fan", false)));
    }

    #[test]
    fn test_blank_aliases_do_not_match_everyone() {
        let classifier = ReviewClassifier::new(
            vec!["codex".to_string(), "".to_string(), "  ".to_string()],
            "codex",
        )
        .unwrap();
        assert_eq!(classifier.aliases(), &["codex".to_string()]);
        assert!(!classifier.is_reviewer(&Author::new("octocat", false)));
    }

    #[test]
    fn test_invalid_bot_pattern_is_rejected() {
        assert!(ReviewClassifier::new(Vec::<String>::new(), "(unclosed").is_err());
    }

    #[test]
    fn test_is_approval_phrases() {
        assert!(is_approval("No major issues found."));
        assert!(is_approval("LGTM"));
        assert!(is_approval("This looks good to me"));
        assert!(is_approval("Approved, ready to merge"));
        assert!(is_approval("All clear!"));
        assert!(is_approval("Nice work 👍"));
        assert!(is_approval("nice :+1:"));
        assert!(!is_approval("Issue: missing bounds check on index"));
        assert!(!is_approval(""));
    }

    #[test]
    fn test_parse_review_from_reviewer() {
        let classifier = ReviewClassifier::default();
        let review = comment(
            1,
            "codex",
            true,
            "Issue: unchecked unwrap in config loader\nIssue: retry loop has no backoff",
        );
        let parsed = classifier.parse_review(&review);
        assert!(parsed.is_from_reviewer);
        assert!(!parsed.is_approval);
        assert_eq!(parsed.issues.len(), 2);
        assert_eq!(parsed.summary.as_deref(), Some(review.body.as_str()));
        assert_eq!(parsed.timestamp, review.created_at);
    }

    #[test]
    fn test_parse_review_short_circuits_for_other_authors() {
        let classifier = ReviewClassifier::default();
        let review = comment(2, "octocat", false, "LGTM\nIssue: something quite broken here");
        let parsed = classifier.parse_review(&review);
        assert!(!parsed.is_from_reviewer);
        assert!(!parsed.is_approval);
        assert!(parsed.issues.is_empty());
        assert!(parsed.summary.is_none());
    }

    #[test]
    fn test_parse_review_comments_filters_and_locates() {
        let classifier = ReviewClassifier::default();
        let mut inline = comment(3, "codex-bot", true, "Problem: off-by-one in the slice end");
        inline.kind = CommentKind::ReviewInline;
        inline.location = Some(Location {
            path: Some("src/buf.rs".to_string()),
            line: Some(42),
            start_line: None,
            end_line: Some(42),
        });
        let other = comment(4, "octocat", false, "Problem: I disagree with this approach");

        let parsed = classifier.parse_review_comments(&[inline.clone(), other]);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, CommentId(3));
        assert_eq!(parsed[0].location.path.as_deref(), Some("src/buf.rs"));
        assert_eq!(parsed[0].location.start_line, None);
        assert_eq!(parsed[0].issues.len(), 1);
        assert_eq!(
            parsed[0].issues[0].location.as_ref().and_then(|l| l.line),
            Some(42)
        );
    }

    #[test]
    fn test_parse_review_comments_defaults_missing_location() {
        let classifier = ReviewClassifier::default();
        let inline = comment(5, "codex", false, "Fix: close the file handle on error");
        let parsed = classifier.parse_review_comments(&[inline]);
        assert_eq!(parsed[0].location, Location::default());
    }

    proptest! {
        #[test]
        fn prop_non_reviewer_is_never_classified(login in "[a-b]{1,12}", body in ".{0,120}") {
            let classifier = ReviewClassifier::default();
            let parsed = classifier.parse_review(&comment(9, &login, false, &body));
            prop_assert!(!parsed.is_from_reviewer);
            prop_assert!(!parsed.is_approval);
            prop_assert!(parsed.issues.is_empty());
        }
    }
}
