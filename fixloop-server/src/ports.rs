//! Collaborator boundaries used by the orchestrator.
//!
//! Production implementations live in `github`, `fix_generator` and `git`;
//! tests substitute in-memory fakes.

use anyhow::Result;
use async_trait::async_trait;
use fixloop_core::{Comment, CommitInfo, Issue, Location, ReviewerInlineComment};
use serde::{Deserialize, Serialize};

use crate::config::MergeMethod;
use crate::state::PrKey;

/// A PR plus the app installation authorized to act on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrRef {
    pub key: PrKey,
    pub installation_id: u64,
}

impl PrRef {
    pub fn new(key: PrKey, installation_id: u64) -> Self {
        Self {
            key,
            installation_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestDetails {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub head_ref: String,
    pub base_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub method: MergeMethod,
    pub commit_title: String,
    pub commit_message: String,
}

/// The hosting platform: PR data, comments and merging.
#[async_trait]
pub trait HostingPlatform: Send + Sync {
    async fn get_pull_request(&self, pr: &PrRef) -> Result<PullRequestDetails>;

    /// Submitted reviews, as `CommentKind::Review` comments.
    async fn list_reviews(&self, pr: &PrRef) -> Result<Vec<Comment>>;

    /// Inline diff comments, as `CommentKind::ReviewInline` comments.
    async fn list_review_comments(&self, pr: &PrRef) -> Result<Vec<Comment>>;

    /// Conversation comments, as `CommentKind::IssueComment` comments.
    async fn list_issue_comments(&self, pr: &PrRef) -> Result<Vec<Comment>>;

    async fn list_commits(&self, pr: &PrRef) -> Result<Vec<CommitInfo>>;

    async fn post_comment(&self, pr: &PrRef, body: &str) -> Result<()>;

    async fn merge_pull_request(&self, pr: &PrRef, request: &MergeRequest) -> Result<()>;
}

/// One issue as sent to the fix generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixIssue {
    pub text: String,
    #[serde(rename = "type")]
    pub category: String,
    pub location: Option<Location>,
}

impl From<&Issue> for FixIssue {
    fn from(issue: &Issue) -> Self {
        Self {
            text: issue.text.clone(),
            category: issue.category.to_string(),
            location: issue.location.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewCommentContext {
    pub body: String,
    pub location: Location,
}

impl From<&ReviewerInlineComment> for ReviewCommentContext {
    fn from(comment: &ReviewerInlineComment) -> Self {
        Self {
            body: comment.body.clone(),
            location: comment.location.clone(),
        }
    }
}

/// Request body for fix generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixRequest {
    pub pr_title: String,
    pub pr_description: Option<String>,
    pub branch: String,
    pub base_branch: String,
    pub issues: Vec<FixIssue>,
    pub review_comments: Vec<ReviewCommentContext>,
}

/// A whole-file replacement produced by the fix generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFix {
    pub path: String,
    pub content: String,
}

#[async_trait]
pub trait FixGenerator: Send + Sync {
    /// Generate fixes. An empty list means nothing was produced.
    async fn generate_fixes(&self, request: &FixRequest) -> Result<Vec<FileFix>>;
}

/// A scoped checkout of the PR branch.
///
/// Callers must invoke `cleanup` on every exit path.
#[async_trait]
pub trait WorkingCopy: Send {
    async fn clone_branch(&mut self, branch: &str) -> Result<()>;

    async fn apply_changes(&mut self, fixes: &[FileFix]) -> Result<()>;

    /// Commit everything and push. `Ok(false)` means there was nothing to commit.
    async fn commit_and_push(&mut self, message: &str, branch: &str) -> Result<bool>;

    async fn cleanup(&mut self);
}

#[async_trait]
pub trait WorkspaceProvider: Send + Sync {
    async fn open(&self, pr: &PrRef) -> Result<Box<dyn WorkingCopy>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixloop_core::parse_issues;

    #[test]
    fn test_fix_request_wire_format() {
        let issue = parse_issues("Issue: SQL injection in search endpoint")
            .remove(0)
            .with_location(Location {
                path: Some("src/search.rs".to_string()),
                line: Some(10),
                start_line: None,
                end_line: Some(10),
            });
        let request = FixRequest {
            pr_title: "Add search".to_string(),
            pr_description: None,
            branch: "feature".to_string(),
            base_branch: "main".to_string(),
            issues: vec![FixIssue::from(&issue)],
            review_comments: Vec::new(),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "prTitle": "Add search",
                "prDescription": null,
                "branch": "feature",
                "baseBranch": "main",
                "issues": [{
                    "text": "SQL injection in search endpoint",
                    "type": "security",
                    "location": {"file": "src/search.rs", "line": 10, "startLine": null, "endLine": 10}
                }],
                "reviewComments": []
            })
        );
    }
}
