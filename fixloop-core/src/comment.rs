//! Comment data as fetched from the hosting platform.
//!
//! These types are read-only inputs to the classifier and the history
//! passes. The server crate maps GitHub payloads into them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Newtype for a platform comment or review ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentId(pub u64);

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CommentId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Where a comment came from on the pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentKind {
    /// A submitted review (summary body).
    Review,
    /// An inline comment attached to a line of the diff.
    ReviewInline,
    /// A plain conversation comment on the PR.
    IssueComment,
}

/// Source location of an inline review comment.
///
/// Every field is optional; missing values serialize as `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(rename = "file")]
    pub path: Option<String>,
    pub line: Option<u64>,
    pub start_line: Option<u64>,
    pub end_line: Option<u64>,
}

/// The account that wrote a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub login: String,
    /// Whether the platform flags the account as automated.
    #[serde(default)]
    pub is_bot: bool,
}

impl Author {
    pub fn new(login: impl Into<String>, is_bot: bool) -> Self {
        Self {
            login: login.into(),
            is_bot,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub author: Author,
    #[serde(default)]
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub kind: CommentKind,
    #[serde(default)]
    pub location: Option<Location>,
}

/// A commit on the PR branch; only the message is inspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
}

impl CommitInfo {
    pub fn new(sha: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sha: sha.into(),
            message: message.into(),
        }
    }
}
