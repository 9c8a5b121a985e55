use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fixloop_core::{Author, Comment, CommentId, CommentKind, CommitInfo, Location};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::ports::{HostingPlatform, MergeRequest, PrRef, PullRequestDetails};

const GITHUB_API: &str = "https://api.github.com";
const PER_PAGE: usize = 100;

#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    app_id: u64,
    private_key: String,
    token_cache: Arc<RwLock<HashMap<u64, (String, SystemTime)>>>,
}

#[derive(Debug, Serialize)]
struct CreateCommentRequest<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct MergePullRequestBody<'a> {
    commit_title: &'a str,
    commit_message: &'a str,
    merge_method: &'a str,
}

#[derive(Debug, Serialize)]
struct GitHubAppClaims {
    iss: u64,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: String,
}

/// A GitHub account as it appears in API and webhook payloads.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    #[serde(rename = "type", default)]
    pub account_type: String,
}

fn author_of(user: Option<&GitHubUser>) -> Author {
    match user {
        Some(user) => Author::new(user.login.clone(), user.account_type == "Bot"),
        // Deleted accounts show up as null users.
        None => Author::new("ghost", false),
    }
}

/// A submitted review (`pulls/{n}/reviews`, or `review` in a webhook).
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewPayload {
    pub id: u64,
    pub user: Option<GitHubUser>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl ReviewPayload {
    /// Pending reviews have no submission time and are skipped.
    pub fn into_comment(self) -> Option<Comment> {
        Some(Comment {
            id: CommentId(self.id),
            author: author_of(self.user.as_ref()),
            body: self.body.unwrap_or_default(),
            created_at: self.submitted_at?,
            kind: CommentKind::Review,
            location: None,
        })
    }
}

/// A PR conversation comment (`issues/{n}/comments`, or `comment` in an
/// `issue_comment` webhook).
#[derive(Debug, Clone, Deserialize)]
pub struct IssueCommentPayload {
    pub id: u64,
    pub user: Option<GitHubUser>,
    #[serde(default)]
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl IssueCommentPayload {
    pub fn into_comment(self) -> Comment {
        Comment {
            id: CommentId(self.id),
            author: author_of(self.user.as_ref()),
            body: self.body.unwrap_or_default(),
            created_at: self.created_at,
            kind: CommentKind::IssueComment,
            location: None,
        }
    }
}

/// An inline diff comment (`pulls/{n}/comments`).
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewCommentPayload {
    pub id: u64,
    pub user: Option<GitHubUser>,
    #[serde(default)]
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub path: Option<String>,
    pub line: Option<u64>,
    pub original_line: Option<u64>,
    pub start_line: Option<u64>,
    pub original_start_line: Option<u64>,
}

impl ReviewCommentPayload {
    /// `line` falls back to `original_line` for outdated comments; the end
    /// line is the anchor line.
    pub fn into_comment(self) -> Comment {
        let line = self.line.or(self.original_line);
        Comment {
            id: CommentId(self.id),
            author: author_of(self.user.as_ref()),
            body: self.body.unwrap_or_default(),
            created_at: self.created_at,
            kind: CommentKind::ReviewInline,
            location: Some(Location {
                path: self.path,
                line,
                start_line: self.start_line.or(self.original_start_line),
                end_line: line,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommitPayload {
    sha: String,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    number: u64,
    title: String,
    body: Option<String>,
    head: PullRequestRefResponse,
    base: PullRequestRefResponse,
}

#[derive(Debug, Deserialize)]
struct PullRequestRefResponse {
    #[serde(rename = "ref")]
    ref_name: String,
}

/// Turn a non-success response into an error, logging it.
async fn ensure_success(response: Response, what: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();
    error!("GitHub API error {}: {} - {}", what, status, error_text);
    Err(anyhow!("GitHub API error {}: {} - {}", what, status, error_text))
}

impl GitHubClient {
    pub fn new(app_id: u64, private_key: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("fixloop/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            app_id,
            private_key,
            token_cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn generate_jwt(&self) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("Failed to get current time")?
            .as_secs();

        let claims = GitHubAppClaims {
            iss: self.app_id,
            iat: now - 60,  // clock skew allowance
            exp: now + 600, // 10 minutes, the maximum GitHub accepts
        };

        let header = Header::new(Algorithm::RS256);
        let encoding_key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("Failed to parse private key")?;

        encode(&header, &claims, &encoding_key).context("Failed to encode JWT")
    }

    /// Installation access token, cached until five minutes before expiry.
    ///
    /// Also used to authenticate git over HTTPS.
    pub async fn installation_token(&self, installation_id: u64) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some((token, expires_at)) = cache.get(&installation_id) {
                if expires_at
                    .duration_since(SystemTime::now())
                    .unwrap_or_default()
                    .as_secs()
                    > 300
                {
                    return Ok(token.clone());
                }
            }
        }

        let jwt = self.generate_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            GITHUB_API, installation_id
        );

        info!("Requesting new installation access token");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .context("Failed to send installation token request")?;
        let response = ensure_success(response, "requesting installation token").await?;

        let token_response: InstallationTokenResponse = response
            .json()
            .await
            .context("Failed to parse installation token response")?;

        let expires_at = DateTime::parse_from_rfc3339(&token_response.expires_at)
            .context("Failed to parse token expiration")?
            .with_timezone(&Utc);
        let expires_at_system =
            UNIX_EPOCH + std::time::Duration::from_secs(expires_at.timestamp().max(0) as u64);

        {
            let mut cache = self.token_cache.write().await;
            cache.insert(
                installation_id,
                (token_response.token.clone(), expires_at_system),
            );
        }

        info!("Successfully obtained installation access token");
        Ok(token_response.token)
    }

    async fn forget_token(&self, installation_id: u64) {
        let mut cache = self.token_cache.write().await;
        cache.remove(&installation_id);
    }

    async fn get(&self, installation_id: u64, url: &str) -> Result<Response> {
        let token = self.installation_token(installation_id).await?;
        self.client
            .get(url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))
    }

    /// Fetch every page of a list endpoint.
    ///
    /// A 401 is retried once with a fresh token, since cached tokens can be
    /// revoked before they expire.
    async fn get_paginated<T: DeserializeOwned>(
        &self,
        installation_id: u64,
        path: &str,
        what: &str,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page = 1;

        loop {
            let url = format!(
                "{}{}?page={}&per_page={}",
                GITHUB_API, path, page, PER_PAGE
            );

            let mut response = self.get(installation_id, &url).await?;
            if response.status() == StatusCode::UNAUTHORIZED {
                warn!("Got 401 fetching {} page {}, retrying with fresh token", what, page);
                self.forget_token(installation_id).await;
                response = self.get(installation_id, &url).await?;
            }
            let response = ensure_success(response, &format!("fetching {}", what)).await?;

            let batch: Vec<T> = response
                .json()
                .await
                .with_context(|| format!("Failed to parse {} response", what))?;
            let count = batch.len();
            items.extend(batch);

            if count < PER_PAGE {
                break;
            }
            page += 1;
        }

        info!("Fetched {} {}", items.len(), what);
        Ok(items)
    }
}

#[async_trait]
impl HostingPlatform for GitHubClient {
    async fn get_pull_request(&self, pr: &PrRef) -> Result<PullRequestDetails> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}",
            GITHUB_API, pr.key.owner, pr.key.repo, pr.key.pr_number
        );
        info!("Fetching PR {}", pr.key);

        let response = self.get(pr.installation_id, &url).await?;
        let response = ensure_success(response, "fetching pull request").await?;
        let details: PullRequestResponse = response
            .json()
            .await
            .context("Failed to parse pull request response")?;

        Ok(PullRequestDetails {
            number: details.number,
            title: details.title,
            body: details.body,
            head_ref: details.head.ref_name,
            base_ref: details.base.ref_name,
        })
    }

    async fn list_reviews(&self, pr: &PrRef) -> Result<Vec<Comment>> {
        let path = format!(
            "/repos/{}/{}/pulls/{}/reviews",
            pr.key.owner, pr.key.repo, pr.key.pr_number
        );
        let reviews: Vec<ReviewPayload> = self
            .get_paginated(pr.installation_id, &path, "reviews")
            .await?;
        Ok(reviews
            .into_iter()
            .filter_map(ReviewPayload::into_comment)
            .collect())
    }

    async fn list_review_comments(&self, pr: &PrRef) -> Result<Vec<Comment>> {
        let path = format!(
            "/repos/{}/{}/pulls/{}/comments",
            pr.key.owner, pr.key.repo, pr.key.pr_number
        );
        let comments: Vec<ReviewCommentPayload> = self
            .get_paginated(pr.installation_id, &path, "review comments")
            .await?;
        Ok(comments
            .into_iter()
            .map(ReviewCommentPayload::into_comment)
            .collect())
    }

    async fn list_issue_comments(&self, pr: &PrRef) -> Result<Vec<Comment>> {
        let path = format!(
            "/repos/{}/{}/issues/{}/comments",
            pr.key.owner, pr.key.repo, pr.key.pr_number
        );
        let comments: Vec<IssueCommentPayload> = self
            .get_paginated(pr.installation_id, &path, "issue comments")
            .await?;
        Ok(comments
            .into_iter()
            .map(IssueCommentPayload::into_comment)
            .collect())
    }

    async fn list_commits(&self, pr: &PrRef) -> Result<Vec<CommitInfo>> {
        let path = format!(
            "/repos/{}/{}/pulls/{}/commits",
            pr.key.owner, pr.key.repo, pr.key.pr_number
        );
        let commits: Vec<CommitPayload> = self
            .get_paginated(pr.installation_id, &path, "commits")
            .await?;
        Ok(commits
            .into_iter()
            .map(|c| CommitInfo::new(c.sha, c.commit.message))
            .collect())
    }

    async fn post_comment(&self, pr: &PrRef, body: &str) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            GITHUB_API, pr.key.owner, pr.key.repo, pr.key.pr_number
        );
        info!("Posting comment to PR {}", pr.key);

        let token = self.installation_token(pr.installation_id).await?;
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/vnd.github.v3+json")
            .json(&CreateCommentRequest { body })
            .send()
            .await
            .context("Failed to send PR comment request")?;
        ensure_success(response, "posting comment").await?;

        Ok(())
    }

    async fn merge_pull_request(&self, pr: &PrRef, request: &MergeRequest) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}/merge",
            GITHUB_API, pr.key.owner, pr.key.repo, pr.key.pr_number
        );
        info!(
            "Merging PR {} with method {}",
            pr.key,
            request.method.as_str()
        );

        let token = self.installation_token(pr.installation_id).await?;
        let response = self
            .client
            .put(&url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/vnd.github.v3+json")
            .json(&MergePullRequestBody {
                commit_title: &request.commit_title,
                commit_message: &request.commit_message,
                merge_method: request.method.as_str(),
            })
            .send()
            .await
            .context("Failed to send merge request")?;
        ensure_success(response, "merging pull request").await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_payload_maps_bot_author() {
        let payload: ReviewPayload = serde_json::from_value(serde_json::json!({
            "id": 11,
            "user": {"login": "chatgpt-codex-connector[bot]", "type": "Bot"},
            "body": "LGTM",
            "state": "COMMENTED",
            "submitted_at": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        let comment = payload.into_comment().unwrap();
        assert_eq!(comment.id, CommentId(11));
        assert!(comment.author.is_bot);
        assert_eq!(comment.kind, CommentKind::Review);
        assert_eq!(comment.body, "LGTM");
    }

    #[test]
    fn test_pending_review_is_skipped() {
        let payload: ReviewPayload = serde_json::from_value(serde_json::json!({
            "id": 12,
            "user": {"login": "codex", "type": "User"},
            "body": null,
            "submitted_at": null
        }))
        .unwrap();
        assert!(payload.into_comment().is_none());
    }

    #[test]
    fn test_review_comment_line_falls_back_to_original_line() {
        let payload: ReviewCommentPayload = serde_json::from_value(serde_json::json!({
            "id": 13,
            "user": {"login": "codex", "type": "User"},
            "body": "Problem: off by one",
            "created_at": "2024-05-01T10:00:00Z",
            "path": "src/buf.rs",
            "line": null,
            "original_line": 40,
            "start_line": null,
            "original_start_line": 38
        }))
        .unwrap();
        let comment = payload.into_comment();
        assert!(!comment.author.is_bot);
        assert_eq!(
            comment.location,
            Some(Location {
                path: Some("src/buf.rs".to_string()),
                line: Some(40),
                start_line: Some(38),
                end_line: Some(40),
            })
        );
    }

    #[test]
    fn test_deleted_user_becomes_ghost() {
        let payload: IssueCommentPayload = serde_json::from_value(serde_json::json!({
            "id": 14,
            "user": null,
            "body": "hello",
            "created_at": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(payload.into_comment().author.login, "ghost");
    }
}
