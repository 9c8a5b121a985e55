use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::github::{IssueCommentPayload, ReviewPayload};
use crate::orchestrator::{EventKind, InboundEvent};
use crate::ports::PrRef;
use crate::state::PrKey;
use crate::AppState;

/// Correlates log lines for one webhook delivery.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

#[derive(Debug, Deserialize)]
pub struct GitHubWebhookPayload {
    pub action: Option<String>,
    pub repository: Option<Repository>,
    pub installation: Option<Installation>,
    pub pull_request: Option<PullRequest>,
    pub issue: Option<Issue>,
    pub review: Option<ReviewPayload>,
    pub comment: Option<IssueCommentPayload>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Repository {
    pub full_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Installation {
    pub id: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequest {
    pub number: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Issue {
    pub number: u64,
    /// Present only when the issue is a pull request.
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub message: String,
}

type HmacSha256 = Hmac<Sha256>;

fn verify_github_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);

    // Constant-time comparison
    mac.verify_slice(&signature_bytes).is_ok()
}

async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let correlation_id = CorrelationId(Uuid::new_v4().to_string());

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let signature = parts
        .headers
        .get("x-hub-signature-256")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !verify_github_signature(&state.webhook_secret, &bytes, signature) {
        error!("Invalid webhook signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let mut new_request = Request::from_parts(parts, axum::body::Body::from(bytes));
    new_request.extensions_mut().insert(correlation_id);

    Ok(next.run(new_request).await)
}

fn event_name(headers: &HeaderMap) -> Option<&str> {
    headers.get("x-github-event").and_then(|h| h.to_str().ok())
}

/// Map a webhook delivery to an orchestrator event.
///
/// Only submitted reviews and newly created comments on pull requests are
/// relevant; everything else yields `None`.
pub fn to_inbound_event(event: &str, payload: GitHubWebhookPayload) -> Option<InboundEvent> {
    let repository = payload.repository?;
    let installation_id = payload.installation?.id;

    let (kind, pr_number, comment) = match (event, payload.action.as_deref()) {
        ("pull_request_review", Some("submitted")) => (
            EventKind::ReviewSubmitted,
            payload.pull_request?.number,
            payload.review?.into_comment()?,
        ),
        ("issue_comment", Some("created")) => {
            let issue = payload.issue?;
            if issue.pull_request.is_none() {
                return None;
            }
            (
                EventKind::IssueCommentCreated,
                issue.number,
                payload.comment?.into_comment(),
            )
        }
        _ => return None,
    };

    let Some(key) = PrKey::from_full_name(&repository.full_name, pr_number) else {
        warn!("Malformed repository name: {}", repository.full_name);
        return None;
    };

    Some(InboundEvent {
        kind,
        pr: PrRef::new(key, installation_id),
        comment,
    })
}

pub async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<WebhookResponse>, StatusCode> {
    let correlation_id = request
        .extensions()
        .get::<CorrelationId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    let (parts, body) = request.into_parts();
    let Some(event) = event_name(&parts.headers).map(str::to_string) else {
        warn!("Webhook delivery without X-GitHub-Event header");
        return Err(StatusCode::BAD_REQUEST);
    };

    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let payload: GitHubWebhookPayload =
        serde_json::from_slice(&bytes).map_err(|_| StatusCode::BAD_REQUEST)?;

    info!(
        "Received {} webhook (action: {:?}, correlation id: {})",
        event, payload.action, correlation_id
    );

    let Some(inbound) = to_inbound_event(&event, payload) else {
        return Ok(Json(WebhookResponse {
            message: "Event ignored".to_string(),
        }));
    };

    let orchestrator = state.orchestrator.clone();
    let span = tracing::info_span!("webhook", correlation_id = %correlation_id, pr = %inbound.pr.key);
    tokio::spawn(
        async move {
            let outcome = orchestrator.handle_event(inbound).await;
            info!("Event handled: {:?}", outcome);
        }
        .instrument(span),
    );

    Ok(Json(WebhookResponse {
        message: "Event accepted".to_string(),
    }))
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook", post(github_webhook_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_signature,
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixloop_core::{CommentId, CommentKind};
    use serde_json::json;

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn payload(value: serde_json::Value) -> GitHubWebhookPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_signature_verification() {
        let body = br#"{"action":"created"}"#;
        let signature = sign("s3cret", body);
        assert!(verify_github_signature("s3cret", body, &signature));
        assert!(!verify_github_signature("other", body, &signature));
        assert!(!verify_github_signature("s3cret", b"tampered", &signature));
        assert!(!verify_github_signature(
            "s3cret",
            body,
            signature.trim_start_matches("sha256=")
        ));
        assert!(!verify_github_signature("s3cret", body, "sha256=not-hex"));
    }

    #[test]
    fn test_review_submitted_maps_to_event() {
        let event = to_inbound_event(
            "pull_request_review",
            payload(json!({
                "action": "submitted",
                "repository": {"full_name": "acme/widgets"},
                "installation": {"id": 77},
                "pull_request": {"number": 5},
                "review": {
                    "id": 900,
                    "user": {"login": "codex", "type": "Bot"},
                    "body": "Issue: missing null check in parser",
                    "submitted_at": "2024-05-01T10:00:00Z"
                }
            })),
        )
        .unwrap();

        assert_eq!(event.kind, EventKind::ReviewSubmitted);
        assert_eq!(event.pr.key, PrKey::new("acme", "widgets", 5));
        assert_eq!(event.pr.installation_id, 77);
        assert_eq!(event.comment.id, CommentId(900));
        assert_eq!(event.comment.kind, CommentKind::Review);
        assert!(event.comment.author.is_bot);
    }

    #[test]
    fn test_pr_comment_maps_to_event() {
        let event = to_inbound_event(
            "issue_comment",
            payload(json!({
                "action": "created",
                "repository": {"full_name": "acme/widgets"},
                "installation": {"id": 77},
                "issue": {"number": 8, "pull_request": {"url": "https://api.github.com/repos/acme/widgets/pulls/8"}},
                "comment": {
                    "id": 901,
                    "user": {"login": "alice", "type": "User"},
                    "body": "@fixloop status",
                    "created_at": "2024-05-01T10:00:00Z"
                }
            })),
        )
        .unwrap();

        assert_eq!(event.kind, EventKind::IssueCommentCreated);
        assert_eq!(event.pr.key.pr_number, 8);
        assert_eq!(event.comment.body, "@fixloop status");
    }

    #[test]
    fn test_irrelevant_deliveries_are_ignored() {
        let plain_issue = payload(json!({
            "action": "created",
            "repository": {"full_name": "acme/widgets"},
            "installation": {"id": 77},
            "issue": {"number": 8},
            "comment": {
                "id": 902,
                "user": {"login": "alice", "type": "User"},
                "body": "@fixloop status",
                "created_at": "2024-05-01T10:00:00Z"
            }
        }));
        assert!(to_inbound_event("issue_comment", plain_issue).is_none());

        let edited = payload(json!({
            "action": "edited",
            "repository": {"full_name": "acme/widgets"},
            "installation": {"id": 77},
            "issue": {"number": 8, "pull_request": {}},
            "comment": {
                "id": 903,
                "user": {"login": "alice", "type": "User"},
                "body": "@fixloop status",
                "created_at": "2024-05-01T10:00:00Z"
            }
        }));
        assert!(to_inbound_event("issue_comment", edited).is_none());

        let push = payload(json!({
            "repository": {"full_name": "acme/widgets"},
            "installation": {"id": 77}
        }));
        assert!(to_inbound_event("push", push).is_none());
    }

    #[test]
    fn test_missing_installation_is_ignored() {
        let event = payload(json!({
            "action": "submitted",
            "repository": {"full_name": "acme/widgets"},
            "pull_request": {"number": 5},
            "review": {
                "id": 904,
                "user": {"login": "codex", "type": "Bot"},
                "body": "LGTM",
                "submitted_at": "2024-05-01T10:00:00Z"
            }
        }));
        assert!(to_inbound_event("pull_request_review", event).is_none());
    }
}
