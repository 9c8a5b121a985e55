//! Status endpoint: a JSON snapshot of every tracked PR.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::state::{AutomationStatus, FixAttempt, PrAutomationState, PrKey};
use crate::AppState;

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct StatusSummary {
    pub total_prs: usize,
    pub active: usize,
    pub waiting_review: usize,
    pub approved: usize,
    pub stopped: usize,
}

#[derive(Debug, Serialize)]
pub struct PrStatusEntry {
    pub pr: String,
    pub status: AutomationStatus,
    pub status_emoji: &'static str,
    pub monitored: bool,
    pub branch: String,
    pub base_branch: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub processed_comments: usize,
    pub successful_fixes: usize,
    pub last_fix_attempt: Option<FixAttempt>,
}

#[derive(Debug, Serialize)]
pub struct StatusData {
    pub version: String,
    pub summary: StatusSummary,
    pub prs: Vec<PrStatusEntry>,
}

impl StatusData {
    pub fn from_states(states: Vec<(PrKey, PrAutomationState)>, version: String) -> Self {
        let mut summary = StatusSummary {
            total_prs: states.len(),
            ..Default::default()
        };

        let prs = states
            .into_iter()
            .map(|(key, state)| {
                match state.status {
                    AutomationStatus::Active => summary.active += 1,
                    AutomationStatus::WaitingReview => summary.waiting_review += 1,
                    AutomationStatus::Approved => summary.approved += 1,
                    AutomationStatus::Stopped => summary.stopped += 1,
                }

                PrStatusEntry {
                    pr: key.to_string(),
                    status: state.status,
                    status_emoji: state.status.emoji(),
                    monitored: state.monitored,
                    successful_fixes: state.successful_fix_count(),
                    processed_comments: state.processed_comment_ids.len(),
                    last_fix_attempt: state.fix_attempts.last().cloned(),
                    branch: state.branch,
                    base_branch: state.base_branch,
                    started_at: state.started_at,
                    stopped_at: state.stopped_at,
                }
            })
            .collect();

        Self {
            version,
            summary,
            prs,
        }
    }
}

/// Check the bearer token. An unset token disables the endpoint.
#[allow(clippy::result_large_err)]
fn validate_auth(headers: &HeaderMap, auth_token: &Option<String>) -> Result<(), Response> {
    let Some(expected_token) = auth_token else {
        return Err((
            StatusCode::FORBIDDEN,
            "Status endpoint is disabled (STATUS_AUTH_TOKEN not configured)",
        )
            .into_response());
    };

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth_header.and_then(|value| value.strip_prefix("Bearer ")) {
        Some(provided_token) if provided_token == expected_token => Ok(()),
        Some(_) => Err((StatusCode::UNAUTHORIZED, "Invalid token").into_response()),
        None => Err((
            StatusCode::UNAUTHORIZED,
            "Missing Authorization header. Expected: Bearer <token>",
        )
            .into_response()),
    }
}

pub async fn status_handler(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    if let Err(response) = validate_auth(&headers, &state.status_auth_token) {
        return response;
    }

    let all_states = state.orchestrator.store().all().await;
    Json(StatusData::from_states(all_states, crate::get_bot_version())).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{FixOutcome, MonitorOptions, PrStateStore, StateUpdate};
    use axum::http::HeaderValue;

    fn options() -> MonitorOptions {
        MonitorOptions {
            branch: "feature".to_string(),
            base_branch: "main".to_string(),
        }
    }

    #[test]
    fn test_auth_disabled_without_token() {
        let err = validate_auth(&HeaderMap::new(), &None).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_auth_checks_bearer_token() {
        let token = Some("test-token-123".to_string());

        let mut headers = HeaderMap::new();
        assert_eq!(
            validate_auth(&headers, &token).unwrap_err().status(),
            StatusCode::UNAUTHORIZED
        );

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer wrong-token"),
        );
        assert_eq!(
            validate_auth(&headers, &token).unwrap_err().status(),
            StatusCode::UNAUTHORIZED
        );

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer test-token-123"),
        );
        assert!(validate_auth(&headers, &token).is_ok());
    }

    #[tokio::test]
    async fn test_status_counts_by_state() {
        let store = PrStateStore::new();
        let a = PrKey::new("acme", "widgets", 1);
        let b = PrKey::new("acme", "widgets", 2);
        let c = PrKey::new("acme", "gadgets", 3);

        store.start_monitoring(&a, options()).await;
        store.start_monitoring(&b, options()).await;
        store.start_monitoring(&c, options()).await;
        store
            .record_fix_attempt(&b, FixOutcome::succeeded(2, 1))
            .await;
        store
            .update_state(&b, StateUpdate::status(AutomationStatus::WaitingReview))
            .await;
        store.stop_monitoring(&c).await;

        let data = StatusData::from_states(store.all().await, "0.1.0".to_string());
        assert_eq!(
            data.summary,
            StatusSummary {
                total_prs: 3,
                active: 1,
                waiting_review: 1,
                approved: 0,
                stopped: 1,
            }
        );

        let entry = data.prs.iter().find(|p| p.pr == "acme/widgets#2").unwrap();
        assert_eq!(entry.successful_fixes, 1);
        assert_eq!(entry.status_emoji, "🟡");
        assert!(entry.last_fix_attempt.as_ref().is_some_and(|a| a.success));
    }
}
