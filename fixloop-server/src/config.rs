use anyhow::{anyhow, Context, Result};
use std::env;
use std::time::Duration;

use fixloop_core::classifier::{DEFAULT_REVIEWER_ALIASES, DEFAULT_REVIEWER_BOT_PATTERN};

pub const DEFAULT_BOT_NAME: &str = "fixloop";
pub const DEFAULT_FIX_API_URL: &str = "https://api.augmentcode.com";

/// How the bot merges an approved PR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMethod {
    Merge,
    Squash,
    Rebase,
}

impl MergeMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            MergeMethod::Merge => "merge",
            MergeMethod::Squash => "squash",
            MergeMethod::Rebase => "rebase",
        }
    }
}

/// Parse MERGE_METHOD. Unset means squash.
pub fn parse_merge_method(value: Option<String>) -> Result<MergeMethod> {
    match value.as_deref().map(str::trim) {
        None | Some("") | Some("squash") => Ok(MergeMethod::Squash),
        Some("merge") => Ok(MergeMethod::Merge),
        Some("rebase") => Ok(MergeMethod::Rebase),
        Some(other) => Err(anyhow!(
            "MERGE_METHOD must be one of merge, squash, rebase (got {})",
            other
        )),
    }
}

/// Split a comma-separated alias list, dropping blank entries.
///
/// Falls back to the default aliases when unset or empty.
pub fn parse_reviewer_aliases(value: Option<String>) -> Vec<String> {
    let aliases: Vec<String> = value
        .unwrap_or_default()
        .split(',')
        .map(|alias| alias.trim().to_string())
        .filter(|alias| !alias.is_empty())
        .collect();

    if aliases.is_empty() {
        DEFAULT_REVIEWER_ALIASES
            .iter()
            .map(|alias| alias.to_string())
            .collect()
    } else {
        aliases
    }
}

/// Parse an optional secret. Missing, empty, or whitespace-only means unset.
pub fn parse_optional_secret(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Parse an optional numeric setting. Unset means `default`.
pub fn parse_u64_value(name: &str, value: Option<String>, default: u64) -> Result<u64> {
    match value {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{} must be a valid number", name)),
        None => Ok(default),
    }
}

/// Like [`parse_u64_value`], but zero is rejected. Used for intervals and
/// timeouts, where zero would panic the timer or fail every call.
pub fn parse_positive_u64(name: &str, value: Option<String>, default: u64) -> Result<u64> {
    match parse_u64_value(name, value, default)? {
        0 => Err(anyhow!("{} must be greater than zero", name)),
        n => Ok(n),
    }
}

fn positive_secs_var(name: &str, default: u64) -> Result<Duration> {
    parse_positive_u64(name, env::var(name).ok(), default).map(Duration::from_secs)
}

/// Reviewer identity settings, shared by the classifier and the orchestrator.
#[derive(Debug, Clone)]
pub struct ReviewerConfig {
    pub aliases: Vec<String>,
    pub bot_pattern: String,
    /// Handle addressed by re-review requests.
    pub handle: String,
}

#[derive(Clone)]
pub struct Config {
    pub github_app_id: u64,
    pub github_private_key: String,
    pub github_webhook_secret: String,
    pub bot_name: String,
    pub reviewer: ReviewerConfig,
    pub fix_api_url: String,
    pub fix_api_key: Option<String>,
    pub fix_timeout: Duration,
    pub git_timeout: Duration,
    /// Unmonitored state older than this is evicted by the cleanup sweep.
    pub state_retention: Duration,
    pub cleanup_interval: Duration,
    pub merge_method: MergeMethod,
    pub port: u16,
    /// Optional bearer token for the /status endpoint.
    /// If not set, /status is disabled (returns 403 Forbidden).
    pub status_auth_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let github_app_id = env::var("GITHUB_APP_ID")
            .context("GITHUB_APP_ID environment variable is required")?
            .parse::<u64>()
            .context("GITHUB_APP_ID must be a valid number")?;

        let github_private_key = env::var("GITHUB_PRIVATE_KEY")
            .context("GITHUB_PRIVATE_KEY environment variable is required")?
            .replace("\\n", "\n");

        let github_webhook_secret = env::var("GITHUB_WEBHOOK_SECRET")
            .context("GITHUB_WEBHOOK_SECRET environment variable is required")?;

        let bot_name = env::var("BOT_NAME")
            .ok()
            .map(|name| name.trim().trim_start_matches('@').to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_BOT_NAME.to_string());

        let aliases = parse_reviewer_aliases(env::var("REVIEWER_ALIASES").ok());
        let bot_pattern = env::var("REVIEWER_BOT_PATTERN")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REVIEWER_BOT_PATTERN.to_string());
        let handle = env::var("REVIEWER_HANDLE")
            .ok()
            .map(|h| h.trim().trim_start_matches('@').to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| aliases[0].clone());

        let fix_api_url = env::var("FIX_API_URL")
            .unwrap_or_else(|_| DEFAULT_FIX_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let fix_api_key = parse_optional_secret(env::var("FIX_API_KEY").ok());

        let fix_timeout = positive_secs_var("FIX_TIMEOUT_SECS", 60)?;
        let git_timeout = positive_secs_var("GIT_TIMEOUT_SECS", 120)?;
        let retention_hours = parse_u64_value(
            "STATE_RETENTION_HOURS",
            env::var("STATE_RETENTION_HOURS").ok(),
            24,
        )?;
        let state_retention = retention_hours
            .checked_mul(3600)
            .map(Duration::from_secs)
            .context("STATE_RETENTION_HOURS is out of range")?;
        let cleanup_interval = positive_secs_var("CLEANUP_INTERVAL_SECS", 3600)?;

        let merge_method = parse_merge_method(env::var("MERGE_METHOD").ok())?;

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let status_auth_token = parse_optional_secret(env::var("STATUS_AUTH_TOKEN").ok());

        Ok(Config {
            github_app_id,
            github_private_key,
            github_webhook_secret,
            bot_name,
            reviewer: ReviewerConfig {
                aliases,
                bot_pattern,
                handle,
            },
            fix_api_url,
            fix_api_key,
            fix_timeout,
            git_timeout,
            state_retention,
            cleanup_interval,
            merge_method,
            port,
            status_auth_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reviewer_aliases_default() {
        assert_eq!(
            parse_reviewer_aliases(None),
            vec!["codex", "codex-bot", "codex-reviewer"]
        );
        assert_eq!(parse_reviewer_aliases(Some(" , ,".to_string())).len(), 3);
    }

    #[test]
    fn test_parse_reviewer_aliases_trims_and_drops_blanks() {
        assert_eq!(
            parse_reviewer_aliases(Some("alice, ,bob-bot ,".to_string())),
            vec!["alice", "bob-bot"]
        );
    }

    #[test]
    fn test_parse_merge_method() {
        assert_eq!(parse_merge_method(None).unwrap(), MergeMethod::Squash);
        assert_eq!(
            parse_merge_method(Some("rebase".to_string())).unwrap(),
            MergeMethod::Rebase
        );
        assert_eq!(
            parse_merge_method(Some(" merge ".to_string())).unwrap(),
            MergeMethod::Merge
        );
        assert!(parse_merge_method(Some("octopus".to_string())).is_err());
    }

    #[test]
    fn test_parse_optional_secret() {
        assert_eq!(parse_optional_secret(None), None);
        assert_eq!(parse_optional_secret(Some("".to_string())), None);
        assert_eq!(parse_optional_secret(Some(" \t".to_string())), None);
        // surrounding whitespace is preserved; only blank values are unset
        assert_eq!(
            parse_optional_secret(Some(" key ".to_string())),
            Some(" key ".to_string())
        );
    }

    #[test]
    fn test_parse_u64_value() {
        assert_eq!(parse_u64_value("PORTS", None, 7).unwrap(), 7);
        assert_eq!(parse_u64_value("PORTS", Some(" 0 ".to_string()), 7).unwrap(), 0);
        assert!(parse_u64_value("PORTS", Some("ten".to_string()), 7).is_err());
    }

    #[test]
    fn test_intervals_and_timeouts_reject_zero() {
        let err = parse_positive_u64("CLEANUP_INTERVAL_SECS", Some("0".to_string()), 3600)
            .unwrap_err();
        assert!(err.to_string().contains("CLEANUP_INTERVAL_SECS"));
        assert!(parse_positive_u64("FIX_TIMEOUT_SECS", Some(" 0".to_string()), 60).is_err());
        assert!(parse_positive_u64("FIX_TIMEOUT_SECS", Some("-5".to_string()), 60).is_err());
        assert_eq!(
            parse_positive_u64("FIX_TIMEOUT_SECS", Some("90".to_string()), 60).unwrap(),
            90
        );
        assert_eq!(parse_positive_u64("GIT_TIMEOUT_SECS", None, 120).unwrap(), 120);
    }
}
