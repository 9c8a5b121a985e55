use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fixloop_core::{CommandParser, ReviewClassifier};
use fixloop_server::cleanup::cleanup_loop;
use fixloop_server::config::Config;
use fixloop_server::fix_generator::HttpFixGenerator;
use fixloop_server::git::GitWorkspaceProvider;
use fixloop_server::github::GitHubClient;
use fixloop_server::{app_router, AppState, Orchestrator, OrchestratorSettings, PrStateStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting fixloop {}", fixloop_server::get_bot_version());

    let config = Config::from_env()
        .context("Failed to load configuration from environment variables")?;

    let github_client =
        GitHubClient::new(config.github_app_id, config.github_private_key.clone())?;
    let fix_generator = HttpFixGenerator::new(
        &config.fix_api_url,
        config.fix_api_key.clone(),
        config.fix_timeout,
    )?;
    let workspaces =
        GitWorkspaceProvider::new(github_client.clone(), config.git_timeout, &config.bot_name);

    let classifier = ReviewClassifier::new(
        config.reviewer.aliases.clone(),
        &config.reviewer.bot_pattern,
    )
    .context("REVIEWER_BOT_PATTERN must be a valid regular expression")?;
    let parser = CommandParser::new(&config.bot_name).context("Invalid BOT_NAME")?;

    let store = Arc::new(PrStateStore::new());
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        classifier,
        parser,
        Arc::new(github_client),
        Arc::new(fix_generator),
        Arc::new(workspaces),
        OrchestratorSettings {
            reviewer_handle: config.reviewer.handle.clone(),
            fix_timeout: config.fix_timeout,
            merge_method: config.merge_method,
        },
    ));

    let retention = chrono::Duration::from_std(config.state_retention)
        .context("STATE_RETENTION_HOURS is out of range")?;
    tokio::spawn(cleanup_loop(store, config.cleanup_interval, retention));

    let app_state = Arc::new(AppState {
        orchestrator,
        webhook_secret: config.github_webhook_secret,
        status_auth_token: config.status_auth_token,
    });
    let app = app_router(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!(
        "Listening on port {} as @{}, reviewer @{}",
        config.port, config.bot_name, config.reviewer.handle
    );

    axum::serve(listener, app).await?;

    Ok(())
}
