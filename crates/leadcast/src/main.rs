//! `leadcast` - outbound campaign automation service.
//!
//! Wires the OAuth session manager, the lead sheet adapter, the update
//! queue, and the background scheduler into one long-running process with
//! a thin operator HTTP surface.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod config;
mod routes;

use std::sync::Arc;

use anyhow::Context;
use leadcast_core::{
    AppContext, DelayPolicy, RemoteEndpoints, Scheduler, SessionManager, SessionRepository,
    spawn_background_jobs,
};
use leadcast_oauth::{OAuthClient, Provider};
use reqwest::Url;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::AppConfig;
use routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leadcast=debug,leadcast_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting leadcast");

    let config = AppConfig::load()?;
    if config.oauth.client_id.is_empty() {
        warn!("oauth.client_id is empty; logins will fail until it is configured");
    }

    let provider = build_provider(&config)?;
    let mut oauth = OAuthClient::new(config.oauth.client_id.clone(), provider)
        .with_redirect_uri(config.oauth.redirect_uri.clone());
    if let Some(secret) = &config.oauth.client_secret {
        oauth = oauth.with_client_secret(secret.clone());
    }

    let database_path = config.resolve_database_path()?;
    let repository = Arc::new(
        SessionRepository::new(&database_path)
            .await
            .with_context(|| format!("opening session database at {database_path}"))?,
    );

    let sessions = Arc::new(SessionManager::new(oauth.clone()).with_repository(repository));
    let restored = sessions
        .restore()
        .await
        .context("restoring persisted sessions")?;
    info!(restored, "session manager ready");

    let endpoints = RemoteEndpoints {
        sheet_base_url: Url::parse(&config.sheet_base_url)
            .with_context(|| format!("invalid sheet_base_url {}", config.sheet_base_url))?,
        mail_base_url: Url::parse(&config.mail_base_url)
            .with_context(|| format!("invalid mail_base_url {}", config.mail_base_url))?,
    };

    let ctx = Arc::new(AppContext::new(
        Arc::clone(&sessions),
        endpoints,
        build_pacing(&config),
        config.campaign.batch_size,
    ));

    let scheduler = Arc::new(Scheduler::new());
    spawn_background_jobs(&scheduler, &ctx);

    let state = Arc::new(AppState::new(
        Arc::clone(&ctx),
        Arc::clone(&scheduler),
        oauth,
        config.campaign.clone(),
    ));
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "operator endpoints listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving operator endpoints")?;

    info!("leadcast stopped");
    Ok(())
}

/// Resolves the configured OAuth provider preset.
fn build_provider(config: &AppConfig) -> anyhow::Result<Provider> {
    let provider = match config.oauth.provider.to_lowercase().as_str() {
        "google" => Provider::google(),
        "microsoft" => Provider::microsoft(),
        other => anyhow::bail!("unknown oauth provider {other:?} (expected google or microsoft)"),
    };
    provider.context("building oauth provider")
}

/// Resolves the configured pacing mode.
fn build_pacing(config: &AppConfig) -> DelayPolicy {
    match config.campaign.pacing.to_lowercase().as_str() {
        "progressive" => DelayPolicy::progressive(),
        "smart" => DelayPolicy::smart(),
        other => {
            if other != "random" {
                warn!(mode = other, "unknown pacing mode, falling back to random");
            }
            DelayPolicy::random()
        }
    }
}

/// Completes on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("ctrl-c received, shutting down"),
        () = terminate => info!("SIGTERM received, shutting down"),
    }
}
