//! Operator HTTP surface.
//!
//! Thin handlers only: translate HTTP into [`AppContext`] calls and back.
//! Everything here is idempotent given the duplicate detector and the
//! update queue, so an operator retrying a trigger is harmless.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use leadcast_core::campaign::Campaign;
use leadcast_core::{AppContext, Error, Scheduler, SessionId};
use leadcast_oauth::{AuthorizationCodeFlow, OAuthClient};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::config::CampaignSettings;

/// Default lookback for manually triggered sweeps, in minutes.
const MANUAL_SWEEP_LOOKBACK_MINUTES: i64 = 60;

/// A login awaiting its OAuth callback.
struct PendingLogin {
    account_email: String,
    flow: AuthorizationCodeFlow,
}

/// Shared state behind the router.
pub struct AppState {
    /// The application context.
    pub ctx: Arc<AppContext>,
    /// The background scheduler, for the status endpoint.
    pub scheduler: Arc<Scheduler>,
    /// OAuth client template for new logins.
    pub oauth: OAuthClient,
    /// Default campaign content from the config file.
    pub default_campaign: CampaignSettings,
    /// Logins started but not yet completed, keyed by state nonce.
    pending_logins: Mutex<HashMap<String, PendingLogin>>,
}

impl AppState {
    /// Creates the router state.
    #[must_use]
    pub fn new(
        ctx: Arc<AppContext>,
        scheduler: Arc<Scheduler>,
        oauth: OAuthClient,
        default_campaign: CampaignSettings,
    ) -> Self {
        Self {
            ctx,
            scheduler,
            oauth,
            default_campaign,
            pending_logins: Mutex::new(HashMap::new()),
        }
    }
}

/// Builds the operator router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/scheduler/status", get(scheduler_status))
        .route("/campaign/run", post(run_campaign))
        .route("/sweeps/replies", post(run_reply_sweep))
        .route("/sweeps/bounces", post(run_bounce_sweep))
        .route("/oauth/login", get(oauth_login))
        .route("/oauth/callback", get(oauth_callback))
        .route("/oauth/logout", post(oauth_logout))
        .with_state(state)
}

/// Core errors rendered as HTTP responses.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Unauthenticated(_) | Error::RefreshFailed { .. } | Error::Unauthorized(_) => {
                StatusCode::UNAUTHORIZED
            }
            Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::Store(_) | Error::Mailer(_) | Error::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn scheduler_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scheduler.status())
}

#[derive(Debug, Deserialize)]
struct RunCampaignRequest {
    session_id: String,
    #[serde(default)]
    campaign: Option<Campaign>,
}

async fn run_campaign(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RunCampaignRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = SessionId::new(request.session_id);
    let campaign = request.campaign.unwrap_or_else(|| Campaign {
        id: state.default_campaign.id.clone(),
        template_name: state.default_campaign.template_name.clone(),
        subject: state.default_campaign.subject.clone(),
        html_body: state.default_campaign.html_body.clone(),
    });

    let outcome = state.ctx.run_campaign(&session, &campaign).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct SweepRequest {
    session_id: String,
    #[serde(default)]
    lookback_minutes: Option<i64>,
}

impl SweepRequest {
    fn since(&self) -> chrono::DateTime<Utc> {
        let minutes = self
            .lookback_minutes
            .unwrap_or(MANUAL_SWEEP_LOOKBACK_MINUTES);
        Utc::now() - Duration::minutes(minutes)
    }
}

async fn run_reply_sweep(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SweepRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = SessionId::new(request.session_id.clone());
    let outcome = state.ctx.run_reply_sweep(&session, request.since()).await?;
    Ok(Json(outcome))
}

async fn run_bounce_sweep(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SweepRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = SessionId::new(request.session_id.clone());
    let outcome = state.ctx.run_bounce_sweep(&session, request.since()).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct LoginQuery {
    email: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    auth_url: String,
    state: String,
}

async fn oauth_login(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LoginQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let nonce = random_token();
    let flow = AuthorizationCodeFlow::new(state.oauth.clone()).with_pkce();
    let auth_url = flow
        .authorization_url(None, Some(&nonce))
        .map_err(Error::OAuth)?;

    state.pending_logins.lock().await.insert(
        nonce.clone(),
        PendingLogin {
            account_email: query.email,
            flow,
        },
    );

    Ok(Json(LoginResponse {
        auth_url: auth_url.to_string(),
        state: nonce,
    }))
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: String,
    state: String,
}

#[derive(Debug, Serialize)]
struct CallbackResponse {
    session_id: String,
    account_email: String,
}

async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(pending) = state.pending_logins.lock().await.remove(&query.state) else {
        return Err(ApiError(Error::Config("unknown login state".into())));
    };

    let token = pending
        .flow
        .exchange_code(&query.code, None)
        .await
        .map_err(Error::OAuth)?;

    let session_id = SessionId::new(random_token());
    state
        .ctx
        .sessions
        .create_session(session_id.clone(), pending.account_email.clone(), &token)
        .await;

    info!(session = %session_id, account = %pending.account_email, "login completed");
    Ok(Json(CallbackResponse {
        session_id: session_id.to_string(),
        account_email: pending.account_email,
    }))
}

#[derive(Debug, Deserialize)]
struct LogoutRequest {
    session_id: String,
}

async fn oauth_logout(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LogoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = SessionId::new(request.session_id);
    let Some(account_email) = state.ctx.sessions.account_email(&session).await else {
        return Err(ApiError(Error::Unauthenticated(session)));
    };

    state.ctx.sessions.remove_session(&session).await;
    let active = state.ctx.sessions.active_ids().await;
    state.ctx.prune_services(&active).await;

    info!(session = %session, account = %account_email, "logout completed");
    Ok(Json(serde_json::json!({ "logged_out": account_email })))
}

/// Random hex token for state nonces and session IDs.
fn random_token() -> String {
    let bytes: [u8; 16] = rand::thread_rng().r#gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn random_tokens_are_unique_hex() {
        let a = random_token();
        let b = random_token();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn sweep_request_lookback_defaults() {
        let request = SweepRequest {
            session_id: "s1".to_string(),
            lookback_minutes: None,
        };
        let since = request.since();
        let expected = Utc::now() - Duration::minutes(MANUAL_SWEEP_LOOKBACK_MINUTES);
        assert!((since - expected).num_seconds().abs() < 5);
    }
}
