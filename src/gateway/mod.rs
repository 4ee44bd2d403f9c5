//! Axum-based HTTP surface for tenant registration, login and token checks.
//!
//! Routes:
//! - `GET  /health`           liveness + tenant count
//! - `POST /api/users`        create a tenant credential (when registration is enabled)
//! - `POST /api/auth/login`   exchange tenant id + password for a bearer token
//! - `GET  /api/auth/verify`  validate the `Authorization: Bearer` token
//!
//! Password hashing and credential file writes are blocking, so those calls
//! run on tokio's blocking pool.

use crate::auth::{AuthError, AuthService, Claims};
use crate::config::GatewayConfig;
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB)
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s); a login costs one PBKDF2 evaluation.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

const LOGIN_FAILED: &str = "Invalid or expired credentials";
const TOKEN_REJECTED: &str = "Invalid or expired token";

pub type ApiResponse = (StatusCode, Json<serde_json::Value>);

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    /// Whether `POST /api/users` accepts new tenants.
    pub allow_registration: bool,
}

/// Request body for tenant creation and login.
#[derive(Deserialize)]
pub struct CredentialsBody {
    pub tenant_id: String,
    pub password: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/api/users", post(handle_create_user))
        .route("/api/auth/login", post(handle_login))
        .route("/api/auth/verify", get(handle_verify))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

/// Bind the configured host and port. The host may be an IPv4/IPv6 literal
/// (brackets optional) or a name such as `localhost`.
pub async fn bind_listener(config: &GatewayConfig) -> Result<TcpListener> {
    let host = config
        .host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(&config.host);
    TcpListener::bind((host, config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))
}

/// Bind and serve until Ctrl+C.
pub async fn run_gateway(config: &GatewayConfig, auth: Arc<AuthService>) -> Result<()> {
    let listener = bind_listener(config).await?;
    let local = listener.local_addr()?;

    tracing::info!(
        addr = %local,
        tenants = auth.store().user_count(),
        registration = config.allow_registration,
        "Gateway listening"
    );

    let app = router(AppState {
        auth,
        allow_registration: config.allow_registration,
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET /health: always public
async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "tenants": state.auth.store().user_count(),
    }))
}

/// POST /api/users: register a tenant credential.
async fn handle_create_user(
    State(state): State<AppState>,
    body: Result<Json<CredentialsBody>, JsonRejection>,
) -> ApiResponse {
    if !state.allow_registration {
        return error_response(StatusCode::FORBIDDEN, "Registration is disabled");
    }

    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &format!("Invalid request: {e}")),
    };

    let auth = Arc::clone(&state.auth);
    let result =
        tokio::task::spawn_blocking(move || auth.create_user(&body.tenant_id, &body.password))
            .await;

    match result {
        Ok(Ok(record)) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "id": record.id,
                "tenant_id": record.tenant_id,
            })),
        ),
        Ok(Err(AuthError::DuplicateCredential)) => {
            error_response(StatusCode::CONFLICT, "Tenant already exists")
        }
        Ok(Err(AuthError::InvalidInput(msg))) => error_response(StatusCode::BAD_REQUEST, &msg),
        Ok(Err(e)) => internal_error("create user", &e),
        Err(e) => internal_error("create user", &e),
    }
}

/// POST /api/auth/login: authenticate and get a bearer token.
async fn handle_login(
    State(state): State<AppState>,
    body: Result<Json<CredentialsBody>, JsonRejection>,
) -> ApiResponse {
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &format!("Invalid request: {e}")),
    };

    let auth = Arc::clone(&state.auth);
    let result =
        tokio::task::spawn_blocking(move || auth.authenticate(&body.tenant_id, &body.password))
            .await;

    match result {
        Ok(Ok(issued)) => {
            let expires_in = issued
                .expires_at
                .saturating_sub(crate::auth::token::now_unix())
                .max(0);
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "token": issued.token,
                    "token_type": "Bearer",
                    "expires_at": issued.expires_at,
                    "expires_in": expires_in,
                })),
            )
        }
        Ok(Err(e)) if e.is_unauthorized() => error_response(StatusCode::UNAUTHORIZED, LOGIN_FAILED),
        Ok(Err(e)) => internal_error("login", &e),
        Err(e) => internal_error("login", &e),
    }
}

/// GET /api/auth/verify: validate the bearer token and echo its claims.
async fn handle_verify(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    match require_tenant(&state, &headers) {
        Ok(claims) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "tenant_id": claims.tenant_id,
                "exp": claims.exp,
            })),
        ),
        Err(resp) => resp,
    }
}

/// Extract bearer token from Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Validate the request's bearer token. Expired and invalid tokens produce
/// the same response.
pub fn require_tenant(state: &AppState, headers: &HeaderMap) -> Result<Claims, ApiResponse> {
    let token = extract_bearer_token(headers)
        .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, TOKEN_REJECTED))?;

    state
        .auth
        .verify_token(token)
        .map_err(|_| error_response(StatusCode::UNAUTHORIZED, TOKEN_REJECTED))
}

fn error_response(status: StatusCode, message: &str) -> ApiResponse {
    (status, Json(serde_json::json!({ "error": message })))
}

fn internal_error(operation: &str, err: &dyn std::fmt::Display) -> ApiResponse {
    tracing::error!("Gateway {operation} failed: {err}");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}
