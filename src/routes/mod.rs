//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the auth and profile APIs, layers the session-refresh middleware
//! over every navigation, and serves the static marketing site as the
//! fallback. All API responses use the `{success, error, data}` envelope the
//! SPA consumes.

pub mod auth;
pub mod profiles;

use std::path::PathBuf;

use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::services::auth::AuthError;
use crate::services::profiles::ProfileError;
use crate::session_refresh;
use crate::state::AppState;

/// Application router: API routes + session-refresh middleware + static
/// marketing site fallback.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let website_service = ServeDir::new(website_dir()).append_index_html_on_directories(true);

    Router::new()
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/reset-password", post(auth::reset_password))
        .route("/api/auth/password", post(auth::update_password))
        .route("/api/auth/session", get(auth::session))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/state", get(auth::auth_state))
        .route("/api/profiles", get(profiles::list_profiles).post(profiles::create_profile))
        .route("/api/profiles/by-email/{email}", get(profiles::get_profile_by_email))
        .route(
            "/api/profiles/{id}",
            get(profiles::get_profile)
                .patch(profiles::update_profile)
                .delete(profiles::delete_profile),
        )
        .route("/api/profiles/{id}/tokens/consume", post(profiles::consume_tokens))
        .route("/api/profiles/{id}/tokens/grant", post(profiles::grant_tokens))
        .route("/api/profiles/{id}/subscription", put(profiles::update_subscription))
        .route("/healthz", get(healthz))
        .fallback_service(website_service)
        .layer(axum::middleware::from_fn_with_state(state.clone(), session_refresh::session_refresh))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolve the static marketing site directory.
fn website_dir() -> PathBuf {
    std::env::var("WEBSITE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("website"))
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

// =============================================================================
// RESPONSE ENVELOPE
// =============================================================================

/// Legacy response shape the SPA consumes: `{success, error, data}`.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub success: bool,
    pub error: Option<String>,
    pub data: serde_json::Value,
}

/// Successful envelope with payload.
pub fn ok(data: serde_json::Value) -> Json<Envelope> {
    Json(Envelope { success: true, error: None, data })
}

/// Gateway failures mapped onto HTTP statuses. The envelope keeps the typed
/// error's message so the SPA surface is unchanged while server logs and
/// statuses preserve the kind.
#[derive(Debug)]
pub enum ApiFailure {
    Auth(AuthError),
    Profile(ProfileError),
    Validation(String),
    Forbidden,
}

impl From<AuthError> for ApiFailure {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

impl From<ProfileError> for ApiFailure {
    fn from(err: ProfileError) -> Self {
        Self::Profile(err)
    }
}

pub(crate) fn auth_error_status(err: &AuthError) -> StatusCode {
    match err {
        AuthError::Invalid(_) => StatusCode::BAD_REQUEST,
        AuthError::Unauthorized(_) | AuthError::NoSession => StatusCode::UNAUTHORIZED,
        AuthError::NotFound(_) => StatusCode::NOT_FOUND,
        AuthError::Conflict(_) => StatusCode::CONFLICT,
        AuthError::Transient(_) => StatusCode::BAD_GATEWAY,
        AuthError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn profile_error_status(err: &ProfileError) -> StatusCode {
    match err {
        ProfileError::NotFound => StatusCode::NOT_FOUND,
        ProfileError::InsufficientTokens { .. } => StatusCode::CONFLICT,
        ProfileError::NonPositiveAmount(_) => StatusCode::BAD_REQUEST,
        ProfileError::InvalidTier(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ProfileError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Auth(e) => (auth_error_status(e), e.to_string()),
            Self::Profile(e) => (profile_error_status(e), e.to_string()),
            Self::Validation(message) => (StatusCode::BAD_REQUEST, message.clone()),
            Self::Forbidden => (StatusCode::FORBIDDEN, "admin access required".to_owned()),
        };
        let envelope = Envelope { success: false, error: Some(message), data: serde_json::Value::Null };
        (status, Json(envelope)).into_response()
    }
}
