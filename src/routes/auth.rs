//! Auth routes — signup/login flows, session management, nav state.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts, Request, State};
use axum::response::{IntoResponse, Json, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::Deserialize;

use super::{ApiFailure, ok};
use crate::services::auth::{self as auth_svc, AuthError, AuthGateway, AuthListener, AuthSubscription, Session, SignUpOutcome};
use crate::services::auth_state::{AuthStateProvider, SessionSource, nav_view};
use crate::session_refresh::{ACCESS_COOKIE, REFRESH_COOKIE, RefreshedSession, clear_session_cookies, session_cookies};
use crate::state::AppState;

/// Signup form policy, mirrored from the SPA's signup page.
pub const MIN_PASSWORD_LEN: usize = 6;
pub const POST_SIGNUP_REDIRECT_TARGET: &str = "/login";
pub const POST_SIGNUP_REDIRECT_DELAY_MS: u64 = 2000;

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Authenticated user resolved from the session cookie (or the session the
/// refresh middleware rotated for this request). Use as a handler parameter
/// to require authentication.
pub struct AuthUser {
    pub user: auth_svc::User,
    pub access_token: String,
}

impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiFailure;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .extensions
            .get::<RefreshedSession>()
            .map(|refreshed| refreshed.0.access_token.clone())
            .or_else(|| {
                CookieJar::from_headers(&parts.headers)
                    .get(ACCESS_COOKIE)
                    .map(Cookie::value)
                    .map(str::to_owned)
            })
            .filter(|token| !token.is_empty())
            .ok_or(ApiFailure::Auth(AuthError::NoSession))?;

        let app_state = AppState::from_ref(state);
        let user = app_state.auth.fetch_user(&token).await.map_err(ApiFailure::Auth)?;

        Ok(Self { user, access_token: token })
    }
}

// =============================================================================
// SIGNUP
// =============================================================================

#[derive(Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub confirm_password: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Form validation performed before any provider round trip.
pub(crate) fn validate_signup(password: &str, confirm_password: Option<&str>) -> Result<(), String> {
    if let Some(confirm) = confirm_password {
        if confirm != password {
            return Err("Passwords do not match".to_owned());
        }
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!("Password must be at least {MIN_PASSWORD_LEN} characters long"));
    }
    Ok(())
}

/// Response payload for a completed signup. Pre-confirmed accounts get the
/// fixed-delay redirect to the login page; others get the check-your-email
/// notice.
pub(crate) fn signup_response_data(outcome: &SignUpOutcome) -> serde_json::Value {
    if outcome.user.email_confirmed_at.is_some() {
        serde_json::json!({
            "user": outcome.user,
            "message": "Account created successfully! Redirecting to login...",
            "redirect": {
                "to": POST_SIGNUP_REDIRECT_TARGET,
                "after_ms": POST_SIGNUP_REDIRECT_DELAY_MS,
            },
        })
    } else {
        serde_json::json!({
            "user": outcome.user,
            "message": "Account created successfully! Please check your email to confirm your account.",
        })
    }
}

/// `POST /api/auth/signup` — validate the form, register with the provider,
/// and set the session cookies when the account came back pre-confirmed.
pub async fn signup(State(state): State<AppState>, Json(req): Json<SignupRequest>) -> Result<Response, ApiFailure> {
    validate_signup(&req.password, req.confirm_password.as_deref()).map_err(ApiFailure::Validation)?;

    let outcome = state.auth.sign_up(&req.email, &req.password, req.metadata).await?;
    tracing::info!(user_id = %outcome.user.id, confirmed = outcome.session.is_some(), "account created");

    let data = signup_response_data(&outcome);
    let response = match &outcome.session {
        Some(session) => (session_cookies(session), ok(data)).into_response(),
        None => ok(data).into_response(),
    };
    Ok(response)
}

// =============================================================================
// SESSION LIFECYCLE
// =============================================================================

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// `POST /api/auth/login` — exchange credentials for a session, set the
/// HttpOnly cookie pair. Tokens never appear in the response body.
pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Result<Response, ApiFailure> {
    let session = state.auth.sign_in(&req.email, &req.password).await?;
    let data = serde_json::json!({
        "user": session.user,
        "session": { "expires_at": session.expires_at },
    });
    Ok((session_cookies(&session), ok(data)).into_response())
}

/// `POST /api/auth/logout` — revoke the request's session at the provider
/// (best effort) and expire both cookies. Never fails the sign-out locally.
pub async fn logout(State(state): State<AppState>, jar: CookieJar, request: Request) -> Response {
    let token = request
        .extensions()
        .get::<RefreshedSession>()
        .map(|refreshed| refreshed.0.access_token.clone())
        .or_else(|| jar.get(ACCESS_COOKIE).map(Cookie::value).map(str::to_owned))
        .filter(|token| !token.is_empty());

    if let Some(token) = token {
        if let Err(e) = state.auth.revoke_token(&token).await {
            tracing::warn!(error = %e, "session revocation failed; clearing cookies anyway");
        }
    }

    (clear_session_cookies(), ok(serde_json::json!({ "message": "Signed out" }))).into_response()
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
}

/// `POST /api/auth/reset-password` — ask the provider to email a reset link
/// targeting `/auth/reset-password`.
pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<super::Envelope>, ApiFailure> {
    state.auth.reset_password(&req.email).await?;
    Ok(ok(serde_json::json!(true)))
}

#[derive(Deserialize)]
pub struct UpdatePasswordRequest {
    pub new_password: String,
}

/// `POST /api/auth/password` — set a new password for the signed-in user.
pub async fn update_password(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<UpdatePasswordRequest>,
) -> Result<Json<super::Envelope>, ApiFailure> {
    state
        .auth
        .update_password_with_token(&auth.access_token, &req.new_password)
        .await?;
    Ok(ok(serde_json::json!(true)))
}

/// `GET /api/auth/session` — the session state the refresh middleware
/// established for this navigation, or null when anonymous.
pub async fn session(request: Request) -> Json<serde_json::Value> {
    let session = request.extensions().get::<RefreshedSession>().map(|refreshed| &refreshed.0);
    match session {
        Some(s) => Json(serde_json::json!({
            "session": { "user": s.user, "expires_at": s.expires_at },
        })),
        None => Json(serde_json::json!({ "session": null })),
    }
}

/// `GET /api/auth/me` — return the current user.
pub async fn me(auth: AuthUser) -> Json<super::Envelope> {
    ok(serde_json::json!({ "user": auth.user }))
}

// =============================================================================
// NAV STATE
// =============================================================================

/// Session source scoped to a single request: the rotated session when the
/// middleware produced one, otherwise the access-token cookie validated
/// against the provider. Emits no change notifications.
struct RequestSessionSource {
    auth: Arc<AuthGateway>,
    rotated: Option<Session>,
    access_token: Option<String>,
    refresh_token: Option<String>,
}

#[async_trait]
impl SessionSource for RequestSessionSource {
    async fn fetch_session(&self) -> Result<Option<Session>, AuthError> {
        if let Some(session) = &self.rotated {
            return Ok(Some(session.clone()));
        }
        let Some(token) = &self.access_token else {
            return Ok(None);
        };
        match self.auth.fetch_user(token).await {
            Ok(user) => Ok(Some(Session {
                access_token: token.clone(),
                refresh_token: self.refresh_token.clone().unwrap_or_default(),
                expires_in: 0,
                expires_at: 0,
                user,
            })),
            // An expired or revoked token is an anonymous visitor, not an error.
            Err(AuthError::Unauthorized(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn subscribe(&self, _listener: AuthListener) -> AuthSubscription {
        AuthSubscription::detached()
    }
}

/// `GET /api/auth/state` — construct a request-scoped auth state provider,
/// await its initial resolution, and return the snapshot plus the nav
/// rendering decision. Session tokens are never included.
pub async fn auth_state(State(state): State<AppState>, jar: CookieJar, request: Request) -> Json<serde_json::Value> {
    let rotated = request
        .extensions()
        .get::<RefreshedSession>()
        .map(|refreshed| refreshed.0.clone());
    let cookie_value = |name: &str| {
        jar.get(name)
            .map(Cookie::value)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    };

    let source = Arc::new(RequestSessionSource {
        auth: Arc::clone(&state.auth),
        rotated,
        access_token: cookie_value(ACCESS_COOKIE),
        refresh_token: cookie_value(REFRESH_COOKIE),
    });

    let provider = AuthStateProvider::mount(source);
    provider.wait_ready().await;
    let snapshot = provider.snapshot();

    Json(serde_json::json!({
        "user": snapshot.user,
        "is_authenticated": snapshot.is_authenticated(),
        "loading": snapshot.loading,
        "error": snapshot.error,
        "nav": nav_view(&snapshot),
    }))
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
