//! External identity provider gateway.
//!
//! ARCHITECTURE
//! ============
//! Authentication is fully delegated to a hosted GoTrue-style provider; this
//! module is the only place that talks to it. Every operation is a single
//! round trip with no retries, normalized into typed [`AuthError`] kinds so
//! callers can distinguish a rejected credential from an unreachable provider.
//!
//! The gateway also owns the client-local session (replaced wholesale on
//! sign-in/refresh, cleared on sign-out) and a persistent listener registry
//! that observes every session transition. Stateless variants of the
//! token-bound calls exist for server-side per-request use, where the
//! session lives in cookies instead of gateway state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const FALLBACK_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Path the provider embeds in password-reset emails.
pub const RESET_PASSWORD_REDIRECT_PATH: &str = "/auth/reset-password";

// =============================================================================
// ERROR TYPE
// =============================================================================

/// Typed failure kinds for every gateway operation. Provider-reported
/// rejections keep the provider's message; transport and decode failures
/// collapse into `Transient`.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("auth provider unavailable: {0}")]
    Transient(String),
    #[error("no active session")]
    NoSession,
    #[error("missing configuration: {0}")]
    Config(String),
}

/// Map a provider HTTP status plus response body to an error kind, keeping
/// the provider's human-readable message when one is present.
pub(crate) fn provider_error(status: StatusCode, body: &serde_json::Value) -> AuthError {
    let message = ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| body.get(key).and_then(serde_json::Value::as_str))
        .unwrap_or(FALLBACK_ERROR_MESSAGE)
        .to_owned();

    match status.as_u16() {
        400 | 422 => AuthError::Invalid(message),
        401 | 403 => AuthError::Unauthorized(message),
        404 => AuthError::NotFound(message),
        409 => AuthError::Conflict(message),
        _ => AuthError::Transient(message),
    }
}

// =============================================================================
// DATA MODEL
// =============================================================================

/// User identity as reported by the provider. Immutable here except through
/// gateway calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: Option<String>,
    /// Set once the address is confirmed; pre-confirmed accounts carry this
    /// straight from signup.
    pub email_confirmed_at: Option<String>,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

/// Renewable credential pair identifying a signed-in user. Replaced wholesale
/// on every refresh; never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub expires_at: i64,
    pub user: User,
}

/// Result of a signup: always a user, plus an initial session when the
/// provider pre-confirmed the account.
#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub user: User,
    pub session: Option<Session>,
}

/// The provider returns either a full token response (pre-confirmed signup)
/// or a bare user object (email confirmation pending).
pub(crate) fn parse_signup_outcome(value: serde_json::Value) -> Result<SignUpOutcome, AuthError> {
    if value.get("access_token").is_some() {
        let session: Session = serde_json::from_value(value)
            .map_err(|e| AuthError::Transient(format!("malformed provider response: {e}")))?;
        return Ok(SignUpOutcome { user: session.user.clone(), session: Some(session) });
    }

    let user: User = serde_json::from_value(value)
        .map_err(|e| AuthError::Transient(format!("malformed provider response: {e}")))?;
    Ok(SignUpOutcome { user, session: None })
}

fn parse_session(value: serde_json::Value) -> Result<Session, AuthError> {
    serde_json::from_value(value).map_err(|e| AuthError::Transient(format!("malformed provider response: {e}")))
}

fn parse_user(value: serde_json::Value) -> Result<User, AuthError> {
    serde_json::from_value(value).map_err(|e| AuthError::Transient(format!("malformed provider response: {e}")))
}

// =============================================================================
// CHANGE NOTIFICATION
// =============================================================================

/// Session transitions observable through [`AuthGateway::on_auth_state_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// Observer callback. Invoked synchronously on the task that performed the
/// state change, after the local session was replaced. Listeners must not
/// call back into the gateway.
pub type AuthListener = Arc<dyn Fn(AuthEvent, Option<&Session>) + Send + Sync>;

type ListenerMap = Mutex<HashMap<u64, AuthListener>>;

/// Cancellation handle for a registered listener. `unsubscribe` is idempotent
/// and also runs on drop.
pub struct AuthSubscription {
    id: u64,
    listeners: Weak<ListenerMap>,
}

impl AuthSubscription {
    /// Handle for sources that emit no events (server-side per-request scopes).
    #[must_use]
    pub fn detached() -> Self {
        Self { id: 0, listeners: Weak::new() }
    }

    pub fn unsubscribe(&self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// =============================================================================
// CONFIG
// =============================================================================

/// Provider connection settings loaded from environment.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Provider base URL, no trailing slash.
    pub base_url: String,
    /// Public API key, sent on every request.
    pub api_key: String,
    /// Public site origin used to build redirect links.
    pub site_url: String,
}

impl AuthConfig {
    #[must_use]
    pub fn new(base_url: &str, api_key: &str, site_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
            site_url: site_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Load from `AUTH_PROVIDER_URL`, `AUTH_API_KEY`, `SITE_URL`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Config` naming the first missing variable.
    pub fn from_env() -> Result<Self, AuthError> {
        let base_url =
            std::env::var("AUTH_PROVIDER_URL").map_err(|_| AuthError::Config("AUTH_PROVIDER_URL".into()))?;
        let api_key = std::env::var("AUTH_API_KEY").map_err(|_| AuthError::Config("AUTH_API_KEY".into()))?;
        let site_url = std::env::var("SITE_URL").map_err(|_| AuthError::Config("SITE_URL".into()))?;
        Ok(Self::new(&base_url, &api_key, &site_url))
    }

    /// Absolute redirect target embedded in password-reset emails.
    #[must_use]
    pub fn reset_redirect_url(&self) -> String {
        format!("{}{RESET_PASSWORD_REDIRECT_PATH}", self.site_url)
    }
}

// =============================================================================
// GATEWAY
// =============================================================================

pub struct AuthGateway {
    http: reqwest::Client,
    config: AuthConfig,
    current: Mutex<Option<Session>>,
    listeners: Arc<ListenerMap>,
    next_listener_id: AtomicU64,
}

impl AuthGateway {
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            current: Mutex::new(None),
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Build a gateway from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Config` if a required variable is missing.
    pub fn from_env() -> Result<Self, AuthError> {
        Ok(Self::new(AuthConfig::from_env()?))
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Change notification
    // -------------------------------------------------------------------------

    /// Register a persistent listener for session transitions. The listener
    /// stays registered until the returned handle is unsubscribed or dropped.
    pub fn on_auth_state_change(&self, listener: AuthListener) -> AuthSubscription {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(id, listener);
        AuthSubscription { id, listeners: Arc::downgrade(&self.listeners) }
    }

    fn notify(&self, event: AuthEvent, session: Option<&Session>) {
        // Clone callbacks out so listeners run without holding the registry
        // lock (a listener may unsubscribe itself).
        let listeners: Vec<AuthListener> = self
            .listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            listener(event, session);
        }
    }

    // -------------------------------------------------------------------------
    // Local session
    // -------------------------------------------------------------------------

    /// Current session, if any. Local read, no network.
    #[must_use]
    pub fn get_session(&self) -> Option<Session> {
        self.current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn set_session(&self, session: Option<Session>) {
        *self
            .current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = session;
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Register a new account.
    ///
    /// # Errors
    ///
    /// `Invalid` for rejected email/password, `Conflict` for an existing
    /// account, `Transient` for transport failures.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<SignUpOutcome, AuthError> {
        let body = serde_json::json!({
            "email": email,
            "password": password,
            "data": metadata.unwrap_or_else(|| serde_json::json!({})),
        });
        let value = self.request(Method::POST, "/signup", None, Some(&body)).await?;
        parse_signup_outcome(value)
    }

    /// Exchange credentials for a session. Stores the session locally and
    /// emits `SignedIn`.
    ///
    /// # Errors
    ///
    /// `Unauthorized`/`Invalid` for rejected credentials, `Transient` otherwise.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let body = serde_json::json!({ "email": email, "password": password });
        let value = self
            .request(Method::POST, "/token?grant_type=password", None, Some(&body))
            .await?;
        let session = parse_session(value)?;
        self.set_session(Some(session.clone()));
        self.notify(AuthEvent::SignedIn, Some(&session));
        Ok(session)
    }

    /// Revoke the current session and clear it locally. The local sign-out
    /// proceeds even when the provider revocation round trip fails, so a user
    /// is never stranded signed-in; the failure is logged.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature leaves room for stricter policies.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let previous = self
            .current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();

        if let Some(session) = previous {
            if let Err(e) = self.revoke_token(&session.access_token).await {
                tracing::warn!(error = %e, "session revocation failed; clearing local session anyway");
            }
        }

        self.notify(AuthEvent::SignedOut, None);
        Ok(())
    }

    /// Revoke a specific access token at the provider. Stateless; used by the
    /// HTTP logout route where the session lives in cookies.
    ///
    /// # Errors
    ///
    /// Propagates the provider rejection or transport failure.
    pub async fn revoke_token(&self, access_token: &str) -> Result<(), AuthError> {
        self.request(Method::POST, "/logout", Some(access_token), None).await?;
        Ok(())
    }

    /// Ask the provider to send a password-reset email linking back to
    /// `{SITE_URL}/auth/reset-password`.
    ///
    /// # Errors
    ///
    /// Propagates the provider rejection or transport failure.
    pub async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        let path = recover_path(&self.config);
        let body = serde_json::json!({ "email": email });
        self.request(Method::POST, &path, None, Some(&body)).await?;
        Ok(())
    }

    /// Set a new password for the current session's user and emit `UserUpdated`.
    ///
    /// # Errors
    ///
    /// `NoSession` when signed out; otherwise the provider outcome.
    pub async fn update_password(&self, new_password: &str) -> Result<(), AuthError> {
        let Some(session) = self.get_session() else {
            return Err(AuthError::NoSession);
        };
        let user = self.update_password_with_token(&session.access_token, new_password).await?;

        let mut updated = session;
        updated.user = user;
        self.set_session(Some(updated.clone()));
        self.notify(AuthEvent::UserUpdated, Some(&updated));
        Ok(())
    }

    /// Stateless password update bound to an explicit access token.
    ///
    /// # Errors
    ///
    /// Propagates the provider rejection or transport failure.
    pub async fn update_password_with_token(
        &self,
        access_token: &str,
        new_password: &str,
    ) -> Result<User, AuthError> {
        let body = serde_json::json!({ "password": new_password });
        let value = self.request(Method::PUT, "/user", Some(access_token), Some(&body)).await?;
        parse_user(value)
    }

    /// Replace the current session via the stored refresh token and emit
    /// `TokenRefreshed`.
    ///
    /// # Errors
    ///
    /// `NoSession` when signed out; `Unauthorized` when the refresh token was
    /// revoked; `Transient` otherwise.
    pub async fn refresh_session(&self) -> Result<Session, AuthError> {
        let refresh_token = self
            .get_session()
            .map(|s| s.refresh_token)
            .ok_or(AuthError::NoSession)?;
        let session = self.exchange_refresh_token(&refresh_token).await?;
        self.set_session(Some(session.clone()));
        self.notify(AuthEvent::TokenRefreshed, Some(&session));
        Ok(session)
    }

    /// Exchange a refresh token for a new session without touching local
    /// state. Used by the session-refresh middleware once per navigation.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for a revoked/expired token, `Transient` otherwise.
    pub async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let body = serde_json::json!({ "refresh_token": refresh_token });
        let value = self
            .request(Method::POST, "/token?grant_type=refresh_token", None, Some(&body))
            .await?;
        parse_session(value)
    }

    /// Fetch the user bound to an access token.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for an invalid/expired token, `Transient` otherwise.
    pub async fn fetch_user(&self, access_token: &str) -> Result<User, AuthError> {
        let value = self.request(Method::GET, "/user", Some(access_token), None).await?;
        parse_user(value)
    }

    /// Current user per the provider, or `None` when signed out.
    ///
    /// # Errors
    ///
    /// Propagates provider/transport failures for an existing session.
    pub async fn current_user(&self) -> Result<Option<User>, AuthError> {
        let Some(session) = self.get_session() else {
            return Ok(None);
        };
        self.fetch_user(&session.access_token).await.map(Some)
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    async fn request(
        &self,
        method: Method,
        path_and_query: &str,
        bearer: Option<&str>,
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, AuthError> {
        let url = format!("{}{path_and_query}", self.config.base_url);
        let mut req = self
            .http
            .request(method, &url)
            .header("apikey", &self.config.api_key)
            .bearer_auth(bearer.unwrap_or(&self.config.api_key));
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(|e| {
            tracing::error!(error = %e, path = path_and_query, "auth provider unreachable");
            AuthError::Transient(e.to_string())
        })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AuthError::Transient(e.to_string()))?;
        let value: serde_json::Value = if text.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(serde_json::Value::Null)
        };

        if !status.is_success() {
            let err = provider_error(status, &value);
            tracing::warn!(status = %status, path = path_and_query, error = %err, "auth provider rejected request");
            return Err(err);
        }

        Ok(value)
    }
}

/// Path-and-query for the password-recovery endpoint, with the redirect
/// target percent-encoded into the query string.
pub(crate) fn recover_path(config: &AuthConfig) -> String {
    format!(
        "/recover?redirect_to={}",
        urlencoding::encode(&config.reset_redirect_url())
    )
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
