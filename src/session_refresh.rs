//! Session refresh middleware.
//!
//! ARCHITECTURE
//! ============
//! Runs once per incoming navigation, before the handler: exchanges the
//! refresh-token cookie for a fresh session, rewrites the request so
//! downstream extractors see the rotated access token, and attaches the
//! rotated cookie pair to the outgoing response. Auth pages and static
//! assets are excluded and pass through untouched.
//!
//! TRADE-OFFS
//! ==========
//! The refresh fails open: a navigation is never blocked because the session
//! could not be renewed. Downstream simply observes an anonymous request and
//! the stale cookies age out on their own.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration;

use crate::services::auth::Session;
use crate::state::AppState;

pub const ACCESS_COOKIE: &str = "qt_access_token";
pub const REFRESH_COOKIE: &str = "qt_refresh_token";

const DEFAULT_ACCESS_MAX_AGE_SECS: i64 = 3600;
const REFRESH_MAX_AGE_SECS: i64 = 60 * 60 * 24 * 30;

const EXCLUDED_PREFIXES: &[&str] = &["/login", "/signup", "/auth/", "/assets/"];
const EXCLUDED_PATHS: &[&str] = &["/favicon.ico", "/healthz"];
const STATIC_EXTENSIONS: &[&str] = &[".svg", ".png", ".jpg", ".jpeg", ".gif", ".webp", ".ico", ".css", ".js"];

/// Session rotated by the middleware for this request; downstream extractors
/// prefer this over the (now stale) request cookies.
#[derive(Clone)]
pub struct RefreshedSession(pub Session);

/// True for paths the middleware must never touch: auth pages, the favicon,
/// the health probe, and static assets.
#[must_use]
pub fn is_excluded(path: &str) -> bool {
    EXCLUDED_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
        || EXCLUDED_PATHS.contains(&path)
        || STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Refresh the session cookie pair once per navigation, then forward.
pub async fn session_refresh(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if is_excluded(request.uri().path()) {
        return next.run(request).await;
    }

    let refresh_token = jar
        .get(REFRESH_COOKIE)
        .map(Cookie::value)
        .filter(|token| !token.is_empty())
        .map(str::to_owned);

    let rotated = match refresh_token {
        Some(token) => match state.auth.exchange_refresh_token(&token).await {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(error = %e, path = request.uri().path(), "session refresh failed; continuing unauthenticated");
                None
            }
        },
        None => None,
    };

    if let Some(session) = &rotated {
        request.extensions_mut().insert(RefreshedSession(session.clone()));
    }

    let response = next.run(request).await;

    match rotated {
        Some(session) => (session_cookies(&session), response).into_response(),
        None => response,
    }
}

// =============================================================================
// COOKIE POLICY
// =============================================================================

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

pub(crate) fn cookie_secure() -> bool {
    if let Some(value) = env_bool("COOKIE_SECURE") {
        return value;
    }

    std::env::var("SITE_URL")
        .map(|url| url.starts_with("https://"))
        .unwrap_or(false)
}

fn build_cookie(name: &'static str, value: String, max_age: Duration) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(cookie_secure())
        .max_age(max_age)
        .build()
}

/// Cookie pair for a session: short-lived access token, long-lived refresh
/// token.
#[must_use]
pub fn session_cookies(session: &Session) -> CookieJar {
    let access_max_age = if session.expires_in > 0 {
        session.expires_in
    } else {
        DEFAULT_ACCESS_MAX_AGE_SECS
    };
    CookieJar::new()
        .add(build_cookie(ACCESS_COOKIE, session.access_token.clone(), Duration::seconds(access_max_age)))
        .add(build_cookie(REFRESH_COOKIE, session.refresh_token.clone(), Duration::seconds(REFRESH_MAX_AGE_SECS)))
}

/// Expired cookie pair used on sign-out.
#[must_use]
pub fn clear_session_cookies() -> CookieJar {
    CookieJar::new()
        .add(build_cookie(ACCESS_COOKIE, String::new(), Duration::ZERO))
        .add(build_cookie(REFRESH_COOKIE, String::new(), Duration::ZERO))
}

#[cfg(test)]
#[path = "session_refresh_test.rs"]
mod tests;
