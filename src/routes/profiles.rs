//! Profile routes.
//!
//! Every route requires an authenticated session. Listing and deletion are
//! further restricted to the admin allowlist (`ADMIN_EMAILS`).

use std::collections::HashSet;

use axum::extract::{Path, State};
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::{ApiFailure, Envelope, ok};
use crate::routes::auth::AuthUser;
use crate::services::profiles::{
    self, NewProfile, ProfileError, ProfileUpdate, SubscriptionTier, UserProfile,
};
use crate::state::AppState;

// =============================================================================
// ADMIN GATE
// =============================================================================

/// Parse the `ADMIN_EMAILS` allowlist: comma-separated, case-insensitive,
/// whitespace-tolerant.
pub(crate) fn parse_admin_emails(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|email| email.trim().to_ascii_lowercase())
        .filter(|email| !email.is_empty())
        .collect()
}

fn require_admin(auth: &AuthUser) -> Result<(), ApiFailure> {
    let allowlist = std::env::var("ADMIN_EMAILS")
        .map(|raw| parse_admin_emails(&raw))
        .unwrap_or_default();
    let email = auth
        .user
        .email
        .as_deref()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if allowlist.contains(&email) {
        Ok(())
    } else {
        Err(ApiFailure::Forbidden)
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

fn profile_data(profile: &UserProfile) -> serde_json::Value {
    serde_json::json!({ "profile": profile })
}

/// `POST /api/profiles` — provision a profile row, typically right after
/// signup.
pub async fn create_profile(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(req): Json<NewProfile>,
) -> Result<Json<Envelope>, ApiFailure> {
    let profile = profiles::create_profile(&state.pool, &req).await?;
    tracing::info!(user_id = %profile.id, "profile created");
    Ok(ok(profile_data(&profile)))
}

/// `GET /api/profiles/{id}`
pub async fn get_profile(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope>, ApiFailure> {
    let profile = profiles::get_profile(&state.pool, id)
        .await?
        .ok_or(ProfileError::NotFound)?;
    Ok(ok(profile_data(&profile)))
}

/// `GET /api/profiles/by-email/{email}` — missing profiles are a successful
/// null, matching the lookup the SPA performs during login.
pub async fn get_profile_by_email(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(email): Path<String>,
) -> Result<Json<Envelope>, ApiFailure> {
    let profile = profiles::get_profile_by_email(&state.pool, &email).await?;
    Ok(ok(serde_json::json!({ "profile": profile })))
}

/// `PATCH /api/profiles/{id}` — partial update.
pub async fn update_profile(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<ProfileUpdate>,
) -> Result<Json<Envelope>, ApiFailure> {
    let profile = profiles::update_profile(&state.pool, id, &req).await?;
    Ok(ok(profile_data(&profile)))
}

/// `DELETE /api/profiles/{id}` — admin only.
pub async fn delete_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope>, ApiFailure> {
    require_admin(&auth)?;
    let deleted = profiles::delete_profile(&state.pool, id).await?;
    if !deleted {
        return Err(ProfileError::NotFound.into());
    }
    tracing::info!(user_id = %id, "profile deleted");
    Ok(ok(serde_json::json!({ "deleted": true })))
}

/// `GET /api/profiles` — admin only.
pub async fn list_profiles(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Envelope>, ApiFailure> {
    require_admin(&auth)?;
    let list = profiles::list_profiles(&state.pool).await?;
    Ok(ok(serde_json::json!({ "profiles": list })))
}

// =============================================================================
// TOKENS AND SUBSCRIPTION
// =============================================================================

#[derive(Deserialize)]
pub struct TokenAmount {
    pub amount: i64,
}

/// `POST /api/profiles/{id}/tokens/consume`
pub async fn consume_tokens(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<TokenAmount>,
) -> Result<Json<Envelope>, ApiFailure> {
    let profile = profiles::use_tokens(&state.pool, id, req.amount).await?;
    Ok(ok(profile_data(&profile)))
}

/// `POST /api/profiles/{id}/tokens/grant`
pub async fn grant_tokens(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<TokenAmount>,
) -> Result<Json<Envelope>, ApiFailure> {
    let profile = profiles::add_tokens(&state.pool, id, req.amount).await?;
    Ok(ok(profile_data(&profile)))
}

#[derive(Deserialize)]
pub struct SubscriptionRequest {
    pub tier: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
}

/// `PUT /api/profiles/{id}/subscription` — tier names outside the closed set
/// are rejected before the database is touched.
pub async fn update_subscription(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<SubscriptionRequest>,
) -> Result<Json<Envelope>, ApiFailure> {
    let tier = SubscriptionTier::parse(&req.tier)?;
    let profile = profiles::update_subscription(
        &state.pool,
        id,
        tier,
        req.stripe_customer_id.as_deref(),
        req.stripe_subscription_id.as_deref(),
    )
    .await?;
    tracing::info!(user_id = %id, tier = %tier, "subscription updated");
    Ok(ok(profile_data(&profile)))
}

#[cfg(test)]
#[path = "profiles_test.rs"]
mod tests;
