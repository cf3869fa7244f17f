//! Profile store gateway over the `user_profiles` table.
//!
//! ARCHITECTURE
//! ============
//! One row per identity-provider user: consumable token balance, usage
//! counter, and subscription tier. Every operation is a single SQL statement
//! on the happy path.
//!
//! TRADE-OFFS
//! ==========
//! Token consumption uses one conditional UPDATE with the balance check in
//! the WHERE clause, so concurrent consumers for the same user can never
//! jointly overdraw; the price is a second read on the failure path to tell
//! "no such profile" apart from "insufficient balance".

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Balance granted to a freshly provisioned profile.
pub const DEFAULT_TOKENS_AVAILABLE: i64 = 100;

const PROFILE_COLUMNS: &str = r#"id, email, tokens_available, tokens_used, subscription_tier,
       stripe_customer_id, stripe_subscription_id,
       to_char(created_at, 'YYYY-MM-DD"T"HH24:MI:SSZ') AS created_at"#;

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile not found")]
    NotFound,
    #[error("insufficient tokens: requested {requested}, available {available}")]
    InsufficientTokens { requested: i64, available: i64 },
    #[error("token amount must be positive, got {0}")]
    NonPositiveAmount(i64),
    #[error("invalid subscription tier: {0}")]
    InvalidTier(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

// =============================================================================
// DATA MODEL
// =============================================================================

/// Closed set of subscription tiers. Arbitrary strings are rejected at this
/// boundary and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Pro,
}

impl SubscriptionTier {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
        }
    }

    /// Parse a tier name, case-insensitively.
    ///
    /// # Errors
    ///
    /// `InvalidTier` for anything outside {free, pro}.
    pub fn parse(raw: &str) -> Result<Self, ProfileError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            _ => Err(ProfileError::InvalidTier(raw.to_owned())),
        }
    }
}

impl std::str::FromStr for SubscriptionTier {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row from `user_profiles`. `created_at` is pre-formatted by Postgres.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub tokens_available: i64,
    pub tokens_used: i64,
    pub subscription_tier: SubscriptionTier,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub created_at: Option<String>,
}

impl UserProfile {
    fn from_row(row: &PgRow) -> Result<Self, ProfileError> {
        let tier_raw: String = row.get("subscription_tier");
        Ok(Self {
            id: row.get("id"),
            email: row.get("email"),
            tokens_available: row.get("tokens_available"),
            tokens_used: row.get("tokens_used"),
            subscription_tier: SubscriptionTier::parse(&tier_raw)?,
            stripe_customer_id: row.get("stripe_customer_id"),
            stripe_subscription_id: row.get("stripe_subscription_id"),
            created_at: row.get("created_at"),
        })
    }
}

/// Insert payload for signup-adjacent provisioning. Unset counters fall back
/// to the 100/0/free defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct NewProfile {
    pub id: Uuid,
    pub email: String,
    pub tokens_available: Option<i64>,
    pub tokens_used: Option<i64>,
    pub subscription_tier: Option<SubscriptionTier>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
}

/// Partial update; only supplied fields change. Counter values below zero are
/// rejected by the table CHECK constraints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub tokens_available: Option<i64>,
    pub tokens_used: Option<i64>,
    pub subscription_tier: Option<SubscriptionTier>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Insert a new profile, returning the stored row.
///
/// # Errors
///
/// `Db` on constraint violations (duplicate id/email) or connection failure.
pub async fn create_profile(pool: &PgPool, profile: &NewProfile) -> Result<UserProfile, ProfileError> {
    let sql = format!(
        "INSERT INTO user_profiles
             (id, email, tokens_available, tokens_used, subscription_tier,
              stripe_customer_id, stripe_subscription_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING {PROFILE_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(profile.id)
        .bind(&profile.email)
        .bind(profile.tokens_available.unwrap_or(DEFAULT_TOKENS_AVAILABLE))
        .bind(profile.tokens_used.unwrap_or(0))
        .bind(profile.subscription_tier.unwrap_or(SubscriptionTier::Free).as_str())
        .bind(profile.stripe_customer_id.as_deref())
        .bind(profile.stripe_subscription_id.as_deref())
        .fetch_one(pool)
        .await?;
    UserProfile::from_row(&row)
}

/// Fetch a profile by user id. `Ok(None)` when missing, never an error.
///
/// # Errors
///
/// `Db` on connection failure.
pub async fn get_profile(pool: &PgPool, user_id: Uuid) -> Result<Option<UserProfile>, ProfileError> {
    let sql = format!("SELECT {PROFILE_COLUMNS} FROM user_profiles WHERE id = $1");
    let row = sqlx::query(&sql).bind(user_id).fetch_optional(pool).await?;
    row.as_ref().map(UserProfile::from_row).transpose()
}

/// Fetch a profile by email. `Ok(None)` when missing.
///
/// # Errors
///
/// `Db` on connection failure.
pub async fn get_profile_by_email(pool: &PgPool, email: &str) -> Result<Option<UserProfile>, ProfileError> {
    let sql = format!("SELECT {PROFILE_COLUMNS} FROM user_profiles WHERE email = $1");
    let row = sqlx::query(&sql).bind(email).fetch_optional(pool).await?;
    row.as_ref().map(UserProfile::from_row).transpose()
}

/// Apply a partial update; unset fields keep their stored values.
///
/// # Errors
///
/// `NotFound` when no row matches, `Db` otherwise.
pub async fn update_profile(
    pool: &PgPool,
    user_id: Uuid,
    updates: &ProfileUpdate,
) -> Result<UserProfile, ProfileError> {
    let sql = format!(
        "UPDATE user_profiles
         SET email = COALESCE($2, email),
             tokens_available = COALESCE($3, tokens_available),
             tokens_used = COALESCE($4, tokens_used),
             subscription_tier = COALESCE($5, subscription_tier),
             stripe_customer_id = COALESCE($6, stripe_customer_id),
             stripe_subscription_id = COALESCE($7, stripe_subscription_id)
         WHERE id = $1
         RETURNING {PROFILE_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(user_id)
        .bind(updates.email.as_deref())
        .bind(updates.tokens_available)
        .bind(updates.tokens_used)
        .bind(updates.subscription_tier.map(SubscriptionTier::as_str))
        .bind(updates.stripe_customer_id.as_deref())
        .bind(updates.stripe_subscription_id.as_deref())
        .fetch_optional(pool)
        .await?;
    row.as_ref()
        .map(UserProfile::from_row)
        .transpose()?
        .ok_or(ProfileError::NotFound)
}

/// Delete a profile. Returns whether a row was removed.
///
/// # Errors
///
/// `Db` on connection failure.
pub async fn delete_profile(pool: &PgPool, user_id: Uuid) -> Result<bool, ProfileError> {
    let result = sqlx::query("DELETE FROM user_profiles WHERE id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Full scan ordered by creation time, newest first. Administrative use only;
/// the route layer enforces the admin allowlist.
///
/// # Errors
///
/// `Db` on connection failure.
pub async fn list_profiles(pool: &PgPool) -> Result<Vec<UserProfile>, ProfileError> {
    let sql = format!("SELECT {PROFILE_COLUMNS} FROM user_profiles ORDER BY created_at DESC");
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(UserProfile::from_row).collect()
}

/// Consume tokens atomically. The balance precondition lives in the WHERE
/// clause, so two concurrent consumers can never both pass a check against
/// stale data; the losing statement simply matches zero rows.
///
/// # Errors
///
/// `NonPositiveAmount` before any round trip, `NotFound` /
/// `InsufficientTokens` classified on the failure path, `Db` otherwise.
pub async fn use_tokens(pool: &PgPool, user_id: Uuid, amount: i64) -> Result<UserProfile, ProfileError> {
    if amount <= 0 {
        return Err(ProfileError::NonPositiveAmount(amount));
    }

    let sql = format!(
        "UPDATE user_profiles
         SET tokens_available = tokens_available - $2,
             tokens_used = tokens_used + $2
         WHERE id = $1 AND tokens_available >= $2
         RETURNING {PROFILE_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(user_id)
        .bind(amount)
        .fetch_optional(pool)
        .await?;

    if let Some(row) = &row {
        return UserProfile::from_row(row);
    }

    // Zero rows matched: either the profile is gone or the balance was short.
    match get_profile(pool, user_id).await? {
        None => Err(ProfileError::NotFound),
        Some(profile) => {
            tracing::warn!(
                user_id = %user_id,
                requested = amount,
                available = profile.tokens_available,
                "token consumption rejected"
            );
            Err(ProfileError::InsufficientTokens {
                requested: amount,
                available: profile.tokens_available,
            })
        }
    }
}

/// Grant tokens atomically. No precondition; still a single increment so a
/// concurrent profile update can never be clobbered by a stale snapshot.
///
/// # Errors
///
/// `NonPositiveAmount` before any round trip, `NotFound` when no row matches,
/// `Db` otherwise.
pub async fn add_tokens(pool: &PgPool, user_id: Uuid, amount: i64) -> Result<UserProfile, ProfileError> {
    if amount <= 0 {
        return Err(ProfileError::NonPositiveAmount(amount));
    }

    let sql = format!(
        "UPDATE user_profiles
         SET tokens_available = tokens_available + $2
         WHERE id = $1
         RETURNING {PROFILE_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(user_id)
        .bind(amount)
        .fetch_optional(pool)
        .await?;
    row.as_ref()
        .map(UserProfile::from_row)
        .transpose()?
        .ok_or(ProfileError::NotFound)
}

/// Change the subscription tier; Stripe identifiers are only written when
/// supplied, leaving prior values untouched.
///
/// # Errors
///
/// `NotFound` when no row matches, `Db` otherwise. Tier validity is enforced
/// by the [`SubscriptionTier`] type at the call boundary.
pub async fn update_subscription(
    pool: &PgPool,
    user_id: Uuid,
    tier: SubscriptionTier,
    stripe_customer_id: Option<&str>,
    stripe_subscription_id: Option<&str>,
) -> Result<UserProfile, ProfileError> {
    let sql = format!(
        "UPDATE user_profiles
         SET subscription_tier = $2,
             stripe_customer_id = COALESCE($3, stripe_customer_id),
             stripe_subscription_id = COALESCE($4, stripe_subscription_id)
         WHERE id = $1
         RETURNING {PROFILE_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(user_id)
        .bind(tier.as_str())
        .bind(stripe_customer_id)
        .bind(stripe_subscription_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref()
        .map(UserProfile::from_row)
        .transpose()?
        .ok_or(ProfileError::NotFound)
}

#[cfg(test)]
#[path = "profiles_test.rs"]
mod tests;
