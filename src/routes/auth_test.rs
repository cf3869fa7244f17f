use super::*;
use crate::services::auth::User;
use uuid::Uuid;

fn test_user(confirmed: bool) -> User {
    User {
        id: Uuid::new_v4(),
        email: Some("new@example.com".into()),
        email_confirmed_at: confirmed.then(|| "2026-01-01T00:00:00Z".to_owned()),
        user_metadata: serde_json::json!({}),
    }
}

// =============================================================================
// validate_signup
// =============================================================================

#[test]
fn accepts_matching_passwords_of_sufficient_length() {
    assert!(validate_signup("hunter22", Some("hunter22")).is_ok());
}

#[test]
fn accepts_missing_confirmation_field() {
    assert!(validate_signup("hunter22", None).is_ok());
}

#[test]
fn rejects_mismatched_confirmation() {
    let err = validate_signup("hunter22", Some("hunter23")).unwrap_err();
    assert_eq!(err, "Passwords do not match");
}

#[test]
fn rejects_short_password() {
    let err = validate_signup("abc12", Some("abc12")).unwrap_err();
    assert_eq!(err, "Password must be at least 6 characters long");
}

#[test]
fn mismatch_is_reported_before_length() {
    let err = validate_signup("abc", Some("xyz")).unwrap_err();
    assert_eq!(err, "Passwords do not match");
}

#[test]
fn six_characters_is_the_floor() {
    assert!(validate_signup("abc123", None).is_ok());
    assert!(validate_signup("abc12", None).is_err());
}

// =============================================================================
// signup_response_data
// =============================================================================

#[test]
fn preconfirmed_signup_gets_delayed_login_redirect() {
    let outcome = SignUpOutcome { user: test_user(true), session: None };
    let data = signup_response_data(&outcome);

    assert_eq!(data["redirect"]["to"], "/login");
    assert_eq!(data["redirect"]["after_ms"], 2000);
    assert_eq!(data["message"], "Account created successfully! Redirecting to login...");
}

#[test]
fn unconfirmed_signup_gets_confirmation_notice() {
    let outcome = SignUpOutcome { user: test_user(false), session: None };
    let data = signup_response_data(&outcome);

    assert!(data.get("redirect").is_none());
    assert_eq!(
        data["message"],
        "Account created successfully! Please check your email to confirm your account."
    );
}

#[test]
fn signup_response_includes_the_user() {
    let user = test_user(true);
    let user_id = user.id;
    let outcome = SignUpOutcome { user, session: None };
    let data = signup_response_data(&outcome);
    assert_eq!(data["user"]["id"], serde_json::json!(user_id));
}
