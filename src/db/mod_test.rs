use super::*;

// =============================================================================
// pool_size
// =============================================================================

#[test]
fn pool_size_defaults_when_unset() {
    assert_eq!(pool_size(None), 5);
}

#[test]
fn pool_size_parses_override() {
    assert_eq!(pool_size(Some("12")), 12);
    assert_eq!(pool_size(Some(" 2 ")), 2);
}

#[test]
fn pool_size_ignores_garbage() {
    assert_eq!(pool_size(Some("many")), 5);
    assert_eq!(pool_size(Some("")), 5);
    assert_eq!(pool_size(Some("-3")), 5);
}

// =============================================================================
// DbError display
// =============================================================================

#[test]
fn missing_url_names_the_variable() {
    assert_eq!(DbError::MissingUrl.to_string(), "DATABASE_URL is not set");
}
