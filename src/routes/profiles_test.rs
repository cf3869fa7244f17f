use super::*;

// =============================================================================
// parse_admin_emails
// =============================================================================

#[test]
fn parses_comma_separated_list() {
    let set = parse_admin_emails("ops@example.com,admin@example.com");
    assert!(set.contains("ops@example.com"));
    assert!(set.contains("admin@example.com"));
    assert_eq!(set.len(), 2);
}

#[test]
fn normalizes_case_and_whitespace() {
    let set = parse_admin_emails(" Ops@Example.COM , admin@example.com ");
    assert!(set.contains("ops@example.com"));
    assert!(set.contains("admin@example.com"));
}

#[test]
fn ignores_empty_entries() {
    let set = parse_admin_emails("ops@example.com,,  ,");
    assert_eq!(set.len(), 1);
}

#[test]
fn empty_input_yields_empty_allowlist() {
    assert!(parse_admin_emails("").is_empty());
}
