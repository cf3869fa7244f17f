use super::*;

#[tokio::test]
async fn test_app_state_constructs_and_clones() {
    let state = test_helpers::test_app_state();
    let cloned = state.clone();
    assert!(Arc::ptr_eq(&state.auth, &cloned.auth), "clones share the gateway");
    assert_eq!(state.auth.config().base_url, "http://127.0.0.1:9");
}
