use super::*;
use crate::services::auth::AuthEvent;
use std::sync::Mutex as StdMutex;
use tokio::sync::Semaphore;
use tokio::time::{Duration, timeout};
use uuid::Uuid;

fn test_user(email: Option<&str>) -> User {
    User {
        id: Uuid::new_v4(),
        email: email.map(str::to_owned),
        email_confirmed_at: Some("2026-01-01T00:00:00Z".into()),
        user_metadata: serde_json::json!({}),
    }
}

fn test_session(email: Option<&str>) -> Session {
    Session {
        access_token: "access-abc".into(),
        refresh_token: "refresh-def".into(),
        expires_in: 3600,
        expires_at: 1_900_000_000,
        user: test_user(email),
    }
}

// =============================================================================
// Mock session source: the fetch blocks until the gate is opened, and the
// registered listener can be driven manually.
// =============================================================================

struct MockSource {
    fetch_gate: Semaphore,
    fetch_result: StdMutex<Option<Result<Option<Session>, AuthError>>>,
    listener: StdMutex<Option<AuthListener>>,
}

impl MockSource {
    /// Source whose fetch resolves only after `open_gate`.
    fn gated(result: Result<Option<Session>, AuthError>) -> Arc<Self> {
        Arc::new(Self {
            fetch_gate: Semaphore::new(0),
            fetch_result: StdMutex::new(Some(result)),
            listener: StdMutex::new(None),
        })
    }

    /// Source whose fetch resolves immediately.
    fn immediate(result: Result<Option<Session>, AuthError>) -> Arc<Self> {
        let source = Self::gated(result);
        source.open_gate();
        source
    }

    fn open_gate(&self) {
        self.fetch_gate.add_permits(1);
    }

    /// Deliver a change notification through the registered listener.
    fn emit(&self, event: AuthEvent, session: Option<&Session>) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
            .expect("provider should have subscribed");
        listener(event, session);
    }
}

#[async_trait]
impl SessionSource for MockSource {
    async fn fetch_session(&self) -> Result<Option<Session>, AuthError> {
        let permit = self.fetch_gate.acquire().await.expect("gate closed");
        permit.forget();
        self.fetch_result
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
            .unwrap_or(Ok(None))
    }

    fn subscribe(&self, listener: AuthListener) -> AuthSubscription {
        *self
            .listener
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(listener);
        AuthSubscription::detached()
    }
}

/// Poll until `predicate` holds or the deadline passes.
async fn wait_until(provider: &AuthStateProvider, predicate: impl Fn(&AuthSnapshot) -> bool) {
    timeout(Duration::from_millis(500), async {
        loop {
            if predicate(&provider.snapshot()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("snapshot did not reach expected state");
}

// =============================================================================
// Initial resolution
// =============================================================================

#[tokio::test]
async fn starts_loading_and_unauthenticated() {
    let source = MockSource::gated(Ok(Some(test_session(Some("a@b.com")))));
    let provider = AuthStateProvider::mount(source.clone());

    let snapshot = provider.snapshot();
    assert!(snapshot.loading);
    assert!(!snapshot.is_authenticated());
    assert_eq!(nav_view(&snapshot), NavView::Loading);

    source.open_gate();
    provider.wait_ready().await;
    assert!(!provider.snapshot().loading);
}

#[tokio::test]
async fn resolved_session_populates_user_and_session() {
    let provider = AuthStateProvider::mount(MockSource::immediate(Ok(Some(test_session(Some("trader@example.com"))))));
    provider.wait_ready().await;

    let snapshot = provider.snapshot();
    assert!(snapshot.is_authenticated());
    assert_eq!(snapshot.user.as_ref().and_then(|u| u.email.as_deref()), Some("trader@example.com"));
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn resolved_none_is_signed_out() {
    let provider = AuthStateProvider::mount(MockSource::immediate(Ok(None)));
    provider.wait_ready().await;

    let snapshot = provider.snapshot();
    assert!(!snapshot.loading);
    assert!(!snapshot.is_authenticated());
    assert_eq!(nav_view(&snapshot), NavView::SignedOut);
}

#[tokio::test]
async fn fetch_failure_surfaces_error_and_ends_loading() {
    let provider = AuthStateProvider::mount(MockSource::immediate(Err(AuthError::Transient(
        "provider down".into(),
    ))));
    provider.wait_ready().await;

    let snapshot = provider.snapshot();
    assert!(!snapshot.loading);
    assert!(snapshot.user.is_none());
    assert_eq!(snapshot.error.as_deref(), Some("auth provider unavailable: provider down"));
}

// =============================================================================
// Change notifications
// =============================================================================

#[tokio::test]
async fn signed_in_event_updates_snapshot() {
    let source = MockSource::immediate(Ok(None));
    let provider = AuthStateProvider::mount(source.clone());
    provider.wait_ready().await;

    let session = test_session(Some("late@example.com"));
    source.emit(AuthEvent::SignedIn, Some(&session));

    let snapshot = provider.snapshot();
    assert!(snapshot.is_authenticated());
    assert_eq!(snapshot.session.as_ref().map(|s| s.access_token.as_str()), Some("access-abc"));
}

#[tokio::test]
async fn signed_out_event_clears_everything() {
    let source = MockSource::immediate(Ok(Some(test_session(Some("a@b.com")))));
    let provider = AuthStateProvider::mount(source.clone());
    provider.wait_ready().await;
    assert!(provider.snapshot().is_authenticated());

    source.emit(AuthEvent::SignedOut, None);

    let snapshot = provider.snapshot();
    assert!(snapshot.user.is_none());
    assert!(snapshot.session.is_none());
    assert!(!snapshot.loading);
}

#[tokio::test]
async fn event_clears_a_prior_error() {
    let source = MockSource::immediate(Err(AuthError::Transient("flaky".into())));
    let provider = AuthStateProvider::mount(source.clone());
    provider.wait_ready().await;
    assert!(provider.snapshot().error.is_some());

    let session = test_session(Some("a@b.com"));
    source.emit(AuthEvent::SignedIn, Some(&session));
    assert!(provider.snapshot().error.is_none());
}

#[tokio::test]
async fn slow_fetch_overwrites_earlier_event() {
    // A sign-in lands while the initial fetch is still in flight; the fetch
    // then resolves to no session. Both paths write the full snapshot, so the
    // later writer wins and loading can never be left stuck.
    let source = MockSource::gated(Ok(None));
    let provider = AuthStateProvider::mount(source.clone());

    let session = test_session(Some("early@example.com"));
    source.emit(AuthEvent::SignedIn, Some(&session));
    assert!(provider.snapshot().is_authenticated());

    source.open_gate();
    wait_until(&provider, |s| !s.is_authenticated()).await;
}

// =============================================================================
// Unmount discipline
// =============================================================================

#[tokio::test]
async fn unmounted_provider_ignores_late_writes() {
    let source = MockSource::immediate(Ok(None));
    let mut provider = AuthStateProvider::mount(source.clone());
    provider.wait_ready().await;
    provider.unmount();

    let session = test_session(Some("ghost@example.com"));
    source.emit(AuthEvent::SignedIn, Some(&session));
    assert!(!provider.snapshot().is_authenticated());
}

#[tokio::test]
async fn unmount_releases_pending_wait_ready_callers() {
    // The fetch never resolves; tearing the provider down must still wake
    // anyone awaiting the initial resolution.
    let source = MockSource::gated(Ok(None));
    let mut provider = AuthStateProvider::mount(source);
    provider.unmount();

    timeout(Duration::from_millis(200), provider.wait_ready())
        .await
        .expect("wait_ready should return once the provider is unmounted");
}

#[tokio::test]
#[should_panic(expected = "auth state read outside an active AuthStateProvider")]
async fn handle_panics_after_provider_drop() {
    let provider = AuthStateProvider::mount(MockSource::immediate(Ok(None)));
    provider.wait_ready().await;
    let handle = provider.handle();
    drop(provider);
    let _ = handle.snapshot();
}

#[tokio::test]
#[should_panic(expected = "auth state read outside an active AuthStateProvider")]
async fn handle_panics_after_unmount() {
    let mut provider = AuthStateProvider::mount(MockSource::immediate(Ok(None)));
    provider.wait_ready().await;
    let handle = provider.handle();
    provider.unmount();
    let _ = handle.snapshot();
}

#[tokio::test]
async fn handle_reads_while_mounted() {
    let provider = AuthStateProvider::mount(MockSource::immediate(Ok(Some(test_session(Some("a@b.com"))))));
    provider.wait_ready().await;
    assert!(provider.handle().snapshot().is_authenticated());
}

// =============================================================================
// nav_view
// =============================================================================

fn resolved_snapshot(session: Option<Session>) -> AuthSnapshot {
    AuthSnapshot {
        user: session.as_ref().map(|s| s.user.clone()),
        session,
        loading: false,
        error: None,
    }
}

#[test]
fn nav_view_uses_email_local_part() {
    let view = nav_view(&resolved_snapshot(Some(test_session(Some("jane.doe@example.com")))));
    assert_eq!(view, NavView::SignedIn { display_name: "jane.doe".into() });
}

#[test]
fn nav_view_falls_back_when_email_is_missing() {
    let view = nav_view(&resolved_snapshot(Some(test_session(None))));
    assert_eq!(view, NavView::SignedIn { display_name: "account".into() });
}

#[test]
fn nav_view_falls_back_for_empty_local_part() {
    let view = nav_view(&resolved_snapshot(Some(test_session(Some("@example.com")))));
    assert_eq!(view, NavView::SignedIn { display_name: "account".into() });
}

#[test]
fn nav_view_signed_out_when_resolved_without_session() {
    assert_eq!(nav_view(&resolved_snapshot(None)), NavView::SignedOut);
}

#[test]
fn nav_view_serializes_with_status_tag() {
    let json = serde_json::to_value(NavView::SignedIn { display_name: "jane".into() }).unwrap();
    assert_eq!(json, serde_json::json!({ "status": "signed_in", "display_name": "jane" }));
    let json = serde_json::to_value(NavView::Loading).unwrap();
    assert_eq!(json, serde_json::json!({ "status": "loading" }));
}
