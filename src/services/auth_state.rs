//! Client auth state: the single source of truth for "who is signed in".
//!
//! ARCHITECTURE
//! ============
//! An [`AuthStateProvider`] is constructed explicitly once per page load (or
//! per request, for server-rendered navigation state) — there is no ambient
//! singleton. It resolves the initial session from a [`SessionSource`], then
//! tracks every change notification until unmounted. All consumers read
//! through [`AuthHandle`]; reading after unmount is a programming error and
//! panics.
//!
//! TRADE-OFFS
//! ==========
//! The change listener and the initial fetch can race. Both paths write the
//! complete snapshot (user, session, error) and drop `loading`, so the last
//! writer wins and the UI can never be stuck loading on a stale event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;

use super::auth::{AuthError, AuthGateway, AuthListener, AuthSubscription, Session, User};

// =============================================================================
// SESSION SOURCE
// =============================================================================

/// Where a provider gets its session and change notifications from. The
/// gateway implements this for live client scopes; server-side request scopes
/// use a cookie-backed source with no event stream.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Resolve the current session, or `None` when signed out.
    async fn fetch_session(&self) -> Result<Option<Session>, AuthError>;

    /// Register a change listener; the returned handle cancels delivery.
    fn subscribe(&self, listener: AuthListener) -> AuthSubscription;
}

#[async_trait]
impl SessionSource for AuthGateway {
    async fn fetch_session(&self) -> Result<Option<Session>, AuthError> {
        Ok(self.get_session())
    }

    fn subscribe(&self, listener: AuthListener) -> AuthSubscription {
        self.on_auth_state_change(listener)
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Point-in-time auth state. `is_authenticated` is derived, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct AuthSnapshot {
    pub user: Option<User>,
    pub session: Option<Session>,
    pub loading: bool,
    pub error: Option<String>,
}

impl AuthSnapshot {
    fn initial() -> Self {
        Self { user: None, session: None, loading: true, error: None }
    }

    /// True iff both user and session are present.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some() && self.session.is_some()
    }
}

/// The navigation bar's three-state rendering policy, markup-free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NavView {
    Loading,
    SignedIn { display_name: String },
    SignedOut,
}

/// Derive what the navigation bar should render from a snapshot. The display
/// name is the local part of the user's email.
#[must_use]
pub fn nav_view(snapshot: &AuthSnapshot) -> NavView {
    if snapshot.loading {
        return NavView::Loading;
    }
    if !snapshot.is_authenticated() {
        return NavView::SignedOut;
    }

    let display_name = snapshot
        .user
        .as_ref()
        .and_then(|u| u.email.as_deref())
        .and_then(|email| email.split('@').next())
        .filter(|local| !local.is_empty())
        .unwrap_or("account")
        .to_owned();
    NavView::SignedIn { display_name }
}

// =============================================================================
// PROVIDER
// =============================================================================

struct ProviderInner {
    state: Mutex<AuthSnapshot>,
    /// Cleared on unmount so an in-flight initial fetch cannot write after
    /// teardown.
    mounted: AtomicBool,
    ready_tx: watch::Sender<bool>,
}

impl ProviderInner {
    /// Overwrite the full snapshot from a resolved session. Used by both the
    /// initial fetch and every listener delivery.
    fn apply_session(&self, session: Option<Session>) {
        if !self.mounted.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            state.user = session.as_ref().map(|s| s.user.clone());
            state.session = session;
            state.error = None;
            state.loading = false;
        }
        let _ = self.ready_tx.send(true);
    }

    /// Record an initial-fetch failure: keep prior user/session, surface the
    /// error, and still terminate the loading phase.
    fn record_error(&self, message: String) {
        if !self.mounted.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            state.error = Some(message);
            state.loading = false;
        }
        let _ = self.ready_tx.send(true);
    }
}

/// Per-scope auth state container. Single writer (the source), many readers
/// (via [`AuthHandle`]). Unmounts on drop.
pub struct AuthStateProvider {
    inner: Arc<ProviderInner>,
    ready_rx: watch::Receiver<bool>,
    subscription: Option<AuthSubscription>,
}

impl AuthStateProvider {
    /// Construct and start resolving: subscribes to change notifications
    /// first (so a sign-in landing mid-fetch is not lost), then spawns the
    /// initial session fetch. Must be called within a Tokio runtime.
    #[must_use]
    pub fn mount(source: Arc<dyn SessionSource>) -> Self {
        let (ready_tx, ready_rx) = watch::channel(false);
        let inner = Arc::new(ProviderInner {
            state: Mutex::new(AuthSnapshot::initial()),
            mounted: AtomicBool::new(true),
            ready_tx,
        });

        let listener_inner = Arc::clone(&inner);
        let subscription = source.subscribe(Arc::new(move |_event, session| {
            listener_inner.apply_session(session.cloned());
        }));

        let fetch_inner = Arc::clone(&inner);
        let fetch_source = Arc::clone(&source);
        tokio::spawn(async move {
            match fetch_source.fetch_session().await {
                Ok(session) => fetch_inner.apply_session(session),
                Err(e) => {
                    tracing::error!(error = %e, "initial session fetch failed");
                    fetch_inner.record_error(e.to_string());
                }
            }
        });

        Self { inner, ready_rx, subscription: Some(subscription) }
    }

    /// Current snapshot (clone).
    #[must_use]
    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Cheap reader handle for consumers further down the tree.
    #[must_use]
    pub fn handle(&self) -> AuthHandle {
        AuthHandle { inner: Arc::downgrade(&self.inner) }
    }

    /// Wait until the initial load has resolved (success or failure). Late
    /// listener events may still update the snapshot afterwards.
    pub async fn wait_ready(&self) {
        let mut rx = self.ready_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Tear down: cancel the change subscription and block any in-flight
    /// initial fetch from writing. Pending `wait_ready` callers are released,
    /// since no resolution can arrive after this point. Idempotent; also runs
    /// on drop.
    pub fn unmount(&mut self) {
        self.inner.mounted.store(false, Ordering::SeqCst);
        let _ = self.inner.ready_tx.send(true);
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

impl Drop for AuthStateProvider {
    fn drop(&mut self) {
        self.unmount();
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// Read-only view of a provider's state. Holds no strong reference, so it
/// cannot keep a torn-down provider alive.
#[derive(Clone)]
pub struct AuthHandle {
    inner: Weak<ProviderInner>,
}

impl AuthHandle {
    /// Current snapshot.
    ///
    /// # Panics
    ///
    /// Panics when read after the provider was unmounted or dropped —
    /// ambient access outside an active provider scope is a programming
    /// error and fails loudly rather than returning defaults.
    #[must_use]
    pub fn snapshot(&self) -> AuthSnapshot {
        let inner = self
            .inner
            .upgrade()
            .unwrap_or_else(|| panic!("auth state read outside an active AuthStateProvider"));
        assert!(
            inner.mounted.load(Ordering::SeqCst),
            "auth state read outside an active AuthStateProvider"
        );
        inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
#[path = "auth_state_test.rs"]
mod tests;
