//! Session reconciler: cache-first display, store events and the OAuth callback race

use caredata_session::identity::{IdentityBackend, IdentityProviderAdapter};
use caredata_session::models::auth::ApiError;
use caredata_session::models::{ProfileSource, StoredSession, UserProfile, UserState};
use caredata_session::navigation::Location;
use caredata_session::session::{CallbackWatch, MemoryTokenStore, SessionReconciler, TokenStore};
use caredata_session::testing::constants::TEST_EMAIL;
use caredata_session::testing::mock::MockCall;
use caredata_session::testing::{MockIdentityBackend, MockProfileFetcher, TestFixtures};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

fn reconciler(
    store: &Arc<MemoryTokenStore>,
    profiles: &Arc<MockProfileFetcher>,
) -> Arc<SessionReconciler> {
    Arc::new(SessionReconciler::new(
        store.clone(),
        profiles.clone(),
        None,
        CallbackWatch::default(),
    ))
}

struct Federated {
    reconciler: Arc<SessionReconciler>,
    backend: Arc<MockIdentityBackend>,
    store: Arc<MemoryTokenStore>,
    profiles: Arc<MockProfileFetcher>,
}

fn federated() -> Federated {
    let backend = Arc::new(MockIdentityBackend::new());
    let store = Arc::new(MemoryTokenStore::new());
    let profiles = Arc::new(MockProfileFetcher::new());
    let adapter = Arc::new(IdentityProviderAdapter::new(
        backend.clone() as Arc<dyn IdentityBackend>,
        store.clone(),
        profiles.clone(),
        Duration::from_secs(60),
        Duration::from_secs(1),
    ));
    let reconciler = Arc::new(SessionReconciler::new(
        store.clone(),
        profiles.clone(),
        Some(adapter),
        CallbackWatch::default(),
    ));
    Federated {
        reconciler,
        backend,
        store,
        profiles,
    }
}

/// Wait up to `limit` for a state matching `f`, returning a clone of it
async fn settle(
    rx: &mut watch::Receiver<UserState>,
    limit: Duration,
    f: impl FnMut(&UserState) -> bool,
) -> Option<UserState> {
    match timeout(limit, rx.wait_for(f)).await {
        Ok(Ok(state)) => Some(state.clone()),
        _ => None,
    }
}

// =============================================================================
// Single pass
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cached_profile_shown_before_whoami_returns() {
    let store = Arc::new(MemoryTokenStore::with_session(TestFixtures::stored_session("tok-1")));
    let profiles = Arc::new(MockProfileFetcher::new());
    let refreshed = UserProfile::new("Duong", "Nguyen").with_email(TEST_EMAIL);
    profiles
        .with("tok-1", Ok(refreshed.clone()))
        .set_delay(Some(Duration::from_secs(2)));
    let reconciler = reconciler(&store, &profiles);

    let pass = tokio::spawn({
        let reconciler = reconciler.clone();
        async move { reconciler.reconcile_once().await }
    });
    while profiles.calls().is_empty() {
        tokio::task::yield_now().await;
    }

    assert_eq!(
        reconciler.current(),
        UserState::SignedIn {
            profile: TestFixtures::profile(),
            source: ProfileSource::Cache
        }
    );

    let settled = pass.await.unwrap();
    assert_eq!(
        settled,
        UserState::SignedIn {
            profile: refreshed.clone(),
            source: ProfileSource::Backend
        }
    );
    assert_eq!(store.get_cached_profile(), Some(refreshed));
}

#[tokio::test]
async fn test_failed_whoami_keeps_cached_profile() {
    let store = Arc::new(MemoryTokenStore::with_session(TestFixtures::stored_session("tok-1")));
    let profiles = Arc::new(MockProfileFetcher::new());
    profiles.with("tok-1", Err(ApiError::Network("connection refused".into())));

    let state = reconciler(&store, &profiles).reconcile_once().await;

    assert_eq!(state.source(), Some(ProfileSource::Cache));
    assert_eq!(state.profile(), Some(&TestFixtures::profile()));
    assert_eq!(store.get_token().as_deref(), Some("tok-1"));
}

#[tokio::test]
async fn test_cached_profile_without_token_is_displayed() {
    let store = Arc::new(MemoryTokenStore::with_session(StoredSession {
        token: None,
        profile: Some(TestFixtures::profile()),
        remembered_identifier: None,
    }));
    let profiles = Arc::new(MockProfileFetcher::new());

    let state = reconciler(&store, &profiles).reconcile_once().await;

    assert_eq!(state.source(), Some(ProfileSource::Cache));
    assert!(profiles.calls().is_empty());
}

#[tokio::test]
async fn test_rejected_token_without_cache_signs_out() {
    let store = Arc::new(MemoryTokenStore::new());
    store.update_token("stale");
    let profiles = Arc::new(MockProfileFetcher::new());

    let state = reconciler(&store, &profiles).reconcile_once().await;

    assert_eq!(state, UserState::SignedOut);
    assert!(store.get_token().is_none());
    assert_eq!(profiles.calls(), vec!["stale".to_string()]);
}

#[tokio::test]
async fn test_federated_session_falls_back_to_claims() {
    let f = federated();
    let token = TestFixtures::id_token("nurse@caredata.test", "Mai", "Pham");
    f.backend.set_session(Some(TestFixtures::federated_session(&token)));

    let state = f.reconciler.reconcile_once().await;

    assert_eq!(state.source(), Some(ProfileSource::TokenClaims));
    assert_eq!(state.profile().unwrap().display_name(), "Mai Pham");
    assert_eq!(f.store.get_token(), Some(token));
}

#[tokio::test]
async fn test_federated_session_uses_backend_profile() {
    let f = federated();
    let token = TestFixtures::id_token("nurse@caredata.test", "Mai", "Pham");
    f.backend.set_session(Some(TestFixtures::federated_session(&token)));
    let from_backend = UserProfile::new("Mai", "Pham-Nguyen").with_email("nurse@caredata.test");
    f.profiles.with(&token, Ok(from_backend.clone()));

    let state = f.reconciler.reconcile_once().await;

    assert_eq!(state.source(), Some(ProfileSource::Backend));
    assert_eq!(state.profile(), Some(&from_backend));
    assert_eq!(f.store.get_token(), Some(token.clone()));
    assert_eq!(f.store.get_cached_profile(), Some(from_backend));
    assert_eq!(f.profiles.calls(), vec![token]);
}

#[tokio::test]
async fn test_federated_session_without_claims_signs_out() {
    let f = federated();
    f.backend.set_session(Some(TestFixtures::federated_session("not-a-jwt")));

    let state = f.reconciler.reconcile_once().await;

    assert_eq!(state, UserState::SignedOut);
    assert!(f.store.get_token().is_none());
}

// =============================================================================
// Mounted
// =============================================================================

#[tokio::test]
async fn test_store_changes_from_elsewhere_are_picked_up() {
    let store = Arc::new(MemoryTokenStore::new());
    let profiles = Arc::new(MockProfileFetcher::new());
    profiles.with("tok-2", Ok(TestFixtures::profile()));
    let handle = reconciler(&store, &profiles).mount(Location::parse("/dashboard"));
    let mut state = handle.state();

    assert!(settle(&mut state, Duration::from_secs(1), |s| *s == UserState::SignedOut)
        .await
        .is_some());

    store.set_session("tok-2", None);
    let signed_in = settle(&mut state, Duration::from_secs(1), UserState::is_signed_in)
        .await
        .expect("new session should be reconciled");
    assert_eq!(signed_in.source(), Some(ProfileSource::Backend));

    store.clear();
    assert!(settle(&mut state, Duration::from_secs(1), |s| *s == UserState::SignedOut)
        .await
        .is_some());
}

#[tokio::test]
async fn test_dropping_handle_stops_reconciling() {
    let store = Arc::new(MemoryTokenStore::new());
    let profiles = Arc::new(MockProfileFetcher::new());
    let reconciler = reconciler(&store, &profiles);
    let handle = reconciler.mount(Location::parse("/dashboard"));
    let mut state = handle.state();
    settle(&mut state, Duration::from_secs(1), |s| *s == UserState::SignedOut).await;

    handle.cancel();
    tokio::task::yield_now().await;
    store.set_session("tok-3", None);
    sleep(Duration::from_millis(50)).await;

    assert!(!profiles.calls().contains(&"tok-3".to_string()));
    assert_eq!(reconciler.current(), UserState::SignedOut);
}

// =============================================================================
// OAuth callback
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_slow_code_exchange_still_signs_in() {
    let f = federated();
    f.backend.set_redirect_delay(Some(Duration::from_millis(1200)));

    let handle = f
        .reconciler
        .mount(Location::parse("/?code=auth-code-1&state=opaque"));
    let mut state = handle.state();

    let signed_in = settle(&mut state, Duration::from_secs(5), UserState::is_signed_in)
        .await
        .expect("callback should end signed in");
    assert_eq!(signed_in.profile().unwrap().display_name(), "Gia Tran");
    assert_eq!(f.backend.calls(MockCall::CompleteRedirect), 1);
    assert!(f.store.get_token().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_session_appearing_during_watch_is_picked_up() {
    let f = federated();
    let backend = f.backend.clone();
    tokio::spawn(async move {
        sleep(Duration::from_secs(2)).await;
        let token = TestFixtures::id_token("late@caredata.test", "Late", "Comer");
        backend.set_session(Some(TestFixtures::federated_session(&token)));
    });

    let handle = f
        .reconciler
        .mount(Location::parse("/?code=already-used&state=opaque"));
    let mut state = handle.state();

    let signed_in = settle(&mut state, Duration::from_secs(5), UserState::is_signed_in)
        .await
        .expect("late session should be found before the window closes");
    assert_eq!(signed_in.source(), Some(ProfileSource::TokenClaims));
    assert_eq!(signed_in.profile().unwrap().display_name(), "Late Comer");
}

#[tokio::test(start_paused = true)]
async fn test_watch_window_closes() {
    let f = federated();
    let handle = f
        .reconciler
        .mount(Location::parse("/?code=already-used&state=opaque"));

    sleep(Duration::from_secs(6)).await;
    let checks = f.backend.calls(MockCall::FetchSession);
    assert!(checks > 2, "expected re-checks during the window, got {checks}");
    assert_eq!(handle.current(), UserState::SignedOut);

    // Identity-side changes no longer trigger passes
    let token = TestFixtures::id_token("late@caredata.test", "Late", "Comer");
    f.backend.set_session(Some(TestFixtures::federated_session(&token)));
    sleep(Duration::from_secs(3)).await;

    assert_eq!(f.backend.calls(MockCall::FetchSession), checks);
    assert_eq!(handle.current(), UserState::SignedOut);
    assert!(!handle.is_finished());
}

#[tokio::test(start_paused = true)]
async fn test_plain_route_does_not_exchange_code() {
    let f = federated();
    let handle = f.reconciler.mount(Location::parse("/dashboard"));
    let mut state = handle.state();

    settle(&mut state, Duration::from_secs(1), |s| *s == UserState::SignedOut).await;
    sleep(Duration::from_secs(3)).await;

    assert_eq!(f.backend.calls(MockCall::CompleteRedirect), 0);
    assert_eq!(f.backend.calls(MockCall::FetchSession), 1);
}
