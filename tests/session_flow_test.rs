//! End-to-end sign-in, 401 recovery, route guarding and sign-out

use async_trait::async_trait;
use caredata_session::api::{ApiClient, BackendApi, TokenRefresher};
use caredata_session::authentication::{AuthenticationServiceFactory, SessionServices};
use caredata_session::flows::{LoginForm, LoginOutcome, RegisterForm, RegisterOutcome};
use caredata_session::identity::IdentityBackend;
use caredata_session::models::auth::{
    ApiError, AuthError, IdentityError, TransportError, CANNOT_REACH_SERVER,
};
use caredata_session::navigation::{MemoryNavigator, Navigator};
use caredata_session::session::{GuardDecision, MemoryTokenStore, TokenStore};
use caredata_session::testing::constants::{TEST_EMAIL, TEST_PASSWORD};
use caredata_session::testing::mock::MockCall;
use caredata_session::testing::{MockIdentityBackend, MockTransport, TestFixtures};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    services: SessionServices,
    transport: Arc<MockTransport>,
    store: Arc<MemoryTokenStore>,
    navigator: Arc<MemoryNavigator>,
}

fn harness(start: &str, identity: Option<Arc<MockIdentityBackend>>) -> Harness {
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(MemoryTokenStore::new());
    let navigator = Arc::new(MemoryNavigator::new(start));
    let services = AuthenticationServiceFactory::assemble(
        &TestFixtures::settings(),
        store.clone(),
        navigator.clone(),
        transport.clone(),
        identity.map(|backend| backend as Arc<dyn IdentityBackend>),
    );
    Harness {
        services,
        transport,
        store,
        navigator,
    }
}

// =============================================================================
// Email / password sign-in
// =============================================================================

#[tokio::test]
async fn test_sign_in_stores_token_and_profile() {
    let h = harness("/login", None);
    h.transport
        .on_json("POST", "/auth/login", 200, json!({ "access_token": "tok-1" }))
        .on_json("GET", "/auth/me", 200, json!({ "first_name": "Duong", "last_name": "" }));

    let outcome = h
        .services
        .login_flow()
        .submit(&LoginForm::new(TEST_EMAIL, TEST_PASSWORD))
        .await;

    assert_eq!(outcome, LoginOutcome::Redirect("/dashboard".to_string()));
    assert_eq!(h.store.get_token().as_deref(), Some("tok-1"));
    let profile = h.store.get_cached_profile().unwrap();
    assert_eq!(profile.first_name, "Duong");
    assert_eq!(profile.last_name, "");
    assert_eq!(h.transport.bearer_tokens("GET", "/auth/me"), vec![Some("tok-1".to_string())]);

    let login = &h.transport.requests_to("POST", "/auth/login")[0];
    assert_eq!(login.url, "http://api.caredata.test/auth/login");

    h.navigator.navigate("/dashboard", false);
    assert_eq!(h.services.guard.render(h.navigator.as_ref(), || "dashboard"), Some("dashboard"));
}

#[tokio::test]
async fn test_wrong_password_shows_inline_error() {
    let h = harness("/login", None);
    h.transport.on_status("POST", "/auth/login", 401, "Invalid credentials");

    let outcome = h
        .services
        .login_flow()
        .submit(&LoginForm::new(TEST_EMAIL, "wrong"))
        .await;

    let LoginOutcome::Error(error) = outcome else {
        panic!("expected an inline error, got {outcome:?}");
    };
    assert_eq!(error.message, "Invalid email or password");
    assert!(h.store.get_token().is_none());
    assert_eq!(h.transport.count("GET", "/auth/me"), 0);
    // No redirect: still on the form
    assert_eq!(h.navigator.entries().len(), 1);
    assert_eq!(h.navigator.current_location().path, "/login");
}

#[tokio::test]
async fn test_unreachable_server_message() {
    let h = harness("/login", None);
    h.transport
        .on_error("POST", "/auth/login", TransportError::Connect("connection refused".into()));

    let outcome = h
        .services
        .login_flow()
        .submit(&LoginForm::new(TEST_EMAIL, TEST_PASSWORD))
        .await;

    let LoginOutcome::Error(error) = outcome else {
        panic!("expected an inline error, got {outcome:?}");
    };
    assert_eq!(error.message, CANNOT_REACH_SERVER);
}

#[tokio::test]
async fn test_invalid_email_never_hits_backend() {
    let h = harness("/login", None);

    let outcome = h
        .services
        .login_flow()
        .submit(&LoginForm::new("not-an-email", TEST_PASSWORD))
        .await;

    assert!(matches!(outcome, LoginOutcome::Error(_)));
    assert!(h.transport.requests().is_empty());
}

#[tokio::test]
async fn test_remember_me_survives_sign_out() {
    let h = harness("/login", None);
    h.transport
        .on_json("POST", "/auth/login", 200, json!({ "access_token": "tok-1" }))
        .on_json("GET", "/auth/me", 200, TestFixtures::me_body());

    let flow = h.services.login_flow();
    let form = LoginForm::new(" Sample@Gmail.com ", TEST_PASSWORD).remember(true);
    assert!(matches!(flow.submit(&form).await, LoginOutcome::Redirect(_)));
    assert_eq!(flow.remembered_email().as_deref(), Some(TEST_EMAIL));

    h.services.sign_out().await;
    assert!(h.store.get_token().is_none());
    assert_eq!(flow.remembered_email().as_deref(), Some(TEST_EMAIL));

    let form = LoginForm::new(TEST_EMAIL, TEST_PASSWORD);
    assert!(matches!(flow.submit(&form).await, LoginOutcome::Redirect(_)));
    assert!(flow.remembered_email().is_none());
}

#[tokio::test]
async fn test_google_credential_sign_in() {
    let h = harness("/login", None);
    h.transport.on_json(
        "POST",
        "/auth/google",
        200,
        json!({ "access_token": "tok-g", "user": { "first_name": "Gia", "last_name": "Tran" } }),
    );

    let outcome = h.services.login_flow().google_credential_sign_in("google-id-token").await;

    assert_eq!(outcome, LoginOutcome::Redirect("/dashboard".to_string()));
    assert_eq!(h.store.get_token().as_deref(), Some("tok-g"));
    assert_eq!(h.store.get_cached_profile().unwrap().display_name(), "Gia Tran");
    let body = &h.transport.requests_to("POST", "/auth/google")[0].body;
    assert!(format!("{body:?}").contains("google-id-token"));
}

#[tokio::test]
async fn test_google_credential_rejected() {
    let h = harness("/login", None);
    h.transport.on_status("POST", "/auth/google", 400, "Invalid Google token");

    let outcome = h.services.login_flow().google_credential_sign_in("bad").await;

    let LoginOutcome::Error(error) = outcome else {
        panic!("expected an inline error, got {outcome:?}");
    };
    assert_eq!(error.message, "Google login failed. Please try again.");
    assert!(h.store.get_token().is_none());
}

#[tokio::test]
async fn test_backend_registration_redirects_to_login() {
    let h = harness("/register", None);
    h.transport
        .on_json(
            "POST",
            "/auth/register",
            201,
            json!({ "id": "u-2", "email": "new@caredata.test" }),
        );

    let form = RegisterForm {
        first_name: "Ann".into(),
        last_name: "Lee".into(),
        email: "new@caredata.test".into(),
        password: "Secret123!".into(),
        confirm_password: "Secret123!".into(),
    };
    let outcome = h.services.register_flow().submit(&form).await;

    assert_eq!(outcome, RegisterOutcome::Redirect("/login".to_string()));
    assert!(h.store.get_token().is_none());
}

#[tokio::test]
async fn test_backend_registration_conflict() {
    let h = harness("/register", None);
    h.transport.on_status("POST", "/auth/register", 400, "Email already registered");

    let form = RegisterForm {
        first_name: "Ann".into(),
        last_name: "Lee".into(),
        email: TEST_EMAIL.into(),
        password: "Secret123!".into(),
        confirm_password: "Secret123!".into(),
    };
    let RegisterOutcome::Error(error) = h.services.register_flow().submit(&form).await else {
        panic!("expected a form error");
    };
    assert_eq!(error.message, "Email already registered");
}

// =============================================================================
// 401 recovery
// =============================================================================

#[tokio::test]
async fn test_refresh_and_retry_once() {
    let identity = Arc::new(MockIdentityBackend::new());
    identity.set_refresh_result(Ok(TestFixtures::federated_session("tok-2")));
    let h = harness("/mydata", Some(identity.clone()));
    h.store.set_session("tok-1", Some(TestFixtures::profile()));
    h.transport
        .on_status("GET", "/mydata", 401, "Token expired")
        .on_json("GET", "/mydata", 200, json!({ "rows": 3 }));

    let data = h.services.api.get_my_data().await.unwrap();

    assert_eq!(data, json!({ "rows": 3 }));
    assert_eq!(
        h.transport.bearer_tokens("GET", "/mydata"),
        vec![Some("tok-1".to_string()), Some("tok-2".to_string())]
    );
    assert_eq!(h.store.get_token().as_deref(), Some("tok-2"));
    assert_eq!(h.store.get_cached_profile(), Some(TestFixtures::profile()));
    assert_eq!(identity.calls(MockCall::RefreshSession), 1);
}

#[tokio::test]
async fn test_failed_refresh_signs_out_and_redirects() {
    let identity = Arc::new(MockIdentityBackend::new());
    identity.set_refresh_result(Err(IdentityError::NoSession));
    let h = harness("/mydata", Some(identity.clone()));
    h.store.set_session("tok-1", Some(TestFixtures::profile()));
    h.transport.on_status("GET", "/mydata", 401, "Token expired");

    let err = h.services.api.get_my_data().await.unwrap_err();

    assert_eq!(err, ApiError::SessionExpired);
    assert!(h.store.get_token().is_none());
    assert!(h.store.get_cached_profile().is_none());
    assert_eq!(h.navigator.current_location().path, "/login");
    assert_eq!(h.transport.count("GET", "/mydata"), 1);
    assert_eq!(identity.calls(MockCall::RefreshSession), 1);
}

#[tokio::test]
async fn test_second_401_after_refresh_is_not_retried_again() {
    let identity = Arc::new(MockIdentityBackend::new());
    identity.set_refresh_result(Ok(TestFixtures::federated_session("tok-2")));
    let h = harness("/mydata", Some(identity.clone()));
    h.store.set_session("tok-1", None);
    h.transport.on_status("GET", "/mydata", 401, "Token expired");

    let err = h.services.api.get_my_data().await.unwrap_err();

    assert_eq!(err, ApiError::SessionExpired);
    assert_eq!(h.transport.count("GET", "/mydata"), 2);
    assert_eq!(identity.calls(MockCall::RefreshSession), 1);
    assert!(h.store.get_token().is_none());
}

#[tokio::test]
async fn test_each_request_refreshes_at_most_once() {
    let identity = Arc::new(MockIdentityBackend::new());
    identity.set_refresh_result(Err(IdentityError::NoSession));
    let h = harness("/mydata", Some(identity.clone()));
    h.transport.on_status("GET", "/mydata", 401, "Token expired");

    for round in 1..=3 {
        h.store.set_session(&format!("tok-{round}"), None);
        assert!(h.services.api.get_my_data().await.is_err());
        assert_eq!(identity.calls(MockCall::RefreshSession), round);
        assert_eq!(h.transport.count("GET", "/mydata"), round);
    }
}

/// Refresher that sees the user sign out before its token arrives
struct SignOutDuringRefresh {
    store: Arc<MemoryTokenStore>,
}

#[async_trait]
impl TokenRefresher for SignOutDuringRefresh {
    async fn refresh(&self) -> Result<String, AuthError> {
        self.store.clear();
        Ok("tok-2".to_string())
    }
}

#[tokio::test]
async fn test_sign_out_during_refresh_stays_signed_out() {
    let transport = Arc::new(MockTransport::new());
    let store = Arc::new(MemoryTokenStore::new());
    let navigator = Arc::new(MemoryNavigator::new("/mydata"));
    let client = ApiClient::new(
        "http://localhost:8000",
        transport.clone(),
        store.clone(),
        navigator.clone(),
    )
    .with_refresher(Arc::new(SignOutDuringRefresh {
        store: store.clone(),
    }));
    let api = BackendApi::new(Arc::new(client));
    store.set_session("tok-1", Some(TestFixtures::profile()));
    transport
        .on_status("GET", "/mydata", 401, "Token expired")
        .on_json("GET", "/mydata", 200, json!({ "rows": 3 }));

    let err = api.get_my_data().await.unwrap_err();

    assert_eq!(err, ApiError::SessionExpired);
    assert!(store.get_token().is_none());
    assert!(store.get_cached_profile().is_none());
    assert_eq!(transport.count("GET", "/mydata"), 1);
    assert_eq!(navigator.current_location().path, "/mydata");
}

#[tokio::test]
async fn test_401_without_refresher_signs_out() {
    let h = harness("/mydata", None);
    h.store.set_session("tok-1", Some(TestFixtures::profile()));
    h.transport.on_status("PUT", "/mydata", 401, "Token expired");

    let err = h.services.api.put_my_data(json!({ "rows": [] })).await.unwrap_err();

    assert_eq!(err, ApiError::SessionExpired);
    assert!(h.store.get_token().is_none());
    assert_eq!(h.navigator.current_location().path, "/login");
    assert_eq!(h.transport.count("PUT", "/mydata"), 1);
}

// =============================================================================
// Route guard
// =============================================================================

#[test]
fn test_protected_routes_redirect_without_token() {
    for route in ["/dashboard", "/mydata", "/health-scan", "/profile?tab=1"] {
        let h = harness(route, None);
        let mut mounted = false;

        let rendered = h.services.guard.render(h.navigator.as_ref(), || mounted = true);

        assert!(rendered.is_none(), "{route}");
        assert!(!mounted, "{route} mounted without a token");
        assert_eq!(h.navigator.current_location().path, "/login");
        assert_eq!(h.navigator.entries().len(), 1, "{route} left a back entry");
    }
}

#[test]
fn test_guard_is_token_only() {
    let h = harness("/dashboard", None);
    h.store.set_session("tok-1", None);
    assert_eq!(h.services.guard.check(), GuardDecision::Allow);

    h.store.clear();
    assert_eq!(
        h.services.guard.check(),
        GuardDecision::Redirect {
            to: "/login".to_string(),
            replace: true
        }
    );
}

// =============================================================================
// Sign-out
// =============================================================================

#[tokio::test]
async fn test_sign_out_when_signed_out_is_a_no_op() {
    let identity = Arc::new(MockIdentityBackend::new());
    let h = harness("/", Some(identity.clone()));

    h.services.sign_out().await;
    h.services.sign_out().await;

    assert!(h.store.get_token().is_none());
    assert!(h.store.get_cached_profile().is_none());
    assert_eq!(identity.calls(MockCall::SignOut), 2);
}

#[tokio::test(start_paused = true)]
async fn test_sign_out_does_not_wait_for_slow_revocation() {
    let identity = Arc::new(MockIdentityBackend::new());
    identity.set_sign_out_delay(Some(Duration::from_secs(30)));
    let h = harness("/dashboard", Some(identity));
    h.store.set_session("tok-1", Some(TestFixtures::profile()));

    let started = tokio::time::Instant::now();
    h.services.sign_out().await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(h.store.get_token().is_none());
    assert_eq!(h.navigator.current_location().path, "/login");
}

#[tokio::test]
async fn test_sign_out_survives_revocation_failure() {
    let identity = Arc::new(MockIdentityBackend::new());
    identity.fail_sign_out(Some(IdentityError::Network("offline".into())));
    let h = harness("/dashboard", Some(identity));
    h.store.set_session("tok-1", None);

    h.services.sign_out().await;

    assert!(h.store.get_token().is_none());
}
