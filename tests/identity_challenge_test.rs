//! Federated sign-in: challenges, resend cooldown and hosted-UI redirects

use caredata_session::authentication::{AuthenticationServiceFactory, SessionServices};
use caredata_session::flows::{
    ConfirmationOutcome, LoginForm, LoginOutcome, RegisterForm, RegisterOutcome,
};
use caredata_session::identity::{
    IdentityBackend, IdentityProviderAdapter, ResendOutcome, SignInMachineState,
};
use caredata_session::models::auth::{AuthError, IdentityError};
use caredata_session::models::{
    AuthOutcome, ChallengeError, ChallengeKind, ProfileSource, SignUpAttributes,
};
use caredata_session::navigation::{MemoryNavigator, Navigator};
use caredata_session::session::{MemoryTokenStore, TokenStore};
use caredata_session::testing::constants::{
    SIGN_UP_EMAIL, SIGN_UP_PASSWORD, TEST_EMAIL, TEST_PASSWORD, VALID_CODE, WRONG_CODE,
};
use caredata_session::testing::mock::MockCall;
use caredata_session::testing::{
    MockIdentityBackend, MockProfileFetcher, MockTransport, TestFixtures,
};
use caredata_session::validation::{BannerKind, FormField};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct AdapterHarness {
    adapter: IdentityProviderAdapter,
    backend: Arc<MockIdentityBackend>,
    store: Arc<MemoryTokenStore>,
}

fn adapter() -> AdapterHarness {
    let backend = Arc::new(MockIdentityBackend::new());
    let store = Arc::new(MemoryTokenStore::new());
    let adapter = IdentityProviderAdapter::new(
        backend.clone(),
        store.clone(),
        Arc::new(MockProfileFetcher::new()),
        Duration::from_secs(60),
        Duration::from_secs(1),
    );
    AdapterHarness {
        adapter,
        backend,
        store,
    }
}

fn attributes() -> SignUpAttributes {
    SignUpAttributes {
        given_name: "Ann".into(),
        family_name: "Lee".into(),
    }
}

fn cognito_services(
    start: &str,
) -> (
    SessionServices,
    Arc<MockIdentityBackend>,
    Arc<MockTransport>,
    Arc<MemoryNavigator>,
) {
    let backend = Arc::new(MockIdentityBackend::new());
    let transport = Arc::new(MockTransport::new());
    let navigator = Arc::new(MemoryNavigator::new(start));
    let services = AuthenticationServiceFactory::assemble(
        &TestFixtures::cognito_settings(),
        Arc::new(MemoryTokenStore::new()),
        navigator.clone(),
        transport.clone(),
        Some(backend.clone() as Arc<dyn IdentityBackend>),
    );
    (services, backend, transport, navigator)
}

// =============================================================================
// Challenge round trip
// =============================================================================

#[tokio::test]
async fn test_sign_up_confirm_round_trip() {
    let h = adapter();

    let outcome = h.adapter.sign_up(SIGN_UP_EMAIL, SIGN_UP_PASSWORD, &attributes()).await.unwrap();
    let challenge = outcome.challenge().cloned().expect("challenge");
    assert_eq!(challenge.kind, ChallengeKind::ConfirmSignUp);
    assert_eq!(challenge.identifier, SIGN_UP_EMAIL);
    assert!(challenge.error.is_none());

    let wrong = h.adapter.confirm_challenge(WRONG_CODE).await.unwrap();
    let rejected = wrong.challenge().expect("challenge stays open");
    assert_eq!(rejected.error, Some(ChallengeError::InvalidCode));
    assert_eq!(rejected.identifier, SIGN_UP_EMAIL);
    assert_eq!(h.adapter.attempt_state(), SignInMachineState::ChallengeRequired);
    assert!(h.store.get_token().is_none());

    let AuthOutcome::Authenticated(session) =
        h.adapter.confirm_challenge(VALID_CODE).await.unwrap()
    else {
        panic!("expected the confirmed account to be signed in");
    };
    assert_eq!(h.store.get_token(), Some(session.token.clone()));
    assert_eq!(session.profile_source, Some(ProfileSource::TokenClaims));
    assert_eq!(session.profile.unwrap().display_name(), "Ann Lee");
    assert_eq!(h.adapter.attempt_state(), SignInMachineState::Authenticated);
    assert!(h.adapter.pending_challenge().is_none());
    assert!(h.backend.is_confirmed(SIGN_UP_EMAIL));

    // The resolved challenge cannot be reused
    assert!(matches!(
        h.adapter.confirm_challenge(VALID_CODE).await,
        Err(AuthError::NoPendingChallenge)
    ));
}

#[tokio::test]
async fn test_confirmation_failures_keep_challenge_open() {
    let h = adapter();
    h.adapter.sign_up(SIGN_UP_EMAIL, SIGN_UP_PASSWORD, &attributes()).await.unwrap();

    for (error, flag) in [
        (IdentityError::ExpiredCode, ChallengeError::ExpiredCode),
        (IdentityError::RateLimited, ChallengeError::RateLimited),
        (IdentityError::Network("offline".into()), ChallengeError::Network),
    ] {
        h.backend.fail_next_confirmation(error);
        let outcome = h.adapter.confirm_challenge(VALID_CODE).await.unwrap();
        assert_eq!(outcome.challenge().unwrap().error, Some(flag));
        assert_eq!(h.adapter.attempt_state(), SignInMachineState::ChallengeRequired);
    }

    assert!(h.adapter.confirm_challenge(VALID_CODE).await.unwrap().is_authenticated());
}

#[tokio::test]
async fn test_unconfirmed_sign_in_becomes_challenge() {
    let h = adapter();
    h.backend.with_account(TEST_EMAIL, TEST_PASSWORD, false);

    let outcome = h.adapter.sign_in(TEST_EMAIL, TEST_PASSWORD).await.unwrap();
    assert_eq!(outcome.challenge().unwrap().kind, ChallengeKind::ConfirmSignUp);

    let outcome = h.adapter.confirm_challenge(VALID_CODE).await.unwrap();
    assert!(outcome.is_authenticated());
    assert_eq!(h.backend.calls(MockCall::SignIn), 2);
}

#[tokio::test]
async fn test_sign_in_code_challenge() {
    let h = adapter();
    h.backend
        .with_account(TEST_EMAIL, TEST_PASSWORD, true)
        .require_sign_in_code(true);

    let outcome = h.adapter.sign_in(TEST_EMAIL, TEST_PASSWORD).await.unwrap();
    assert_eq!(outcome.challenge().unwrap().kind, ChallengeKind::ConfirmSignIn);

    let outcome = h.adapter.confirm_challenge(WRONG_CODE).await.unwrap();
    assert_eq!(outcome.challenge().unwrap().error, Some(ChallengeError::InvalidCode));

    assert!(h.adapter.confirm_challenge(VALID_CODE).await.unwrap().is_authenticated());
    assert!(h.store.get_token().is_some());
}

#[tokio::test]
async fn test_wrong_password_is_inline_error() {
    let h = adapter();
    h.backend.with_account(TEST_EMAIL, TEST_PASSWORD, true);

    let err = h.adapter.sign_in(TEST_EMAIL, "nope").await.unwrap_err();

    assert!(matches!(err, AuthError::InvalidCredentials(_)));
    assert_eq!(err.user_message(), "Invalid email or password");
    assert_eq!(h.adapter.attempt_state(), SignInMachineState::Idle);
    assert!(h.store.get_token().is_none());
}

#[tokio::test]
async fn test_duplicate_sign_up() {
    let h = adapter();
    h.backend.with_account(SIGN_UP_EMAIL, SIGN_UP_PASSWORD, true);

    let err = h.adapter.sign_up(SIGN_UP_EMAIL, SIGN_UP_PASSWORD, &attributes()).await.unwrap_err();

    assert_eq!(err, AuthError::UsernameExists);
}

#[tokio::test]
async fn test_cancel_challenge() {
    let h = adapter();
    h.adapter.sign_up(SIGN_UP_EMAIL, SIGN_UP_PASSWORD, &attributes()).await.unwrap();

    assert_eq!(h.adapter.cancel_challenge(), AuthOutcome::Cancelled);
    assert_eq!(h.adapter.attempt_state(), SignInMachineState::Cancelled);
    assert!(h.adapter.pending_challenge().is_none());
    assert!(matches!(
        h.adapter.confirm_challenge(VALID_CODE).await,
        Err(AuthError::NoPendingChallenge)
    ));
    assert_eq!(h.adapter.cancel_challenge(), AuthOutcome::Cancelled);

    // A fresh attempt starts over
    let outcome = h.adapter.sign_in(SIGN_UP_EMAIL, SIGN_UP_PASSWORD).await.unwrap();
    assert_eq!(outcome.challenge().unwrap().kind, ChallengeKind::ConfirmSignUp);
}

// =============================================================================
// Resend cooldown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_resend_cooldown() {
    let h = adapter();
    h.adapter.sign_up(SIGN_UP_EMAIL, SIGN_UP_PASSWORD, &attributes()).await.unwrap();

    assert_eq!(h.adapter.resend_challenge_code(SIGN_UP_EMAIL).await.unwrap(), ResendOutcome::Sent);
    let second = h.adapter.resend_challenge_code(SIGN_UP_EMAIL).await.unwrap();
    let ResendOutcome::CoolingDown { remaining } = second else {
        panic!("second resend should be suppressed");
    };
    assert!(remaining > Duration::ZERO && remaining <= Duration::from_secs(60));
    assert_eq!(h.backend.calls(MockCall::ResendCode), 1);

    tokio::time::advance(Duration::from_secs(61)).await;

    assert_eq!(h.adapter.resend_challenge_code(SIGN_UP_EMAIL).await.unwrap(), ResendOutcome::Sent);
    assert_eq!(h.backend.calls(MockCall::ResendCode), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_resend_reopens_window() {
    let h = adapter();
    h.backend.fail_resend(Some(IdentityError::RateLimited));

    assert_eq!(
        h.adapter.resend_challenge_code(SIGN_UP_EMAIL).await.unwrap_err(),
        AuthError::RateLimited
    );
    assert!(h.adapter.resend_cooldown_remaining().is_none());

    h.backend.fail_resend(None);
    assert_eq!(h.adapter.resend_challenge_code(SIGN_UP_EMAIL).await.unwrap(), ResendOutcome::Sent);
}

// =============================================================================
// Flows over the adapter
// =============================================================================

#[tokio::test]
async fn test_register_then_confirm_through_flows() {
    let (services, backend, transport, _nav) = cognito_services("/register");
    transport.on_json("GET", "/auth/me", 200, json!({ "first_name": "Ann", "last_name": "Lee" }));

    let form = RegisterForm {
        first_name: "Ann".into(),
        last_name: "Lee".into(),
        email: SIGN_UP_EMAIL.into(),
        password: SIGN_UP_PASSWORD.into(),
        confirm_password: SIGN_UP_PASSWORD.into(),
    };
    let RegisterOutcome::Challenge(challenge) = services.register_flow().submit(&form).await else {
        panic!("sign-up should ask for a code");
    };
    assert_eq!(challenge.identifier, SIGN_UP_EMAIL);

    let confirmation = services.confirmation_flow().unwrap();
    let ConfirmationOutcome::Error(error) = confirmation.submit("  ").await else {
        panic!("empty code should be rejected locally");
    };
    assert_eq!(error.field, Some(FormField::Code));
    assert_eq!(backend.calls(MockCall::ConfirmSignUp), 0);

    let ConfirmationOutcome::Pending(pending) = confirmation.submit(WRONG_CODE).await else {
        panic!("wrong code keeps the challenge");
    };
    assert_eq!(pending.error, Some(ChallengeError::InvalidCode));

    assert_eq!(
        confirmation.submit(VALID_CODE).await,
        ConfirmationOutcome::Redirect("/dashboard".to_string())
    );
    let profile = services.store.get_cached_profile().unwrap();
    assert_eq!(profile.display_name(), "Ann Lee");
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_flow_resend_and_cancel() {
    let (services, backend, _transport, _nav) = cognito_services("/register");
    backend.with_account(TEST_EMAIL, TEST_PASSWORD, false);
    let LoginOutcome::Challenge(_) = services
        .login_flow()
        .submit(&LoginForm::new(TEST_EMAIL, TEST_PASSWORD))
        .await
    else {
        panic!("unconfirmed account should ask for a code");
    };

    let confirmation = services.confirmation_flow().unwrap();
    assert_eq!(confirmation.resend().await.unwrap(), ResendOutcome::Sent);
    assert!(matches!(
        confirmation.resend().await.unwrap(),
        ResendOutcome::CoolingDown { .. }
    ));
    assert_eq!(backend.calls(MockCall::ResendCode), 1);

    assert_eq!(confirmation.cancel(), ConfirmationOutcome::Redirect("/login".to_string()));
    assert!(confirmation.challenge().is_none());
    assert!(confirmation.resend().await.is_err());
}

#[tokio::test]
async fn test_federated_login_uses_backend_profile() {
    let (services, backend, transport, _nav) = cognito_services("/login");
    backend.with_account(TEST_EMAIL, TEST_PASSWORD, true);
    transport.on_json("GET", "/auth/me", 200, TestFixtures::me_body());

    let outcome = services
        .login_flow()
        .submit(&LoginForm::new(TEST_EMAIL, TEST_PASSWORD))
        .await;

    assert_eq!(outcome, LoginOutcome::Redirect("/dashboard".to_string()));
    assert_eq!(services.store.get_cached_profile(), Some(TestFixtures::profile()));
    assert_eq!(backend.calls(MockCall::SignIn), 1);
}

// =============================================================================
// Hosted-UI redirect
// =============================================================================

#[tokio::test]
async fn test_google_redirect_with_account_chooser_clears_session() {
    let (services, backend, _transport, navigator) = cognito_services("/login");
    backend.set_session(Some(TestFixtures::federated_session("old-token")));
    services.store.set_session("old-token", Some(TestFixtures::profile()));

    let url = services
        .login_flow()
        .begin_google_sign_in(navigator.as_ref(), true)
        .unwrap();

    assert!(url.contains("prompt=select_account"));
    assert_eq!(navigator.last_external_redirect(), Some(url));
    assert!(services.store.get_token().is_none());
    assert!(backend.session().is_none());
}

#[tokio::test]
async fn test_google_redirect_without_identity_is_form_error() {
    let services = AuthenticationServiceFactory::assemble(
        &TestFixtures::settings(),
        Arc::new(MemoryTokenStore::new()),
        Arc::new(MemoryNavigator::new("/login")),
        Arc::new(MockTransport::new()),
        None,
    );
    let navigator = MemoryNavigator::new("/login");

    let err = services.login_flow().begin_google_sign_in(&navigator, false).unwrap_err();

    assert_eq!(err.message, "This sign-in method is not available.");
    assert!(navigator.last_external_redirect().is_none());
}

#[tokio::test]
async fn test_complete_redirect_falls_back_to_claims() {
    let (services, backend, _transport, _nav) = cognito_services("/");
    let identity = services.identity.clone().unwrap();

    let outcome = identity
        .complete_federated_redirect("http://localhost:5173/?code=auth-code-1&state=opaque")
        .await
        .unwrap();

    let AuthOutcome::Authenticated(session) = outcome else {
        panic!("callback should authenticate");
    };
    assert_eq!(session.profile_source, Some(ProfileSource::TokenClaims));
    assert_eq!(services.store.get_cached_profile().unwrap().display_name(), "Gia Tran");
    assert_eq!(backend.calls(MockCall::CompleteRedirect), 1);
}

#[tokio::test]
async fn test_complete_redirect_with_error_params() {
    let (services, backend, _transport, _nav) = cognito_services("/");
    let identity = services.identity.clone().unwrap();

    let err = identity
        .complete_federated_redirect("/?error=invalid_request&error_description=invalid_scope")
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Redirect(_)));
    assert_eq!(backend.calls(MockCall::CompleteRedirect), 0);
    assert!(services.store.get_token().is_none());
}

#[tokio::test]
async fn test_oauth_error_banner_dismiss() {
    let (services, _backend, _transport, navigator) =
        cognito_services("/?error=invalid_request&error_description=invalid_scope");
    services.store.set_session("tok-1", None);

    let banner = services.oauth_error_banner().expect("banner");
    assert_eq!(banner.kind, BannerKind::InvalidScope);
    assert!(banner.title().contains("scope"));

    banner.dismiss(navigator.as_ref());

    assert_eq!(navigator.current_location().to_string(), "/");
    assert!(services.oauth_error_banner().is_none());
    assert_eq!(services.store.get_token().as_deref(), Some("tok-1"));
}
