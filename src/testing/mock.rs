//! Mock objects and fake implementations for testing
//!
//! Scripted stand-ins for the three external collaborators: the HTTP
//! transport, the federated identity service and the "whoami" call. Each one
//! records what it was asked so tests can assert on call counts.

use super::constants::{REDIRECT_CODE, VALID_CODE};
use super::fixtures::TestFixtures;
use crate::api::backend::ProfileFetcher;
use crate::api::transport::{ApiRequest, ApiResponse, HttpTransport};
use crate::identity::{
    BackendSignIn, IdentityBackend, IdentityEvent, SignUpResult, IDENTITY_EVENT_CAPACITY,
};
use crate::models::auth::{ApiError, IdentityError, TransportError};
use crate::models::{ChallengeKind, FederatedSession, SignUpAttributes, UserProfile};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// HTTP transport
// =============================================================================

type Scripted = Result<ApiResponse, TransportError>;

struct Route {
    method: String,
    path: String,
    responses: VecDeque<Scripted>,
    delay: Option<Duration>,
}

/// Scripted HTTP transport keyed by method and URL path
///
/// Responses queued for a route are served in order; the last one repeats.
/// Unscripted routes answer 404.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw result for `method path`
    pub fn on(&self, method: &str, path: &str, response: Scripted) -> &Self {
        let mut routes = lock(&self.routes);
        match routes.iter_mut().find(|r| r.matches(method, path)) {
            Some(route) => route.responses.push_back(response),
            None => routes.push(Route {
                method: method.to_uppercase(),
                path: path.to_string(),
                responses: VecDeque::from([response]),
                delay: None,
            }),
        }
        self
    }

    pub fn on_json(&self, method: &str, path: &str, status: u16, body: Value) -> &Self {
        self.on(method, path, Ok(ApiResponse::new(status, body.to_string())))
    }

    /// Queue a FastAPI-style `{"detail": ...}` error
    pub fn on_status(&self, method: &str, path: &str, status: u16, detail: &str) -> &Self {
        self.on_json(method, path, status, serde_json::json!({ "detail": detail }))
    }

    pub fn on_error(&self, method: &str, path: &str, error: TransportError) -> &Self {
        self.on(method, path, Err(error))
    }

    /// Hold every response on `method path` for `delay`
    pub fn delay(&self, method: &str, path: &str, delay: Duration) -> &Self {
        let mut routes = lock(&self.routes);
        if let Some(route) = routes.iter_mut().find(|r| r.matches(method, path)) {
            route.delay = Some(delay);
        } else {
            routes.push(Route {
                method: method.to_uppercase(),
                path: path.to_string(),
                responses: VecDeque::new(),
                delay: Some(delay),
            });
        }
        self
    }

    #[must_use]
    pub fn requests(&self) -> Vec<ApiRequest> {
        lock(&self.requests).clone()
    }

    #[must_use]
    pub fn requests_to(&self, method: &str, path: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| {
                r.method.as_str().eq_ignore_ascii_case(method) && request_path(&r.url) == path
            })
            .collect()
    }

    #[must_use]
    pub fn count(&self, method: &str, path: &str) -> usize {
        self.requests_to(method, path).len()
    }

    /// Bearer token sent with each request to `method path`, in order
    #[must_use]
    pub fn bearer_tokens(&self, method: &str, path: &str) -> Vec<Option<String>> {
        self.requests_to(method, path)
            .iter()
            .map(|r| {
                r.header_value("Authorization")
                    .and_then(|v| v.strip_prefix("Bearer "))
                    .map(str::to_string)
            })
            .collect()
    }

    fn next_response(&self, method: &str, path: &str) -> (Scripted, Option<Duration>) {
        let mut routes = lock(&self.routes);
        let Some(route) = routes.iter_mut().find(|r| r.matches(method, path)) else {
            return (Ok(ApiResponse::new(404, r#"{"detail":"Not Found"}"#)), None);
        };
        let response = if route.responses.len() > 1 {
            route.responses.pop_front()
        } else {
            route.responses.front().cloned()
        };
        (
            response.unwrap_or_else(|| Ok(ApiResponse::new(404, r#"{"detail":"Not Found"}"#))),
            route.delay,
        )
    }
}

impl Route {
    fn matches(&self, method: &str, path: &str) -> bool {
        self.method.eq_ignore_ascii_case(method) && self.path == path
    }
}

fn request_path(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split('?').next().unwrap_or(url).to_string(),
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let method = request.method.as_str();
        let path = request_path(&request.url);
        let (response, delay) = self.next_response(method, &path);
        lock(&self.requests).push(request);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        response
    }
}

// =============================================================================
// Profile fetcher
// =============================================================================

/// Scripted "whoami": one result per token, 401 for anything else
#[derive(Default)]
pub struct MockProfileFetcher {
    profiles: Mutex<HashMap<String, Result<UserProfile, ApiError>>>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<String>>,
}

impl MockProfileFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(&self, token: &str, result: Result<UserProfile, ApiError>) -> &Self {
        lock(&self.profiles).insert(token.to_string(), result);
        self
    }

    pub fn set_delay(&self, delay: Option<Duration>) -> &Self {
        *lock(&self.delay) = delay;
        self
    }

    /// Tokens looked up so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ProfileFetcher for MockProfileFetcher {
    async fn fetch_profile(&self, token: &str) -> Result<UserProfile, ApiError> {
        lock(&self.calls).push(token.to_string());
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        lock(&self.profiles)
            .get(token)
            .cloned()
            .unwrap_or_else(|| {
                Err(ApiError::Status {
                    status: 401,
                    detail: "Could not validate credentials".to_string(),
                })
            })
    }
}

// =============================================================================
// Identity backend
// =============================================================================

/// Operations counted by [`MockIdentityBackend`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    SignIn,
    SignUp,
    ConfirmSignUp,
    ConfirmSignIn,
    ResendCode,
    FetchSession,
    RefreshSession,
    SignOut,
    CompleteRedirect,
}

struct Account {
    password: String,
    confirmed: bool,
    attributes: SignUpAttributes,
}

/// In-memory identity service with user-pool semantics
///
/// Sign-up creates an unconfirmed account that [`VALID_CODE`] confirms. A
/// hosted-UI callback with [`REDIRECT_CODE`] signs in a Google user.
pub struct MockIdentityBackend {
    accounts: Mutex<HashMap<String, Account>>,
    require_sign_in_code: Mutex<bool>,
    pending_sign_in: Mutex<Option<String>>,
    session: Mutex<Option<FederatedSession>>,
    refresh_result: Mutex<Option<Result<FederatedSession, IdentityError>>>,
    next_confirm_error: Mutex<Option<IdentityError>>,
    resend_error: Mutex<Option<IdentityError>>,
    sign_out_error: Mutex<Option<IdentityError>>,
    sign_out_delay: Mutex<Option<Duration>>,
    redirect_delay: Mutex<Option<Duration>>,
    calls: Mutex<HashMap<MockCall, usize>>,
    events: broadcast::Sender<IdentityEvent>,
}

impl Default for MockIdentityBackend {
    fn default() -> Self {
        let (events, _) = broadcast::channel(IDENTITY_EVENT_CAPACITY);
        Self {
            accounts: Mutex::new(HashMap::new()),
            require_sign_in_code: Mutex::new(false),
            pending_sign_in: Mutex::new(None),
            session: Mutex::new(None),
            refresh_result: Mutex::new(None),
            next_confirm_error: Mutex::new(None),
            resend_error: Mutex::new(None),
            sign_out_error: Mutex::new(None),
            sign_out_delay: Mutex::new(None),
            redirect_delay: Mutex::new(None),
            calls: Mutex::new(HashMap::new()),
            events,
        }
    }
}

impl MockIdentityBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(&self, username: &str, password: &str, confirmed: bool) -> &Self {
        lock(&self.accounts).insert(
            username.to_string(),
            Account {
                password: password.to_string(),
                confirmed,
                attributes: SignUpAttributes::default(),
            },
        );
        self
    }

    /// Make every sign-in stop at a `ConfirmSignIn` challenge
    pub fn require_sign_in_code(&self, required: bool) -> &Self {
        *lock(&self.require_sign_in_code) = required;
        self
    }

    /// Replace the current session, announcing it like a real sign-in would
    pub fn set_session(&self, session: Option<FederatedSession>) {
        let signed_in = session.is_some();
        *lock(&self.session) = session;
        if signed_in {
            self.emit(IdentityEvent::SignedIn);
        }
    }

    #[must_use]
    pub fn session(&self) -> Option<FederatedSession> {
        lock(&self.session).clone()
    }

    pub fn set_refresh_result(&self, result: Result<FederatedSession, IdentityError>) -> &Self {
        *lock(&self.refresh_result) = Some(result);
        self
    }

    /// Fail the next confirmation with `error`, whatever the code
    pub fn fail_next_confirmation(&self, error: IdentityError) -> &Self {
        *lock(&self.next_confirm_error) = Some(error);
        self
    }

    pub fn fail_resend(&self, error: Option<IdentityError>) -> &Self {
        *lock(&self.resend_error) = error;
        self
    }

    pub fn fail_sign_out(&self, error: Option<IdentityError>) -> &Self {
        *lock(&self.sign_out_error) = error;
        self
    }

    pub fn set_sign_out_delay(&self, delay: Option<Duration>) -> &Self {
        *lock(&self.sign_out_delay) = delay;
        self
    }

    pub fn set_redirect_delay(&self, delay: Option<Duration>) -> &Self {
        *lock(&self.redirect_delay) = delay;
        self
    }

    #[must_use]
    pub fn calls(&self, call: MockCall) -> usize {
        lock(&self.calls).get(&call).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn is_confirmed(&self, username: &str) -> bool {
        lock(&self.accounts).get(username).is_some_and(|a| a.confirmed)
    }

    pub fn emit(&self, event: IdentityEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn record(&self, call: MockCall) {
        *lock(&self.calls).entry(call).or_insert(0) += 1;
    }

    fn start_session(&self, username: &str) -> FederatedSession {
        let (given, family) = lock(&self.accounts)
            .get(username)
            .map(|a| (a.attributes.given_name.clone(), a.attributes.family_name.clone()))
            .unwrap_or_default();
        let session =
            TestFixtures::federated_session(&TestFixtures::id_token(username, &given, &family));
        self.set_session(Some(session.clone()));
        session
    }
}

#[async_trait]
impl IdentityBackend for MockIdentityBackend {
    async fn sign_in(
        &self,
        username: &str,
        password: &str,
    ) -> Result<BackendSignIn, IdentityError> {
        self.record(MockCall::SignIn);
        let confirmed = match lock(&self.accounts).get(username) {
            Some(account) if account.password == password => account.confirmed,
            _ => return Err(IdentityError::NotAuthorized("Incorrect username or password.".into())),
        };
        if !confirmed {
            return Err(IdentityError::UserNotConfirmed);
        }
        if *lock(&self.require_sign_in_code) {
            *lock(&self.pending_sign_in) = Some(username.to_string());
            return Ok(BackendSignIn::NextStep(ChallengeKind::ConfirmSignIn));
        }
        Ok(BackendSignIn::Complete(self.start_session(username)))
    }

    async fn sign_up(
        &self,
        username: &str,
        password: &str,
        attributes: &SignUpAttributes,
    ) -> Result<SignUpResult, IdentityError> {
        self.record(MockCall::SignUp);
        let mut accounts = lock(&self.accounts);
        if accounts.contains_key(username) {
            return Err(IdentityError::UsernameExists);
        }
        if password.len() < 8 {
            return Err(IdentityError::InvalidParameter(
                "Password did not conform with policy: Password not long enough".into(),
            ));
        }
        accounts.insert(
            username.to_string(),
            Account {
                password: password.to_string(),
                confirmed: false,
                attributes: attributes.clone(),
            },
        );
        Ok(SignUpResult { user_confirmed: false })
    }

    async fn confirm_sign_up(&self, username: &str, code: &str) -> Result<(), IdentityError> {
        self.record(MockCall::ConfirmSignUp);
        if let Some(error) = lock(&self.next_confirm_error).take() {
            return Err(error);
        }
        if code != VALID_CODE {
            return Err(IdentityError::CodeMismatch);
        }
        match lock(&self.accounts).get_mut(username) {
            Some(account) => {
                account.confirmed = true;
                Ok(())
            }
            None => Err(IdentityError::NotAuthorized("User does not exist.".into())),
        }
    }

    async fn confirm_sign_in(&self, code: &str) -> Result<BackendSignIn, IdentityError> {
        self.record(MockCall::ConfirmSignIn);
        if let Some(error) = lock(&self.next_confirm_error).take() {
            return Err(error);
        }
        let username = lock(&self.pending_sign_in).clone().ok_or(IdentityError::NoSession)?;
        if code != VALID_CODE {
            return Err(IdentityError::CodeMismatch);
        }
        *lock(&self.pending_sign_in) = None;
        Ok(BackendSignIn::Complete(self.start_session(&username)))
    }

    async fn resend_sign_up_code(&self, _username: &str) -> Result<(), IdentityError> {
        self.record(MockCall::ResendCode);
        match lock(&self.resend_error).clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn fetch_session(&self) -> Result<Option<FederatedSession>, IdentityError> {
        self.record(MockCall::FetchSession);
        Ok(self.session())
    }

    async fn refresh_session(&self) -> Result<FederatedSession, IdentityError> {
        self.record(MockCall::RefreshSession);
        let scripted = lock(&self.refresh_result).clone();
        match scripted {
            Some(Ok(session)) => {
                *lock(&self.session) = Some(session.clone());
                self.emit(IdentityEvent::TokenRefreshed);
                Ok(session)
            }
            Some(Err(error)) => Err(error),
            None => self.session().ok_or(IdentityError::NoSession),
        }
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        self.record(MockCall::SignOut);
        *lock(&self.session) = None;
        let delay = *lock(&self.sign_out_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.emit(IdentityEvent::SignedOut);
        match lock(&self.sign_out_error).clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn clear_local_session(&self) {
        *lock(&self.session) = None;
    }

    fn authorize_url(&self, force_account_chooser: bool) -> Result<String, IdentityError> {
        let mut url =
            "https://auth.caredata.test/oauth2/authorize?identity_provider=Google".to_string();
        if force_account_chooser {
            url.push_str("&prompt=select_account");
        }
        Ok(url)
    }

    async fn complete_redirect(
        &self,
        code: &str,
        _state: &str,
    ) -> Result<FederatedSession, IdentityError> {
        self.record(MockCall::CompleteRedirect);
        let delay = *lock(&self.redirect_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if code != REDIRECT_CODE {
            self.emit(IdentityEvent::RedirectFailed("invalid_grant".into()));
            return Err(IdentityError::Redirect("invalid_grant".into()));
        }
        lock(&self.accounts).entry("google.user@gmail.com".to_string()).or_insert(Account {
            password: String::new(),
            confirmed: true,
            attributes: SignUpAttributes {
                given_name: "Gia".into(),
                family_name: "Tran".into(),
            },
        });
        Ok(self.start_session("google.user@gmail.com"))
    }

    fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.events.subscribe()
    }
}
