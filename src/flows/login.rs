//! Sign-in screen controller

use crate::api::backend::{BackendApi, ProfileFetcher};
use crate::identity::IdentityProviderAdapter;
use crate::models::auth::{ApiError, AuthError, CANNOT_REACH_SERVER, INVALID_CREDENTIALS};
use crate::models::{AuthOutcome, ChallengeState};
use crate::navigation::Navigator;
use crate::session::token_store::TokenStore;
use crate::utils::logging::LoggingHelper;
use crate::validation::{validate_email, validate_password, FormError};
use log::{error, warn};
use std::sync::Arc;

const GOOGLE_LOGIN_FAILED: &str = "Google login failed. Please try again.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    pub remember: bool,
}

impl LoginForm {
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            remember: false,
        }
    }

    #[must_use]
    pub fn remember(mut self, remember: bool) -> Self {
        self.remember = remember;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Signed in; go here
    Redirect(String),
    /// Federated sign-in needs a code first
    Challenge(ChallengeState),
    /// Stay on the form
    Error(FormError),
}

pub struct LoginFlow {
    store: Arc<dyn TokenStore>,
    backend: BackendApi,
    profiles: Arc<dyn ProfileFetcher>,
    identity: Option<Arc<IdentityProviderAdapter>>,
    post_login_redirect: String,
}

impl LoginFlow {
    #[must_use]
    pub fn new(
        store: Arc<dyn TokenStore>,
        backend: BackendApi,
        profiles: Arc<dyn ProfileFetcher>,
        identity: Option<Arc<IdentityProviderAdapter>>,
        post_login_redirect: impl Into<String>,
    ) -> Self {
        Self {
            store,
            backend,
            profiles,
            identity,
            post_login_redirect: post_login_redirect.into(),
        }
    }

    /// Email to pre-fill, if the user asked to be remembered
    #[must_use]
    pub fn remembered_email(&self) -> Option<String> {
        self.store.remembered_identifier()
    }

    pub async fn submit(&self, form: &LoginForm) -> LoginOutcome {
        let email = match validate_email(&form.email) {
            Ok(email) => email,
            Err(e) => return LoginOutcome::Error(e),
        };
        if let Err(e) = validate_password(&form.password) {
            return LoginOutcome::Error(e);
        }

        let outcome = match &self.identity {
            Some(identity) => self.federated_sign_in(identity, &email, &form.password).await,
            None => self.backend_sign_in(&email, &form.password).await,
        };

        if matches!(outcome, LoginOutcome::Redirect(_)) {
            self.apply_remember(&email, form.remember);
        }
        outcome
    }

    async fn federated_sign_in(
        &self,
        identity: &IdentityProviderAdapter,
        email: &str,
        password: &str,
    ) -> LoginOutcome {
        match identity.sign_in(email, password).await {
            Ok(AuthOutcome::Authenticated(_)) => {
                LoginOutcome::Redirect(self.post_login_redirect.clone())
            }
            Ok(AuthOutcome::ChallengeRequired(challenge)) => LoginOutcome::Challenge(challenge),
            Ok(AuthOutcome::Cancelled) => LoginOutcome::Error(FormError::form(
                AuthError::NoPendingChallenge.user_message(),
            )),
            Err(e) => LoginOutcome::Error(FormError::form(e.user_message())),
        }
    }

    async fn backend_sign_in(&self, email: &str, password: &str) -> LoginOutcome {
        let token = match self.backend.login(email, password).await {
            Ok(token) => token,
            Err(e) => {
                warn!("Backend login failed: {e}");
                return LoginOutcome::Error(FormError::form(login_error_message(&e)));
            }
        };

        match self.profiles.fetch_profile(&token).await {
            Ok(profile) => {
                self.store.set_session(&token, Some(profile.clone()));
                LoggingHelper::log_session_stored(Some(&profile.display_name()), "password");
                LoginOutcome::Redirect(self.post_login_redirect.clone())
            }
            Err(ApiError::Network(e)) => {
                warn!("whoami unreachable after login: {e}");
                LoginOutcome::Error(FormError::form(CANNOT_REACH_SERVER))
            }
            Err(e) => {
                warn!("whoami failed after login: {e}");
                LoginOutcome::Error(FormError::form("Failed to fetch user info"))
            }
        }
    }

    fn apply_remember(&self, email: &str, remember: bool) {
        if remember {
            self.store.remember_identifier(email);
        } else {
            self.store.forget_identifier();
        }
    }

    /// Start Google sign-in through the hosted UI
    ///
    /// # Errors
    ///
    /// Returns a form error when federated identity is not configured
    pub fn begin_google_sign_in(
        &self,
        navigator: &dyn Navigator,
        select_account: bool,
    ) -> Result<String, FormError> {
        let identity = self
            .identity
            .as_ref()
            .ok_or_else(|| FormError::form(AuthError::NotConfigured.user_message()))?;
        identity
            .begin_federated_redirect(select_account, navigator)
            .map_err(|e| {
                error!("Could not start Google sign-in: {e}");
                FormError::form(e.user_message())
            })
    }

    /// Exchange a Google ID token credential with the backend directly
    pub async fn google_credential_sign_in(&self, credential: &str) -> LoginOutcome {
        match self.backend.google_login(credential).await {
            Ok(response) => {
                let name = response.user.as_ref().map(crate::models::UserProfile::display_name);
                self.store.set_session(&response.access_token, response.user);
                LoggingHelper::log_session_stored(name.as_deref(), "google");
                LoginOutcome::Redirect(self.post_login_redirect.clone())
            }
            Err(e) => {
                error!("Google login failed: {e}");
                LoginOutcome::Error(FormError::form(GOOGLE_LOGIN_FAILED))
            }
        }
    }
}

/// Inline message for a failed `POST /auth/login`
fn login_error_message(err: &ApiError) -> String {
    match err {
        ApiError::Network(_) => CANNOT_REACH_SERVER.to_string(),
        e if e.is_unauthorized() => INVALID_CREDENTIALS.to_string(),
        other => AuthError::from(other.clone()).user_message(),
    }
}
