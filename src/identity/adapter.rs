//! Identity Provider Adapter
//!
//! Drives one sign-in attempt at a time through an explicit state machine:
//!
//! ```text
//!            Submit
//!   Idle ─────────────► Submitted ──Accepted──► Authenticated
//!                        │  ▲   │
//!        ChallengeIssued │  │   └──Rejected──► Idle
//!                        ▼  │ CodeAccepted
//!               ChallengeRequired ──Cancel──► Cancelled
//!                   │   ▲
//!                   └───┘ CodeRejected
//! ```
//!
//! `Submitted` also moves to `Cancelled` (`Abandon`) when a confirmed sign-up
//! cannot continue into a session. Starting a new attempt always begins from a
//! fresh machine, so a resolved challenge is never reused.

use crate::api::backend::ProfileFetcher;
use crate::api::client::TokenRefresher;
use crate::identity::cooldown::ResendCooldown;
use crate::identity::{BackendSignIn, IdentityBackend, IdentityEvent};
use crate::models::auth::{AuthError, IdentityError};
use crate::models::{
    AuthOutcome, AuthenticatedSession, ChallengeError, ChallengeKind, ChallengeState,
    FederatedSession, ProfileSource, SignUpAttributes, UserProfile,
};
use crate::navigation::{Location, Navigator};
use crate::session::token_store::TokenStore;
use crate::utils::jwt;
use crate::utils::logging::LoggingHelper;
use async_trait::async_trait;
use log::{debug, info, warn};
use rust_fsm::*;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub sign_in_machine(Idle)

    Idle => {
        Submit => Submitted
    },
    Submitted => {
        Accepted => Authenticated,
        ChallengeIssued => ChallengeRequired,
        Rejected => Idle,
        Abandon => Cancelled
    },
    ChallengeRequired => {
        CodeAccepted => Submitted,
        CodeRejected => ChallengeRequired,
        Cancel => Cancelled
    },
    Authenticated => {
        Reset => Idle
    },
    Cancelled => {
        Reset => Idle
    }
}

pub use sign_in_machine::Input as SignInMachineInput;
pub use sign_in_machine::State as SignInMachineState;
pub use sign_in_machine::StateMachine as SignInMachine;

/// Result of a resend request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResendOutcome {
    Sent,
    /// Nothing was sent; the cooldown window is still open
    CoolingDown { remaining: Duration },
}

/// What the current attempt is waiting on
#[derive(Debug, Clone)]
struct PendingAttempt {
    kind: ChallengeKind,
    identifier: String,
    /// Kept in memory for the attempt only, to sign in after sign-up confirmation
    secret: Option<String>,
}

struct Attempt {
    machine: SignInMachine,
    pending: Option<PendingAttempt>,
}

pub struct IdentityProviderAdapter {
    backend: Arc<dyn IdentityBackend>,
    store: Arc<dyn TokenStore>,
    profiles: Arc<dyn ProfileFetcher>,
    cooldown: ResendCooldown,
    sign_out_timeout: Duration,
    attempt: Mutex<Attempt>,
}

impl IdentityProviderAdapter {
    #[must_use]
    pub fn new(
        backend: Arc<dyn IdentityBackend>,
        store: Arc<dyn TokenStore>,
        profiles: Arc<dyn ProfileFetcher>,
        resend_cooldown: Duration,
        sign_out_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            store,
            profiles,
            cooldown: ResendCooldown::new(resend_cooldown),
            sign_out_timeout,
            attempt: Mutex::new(Attempt {
                machine: SignInMachine::new(),
                pending: None,
            }),
        }
    }

    // =========================================================================
    // Attempt state
    // =========================================================================

    #[must_use]
    pub fn attempt_state(&self) -> SignInMachineState {
        self.with_attempt(|attempt| attempt.machine.state().clone())
    }

    /// The challenge awaiting a code, if any
    #[must_use]
    pub fn pending_challenge(&self) -> Option<ChallengeState> {
        self.with_attempt(|attempt| match attempt.machine.state() {
            SignInMachineState::ChallengeRequired => attempt
                .pending
                .as_ref()
                .map(|p| ChallengeState::new(p.kind, p.identifier.clone())),
            _ => None,
        })
    }

    fn with_attempt<T>(&self, f: impl FnOnce(&mut Attempt) -> T) -> T {
        let mut guard = self.attempt.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    fn transition(&self, input: &SignInMachineInput) -> Result<(), AuthError> {
        self.with_attempt(|attempt| {
            let from = attempt.machine.state().clone();
            attempt.machine.consume(input).map_err(|_| {
                AuthError::InvalidStateTransition(format!("{input:?} from {from:?}"))
            })?;
            debug!("Sign-in attempt {from:?} -> {:?}", attempt.machine.state());
            Ok(())
        })
    }

    /// Throw away any previous attempt and enter `Submitted`
    fn begin_attempt(&self) -> Result<(), AuthError> {
        self.with_attempt(|attempt| {
            if attempt.machine.consume(&SignInMachineInput::Reset).is_err() {
                attempt.machine = SignInMachine::new();
            }
            attempt.pending = None;
        });
        self.transition(&SignInMachineInput::Submit)
    }

    fn enter_challenge(
        &self,
        kind: ChallengeKind,
        identifier: &str,
        secret: Option<&str>,
    ) -> Result<AuthOutcome, AuthError> {
        self.transition(&SignInMachineInput::ChallengeIssued)?;
        self.with_attempt(|attempt| {
            attempt.pending = Some(PendingAttempt {
                kind,
                identifier: identifier.to_string(),
                secret: secret.map(str::to_string),
            });
        });
        info!("🔐 Challenge required ({kind:?})");
        Ok(AuthOutcome::ChallengeRequired(ChallengeState::new(kind, identifier)))
    }

    fn reject(&self, err: IdentityError) -> AuthError {
        if self.transition(&SignInMachineInput::Rejected).is_err() {
            debug!("Rejected outside of a submitted attempt");
        }
        self.with_attempt(|attempt| attempt.pending = None);
        AuthError::from(err)
    }

    // =========================================================================
    // Sign-in / sign-up / challenges
    // =========================================================================

    /// Sign in with an identifier and secret
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` when rejected, `Network` when the service cannot be reached
    pub async fn sign_in(&self, identifier: &str, secret: &str) -> Result<AuthOutcome, AuthError> {
        self.begin_attempt()?;
        let result = self.backend.sign_in(identifier, secret).await;
        self.handle_sign_in(identifier, Some(secret), result).await
    }

    /// `secret` is only retained for a sign-up confirmation, which has to sign in again
    async fn handle_sign_in(
        &self,
        identifier: &str,
        secret: Option<&str>,
        result: Result<BackendSignIn, IdentityError>,
    ) -> Result<AuthOutcome, AuthError> {
        match result {
            Ok(BackendSignIn::Complete(session)) => self.authenticate(session).await,
            Ok(BackendSignIn::NextStep(ChallengeKind::ConfirmSignIn)) => {
                self.enter_challenge(ChallengeKind::ConfirmSignIn, identifier, None)
            }
            Ok(BackendSignIn::NextStep(ChallengeKind::ConfirmSignUp))
            | Err(IdentityError::UserNotConfirmed) => {
                self.enter_challenge(ChallengeKind::ConfirmSignUp, identifier, secret)
            }
            Err(e) => {
                warn!("Sign-in rejected: {e}");
                Err(self.reject(e))
            }
        }
    }

    /// Register a new account
    ///
    /// # Errors
    ///
    /// `UsernameExists`, `InvalidParameter` or `Network`
    pub async fn sign_up(
        &self,
        identifier: &str,
        secret: &str,
        attributes: &SignUpAttributes,
    ) -> Result<AuthOutcome, AuthError> {
        self.begin_attempt()?;
        match self.backend.sign_up(identifier, secret, attributes).await {
            Ok(result) if result.user_confirmed => {
                info!("Account auto-confirmed, signing in");
                let result = self.backend.sign_in(identifier, secret).await;
                self.handle_sign_in(identifier, Some(secret), result).await
            }
            Ok(_) => self.enter_challenge(ChallengeKind::ConfirmSignUp, identifier, Some(secret)),
            Err(e) => {
                warn!("Sign-up rejected: {e}");
                Err(self.reject(e))
            }
        }
    }

    /// Submit the out-of-band code for the pending challenge
    ///
    /// A rejected code keeps the challenge open with an error flag.
    ///
    /// # Errors
    ///
    /// `NoPendingChallenge` outside a challenge; other service failures as `AuthError`
    pub async fn confirm_challenge(&self, code: &str) -> Result<AuthOutcome, AuthError> {
        let pending = self
            .with_attempt(|attempt| match attempt.machine.state() {
                SignInMachineState::ChallengeRequired => attempt.pending.clone(),
                _ => None,
            })
            .ok_or(AuthError::NoPendingChallenge)?;
        let code = code.trim();

        match pending.kind {
            ChallengeKind::ConfirmSignUp => {
                match self.backend.confirm_sign_up(&pending.identifier, code).await {
                    Ok(()) => {
                        self.transition(&SignInMachineInput::CodeAccepted)?;
                        info!("✅ Sign-up confirmed");
                        match pending.secret {
                            Some(secret) => {
                                let result =
                                    self.backend.sign_in(&pending.identifier, &secret).await;
                                self.handle_sign_in(&pending.identifier, Some(&secret), result)
                                    .await
                            }
                            None => {
                                self.transition(&SignInMachineInput::Abandon)?;
                                self.with_attempt(|attempt| attempt.pending = None);
                                Ok(AuthOutcome::Cancelled)
                            }
                        }
                    }
                    Err(e) => self.code_rejected(&pending, e),
                }
            }
            ChallengeKind::ConfirmSignIn => match self.backend.confirm_sign_in(code).await {
                Ok(step) => {
                    self.transition(&SignInMachineInput::CodeAccepted)?;
                    self.handle_sign_in(&pending.identifier, pending.secret.as_deref(), Ok(step))
                        .await
                }
                Err(e) => self.code_rejected(&pending, e),
            },
        }
    }

    fn code_rejected(
        &self,
        pending: &PendingAttempt,
        err: IdentityError,
    ) -> Result<AuthOutcome, AuthError> {
        let Some(flag) = challenge_error(&err) else {
            warn!("Challenge confirmation failed: {err}");
            return Err(AuthError::from(err));
        };
        self.transition(&SignInMachineInput::CodeRejected)?;
        info!("Challenge code rejected ({flag:?})");
        Ok(AuthOutcome::ChallengeRequired(
            ChallengeState::new(pending.kind, pending.identifier.clone()).with_error(flag),
        ))
    }

    /// Abandon the pending challenge; idempotent
    pub fn cancel_challenge(&self) -> AuthOutcome {
        self.with_attempt(|attempt| {
            if *attempt.machine.state() == SignInMachineState::ChallengeRequired
                && attempt.machine.consume(&SignInMachineInput::Cancel).is_ok()
            {
                info!("Challenge cancelled");
            }
            attempt.pending = None;
        });
        AuthOutcome::Cancelled
    }

    /// Ask the service to resend the sign-up code, at most once per cooldown window
    ///
    /// # Errors
    ///
    /// Returns an error if the resend itself fails; the window is reopened
    pub async fn resend_challenge_code(
        &self,
        identifier: &str,
    ) -> Result<ResendOutcome, AuthError> {
        if let Err(remaining) = self.cooldown.try_acquire() {
            debug!("Resend suppressed, {}s of cooldown left", remaining.as_secs());
            return Ok(ResendOutcome::CoolingDown { remaining });
        }
        match self.backend.resend_sign_up_code(identifier).await {
            Ok(()) => Ok(ResendOutcome::Sent),
            Err(e) => {
                self.cooldown.reset();
                Err(AuthError::from(e))
            }
        }
    }

    #[must_use]
    pub fn resend_cooldown_remaining(&self) -> Option<Duration> {
        self.cooldown.remaining()
    }

    // =========================================================================
    // Hosted-UI redirect
    // =========================================================================

    /// Leave the application for the hosted UI
    ///
    /// With `force_account_chooser` the local session is dropped first so the
    /// provider asks which account to use.
    ///
    /// # Errors
    ///
    /// `NotConfigured` when no hosted-UI domain is set
    pub fn begin_federated_redirect(
        &self,
        force_account_chooser: bool,
        navigator: &dyn Navigator,
    ) -> Result<String, AuthError> {
        if force_account_chooser {
            self.backend.clear_local_session();
            self.store.clear();
        }
        let url = self.backend.authorize_url(force_account_chooser)?;
        navigator.redirect_external(&url);
        Ok(url)
    }

    /// Finish a hosted-UI redirect from the full callback URL
    ///
    /// # Errors
    ///
    /// `Redirect` for error parameters, a missing code or a rejected exchange
    pub async fn complete_federated_redirect(
        &self,
        callback_url: &str,
    ) -> Result<AuthOutcome, AuthError> {
        let location = Location::parse(callback_url);
        if let Some(error) = location.query_param("error") {
            let description = location.query_param("error_description").unwrap_or_default();
            return Err(AuthError::Redirect(format!("{error}: {description}")));
        }
        let code = location
            .query_param("code")
            .ok_or_else(|| AuthError::Redirect("callback has no authorization code".into()))?;
        let state = location.query_param("state").unwrap_or_default();

        self.begin_attempt()?;
        match self.backend.complete_redirect(&code, &state).await {
            Ok(session) => self.authenticate(session).await,
            Err(e) => Err(self.reject(e)),
        }
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Store a federated session, resolving a display profile for it
    async fn authenticate(&self, session: FederatedSession) -> Result<AuthOutcome, AuthError> {
        let token = session.id_token;
        let (profile, profile_source) = self.resolve_profile(&token).await;
        self.store.set_session(&token, profile.clone());
        self.transition(&SignInMachineInput::Accepted)?;
        self.with_attempt(|attempt| attempt.pending = None);
        info!("✅ Signed in (profile from {profile_source:?})");

        Ok(AuthOutcome::Authenticated(AuthenticatedSession {
            token,
            profile,
            profile_source,
        }))
    }

    /// Backend "whoami", falling back to the token's own claims
    async fn resolve_profile(&self, token: &str) -> (Option<UserProfile>, Option<ProfileSource>) {
        match self.profiles.fetch_profile(token).await {
            Ok(profile) => (Some(profile), Some(ProfileSource::Backend)),
            Err(e) => {
                debug!("Profile fetch failed, decoding token claims: {e}");
                match Self::profile_from_token(token) {
                    Some(profile) => (Some(profile), Some(ProfileSource::TokenClaims)),
                    None => (None, None),
                }
            }
        }
    }

    /// Display-only profile decoded from an unverified token
    #[must_use]
    pub fn profile_from_token(token: &str) -> Option<UserProfile> {
        jwt::profile_from_token(token)
    }

    /// Current federated token, if the identity service has a session
    pub async fn session_token(&self) -> Option<String> {
        match self.backend.fetch_session().await {
            Ok(session) => session.map(|s| s.id_token),
            Err(e) => {
                debug!("No federated session available: {e}");
                None
            }
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.backend.subscribe()
    }

    /// Sign out locally, then revoke remotely on a deadline
    ///
    /// The token store is cleared before anything else; the revocation result
    /// only decides what gets logged. Safe to call when already signed out.
    pub async fn sign_out(&self) {
        self.store.clear();
        self.with_attempt(|attempt| {
            attempt.machine = SignInMachine::new();
            attempt.pending = None;
        });

        let outcome = tokio::time::timeout(self.sign_out_timeout, self.backend.sign_out()).await;
        LoggingHelper::log_sign_out_race(&outcome, self.sign_out_timeout);
    }
}

/// Code failures that keep the challenge open
fn challenge_error(err: &IdentityError) -> Option<ChallengeError> {
    match err {
        IdentityError::CodeMismatch => Some(ChallengeError::InvalidCode),
        IdentityError::ExpiredCode => Some(ChallengeError::ExpiredCode),
        IdentityError::RateLimited => Some(ChallengeError::RateLimited),
        IdentityError::Network(_) => Some(ChallengeError::Network),
        _ => None,
    }
}

#[async_trait]
impl TokenRefresher for IdentityProviderAdapter {
    async fn refresh(&self) -> Result<String, AuthError> {
        let session = self.backend.refresh_session().await?;
        Ok(session.id_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_happy_path() {
        let mut machine = SignInMachine::new();
        assert_eq!(*machine.state(), SignInMachineState::Idle);

        machine.consume(&SignInMachineInput::Submit).unwrap();
        machine.consume(&SignInMachineInput::ChallengeIssued).unwrap();
        machine.consume(&SignInMachineInput::CodeRejected).unwrap();
        assert_eq!(*machine.state(), SignInMachineState::ChallengeRequired);

        machine.consume(&SignInMachineInput::CodeAccepted).unwrap();
        machine.consume(&SignInMachineInput::Accepted).unwrap();
        assert_eq!(*machine.state(), SignInMachineState::Authenticated);
    }

    #[test]
    fn test_machine_rejects_code_outside_challenge() {
        let mut machine = SignInMachine::new();
        assert!(machine.consume(&SignInMachineInput::CodeAccepted).is_err());
        assert_eq!(*machine.state(), SignInMachineState::Idle);
    }

    #[test]
    fn test_cancelled_is_terminal_until_reset() {
        let mut machine = SignInMachine::new();
        machine.consume(&SignInMachineInput::Submit).unwrap();
        machine.consume(&SignInMachineInput::ChallengeIssued).unwrap();
        machine.consume(&SignInMachineInput::Cancel).unwrap();

        assert!(machine.consume(&SignInMachineInput::CodeAccepted).is_err());
        machine.consume(&SignInMachineInput::Reset).unwrap();
        assert_eq!(*machine.state(), SignInMachineState::Idle);
    }

    fn pending_secret(adapter: &IdentityProviderAdapter) -> Option<String> {
        adapter.with_attempt(|attempt| attempt.pending.as_ref().and_then(|p| p.secret.clone()))
    }

    #[tokio::test]
    async fn test_only_sign_up_confirmation_keeps_secret() {
        use crate::session::MemoryTokenStore;
        use crate::testing::constants::{TEST_EMAIL, TEST_PASSWORD};
        use crate::testing::{MockIdentityBackend, MockProfileFetcher};

        let backend = Arc::new(MockIdentityBackend::new());
        let adapter = IdentityProviderAdapter::new(
            backend.clone(),
            Arc::new(MemoryTokenStore::new()),
            Arc::new(MockProfileFetcher::new()),
            Duration::from_secs(60),
            Duration::from_secs(1),
        );

        backend.with_account(TEST_EMAIL, TEST_PASSWORD, true).require_sign_in_code(true);
        let outcome = adapter.sign_in(TEST_EMAIL, TEST_PASSWORD).await.unwrap();
        assert_eq!(outcome.challenge().unwrap().kind, ChallengeKind::ConfirmSignIn);
        assert!(pending_secret(&adapter).is_none());

        backend.with_account(TEST_EMAIL, TEST_PASSWORD, false).require_sign_in_code(false);
        let outcome = adapter.sign_in(TEST_EMAIL, TEST_PASSWORD).await.unwrap();
        assert_eq!(outcome.challenge().unwrap().kind, ChallengeKind::ConfirmSignUp);
        assert_eq!(pending_secret(&adapter).as_deref(), Some(TEST_PASSWORD));
    }

    #[test]
    fn test_challenge_error_mapping() {
        assert_eq!(
            challenge_error(&IdentityError::CodeMismatch),
            Some(ChallengeError::InvalidCode)
        );
        assert_eq!(
            challenge_error(&IdentityError::Network("offline".into())),
            Some(ChallengeError::Network)
        );
        assert_eq!(challenge_error(&IdentityError::UsernameExists), None);
    }
}
