//! Federated identity
//!
//! [`IdentityBackend`] is the contract with the external identity service.
//! [`CognitoIdentityBackend`] implements it against Amazon Cognito user pools
//! and the hosted UI. [`IdentityProviderAdapter`] drives a sign-in attempt
//! through an explicit state machine and writes results to the token store.

pub mod adapter;
pub mod cognito;
pub mod cooldown;
pub mod hosted_ui;

pub use adapter::{
    IdentityProviderAdapter, ResendOutcome, SignInMachine, SignInMachineInput, SignInMachineState,
};
pub use cognito::CognitoIdentityBackend;
pub use cooldown::ResendCooldown;
pub use hosted_ui::HostedUiClient;

use crate::models::auth::IdentityError;
use crate::models::{ChallengeKind, FederatedSession, SignUpAttributes};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Capacity of the identity lifecycle channel
pub const IDENTITY_EVENT_CAPACITY: usize = 16;

/// Identity backend lifecycle events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    SignedIn,
    TokenRefreshed,
    SignedOut,
    RedirectFailed(String),
}

/// Result of a sign-in step against the identity backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSignIn {
    Complete(FederatedSession),
    /// An out-of-band code is required before the attempt can finish
    NextStep(ChallengeKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignUpResult {
    /// The account was confirmed without a code
    pub user_confirmed: bool,
}

#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// # Errors
    ///
    /// `NotAuthorized` for bad credentials, `UserNotConfirmed` for an unconfirmed account
    async fn sign_in(&self, username: &str, password: &str) -> Result<BackendSignIn, IdentityError>;

    /// # Errors
    ///
    /// `UsernameExists` or `InvalidParameter` when the account is rejected
    async fn sign_up(
        &self,
        username: &str,
        password: &str,
        attributes: &SignUpAttributes,
    ) -> Result<SignUpResult, IdentityError>;

    /// # Errors
    ///
    /// `CodeMismatch`, `ExpiredCode` or `RateLimited` for a rejected code
    async fn confirm_sign_up(&self, username: &str, code: &str) -> Result<(), IdentityError>;

    /// Answer the challenge issued by the last `sign_in`
    ///
    /// # Errors
    ///
    /// `CodeMismatch`, `ExpiredCode` or `RateLimited` for a rejected code
    async fn confirm_sign_in(&self, code: &str) -> Result<BackendSignIn, IdentityError>;

    /// # Errors
    ///
    /// `RateLimited` when the identity service throttles code delivery
    async fn resend_sign_up_code(&self, username: &str) -> Result<(), IdentityError>;

    /// Current federated session, refreshed if expired; `None` when signed out
    ///
    /// # Errors
    ///
    /// Returns an error if an expired session cannot be refreshed
    async fn fetch_session(&self) -> Result<Option<FederatedSession>, IdentityError>;

    /// # Errors
    ///
    /// `NoSession` when there is nothing to refresh
    async fn refresh_session(&self) -> Result<FederatedSession, IdentityError>;

    /// Drop local tokens, then revoke them remotely
    ///
    /// # Errors
    ///
    /// Returns an error if revocation fails; local state is already gone
    async fn sign_out(&self) -> Result<(), IdentityError>;

    /// Drop local tokens without contacting the service
    fn clear_local_session(&self);

    /// Hosted-UI authorization URL for the configured social provider
    ///
    /// # Errors
    ///
    /// `NotConfigured` when no hosted-UI domain is set
    fn authorize_url(&self, force_account_chooser: bool) -> Result<String, IdentityError>;

    /// Exchange the authorization code from a hosted-UI callback
    ///
    /// # Errors
    ///
    /// `Redirect` when the state is invalid or the exchange is rejected
    async fn complete_redirect(
        &self,
        code: &str,
        state: &str,
    ) -> Result<FederatedSession, IdentityError>;

    fn subscribe(&self) -> broadcast::Receiver<IdentityEvent>;
}
