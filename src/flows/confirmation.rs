//! Verification-code screen controller
//!
//! Sits on top of the adapter's pending challenge. A rejected code keeps the
//! screen open with the error flag; resends are rate limited by the adapter.

use crate::identity::{IdentityProviderAdapter, ResendOutcome};
use crate::models::auth::AuthError;
use crate::models::{AuthOutcome, ChallengeState};
use crate::validation::{validate_code, FormError};
use log::warn;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Redirect(String),
    /// Still waiting on a code; `error` says why the last one failed
    Pending(ChallengeState),
    Error(FormError),
}

pub struct ConfirmationFlow {
    identity: Arc<IdentityProviderAdapter>,
    sign_in_path: String,
    post_login_redirect: String,
}

impl ConfirmationFlow {
    #[must_use]
    pub fn new(
        identity: Arc<IdentityProviderAdapter>,
        sign_in_path: impl Into<String>,
        post_login_redirect: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            sign_in_path: sign_in_path.into(),
            post_login_redirect: post_login_redirect.into(),
        }
    }

    #[must_use]
    pub fn challenge(&self) -> Option<ChallengeState> {
        self.identity.pending_challenge()
    }

    pub async fn submit(&self, code: &str) -> ConfirmationOutcome {
        let code = match validate_code(code) {
            Ok(code) => code,
            Err(e) => return ConfirmationOutcome::Error(e),
        };

        match self.identity.confirm_challenge(&code).await {
            Ok(AuthOutcome::Authenticated(_)) => {
                ConfirmationOutcome::Redirect(self.post_login_redirect.clone())
            }
            Ok(AuthOutcome::ChallengeRequired(challenge)) => {
                ConfirmationOutcome::Pending(challenge)
            }
            Ok(AuthOutcome::Cancelled) => ConfirmationOutcome::Redirect(self.sign_in_path.clone()),
            Err(e) => {
                warn!("Confirmation failed: {e}");
                ConfirmationOutcome::Error(FormError::form(e.user_message()))
            }
        }
    }

    /// Resend the code for the pending challenge
    ///
    /// # Errors
    ///
    /// Returns a form error when nothing is pending or the resend fails
    pub async fn resend(&self) -> Result<ResendOutcome, FormError> {
        let challenge = self
            .challenge()
            .ok_or_else(|| FormError::form(AuthError::NoPendingChallenge.user_message()))?;
        self.identity
            .resend_challenge_code(&challenge.identifier)
            .await
            .map_err(|e| FormError::form(e.user_message()))
    }

    /// Give up on the code and go back to sign-in
    pub fn cancel(&self) -> ConfirmationOutcome {
        self.identity.cancel_challenge();
        ConfirmationOutcome::Redirect(self.sign_in_path.clone())
    }
}
