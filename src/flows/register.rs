//! Registration screen controller

use crate::api::backend::{BackendApi, RegisterRequest};
use crate::identity::IdentityProviderAdapter;
use crate::models::auth::AuthError;
use crate::models::{AuthOutcome, ChallengeState, SignUpAttributes};
use crate::validation::{validate_email, validate_name, validate_new_password, FormError, FormField};
use log::{info, warn};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

/// A validated form, ready to send
struct ValidRegistration {
    first_name: String,
    last_name: String,
    email: String,
    password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Redirect(String),
    /// The account needs its emailed code
    Challenge(ChallengeState),
    Error(FormError),
}

pub struct RegisterFlow {
    backend: BackendApi,
    identity: Option<Arc<IdentityProviderAdapter>>,
    sign_in_path: String,
    post_login_redirect: String,
}

impl RegisterFlow {
    #[must_use]
    pub fn new(
        backend: BackendApi,
        identity: Option<Arc<IdentityProviderAdapter>>,
        sign_in_path: impl Into<String>,
        post_login_redirect: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            identity,
            sign_in_path: sign_in_path.into(),
            post_login_redirect: post_login_redirect.into(),
        }
    }

    fn validate(form: &RegisterForm) -> Result<ValidRegistration, FormError> {
        let first_name = validate_name(&form.first_name, FormField::FirstName)?;
        let last_name = validate_name(&form.last_name, FormField::LastName)?;
        let email = validate_email(&form.email)?;
        validate_new_password(&form.password, &form.confirm_password)?;
        Ok(ValidRegistration {
            first_name,
            last_name,
            email,
            password: form.password.clone(),
        })
    }

    pub async fn submit(&self, form: &RegisterForm) -> RegisterOutcome {
        let registration = match Self::validate(form) {
            Ok(registration) => registration,
            Err(e) => return RegisterOutcome::Error(e),
        };

        match &self.identity {
            Some(identity) => self.federated_sign_up(identity, registration).await,
            None => self.backend_register(registration).await,
        }
    }

    async fn federated_sign_up(
        &self,
        identity: &IdentityProviderAdapter,
        registration: ValidRegistration,
    ) -> RegisterOutcome {
        let attributes = SignUpAttributes {
            given_name: registration.first_name,
            family_name: registration.last_name,
        };
        match identity
            .sign_up(&registration.email, &registration.password, &attributes)
            .await
        {
            Ok(AuthOutcome::Authenticated(_)) => {
                RegisterOutcome::Redirect(self.post_login_redirect.clone())
            }
            Ok(AuthOutcome::ChallengeRequired(challenge)) => RegisterOutcome::Challenge(challenge),
            Ok(AuthOutcome::Cancelled) => RegisterOutcome::Redirect(self.sign_in_path.clone()),
            Err(e) => RegisterOutcome::Error(sign_up_error(&e)),
        }
    }

    async fn backend_register(&self, registration: ValidRegistration) -> RegisterOutcome {
        let request = RegisterRequest {
            first_name: registration.first_name,
            last_name: registration.last_name,
            email: registration.email,
            password: registration.password,
        };
        match self.backend.register(&request).await {
            Ok(_) => {
                info!("✅ Registration successful");
                RegisterOutcome::Redirect(self.sign_in_path.clone())
            }
            Err(e) => {
                warn!("Registration failed: {e}");
                RegisterOutcome::Error(sign_up_error(&AuthError::from(e)))
            }
        }
    }
}

fn sign_up_error(err: &AuthError) -> FormError {
    match err {
        AuthError::UsernameExists => FormError::field(FormField::Email, err.user_message()),
        AuthError::InvalidParameter(_)
            if err.user_message().to_lowercase().contains("password") =>
        {
            FormError::field(FormField::Password, err.user_message())
        }
        _ => FormError::form(err.user_message()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> RegisterForm {
        RegisterForm {
            first_name: "Ann".into(),
            last_name: "Lee".into(),
            email: "a@b.com".into(),
            password: "Secret123!".into(),
            confirm_password: "Secret123!".into(),
        }
    }

    #[test]
    fn test_validation_order() {
        let mut bad = form();
        bad.first_name.clear();
        bad.email = "nope".into();
        let err = RegisterFlow::validate(&bad).err().unwrap();
        assert_eq!(err.field, Some(FormField::FirstName));

        let mut mismatch = form();
        mismatch.confirm_password = "Secret123?".into();
        let err = RegisterFlow::validate(&mismatch).err().unwrap();
        assert_eq!(err.field, Some(FormField::ConfirmPassword));

        assert!(RegisterFlow::validate(&form()).is_ok());
    }

    #[test]
    fn test_sign_up_error_fields() {
        assert_eq!(sign_up_error(&AuthError::UsernameExists).field, Some(FormField::Email));
        assert_eq!(
            sign_up_error(&AuthError::InvalidParameter("Password not long enough".into())).field,
            Some(FormField::Password)
        );
        assert_eq!(sign_up_error(&AuthError::Network("down".into())).field, None);
    }
}
