//! Amazon Cognito user-pool backend
//!
//! Talks to the regional `cognito-idp` JSON API (`X-Amz-Target` operations) for
//! direct sign-in, sign-up and challenges, and to the hosted UI for Google.
//! Tokens are held in memory only; the token store owns persistence.

use crate::api::transport::{ApiRequest, HttpTransport};
use crate::identity::hosted_ui::HostedUiClient;
use crate::identity::{
    BackendSignIn, IdentityBackend, IdentityEvent, SignUpResult, IDENTITY_EVENT_CAPACITY,
};
use crate::models::auth::IdentityError;
use crate::models::{ChallengeKind, FederatedSession, SignUpAttributes};
use crate::settings::CognitoSettings;
use crate::utils::crypto::cognito_secret_hash;
use crate::utils::jwt::decode_jwt_payload;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

const TARGET_PREFIX: &str = "AWSCognitoIdentityProviderService";
const AMZ_JSON: &str = "application/x-amz-json-1.1";

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    id_token: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct AuthResponse {
    authentication_result: Option<AuthenticationResult>,
    challenge_name: Option<String>,
    session: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct SignUpResponse {
    #[serde(default)]
    user_confirmed: bool,
}

/// Challenge issued by `InitiateAuth`, answered by `RespondToAuthChallenge`
#[derive(Debug, Clone)]
struct PendingChallenge {
    username: String,
    name: String,
    session: String,
}

pub struct CognitoIdentityBackend {
    endpoint: String,
    client_id: String,
    client_secret: Option<String>,
    transport: Arc<dyn HttpTransport>,
    hosted_ui: Option<HostedUiClient>,
    tokens: RwLock<Option<FederatedSession>>,
    pending: RwLock<Option<PendingChallenge>>,
    events: broadcast::Sender<IdentityEvent>,
}

impl CognitoIdentityBackend {
    /// # Errors
    ///
    /// `NotConfigured` when the user pool or app client id is missing
    pub fn from_settings(
        cognito: &CognitoSettings,
        state_secret: Option<&str>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, IdentityError> {
        if cognito.user_pool_id.is_none() {
            return Err(IdentityError::NotConfigured);
        }
        let client_id = cognito.client_id.clone().ok_or(IdentityError::NotConfigured)?;
        let hosted_ui = HostedUiClient::from_settings(cognito, state_secret, transport.clone());
        let (events, _) = broadcast::channel(IDENTITY_EVENT_CAPACITY);

        Ok(Self {
            endpoint: cognito.idp_endpoint(),
            client_id,
            client_secret: cognito.client_secret.clone(),
            transport,
            hosted_ui,
            tokens: RwLock::new(None),
            pending: RwLock::new(None),
            events,
        })
    }

    /// Invoke one user-pool API operation
    async fn call(&self, operation: &str, body: Value) -> Result<Value, IdentityError> {
        let request = ApiRequest::post(&self.endpoint)
            .header("Content-Type", AMZ_JSON)
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{operation}"))
            .json(body);

        debug!("Cognito {operation}");
        let response = self.transport.execute(request).await?;
        if response.is_success() {
            if response.body.trim().is_empty() {
                return Ok(Value::Null);
            }
            return response
                .json()
                .map_err(|e| IdentityError::InvalidResponse(format!("{operation}: {e}")));
        }

        let error: Value = response.json().unwrap_or(Value::Null);
        let error_type = error
            .get("__type")
            .and_then(Value::as_str)
            .unwrap_or("UnknownError");
        let message = error
            .get("message")
            .or_else(|| error.get("Message"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        debug!("Cognito {operation} failed with {}: {error_type}", response.status);
        Err(map_service_error(error_type, message))
    }

    fn secret_hash(&self, username: &str) -> Result<Option<String>, IdentityError> {
        self.client_secret
            .as_deref()
            .map(|secret| {
                cognito_secret_hash(username, &self.client_id, secret)
                    .map_err(|e| IdentityError::InvalidParameter(e.to_string()))
            })
            .transpose()
    }

    fn with_secret_hash(
        &self,
        mut body: Value,
        key: &str,
        username: &str,
    ) -> Result<Value, IdentityError> {
        if let Some(hash) = self.secret_hash(username)? {
            body[key] = Value::String(hash);
        }
        Ok(body)
    }

    /// Turn an `InitiateAuth`/`RespondToAuthChallenge` response into a sign-in step
    fn handle_auth_response(
        &self,
        username: &str,
        response: Value,
    ) -> Result<BackendSignIn, IdentityError> {
        let response: AuthResponse = serde_json::from_value(response)
            .map_err(|e| IdentityError::InvalidResponse(e.to_string()))?;

        if let Some(result) = response.authentication_result {
            let session = Self::session_from_result(result, None)?;
            self.set_pending(None);
            self.set_tokens(Some(session.clone()));
            let _ = self.events.send(IdentityEvent::SignedIn);
            return Ok(BackendSignIn::Complete(session));
        }

        match (response.challenge_name, response.session) {
            (Some(name), Some(session)) => {
                info!("🔐 Sign-in challenge issued: {name}");
                self.set_pending(Some(PendingChallenge {
                    username: username.to_string(),
                    name,
                    session,
                }));
                Ok(BackendSignIn::NextStep(ChallengeKind::ConfirmSignIn))
            }
            _ => Err(IdentityError::InvalidResponse(
                "neither tokens nor a challenge were returned".into(),
            )),
        }
    }

    fn session_from_result(
        result: AuthenticationResult,
        previous_refresh_token: Option<String>,
    ) -> Result<FederatedSession, IdentityError> {
        let id_token = result
            .id_token
            .ok_or_else(|| {
                IdentityError::InvalidResponse("no IdToken in AuthenticationResult".into())
            })?;
        Ok(FederatedSession {
            id_token,
            access_token: result.access_token,
            refresh_token: result.refresh_token.or(previous_refresh_token),
            expires_at: Utc::now() + Duration::seconds(result.expires_in.unwrap_or(3600)),
        })
    }

    fn current_tokens(&self) -> Option<FederatedSession> {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_tokens(&self, session: Option<FederatedSession>) {
        *self.tokens.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn take_tokens(&self) -> Option<FederatedSession> {
        self.tokens.write().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn set_pending(&self, pending: Option<PendingChallenge>) {
        *self.pending.write().unwrap_or_else(PoisonError::into_inner) = pending;
    }

    fn current_pending(&self) -> Option<PendingChallenge> {
        self.pending
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Map a Cognito `__type` (optionally namespaced with `#`) to an identity error
fn map_service_error(error_type: &str, message: &str) -> IdentityError {
    let code = error_type.rsplit('#').next().unwrap_or(error_type);
    match code {
        "NotAuthorizedException" | "UserNotFoundException" => {
            IdentityError::NotAuthorized(message.to_string())
        }
        "UserNotConfirmedException" => IdentityError::UserNotConfirmed,
        "UsernameExistsException" | "AliasExistsException" => IdentityError::UsernameExists,
        "CodeMismatchException" => IdentityError::CodeMismatch,
        "ExpiredCodeException" => IdentityError::ExpiredCode,
        "LimitExceededException"
        | "TooManyRequestsException"
        | "TooManyFailedAttemptsException" => {
            IdentityError::RateLimited
        }
        "InvalidParameterException" | "InvalidPasswordException" => {
            IdentityError::InvalidParameter(message.to_string())
        }
        _ => IdentityError::Service {
            code: code.to_string(),
            message: message.to_string(),
        },
    }
}

/// `ChallengeResponses` key that carries the code for a challenge
fn challenge_code_key(challenge_name: &str) -> &'static str {
    match challenge_name {
        "EMAIL_OTP" => "EMAIL_OTP_CODE",
        "SOFTWARE_TOKEN_MFA" => "SOFTWARE_TOKEN_MFA_CODE",
        _ => "SMS_MFA_CODE",
    }
}

#[async_trait]
impl IdentityBackend for CognitoIdentityBackend {
    async fn sign_in(
        &self,
        username: &str,
        password: &str,
    ) -> Result<BackendSignIn, IdentityError> {
        let mut auth_parameters = Map::new();
        auth_parameters.insert("USERNAME".into(), json!(username));
        auth_parameters.insert("PASSWORD".into(), json!(password));
        if let Some(hash) = self.secret_hash(username)? {
            auth_parameters.insert("SECRET_HASH".into(), json!(hash));
        }

        let response = self
            .call(
                "InitiateAuth",
                json!({
                    "AuthFlow": "USER_PASSWORD_AUTH",
                    "ClientId": self.client_id,
                    "AuthParameters": auth_parameters,
                }),
            )
            .await?;
        self.handle_auth_response(username, response)
    }

    async fn sign_up(
        &self,
        username: &str,
        password: &str,
        attributes: &SignUpAttributes,
    ) -> Result<SignUpResult, IdentityError> {
        let body = json!({
            "ClientId": self.client_id,
            "Username": username,
            "Password": password,
            "UserAttributes": [
                { "Name": "email", "Value": username },
                { "Name": "given_name", "Value": attributes.given_name },
                { "Name": "family_name", "Value": attributes.family_name },
            ],
        });
        let body = self.with_secret_hash(body, "SecretHash", username)?;
        let response: SignUpResponse = serde_json::from_value(self.call("SignUp", body).await?)
            .map_err(|e| IdentityError::InvalidResponse(e.to_string()))?;
        info!(
            "📝 Sign-up accepted (confirmed: {})",
            response.user_confirmed
        );
        Ok(SignUpResult {
            user_confirmed: response.user_confirmed,
        })
    }

    async fn confirm_sign_up(&self, username: &str, code: &str) -> Result<(), IdentityError> {
        let body = json!({
            "ClientId": self.client_id,
            "Username": username,
            "ConfirmationCode": code.trim(),
        });
        let body = self.with_secret_hash(body, "SecretHash", username)?;
        self.call("ConfirmSignUp", body).await?;
        Ok(())
    }

    async fn confirm_sign_in(&self, code: &str) -> Result<BackendSignIn, IdentityError> {
        let pending = self.current_pending().ok_or(IdentityError::NoSession)?;

        let mut responses = Map::new();
        responses.insert("USERNAME".into(), json!(pending.username));
        responses.insert(challenge_code_key(&pending.name).into(), json!(code.trim()));
        if let Some(hash) = self.secret_hash(&pending.username)? {
            responses.insert("SECRET_HASH".into(), json!(hash));
        }

        let response = self
            .call(
                "RespondToAuthChallenge",
                json!({
                    "ClientId": self.client_id,
                    "ChallengeName": pending.name,
                    "Session": pending.session,
                    "ChallengeResponses": responses,
                }),
            )
            .await?;
        self.handle_auth_response(&pending.username, response)
    }

    async fn resend_sign_up_code(&self, username: &str) -> Result<(), IdentityError> {
        let body = json!({ "ClientId": self.client_id, "Username": username });
        let body = self.with_secret_hash(body, "SecretHash", username)?;
        self.call("ResendConfirmationCode", body).await?;
        info!("📨 Confirmation code resent");
        Ok(())
    }

    async fn fetch_session(&self) -> Result<Option<FederatedSession>, IdentityError> {
        match self.current_tokens() {
            None => Ok(None),
            Some(session) if !session.is_expired() => Ok(Some(session)),
            Some(_) => self.refresh_session().await.map(Some),
        }
    }

    async fn refresh_session(&self) -> Result<FederatedSession, IdentityError> {
        let current = self.current_tokens().ok_or(IdentityError::NoSession)?;
        let refresh_token = current.refresh_token.clone().ok_or(IdentityError::NoSession)?;

        let mut auth_parameters = Map::new();
        auth_parameters.insert("REFRESH_TOKEN".into(), json!(refresh_token));
        if self.client_secret.is_some() {
            // SECRET_HASH for refresh is keyed on the user's sub
            let sub = decode_jwt_payload(&current.id_token)
                .ok()
                .and_then(|claims| claims.get("sub").and_then(Value::as_str).map(str::to_string))
                .ok_or_else(|| IdentityError::InvalidResponse("id token has no sub".into()))?;
            if let Some(hash) = self.secret_hash(&sub)? {
                auth_parameters.insert("SECRET_HASH".into(), json!(hash));
            }
        }

        let response = self
            .call(
                "InitiateAuth",
                json!({
                    "AuthFlow": "REFRESH_TOKEN_AUTH",
                    "ClientId": self.client_id,
                    "AuthParameters": auth_parameters,
                }),
            )
            .await?;
        let response: AuthResponse = serde_json::from_value(response)
            .map_err(|e| IdentityError::InvalidResponse(e.to_string()))?;
        let result = response
            .authentication_result
            .ok_or_else(|| IdentityError::InvalidResponse("refresh returned no tokens".into()))?;

        let session = Self::session_from_result(result, Some(refresh_token))?;
        self.set_tokens(Some(session.clone()));
        let _ = self.events.send(IdentityEvent::TokenRefreshed);
        info!("🔄 Federated session refreshed");
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        self.set_pending(None);
        let Some(session) = self.take_tokens() else {
            return Ok(());
        };
        let _ = self.events.send(IdentityEvent::SignedOut);

        let Some(refresh_token) = session.refresh_token else {
            return Ok(());
        };
        let mut body = json!({ "Token": refresh_token, "ClientId": self.client_id });
        if let Some(secret) = &self.client_secret {
            body["ClientSecret"] = json!(secret);
        }
        self.call("RevokeToken", body).await?;
        Ok(())
    }

    fn clear_local_session(&self) {
        self.set_pending(None);
        if self.take_tokens().is_some() {
            let _ = self.events.send(IdentityEvent::SignedOut);
        }
    }

    fn authorize_url(&self, force_account_chooser: bool) -> Result<String, IdentityError> {
        self.hosted_ui
            .as_ref()
            .ok_or(IdentityError::NotConfigured)?
            .authorize_url(force_account_chooser)
    }

    async fn complete_redirect(
        &self,
        code: &str,
        state: &str,
    ) -> Result<FederatedSession, IdentityError> {
        let hosted_ui = self.hosted_ui.as_ref().ok_or(IdentityError::NotConfigured)?;
        match hosted_ui.exchange_code(code, state).await {
            Ok(session) => {
                self.set_tokens(Some(session.clone()));
                let _ = self.events.send(IdentityEvent::SignedIn);
                Ok(session)
            }
            Err(e) => {
                warn!("Hosted-UI code exchange failed: {e}");
                let _ = self.events.send(IdentityEvent::RedirectFailed(e.to_string()));
                Err(e)
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.events.subscribe()
    }
}
