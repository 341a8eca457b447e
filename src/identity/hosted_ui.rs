//! Cognito hosted-UI authorization code flow with PKCE
//!
//! The PKCE verifier travels inside the `state` parameter, AES-GCM encrypted
//! with a key only this client holds, so the callback can be completed without
//! any server-side or on-disk pending state.

use crate::api::transport::{ApiRequest, HttpTransport};
use crate::models::auth::IdentityError;
use crate::models::FederatedSession;
use crate::settings::CognitoSettings;
use crate::utils::crypto::{
    code_challenge_s256, decrypt_data, derive_encryption_key, encrypt_data, generate_code_verifier,
    generate_nonce, ENCRYPTION_KEY_SIZE,
};
use crate::utils::logging::LoggingHelper;
use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How long an authorization request stays redeemable
const STATE_MAX_AGE_SECS: i64 = 600;

/// Contents of the encrypted `state` parameter
#[derive(Serialize, Deserialize, Debug, Clone)]
struct HostedUiState {
    csrf: String,
    code_verifier: String,
    issued_at: i64,
}

#[derive(Deserialize, Debug)]
struct TokenResponse {
    id_token: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: String,
}

#[derive(Deserialize, Debug)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

pub struct HostedUiClient {
    base_url: String,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: String,
    logout_uri: String,
    scopes: Vec<String>,
    identity_provider: String,
    state_key: [u8; ENCRYPTION_KEY_SIZE],
    transport: Arc<dyn HttpTransport>,
}

impl HostedUiClient {
    /// Build from settings; `None` unless a hosted-UI domain and client id are set
    ///
    /// `state_secret` keys the state encryption. Without one a per-process
    /// random key is used, so callbacks must come back to the same process.
    #[must_use]
    pub fn from_settings(
        cognito: &CognitoSettings,
        state_secret: Option<&str>,
        transport: Arc<dyn HttpTransport>,
    ) -> Option<Self> {
        let base_url = cognito.hosted_ui_base()?;
        let client_id = cognito.client_id.clone()?;
        let state_key = match state_secret {
            Some(secret) => derive_encryption_key(format!("hosted-ui-state:{secret}").as_bytes()),
            None => derive_encryption_key(generate_nonce(ENCRYPTION_KEY_SIZE).as_bytes()),
        };

        Some(Self {
            base_url,
            client_id,
            client_secret: cognito.client_secret.clone(),
            redirect_uri: cognito.redirect_sign_in.clone(),
            logout_uri: cognito.redirect_sign_out.clone(),
            scopes: cognito.scopes.clone(),
            identity_provider: cognito.identity_provider.clone(),
            state_key,
            transport,
        })
    }

    /// Build the `/oauth2/authorize` URL for a fresh attempt
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be encrypted or the base URL is invalid
    pub fn authorize_url(&self, force_account_chooser: bool) -> Result<String, IdentityError> {
        let code_verifier = generate_code_verifier();
        let code_challenge = code_challenge_s256(&code_verifier);
        let state = HostedUiState {
            csrf: generate_nonce(24),
            code_verifier,
            issued_at: Utc::now().timestamp(),
        };
        let encrypted_state = encrypt_data(&state, &self.state_key)
            .map_err(|e| IdentityError::Redirect(format!("failed to encode state: {e}")))?;

        let scopes = self.scopes.join(" ");
        let mut url = url::Url::parse(&format!("{}/oauth2/authorize", self.base_url))
            .map_err(|e| IdentityError::Redirect(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("identity_provider", &self.identity_provider)
            .append_pair("scope", &scopes)
            .append_pair("state", &encrypted_state)
            .append_pair("code_challenge", &code_challenge)
            .append_pair("code_challenge_method", "S256");
        if force_account_chooser {
            url.query_pairs_mut().append_pair("prompt", "select_account");
        }

        LoggingHelper::log_authorize_url_built(
            &self.identity_provider,
            &scopes,
            force_account_chooser,
        );
        Ok(url.to_string())
    }

    /// Exchange an authorization code at `/oauth2/token`
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Redirect` if the state is forged or stale, or the
    /// token endpoint rejects the code; `Network` if it cannot be reached
    pub async fn exchange_code(
        &self,
        code: &str,
        state: &str,
    ) -> Result<FederatedSession, IdentityError> {
        let pending = self.open_state(state)?;

        let mut request = ApiRequest::post(format!("{}/oauth2/token", self.base_url)).form(vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("client_id".to_string(), self.client_id.clone()),
            ("code".to_string(), code.to_string()),
            ("redirect_uri".to_string(), self.redirect_uri.clone()),
            ("code_verifier".to_string(), pending.code_verifier),
        ]);
        if let Some(secret) = &self.client_secret {
            let basic = general_purpose::STANDARD.encode(format!("{}:{secret}", self.client_id));
            request.set_header("Authorization", format!("Basic {basic}"));
        }

        LoggingHelper::log_token_exchange_start(&self.identity_provider);
        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            let reason = response
                .json::<TokenErrorResponse>()
                .map(|e| match e.error_description {
                    Some(description) => format!("{}: {description}", e.error),
                    None => e.error,
                })
                .unwrap_or_else(|_| format!("token endpoint returned {}", response.status));
            return Err(IdentityError::Redirect(reason));
        }

        let tokens: TokenResponse = response
            .json()
            .map_err(|e| IdentityError::InvalidResponse(format!("token response: {e}")))?;
        LoggingHelper::log_token_exchange_summary(
            &self.identity_provider,
            tokens.refresh_token.is_some(),
            tokens.id_token.is_some(),
            &tokens.token_type,
        );

        let id_token = tokens
            .id_token
            .ok_or_else(|| {
                IdentityError::InvalidResponse("token response has no id_token".into())
            })?;
        Ok(FederatedSession {
            id_token,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: Utc::now() + Duration::seconds(tokens.expires_in.unwrap_or(3600)),
        })
    }

    /// Hosted-UI `/logout` URL that also ends the provider session
    #[must_use]
    pub fn logout_url(&self) -> String {
        format!(
            "{}/logout?client_id={}&logout_uri={}",
            self.base_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.logout_uri)
        )
    }

    fn open_state(&self, state: &str) -> Result<HostedUiState, IdentityError> {
        let pending: HostedUiState = decrypt_data(state, &self.state_key).map_err(|e| {
            log::debug!("Failed to decrypt hosted-UI state: {e}");
            IdentityError::Redirect("invalid state parameter".to_string())
        })?;

        let age = Utc::now().timestamp() - pending.issued_at;
        if !(0..=STATE_MAX_AGE_SECS).contains(&age) {
            return Err(IdentityError::Redirect("authorization request expired".to_string()));
        }
        Ok(pending)
    }
}
