//! Test fixtures providing pre-built test objects
//!
//! Tokens built here are unsigned JWTs: good enough for claim decoding, which
//! is all the session core ever does with them.

use crate::models::{FederatedSession, StoredSession, UserProfile};
use crate::settings::CareDataSettings;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use super::constants::{TEST_API_BASE, TEST_EMAIL, TEST_FIRST_NAME};

/// Central fixture provider for all test data
pub struct TestFixtures;

impl TestFixtures {
    /// Backend-only settings pointing at [`TEST_API_BASE`]
    #[must_use]
    pub fn settings() -> CareDataSettings {
        let mut settings = CareDataSettings::default();
        settings.api.base_url = TEST_API_BASE.to_string();
        settings.session.store_path = "target/test-session.json".to_string();
        settings
    }

    /// Settings with Cognito and the Google hosted UI switched on
    #[must_use]
    pub fn cognito_settings() -> CareDataSettings {
        let mut settings = Self::settings();
        settings.cognito.enabled = true;
        settings.cognito.user_pool_id = Some("ap-southeast-2_TestPool".to_string());
        settings.cognito.client_id = Some("test-client-id".to_string());
        settings.cognito.domain =
            Some("caredata-test.auth.ap-southeast-2.amazoncognito.com".to_string());
        settings
    }

    /// The profile the backend returns for [`TEST_EMAIL`]
    #[must_use]
    pub fn profile() -> UserProfile {
        UserProfile::new(TEST_FIRST_NAME, "").with_email(TEST_EMAIL)
    }

    /// `/auth/me` body for [`TestFixtures::profile`], with the extra keys the backend sends
    #[must_use]
    pub fn me_body() -> Value {
        json!({
            "id": "7f0c1a8e",
            "first_name": TEST_FIRST_NAME,
            "last_name": "",
            "email": TEST_EMAIL,
            "role": "user",
        })
    }

    /// Unsigned JWT carrying `claims`
    #[must_use]
    pub fn jwt(claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.signature")
    }

    /// Cognito-style id token for a user, valid for an hour
    #[must_use]
    pub fn id_token(email: &str, given_name: &str, family_name: &str) -> String {
        Self::jwt(&json!({
            "sub": format!("sub-{email}"),
            "email": email,
            "given_name": given_name,
            "family_name": family_name,
            "token_use": "id",
            "exp": (Utc::now() + Duration::hours(1)).timestamp(),
        }))
    }

    #[must_use]
    pub fn federated_session(id_token: &str) -> FederatedSession {
        FederatedSession {
            id_token: id_token.to_string(),
            access_token: Some(format!("access-{}", id_token.len())),
            refresh_token: Some("refresh-token".to_string()),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    /// A stored record with both token and cached profile
    #[must_use]
    pub fn stored_session(token: &str) -> StoredSession {
        StoredSession {
            token: Some(token.to_string()),
            profile: Some(Self::profile()),
            remembered_identifier: None,
        }
    }
}
