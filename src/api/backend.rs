//! Typed calls to the CareData REST backend

use crate::api::client::{check_status, ApiClient};
use crate::api::transport::{ApiRequest, HttpTransport};
use crate::models::auth::ApiError;
use crate::models::UserProfile;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LoginResponse {
    access_token: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct GoogleLoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

/// Backend endpoints, all routed through the intercepting [`ApiClient`]
#[derive(Clone)]
pub struct BackendApi {
    client: Arc<ApiClient>,
}

impl BackendApi {
    #[must_use]
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    #[must_use]
    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    /// `POST /auth/register`
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Status` (e.g. 400/409) when the backend rejects the account
    pub async fn register(&self, request: &RegisterRequest) -> Result<Value, ApiError> {
        let body = serde_json::to_value(request).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.client
            .send_json(ApiRequest::post("/auth/register").json(body))
            .await
    }

    /// `POST /auth/login`, returning the access token
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Status { status: 401, .. }` for wrong credentials
    pub async fn login(&self, email: &str, password: &str) -> Result<String, ApiError> {
        let response = self
            .client
            .send(ApiRequest::post("/auth/login").json(json!({
                "email": email,
                "password": password,
            })))
            .await?;
        let body: LoginResponse = response.json().map_err(ApiError::Decode)?;
        Ok(body.access_token)
    }

    /// `GET /auth/me` with the stored token
    ///
    /// # Errors
    ///
    /// Returns `ApiError::SessionExpired` if the token is rejected and cannot be refreshed
    pub async fn me(&self) -> Result<UserProfile, ApiError> {
        let response = self.client.send(ApiRequest::get("/auth/me")).await?;
        response.json().map_err(ApiError::Decode)
    }

    /// `POST /auth/google` with a Google ID token credential
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Status` when the backend rejects the credential
    pub async fn google_login(&self, credential: &str) -> Result<GoogleLoginResponse, ApiError> {
        let response = self
            .client
            .send(ApiRequest::post("/auth/google").json(json!({ "credential": credential })))
            .await?;
        response.json().map_err(ApiError::Decode)
    }

    /// `GET /mydata`; the body is opaque to this crate
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the session has expired
    pub async fn get_my_data(&self) -> Result<Value, ApiError> {
        self.client.send_json(ApiRequest::get("/mydata")).await
    }

    /// `PUT /mydata`; the body is opaque to this crate
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the session has expired
    pub async fn put_my_data(&self, data: Value) -> Result<Value, ApiError> {
        self.client
            .send_json(ApiRequest::put("/mydata").json(data))
            .await
    }
}

/// "whoami" with an explicit token
#[async_trait]
pub trait ProfileFetcher: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached or rejects the token
    async fn fetch_profile(&self, token: &str) -> Result<UserProfile, ApiError>;
}

/// `GET /auth/me` outside the interceptor: no store read, no 401 recovery
#[derive(Clone)]
pub struct ProfileClient {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
}

impl ProfileClient {
    #[must_use]
    pub fn new(base_url: &str, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
        }
    }
}

#[async_trait]
impl ProfileFetcher for ProfileClient {
    async fn fetch_profile(&self, token: &str) -> Result<UserProfile, ApiError> {
        let request = ApiRequest::get(format!("{}/auth/me", self.base_url))
            .header("Authorization", format!("Bearer {token}"));
        let response = check_status(self.transport.execute(request).await?)?;
        response.json().map_err(ApiError::Decode)
    }
}
