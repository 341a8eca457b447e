//! Backend HTTP client with bearer-token injection and 401 recovery
//!
//! Every request reads the token store right before dispatch. A 401 on a request
//! that carried a token gets exactly one refresh-and-retry; if that is not
//! possible the session is torn down and the user is sent to sign-in.

use crate::api::transport::{ApiRequest, ApiResponse, HttpTransport};
use crate::models::auth::{ApiError, AuthError};
use crate::navigation::Navigator;
use crate::session::token_store::TokenStore;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;

/// Obtains a fresh session token after the backend rejected the current one
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if no fresh token can be obtained
    async fn refresh(&self) -> Result<String, AuthError>;
}

pub struct ApiClient {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn TokenStore>,
    navigator: Arc<dyn Navigator>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    sign_in_path: String,
}

impl ApiClient {
    #[must_use]
    pub fn new(
        base_url: &str,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
            store,
            navigator,
            refresher: None,
            sign_in_path: "/login".to_string(),
        }
    }

    /// Enable silent refresh; only set when federated identity is configured
    #[must_use]
    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    #[must_use]
    pub fn with_sign_in_path(mut self, path: impl Into<String>) -> Self {
        self.sign_in_path = path.into();
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a backend path
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// Send a request through the interceptor
    ///
    /// # Errors
    ///
    /// - `ApiError::Network` if the server cannot be reached
    /// - `ApiError::SessionExpired` if a 401 could not be recovered; the store
    ///   has been cleared and the navigator sent to the sign-in path
    /// - `ApiError::Status` for any other non-success status
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        request.url = self.url(&request.url);
        let token = self.store.get_token();
        let response = self.dispatch(request.clone(), token.as_deref()).await?;

        if response.status != 401 || token.is_none() {
            return check_status(response);
        }

        // Bounded: at most one refresh and one retry per request
        if let Some(refresher) = &self.refresher {
            match refresher.refresh().await {
                Ok(fresh) => {
                    // Signed out or replaced while refreshing
                    if self.store.get_token() != token {
                        debug!("Session changed during refresh, not retrying {}", request.url);
                        return Err(ApiError::SessionExpired);
                    }
                    info!("🔄 Token refreshed after 401, retrying {}", request.url);
                    self.store.update_token(&fresh);
                    let retried = self.dispatch(request, Some(&fresh)).await?;
                    if retried.status != 401 {
                        return check_status(retried);
                    }
                    warn!("Retried request still unauthorized");
                }
                Err(e) => warn!("Token refresh failed: {e}"),
            }
        }

        self.expire_session();
        Err(ApiError::SessionExpired)
    }

    /// Send and decode a JSON body
    ///
    /// # Errors
    ///
    /// Same as [`ApiClient::send`], plus `ApiError::Decode` for a malformed body
    pub async fn send_json(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let response = self.send(request).await?;
        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        response.json().map_err(ApiError::Decode)
    }

    async fn dispatch(
        &self,
        mut request: ApiRequest,
        token: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        if let Some(token) = token {
            request.set_header("Authorization", format!("Bearer {token}"));
        }
        Ok(self.transport.execute(request).await?)
    }

    fn expire_session(&self) {
        info!("🚪 Session expired, signing out locally");
        self.store.clear();
        self.navigator.navigate(&self.sign_in_path, true);
    }
}

/// Map a non-success response to `ApiError::Status`
///
/// # Errors
///
/// Returns `ApiError::Status` when the status is not 2xx
pub fn check_status(response: ApiResponse) -> Result<ApiResponse, ApiError> {
    if response.is_success() {
        Ok(response)
    } else {
        let detail = error_detail(&response.body);
        debug!("Backend returned {}: {detail}", response.status);
        Err(ApiError::Status {
            status: response.status,
            detail,
        })
    }
}

/// Human-readable error text from a FastAPI `{"detail": ...}` body
#[must_use]
pub fn error_detail(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().chars().take(200).collect();
    };
    match value.get("detail") {
        Some(Value::String(detail)) => detail.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("msg").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("; "),
        Some(other) => other.to_string(),
        None => value.to_string(),
    }
}
