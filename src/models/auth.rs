//! Common authentication error types
//!
//! One error enum per layer: transport, backend REST API, federated identity
//! backend, and the user-facing auth flows that sit on top of them.

use thiserror::Error;

/// Message shown whenever the server cannot be reached at all
pub const CANNOT_REACH_SERVER: &str =
    "Cannot reach the server. Check your connection and try again.";

/// Message shown when the backend or identity provider rejects credentials
pub const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Failure to get any HTTP response back
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("request failed: {0}")]
    Request(String),
}

/// Errors returned by calls to the CareData backend
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// No response from the server
    #[error("Network error: {0}")]
    Network(String),
    /// A 401 could not be recovered; the local session has been torn down
    #[error("Session expired")]
    SessionExpired,
    /// Any other non-success status
    #[error("Request failed with status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::SessionExpired => Some(401),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        ApiError::Network(err.to_string())
    }
}

/// Errors reported by the federated identity backend
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Federated identity is not configured")]
    NotConfigured,
    #[error("Not authorized: {0}")]
    NotAuthorized(String),
    #[error("User is not confirmed")]
    UserNotConfirmed,
    #[error("An account with this email already exists")]
    UsernameExists,
    #[error("Invalid verification code")]
    CodeMismatch,
    #[error("Verification code has expired")]
    ExpiredCode,
    #[error("Too many requests")]
    RateLimited,
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("No federated session")]
    NoSession,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Identity service error {code}: {message}")]
    Service { code: String, message: String },
    #[error("Invalid identity service response: {0}")]
    InvalidResponse(String),
    #[error("Redirect sign-in failed: {0}")]
    Redirect(String),
}

impl From<TransportError> for IdentityError {
    fn from(err: TransportError) -> Self {
        IdentityError::Network(err.to_string())
    }
}

/// Errors surfaced to sign-in, sign-up and confirmation flows
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("An account with this email already exists")]
    UsernameExists,
    #[error("Invalid input: {0}")]
    InvalidParameter(String),
    #[error("Too many attempts")]
    RateLimited,
    #[error("No sign-in challenge is pending")]
    NoPendingChallenge,
    #[error("Federated identity is not configured")]
    NotConfigured,
    #[error("Invalid auth state transition: {0}")]
    InvalidStateTransition(String),
    #[error("Redirect sign-in failed: {0}")]
    Redirect(String),
    #[error("Authentication failed: {0}")]
    Backend(String),
}

impl AuthError {
    /// Message suitable for an inline form error
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials(_) => INVALID_CREDENTIALS.to_string(),
            AuthError::Network(_) => CANNOT_REACH_SERVER.to_string(),
            AuthError::UsernameExists => {
                "An account with this email already exists. Try signing in instead.".to_string()
            }
            AuthError::InvalidParameter(msg) => msg.clone(),
            AuthError::RateLimited => {
                "Too many attempts. Please wait a moment and try again.".to_string()
            }
            AuthError::NoPendingChallenge => {
                "There is no pending verification. Please sign in again.".to_string()
            }
            AuthError::NotConfigured => "This sign-in method is not available.".to_string(),
            AuthError::InvalidStateTransition(_) | AuthError::Backend(_) => {
                "Authentication failed. Please try again.".to_string()
            }
            AuthError::Redirect(_) => "Google sign-in failed. Please try again.".to_string(),
        }
    }

    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, AuthError::Network(_))
    }
}

impl From<IdentityError> for AuthError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::NotAuthorized(msg) => AuthError::InvalidCredentials(msg),
            IdentityError::Network(msg) => AuthError::Network(msg),
            IdentityError::UsernameExists => AuthError::UsernameExists,
            IdentityError::InvalidParameter(msg) => AuthError::InvalidParameter(msg),
            IdentityError::RateLimited => AuthError::RateLimited,
            IdentityError::NotConfigured => AuthError::NotConfigured,
            IdentityError::Redirect(msg) => AuthError::Redirect(msg),
            other => AuthError::Backend(other.to_string()),
        }
    }
}

impl From<ApiError> for AuthError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Network(msg) => AuthError::Network(msg),
            ApiError::Status { status: 401, detail } => AuthError::InvalidCredentials(detail),
            ApiError::SessionExpired => AuthError::InvalidCredentials("session expired".into()),
            ApiError::Status { status: 400 | 409 | 422, detail } => {
                AuthError::InvalidParameter(detail)
            }
            other => AuthError::Backend(other.to_string()),
        }
    }
}

/// Internal token store failures; never crosses the `TokenStore` surface
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored session is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("stored session could not be decrypted: {0}")]
    Crypto(String),
}

/// Settings loading failures
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings file: {0}")]
    Toml(#[from] basic_toml::Error),
}
