use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod auth;

/// Denormalized projection of the backend user record.
///
/// Display only. Never consult it for authorization decisions; a token being
/// present is what grants access.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct UserProfile {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
}

impl UserProfile {
    #[must_use]
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: None,
            sub: None,
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// "First Last", trimmed so an empty last name leaves no trailing space
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// The single record a token store persists.
///
/// Token and profile live in one record so that a write replaces both at once.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct StoredSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<UserProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remembered_identifier: Option<String>,
}

/// Which out-of-band confirmation the identity backend is waiting for
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeKind {
    ConfirmSignUp,
    ConfirmSignIn,
}

/// Why the last code submission did not resolve the challenge
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeError {
    InvalidCode,
    ExpiredCode,
    RateLimited,
    Network,
}

impl ChallengeError {
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            ChallengeError::InvalidCode => "Invalid verification code. Please try again.",
            ChallengeError::ExpiredCode => {
                "This code has expired. Request a new code and try again."
            }
            ChallengeError::RateLimited => "Too many attempts. Please wait before trying again.",
            ChallengeError::Network => {
                "Cannot reach the server. Check your connection and try again."
            }
        }
    }
}

/// In-progress multi-step federated flow, as seen by callers
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChallengeState {
    pub kind: ChallengeKind,
    /// Pending username / email the code was sent for
    pub identifier: String,
    pub error: Option<ChallengeError>,
}

impl ChallengeState {
    #[must_use]
    pub fn new(kind: ChallengeKind, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            error: None,
        }
    }

    #[must_use]
    pub fn with_error(mut self, error: ChallengeError) -> Self {
        self.error = Some(error);
        self
    }
}

/// Where a displayed profile came from, ordered by authority
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ProfileSource {
    /// Read back from the token store
    Cache,
    /// Decoded locally from an unverified token payload
    TokenClaims,
    /// Returned by the backend "whoami" call
    Backend,
}

/// A completed sign-in
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedSession {
    pub token: String,
    pub profile: Option<UserProfile>,
    pub profile_source: Option<ProfileSource>,
}

/// Result of one step of a sign-in / sign-up attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated(AuthenticatedSession),
    ChallengeRequired(ChallengeState),
    Cancelled,
}

impl AuthOutcome {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthOutcome::Authenticated(_))
    }

    #[must_use]
    pub fn challenge(&self) -> Option<&ChallengeState> {
        match self {
            AuthOutcome::ChallengeRequired(state) => Some(state),
            _ => None,
        }
    }
}

/// Reconciled "current user" view used for display
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum UserState {
    /// Nothing has been reconciled yet
    #[default]
    Unknown,
    SignedOut,
    SignedIn {
        profile: UserProfile,
        source: ProfileSource,
    },
}

impl UserState {
    #[must_use]
    pub fn profile(&self) -> Option<&UserProfile> {
        match self {
            UserState::SignedIn { profile, .. } => Some(profile),
            _ => None,
        }
    }

    #[must_use]
    pub fn source(&self) -> Option<ProfileSource> {
        match self {
            UserState::SignedIn { source, .. } => Some(*source),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        matches!(self, UserState::SignedIn { .. })
    }
}

/// Tokens held for a federated identity session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FederatedSession {
    pub id_token: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl FederatedSession {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Extra attributes sent with a federated sign-up
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignUpAttributes {
    pub given_name: String,
    pub family_name: String,
}
