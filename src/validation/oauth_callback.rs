//! Hosted-UI callback errors
//!
//! When the identity service sends the browser back with `error` and
//! `error_description` query parameters, [`OAuthErrorBanner`] classifies them
//! into a dismissible diagnostic. Dismissing strips the query so the banner
//! does not come back on the next render.

use crate::navigation::{Location, Navigator};
use log::error;

/// Known misconfiguration categories, most specific first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerKind {
    /// App client does not allow the requested scopes
    InvalidScope,
    /// Provider attribute mapping for `email` is broken or not writable
    EmailAttribute,
    /// Redirect URI not registered with the provider
    RedirectUriMismatch,
    Generic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthErrorBanner {
    pub kind: BannerKind,
    pub error: String,
    pub description: String,
}

impl OAuthErrorBanner {
    /// Classify the error parameters of a location; `None` when nothing should show
    #[must_use]
    pub fn from_location(location: &Location) -> Option<Self> {
        let error = location.query_param("error")?;
        let description = location.query_param("error_description").unwrap_or_default();
        let desc_lower = description.to_lowercase();

        let is_redirect_error =
            matches!(error.as_str(), "400" | "invalid_request" | "access_denied");
        let is_invalid_scope = error == "invalid_request" && desc_lower.contains("invalid_scope");
        let is_email_attribute = !description.is_empty()
            && (desc_lower.contains("user.email") || desc_lower.contains("attribute cannot"));
        let is_redirect_uri = desc_lower.contains("redirect_uri")
            || desc_lower.contains("redirect uri")
            || desc_lower.contains("invalid redirect");

        let show = is_invalid_scope
            || is_email_attribute
            || is_redirect_uri
            || (is_redirect_error && !description.is_empty());
        if !show {
            return None;
        }

        let kind = if is_email_attribute {
            BannerKind::EmailAttribute
        } else if is_redirect_uri {
            BannerKind::RedirectUriMismatch
        } else if is_invalid_scope {
            BannerKind::InvalidScope
        } else {
            BannerKind::Generic
        };

        error!(
            "Hosted-UI sign-in error: {error} {}",
            if description.is_empty() { "(no description)" } else { &description }
        );
        Some(Self {
            kind,
            error,
            description,
        })
    }

    #[must_use]
    pub fn title(&self) -> &'static str {
        match self.kind {
            BannerKind::InvalidScope => "Google sign-in failed: invalid scope",
            BannerKind::EmailAttribute => "Google sign-in failed: email attribute",
            BannerKind::RedirectUriMismatch => "Google sign-in failed: redirect URI mismatch",
            BannerKind::Generic => "Google sign-in failed",
        }
    }

    #[must_use]
    pub fn help(&self) -> &str {
        match self.kind {
            BannerKind::InvalidScope => {
                "In Cognito, open the app client's hosted UI settings and allow the openid, email and profile scopes, then try again."
            }
            BannerKind::EmailAttribute => {
                "In Cognito: (1) Federated identity provider → Google → Attribute mapping: map Google \"email\" to user pool \"email\". (2) If it still fails, the pool may have \"email\" as read-only; federated sign-in needs email to be writable."
            }
            BannerKind::RedirectUriMismatch => {
                "In Google Cloud Console, add your Cognito domain + /oauth2/idpresponse as an authorized redirect URI for the OAuth client, save, wait a minute and try again."
            }
            BannerKind::Generic if !self.description.is_empty() => &self.description,
            BannerKind::Generic => "Check the Cognito and Google Cloud Console configuration.",
        }
    }

    /// Raw provider description, shown under the help text when present
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        (!self.description.is_empty()).then_some(self.description.as_str())
    }

    /// Drop the error query from the current location
    pub fn dismiss(&self, navigator: &dyn Navigator) {
        let location = navigator.current_location();
        navigator.navigate(&location.path_only().to_string(), true);
    }
}
