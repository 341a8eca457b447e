// Centralized logging utilities for the session and identity layers
use crate::models::auth::IdentityError;
use crate::models::UserState;
use log::{debug, info, warn};
use std::time::Duration;

pub struct LoggingHelper;

impl LoggingHelper {
    /// Log which sign-in providers the composition root wired up
    pub fn log_provider_init(provider_name: &str, configured: bool) {
        if configured {
            info!("✅ {provider_name} sign-in configured");
        } else {
            info!("❌ {provider_name} sign-in not configured - missing settings");
        }
    }

    /// Log the backend base URL in use
    pub fn log_api_target(base_url: &str, timeout: Duration) {
        info!("🔧 API client targeting {base_url} (timeout {}s)", timeout.as_secs());
    }

    /// Log hosted-UI authorize URL building
    pub fn log_authorize_url_built(provider: &str, scopes: &str, force_account_chooser: bool) {
        info!(
            "🔍 Built {provider} authorize URL with scopes: {scopes} (account chooser: {force_account_chooser})"
        );
    }

    /// Log token exchange start
    pub fn log_token_exchange_start(provider: &str) {
        info!("🔄 Exchanging authorization code for tokens with {provider}");
    }

    /// Log token exchange summary
    pub fn log_token_exchange_summary(
        provider: &str,
        has_refresh_token: bool,
        has_id_token: bool,
        token_type: &str,
    ) {
        info!(
            "🔍 Token exchange summary for {provider}: refresh_token={}, id_token={}, token_type={token_type}",
            if has_refresh_token { "present" } else { "missing" },
            if has_id_token { "present" } else { "missing" },
        );
    }

    /// Log the state a reconciliation pass settled on
    pub fn log_reconcile_pass(state: &UserState) {
        match state {
            UserState::SignedIn { profile, source } => {
                debug!("Session reconciled: signed in as {} ({source:?})", profile.display_name());
            }
            UserState::SignedOut => debug!("Session reconciled: signed out"),
            UserState::Unknown => debug!("Session reconciled: unknown"),
        }
    }

    /// Log how the remote sign-out race ended
    pub fn log_sign_out_race(
        outcome: &Result<Result<(), IdentityError>, tokio::time::error::Elapsed>,
        timeout: Duration,
    ) {
        match outcome {
            Ok(Ok(())) => info!("👋 Signed out"),
            Ok(Err(e)) => warn!("Signed out locally; remote sign-out failed: {e}"),
            Err(_) => warn!(
                "Signed out locally; remote sign-out still pending after {}ms",
                timeout.as_millis()
            ),
        }
    }

    /// Log a session being persisted
    pub fn log_session_stored(user: Option<&str>, origin: &str) {
        match user {
            Some(name) => info!("Stored session for {name} (via {origin})"),
            None => info!("Stored session without profile (via {origin})"),
        }
    }
}
