//! Service factory for wiring the session core
//!
//! Builds every collaborator from [`CareDataSettings`] in dependency order:
//! store → profile client → identity adapter → API client → reconciler.
//! Federated identity is wired only when Cognito is enabled; the rest of the
//! graph does not change shape.

use crate::api::backend::{BackendApi, ProfileClient, ProfileFetcher};
use crate::api::client::ApiClient;
use crate::api::transport::{HttpTransport, ReqwestTransport};
use crate::flows::{ConfirmationFlow, LoginFlow, RegisterFlow};
use crate::identity::{CognitoIdentityBackend, IdentityBackend, IdentityProviderAdapter};
use crate::models::auth::{IdentityError, TransportError};
use crate::navigation::Navigator;
use crate::session::file_store::FileTokenStore;
use crate::session::guard::RouteGuard;
use crate::session::reconciler::{CallbackWatch, SessionReconciler};
use crate::session::token_store::TokenStore;
use crate::settings::CareDataSettings;
use crate::utils::logging::LoggingHelper;
use crate::validation::OAuthErrorBanner;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("HTTP transport could not be built: {0}")]
    Transport(#[from] TransportError),
    #[error("identity backend could not be built: {0}")]
    Identity(#[from] IdentityError),
}

/// Everything a front end needs, already wired together
#[derive(Clone)]
pub struct SessionServices {
    pub settings: CareDataSettings,
    pub store: Arc<dyn TokenStore>,
    pub navigator: Arc<dyn Navigator>,
    pub api: BackendApi,
    pub profiles: Arc<dyn ProfileFetcher>,
    /// `None` when federated identity is disabled
    pub identity: Option<Arc<IdentityProviderAdapter>>,
    pub reconciler: Arc<SessionReconciler>,
    pub guard: RouteGuard,
}

impl SessionServices {
    #[must_use]
    pub fn login_flow(&self) -> LoginFlow {
        LoginFlow::new(
            self.store.clone(),
            self.api.clone(),
            self.profiles.clone(),
            self.identity.clone(),
            &self.settings.session.post_login_redirect,
        )
    }

    #[must_use]
    pub fn register_flow(&self) -> RegisterFlow {
        RegisterFlow::new(
            self.api.clone(),
            self.identity.clone(),
            &self.settings.session.sign_in_path,
            &self.settings.session.post_login_redirect,
        )
    }

    /// Only available with federated identity; the backend has no codes
    #[must_use]
    pub fn confirmation_flow(&self) -> Option<ConfirmationFlow> {
        self.identity.as_ref().map(|identity| {
            ConfirmationFlow::new(
                identity.clone(),
                &self.settings.session.sign_in_path,
                &self.settings.session.post_login_redirect,
            )
        })
    }

    /// Error banner for the current location, if the hosted UI sent one back
    #[must_use]
    pub fn oauth_error_banner(&self) -> Option<OAuthErrorBanner> {
        OAuthErrorBanner::from_location(&self.navigator.current_location())
    }

    /// Sign out and land on the sign-in screen; safe to repeat
    pub async fn sign_out(&self) {
        match &self.identity {
            Some(identity) => identity.sign_out().await,
            None => {
                self.store.clear();
                log::info!("👋 Signed out");
            }
        }
        self.navigator.navigate(&self.settings.session.sign_in_path, true);
    }
}

/// Factory for creating session services with dependency injection
pub struct AuthenticationServiceFactory;

impl AuthenticationServiceFactory {
    /// Production wiring: file-backed store and reqwest transport
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client or the identity backend cannot be built
    pub fn create_default(
        settings: &CareDataSettings,
        navigator: Arc<dyn Navigator>,
    ) -> Result<SessionServices, FactoryError> {
        let store: Arc<dyn TokenStore> = Arc::new(FileTokenStore::new(
            &settings.session.store_path,
            settings.session.store_key.as_deref(),
        ));
        let transport: Arc<dyn HttpTransport> =
            Arc::new(ReqwestTransport::new(Duration::from_secs(settings.api.timeout_secs))?);
        Self::create_session_services(settings, store, navigator, transport)
    }

    /// Wire the services over the given store, navigator and transport
    ///
    /// # Errors
    ///
    /// Returns an error if Cognito is enabled but cannot be configured
    pub fn create_session_services(
        settings: &CareDataSettings,
        store: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<SessionServices, FactoryError> {
        log::info!("🏭 Starting session service factory...");

        let identity_backend: Option<Arc<dyn IdentityBackend>> = if settings.is_cognito_enabled() {
            let backend = CognitoIdentityBackend::from_settings(
                &settings.cognito,
                settings.session.store_key.as_deref(),
                transport.clone(),
            )?;
            Some(Arc::new(backend))
        } else {
            None
        };
        LoggingHelper::log_provider_init("Cognito", identity_backend.is_some());
        LoggingHelper::log_provider_init("Google hosted UI", settings.is_cognito_google_enabled());

        Ok(Self::assemble(settings, store, navigator, transport, identity_backend))
    }

    /// Final wiring step; takes any identity backend
    #[must_use]
    pub fn assemble(
        settings: &CareDataSettings,
        store: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
        transport: Arc<dyn HttpTransport>,
        identity_backend: Option<Arc<dyn IdentityBackend>>,
    ) -> SessionServices {
        let profiles: Arc<dyn ProfileFetcher> =
            Arc::new(ProfileClient::new(&settings.api.base_url, transport.clone()));

        let identity = identity_backend.map(|backend| {
            Arc::new(IdentityProviderAdapter::new(
                backend,
                store.clone(),
                profiles.clone(),
                settings.session.resend_cooldown(),
                settings.session.sign_out_timeout(),
            ))
        });

        let mut client = ApiClient::new(
            &settings.api.base_url,
            transport,
            store.clone(),
            navigator.clone(),
        )
        .with_sign_in_path(&settings.session.sign_in_path);
        if let Some(identity) = &identity {
            client = client.with_refresher(identity.clone());
        }
        LoggingHelper::log_api_target(
            client.base_url(),
            Duration::from_secs(settings.api.timeout_secs),
        );

        let reconciler = Arc::new(SessionReconciler::new(
            store.clone(),
            profiles.clone(),
            identity.clone(),
            CallbackWatch::from_settings(&settings.session),
        ));
        let guard = RouteGuard::new(store.clone(), &settings.session.sign_in_path);

        log::info!("🏭 Session service factory completed successfully");
        SessionServices {
            settings: settings.clone(),
            store,
            navigator,
            api: BackendApi::new(Arc::new(client)),
            profiles,
            identity,
            reconciler,
            guard,
        }
    }
}
