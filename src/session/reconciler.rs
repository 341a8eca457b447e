//! Session Reconciler
//!
//! Converges the cached profile, the stored token and the federated session
//! into one [`UserState`], published on a `watch` channel.
//!
//! A pass ([`SessionReconciler::reconcile_once`]):
//! 1. A cached profile is published straight away, then refined by "whoami".
//!    A failing whoami never clears it.
//! 2. A token without a cached profile is resolved with whoami; failure clears
//!    the token and the user is signed out.
//! 3. With federated identity and still no profile, the identity session token
//!    is resolved the same way, falling back to its claims.
//!
//! [`SessionReconciler::mount`] runs passes in a background task for as long as
//! the returned [`ReconcileHandle`] lives.

use crate::api::backend::ProfileFetcher;
use crate::identity::{IdentityEvent, IdentityProviderAdapter};
use crate::models::{ProfileSource, UserProfile, UserState};
use crate::navigation::Location;
use crate::session::token_store::{StoreEvent, TokenStore};
use crate::settings::SessionSettings;
use crate::utils::logging::LoggingHelper;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

/// Timing of the OAuth-callback watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackWatch {
    /// Extra passes after mount, each measured from mount time
    pub recheck_delays: Vec<Duration>,
    pub window: Duration,
    pub poll_interval: Duration,
}

impl Default for CallbackWatch {
    fn default() -> Self {
        Self::from_settings(&SessionSettings::default())
    }
}

impl CallbackWatch {
    #[must_use]
    pub fn from_settings(session: &SessionSettings) -> Self {
        Self {
            recheck_delays: session.callback_recheck_delays(),
            window: session.callback_watch_window(),
            poll_interval: session.callback_poll_interval(),
        }
    }
}

pub struct SessionReconciler {
    store: Arc<dyn TokenStore>,
    profiles: Arc<dyn ProfileFetcher>,
    identity: Option<Arc<IdentityProviderAdapter>>,
    callback_watch: CallbackWatch,
    state: watch::Sender<UserState>,
}

impl SessionReconciler {
    #[must_use]
    pub fn new(
        store: Arc<dyn TokenStore>,
        profiles: Arc<dyn ProfileFetcher>,
        identity: Option<Arc<IdentityProviderAdapter>>,
        callback_watch: CallbackWatch,
    ) -> Self {
        let (state, _) = watch::channel(UserState::Unknown);
        Self {
            store,
            profiles,
            identity,
            callback_watch,
            state,
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<UserState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn current(&self) -> UserState {
        self.state.borrow().clone()
    }

    /// Offer a candidate display state
    ///
    /// A signed-in candidate from a less authoritative source than the one on
    /// display is dropped unless it carries a different profile.
    fn publish(&self, candidate: UserState) {
        self.state.send_if_modified(|current| {
            if let (
                UserState::SignedIn { profile: shown, source: shown_source },
                UserState::SignedIn { profile, source },
            ) = (&*current, &candidate)
            {
                if source < shown_source && profile == shown {
                    return false;
                }
            }
            if *current == candidate {
                return false;
            }
            *current = candidate.clone();
            true
        });
    }

    fn signed_in(profile: UserProfile, source: ProfileSource) -> UserState {
        UserState::SignedIn { profile, source }
    }

    /// Run steps 1-3 once and return the resulting display state
    pub async fn reconcile_once(&self) -> UserState {
        let token = self.store.get_token();

        // 1. cache first, then refine
        if let Some(cached) = self.store.get_cached_profile() {
            self.publish(Self::signed_in(cached, ProfileSource::Cache));
            if let Some(token) = token {
                match self.profiles.fetch_profile(&token).await {
                    Ok(profile) => self.accept_backend_profile(&token, profile),
                    Err(e) => debug!("whoami failed, keeping cached profile: {e}"),
                }
            }
            return self.finish_pass();
        }

        // 2. token without a cached profile
        if let Some(token) = token {
            match self.profiles.fetch_profile(&token).await {
                Ok(profile) => {
                    self.accept_backend_profile(&token, profile);
                    return self.finish_pass();
                }
                Err(e) => {
                    warn!("whoami failed for stored token, signing out: {e}");
                    // Another flow may have stored a new session meanwhile
                    if self.store.get_token().as_deref() == Some(token.as_str()) {
                        self.store.clear();
                    }
                }
            }
        }

        // 3. federated session
        if let Some(identity) = &self.identity {
            if let Some(token) = identity.session_token().await {
                match self.profiles.fetch_profile(&token).await {
                    Ok(profile) => {
                        self.store.set_session(&token, Some(profile.clone()));
                        self.publish(Self::signed_in(profile, ProfileSource::Backend));
                    }
                    Err(e) => {
                        debug!("whoami failed for federated token, decoding claims: {e}");
                        if let Some(profile) = IdentityProviderAdapter::profile_from_token(&token) {
                            self.store.set_session(&token, Some(profile.clone()));
                            self.publish(Self::signed_in(profile, ProfileSource::TokenClaims));
                        } else {
                            warn!("Federated token carries no usable claims");
                            self.publish(UserState::SignedOut);
                        }
                    }
                }
                return self.finish_pass();
            }
        }

        if self.store.get_token().is_none() {
            self.publish(UserState::SignedOut);
        }
        self.finish_pass()
    }

    fn accept_backend_profile(&self, token: &str, profile: UserProfile) {
        // Only cache against the token the profile was fetched for
        if self.store.get_token().as_deref() != Some(token) {
            debug!("Token changed during whoami, dropping result");
            return;
        }
        self.store.set_session(token, Some(profile.clone()));
        self.publish(Self::signed_in(profile, ProfileSource::Backend));
    }

    fn finish_pass(&self) -> UserState {
        let state = self.current();
        LoggingHelper::log_reconcile_pass(&state);
        state
    }

    /// Start reconciling for `location` until the handle is dropped
    #[must_use]
    pub fn mount(self: &Arc<Self>, location: Location) -> ReconcileHandle {
        let state = self.subscribe();
        let reconciler = Arc::clone(self);
        let task = tokio::spawn(async move { reconciler.run(location).await });
        ReconcileHandle { task, state }
    }

    async fn run(self: Arc<Self>, location: Location) {
        let mounted_at = Instant::now();
        let mut store_events = Some(self.store.subscribe());
        let mut identity_events = self.identity.as_ref().map(|identity| identity.subscribe());

        self.reconcile_once().await;
        let mut last_token = self.store.get_token();

        let mut watching = false;
        if let (true, Some(identity)) = (location.is_oauth_callback(), &self.identity) {
            info!("🔁 OAuth callback detected, completing redirect");
            watching = true;
            match identity.complete_federated_redirect(&location.to_string()).await {
                Ok(_) => debug!("Redirect completed"),
                Err(e) => warn!("Redirect completion failed: {e}"),
            }
            self.reconcile_once().await;
            last_token = self.store.get_token();
        }

        let deadline = mounted_at + self.callback_watch.window;
        let mut rechecks = self
            .callback_watch
            .recheck_delays
            .iter()
            .map(|delay| mounted_at + *delay)
            .collect::<Vec<_>>()
            .into_iter();
        let mut next_recheck = rechecks.next();
        let poll_every = self.callback_watch.poll_interval.max(Duration::from_millis(1));
        let mut poll = tokio::time::interval_at(mounted_at + poll_every, poll_every);

        loop {
            if watching && (self.current().is_signed_in() || Instant::now() >= deadline) {
                debug!("Callback watch finished");
                watching = false;
            }

            tokio::select! {
                event = recv_store(&mut store_events) => {
                    debug!("Store changed: {event:?}");
                    let token = self.store.get_token();
                    if token == last_token {
                        continue;
                    }
                    self.reconcile_once().await;
                    last_token = self.store.get_token();
                }
                () = sleep_until(next_recheck.unwrap_or(deadline)),
                    if watching && next_recheck.is_some() =>
                {
                    next_recheck = rechecks.next();
                    self.reconcile_once().await;
                    last_token = self.store.get_token();
                }
                _ = poll.tick(), if watching => {
                    self.reconcile_once().await;
                    last_token = self.store.get_token();
                }
                event = recv_identity(&mut identity_events), if watching => {
                    debug!("Identity event during callback watch: {event:?}");
                    self.reconcile_once().await;
                    last_token = self.store.get_token();
                }
                () = sleep_until(deadline), if watching => {
                    info!("Callback watch window closed");
                }
            }
        }
    }
}

/// Next store event; a closed channel parks forever instead of spinning
async fn recv_store(rx: &mut Option<broadcast::Receiver<StoreEvent>>) -> Option<StoreEvent> {
    let Some(receiver) = rx else {
        return std::future::pending().await;
    };
    match receiver.recv().await {
        Ok(event) => Some(event),
        Err(broadcast::error::RecvError::Lagged(_)) => None,
        Err(broadcast::error::RecvError::Closed) => {
            *rx = None;
            std::future::pending().await
        }
    }
}

async fn recv_identity(
    rx: &mut Option<broadcast::Receiver<IdentityEvent>>,
) -> Option<IdentityEvent> {
    let Some(receiver) = rx else {
        return std::future::pending().await;
    };
    match receiver.recv().await {
        Ok(event) => Some(event),
        Err(broadcast::error::RecvError::Lagged(_)) => None,
        Err(broadcast::error::RecvError::Closed) => {
            *rx = None;
            std::future::pending().await
        }
    }
}

/// A mounted reconciliation task; dropping it cancels every pending re-check
#[derive(Debug)]
pub struct ReconcileHandle {
    task: JoinHandle<()>,
    state: watch::Receiver<UserState>,
}

impl ReconcileHandle {
    #[must_use]
    pub fn state(&self) -> watch::Receiver<UserState> {
        self.state.clone()
    }

    #[must_use]
    pub fn current(&self) -> UserState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Unmount explicitly; same as dropping the handle
    pub fn cancel(self) {}
}

impl Drop for ReconcileHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
