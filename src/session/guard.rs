//! Route guard
//!
//! Token presence is the whole check. It never waits on the reconciler;
//! whether the profile is right is a display concern.

use crate::navigation::Navigator;
use crate::session::token_store::TokenStore;
use log::debug;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    /// Leave for `to`, replacing the current history entry
    Redirect { to: String, replace: bool },
}

#[derive(Clone)]
pub struct RouteGuard {
    store: Arc<dyn TokenStore>,
    sign_in_path: String,
}

impl RouteGuard {
    #[must_use]
    pub fn new(store: Arc<dyn TokenStore>, sign_in_path: impl Into<String>) -> Self {
        Self {
            store,
            sign_in_path: sign_in_path.into(),
        }
    }

    #[must_use]
    pub fn check(&self) -> GuardDecision {
        if self.store.get_token().is_some() {
            GuardDecision::Allow
        } else {
            GuardDecision::Redirect {
                to: self.sign_in_path.clone(),
                replace: true,
            }
        }
    }

    /// Apply [`check`](Self::check); returns whether the route may render
    pub fn enforce(&self, navigator: &dyn Navigator) -> bool {
        match self.check() {
            GuardDecision::Allow => true,
            GuardDecision::Redirect { to, replace } => {
                debug!("No session token, redirecting to {to}");
                navigator.navigate(&to, replace);
                false
            }
        }
    }

    /// Render a protected route; `render` only runs when a token is present
    pub fn render<T>(&self, navigator: &dyn Navigator, render: impl FnOnce() -> T) -> Option<T> {
        self.enforce(navigator).then(render)
    }
}
