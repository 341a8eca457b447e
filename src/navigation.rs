//! Navigation abstraction
//!
//! Front ends plug their router in through [`Navigator`]. [`MemoryNavigator`]
//! keeps an in-process history and is what the CLI and the tests use.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Current route: path plus raw query string (without the leading `?`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub path: String,
    pub query: String,
}

impl Location {
    /// Parse `"/path?query"`, or a full URL, into a location
    #[must_use]
    pub fn parse(target: &str) -> Self {
        let without_fragment = target.split('#').next().unwrap_or_default();
        let path_and_query = match url::Url::parse(without_fragment) {
            Ok(url) => match url.query() {
                Some(q) => format!("{}?{q}", url.path()),
                None => url.path().to_string(),
            },
            Err(_) => without_fragment.to_string(),
        };

        match path_and_query.split_once('?') {
            Some((path, query)) => Self {
                path: normalize_path(path),
                query: query.to_string(),
            },
            None => Self {
                path: normalize_path(&path_and_query),
                query: String::new(),
            },
        }
    }

    #[must_use]
    pub fn path_only(&self) -> Self {
        Self {
            path: self.path.clone(),
            query: String::new(),
        }
    }

    /// Decoded query parameters; later duplicates win
    #[must_use]
    pub fn query_params(&self) -> HashMap<String, String> {
        url::form_urlencoded::parse(self.query.as_bytes())
            .into_owned()
            .collect()
    }

    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<String> {
        url::form_urlencoded::parse(self.query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// An authorization-code redirect is being processed
    #[must_use]
    pub fn is_oauth_callback(&self) -> bool {
        self.query_param("code").is_some()
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.query.is_empty() {
            write!(f, "{}", self.path)
        } else {
            write!(f, "{}?{}", self.path, self.query)
        }
    }
}

fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Router seam used by the HTTP client, guard and flows
pub trait Navigator: Send + Sync {
    fn current_location(&self) -> Location;

    /// In-app navigation; `replace` overwrites the current history entry
    fn navigate(&self, target: &str, replace: bool);

    /// Full-page redirect away from the application
    fn redirect_external(&self, url: &str);
}

#[derive(Debug, Default)]
struct History {
    entries: Vec<Location>,
    external: Vec<String>,
}

/// In-memory history stack
#[derive(Debug)]
pub struct MemoryNavigator {
    history: Mutex<History>,
}

impl Default for MemoryNavigator {
    fn default() -> Self {
        Self::new("/")
    }
}

impl MemoryNavigator {
    #[must_use]
    pub fn new(initial: &str) -> Self {
        Self {
            history: Mutex::new(History {
                entries: vec![Location::parse(initial)],
                external: Vec::new(),
            }),
        }
    }

    /// All in-app entries, oldest first
    #[must_use]
    pub fn entries(&self) -> Vec<Location> {
        self.with_history(|h| h.entries.clone())
    }

    /// External URLs redirected to, oldest first
    #[must_use]
    pub fn external_redirects(&self) -> Vec<String> {
        self.with_history(|h| h.external.clone())
    }

    #[must_use]
    pub fn last_external_redirect(&self) -> Option<String> {
        self.with_history(|h| h.external.last().cloned())
    }

    fn with_history<T>(&self, f: impl FnOnce(&mut History) -> T) -> T {
        let mut guard = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl Navigator for MemoryNavigator {
    fn current_location(&self) -> Location {
        self.with_history(|h| h.entries.last().cloned().unwrap_or_default())
    }

    fn navigate(&self, target: &str, replace: bool) {
        let location = Location::parse(target);
        log::debug!("Navigating to {location} (replace: {replace})");
        self.with_history(|h| {
            if replace {
                h.entries.pop();
            }
            h.entries.push(location);
        });
    }

    fn redirect_external(&self, url: &str) {
        log::info!("↗️ Redirecting to external URL");
        self.with_history(|h| h.external.push(url.to_string()));
    }
}
