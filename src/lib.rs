#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Session and sign-in core for the CareData Portal
//!
//! Headless: screens, storage and navigation are supplied by the front end
//! through [`session::TokenStore`], [`navigation::Navigator`] and
//! [`api::HttpTransport`]. [`authentication::AuthenticationServiceFactory`]
//! wires everything from [`settings::CareDataSettings`].

/// Version of the caredata-session crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod api;
pub mod authentication;
pub mod flows;
pub mod identity;
pub mod models;
pub mod navigation;
pub mod session;
pub mod settings;
pub mod utils;
pub mod validation;

// Testing utilities - available for both unit tests and integration tests
#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use authentication::{AuthenticationServiceFactory, SessionServices};
pub use models::{AuthOutcome, UserProfile, UserState};
pub use session::{MemoryTokenStore, RouteGuard, SessionReconciler, TokenStore};
pub use settings::CareDataSettings;
