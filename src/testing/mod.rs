//! Testing utilities for caredata-session
//!
//! Scripted collaborators and canned data so the session core can be driven
//! end to end without a backend, an identity service or a browser.
//!
//! ## Organization
//!
//! - [`fixtures`] - Pre-built settings, tokens and profiles
//! - [`mock`] - Scripted transport, identity backend and profile fetcher
//!
//! ## Usage
//!
//! ```rust
//! use caredata_session::testing::{fixtures::TestFixtures, mock::MockTransport};
//!
//! let transport = MockTransport::new();
//! transport.on_json("POST", "/auth/login", 200, serde_json::json!({ "access_token": "tok-1" }));
//! let settings = TestFixtures::settings();
//! assert_eq!(settings.session.sign_in_path, "/login");
//! ```

pub mod fixtures;
pub mod mock;

// Re-export commonly used items for convenience
pub use fixtures::TestFixtures;
pub use mock::{MockIdentityBackend, MockProfileFetcher, MockTransport};

/// Common test constants
pub mod constants {
    /// Backend base URL used by test settings
    pub const TEST_API_BASE: &str = "http://api.caredata.test";

    /// Credentials accepted by the scripted backends
    pub const TEST_EMAIL: &str = "sample@gmail.com";
    pub const TEST_PASSWORD: &str = "123456";

    /// Account used for sign-up round trips
    pub const SIGN_UP_EMAIL: &str = "a@b.com";
    pub const SIGN_UP_PASSWORD: &str = "Secret123!";

    /// Code the mock identity backend accepts
    pub const VALID_CODE: &str = "123456";
    pub const WRONG_CODE: &str = "000000";

    /// Hosted-UI authorization code the mock identity backend accepts
    pub const REDIRECT_CODE: &str = "auth-code-1";

    pub const TEST_FIRST_NAME: &str = "Duong";
}
