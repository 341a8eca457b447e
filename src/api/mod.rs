//! Backend REST access
//!
//! - [`transport`] - the HTTP seam and its reqwest implementation
//! - [`client`] - bearer injection and 401 refresh-and-retry
//! - [`backend`] - typed endpoints and the explicit-token profile call

pub mod backend;
pub mod client;
pub mod transport;

pub use backend::{BackendApi, GoogleLoginResponse, ProfileClient, ProfileFetcher, RegisterRequest};
pub use client::{ApiClient, TokenRefresher};
pub use transport::{
    ApiRequest, ApiResponse, HttpMethod, HttpTransport, ReqwestTransport, RequestBody,
};
