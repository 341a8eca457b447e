//! Validation Module
//!
//! - [`core`] - form field checks used by the auth flows
//! - [`oauth_callback`] - classification of hosted-UI error callbacks

pub mod core;
pub mod oauth_callback;

pub use core::{
    validate_code, validate_email, validate_name, validate_new_password, validate_password,
    FormError, FormField,
};
pub use oauth_callback::{BannerKind, OAuthErrorBanner};
