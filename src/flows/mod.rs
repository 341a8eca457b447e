//! Headless controllers for the auth screens
//!
//! Each flow validates its form, calls the backend or the identity adapter,
//! and answers with where to go next or what to show inline.

pub mod confirmation;
pub mod login;
pub mod register;

pub use confirmation::{ConfirmationFlow, ConfirmationOutcome};
pub use login::{LoginFlow, LoginForm, LoginOutcome};
pub use register::{RegisterFlow, RegisterForm, RegisterOutcome};
