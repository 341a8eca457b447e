//! Authentication module for the service factory
//!
//! [`factory`] is the composition root: it turns settings into a wired
//! [`SessionServices`] for a front end or the CLI.

pub mod factory;

pub use factory::{AuthenticationServiceFactory, FactoryError, SessionServices};
