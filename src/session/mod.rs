//! Session Management Module
//!
//! Client-side session state for CareData: where the token lives, how the
//! displayed user is worked out, and who may see protected routes.
//!
//! # Modules
//!
//! - [`token_store`] - Token store trait, change events and the in-memory store
//! - [`file_store`] - Durable JSON store, optionally encrypted
//! - [`reconciler`] - Converges cache, whoami and federated session into one user state
//! - [`guard`] - Synchronous token gate for protected routes

pub mod file_store;
pub mod guard;
pub mod reconciler;
pub mod token_store;

// Re-export commonly used items for convenience
pub use file_store::FileTokenStore;
pub use guard::{GuardDecision, RouteGuard};
pub use reconciler::{CallbackWatch, ReconcileHandle, SessionReconciler};
pub use token_store::{MemoryTokenStore, StoreEvent, TokenStore};
