//! Authentication module
//!
//! Supports: static API key headers, static bearer tokens, and bearer tokens
//! renewed through a refresh endpoint.
//!
//! The `Authenticator` is the front the transport talks to; refreshable
//! credentials are managed by a `TokenManager` that refreshes ahead of
//! expiry and persists every new token.

mod authenticator;
mod token_manager;
mod types;

pub use authenticator::Authenticator;
pub use token_manager::TokenManager;
pub use types::{AuthConfig, Credential, DEFAULT_REFRESH_MARGIN};
