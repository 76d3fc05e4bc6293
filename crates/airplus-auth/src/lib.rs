//! Authentication for the Air+ bridge.
//!
//! This crate provides:
//! - The PKCE authorization-code flow against the vendor's OIDC provider
//! - Token lifecycle management with proactive refresh and revocation detection
//! - The vendor REST API client (device listing, signature, user lookup)

mod error;
mod manager;
mod oauth;
mod rest;
mod tokens;

pub use error::{AuthError, AuthResult};
pub use manager::{AuthManager, AuthState, RefreshCallback};
pub use oauth::OAuthClient;
pub use rest::{build_client_id, Device, UserInfo, VendorClient};
pub use tokens::{
    expiration_from_token, resolve_expiry, user_id_from_token, CredentialSet, CredentialUpdate,
    TokenResponse,
};
