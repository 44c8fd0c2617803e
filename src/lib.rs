//! # Tessera (single sign-on credential broker)
//!
//! `tessera` lets one administrator sign in once at an identity provider and
//! reach several independently run client services without signing in again.
//! The browser is redirected to the identity provider, authenticates, and is
//! sent back to the service's registered callback carrying a short-lived
//! credential bound to that service.
//!
//! ## Credential modes
//!
//! - **Opaque:** the credential is a random 128-bit hex handle. The client
//!   service redeems it server-to-server at `GET /api/token/{service}/{id}`.
//!   State lives in a single-owner token store task.
//! - **Signed:** the credential is an HS256 assertion keyed per service and
//!   verified locally by the client service. No server-side state.
//!
//! In both modes a credential minted for one service is useless at another.
//!
//! ## Binaries
//!
//! - `tessera server`: the identity provider.
//! - `tessera client`: a client-service gate (`/login`, `/api/signin`,
//!   `/api/check`) for services that do not embed the library.
//! - `tessera hash-password`: produce the admin password hash.
//! - `openapi`: print the IdP `OpenAPI` document.

pub mod api;
pub mod broker;
pub mod cli;
pub mod gate;
pub mod idp;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_names_the_crate() {
        assert!(APP_USER_AGENT.starts_with("tessera/"));
        assert!(APP_USER_AGENT.ends_with(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn commit_hash_is_set() {
        assert!(!GIT_COMMIT_HASH.is_empty());
    }
}
