//! Credential broker core.
//!
//! A single [`Broker`] is built at startup and shared (behind an `Arc`) with
//! every request handler. It owns the read-only [`ServiceRegistry`] and one
//! credential back-end: the opaque [`TokenStore`] or the stateless
//! [`AssertionIssuer`]. The redirect choreography in [`handshake`] is the same
//! for both.

pub mod assertion;
pub mod clock;
pub mod error;
pub mod handshake;
pub mod registry;
pub mod token_store;

pub use self::assertion::{AssertionClaims, AssertionIssuer, SignedAssertion};
pub use self::clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use self::error::BrokerError;
pub use self::handshake::{Credential, HandshakeState, IssueOutcome, LoginContinuation, Principal};
pub use self::registry::{RegisteredService, ServiceRecord, ServiceRegistry};
pub use self::token_store::{Token, TokenStore, TokenStoreConfig};

use std::{fmt, str::FromStr, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialMode {
    /// Random handles redeemed server-to-server against the token store.
    #[default]
    Opaque,
    /// HS256 assertions verified locally by the client service.
    Signed,
}

impl CredentialMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Opaque => "opaque",
            Self::Signed => "signed",
        }
    }
}

impl fmt::Display for CredentialMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "opaque" => Ok(Self::Opaque),
            "signed" | "jwt" => Ok(Self::Signed),
            other => Err(format!("unknown credential mode: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
enum Backend {
    Opaque(TokenStore),
    Signed(AssertionIssuer),
}

#[derive(Debug)]
pub struct Broker {
    registry: Arc<ServiceRegistry>,
    backend: Backend,
    clock: SharedClock,
}

impl Broker {
    /// Build the broker and start its back-end.
    ///
    /// Must be called inside a Tokio runtime: opaque mode spawns the token
    /// store task.
    ///
    /// # Errors
    /// Returns `Configuration` in signed mode when a service has no key.
    pub fn new(
        registry: ServiceRegistry,
        mode: CredentialMode,
        config: TokenStoreConfig,
        clock: SharedClock,
    ) -> Result<Self, BrokerError> {
        let registry = Arc::new(registry);
        let backend = match mode {
            CredentialMode::Opaque => Backend::Opaque(TokenStore::spawn(config, clock.clone())),
            CredentialMode::Signed => {
                registry.require_keys()?;
                Backend::Signed(AssertionIssuer::new(
                    registry.clone(),
                    config.ttl(),
                    clock.clone(),
                ))
            }
        };

        Ok(Self {
            registry,
            backend,
            clock,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn mode(&self) -> CredentialMode {
        match self.backend {
            Backend::Opaque(_) => CredentialMode::Opaque,
            Backend::Signed(_) => CredentialMode::Signed,
        }
    }

    #[must_use]
    pub fn token_store(&self) -> Option<&TokenStore> {
        match &self.backend {
            Backend::Opaque(store) => Some(store),
            Backend::Signed(_) => None,
        }
    }

    #[must_use]
    pub fn assertion_issuer(&self) -> Option<&AssertionIssuer> {
        match &self.backend {
            Backend::Opaque(_) => None,
            Backend::Signed(issuer) => Some(issuer),
        }
    }

    #[must_use]
    pub fn clock(&self) -> SharedClock {
        self.clock.clone()
    }

    /// Live opaque tokens, `None` in signed mode.
    pub async fn live_tokens(&self) -> Option<usize> {
        match self.token_store() {
            Some(store) => store.live().await.ok(),
            None => None,
        }
    }
}
