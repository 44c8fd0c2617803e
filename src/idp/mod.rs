//! Identity-provider side: who may obtain credentials.

pub mod admin;
pub mod session;

pub use self::admin::{AdminAuthenticator, hash_password};
pub use self::session::SessionStore;

use crate::broker::Broker;
use std::{sync::Arc, time::Duration};

const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Clone, Debug)]
pub struct IdpConfig {
    session_ttl: Duration,
    secure_cookies: bool,
}

impl Default for IdpConfig {
    fn default() -> Self {
        Self {
            session_ttl: DEFAULT_SESSION_TTL,
            secure_cookies: false,
        }
    }
}

impl IdpConfig {
    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.secure_cookies
    }
}

/// Everything the IdP handlers share.
#[derive(Debug)]
pub struct IdpState {
    broker: Arc<Broker>,
    admin: AdminAuthenticator,
    sessions: SessionStore,
    config: IdpConfig,
}

impl IdpState {
    #[must_use]
    pub fn new(broker: Arc<Broker>, admin: AdminAuthenticator, config: IdpConfig) -> Self {
        let sessions = SessionStore::new(config.session_ttl(), broker.clock());
        Self {
            broker,
            admin,
            sessions,
            config,
        }
    }

    #[must_use]
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    #[must_use]
    pub fn admin(&self) -> &AdminAuthenticator {
        &self.admin
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn config(&self) -> &IdpConfig {
        &self.config
    }
}
