//! In-memory IdP login sessions.
//!
//! The browser holds a random token in the session cookie; only its SHA-256
//! hash is kept here, mapped to the authenticated principal.

use crate::broker::{BrokerError, Principal, SharedClock};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use std::{collections::HashMap, time::Duration};
use tokio::sync::Mutex;
use tracing::debug;

const SESSION_TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
struct IdpSession {
    principal: Principal,
    expire_at: i64,
}

#[derive(Debug)]
pub struct SessionStore {
    ttl: Duration,
    clock: SharedClock,
    sessions: Mutex<HashMap<Vec<u8>, IdpSession>>,
}

fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

fn generate_session_token() -> Result<String, BrokerError> {
    let mut bytes = [0u8; SESSION_TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| BrokerError::Entropy(e.to_string()))?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

impl SessionStore {
    #[must_use]
    pub fn new(ttl: Duration, clock: SharedClock) -> Self {
        Self {
            ttl,
            clock,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Open a session for `principal`, returning the raw cookie value.
    ///
    /// # Errors
    /// Returns `Entropy` if no token could be generated.
    pub async fn create(&self, principal: Principal) -> Result<String, BrokerError> {
        let token = generate_session_token()?;
        let ttl = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        let now = self.clock.now_millis();

        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, session| now < session.expire_at);
        sessions.insert(
            hash_session_token(&token),
            IdpSession {
                principal,
                expire_at: now.saturating_add(ttl),
            },
        );
        debug!(open_sessions = sessions.len(), "IdP session created");
        Ok(token)
    }

    /// Principal behind a live session token.
    pub async fn get(&self, token: &str) -> Option<Principal> {
        let key = hash_session_token(token);
        let now = self.clock.now_millis();
        let mut sessions = self.sessions.lock().await;
        match sessions.get(&key) {
            Some(session) if now < session.expire_at => Some(session.principal.clone()),
            Some(_) => {
                sessions.remove(&key);
                None
            }
            None => None,
        }
    }

    pub async fn remove(&self, token: &str) {
        self.sessions.lock().await.remove(&hash_session_token(token));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ManualClock;
    use anyhow::Result;
    use std::sync::Arc;

    fn store() -> (SessionStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (SessionStore::new(Duration::from_secs(10), clock.clone()), clock)
    }

    #[tokio::test]
    async fn session_round_trip() -> Result<()> {
        let (store, _clock) = store();
        let token = store.create(Principal::admin()).await?;
        assert_eq!(token.len(), 43);
        assert_eq!(store.get(&token).await, Some(Principal::admin()));
        assert_eq!(store.get("forged").await, None);

        store.remove(&token).await;
        assert_eq!(store.get(&token).await, None);
        Ok(())
    }

    #[tokio::test]
    async fn session_expires() -> Result<()> {
        let (store, clock) = store();
        let token = store.create(Principal::admin()).await?;
        clock.advance(9_999);
        assert!(store.get(&token).await.is_some());
        clock.advance(1);
        assert!(store.get(&token).await.is_none());
        Ok(())
    }

    #[test]
    fn raw_token_is_not_the_key() {
        assert_ne!(hash_session_token("abc"), b"abc".to_vec());
        assert_eq!(hash_session_token("abc").len(), 32);
    }
}
