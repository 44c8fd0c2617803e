//! Opaque token store.
//!
//! All token state lives inside a single task that drains a FIFO command
//! queue, so every `issue`, `lookup` and `invalidate` is applied atomically
//! and in arrival order. Callers hold a cheap [`TokenStore`] handle and await
//! the reply for their own command.
//!
//! Tokens are kept twice: keyed by identifier for lookups, and in creation
//! order for the expiry sweep. Every token gets the same TTL, so creation
//! order is also expiry order and the sweep only has to look at the head of
//! the queue. If TTLs ever become per-token the queue must become a heap
//! ordered by expiry.

use crate::broker::{clock::SharedClock, error::BrokerError};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot},
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, error, warn};

/// 16 random bytes, hex encoded: 128 bits of entropy.
const TOKEN_ID_BYTES: usize = 16;
/// Upper bound on regenerations when an identifier collides with a live one.
const MAX_ID_ATTEMPTS: usize = 8;

const DEFAULT_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(60);
const QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub id: String,
    pub service: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    /// Milliseconds since the Unix epoch. The token is dead once `now >= expire_at`.
    pub expire_at: i64,
}

impl Token {
    #[must_use]
    pub const fn is_live(&self, now_millis: i64) -> bool {
        now_millis < self.expire_at
    }

    /// Whole seconds of validity left, zero once expired.
    #[must_use]
    pub fn remaining_seconds(&self, now_millis: i64) -> i64 {
        (self.expire_at - now_millis).max(0) / 1000
    }
}

/// Source of fresh token identifiers.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// # Errors
    /// Returns `Entropy` if the randomness source fails.
    fn generate(&self) -> Result<String, BrokerError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn generate(&self) -> Result<String, BrokerError> {
        let mut bytes = [0u8; TOKEN_ID_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| BrokerError::Entropy(e.to_string()))?;
        Ok(hex::encode(bytes))
    }
}

#[derive(Clone, Debug)]
pub struct TokenStoreConfig {
    ttl: Duration,
    purge_interval: Duration,
}

impl Default for TokenStoreConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            purge_interval: DEFAULT_PURGE_INTERVAL,
        }
    }
}

impl TokenStoreConfig {
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_purge_interval(mut self, purge_interval: Duration) -> Self {
        self.purge_interval = purge_interval.max(Duration::from_millis(1));
        self
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// The token collection itself. Only ever touched from the store task.
#[derive(Debug)]
struct TokenBook {
    ttl_millis: i64,
    by_id: HashMap<String, Token>,
    by_creation: VecDeque<String>,
}

impl TokenBook {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl_millis: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
            by_id: HashMap::new(),
            by_creation: VecDeque::new(),
        }
    }

    /// Drop expired tokens from the head of the creation queue.
    ///
    /// Stops at the first live token, so the cost is proportional to the
    /// number of tokens that expired since the last sweep.
    fn purge_expired(&mut self, now: i64) -> usize {
        let mut purged = 0;
        while let Some(id) = self.by_creation.front() {
            let expired = self
                .by_id
                .get(id)
                .is_none_or(|token| !token.is_live(now));
            if !expired {
                break;
            }
            if let Some(id) = self.by_creation.pop_front() {
                self.by_id.remove(&id);
                purged += 1;
            }
        }
        purged
    }

    fn issue(
        &mut self,
        now: i64,
        service: &str,
        ids: &dyn IdGenerator,
    ) -> Result<Token, BrokerError> {
        // Collisions are only checked against unpurged entries; reuse of an
        // identifier that was already swept is accepted.
        let mut attempts = 0;
        let id = loop {
            if attempts == MAX_ID_ATTEMPTS {
                return Err(BrokerError::Entropy(format!(
                    "no unique identifier after {MAX_ID_ATTEMPTS} attempts"
                )));
            }
            attempts += 1;
            let candidate = ids.generate()?;
            if !self.by_id.contains_key(&candidate) {
                break candidate;
            }
            warn!("token identifier collision, regenerating");
        };

        let token = Token {
            id: id.clone(),
            service: service.to_string(),
            created_at: now,
            expire_at: now.saturating_add(self.ttl_millis),
        };
        self.by_id.insert(id.clone(), token.clone());
        self.by_creation.push_back(id);
        Ok(token)
    }

    fn lookup(&self, now: i64, id: &str, service: &str) -> Result<Token, BrokerError> {
        let token = self.by_id.get(id).ok_or(BrokerError::NotFound)?;
        if token.service != service {
            return Err(BrokerError::ServiceMismatch);
        }
        if !token.is_live(now) {
            return Err(BrokerError::NotFound);
        }
        Ok(token.clone())
    }

    /// Mark the token dead; the next sweep that reaches it reclaims it.
    fn invalidate(&mut self, now: i64, id: &str, service: &str) {
        if let Some(token) = self.by_id.get_mut(id)
            && token.service == service
        {
            token.expire_at = token.expire_at.min(now);
        }
    }

    fn live(&self, now: i64) -> usize {
        self.by_id.values().filter(|token| token.is_live(now)).count()
    }
}

enum Command {
    Issue {
        service: String,
        reply: oneshot::Sender<Result<Token, BrokerError>>,
    },
    Lookup {
        id: String,
        service: String,
        reply: oneshot::Sender<Result<Token, BrokerError>>,
    },
    Invalidate {
        id: String,
        service: String,
        reply: oneshot::Sender<()>,
    },
    Live {
        reply: oneshot::Sender<usize>,
    },
}

/// Handle to the token store task. Clones share the same store.
#[derive(Clone, Debug)]
pub struct TokenStore {
    tx: mpsc::Sender<Command>,
}

impl TokenStore {
    /// Spawn the store task on the current Tokio runtime.
    #[must_use]
    pub fn spawn(config: TokenStoreConfig, clock: SharedClock) -> Self {
        Self::spawn_with_ids(config, clock, Arc::new(RandomIds))
    }

    #[must_use]
    pub fn spawn_with_ids(
        config: TokenStoreConfig,
        clock: SharedClock,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let book = TokenBook::new(config.ttl);
        tokio::spawn(run(book, rx, clock, ids, config.purge_interval));
        Self { tx }
    }

    /// Create a token owned by `service`.
    ///
    /// # Errors
    /// Returns `Entropy` if no identifier could be generated, or
    /// `StoreUnavailable` if the store task has stopped.
    pub async fn issue(&self, service: &str) -> Result<Token, BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Issue {
            service: service.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| BrokerError::StoreUnavailable)?
    }

    /// Fetch a live token owned by `service`.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown or expired tokens and `ServiceMismatch`
    /// when the token belongs to another service.
    pub async fn lookup(&self, id: &str, service: &str) -> Result<Token, BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Lookup {
            id: id.to_string(),
            service: service.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| BrokerError::StoreUnavailable)?
    }

    /// Expire a token. Unknown ids and foreign services are ignored.
    ///
    /// # Errors
    /// Returns `StoreUnavailable` if the store task has stopped.
    pub async fn invalidate(&self, id: &str, service: &str) -> Result<(), BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Invalidate {
            id: id.to_string(),
            service: service.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| BrokerError::StoreUnavailable)
    }

    /// Number of live tokens.
    ///
    /// # Errors
    /// Returns `StoreUnavailable` if the store task has stopped.
    pub async fn live(&self) -> Result<usize, BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Live { reply }).await?;
        rx.await.map_err(|_| BrokerError::StoreUnavailable)
    }

    async fn send(&self, command: Command) -> Result<(), BrokerError> {
        self.tx.send(command).await.map_err(|_| {
            error!("token store task is gone");
            BrokerError::StoreUnavailable
        })
    }
}

async fn run(
    mut book: TokenBook,
    mut rx: mpsc::Receiver<Command>,
    clock: SharedClock,
    ids: Arc<dyn IdGenerator>,
    purge_interval: Duration,
) {
    let mut ticker = interval(purge_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            command = rx.recv() => {
                let Some(command) = command else {
                    debug!("token store handles dropped, stopping");
                    break;
                };
                let now = clock.now_millis();
                book.purge_expired(now);
                apply(&mut book, now, ids.as_ref(), command);
            }
            _ = ticker.tick() => {
                let purged = book.purge_expired(clock.now_millis());
                if purged > 0 {
                    debug!(purged, "expired tokens purged");
                }
            }
        }
    }
}

fn apply(book: &mut TokenBook, now: i64, ids: &dyn IdGenerator, command: Command) {
    // A dropped receiver means the caller gave up; nothing to report.
    match command {
        Command::Issue { service, reply } => {
            let _ = reply.send(book.issue(now, &service, ids));
        }
        Command::Lookup { id, service, reply } => {
            let _ = reply.send(book.lookup(now, &id, &service));
        }
        Command::Invalidate { id, service, reply } => {
            book.invalidate(now, &id, &service);
            let _ = reply.send(());
        }
        Command::Live { reply } => {
            let _ = reply.send(book.live(now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::clock::ManualClock;
    use anyhow::Result;
    use std::{
        collections::HashSet,
        sync::atomic::{AtomicUsize, Ordering},
    };

    #[derive(Debug)]
    struct FailingIds;

    impl IdGenerator for FailingIds {
        fn generate(&self) -> Result<String, BrokerError> {
            Err(BrokerError::Entropy("rng offline".to_string()))
        }
    }

    /// Hands out ids from a fixed script, repeating the last one.
    #[derive(Debug)]
    struct ScriptedIds {
        script: Vec<&'static str>,
        next: AtomicUsize,
    }

    impl ScriptedIds {
        fn new(script: Vec<&'static str>) -> Self {
            Self {
                script,
                next: AtomicUsize::new(0),
            }
        }
    }

    impl IdGenerator for ScriptedIds {
        fn generate(&self) -> Result<String, BrokerError> {
            let n = self.next.fetch_add(1, Ordering::SeqCst);
            let id = self
                .script
                .get(n)
                .or_else(|| self.script.last())
                .ok_or_else(|| BrokerError::Entropy("empty script".to_string()))?;
            Ok((*id).to_string())
        }
    }

    fn store(ttl_millis: u64) -> (TokenStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let config = TokenStoreConfig::default().with_ttl(Duration::from_millis(ttl_millis));
        (TokenStore::spawn(config, clock.clone()), clock)
    }

    #[test]
    fn random_ids_are_128_bit_hex() -> Result<()> {
        let id = RandomIds.generate()?;
        assert_eq!(id.len(), TOKEN_ID_BYTES * 2);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        Ok(())
    }

    #[tokio::test]
    async fn billing_token_lives_for_its_ttl() -> Result<()> {
        let (store, clock) = store(1000);
        let token = store.issue("billing").await?;
        assert_eq!(token.service, "billing");
        assert_eq!(token.created_at, 0);
        assert_eq!(token.expire_at, 1000);

        clock.set(500);
        assert_eq!(store.lookup(&token.id, "billing").await?, token);

        clock.set(1500);
        let result = store.lookup(&token.id, "billing").await;
        assert!(matches!(result, Err(BrokerError::NotFound)));
        Ok(())
    }

    #[tokio::test]
    async fn expiry_boundary_is_inclusive() -> Result<()> {
        let (store, clock) = store(1000);
        let token = store.issue("billing").await?;

        clock.set(999);
        assert!(store.lookup(&token.id, "billing").await.is_ok());

        clock.set(1000);
        assert!(matches!(
            store.lookup(&token.id, "billing").await,
            Err(BrokerError::NotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn other_service_cannot_redeem() -> Result<()> {
        let (store, _clock) = store(1000);
        let token = store.issue("reports").await?;
        assert!(matches!(
            store.lookup(&token.id, "billing").await,
            Err(BrokerError::ServiceMismatch)
        ));
        assert!(store.lookup(&token.id, "reports").await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() -> Result<()> {
        let (store, _clock) = store(1000);
        assert!(matches!(
            store.lookup("deadbeef", "billing").await,
            Err(BrokerError::NotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn invalidate_then_lookup_is_not_found() -> Result<()> {
        let (store, _clock) = store(1000);
        let token = store.issue("billing").await?;
        store.invalidate(&token.id, "billing").await?;
        assert!(matches!(
            store.lookup(&token.id, "billing").await,
            Err(BrokerError::NotFound)
        ));
        // Idempotent.
        store.invalidate(&token.id, "billing").await?;
        store.invalidate("missing", "billing").await?;
        Ok(())
    }

    #[tokio::test]
    async fn invalidate_from_other_service_is_ignored() -> Result<()> {
        let (store, _clock) = store(1000);
        let token = store.issue("billing").await?;
        store.invalidate(&token.id, "reports").await?;
        assert!(store.lookup(&token.id, "billing").await.is_ok());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_issues_are_distinct() -> Result<()> {
        let (store, _clock) = store(60_000);
        let mut handles = Vec::with_capacity(10_000);
        for n in 0..10_000 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let service = if n % 2 == 0 { "billing" } else { "reports" };
                store.issue(service).await
            }));
        }

        let mut seen = HashSet::with_capacity(10_000);
        for handle in handles {
            let token = handle.await??;
            assert!(seen.insert(token.id));
        }
        assert_eq!(seen.len(), 10_000);
        assert_eq!(store.live().await?, 10_000);
        Ok(())
    }

    #[tokio::test]
    async fn live_count_drops_after_expiry() -> Result<()> {
        let (store, clock) = store(1000);
        store.issue("billing").await?;
        clock.set(400);
        store.issue("billing").await?;
        assert_eq!(store.live().await?, 2);

        clock.set(1200);
        assert_eq!(store.live().await?, 1);
        clock.set(1400);
        assert_eq!(store.live().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn entropy_failure_is_surfaced() {
        let clock = Arc::new(ManualClock::new(0));
        let store =
            TokenStore::spawn_with_ids(TokenStoreConfig::default(), clock, Arc::new(FailingIds));
        assert!(matches!(
            store.issue("billing").await,
            Err(BrokerError::Entropy(_))
        ));
    }

    #[tokio::test]
    async fn collisions_are_regenerated() -> Result<()> {
        let clock = Arc::new(ManualClock::new(0));
        let ids = Arc::new(ScriptedIds::new(vec!["aa", "aa", "aa", "bb"]));
        let store = TokenStore::spawn_with_ids(TokenStoreConfig::default(), clock, ids);

        assert_eq!(store.issue("billing").await?.id, "aa");
        assert_eq!(store.issue("billing").await?.id, "bb");
        Ok(())
    }

    #[tokio::test]
    async fn collision_retries_are_capped() -> Result<()> {
        let clock = Arc::new(ManualClock::new(0));
        let ids = Arc::new(ScriptedIds::new(vec!["aa"]));
        let store = TokenStore::spawn_with_ids(TokenStoreConfig::default(), clock, ids);

        store.issue("billing").await?;
        assert!(matches!(
            store.issue("billing").await,
            Err(BrokerError::Entropy(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn purged_identifier_may_be_reused() -> Result<()> {
        let clock = Arc::new(ManualClock::new(0));
        let ids = Arc::new(ScriptedIds::new(vec!["aa"]));
        let config = TokenStoreConfig::default().with_ttl(Duration::from_millis(10));
        let store = TokenStore::spawn_with_ids(config, clock.clone(), ids);

        store.issue("billing").await?;
        clock.set(20);
        let reused = store.issue("reports").await?;
        assert_eq!(reused.id, "aa");
        assert_eq!(reused.service, "reports");
        Ok(())
    }

    #[test]
    fn sweep_stops_at_first_live_token() -> Result<()> {
        let ids = ScriptedIds::new(vec!["a", "b", "c"]);
        let mut book = TokenBook::new(Duration::from_millis(100));
        book.issue(0, "s", &ids)?;
        book.issue(50, "s", &ids)?;
        book.issue(90, "s", &ids)?;

        assert_eq!(book.purge_expired(99), 0);
        assert_eq!(book.purge_expired(100), 1);
        assert_eq!(book.by_creation.len(), 2);
        assert_eq!(book.purge_expired(160), 1);
        assert_eq!(book.by_creation.front().map(String::as_str), Some("c"));
        assert_eq!(book.by_id.len(), 1);
        Ok(())
    }

    #[test]
    fn invalidated_head_is_reclaimed_by_next_sweep() -> Result<()> {
        let ids = ScriptedIds::new(vec!["a", "b"]);
        let mut book = TokenBook::new(Duration::from_millis(100));
        book.issue(0, "s", &ids)?;
        book.issue(10, "s", &ids)?;

        book.invalidate(20, "a", "s");
        assert_eq!(book.purge_expired(20), 1);
        assert!(!book.by_id.contains_key("a"));
        assert!(book.by_id.contains_key("b"));
        Ok(())
    }

    #[test]
    fn remaining_seconds_rounds_down() {
        let token = Token {
            id: "a".to_string(),
            service: "s".to_string(),
            created_at: 0,
            expire_at: 10_500,
        };
        assert_eq!(token.remaining_seconds(0), 10);
        assert_eq!(token.remaining_seconds(20_000), 0);
    }
}
