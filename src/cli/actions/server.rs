use crate::{
    api,
    broker::{Broker, CredentialMode, ServiceRegistry, TokenStoreConfig, clock},
    idp::{AdminAuthenticator, IdpConfig, IdpState},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub addr: SocketAddr,
    pub registry: PathBuf,
    pub admin_hash: SecretString,
    pub mode: CredentialMode,
    pub token_ttl: Duration,
    pub purge_interval: Duration,
    pub session_ttl: Duration,
    pub secure_cookies: bool,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the registry or admin hash is invalid, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let registry = ServiceRegistry::load(&args.registry).context("Failed to load service registry")?;
    log_startup_args(&args, &registry);

    let admin = AdminAuthenticator::new(args.admin_hash)?;
    let store_config = TokenStoreConfig::default()
        .with_ttl(args.token_ttl)
        .with_purge_interval(args.purge_interval);
    let broker = Broker::new(registry, args.mode, store_config, clock::system())
        .context("Failed to start credential broker")?;

    let idp_config = IdpConfig::default()
        .with_session_ttl(args.session_ttl)
        .with_secure_cookies(args.secure_cookies);
    let state = Arc::new(IdpState::new(Arc::new(broker), admin, idp_config));

    api::new(args.addr, state).await
}

fn log_startup_args(args: &Args, registry: &ServiceRegistry) {
    let entries = [
        ("listen", args.addr.to_string()),
        ("registry", args.registry.display().to_string()),
        ("services", registry.names().join(", ")),
        ("mode", args.mode.to_string()),
        ("token_ttl", format!("{}s", args.token_ttl.as_secs())),
        ("purge_interval", format!("{}s", args.purge_interval.as_secs())),
        ("session_ttl", format!("{}s", args.session_ttl.as_secs())),
        ("secure_cookies", args.secure_cookies.to_string()),
    ];
    log_entries("Identity provider", &entries);
}

/// Log the banner followed by aligned `key: value` lines.
pub(crate) fn log_entries(title: &str, entries: &[(&str, String)]) {
    info!("{}\n\n{}", banner(), format_entries(title, entries));
}

fn format_entries(title: &str, entries: &[(&str, String)]) -> String {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{title}:");
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        message.push_str(&format!("\n  {key}:{padding} {value}"));
    }
    message
}

fn banner() -> String {
    let short_hash = short_commit(crate::GIT_COMMIT_HASH);
    BANNER.replace(
        "{VERSION}",
        &format!(" - {} - {}", env!("CARGO_PKG_VERSION"), short_hash),
    )
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}

const BANNER: &str = r"
  +---+---+---+
  | # |   | # |
  +---+---+---+
  |   | # |   |   T E S S E R A {VERSION}
  +---+---+---+
  | # |   | # |
  +---+---+---+";
