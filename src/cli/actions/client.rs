use crate::{
    api,
    broker::{CredentialMode, clock},
    cli::actions::server::log_entries,
    gate::{Gate, GateConfig},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{net::SocketAddr, sync::Arc};

#[derive(Debug)]
pub struct Args {
    pub addr: SocketAddr,
    pub service: String,
    pub endpoint: String,
    pub key: Option<SecretString>,
    pub mode: CredentialMode,
    pub secure_cookies: bool,
}

/// Execute the client gate action.
/// # Errors
/// Returns an error if the gate configuration is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let entries = [
        ("listen", args.addr.to_string()),
        ("service", args.service.clone()),
        ("endpoint", args.endpoint.clone()),
        ("mode", args.mode.to_string()),
        ("key_set", args.key.is_some().to_string()),
        ("secure_cookies", args.secure_cookies.to_string()),
    ];
    log_entries("Client gate", &entries);

    let config = GateConfig::new(&args.service, &args.endpoint)
        .context("Invalid gate configuration")?
        .with_key(args.key)
        .with_mode(args.mode)
        .with_secure_cookies(args.secure_cookies);
    let gate = Gate::new(config, clock::system()).context("Failed to build gate")?;

    api::new_gate(args.addr, Arc::new(gate)).await
}
