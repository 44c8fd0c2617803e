use crate::{
    broker::CredentialMode,
    cli::{
        actions::{Action, client, hash_password, server},
        commands::{
            self, ARG_LISTEN, ARG_MODE, ARG_PASSWORD, ARG_PORT, ARG_SECURE_COOKIES, CMD_CLIENT,
            CMD_HASH_PASSWORD, CMD_SERVER,
        },
    },
};
use anyhow::{Context, Result, anyhow};
use clap::ArgMatches;
use secrecy::SecretString;
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

fn socket_addr(matches: &ArgMatches, default_port: u16) -> SocketAddr {
    let ip = matches
        .get_one::<IpAddr>(ARG_LISTEN)
        .copied()
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(default_port);
    SocketAddr::new(ip, port)
}

fn seconds(matches: &ArgMatches, name: &str) -> Result<Duration> {
    matches
        .get_one::<u64>(name)
        .copied()
        .map(Duration::from_secs)
        .with_context(|| format!("missing required argument: --{name}"))
}

fn mode(matches: &ArgMatches) -> CredentialMode {
    matches
        .get_one::<CredentialMode>(ARG_MODE)
        .copied()
        .unwrap_or_default()
}

fn server_args(matches: &ArgMatches) -> Result<server::Args> {
    use commands::server::{
        ARG_ADMIN_HASH, ARG_PURGE_INTERVAL, ARG_REGISTRY, ARG_SESSION_TTL, ARG_TOKEN_TTL,
    };

    let admin_hash = matches
        .get_one::<String>(ARG_ADMIN_HASH)
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --admin-hash")?;
    let registry = matches
        .get_one::<String>(ARG_REGISTRY)
        .map(PathBuf::from)
        .context("missing required argument: --registry")?;

    Ok(server::Args {
        addr: socket_addr(matches, 13000),
        registry,
        admin_hash,
        mode: mode(matches),
        token_ttl: seconds(matches, ARG_TOKEN_TTL)?,
        purge_interval: seconds(matches, ARG_PURGE_INTERVAL)?,
        session_ttl: seconds(matches, ARG_SESSION_TTL)?,
        secure_cookies: matches.get_flag(ARG_SECURE_COOKIES),
    })
}

fn client_args(matches: &ArgMatches) -> Result<client::Args> {
    use commands::client::{ARG_ENDPOINT, ARG_KEY, ARG_SERVICE};

    Ok(client::Args {
        addr: socket_addr(matches, 13001),
        service: matches
            .get_one::<String>(ARG_SERVICE)
            .cloned()
            .context("missing required argument: --service")?,
        endpoint: matches
            .get_one::<String>(ARG_ENDPOINT)
            .cloned()
            .context("missing required argument: --endpoint")?,
        key: matches.get_one::<String>(ARG_KEY).cloned().map(SecretString::from),
        mode: mode(matches),
        secure_cookies: matches.get_flag(ARG_SECURE_COOKIES),
    })
}

/// Turn parsed arguments into the action to execute.
///
/// # Errors
/// Returns an error if required arguments are missing or no subcommand was given.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some((CMD_SERVER, sub)) => Ok(Action::Server(server_args(sub)?)),
        Some((CMD_CLIENT, sub)) => Ok(Action::Client(client_args(sub)?)),
        Some((CMD_HASH_PASSWORD, sub)) => Ok(Action::HashPassword(hash_password::Args {
            password: sub
                .get_one::<String>(ARG_PASSWORD)
                .cloned()
                .map(SecretString::from)
                .context("missing required argument: --password")?,
        })),
        Some((other, _)) => Err(anyhow!("unknown subcommand: {other}")),
        None => Err(anyhow!("no subcommand given")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn dispatch(args: &[&str]) -> Result<Action> {
        let matches = commands::new().try_get_matches_from(args)?;
        handler(&matches)
    }

    #[test]
    fn server_action() -> Result<()> {
        let action = temp_env::with_vars(
            [
                ("TESSERA_ADMIN_HASH", None::<&str>),
                ("TESSERA_MODE", None),
                ("TESSERA_TOKEN_TTL", None),
                ("TESSERA_LISTEN", None),
            ],
            || {
                dispatch(&[
                    "tessera",
                    "server",
                    "--admin-hash",
                    "$argon2id$stub",
                    "--mode",
                    "signed",
                    "--port",
                    "8443",
                    "--listen",
                    "0.0.0.0",
                    "--token-ttl",
                    "600",
                ])
            },
        )?;
        let Action::Server(args) = action else {
            panic!("expected server action");
        };
        assert_eq!(args.addr, "0.0.0.0:8443".parse::<SocketAddr>()?);
        assert_eq!(args.mode, CredentialMode::Signed);
        assert_eq!(args.token_ttl, Duration::from_secs(600));
        assert_eq!(args.admin_hash.expose_secret(), "$argon2id$stub");
        Ok(())
    }

    #[test]
    fn client_action() -> Result<()> {
        let action = temp_env::with_vars(
            [
                ("TESSERA_SSO_KEY", None::<&str>),
                ("TESSERA_SSO_SERVICE", None),
                ("TESSERA_MODE", None),
            ],
            || dispatch(&["tessera", "client", "--service", "reports", "--key", "k"]),
        )?;
        let Action::Client(args) = action else {
            panic!("expected client action");
        };
        assert_eq!(args.service, "reports");
        assert_eq!(args.mode, CredentialMode::Opaque);
        assert_eq!(args.key.as_ref().map(|key| key.expose_secret()), Some("k"));
        Ok(())
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let result = temp_env::with_vars([("TESSERA_ADMIN_HASH", Some("$argon2id$stub"))], || {
            dispatch(&["tessera", "server", "--token-ttl", "0"])
        });
        assert!(result.is_err());
    }
}
