//! `tessera server`: the identity provider.

use super::{ARG_PORT, CMD_SERVER, listen_arg, mode_arg, secure_cookies_arg};
use clap::{Arg, Command};

pub const ARG_REGISTRY: &str = "registry";
pub const ARG_ADMIN_HASH: &str = "admin-hash";
pub const ARG_TOKEN_TTL: &str = "token-ttl";
pub const ARG_PURGE_INTERVAL: &str = "purge-interval";
pub const ARG_SESSION_TTL: &str = "session-ttl";

#[must_use]
pub fn command() -> Command {
    Command::new(CMD_SERVER)
        .about("Run the identity provider")
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("13000")
                .env("TESSERA_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(listen_arg("TESSERA_LISTEN"))
        .arg(
            Arg::new(ARG_REGISTRY)
                .short('r')
                .long("registry")
                .help("Service registry file: JSON array of {name, callbackUrl, key}")
                .default_value("config.json")
                .env("TESSERA_REGISTRY"),
        )
        .arg(
            Arg::new(ARG_ADMIN_HASH)
                .long("admin-hash")
                .help("Argon2 PHC hash of the admin password (see `tessera hash-password`)")
                .env("TESSERA_ADMIN_HASH")
                .hide_env_values(true)
                .required(true),
        )
        .arg(mode_arg())
        .arg(
            Arg::new(ARG_TOKEN_TTL)
                .long("token-ttl")
                .help("Credential lifetime in seconds")
                .default_value("2592000")
                .env("TESSERA_TOKEN_TTL")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_PURGE_INTERVAL)
                .long("purge-interval")
                .help("Seconds between idle sweeps of expired tokens")
                .default_value("60")
                .env("TESSERA_PURGE_INTERVAL")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL)
                .long("session-ttl")
                .help("IdP login session lifetime in seconds")
                .default_value("604800")
                .env("TESSERA_SESSION_TTL")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(secure_cookies_arg())
}
