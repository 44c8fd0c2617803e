pub mod client;
pub mod logging;
pub mod server;

use crate::broker::CredentialMode;
use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const CMD_SERVER: &str = "server";
pub const CMD_CLIENT: &str = "client";
pub const CMD_HASH_PASSWORD: &str = "hash-password";

pub const ARG_LISTEN: &str = "listen";
pub const ARG_PORT: &str = "port";
pub const ARG_MODE: &str = "mode";
pub const ARG_SECURE_COOKIES: &str = "secure-cookies";
pub const ARG_PASSWORD: &str = "password";

/// Credential back-end, shared by the IdP and the gate.
fn mode_arg() -> Arg {
    Arg::new(ARG_MODE)
        .long("mode")
        .help("Credential mode: opaque (server-side tokens) or signed (HS256 assertions)")
        .env("TESSERA_MODE")
        .default_value("opaque")
        .value_parser(|mode: &str| mode.parse::<CredentialMode>())
}

fn listen_arg(env: &'static str) -> Arg {
    Arg::new(ARG_LISTEN)
        .short('l')
        .long("listen")
        .help("Address to bind")
        .env(env)
        .default_value("127.0.0.1")
        .value_parser(clap::value_parser!(std::net::IpAddr))
}

fn secure_cookies_arg() -> Arg {
    Arg::new(ARG_SECURE_COOKIES)
        .long("secure-cookies")
        .help("Mark session cookies Secure (serve over HTTPS)")
        .env("TESSERA_SECURE_COOKIES")
        .action(clap::ArgAction::SetTrue)
}

fn hash_password_command() -> Command {
    Command::new(CMD_HASH_PASSWORD)
        .about("Print the argon2 hash of the admin password")
        .arg(
            Arg::new(ARG_PASSWORD)
                .long("password")
                .help("Admin password to hash")
                .env("TESSERA_ADMIN_PASSWORD")
                .hide_env_values(true)
                .required(true),
        )
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("tessera")
        .about("Single sign-on credential broker")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(server::command())
        .subcommand(client::command())
        .subcommand(hash_password_command());

    logging::with_args(command)
}
