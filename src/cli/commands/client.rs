//! `tessera client`: a client-service gate in front of the broker.

use super::{ARG_PORT, CMD_CLIENT, listen_arg, mode_arg, secure_cookies_arg};
use clap::{Arg, Command};

pub const ARG_SERVICE: &str = "service";
pub const ARG_ENDPOINT: &str = "endpoint";
pub const ARG_KEY: &str = "key";

#[must_use]
pub fn command() -> Command {
    Command::new(CMD_CLIENT)
        .about("Run a client-service gate")
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("13001")
                .env("TESSERA_CLIENT_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(listen_arg("TESSERA_CLIENT_LISTEN"))
        .arg(
            Arg::new(ARG_SERVICE)
                .short('s')
                .long("service")
                .help("Registered service name of this gate")
                .default_value("test")
                .env("TESSERA_SSO_SERVICE"),
        )
        .arg(
            Arg::new(ARG_ENDPOINT)
                .short('e')
                .long("endpoint")
                .help("Base URL of the identity provider")
                .default_value("http://127.0.0.1:13000")
                .env("TESSERA_SSO_ENDPOINT"),
        )
        .arg(
            Arg::new(ARG_KEY)
                .short('k')
                .long("key")
                .help("Service key: bearer for token redemption, MAC key in signed mode")
                .env("TESSERA_SSO_KEY")
                .hide_env_values(true),
        )
        .arg(mode_arg())
        .arg(secure_cookies_arg())
}
