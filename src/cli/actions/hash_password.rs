use crate::idp::hash_password;
use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};

#[derive(Debug)]
pub struct Args {
    pub password: SecretString,
}

/// Print the PHC hash to stdout for use as `--admin-hash`.
/// # Errors
/// Returns an error if hashing fails.
pub fn execute(args: &Args) -> Result<()> {
    let hash = hash_password(args.password.expose_secret())?;
    println!("{hash}");
    Ok(())
}
