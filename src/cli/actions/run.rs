use crate::cli::{
    actions::{Action, client, hash_password, server},
    telemetry,
};
use anyhow::Result;

/// Single dispatch point for all CLI actions.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    let result = match action {
        Action::Server(args) => server::execute(args).await,
        Action::Client(args) => client::execute(args).await,
        Action::HashPassword(args) => hash_password::execute(&args),
    };
    telemetry::shutdown_tracer();
    result
}
