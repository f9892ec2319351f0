//! Raw authenticated requests.

use serde_json::Value;

use super::{CliError, Context};

/// `GET` a path and pretty-print the unwrapped payload.
///
/// # Errors
///
/// Returns `CliError::Client` if the request fails.
#[allow(clippy::print_stdout)]
pub async fn get(ctx: &Context, path: &str) -> Result<(), CliError> {
    let value: Value = ctx.client.get(path).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
