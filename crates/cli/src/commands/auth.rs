//! Session lifecycle commands.
//!
//! # Usage
//!
//! ```bash
//! sf-cli register -n "Sam Shopper" -e sam@example.com -p hunter2
//! sf-cli login -e sam@example.com -p hunter2
//! sf-cli whoami
//! sf-cli logout
//! ```

use secrecy::SecretString;
use storefront_core::Email;
use storefront_session::SessionUser;

use super::{CliError, Context};

/// Sign in, then push any cart built while signed out.
///
/// # Errors
///
/// Returns `CliError::Email` for a malformed address and `CliError::Client`
/// if the server rejects the credentials.
pub async fn login(ctx: &Context, email: &str, password: SecretString) -> Result<(), CliError> {
    let email = Email::parse(email)?;
    let user = ctx.client.login(&email, &password).await?;
    push_local_cart(ctx).await;
    print_user(&user);
    Ok(())
}

/// Create an account and sign in as it.
///
/// # Errors
///
/// Returns `CliError::Email` for a malformed address and `CliError::Client`
/// if the server rejects the registration.
pub async fn register(
    ctx: &Context,
    name: &str,
    email: &str,
    password: SecretString,
) -> Result<(), CliError> {
    let email = Email::parse(email)?;
    let user = ctx.client.register(name, &email, &password).await?;
    push_local_cart(ctx).await;
    print_user(&user);
    Ok(())
}

pub async fn logout(ctx: &Context) {
    ctx.client.logout().await;
}

/// Print the persisted identity without contacting the server.
#[allow(clippy::print_stdout)]
pub fn whoami(ctx: &Context) {
    let Some(credential) = ctx.client.credentials().get() else {
        println!("Not signed in");
        return;
    };

    println!("{} ({})", credential.owner_id, credential.role.as_str());
    if let Some(expires_at) = credential.access_expires_at() {
        println!("Access token expires {}", expires_at.to_rfc3339());
    }
}

async fn push_local_cart(ctx: &Context) {
    if ctx.cart.snapshot().is_empty() {
        return;
    }
    if let Err(e) = ctx.cart.sync_to_remote().await {
        tracing::warn!(error = %e, "Could not push local cart after sign-in");
    }
}

#[allow(clippy::print_stdout)]
fn print_user(user: &SessionUser) {
    let name = user.name.as_deref().unwrap_or("(no name)");
    println!("Signed in as {name} [{}] ({})", user.id, user.role.as_str());
    if user.role.has_dashboard() {
        println!("This account has dashboard access");
    }
}
