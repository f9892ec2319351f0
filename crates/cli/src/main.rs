//! Storefront CLI - drive the session client against a live resource server.
//!
//! # Usage
//!
//! ```bash
//! # Sign in (the session is persisted under STOREFRONT_STATE_DIR)
//! sf-cli login -e shopper@example.com -p hunter2
//!
//! # Fetch any authenticated resource
//! sf-cli get orders
//!
//! # Work with the cart
//! sf-cli cart add P1 --size M --color red --price 19.99 --name "Logo Hoodie"
//! sf-cli cart update P1 --size M --color red --quantity 3
//! sf-cli cart show
//! ```
//!
//! # Commands
//!
//! - `login`, `register`, `logout`, `whoami` - Session lifecycle
//! - `get` - Authenticated `GET` of an arbitrary path
//! - `cart` - Local-first cart operations, mirrored when signed in

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Args, Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use secrecy::SecretString;
use storefront_core::{CartKey, CartLineItem, CurrencyCode, DisplayFields, Price, Variant};
use storefront_session::ClientConfig;

mod commands;
mod telemetry;

use commands::{CliError, Context};

#[derive(Parser)]
#[command(name = "sf-cli")]
#[command(author, version, about = "Storefront session client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        #[arg(short, long)]
        email: String,

        #[arg(short, long, env = "STOREFRONT_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account and sign in
    Register {
        /// Display name
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        email: String,

        #[arg(short, long, env = "STOREFRONT_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Show the signed-in account
    Whoami,
    /// GET a resource path and print the unwrapped payload
    Get {
        /// Path relative to the API base URL
        path: String,
    },
    /// Manage the cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// Print the cart
    Show,
    /// Add a product variant
    Add {
        #[command(flatten)]
        line: LineArgs,

        #[arg(short, long, default_value_t = 1)]
        quantity: u32,

        /// Unit price in the currency's standard unit (e.g. 19.99)
        #[arg(long)]
        price: Decimal,

        #[arg(long, value_enum, default_value_t = Currency::Usd)]
        currency: Currency,

        /// Product name shown in the cart
        #[arg(long)]
        name: String,

        /// Thumbnail URL
        #[arg(long)]
        image: Option<String>,
    },
    /// Remove a product variant
    Remove {
        #[command(flatten)]
        line: LineArgs,
    },
    /// Set the quantity of a product variant (0 removes it)
    Update {
        #[command(flatten)]
        line: LineArgs,

        #[arg(short, long)]
        quantity: u32,
    },
    /// Empty the cart
    Clear,
    /// Replace the remote cart with the local one
    Sync,
}

/// Product variant selector shared by the cart commands.
#[derive(Args)]
struct LineArgs {
    /// Product ID
    product: String,

    #[arg(short, long)]
    size: String,

    #[arg(short, long)]
    color: String,
}

impl LineArgs {
    fn key(&self) -> CartKey {
        CartKey::new(self.product.as_str(), self.size.as_str(), self.color.as_str())
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Currency {
    Usd,
    Eur,
    Gbp,
    Cad,
    Aud,
}

impl From<Currency> for CurrencyCode {
    fn from(currency: Currency) -> Self {
        match currency {
            Currency::Usd => Self::USD,
            Currency::Eur => Self::EUR,
            Currency::Gbp => Self::GBP,
            Currency::Cad => Self::CAD,
            Currency::Aud => Self::AUD,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            telemetry::init_tracing();
            tracing::error!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    // Sentry must be initialized before the tracing subscriber.
    let _sentry_guard = telemetry::init_sentry();
    telemetry::init_tracing();

    if let Err(e) = run(cli, &config).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &ClientConfig) -> Result<(), CliError> {
    let ctx = Context::open(config)?;

    match cli.command {
        Commands::Login { email, password } => {
            commands::auth::login(&ctx, &email, SecretString::from(password)).await?;
        }
        Commands::Register {
            name,
            email,
            password,
        } => commands::auth::register(&ctx, &name, &email, SecretString::from(password)).await?,
        Commands::Logout => commands::auth::logout(&ctx).await,
        Commands::Whoami => commands::auth::whoami(&ctx),
        Commands::Get { path } => commands::request::get(&ctx, &path).await?,
        Commands::Cart { action } => match action {
            CartAction::Show => commands::cart::show(&ctx),
            CartAction::Add {
                line,
                quantity,
                price,
                currency,
                name,
                image,
            } => {
                let item = CartLineItem::new(
                    line.product,
                    Variant::new(line.size, line.color),
                    quantity,
                    Price::new(price, currency.into()),
                    DisplayFields { name, image },
                )?;
                commands::cart::add(&ctx, item)?;
            }
            CartAction::Remove { line } => {
                commands::cart::remove(&ctx, &line.key());
            }
            CartAction::Update { line, quantity } => {
                commands::cart::update(&ctx, &line.key(), quantity);
            }
            CartAction::Clear => commands::cart::clear(&ctx),
            CartAction::Sync => commands::cart::sync(&ctx).await?,
        },
    }

    // Background cart mirrors are cancelled when the runtime shuts down.
    ctx.cart.flush().await;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_cart_add() {
        let cli = Cli::try_parse_from([
            "sf-cli", "cart", "add", "P1", "-s", "M", "-c", "red", "-q", "2", "--price", "19.99",
            "--currency", "eur", "--name", "Logo Hoodie",
        ])
        .unwrap();

        let Commands::Cart {
            action:
                CartAction::Add {
                    line,
                    quantity,
                    price,
                    currency,
                    ..
                },
        } = cli.command
        else {
            panic!("expected cart add");
        };
        assert_eq!(line.key(), CartKey::new("P1", "M", "red"));
        assert_eq!(quantity, 2);
        assert_eq!(price.to_string(), "19.99");
        assert_eq!(CurrencyCode::from(currency), CurrencyCode::EUR);
    }

    #[test]
    fn test_parse_login_requires_email() {
        assert!(Cli::try_parse_from(["sf-cli", "login", "-p", "secret"]).is_err());
    }
}
