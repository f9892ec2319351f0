//! Cart commands.
//!
//! Mutations apply to the local cart immediately; when signed in they are
//! also mirrored to the server before the command exits.

use storefront_core::{Cart, CartKey, CartLineItem};

use super::{CliError, Context};

pub fn show(ctx: &Context) {
    print_cart(&ctx.cart.snapshot());
}

/// # Errors
///
/// Returns `CliError::Cart` if the line cannot be added.
pub fn add(ctx: &Context, item: CartLineItem) -> Result<(), CliError> {
    print_cart(&ctx.cart.add_item(item)?);
    Ok(())
}

pub fn remove(ctx: &Context, key: &CartKey) {
    print_cart(&ctx.cart.remove_item(key));
}

pub fn update(ctx: &Context, key: &CartKey, quantity: u32) {
    print_cart(&ctx.cart.update_quantity(key, quantity));
}

pub fn clear(ctx: &Context) {
    print_cart(&ctx.cart.clear());
}

/// Replace the server's cart with the local one.
///
/// # Errors
///
/// Returns `CliError::Client` when signed out or if the server rejects it.
#[allow(clippy::print_stdout)]
pub async fn sync(ctx: &Context) -> Result<(), CliError> {
    ctx.cart.sync_to_remote().await?;
    println!("Remote cart updated ({} items)", ctx.cart.item_count());
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_cart(cart: &Cart) {
    if cart.is_empty() {
        println!("Cart is empty");
        return;
    }
    for line in cart.items() {
        println!(
            "{:>3} x {} [{} / {} / {}] @ {} = {}",
            line.quantity,
            line.display.name,
            line.product_id,
            line.variant.size,
            line.variant.color,
            line.unit_price,
            line.line_total()
        );
    }
    println!("{} items, subtotal {}", cart.item_count(), cart.subtotal());
}
