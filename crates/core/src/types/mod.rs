//! Core types for the storefront client.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod cart;
pub mod email;
pub mod id;
pub mod price;
pub mod role;

pub use cart::{Cart, CartError, CartKey, CartLineItem, DisplayFields, QuantityChange, Variant};
pub use email::{Email, EmailError};
pub use id::*;
pub use price::{CurrencyCode, Price};
pub use role::Role;
