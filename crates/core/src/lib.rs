//! Storefront Core - Shared types library.
//!
//! This crate provides the domain types shared by the storefront client
//! components:
//! - `session` - Authenticated HTTP client, credential renewal and cart store
//! - `cli` - Command-line front end over the session client
//!
//! # Architecture
//!
//! The core crate contains only types and pure state transitions - no I/O,
//! no persistence, no HTTP clients. The cart merge rules live here so they can
//! be tested without a runtime.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, prices, emails, roles and the cart model

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
