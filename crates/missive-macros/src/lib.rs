//! Procedural macros for the Missive dispatch pipeline.
//!
//! This crate provides:
//!
//! - `#[handlers(...)]` - Registers the methods of an `impl` block as a
//!   handler container in `missive::framework::HANDLER_CONTAINERS`
//!
//! ```rust,ignore
//! use missive::prelude::*;
//!
//! #[derive(Default)]
//! pub struct OrderHandlers;
//!
//! #[handlers(command)]
//! impl OrderHandlers {
//!     pub fn handle_place(&self, cmd: &mut PlaceOrder, store: Arc<OrderStore>) {
//!         cmd.id = Some(store.insert(&cmd.sku));
//!     }
//! }
//!
//! #[handlers(query)]
//! impl OrderQueries {
//!     pub fn total(&self, id: u64) -> i64 { /* ... */ }
//! }
//! ```

mod handlers;

use proc_macro::TokenStream;

/// Registers the methods of an inherent `impl` block as a handler container.
///
/// # Kinds
///
/// - `#[handlers(command)]` / `#[handlers(event)]` - every method taking
///   `&self` and a `&mut` payload, followed by any number of resolved
///   parameters, is registered. Whether a method handles messages is decided
///   at dispatch time by its name prefix (`handle` by default).
/// - `#[handlers(command, self_handling)]` / `#[handlers(event, self_handling)]` -
///   the `impl` block belongs to the payload type; methods take `&mut self`
///   and resolved parameters.
/// - `#[handlers(query)]` - every `pub` method taking `&self` is registered;
///   arguments must be deserializable from JSON and the output serializable.
///
/// Methods marked `#[handlers(skip)]` are left out.
///
/// # Options
///
/// - `prefix = "on"` - the handler name prefix the mediator is configured
///   with. Methods starting with it but shaped otherwise are compile errors.
/// - `crate = ::missive_framework` - where the framework is reachable. The
///   generated code uses `::missive::framework` unless told otherwise.
#[proc_macro_attribute]
pub fn handlers(attr: TokenStream, item: TokenStream) -> TokenStream {
    handlers::expand(attr.into(), item.into())
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
