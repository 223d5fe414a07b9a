//! # Missive
//!
//! An in-process mediator. Typed commands, events and queries are wrapped in
//! messages and run through one middleware pipeline per message kind.
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────────────── Pipeline (per kind) ───────────────────────────┐
//! handle_command │ ┌─────────┐   ┌──────────┐   ┌──────────┐   ┌────────────┐                 │
//! raise_event  ──┼▶│ locator │──▶│ resolver │──▶│ executor │──▶│ repository │──▶ custom stages│
//! query          │ └─────────┘   └──────────┘   └──────────┘   └────────────┘                 │
//!                └────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **Locator**: finds the handler methods of the content type, cached per type
//! - **Resolver**: obtains handler instances and extra parameters
//! - **Executor**: invokes handlers through the invocation engine and records
//!   the outcome on the message
//! - **Repository**: persists a snapshot of the finished message
//!
//! Queries are call expressions compiled once per call site and cached by
//! the invocation engine.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use missive::prelude::*;
//!
//! #[derive(Serialize)]
//! pub struct PlaceOrder { pub sku: String, pub id: Option<u64> }
//!
//! #[derive(Default)]
//! pub struct OrderHandlers;
//!
//! #[handlers(command)]
//! impl OrderHandlers {
//!     fn handle_place(&self, cmd: &mut PlaceOrder, store: Arc<OrderStore>) {
//!         cmd.id = Some(store.insert(&cmd.sku));
//!     }
//! }
//!
//! let runtime = MissiveRuntime::builder()
//!     .resolver(
//!         ServiceMap::new()
//!             .with_default::<OrderHandlers>()
//!             .singleton(Arc::new(OrderStore::default())),
//!     )
//!     .build()?;
//! let order = runtime.mediator().handle_command(PlaceOrder { sku: "A-1".into(), id: None })?;
//! ```
//!
//! `#[handlers]` expands to code that names `missive::framework`. Crates that
//! depend on `missive-framework` directly instead pass
//! `#[handlers(command, crate = ::missive_framework)]`.
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log lines

pub use missive_core as core;
pub use missive_framework as framework;
pub use missive_macros::handlers;
pub use missive_runtime as runtime;

/// Commonly used types:
///
/// ```rust,ignore
/// use missive::prelude::*;
/// ```
pub mod prelude {
    // Entry points
    pub use missive_framework::{Mediator, MediatorBuilder};
    pub use missive_runtime::{MissiveConfig, MissiveRuntime};

    // Handler registration
    pub use missive_framework::{AmbiguityPolicy, Discovery, HandlerContainer};
    pub use missive_macros::handlers;

    // Messages and queries
    pub use missive_core::{CallExpr, Message, MessageKind, MessageStatus};

    // Instance resolution
    pub use missive_core::{EmptyResolver, Resolver, ServiceMap};

    // Errors
    pub use missive_core::{ConfigurationError, ExecutionError};
    pub use missive_framework::{DispatchError, DispatchResult};

    // Pipelines and history
    pub use missive_framework::{
        InMemoryMessageRepository, MessageRepository, Middleware, RepositoryMessagesFilter,
        middleware_fn,
    };
}
