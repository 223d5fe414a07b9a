//! The standard pipeline stages.
//!
//! | id           | stage                                                  |
//! |--------------|--------------------------------------------------------|
//! | `locator`    | [`LocatorMiddleware`]: binds the content type          |
//! | `resolver`   | [`ResolverMiddleware`]: resolves handler instances     |
//! | `executor`   | [`ExecutorMiddleware`] / [`QueryExecutorMiddleware`]   |
//! | `repository` | [`RepositoryMiddleware`]: persists the terminal message|
//!
//! Stages pass state to each other through the message extensions.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use missive_core::{Resolved, Resolver, TypeKey};
use tracing::warn;

use crate::locator::HandlerBinding;

mod executor;
mod locator;
mod repository;
mod resolver;

pub use executor::{ExecutorMiddleware, QueryExecutorMiddleware};
pub use locator::LocatorMiddleware;
pub use repository::RepositoryMiddleware;
pub use resolver::ResolverMiddleware;

/// Id of the locator stage.
pub const LOCATOR: &str = "locator";
/// Id of the resolver stage.
pub const RESOLVER: &str = "resolver";
/// Id of the executor stage.
pub const EXECUTOR: &str = "executor";
/// Id of the repository stage.
pub const REPOSITORY: &str = "repository";

/// Bindings found by the locator stage.
#[derive(Debug, Clone)]
pub struct Located(pub Arc<[HandlerBinding]>);

/// Handler instances resolved for each binding, `None` for self-handling
/// bindings.
#[derive(Debug, Default)]
pub struct Instances(pub Vec<Option<Resolved>>);

/// Resolves `ty`, counting a panicking resolver as one that has no instance.
pub(crate) fn resolve_guarded(resolver: &dyn Resolver, ty: TypeKey) -> Option<Resolved> {
    match panic::catch_unwind(AssertUnwindSafe(|| resolver.resolve(ty))) {
        Ok(instance) => instance,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(ty = ty.name(), panic = %message, "Resolver panicked");
            None
        }
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
