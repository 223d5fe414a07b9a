//! # Missive Framework
//!
//! Handler discovery, pipelines and the mediator built on top of
//! `missive-core`.
//!
//! This layer provides:
//! - Handler containers, explicit or registered with `#[handlers]`
//! - The handler locator with its per-content-type cache
//! - Ordered middleware pipelines, one per message kind
//! - The standard stages: locator, resolver, executor, repository
//! - The message repository port, its filter and an in-memory adapter
//! - The [`Mediator`] dispatch entry points

pub mod container;
pub mod error;
pub mod locator;
pub mod mediator;
pub mod middleware;
pub mod pipeline;
pub mod repository;

#[doc(hidden)]
pub use linkme;

pub use container::{
    ContainerBuilder, ContainerFactory, Discovery, HANDLER_CONTAINERS, HandlerContainer,
};
pub use error::{
    BuildError, BuildResult, DispatchError, DispatchResult, FilterError, FilterResult, LocateError,
    LocateResult, PipelineError, PipelineResult, RepositoryError, RepositoryResult,
};
pub use locator::{
    AmbiguityPolicy, DEFAULT_METHOD_PREFIX, HandlerBinding, HandlerLocator, LocatorOptions,
};
pub use mediator::{Mediator, MediatorBuilder};
pub use middleware::{
    ExecutorMiddleware, LocatorMiddleware, QueryExecutorMiddleware, RepositoryMiddleware,
    ResolverMiddleware,
};
pub use pipeline::{FnMiddleware, Middleware, Pipeline, PipelineContainer, middleware_fn};
pub use repository::{
    InMemoryMessageRepository, MessageRecord, MessageRepository, MessageView,
    RepositoryMessagesFilter,
};
