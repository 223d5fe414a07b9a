//! Handler containers and the compile-time container registry.
//!
//! A [`HandlerContainer`] groups the handler methods of one type for one
//! message kind. Containers are built explicitly:
//!
//! ```rust,ignore
//! let container = HandlerContainer::commands::<OrderHandlers>()
//!     .handler("handle_create", OrderHandlers::handle_create)
//!     .handler("handle_cancel", OrderHandlers::handle_cancel)
//!     .build();
//! ```
//!
//! or declared with `#[handlers(command)]` on an `impl` block, which adds a
//! [`ContainerFactory`] to [`HANDLER_CONTAINERS`]. [`Discovery`] collects the
//! registered containers, optionally restricted to module path prefixes.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

use linkme::distributed_slice;
use missive_core::{
    HandlerFn, MessageKind, PayloadMethod, QueryFn, QueryMethod, SelfHandlerFn, TypeKey,
};

/// Builds a container. One factory per `#[handlers]` block.
pub type ContainerFactory = fn() -> HandlerContainer;

/// Registry of handler containers declared with `#[handlers]`.
#[distributed_slice]
pub static HANDLER_CONTAINERS: [ContainerFactory];

// =============================================================================
// Handler Container
// =============================================================================

/// The handler methods of one type for one message kind.
#[derive(Clone)]
pub struct HandlerContainer {
    kind: MessageKind,
    handler: TypeKey,
    module: &'static str,
    methods: Vec<PayloadMethod>,
    queries: Vec<QueryMethod>,
}

impl HandlerContainer {
    /// Starts a container of command handlers on `H`.
    pub fn commands<H: Any>() -> ContainerBuilder<H> {
        ContainerBuilder::new(MessageKind::Command)
    }

    /// Starts a container of event handlers on `H`.
    pub fn events<H: Any>() -> ContainerBuilder<H> {
        ContainerBuilder::new(MessageKind::Event)
    }

    /// Starts a container of query methods on `H`.
    pub fn queries<H: Any>() -> ContainerBuilder<H> {
        ContainerBuilder::new(MessageKind::Query)
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The type owning the methods.
    pub fn handler(&self) -> TypeKey {
        self.handler
    }

    /// Module path the container was declared in.
    pub fn module(&self) -> &'static str {
        self.module
    }

    /// Command or event methods, in registration order.
    pub fn methods(&self) -> &[PayloadMethod] {
        &self.methods
    }

    /// Query methods, in registration order.
    pub fn query_methods(&self) -> &[QueryMethod] {
        &self.queries
    }

    pub fn len(&self) -> usize {
        self.methods.len() + self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for HandlerContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self
            .methods
            .iter()
            .map(PayloadMethod::name)
            .chain(self.queries.iter().map(QueryMethod::name))
            .collect();
        f.debug_struct("HandlerContainer")
            .field("kind", &self.kind)
            .field("handler", &self.handler)
            .field("module", &self.module)
            .field("methods", &names)
            .finish()
    }
}

/// Builder for a [`HandlerContainer`] on handler type `H`.
pub struct ContainerBuilder<H> {
    container: HandlerContainer,
    _marker: PhantomData<fn() -> H>,
}

impl<H: Any> ContainerBuilder<H> {
    fn new(kind: MessageKind) -> Self {
        Self {
            container: HandlerContainer {
                kind,
                handler: TypeKey::of::<H>(),
                module: "",
                methods: Vec::new(),
                queries: Vec::new(),
            },
            _marker: PhantomData,
        }
    }

    /// Records the module path used by scoped discovery.
    pub fn module(mut self, module: &'static str) -> Self {
        self.container.module = module;
        self
    }

    /// Adds a method taking `&self`, a `&mut C` payload and resolved extras.
    pub fn handler<C, M, F>(mut self, name: &'static str, f: F) -> Self
    where
        C: Any,
        M: 'static,
        F: HandlerFn<H, C, M>,
    {
        self.container
            .methods
            .push(PayloadMethod::container::<H, C, M, F>(name, f));
        self
    }

    /// Adds a method of the payload type itself, taking `&mut self` and
    /// resolved extras.
    pub fn self_handler<M, F>(mut self, name: &'static str, f: F) -> Self
    where
        M: 'static,
        F: SelfHandlerFn<H, M>,
    {
        self.container
            .methods
            .push(PayloadMethod::self_handling::<H, M, F>(name, f));
        self
    }

    /// Adds a query method taking `&self` and JSON-deserializable arguments.
    pub fn query<M, F>(mut self, name: &'static str, f: F) -> Self
    where
        M: 'static,
        F: QueryFn<H, M>,
    {
        self.container
            .queries
            .push(QueryMethod::new::<H, M, F>(name, f));
        self
    }

    pub fn build(self) -> HandlerContainer {
        self.container
    }
}

impl<H: Any> From<ContainerBuilder<H>> for HandlerContainer {
    fn from(builder: ContainerBuilder<H>) -> Self {
        builder.build()
    }
}

// =============================================================================
// Discovery
// =============================================================================

/// Selects registered containers by module path.
///
/// A scope `my_app::orders` includes containers declared in `my_app::orders`
/// and any of its submodules. Without scopes every container is included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    scopes: Vec<String>,
}

impl Discovery {
    /// Includes every registered container.
    pub fn all() -> Self {
        Self::default()
    }

    /// Includes containers under any of the given module paths.
    pub fn scoped<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    /// Adds a module path scope.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Returns `true` if `module` lies in one of the scopes.
    pub fn includes(&self, module: &str) -> bool {
        self.scopes.is_empty()
            || self.scopes.iter().any(|scope| {
                module == scope
                    || module
                        .strip_prefix(scope.as_str())
                        .is_some_and(|rest| rest.starts_with("::"))
            })
    }

    /// Instantiates every selected container from [`HANDLER_CONTAINERS`].
    ///
    /// Link order is unspecified, so containers are returned sorted by module
    /// path and handler type name.
    pub fn discover(&self) -> Vec<HandlerContainer> {
        self.select(HANDLER_CONTAINERS.iter().copied())
    }

    /// Instantiates the selected containers from an explicit factory list.
    pub fn select(&self, factories: impl IntoIterator<Item = ContainerFactory>) -> Vec<HandlerContainer> {
        let mut containers: Vec<_> = factories
            .into_iter()
            .map(|factory| factory())
            .filter(|container| self.includes(container.module()))
            .collect();
        containers.sort_by(|a, b| {
            (a.module(), a.handler().name()).cmp(&(b.module(), b.handler().name()))
        });
        containers
    }
}
