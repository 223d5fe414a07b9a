//! The dispatch entry points.
//!
//! A [`Mediator`] owns one pipeline per message kind and the invocation
//! engine shared by every executor stage. It is assembled by a
//! [`MediatorBuilder`]:
//!
//! ```rust,ignore
//! let mediator = Mediator::builder()
//!     .resolver(ServiceMap::new().with_default::<OrderHandlers>())
//!     .discover(Discovery::scoped(["shop::orders"]))
//!     .repository(Arc::new(InMemoryMessageRepository::with_capacity(1000)))
//!     .build()?;
//!
//! let order = mediator.handle_command(PlaceOrder { sku: "A-1".into(), id: None })?;
//! let total: i64 = mediator.query_as(CallExpr::on::<OrderQueries>("total").arg(order.id))?;
//! ```

use std::fmt;
use std::sync::Arc;

use missive_core::{
    CallExpr, ConfigurationError, Content, EmptyResolver, EngineOptions, InvocationEngine, Message,
    MessageKind, MessageStatus, Resolver,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, debug_span, info, warn};

use crate::container::{Discovery, HandlerContainer};
use crate::error::{BuildError, BuildResult, DispatchError, DispatchResult};
use crate::locator::{AmbiguityPolicy, HandlerLocator, LocatorOptions};
use crate::middleware::{
    ExecutorMiddleware, LocatorMiddleware, QueryExecutorMiddleware, RepositoryMiddleware,
    ResolverMiddleware,
};
use crate::pipeline::{Middleware, Pipeline, PipelineContainer};
use crate::repository::MessageRepository;

// =============================================================================
// Mediator
// =============================================================================

/// Routes commands, queries and events through their pipelines.
///
/// `Mediator` is `Send + Sync`; one instance can serve dispatches from many
/// threads at once.
pub struct Mediator {
    pipelines: PipelineContainer,
    engine: Arc<InvocationEngine>,
    commands: Arc<HandlerLocator>,
    queries: Arc<HandlerLocator>,
    events: Arc<HandlerLocator>,
    repository: Option<Arc<dyn MessageRepository>>,
}

impl Mediator {
    pub fn builder() -> MediatorBuilder {
        MediatorBuilder::new()
    }

    /// Dispatches a command and returns its payload, mutated by the handler.
    pub fn handle_command<C: Content>(&self, content: C) -> DispatchResult<C> {
        let mut message = Message::command(content);
        self.dispatch(&mut message)?;
        take_content(message)
    }

    /// Dispatches an event to every handler and returns its payload.
    pub fn raise_event<C: Content>(&self, content: C) -> DispatchResult<C> {
        let mut message = Message::event(content);
        self.dispatch(&mut message)?;
        take_content(message)
    }

    /// Evaluates a query call and returns its JSON result.
    pub fn query(&self, call: CallExpr) -> DispatchResult<Value> {
        let mut message = Message::query(call);
        self.dispatch(&mut message)?;
        Ok(message.take_result().unwrap_or(Value::Null))
    }

    /// Evaluates a query call and converts its result to `R`.
    pub fn query_as<R: DeserializeOwned>(&self, call: CallExpr) -> DispatchResult<R> {
        let value = self.query(call)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Runs a prepared message through the pipeline of its kind.
    ///
    /// The message keeps its terminal state; the returned error mirrors it so
    /// callers can branch on the failure family.
    pub fn dispatch(&self, message: &mut Message) -> DispatchResult<()> {
        let span = debug_span!(
            "dispatch",
            kind = %message.kind(),
            content_type = message.content_type_name()
        );
        let _enter = span.enter();

        self.pipelines.run(message)?;

        match message.status() {
            MessageStatus::Failed => {
                let error = message.error().cloned().ok_or_else(|| {
                    DispatchError::Configuration(ConfigurationError::Other(
                        "failed message carries no error".to_string(),
                    ))
                })?;
                Err(DispatchError::Execution(error))
            }
            MessageStatus::Rejected => {
                let reason = message
                    .rejection()
                    .cloned()
                    .unwrap_or_else(|| ConfigurationError::not_found(message.content_type_name()));
                Err(DispatchError::Configuration(reason))
            }
            MessageStatus::Completed | MessageStatus::Created => {
                debug!(status = %message.status(), "Dispatch finished");
                Ok(())
            }
        }
    }

    pub fn engine(&self) -> &Arc<InvocationEngine> {
        &self.engine
    }

    pub fn pipelines(&self) -> &PipelineContainer {
        &self.pipelines
    }

    /// The handler locator of `kind`.
    pub fn locator(&self, kind: MessageKind) -> &Arc<HandlerLocator> {
        match kind {
            MessageKind::Command => &self.commands,
            MessageKind::Query => &self.queries,
            MessageKind::Event => &self.events,
        }
    }

    pub fn repository(&self) -> Option<&Arc<dyn MessageRepository>> {
        self.repository.as_ref()
    }
}

fn take_content<C: Content>(message: Message) -> DispatchResult<C> {
    message.into_content::<C>().map_err(|message| {
        DispatchError::Configuration(ConfigurationError::Other(format!(
            "payload of `{}` was replaced during dispatch",
            message.content_type_name()
        )))
    })
}

impl fmt::Debug for Mediator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mediator")
            .field("pipelines", &self.pipelines)
            .field("engine", &self.engine)
            .field("repository", &self.repository.is_some())
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

enum Placement {
    End,
    Before(String),
    After(String),
}

struct CustomStage {
    kind: MessageKind,
    placement: Placement,
    stage: Arc<dyn Middleware>,
}

/// Assembles a [`Mediator`].
///
/// Containers come from explicit registration and from the `#[handlers]`
/// registry. Without a resolver only self-handling messages without extra
/// parameters can be dispatched.
pub struct MediatorBuilder {
    resolver: Option<Arc<dyn Resolver>>,
    containers: Vec<HandlerContainer>,
    discovery: Option<Discovery>,
    locator: LocatorOptions,
    engine: EngineOptions,
    repository: Option<Arc<dyn MessageRepository>>,
    custom: Vec<CustomStage>,
}

impl MediatorBuilder {
    pub fn new() -> Self {
        Self {
            resolver: None,
            containers: Vec::new(),
            discovery: None,
            locator: LocatorOptions::default(),
            engine: EngineOptions::default(),
            repository: None,
            custom: Vec::new(),
        }
    }

    /// Sets the resolver of handler instances and extra parameters.
    pub fn resolver(self, resolver: impl Resolver + 'static) -> Self {
        self.resolver_arc(Arc::new(resolver))
    }

    pub fn resolver_arc(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Registers a container explicitly.
    pub fn container(mut self, container: impl Into<HandlerContainer>) -> Self {
        self.containers.push(container.into());
        self
    }

    pub fn containers(mut self, containers: impl IntoIterator<Item = HandlerContainer>) -> Self {
        self.containers.extend(containers);
        self
    }

    /// Adds the `#[handlers]` containers selected by `discovery`.
    pub fn discover(mut self, discovery: Discovery) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Adds every `#[handlers]` container linked into the binary.
    pub fn discover_all(self) -> Self {
        self.discover(Discovery::all())
    }

    /// Prefix a method name needs to handle commands and events.
    pub fn method_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.locator.method_prefix = prefix.into();
        self
    }

    pub fn ambiguity(mut self, policy: AmbiguityPolicy) -> Self {
        self.locator.ambiguity = policy;
        self
    }

    pub fn engine_options(mut self, options: EngineOptions) -> Self {
        self.engine = options;
        self
    }

    /// Compiles every query call site while building.
    pub fn precompile(mut self, enabled: bool) -> Self {
        self.engine.precompile = enabled;
        self
    }

    /// Persists every message after execution.
    pub fn repository(mut self, repository: Arc<dyn MessageRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Appends a stage to the pipeline of `kind`.
    pub fn middleware(self, kind: MessageKind, stage: impl Middleware + 'static) -> Self {
        self.push_stage(kind, Placement::End, Arc::new(stage))
    }

    /// Inserts a stage before the stage `id` of the pipeline of `kind`.
    pub fn middleware_before(
        self,
        kind: MessageKind,
        id: impl Into<String>,
        stage: impl Middleware + 'static,
    ) -> Self {
        self.push_stage(kind, Placement::Before(id.into()), Arc::new(stage))
    }

    /// Inserts a stage after the stage `id` of the pipeline of `kind`.
    pub fn middleware_after(
        self,
        kind: MessageKind,
        id: impl Into<String>,
        stage: impl Middleware + 'static,
    ) -> Self {
        self.push_stage(kind, Placement::After(id.into()), Arc::new(stage))
    }

    fn push_stage(mut self, kind: MessageKind, placement: Placement, stage: Arc<dyn Middleware>) -> Self {
        self.custom.push(CustomStage {
            kind,
            placement,
            stage,
        });
        self
    }

    /// Validates the configuration and assembles the pipelines.
    pub fn build(self) -> BuildResult<Mediator> {
        if self.locator.method_prefix.is_empty() {
            return Err(BuildError::EmptyPrefix);
        }

        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(EmptyResolver) as Arc<dyn Resolver>);

        let mut containers = self.containers;
        if let Some(discovery) = &self.discovery {
            let discovered = discovery.discover();
            debug!(count = discovered.len(), scopes = ?discovery.scopes(), "Discovered handler containers");
            containers.extend(discovered);
        }
        containers.retain(|container| {
            if container.is_empty() {
                warn!(
                    handler = container.handler().name(),
                    kind = %container.kind(),
                    "Skipping handler container without methods"
                );
            }
            !container.is_empty()
        });

        let engine = Arc::new(InvocationEngine::new(self.engine));
        for container in containers.iter().filter(|c| c.kind() == MessageKind::Query) {
            for method in container.query_methods() {
                engine.register_query(method.clone())?;
            }
        }
        if self.engine.precompile {
            let compiled = engine.precompile_all();
            debug!(compiled, "Precompiled query call sites");
        }

        let locator = |kind| {
            Arc::new(HandlerLocator::new(
                kind,
                containers.iter().cloned(),
                self.locator.clone(),
            ))
        };
        let commands = locator(MessageKind::Command);
        let queries = locator(MessageKind::Query);
        let events = locator(MessageKind::Event);

        let mut pipelines = PipelineContainer::new();
        for (kind, located) in [
            (MessageKind::Command, &commands),
            (MessageKind::Query, &queries),
            (MessageKind::Event, &events),
        ] {
            let executor: Arc<dyn Middleware> = match kind {
                MessageKind::Query => Arc::new(QueryExecutorMiddleware::new(
                    Arc::clone(&engine),
                    Arc::clone(&resolver),
                )),
                _ => Arc::new(ExecutorMiddleware::new(
                    Arc::clone(&engine),
                    Arc::clone(&resolver),
                )),
            };
            let mut standard: Vec<Arc<dyn Middleware>> = vec![
                Arc::new(LocatorMiddleware::new(Arc::clone(located))),
                Arc::new(ResolverMiddleware::new(Arc::clone(&resolver))),
                executor,
            ];
            if let Some(repository) = &self.repository {
                standard.push(Arc::new(RepositoryMiddleware::new(Arc::clone(repository))));
            }
            pipelines.get_mut(kind).append_all(standard)?;
        }

        for CustomStage {
            kind,
            placement,
            stage,
        } in self.custom
        {
            let pipeline: &mut Pipeline = pipelines.get_mut(kind);
            match placement {
                Placement::End => pipeline.append_arc(stage)?,
                Placement::Before(id) => pipeline.insert_before_arc(&id, stage)?,
                Placement::After(id) => pipeline.insert_after_arc(&id, stage)?,
            }
        }

        info!(
            containers = containers.len(),
            precompile = self.engine.precompile,
            repository = self.repository.is_some(),
            "Mediator ready"
        );

        Ok(Mediator {
            pipelines,
            engine,
            commands,
            queries,
            events,
            repository: self.repository,
        })
    }
}

impl Default for MediatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;
    use std::thread;

    use missive_core::{Resolved, ServiceMap, TypeKey};
    use serde::Serialize;

    use super::*;
    use crate::middleware::EXECUTOR;
    use crate::pipeline::middleware_fn;
    use crate::repository::{InMemoryMessageRepository, RepositoryMessagesFilter};

    type Journal = Arc<Mutex<Vec<String>>>;

    #[derive(Debug, Serialize)]
    struct Increment {
        value: i64,
    }

    impl Increment {
        fn handle(&mut self) {
            self.value += 1;
        }
    }

    #[derive(Debug, Serialize)]
    struct Greet {
        name: String,
        reply: Option<String>,
    }

    #[derive(Debug, Serialize)]
    struct Withdraw {
        amount: u32,
    }

    #[derive(Debug, Serialize)]
    struct Explode;

    #[derive(Debug, Serialize)]
    struct Unrouted;

    #[derive(Debug, Serialize, Clone)]
    struct Shipped {
        order: u32,
    }

    #[derive(Default)]
    struct Greeter;

    impl Greeter {
        fn handle_greet(&self, cmd: &mut Greet, journal: Journal) {
            let reply = format!("hello {}", cmd.name);
            journal.lock().unwrap().push(reply.clone());
            cmd.reply = Some(reply);
        }

        fn handle_withdraw(&self, cmd: &mut Withdraw) -> Result<(), io::Error> {
            if cmd.amount > 100 {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "limit exceeded"));
            }
            Ok(())
        }

        fn handle_explode(&self, _: &mut Explode) {
            panic!("kaboom");
        }
    }

    #[derive(Default)]
    struct Mailer;

    #[derive(Default)]
    struct Ledger;

    impl Mailer {
        fn handle_shipped(&self, event: &mut Shipped, journal: Journal) {
            journal.lock().unwrap().push(format!("mail {}", event.order));
        }
    }

    impl Ledger {
        fn handle_shipped(&self, event: &mut Shipped, journal: Journal) {
            journal.lock().unwrap().push(format!("ledger {}", event.order));
        }
    }

    #[derive(Default)]
    struct Catalog;

    impl Catalog {
        fn price(&self, sku: String, quantity: i64) -> i64 {
            let unit = if sku.starts_with('A') { 5 } else { 7 };
            unit * quantity
        }
    }

    fn containers() -> Vec<HandlerContainer> {
        vec![
            HandlerContainer::commands::<Increment>()
                .self_handler("handle", Increment::handle)
                .build(),
            HandlerContainer::commands::<Greeter>()
                .handler("handle_greet", Greeter::handle_greet)
                .handler("handle_withdraw", Greeter::handle_withdraw)
                .handler("handle_explode", Greeter::handle_explode)
                .build(),
            HandlerContainer::events::<Mailer>()
                .handler("handle_shipped", Mailer::handle_shipped)
                .build(),
            HandlerContainer::events::<Ledger>()
                .handler("handle_shipped", Ledger::handle_shipped)
                .build(),
            HandlerContainer::queries::<Catalog>()
                .query("price", Catalog::price)
                .build(),
        ]
    }

    fn mediator(journal: &Journal, repository: Arc<InMemoryMessageRepository>) -> Mediator {
        let services = ServiceMap::new()
            .with_default::<Greeter>()
            .with_default::<Mailer>()
            .with_default::<Ledger>()
            .with_default::<Catalog>()
            .singleton(Arc::clone(journal));

        Mediator::builder()
            .resolver(services)
            .containers(containers())
            .repository(repository)
            .build()
            .unwrap()
    }

    fn setup() -> (Mediator, Journal, Arc<InMemoryMessageRepository>) {
        let journal = Journal::default();
        let repository = Arc::new(InMemoryMessageRepository::new());
        (mediator(&journal, Arc::clone(&repository)), journal, repository)
    }

    #[test]
    fn self_handling_command_returns_mutated_payload() {
        let (mediator, _, repository) = setup();

        let result = mediator.handle_command(Increment { value: 41 }).unwrap();
        assert_eq!(result.value, 42);

        let records = repository.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, MessageStatus::Completed);
        assert!(records[0].execution_duration_ms.is_some());
    }

    #[test]
    fn container_handler_receives_resolved_parameters() {
        let (mediator, journal, _) = setup();

        let greet = mediator
            .handle_command(Greet {
                name: "ada".into(),
                reply: None,
            })
            .unwrap();
        assert_eq!(greet.reply.as_deref(), Some("hello ada"));
        assert_eq!(*journal.lock().unwrap(), ["hello ada"]);
    }

    #[test]
    fn missing_handler_rejects_without_executing() {
        let (mediator, _, repository) = setup();

        let err = mediator.handle_command(Unrouted).unwrap_err();
        assert!(matches!(
            err.configuration_error(),
            Some(ConfigurationError::HandlerNotFound { .. })
        ));

        let rejected = repository
            .query(&RepositoryMessagesFilter::create().with_status(MessageStatus::Rejected))
            .unwrap();
        assert_eq!(rejected.len(), 1);
        assert!(rejected[0].execution_duration_ms.is_none());
        assert!(rejected[0].rejection.is_some());
    }

    #[test]
    fn handler_error_surfaces_unwrapped() {
        let (mediator, _, repository) = setup();

        let err = mediator.handle_command(Withdraw { amount: 500 }).unwrap_err();
        let execution = err.execution_error().unwrap();
        let io_error = execution.downcast_ref::<io::Error>().unwrap();
        assert_eq!(io_error.kind(), io::ErrorKind::PermissionDenied);

        let failed = repository
            .query(&RepositoryMessagesFilter::create().with_error_kind("io::error::Error$").unwrap())
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status, MessageStatus::Failed);

        assert!(mediator.handle_command(Withdraw { amount: 5 }).is_ok());
    }

    #[test]
    fn panics_become_execution_errors() {
        let (mediator, _, _) = setup();

        let err = mediator.handle_command(Explode).unwrap_err();
        let execution = err.execution_error().unwrap();
        assert!(execution.is_panic());
        assert_eq!(execution.message(), "kaboom");
    }

    #[test]
    fn events_reach_every_handler_in_order() {
        let (mediator, journal, _) = setup();

        mediator.raise_event(Shipped { order: 7 }).unwrap();
        assert_eq!(*journal.lock().unwrap(), ["mail 7", "ledger 7"]);
    }

    #[test]
    fn queries_return_values_and_reuse_call_sites() {
        let (mediator, _, _) = setup();

        for quantity in 1..=5 {
            let total: i64 = mediator
                .query_as(CallExpr::on::<Catalog>("price").arg("A-1").arg(quantity))
                .unwrap();
            assert_eq!(total, 5 * quantity);
        }

        let stats = mediator.engine().stats();
        assert_eq!(stats.compilations, 1);
        assert_eq!(stats.hits, 4);
    }

    #[test]
    fn unknown_query_method_is_a_configuration_error() {
        let (mediator, _, _) = setup();

        let err = mediator
            .query(CallExpr::on::<Catalog>("discount").arg(1))
            .unwrap_err();
        assert!(matches!(
            err.configuration_error(),
            Some(ConfigurationError::Compile(_))
        ));
    }

    #[test]
    fn unresolvable_dependency_rejects() {
        let mediator = Mediator::builder()
            .resolver(ServiceMap::new().with_default::<Greeter>())
            .containers(containers())
            .build()
            .unwrap();

        let err = mediator
            .handle_command(Greet {
                name: "bo".into(),
                reply: None,
            })
            .unwrap_err();
        assert!(matches!(
            err.configuration_error(),
            Some(ConfigurationError::Unresolved { .. })
        ));
    }

    #[test]
    fn panicking_resolver_rejects_and_records() {
        let repository = Arc::new(InMemoryMessageRepository::new());
        let mediator = Mediator::builder()
            .resolver(|_: TypeKey| -> Option<Resolved> { panic!("container offline") })
            .containers(containers())
            .repository(repository.clone())
            .build()
            .unwrap();

        let err = mediator
            .handle_command(Greet {
                name: "cy".into(),
                reply: None,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Configuration(ConfigurationError::Unresolved { .. })
        ));

        let err = mediator
            .query(CallExpr::on::<Catalog>("price").arg("A").arg(1))
            .unwrap_err();
        assert!(err.is_configuration(), "{err}");

        let records = repository.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|record| record.status == MessageStatus::Rejected));
        assert!(records.iter().all(|record| record.execution_duration_ms.is_none()));
    }

    #[test]
    fn terminal_messages_are_not_dispatched_again() {
        let (mediator, _, _) = setup();

        let mut message = Message::command(Increment { value: 1 });
        mediator.dispatch(&mut message).unwrap();
        mediator.dispatch(&mut message).unwrap();

        assert_eq!(message.status(), MessageStatus::Completed);
        assert_eq!(message.content::<Increment>().unwrap().value, 2);
    }

    #[test]
    fn custom_stages_are_placed_relative_to_standard_ones() {
        let repository = Arc::new(InMemoryMessageRepository::new());
        let mediator = Mediator::builder()
            .containers(containers())
            .repository(repository.clone())
            .middleware_before(
                MessageKind::Command,
                EXECUTOR,
                middleware_fn("audit", |message: &mut Message| {
                    message.set_data("audited", "yes");
                    Ok(())
                }),
            )
            .build()
            .unwrap();

        assert_eq!(
            mediator.pipelines().get(MessageKind::Command).stage_ids(),
            ["locator", "resolver", "audit", "executor", "repository"]
        );

        mediator.handle_command(Increment { value: 0 }).unwrap();
        assert_eq!(repository.records()[0].data["audited"], "yes");
    }

    #[test]
    fn build_validates_configuration() {
        assert!(matches!(
            Mediator::builder().method_prefix("").build(),
            Err(BuildError::EmptyPrefix)
        ));
        assert!(matches!(
            Mediator::builder()
                .middleware_after(MessageKind::Event, "missing", middleware_fn("x", |_| Ok(())))
                .build(),
            Err(BuildError::Pipeline(_))
        ));
    }

    #[test]
    fn ambiguous_commands_follow_the_policy() {
        struct Other;
        impl Other {
            fn handle_withdraw(&self, _: &mut Withdraw) {}
        }
        let extra = HandlerContainer::commands::<Other>()
            .handler("handle_withdraw", Other::handle_withdraw)
            .build();

        let rejecting = Mediator::builder()
            .containers(containers())
            .container(extra.clone())
            .build()
            .unwrap();
        let err = rejecting.handle_command(Withdraw { amount: 1 }).unwrap_err();
        assert!(matches!(
            err.configuration_error(),
            Some(ConfigurationError::AmbiguousHandler { .. })
        ));

        let first = Mediator::builder()
            .resolver(ServiceMap::new().with_default::<Greeter>())
            .containers(containers())
            .container(extra)
            .ambiguity(AmbiguityPolicy::FirstMatch)
            .build()
            .unwrap();
        assert!(first.handle_command(Withdraw { amount: 1 }).is_ok());
    }

    #[test]
    fn concurrent_dispatch_shares_one_mediator() {
        let (mediator, journal, repository) = setup();

        thread::scope(|scope| {
            for worker in 0..4 {
                let mediator = &mediator;
                scope.spawn(move || {
                    for n in 0..25 {
                        mediator.handle_command(Increment { value: n }).unwrap();
                        mediator.raise_event(Shipped { order: worker }).unwrap();
                        let total: i64 = mediator
                            .query_as(CallExpr::on::<Catalog>("price").arg("B").arg(n))
                            .unwrap();
                        assert_eq!(total, 7 * n);
                    }
                });
            }
        });

        assert_eq!(repository.len(), 300);
        assert_eq!(journal.lock().unwrap().len(), 200);
        // Increment, both Shipped handlers and the price query.
        let stats = mediator.engine().stats();
        assert_eq!(stats.compilations, 4);
        assert_eq!(stats.query_sites, 1);
        assert_eq!(stats.hits + stats.misses, 400);
    }
}
