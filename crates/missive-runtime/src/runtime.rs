//! Configuration-driven assembly of a [`Mediator`].
//!
//! ```rust,ignore
//! use missive_runtime::MissiveRuntime;
//!
//! // missive.toml in the current directory, MISSIVE_* variables, defaults
//! let runtime = MissiveRuntime::builder()
//!     .resolver(ServiceMap::new().with_default::<OrderHandlers>())
//!     .build()?;
//!
//! runtime.mediator().handle_command(PlaceOrder::new("A-1"))?;
//! ```

use std::fmt;
use std::sync::Arc;

use missive_core::Resolver;
use missive_framework::{
    Discovery, HandlerContainer, InMemoryMessageRepository, Mediator, MediatorBuilder,
    MessageRepository,
};
use tracing::{debug, info};

use crate::config::{ConfigLoader, MissiveConfig, validate_config};
use crate::error::RuntimeResult;
use crate::logging;

/// A configured mediator plus the history store it writes to.
pub struct MissiveRuntime {
    config: MissiveConfig,
    mediator: Mediator,
    history: Option<Arc<InMemoryMessageRepository>>,
}

impl MissiveRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Loads configuration from the default locations and builds a runtime
    /// with discovered handlers and no resolver.
    pub fn new() -> RuntimeResult<Self> {
        Self::builder().build()
    }

    /// Builds a runtime from an already loaded configuration.
    pub fn from_config(config: MissiveConfig) -> RuntimeResult<Self> {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &MissiveConfig {
        &self.config
    }

    pub fn mediator(&self) -> &Mediator {
        &self.mediator
    }

    pub fn into_mediator(self) -> Mediator {
        self.mediator
    }

    /// The in-memory history, if `history.enabled` is set and no custom
    /// repository replaced it.
    pub fn history(&self) -> Option<&Arc<InMemoryMessageRepository>> {
        self.history.as_ref()
    }
}

impl fmt::Debug for MissiveRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MissiveRuntime")
            .field("config", &self.config)
            .field("mediator", &self.mediator)
            .field("history", &self.history.as_ref().map(|history| history.len()))
            .finish()
    }
}

type Configure = Box<dyn FnOnce(MediatorBuilder) -> MediatorBuilder>;

/// Builder of a [`MissiveRuntime`].
pub struct RuntimeBuilder {
    loader: Option<ConfigLoader>,
    config: Option<MissiveConfig>,
    resolver: Option<Arc<dyn Resolver>>,
    containers: Vec<HandlerContainer>,
    repository: Option<Arc<dyn MessageRepository>>,
    init_logging: bool,
    configure: Vec<Configure>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            loader: None,
            config: None,
            resolver: None,
            containers: Vec::new(),
            repository: None,
            init_logging: true,
            configure: Vec::new(),
        }
    }

    /// Loads configuration through `loader` instead of the default one.
    pub fn config_loader(mut self, loader: ConfigLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Uses `config` as is; no files or environment variables are read.
    pub fn config(mut self, config: MissiveConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn resolver(self, resolver: impl Resolver + 'static) -> Self {
        self.resolver_arc(Arc::new(resolver))
    }

    pub fn resolver_arc(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn container(mut self, container: impl Into<HandlerContainer>) -> Self {
        self.containers.push(container.into());
        self
    }

    pub fn containers(mut self, containers: impl IntoIterator<Item = HandlerContainer>) -> Self {
        self.containers.extend(containers);
        self
    }

    /// Persists messages to `repository` instead of the in-memory history.
    pub fn repository(mut self, repository: Arc<dyn MessageRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Leaves the global subscriber alone.
    pub fn without_logging(mut self) -> Self {
        self.init_logging = false;
        self
    }

    /// Applies `f` to the mediator builder after the configuration, e.g. to
    /// add middleware.
    pub fn configure<F>(mut self, f: F) -> Self
    where
        F: FnOnce(MediatorBuilder) -> MediatorBuilder + 'static,
    {
        self.configure.push(Box::new(f));
        self
    }

    pub fn build(self) -> RuntimeResult<MissiveRuntime> {
        let config = match self.config {
            Some(config) => config,
            None => self.loader.unwrap_or_default().load()?,
        };
        validate_config(&config)?;

        if self.init_logging {
            logging::init_from_config(&config.logging);
        }

        let mut builder = Mediator::builder()
            .method_prefix(config.dispatch.method_prefix.clone())
            .ambiguity(config.dispatch.ambiguity)
            .engine_options(config.engine)
            .containers(self.containers);
        if let Some(resolver) = self.resolver {
            builder = builder.resolver_arc(resolver);
        }
        if config.dispatch.discover {
            builder = builder.discover(Discovery::scoped(config.dispatch.modules.iter().cloned()));
        }

        let mut history = None;
        if let Some(repository) = self.repository {
            builder = builder.repository(repository);
        } else if config.history.enabled {
            let store = Arc::new(match config.history.capacity {
                Some(capacity) => InMemoryMessageRepository::with_capacity(capacity),
                None => InMemoryMessageRepository::new(),
            });
            builder = builder.repository(Arc::clone(&store) as Arc<dyn MessageRepository>);
            history = Some(store);
        }

        for configure in self.configure {
            builder = configure(builder);
        }
        let mediator = builder.build()?;

        debug!(
            discover = config.dispatch.discover,
            scopes = ?config.dispatch.modules,
            "Mediator configured"
        );
        info!(
            method_prefix = %config.dispatch.method_prefix,
            history = history.is_some(),
            "Missive runtime ready"
        );

        Ok(MissiveRuntime {
            config,
            mediator,
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use missive_core::{Message, MessageKind, MessageStatus, ServiceMap};
    use missive_framework::{AmbiguityPolicy, RepositoryMessagesFilter, middleware_fn};
    use serde::Serialize;

    use super::*;
    use crate::config::ConfigError;
    use crate::error::RuntimeError;

    #[derive(Debug, Serialize)]
    struct Deposit {
        amount: u32,
        balance: Option<u32>,
    }

    #[derive(Debug, Serialize)]
    struct Audit;

    #[derive(Default)]
    struct Teller;

    impl Teller {
        fn on_deposit(&self, cmd: &mut Deposit) {
            cmd.balance = Some(cmd.amount + 10);
        }

        fn handle_deposit(&self, cmd: &mut Deposit) {
            cmd.balance = Some(0);
        }
    }

    fn teller() -> HandlerContainer {
        HandlerContainer::commands::<Teller>()
            .handler("on_deposit", Teller::on_deposit)
            .handler("handle_deposit", Teller::handle_deposit)
            .build()
    }

    fn config() -> MissiveConfig {
        let mut config = MissiveConfig::default();
        config.dispatch.discover = false;
        config
    }

    #[test]
    fn method_prefix_and_history_follow_config() {
        let mut config = config();
        config.dispatch.method_prefix = "on".to_string();
        config.history.enabled = true;
        config.history.capacity = Some(1);

        let runtime = MissiveRuntime::builder()
            .config(config)
            .without_logging()
            .resolver(ServiceMap::new().with_default::<Teller>())
            .container(teller())
            .build()
            .unwrap();

        let deposit = runtime
            .mediator()
            .handle_command(Deposit {
                amount: 5,
                balance: None,
            })
            .unwrap();
        assert_eq!(deposit.balance, Some(15));

        runtime.mediator().handle_command(Audit).unwrap_err();

        let history = runtime.history().unwrap();
        assert_eq!(history.len(), 1);
        let records = history
            .query(&RepositoryMessagesFilter::create().with_status(MessageStatus::Rejected))
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].content_type_name.ends_with("Audit"));
    }

    #[test]
    fn custom_repository_replaces_history() {
        let store = Arc::new(InMemoryMessageRepository::new());
        let mut config = config();
        config.history.enabled = true;

        let runtime = MissiveRuntime::builder()
            .config(config)
            .without_logging()
            .repository(Arc::clone(&store) as Arc<dyn MessageRepository>)
            .build()
            .unwrap();

        runtime.mediator().raise_event(Audit).unwrap_err();
        assert!(runtime.history().is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn configure_hooks_run_on_the_mediator_builder() {
        let runtime = MissiveRuntime::builder()
            .config(config())
            .without_logging()
            .configure(|builder| {
                builder.middleware(
                    MessageKind::Command,
                    middleware_fn("tag", |message: &mut Message| {
                        message.set_data("tagged", "yes");
                        Ok(())
                    }),
                )
            })
            .build()
            .unwrap();

        let pipeline = runtime.mediator().pipelines().get(MessageKind::Command);
        assert_eq!(pipeline.stage_ids().last(), Some(&"tag"));
    }

    #[test]
    fn invalid_config_is_rejected_before_building() {
        let mut config = config();
        config.dispatch.modules = vec!["not a path".to_string()];
        config.dispatch.ambiguity = AmbiguityPolicy::FirstMatch;

        let err = MissiveRuntime::from_config(config).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Config(ConfigError::InvalidModulePath(_))
        ));
    }
}
