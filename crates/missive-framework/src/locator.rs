//! Handler lookup by content type.
//!
//! The [`HandlerLocator`] scans the containers of one message kind for a
//! method whose name starts with the configured prefix and whose single
//! payload parameter is the content type. Results are cached per content type
//! for the lifetime of the locator.
//!
//! For queries the lookup key is the handler type named by the call
//! expression, and the binding covers the whole query container.

use std::collections::HashMap;
use std::sync::Arc;

use missive_core::{MessageKind, PayloadMethod, TypeKey};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::container::HandlerContainer;
use crate::error::{LocateError, LocateResult};

/// Default prefix of handler method names.
pub const DEFAULT_METHOD_PREFIX: &str = "handle";

/// What to do when several containers handle the same content type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Keep the first match in registration order and log a warning.
    FirstMatch,
    /// Report the content type as ambiguous.
    #[default]
    Reject,
}

/// The resolved handler of a content type.
#[derive(Debug, Clone)]
pub struct HandlerBinding {
    kind: MessageKind,
    handler: TypeKey,
    module: &'static str,
    method: Option<PayloadMethod>,
}

impl HandlerBinding {
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The type owning the handler method.
    pub fn handler(&self) -> TypeKey {
        self.handler
    }

    /// Module path of the owning container.
    pub fn module(&self) -> &'static str {
        self.module
    }

    /// The bound command or event method. `None` for query bindings.
    pub fn method(&self) -> Option<&PayloadMethod> {
        self.method.as_ref()
    }

    pub fn method_name(&self) -> Option<&'static str> {
        self.method.as_ref().map(PayloadMethod::name)
    }

    /// Parameter types after the payload.
    pub fn extra_parameter_types(&self) -> &[TypeKey] {
        match &self.method {
            Some(method) => method.extras(),
            None => &[],
        }
    }

    /// `true` if the payload is its own handler.
    pub fn is_self_handling(&self) -> bool {
        self.method.as_ref().is_some_and(PayloadMethod::is_self_handling)
    }

    fn describe(&self) -> String {
        match self.method_name() {
            Some(name) => format!("{}::{}", self.handler.name(), name),
            None => self.handler.name().to_string(),
        }
    }
}

/// Locator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorOptions {
    pub method_prefix: String,
    pub ambiguity: AmbiguityPolicy,
}

impl Default for LocatorOptions {
    fn default() -> Self {
        Self {
            method_prefix: DEFAULT_METHOD_PREFIX.to_string(),
            ambiguity: AmbiguityPolicy::default(),
        }
    }
}

/// Finds and caches the handlers of one message kind.
pub struct HandlerLocator {
    kind: MessageKind,
    containers: Vec<HandlerContainer>,
    options: LocatorOptions,
    cache: RwLock<HashMap<TypeKey, Arc<[HandlerBinding]>>>,
}

impl HandlerLocator {
    /// Creates a locator over the containers of `kind`; other containers are
    /// ignored.
    pub fn new(
        kind: MessageKind,
        containers: impl IntoIterator<Item = HandlerContainer>,
        options: LocatorOptions,
    ) -> Self {
        Self {
            kind,
            containers: containers
                .into_iter()
                .filter(|container| container.kind() == kind)
                .collect(),
            options,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn options(&self) -> &LocatorOptions {
        &self.options
    }

    pub fn containers(&self) -> &[HandlerContainer] {
        &self.containers
    }

    /// Returns the single handler of `key`.
    ///
    /// For events the first match is returned; use [`locate_all`] to fan out.
    ///
    /// [`locate_all`]: Self::locate_all
    pub fn locate(&self, key: TypeKey) -> LocateResult<HandlerBinding> {
        let bindings = self.locate_all(key)?;
        bindings.first().cloned().ok_or_else(|| LocateError::NotFound {
            content_type: key.name().to_string(),
        })
    }

    /// Returns every handler of `key` in registration order.
    pub fn locate_all(&self, key: TypeKey) -> LocateResult<Arc<[HandlerBinding]>> {
        if let Some(bindings) = self.cache.read().get(&key) {
            trace!(kind = %self.kind, content_type = key.name(), "Handler cache hit");
            return Ok(Arc::clone(bindings));
        }

        debug!(kind = %self.kind, content_type = key.name(), "Handler cache miss, scanning containers");
        let bindings = self.resolve(key)?;

        let mut cache = self.cache.write();
        Ok(Arc::clone(cache.entry(key).or_insert(bindings)))
    }

    fn resolve(&self, key: TypeKey) -> LocateResult<Arc<[HandlerBinding]>> {
        let matches = self.scan(key);
        if matches.is_empty() {
            return Err(LocateError::NotFound {
                content_type: key.name().to_string(),
            });
        }

        if self.kind == MessageKind::Event || matches.len() == 1 {
            return Ok(matches.into());
        }

        let candidates: Vec<_> = matches.iter().map(HandlerBinding::describe).collect();
        match self.options.ambiguity {
            AmbiguityPolicy::FirstMatch => {
                warn!(
                    content_type = key.name(),
                    ?candidates,
                    "Ambiguous handler, using the first match"
                );
                Ok(matches.into_iter().take(1).collect())
            }
            AmbiguityPolicy::Reject => Err(LocateError::Ambiguous {
                content_type: key.name().to_string(),
                candidates,
            }),
        }
    }

    fn scan(&self, key: TypeKey) -> Vec<HandlerBinding> {
        if self.kind == MessageKind::Query {
            return self
                .containers
                .iter()
                .filter(|container| container.handler() == key)
                .map(|container| HandlerBinding {
                    kind: self.kind,
                    handler: container.handler(),
                    module: container.module(),
                    method: None,
                })
                .collect();
        }

        self.containers
            .iter()
            .flat_map(|container| {
                container
                    .methods()
                    .iter()
                    .filter(|method| self.accepts(method, key))
                    .map(|method| HandlerBinding {
                        kind: self.kind,
                        handler: container.handler(),
                        module: container.module(),
                        method: Some(method.clone()),
                    })
            })
            .collect()
    }

    fn accepts(&self, method: &PayloadMethod, key: TypeKey) -> bool {
        method.name().starts_with(&self.options.method_prefix)
            && method.payload() == key
            && !method.extras().contains(&key)
    }

    /// Number of cached content types.
    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }

    /// Snapshot of the cached bindings.
    pub fn bindings(&self) -> Vec<(TypeKey, Arc<[HandlerBinding]>)> {
        self.cache
            .read()
            .iter()
            .map(|(key, bindings)| (*key, Arc::clone(bindings)))
            .collect()
    }
}

impl std::fmt::Debug for HandlerLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerLocator")
            .field("kind", &self.kind)
            .field("containers", &self.containers.len())
            .field("cached", &self.cached_len())
            .finish()
    }
}
