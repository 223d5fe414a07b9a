use std::sync::Arc;

use missive_core::{ConfigurationError, Message, Resolver};
use tracing::debug;

use super::{Instances, Located, RESOLVER, resolve_guarded};
use crate::error::PipelineResult;
use crate::pipeline::Middleware;

/// Resolves a handler instance for every located binding.
///
/// Self-handling bindings need no instance. Rejects the message when the
/// resolver cannot supply one or panics.
pub struct ResolverMiddleware {
    resolver: Arc<dyn Resolver>,
}

impl ResolverMiddleware {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self { resolver }
    }
}

impl Middleware for ResolverMiddleware {
    fn id(&self) -> &str {
        RESOLVER
    }

    fn handle(&self, message: &mut Message) -> PipelineResult<()> {
        if message.status().is_terminal() {
            return Ok(());
        }
        let Some(Located(bindings)) = message.extensions().get::<Located>().cloned() else {
            return Ok(());
        };

        let mut instances = Vec::with_capacity(bindings.len());
        for binding in bindings.iter() {
            if binding.is_self_handling() {
                instances.push(None);
                continue;
            }
            match resolve_guarded(&*self.resolver, binding.handler()) {
                Some(instance) => instances.push(Some(instance)),
                None => {
                    debug!(handler = binding.handler().name(), "Handler instance unavailable");
                    message.reject(ConfigurationError::unresolved(binding.handler().name()))?;
                    return Ok(());
                }
            }
        }

        message.extensions_mut().insert(Instances(instances));
        Ok(())
    }
}
