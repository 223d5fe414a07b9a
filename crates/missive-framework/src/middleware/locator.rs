use std::sync::Arc;

use missive_core::{CallExpr, ConfigurationError, Message, MessageKind};
use tracing::debug;

use super::{LOCATOR, Located};
use crate::error::PipelineResult;
use crate::locator::HandlerLocator;
use crate::pipeline::Middleware;

/// Binds the message content to its handlers.
///
/// Rejects the message when no handler, or more than one under the
/// `Reject` policy, is found.
pub struct LocatorMiddleware {
    locator: Arc<HandlerLocator>,
}

impl LocatorMiddleware {
    pub fn new(locator: Arc<HandlerLocator>) -> Self {
        Self { locator }
    }
}

impl Middleware for LocatorMiddleware {
    fn id(&self) -> &str {
        LOCATOR
    }

    fn handle(&self, message: &mut Message) -> PipelineResult<()> {
        if message.status().is_terminal() {
            return Ok(());
        }

        let key = match message.kind() {
            MessageKind::Query => match message.content::<CallExpr>() {
                Some(call) => call.handler(),
                None => {
                    message.reject(ConfigurationError::Other(
                        "query message does not carry a call expression".to_string(),
                    ))?;
                    return Ok(());
                }
            },
            _ => message.content_type(),
        };

        match self.locator.locate_all(key) {
            Ok(bindings) => {
                message.extensions_mut().insert(Located(bindings));
            }
            Err(error) => {
                debug!(content_type = key.name(), %error, "Rejecting message");
                message.reject(error.into())?;
            }
        }
        Ok(())
    }
}
