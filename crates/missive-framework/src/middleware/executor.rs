use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use missive_core::{
    CallExpr, ConfigurationError, ExecutionError, InvocationEngine, InvokeError, Message,
    PayloadMethod, Resolved, Resolver, Target,
};
use tracing::{debug, error, trace};

use super::{EXECUTOR, Instances, Located, panic_message, resolve_guarded};
use crate::error::PipelineResult;
use crate::pipeline::Middleware;

/// How one invocation ended.
enum Attempt<T> {
    Returned(T),
    /// A handler error; the message fails.
    Failed(ExecutionError),
    /// The call cannot be made as written; the message is rejected.
    Rejected(ConfigurationError),
}

fn settle<T>(method: &str, outcome: std::thread::Result<Result<T, InvokeError>>) -> Attempt<T> {
    match outcome {
        Ok(Ok(value)) => Attempt::Returned(value),
        Ok(Err(InvokeError::Handler(error))) => Attempt::Failed(error),
        Ok(Err(InvokeError::Compile(error))) => Attempt::Rejected(error.into()),
        Ok(Err(
            reason @ (InvokeError::Evaluation(_)
            | InvokeError::Argument { .. }
            | InvokeError::Arity { .. }),
        )) => {
            debug!(method, %reason, "Arguments rejected");
            Attempt::Rejected(ConfigurationError::invalid_arguments(method, reason))
        }
        Ok(Err(fault)) => {
            error!(method, error = %fault, "Handler invocation fault");
            Attempt::Failed(fault.into_execution_error())
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(method, panic = %message, "Handler panicked");
            Attempt::Failed(ExecutionError::panic(message))
        }
    }
}

// =============================================================================
// Command / Event Executor
// =============================================================================

/// Invokes the located command or event handlers.
///
/// Events run every located handler in order and stop at the first failure.
/// Rejected messages are left untouched.
pub struct ExecutorMiddleware {
    engine: Arc<InvocationEngine>,
    resolver: Arc<dyn Resolver>,
}

impl ExecutorMiddleware {
    pub fn new(engine: Arc<InvocationEngine>, resolver: Arc<dyn Resolver>) -> Self {
        Self { engine, resolver }
    }

    fn prepare<'a>(
        &self,
        method: &'a PayloadMethod,
        instance: Option<Resolved>,
    ) -> Result<(&'a PayloadMethod, Option<Resolved>, Vec<Resolved>), ConfigurationError> {
        let instance = match instance {
            Some(instance) => Some(instance),
            None if method.is_self_handling() => None,
            None => Some(
                resolve_guarded(&*self.resolver, method.handler())
                    .ok_or_else(|| ConfigurationError::unresolved(method.handler().name()))?,
            ),
        };

        let extras = method
            .extras()
            .iter()
            .map(|ty| {
                resolve_guarded(&*self.resolver, *ty)
                    .ok_or_else(|| ConfigurationError::unresolved(ty.name()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok((method, instance, extras))
    }
}

impl Middleware for ExecutorMiddleware {
    fn id(&self) -> &str {
        EXECUTOR
    }

    fn handle(&self, message: &mut Message) -> PipelineResult<()> {
        if message.status().is_terminal() {
            trace!(status = %message.status(), "Skipping execution");
            return Ok(());
        }
        let Some(Located(bindings)) = message.extensions_mut().remove::<Located>() else {
            message.reject(ConfigurationError::not_found(message.content_type_name()))?;
            return Ok(());
        };
        let mut instances = message
            .extensions_mut()
            .remove::<Instances>()
            .unwrap_or_default()
            .0
            .into_iter();

        let mut calls = Vec::with_capacity(bindings.len());
        for binding in bindings.iter() {
            let instance = instances.next().flatten();
            let Some(method) = binding.method() else {
                continue;
            };
            match self.prepare(method, instance) {
                Ok(call) => calls.push(call),
                Err(reason) => {
                    debug!(%reason, "Rejecting message");
                    message.reject(reason)?;
                    return Ok(());
                }
            }
        }

        let started = Instant::now();
        let mut failure = None;
        for (method, instance, extras) in calls {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                let content: &mut dyn Any = message.content_any_mut();
                let target = match &instance {
                    Some(handler) => Target::Container {
                        handler: &**handler,
                        content,
                    },
                    None => Target::SelfHandling { content },
                };
                self.engine.invoke_payload(method, target, extras)
            }));

            match settle(method.name(), outcome) {
                Attempt::Returned(()) => {}
                Attempt::Failed(error) => {
                    failure = Some(error);
                    break;
                }
                Attempt::Rejected(reason) => {
                    message.reject(reason)?;
                    return Ok(());
                }
            }
        }
        let duration = started.elapsed();

        match failure {
            None => message.complete(duration)?,
            Some(error) => {
                debug!(%error, "Handler failed");
                message.fail(error, duration)?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Query Executor
// =============================================================================

/// Evaluates the query's call expression and stores the result.
pub struct QueryExecutorMiddleware {
    engine: Arc<InvocationEngine>,
    resolver: Arc<dyn Resolver>,
}

impl QueryExecutorMiddleware {
    pub fn new(engine: Arc<InvocationEngine>, resolver: Arc<dyn Resolver>) -> Self {
        Self { engine, resolver }
    }
}

impl Middleware for QueryExecutorMiddleware {
    fn id(&self) -> &str {
        EXECUTOR
    }

    fn handle(&self, message: &mut Message) -> PipelineResult<()> {
        if message.status().is_terminal() {
            trace!(status = %message.status(), "Skipping execution");
            return Ok(());
        }
        let Some(call) = message.content::<CallExpr>().cloned() else {
            message.reject(ConfigurationError::Other(
                "query message does not carry a call expression".to_string(),
            ))?;
            return Ok(());
        };

        message.extensions_mut().remove::<Located>();
        let instance = message
            .extensions_mut()
            .remove::<Instances>()
            .and_then(|instances| instances.0.into_iter().next().flatten())
            .or_else(|| resolve_guarded(&*self.resolver, call.handler()));
        let Some(handler) = instance else {
            message.reject(ConfigurationError::unresolved(call.handler().name()))?;
            return Ok(());
        };

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.engine.invoke(&*handler, &call)));
        let duration = started.elapsed();

        match settle(call.method(), outcome) {
            Attempt::Returned(value) => {
                message.set_result(value);
                message.complete(duration)?;
            }
            Attempt::Failed(error) => {
                debug!(%error, "Query failed");
                message.fail(error, duration)?;
            }
            Attempt::Rejected(reason) => message.reject(reason)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;

    use missive_core::{EvalError, MessageKind, MessageStatus, ServiceMap};
    use serde::Serialize;

    use super::*;
    use crate::container::HandlerContainer;
    use crate::mediator::Mediator;
    use crate::pipeline::middleware_fn;
    use crate::repository::InMemoryMessageRepository;

    type Journal = Arc<Mutex<Vec<String>>>;

    #[derive(Debug, Serialize)]
    struct Archive {
        id: u32,
    }

    #[derive(Default)]
    struct Archiver;

    impl Archiver {
        fn handle_archive(&self, cmd: &mut Archive, journal: Journal) {
            journal.lock().unwrap().push(format!("archived {}", cmd.id));
        }
    }

    #[derive(Default)]
    struct Rates;

    impl Rates {
        fn convert(&self, amount: i64, rate: i64) -> i64 {
            amount * rate
        }
    }

    fn mediator(journal: &Journal, gate: bool) -> (Mediator, Arc<InMemoryMessageRepository>) {
        let repository = Arc::new(InMemoryMessageRepository::new());
        let mut builder = Mediator::builder()
            .resolver(
                ServiceMap::new()
                    .with_default::<Archiver>()
                    .with_default::<Rates>()
                    .singleton(Arc::clone(journal)),
            )
            .container(
                HandlerContainer::commands::<Archiver>()
                    .handler("handle_archive", Archiver::handle_archive)
                    .build(),
            )
            .container(
                HandlerContainer::queries::<Rates>()
                    .query("convert", Rates::convert)
                    .build(),
            )
            .repository(repository.clone());
        if gate {
            builder = builder.middleware_before(
                MessageKind::Command,
                EXECUTOR,
                middleware_fn("gate", |message: &mut Message| {
                    message.reject(ConfigurationError::Other("archive is read-only".into()))?;
                    Ok(())
                }),
            );
        }
        (builder.build().unwrap(), repository)
    }

    #[test]
    fn upstream_rejection_skips_the_handler() {
        let journal = Journal::default();
        let (mediator, repository) = mediator(&journal, true);

        let mut message = Message::command(Archive { id: 3 });
        mediator.dispatch(&mut message).unwrap_err();

        assert!(journal.lock().unwrap().is_empty());
        assert_eq!(message.status(), MessageStatus::Rejected);
        assert!(message.execution_duration_ms().is_none());
        assert_eq!(
            message.rejection(),
            Some(&ConfigurationError::Other("archive is read-only".into()))
        );

        let records = repository.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, MessageStatus::Rejected);
        assert!(records[0].execution_duration_ms.is_none());
    }

    #[test]
    fn executed_commands_record_a_duration() {
        let journal = Journal::default();
        let (mediator, _) = mediator(&journal, false);

        let mut message = Message::command(Archive { id: 8 });
        mediator.dispatch(&mut message).unwrap();

        assert_eq!(*journal.lock().unwrap(), ["archived 8"]);
        assert_eq!(message.status(), MessageStatus::Completed);
        assert!(message.execution_duration().is_some());
    }

    #[test]
    fn mistyped_query_arguments_reject() {
        let journal = Journal::default();
        let (mediator, repository) = mediator(&journal, false);

        let err = mediator
            .query(CallExpr::on::<Rates>("convert").arg("ten").arg(2))
            .unwrap_err();
        assert!(matches!(
            err.configuration_error(),
            Some(ConfigurationError::InvalidArguments { method, .. }) if method == "convert"
        ));

        let err = mediator
            .query(CallExpr::on::<Rates>("convert").arg(1).arg(missive_core::Expr::constant(1) / 0))
            .unwrap_err();
        assert!(err.is_configuration(), "{err}");

        let records = repository.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|record| record.status == MessageStatus::Rejected));
    }

    #[test]
    fn handler_errors_fail() {
        let error = ExecutionError::new(io::Error::other("disk full"));
        let Attempt::Failed(error) = settle::<()>("save", Ok(Err(InvokeError::Handler(error))))
        else {
            panic!("expected a failure");
        };
        assert!(error.downcast_ref::<io::Error>().is_some());
    }

    #[test]
    fn panics_fail_with_their_message() {
        let outcome = panic::catch_unwind(|| -> Result<(), InvokeError> { panic!("torn write") });

        let Attempt::Failed(error) = settle("save", outcome) else {
            panic!("expected a failure");
        };
        assert!(error.is_panic());
        assert_eq!(error.message(), "torn write");
    }

    #[test]
    fn caller_faults_reject() {
        let compile = InvokeError::Compile(missive_core::CompileError::ShapeMismatch {
            method: "save".into(),
            shape: "value".into(),
        });
        assert!(matches!(
            settle::<()>("save", Ok(Err(compile))),
            Attempt::Rejected(ConfigurationError::Compile(_))
        ));

        let eval = InvokeError::Evaluation(EvalError::UnboundParameter(0));
        assert!(matches!(
            settle::<()>("save", Ok(Err(eval))),
            Attempt::Rejected(ConfigurationError::InvalidArguments { .. })
        ));

        let fault = InvokeError::HandlerType { expected: "Store" };
        assert!(matches!(
            settle::<()>("save", Ok(Err(fault))),
            Attempt::Failed(_)
        ));
    }
}
