//! Type-erased descriptions of registered handler methods.
//!
//! A [`PayloadMethod`] describes a command or event method: which handler type
//! it lives on, which payload it accepts and which extra parameters it needs.
//! A [`QueryMethod`] describes a query method with JSON arguments. Both carry
//! an erased invoker that the engine installs into compiled call sites.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;

use super::call_site::CallSignature;
use super::method::{HandlerFn, QueryFn, SelfHandlerFn, ValueArgs};
use crate::error::{CompileError, CompileResult, InvokeError, InvokeResult};
use crate::foundation::{Resolved, TypeKey};

// =============================================================================
// Payload Methods
// =============================================================================

/// What a payload method is invoked on.
pub enum Target<'a> {
    /// A handler instance and the payload it handles.
    Container {
        handler: &'a dyn Any,
        content: &'a mut dyn Any,
    },
    /// A payload that is its own handler.
    SelfHandling { content: &'a mut dyn Any },
}

impl Target<'_> {
    fn shape(&self) -> &'static str {
        match self {
            Self::Container { .. } => "container",
            Self::SelfHandling { .. } => "self-handling",
        }
    }
}

/// Erased invoker of a payload method.
pub trait PayloadInvoke: Send + Sync {
    fn invoke(&self, target: Target<'_>, extras: Vec<Resolved>) -> InvokeResult<()>;
}

struct ContainerInvoker<H, C, M, F> {
    name: &'static str,
    f: F,
    _marker: PhantomData<fn() -> (H, C, M)>,
}

impl<H, C, M, F> PayloadInvoke for ContainerInvoker<H, C, M, F>
where
    H: Any,
    C: Any,
    M: 'static,
    F: HandlerFn<H, C, M>,
{
    fn invoke(&self, target: Target<'_>, extras: Vec<Resolved>) -> InvokeResult<()> {
        let (handler, content) = match target {
            Target::Container { handler, content } => (handler, content),
            other => return Err(shape_mismatch(self.name, other.shape())),
        };
        let handler = handler.downcast_ref::<H>().ok_or(InvokeError::HandlerType {
            expected: type_name::<H>(),
        })?;
        let content = content.downcast_mut::<C>().ok_or(InvokeError::PayloadType {
            expected: type_name::<C>(),
        })?;
        self.f.call(handler, content, extras)
    }
}

struct SelfInvoker<C, M, F> {
    name: &'static str,
    f: F,
    _marker: PhantomData<fn() -> (C, M)>,
}

impl<C, M, F> PayloadInvoke for SelfInvoker<C, M, F>
where
    C: Any,
    M: 'static,
    F: SelfHandlerFn<C, M>,
{
    fn invoke(&self, target: Target<'_>, extras: Vec<Resolved>) -> InvokeResult<()> {
        let content = match target {
            Target::SelfHandling { content } => content,
            other => return Err(shape_mismatch(self.name, other.shape())),
        };
        let content = content.downcast_mut::<C>().ok_or(InvokeError::PayloadType {
            expected: type_name::<C>(),
        })?;
        self.f.call(content, extras)
    }
}

fn shape_mismatch(method: &str, shape: &str) -> InvokeError {
    CompileError::ShapeMismatch {
        method: method.to_string(),
        shape: shape.to_string(),
    }
    .into()
}

/// A registered command or event method.
#[derive(Clone)]
pub struct PayloadMethod {
    handler: TypeKey,
    name: &'static str,
    payload: TypeKey,
    extras: Vec<TypeKey>,
    output: TypeKey,
    self_handling: bool,
    invoker: Arc<dyn PayloadInvoke>,
}

impl PayloadMethod {
    /// Describes `f` as a method of handler `H` taking a `&mut C` payload.
    pub fn container<H, C, M, F>(name: &'static str, f: F) -> Self
    where
        H: Any,
        C: Any,
        M: 'static,
        F: HandlerFn<H, C, M>,
    {
        Self {
            handler: TypeKey::of::<H>(),
            name,
            payload: TypeKey::of::<C>(),
            extras: F::extra_params(),
            output: F::output(),
            self_handling: false,
            invoker: Arc::new(ContainerInvoker {
                name,
                f,
                _marker: PhantomData,
            }),
        }
    }

    /// Describes `f` as a method of payload `C` on itself.
    pub fn self_handling<C, M, F>(name: &'static str, f: F) -> Self
    where
        C: Any,
        M: 'static,
        F: SelfHandlerFn<C, M>,
    {
        Self {
            handler: TypeKey::of::<C>(),
            name,
            payload: TypeKey::of::<C>(),
            extras: F::extra_params(),
            output: F::output(),
            self_handling: true,
            invoker: Arc::new(SelfInvoker {
                name,
                f,
                _marker: PhantomData,
            }),
        }
    }

    pub fn handler(&self) -> TypeKey {
        self.handler
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The payload parameter type.
    pub fn payload(&self) -> TypeKey {
        self.payload
    }

    /// Parameters after the payload, supplied by the resolver.
    pub fn extras(&self) -> &[TypeKey] {
        &self.extras
    }

    pub fn output(&self) -> TypeKey {
        self.output
    }

    pub fn is_self_handling(&self) -> bool {
        self.self_handling
    }

    pub fn invoker(&self) -> &Arc<dyn PayloadInvoke> {
        &self.invoker
    }

    /// The formal signature: payload first, then the extras.
    pub fn signature(&self) -> CallSignature {
        let params = std::iter::once(self.payload)
            .chain(self.extras.iter().copied())
            .collect();
        CallSignature::new(self.handler, self.name, params)
    }
}

impl fmt::Debug for PayloadMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadMethod")
            .field("handler", &self.handler)
            .field("name", &self.name)
            .field("payload", &self.payload)
            .field("extras", &self.extras)
            .field("self_handling", &self.self_handling)
            .finish()
    }
}

// =============================================================================
// Query Methods
// =============================================================================

/// Erased query invoker: handler as `&dyn Any`, JSON arguments in, JSON out.
pub type GenericInvoker = Arc<dyn Fn(&dyn Any, Vec<Value>) -> InvokeResult<Value> + Send + Sync>;

/// Query invoker with exact static types.
pub struct TypedInvoker<H, Args, R> {
    call: Arc<dyn Fn(&H, Args) -> InvokeResult<R> + Send + Sync>,
}

impl<H, Args, R> TypedInvoker<H, Args, R> {
    pub fn call(&self, handler: &H, args: Args) -> InvokeResult<R> {
        (self.call)(handler, args)
    }
}

impl<H, Args, R> Clone for TypedInvoker<H, Args, R> {
    fn clone(&self) -> Self {
        Self {
            call: Arc::clone(&self.call),
        }
    }
}

/// A registered query method.
#[derive(Clone)]
pub struct QueryMethod {
    handler: TypeKey,
    name: &'static str,
    params: Vec<TypeKey>,
    output: TypeKey,
    generic: GenericInvoker,
    typed: Arc<dyn Any + Send + Sync>,
}

impl QueryMethod {
    /// Describes `f` as a query method of handler `H`.
    pub fn new<H, M, F>(name: &'static str, f: F) -> Self
    where
        H: Any,
        M: 'static,
        F: QueryFn<H, M>,
    {
        let f = Arc::new(f);

        let erased = Arc::clone(&f);
        let generic: GenericInvoker = Arc::new(move |handler: &dyn Any, values: Vec<Value>| {
            let handler = handler.downcast_ref::<H>().ok_or(InvokeError::HandlerType {
                expected: type_name::<H>(),
            })?;
            let args = F::Args::from_values(values)?;
            let output = erased.call(handler, args).map_err(InvokeError::Handler)?;
            serde_json::to_value(output).map_err(|e| InvokeError::Result(e.to_string()))
        });

        let typed = TypedInvoker::<H, F::Args, F::Output> {
            call: Arc::new(move |handler: &H, args: F::Args| {
                f.call(handler, args).map_err(InvokeError::Handler)
            }),
        };

        Self {
            handler: TypeKey::of::<H>(),
            name,
            params: F::Args::param_types(),
            output: TypeKey::of::<F::Output>(),
            generic,
            typed: Arc::new(typed),
        }
    }

    pub fn handler(&self) -> TypeKey {
        self.handler
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn params(&self) -> &[TypeKey] {
        &self.params
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn output(&self) -> TypeKey {
        self.output
    }

    /// Calls the method without going through a call site.
    pub fn invoke_reflective(&self, handler: &dyn Any, args: Vec<Value>) -> InvokeResult<Value> {
        (self.generic)(handler, args)
    }

    pub fn signature(&self) -> CallSignature {
        CallSignature::new(self.handler, self.name, self.params.clone())
    }

    pub(crate) fn generic(&self) -> &GenericInvoker {
        &self.generic
    }

    pub(crate) fn typed(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.typed
    }

    /// Checks a statically typed call against the formal signature.
    pub fn check_typed<Args: ValueArgs, R: Any>(&self) -> CompileResult<()> {
        let supplied = Args::param_types();
        if supplied.len() != self.params.len() {
            return Err(CompileError::ArityMismatch {
                method: self.name.to_string(),
                expected: self.params.len(),
                actual: supplied.len(),
            });
        }
        if let Some((position, (expected, actual))) = self
            .params
            .iter()
            .zip(&supplied)
            .enumerate()
            .find(|(_, (expected, actual))| expected != actual)
        {
            return Err(CompileError::ParameterMismatch {
                method: self.name.to_string(),
                position,
                expected: expected.name().to_string(),
                actual: actual.name().to_string(),
            });
        }
        if !self.output.is::<R>() {
            return Err(CompileError::ReturnMismatch {
                method: self.name.to_string(),
                expected: self.output.name().to_string(),
                actual: type_name::<R>().to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for QueryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryMethod")
            .field("handler", &self.handler)
            .field("name", &self.name)
            .field("params", &self.params)
            .field("output", &self.output)
            .finish()
    }
}

// =============================================================================
// Method Table
// =============================================================================

/// Query methods indexed by handler type and name.
#[derive(Debug, Default)]
pub struct MethodTable {
    methods: HashMap<TypeKey, HashMap<&'static str, Arc<QueryMethod>>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a method. A second method with the same handler and name is rejected.
    pub fn insert(&mut self, method: QueryMethod) -> CompileResult<()> {
        let by_name = self.methods.entry(method.handler).or_default();
        if by_name.contains_key(method.name) {
            return Err(CompileError::DuplicateMethod {
                handler: method.handler.name().to_string(),
                method: method.name.to_string(),
            });
        }
        by_name.insert(method.name, Arc::new(method));
        Ok(())
    }

    pub fn get(&self, handler: TypeKey, name: &str) -> CompileResult<Arc<QueryMethod>> {
        self.methods
            .get(&handler)
            .and_then(|by_name| by_name.get(name))
            .cloned()
            .ok_or_else(|| CompileError::UnknownMethod {
                handler: handler.name().to_string(),
                method: name.to_string(),
            })
    }

    pub fn contains(&self, handler: TypeKey, name: &str) -> bool {
        self.methods
            .get(&handler)
            .is_some_and(|by_name| by_name.contains_key(name))
    }

    pub fn len(&self) -> usize {
        self.methods.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<QueryMethod>> {
        self.methods.values().flat_map(HashMap::values)
    }
}
