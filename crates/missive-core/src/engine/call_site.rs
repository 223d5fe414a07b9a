use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::descriptor::{GenericInvoker, PayloadInvoke, Target, TypedInvoker};
use super::transform::Template;
use crate::error::{CompileError, CompileResult, InvokeResult};
use crate::foundation::{Resolved, TypeKey};

/// Cache key of a compiled call site.
///
/// Two calls share a call site when they target the same method of the same
/// handler type with the same formal parameter types, whatever their
/// argument values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CallSignature {
    pub handler: TypeKey,
    pub method: String,
    pub params: Vec<TypeKey>,
}

impl CallSignature {
    pub fn new(handler: TypeKey, method: impl Into<String>, params: Vec<TypeKey>) -> Self {
        Self {
            handler,
            method: method.into(),
            params,
        }
    }
}

impl fmt::Display for CallSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}(", self.handler.short_name(), self.method)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(param.short_name())?;
        }
        f.write_str(")")
    }
}

/// The callable part of a compiled call site.
#[derive(Clone)]
pub enum Invoker {
    /// Command and event methods.
    Payload(Arc<dyn PayloadInvoke>),
    /// Query methods: an erased entry and a statically typed one.
    Value {
        generic: GenericInvoker,
        typed: Arc<dyn Any + Send + Sync>,
    },
}

impl Invoker {
    fn shape(&self) -> &'static str {
        match self {
            Self::Payload(_) => "payload",
            Self::Value { .. } => "value",
        }
    }
}

/// A cached, ready-to-call handler method.
///
/// Query sites keep the argument plan they were compiled with, so later calls
/// only bind values against it.
pub struct CompiledCallSite {
    signature: CallSignature,
    invoker: Invoker,
    template: Option<Template>,
    reduced_constants: Vec<Value>,
}

impl CompiledCallSite {
    pub fn new(signature: CallSignature, invoker: Invoker, reduced_constants: Vec<Value>) -> Self {
        Self {
            signature,
            invoker,
            template: None,
            reduced_constants,
        }
    }

    /// Attaches the argument plan used by [`invoke_bound`](Self::invoke_bound).
    pub fn with_template(mut self, template: Template) -> Self {
        self.template = Some(template);
        self
    }

    pub fn template(&self) -> Option<&Template> {
        self.template.as_ref()
    }

    pub fn is_query(&self) -> bool {
        matches!(self.invoker, Invoker::Value { .. })
    }

    pub fn signature(&self) -> &CallSignature {
        &self.signature
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    /// Constants folded while compiling this site.
    pub fn reduced_constants(&self) -> &[Value] {
        &self.reduced_constants
    }

    fn mismatch(&self, shape: &str) -> CompileError {
        CompileError::ShapeMismatch {
            method: self.signature.method.clone(),
            shape: shape.to_string(),
        }
    }

    pub fn invoke_payload(&self, target: Target<'_>, extras: Vec<Resolved>) -> InvokeResult<()> {
        match &self.invoker {
            Invoker::Payload(invoker) => invoker.invoke(target, extras),
            Invoker::Value { .. } => Err(self.mismatch("payload").into()),
        }
    }

    pub fn invoke_generic(&self, handler: &dyn Any, args: Vec<Value>) -> InvokeResult<Value> {
        match &self.invoker {
            Invoker::Value { generic, .. } => generic(handler, args),
            Invoker::Payload(_) => Err(self.mismatch("value").into()),
        }
    }

    /// Binds `values` through the stored template, then calls the generic entry.
    pub fn invoke_bound(&self, handler: &dyn Any, values: Vec<Value>) -> InvokeResult<Value> {
        let args = match &self.template {
            Some(template) => template.bind(values)?,
            None => values,
        };
        self.invoke_generic(handler, args)
    }

    /// The statically typed entry, if `H`, `Args` and `R` match exactly.
    pub fn typed<H: Any, Args: Any, R: Any>(&self) -> CompileResult<&TypedInvoker<H, Args, R>> {
        match &self.invoker {
            Invoker::Value { typed, .. } => typed
                .downcast_ref::<TypedInvoker<H, Args, R>>()
                .ok_or_else(|| self.mismatch(type_name::<fn(&H, Args) -> R>())),
            Invoker::Payload(_) => Err(self.mismatch("typed")),
        }
    }
}

impl fmt::Debug for CompiledCallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledCallSite")
            .field("signature", &self.signature)
            .field("invoker", &self.invoker.shape())
            .field("template", &self.template.as_ref().map(Template::arity))
            .field("reduced_constants", &self.reduced_constants)
            .finish()
    }
}
