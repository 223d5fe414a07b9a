//! The invocation engine and its call-site cache.
//!
//! Every call is keyed by its [`CallSignature`]. The first call of a signature
//! either runs through the reflective path and then compiles the call site,
//! or compiles it up front when `precompile` is set. Compiling transforms the
//! call into a [`Template`] that the site keeps. Every later call of the same
//! signature only reduces its arguments and binds them against that template:
//!
//! ```text
//! first:  CallExpr ──▶ reduce ──▶ transform ──▶ bind ──▶ method table ──▶ Value
//! cached: CallExpr ──▶ reduce ──▶ CompiledCallSite (template, invoker) ──▶ Value
//! ```
//!
//! Both the generic entry ([`InvocationEngine::invoke`]) and the typed entry
//! ([`InvocationEngine::invoke_typed`]) resolve to the same cache entry.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use super::call_site::{CallSignature, CompiledCallSite, Invoker};
use super::descriptor::{MethodTable, PayloadMethod, QueryMethod, Target};
use super::expr::CallExpr;
use super::method::ValueArgs;
use super::reduce::{Reduced, reduce};
use super::transform::{Template, transform};
use crate::error::{CompileError, CompileResult, EvalError, InvokeResult};
use crate::foundation::{Resolved, TypeKey};

/// Engine behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Compile call sites before their first call instead of after it.
    pub precompile: bool,
}

/// Counters describing cache activity.
///
/// `entries` and `compilations` cover command and event sites as well as
/// query sites; `query_sites` counts only the latter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub query_sites: usize,
    pub hits: u64,
    pub misses: u64,
    pub compilations: u64,
    pub reflective_calls: u64,
}

/// Compiles, caches and invokes handler methods.
pub struct InvocationEngine {
    options: EngineOptions,
    methods: RwLock<MethodTable>,
    cache: RwLock<HashMap<CallSignature, Arc<CompiledCallSite>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    compilations: AtomicU64,
    reflective_calls: AtomicU64,
}

impl InvocationEngine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            methods: RwLock::new(MethodTable::new()),
            cache: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            compilations: AtomicU64::new(0),
            reflective_calls: AtomicU64::new(0),
        }
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    // -------------------------------------------------------------------------
    // Method registration
    // -------------------------------------------------------------------------

    /// Registers a query method. Duplicates are rejected.
    pub fn register_query(&self, method: QueryMethod) -> CompileResult<()> {
        debug!(handler = %method.handler(), method = method.name(), "Registering query method");
        self.methods.write().insert(method)
    }

    pub fn has_query(&self, handler: TypeKey, method: &str) -> bool {
        self.methods.read().contains(handler, method)
    }

    pub fn query_method(&self, handler: TypeKey, method: &str) -> CompileResult<Arc<QueryMethod>> {
        self.methods.read().get(handler, method)
    }

    /// Compiles a call site for every registered query method.
    ///
    /// Returns the number of sites that were newly installed.
    pub fn precompile_all(&self) -> usize {
        let methods: Vec<_> = self.methods.read().iter().cloned().collect();
        let before = self.compilations.load(Ordering::Relaxed);
        for method in methods {
            let template = Template::identity(method.handler(), method.name(), method.arity());
            self.install(compile_query(&method, template, Vec::new()));
        }
        let installed = self.compilations.load(Ordering::Relaxed) - before;
        debug!(installed, "Precompiled query call sites");
        installed as usize
    }

    // -------------------------------------------------------------------------
    // Compilation
    // -------------------------------------------------------------------------

    /// Compiles a call site for `call` without installing it in the cache.
    pub fn compile(&self, call: &CallExpr) -> InvokeResult<CompiledCallSite> {
        let method = self.resolve_call(call)?;
        let reduced = reduce(call)?;
        Ok(compile_reduced(&method, &reduced))
    }

    fn resolve_call(&self, call: &CallExpr) -> InvokeResult<Arc<QueryMethod>> {
        let method = self.query_method(call.handler(), call.method())?;
        if call.arguments().len() != method.arity() {
            return Err(CompileError::ArityMismatch {
                method: call.method().to_string(),
                expected: method.arity(),
                actual: call.arguments().len(),
            }
            .into());
        }
        if let Some(index) = call.arguments().iter().find_map(|arg| arg.first_parameter()) {
            return Err(EvalError::UnboundParameter(index).into());
        }
        Ok(method)
    }

    /// Inserts a compiled site unless one already exists for its signature.
    fn install(&self, site: CompiledCallSite) -> Arc<CompiledCallSite> {
        let mut cache = self.cache.write();
        cache
            .entry(site.signature().clone())
            .or_insert_with(|| {
                self.compilations.fetch_add(1, Ordering::Relaxed);
                debug!(signature = %site.signature(), "Compiled call site");
                Arc::new(site)
            })
            .clone()
    }

    fn cached(&self, signature: &CallSignature) -> Option<Arc<CompiledCallSite>> {
        let site = self.cache.read().get(signature).cloned();
        match &site {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(%signature, "Call site cache hit");
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(%signature, "Call site cache miss");
            }
        }
        site
    }

    // -------------------------------------------------------------------------
    // Call shapes
    // -------------------------------------------------------------------------

    /// Invokes a query method through the generic shape.
    ///
    /// `handler` must be an instance of the call's handler type.
    pub fn invoke(&self, handler: &dyn Any, call: &CallExpr) -> InvokeResult<Value> {
        let method = self.resolve_call(call)?;
        let signature = method.signature();
        let reduced = reduce(call)?;

        let site = match self.cached(&signature) {
            Some(site) => site,
            None if !self.options.precompile => {
                let result = self.invoke_reflective(&method, handler, &reduced);
                self.install(compile_reduced(&method, &reduced));
                return result;
            }
            None => self.install(compile_reduced(&method, &reduced)),
        };

        let values = reduced
            .call
            .arguments()
            .iter()
            .map(|arg| arg.evaluate(&[]))
            .collect::<Result<Vec<_>, _>>()?;
        site.invoke_bound(handler, values)
    }

    /// Uncached call: a throwaway template, then the method table entry.
    fn invoke_reflective(
        &self,
        method: &QueryMethod,
        handler: &dyn Any,
        reduced: &Reduced,
    ) -> InvokeResult<Value> {
        self.reflective_calls.fetch_add(1, Ordering::Relaxed);
        trace!(signature = %method.signature(), "Reflective call");
        let transformed = transform(&reduced.call);
        let args = transformed.template.bind(transformed.arguments)?;
        method.invoke_reflective(handler, args)
    }

    /// Invokes a query method with exact static types.
    ///
    /// `Args` must match the method's parameter types and `R` its output.
    pub fn invoke_typed<H, Args, R>(&self, handler: &H, method: &str, args: Args) -> InvokeResult<R>
    where
        H: Any,
        Args: ValueArgs,
        R: Any,
    {
        let method = self.query_method(TypeKey::of::<H>(), method)?;
        method.check_typed::<Args, R>()?;

        let signature = method.signature();
        let site = match self.cached(&signature) {
            Some(site) => site,
            None => {
                let template = Template::identity(method.handler(), method.name(), method.arity());
                self.install(compile_query(&method, template, Vec::new()))
            }
        };
        site.typed::<H, Args, R>()?.call(handler, args)
    }

    /// Invokes a command or event method.
    pub fn invoke_payload(
        &self,
        method: &PayloadMethod,
        target: Target<'_>,
        extras: Vec<Resolved>,
    ) -> InvokeResult<()> {
        let signature = method.signature();
        let site = match self.cached(&signature) {
            Some(site) => site,
            None => self.install(CompiledCallSite::new(
                signature,
                Invoker::Payload(Arc::clone(method.invoker())),
                Vec::new(),
            )),
        };
        site.invoke_payload(target, extras)
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    pub fn call_site(&self, signature: &CallSignature) -> Option<Arc<CompiledCallSite>> {
        self.cache.read().get(signature).cloned()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.read().len()
    }

    /// Cached sites of query methods.
    pub fn query_sites(&self) -> usize {
        self.cache.read().values().filter(|site| site.is_query()).count()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.cache_len(),
            query_sites: self.query_sites(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            compilations: self.compilations.load(Ordering::Relaxed),
            reflective_calls: self.reflective_calls.load(Ordering::Relaxed),
        }
    }
}

impl Default for InvocationEngine {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

impl std::fmt::Debug for InvocationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationEngine")
            .field("options", &self.options)
            .field("methods", &self.methods.read().len())
            .field("stats", &self.stats())
            .finish()
    }
}

fn compile_query(
    method: &QueryMethod,
    template: Template,
    reduced_constants: Vec<Value>,
) -> CompiledCallSite {
    CompiledCallSite::new(
        method.signature(),
        Invoker::Value {
            generic: Arc::clone(method.generic()),
            typed: Arc::clone(method.typed()),
        },
        reduced_constants,
    )
    .with_template(template)
}

fn compile_reduced(method: &QueryMethod, reduced: &Reduced) -> CompiledCallSite {
    let template = transform(&reduced.call).template;
    compile_query(method, template, reduced.folded.clone())
}
