//! Dynamic invocation engine.
//!
//! Call expressions are reduced, turned into parameterized templates and
//! dispatched through compiled call sites cached per signature.

pub mod call_site;
pub mod descriptor;
pub mod expr;
pub mod invocation;
pub mod method;
pub mod reduce;
pub mod transform;

pub use call_site::{CallSignature, CompiledCallSite, Invoker};
pub use descriptor::{
    GenericInvoker, MethodTable, PayloadInvoke, PayloadMethod, QueryMethod, Target, TypedInvoker,
};
pub use expr::{BinaryOp, CallExpr, Expr};
pub use invocation::{CacheStats, EngineOptions, InvocationEngine};
pub use method::{HandlerFn, MethodOutput, QueryFn, SelfHandlerFn, ValueArgs, take_extra};
pub use reduce::{Reduced, reduce};
pub use transform::{ParameterOrigin, Template, TemplateParameter, Transformed, transform};
