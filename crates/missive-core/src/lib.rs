//! # Missive Core
//!
//! Message model and dynamic invocation engine of the Missive dispatch
//! pipeline.
//!
//! ## Layers
//!
//! ### Foundation
//!
//! - **Messages**: the execution envelope and its status machine ([`Message`])
//! - **Type identity**: runtime keys for handler matching ([`TypeKey`])
//! - **Resolver port**: externally supplied dependencies ([`Resolver`], [`ServiceMap`])
//! - **Extensions**: typed per-dispatch scratch storage ([`Extensions`])
//!
//! ### Engine
//!
//! - **IR**: call expressions over JSON values ([`CallExpr`], [`Expr`])
//! - **Passes**: constant folding ([`reduce`]) and parameter hoisting ([`transform`])
//! - **Method shapes**: blanket traits over handler functions ([`HandlerFn`], [`QueryFn`])
//! - **Call sites**: compiled invokers cached per signature ([`InvocationEngine`])
//!
//! ```text
//! CallExpr ──▶ reduce ──▶ transform ──▶ CallSignature ──▶ CompiledCallSite
//!                                            │
//!                           miss ────────────┴──── hit
//!                    (reflective call, compile)   (cached invoker)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use missive_core::{CallExpr, EngineOptions, InvocationEngine, QueryMethod};
//!
//! struct Calculator;
//!
//! impl Calculator {
//!     fn sum(&self, a: i64, b: i64) -> i64 {
//!         a + b
//!     }
//! }
//!
//! let engine = InvocationEngine::new(EngineOptions::default());
//! engine.register_query(QueryMethod::new::<Calculator, _, _>("sum", Calculator::sum))?;
//!
//! let value = engine.invoke(&Calculator, &CallExpr::on::<Calculator>("sum").arg(2).arg(3))?;
//! let typed: i64 = engine.invoke_typed::<Calculator, (i64, i64), i64>(&Calculator, "sum", (2, 3))?;
//! ```

pub mod engine;
pub mod error;
pub mod foundation;

pub use engine::{
    BinaryOp, CacheStats, CallExpr, CallSignature, CompiledCallSite, EngineOptions, Expr,
    HandlerFn, InvocationEngine, Invoker, MethodOutput, MethodTable, PayloadInvoke,
    PayloadMethod, QueryFn, QueryMethod, SelfHandlerFn, Target, TypedInvoker, ValueArgs, reduce,
    transform,
};
pub use error::{
    BoxError, CompileError, CompileResult, ConfigurationError, EvalError, ExecutionError,
    InvokeError, InvokeResult, StatusError,
};
pub use foundation::{
    Content, EmptyResolver, Extensions, Message, MessageKind, MessageStatus, Resolved, Resolver,
    ServiceMap, TypeKey,
};
