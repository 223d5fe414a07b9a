//! Parameter hoisting.
//!
//! After reduction, every constant argument and every simple member access is
//! replaced with an open parameter. The resulting [`Template`] describes a
//! generic `(handler, arg0, arg1, ...) -> result` call that no longer depends
//! on one call's literal values, so it can share a compiled call site with
//! every other call of the same signature.

use serde::Serialize;
use serde_json::Value;

use super::expr::{CallExpr, Expr};
use crate::error::EvalError;
use crate::foundation::TypeKey;

/// Where a template parameter came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterOrigin {
    /// A literal argument.
    Constant,
    /// A member access on a captured value, e.g. `filter.page`.
    Member { path: String },
}

/// A parameter introduced by hoisting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateParameter {
    pub index: usize,
    pub origin: ParameterOrigin,
}

/// A call with its literal arguments lifted into parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    handler: TypeKey,
    method: String,
    parameters: Vec<TemplateParameter>,
    body: Vec<Expr>,
}

impl Template {
    pub fn handler(&self) -> TypeKey {
        self.handler
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Parameters in index order.
    pub fn parameters(&self) -> &[TemplateParameter] {
        &self.parameters
    }

    /// One expression per method argument, written over the parameters.
    pub fn body(&self) -> &[Expr] {
        &self.body
    }

    /// Number of method arguments the template supplies.
    pub fn arity(&self) -> usize {
        self.body.len()
    }

    /// `true` when argument `i` is exactly parameter `i` for every argument.
    pub fn is_identity(&self) -> bool {
        self.body
            .iter()
            .enumerate()
            .all(|(i, expr)| matches!(expr, Expr::Parameter(p) if *p == i))
    }

    /// A template passing `arity` parameters straight through.
    pub fn identity(handler: TypeKey, method: impl Into<String>, arity: usize) -> Self {
        Self {
            handler,
            method: method.into(),
            parameters: (0..arity)
                .map(|index| TemplateParameter {
                    index,
                    origin: ParameterOrigin::Constant,
                })
                .collect(),
            body: (0..arity).map(Expr::Parameter).collect(),
        }
    }

    /// Computes the method arguments from parameter values.
    pub fn bind(&self, values: Vec<Value>) -> Result<Vec<Value>, EvalError> {
        if self.is_identity() && values.len() == self.body.len() {
            return Ok(values);
        }
        self.body.iter().map(|expr| expr.evaluate(&values)).collect()
    }
}

/// A template together with the parameter values of the transformed call.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub template: Template,
    pub arguments: Vec<Value>,
}

/// Hoists constant and simple member-access arguments into parameters.
pub fn transform(call: &CallExpr) -> Transformed {
    let mut parameters = Vec::new();
    let mut arguments = Vec::new();

    let body = call
        .arguments()
        .iter()
        .map(|argument| match hoist(argument) {
            Some((value, origin)) => {
                let index = arguments.len();
                arguments.push(value);
                parameters.push(TemplateParameter { index, origin });
                Expr::Parameter(index)
            }
            None => argument.clone(),
        })
        .collect();

    Transformed {
        template: Template {
            handler: call.handler(),
            method: call.method().to_string(),
            parameters,
            body,
        },
        arguments,
    }
}

fn hoist(argument: &Expr) -> Option<(Value, ParameterOrigin)> {
    match argument {
        Expr::Constant(value) => Some((value.clone(), ParameterOrigin::Constant)),
        Expr::Captured { name, value } => Some((
            value.clone(),
            ParameterOrigin::Member { path: name.clone() },
        )),
        Expr::Member { .. } if argument.is_simple_member_access() => {
            let value = argument.evaluate(&[]).ok()?;
            let path = argument.member_path()?;
            Some((value, ParameterOrigin::Member { path }))
        }
        _ => None,
    }
}
