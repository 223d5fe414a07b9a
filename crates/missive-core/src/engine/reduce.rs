//! Constant folding over call expressions.
//!
//! Captured values are turned into literals, member accesses on literals are
//! read, and binary operations whose operands both fold are evaluated once.
//! Anything that still depends on an open parameter is left in place.

use serde_json::Value;

use super::expr::{CallExpr, Expr, member_of};
use crate::error::EvalError;

/// Output of the reduction pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Reduced {
    /// The call with every closed sub-expression folded.
    pub call: CallExpr,
    /// Values produced by folding, in evaluation order.
    pub folded: Vec<Value>,
}

/// Folds every closed sub-expression of the call's arguments.
pub fn reduce(call: &CallExpr) -> Result<Reduced, EvalError> {
    let mut folded = Vec::new();
    let arguments = call
        .arguments()
        .iter()
        .map(|argument| reduce_expr(argument, &mut folded))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Reduced {
        call: call.with_arguments(arguments),
        folded,
    })
}

fn reduce_expr(expr: &Expr, folded: &mut Vec<Value>) -> Result<Expr, EvalError> {
    match expr {
        Expr::Constant(_) | Expr::Parameter(_) => Ok(expr.clone()),
        Expr::Captured { value, .. } => Ok(Expr::Constant(value.clone())),
        Expr::Member { target, field } => match reduce_expr(target, folded)? {
            Expr::Constant(value) => {
                let value = member_of(&value, field)?;
                folded.push(value.clone());
                Ok(Expr::Constant(value))
            }
            target => Ok(Expr::Member {
                target: Box::new(target),
                field: field.clone(),
            }),
        },
        Expr::Binary { op, lhs, rhs } => {
            let lhs = reduce_expr(lhs, folded)?;
            let rhs = reduce_expr(rhs, folded)?;
            match (&lhs, &rhs) {
                (Expr::Constant(a), Expr::Constant(b)) => {
                    let value = op.apply(a, b)?;
                    folded.push(value.clone());
                    Ok(Expr::Constant(value))
                }
                _ => Ok(Expr::Binary {
                    op: *op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                }),
            }
        }
    }
}
