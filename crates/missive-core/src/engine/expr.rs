//! The intermediate representation of a handler call.
//!
//! A [`CallExpr`] names a handler type, a method and a list of argument
//! expressions. Arguments are small [`Expr`] trees over JSON values, which
//! lets the engine fold constant sub-expressions and hoist literals into
//! template parameters before it looks up a compiled call site.
//!
//! ```rust,ignore
//! let filter = json!({ "page": 2, "size": 25 });
//! let call = CallExpr::on::<UserQueries>("list_users")
//!     .arg(Expr::captured("filter", filter.clone()).member("page") * 10)
//!     .arg("active");
//! ```

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::ops;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::EvalError;
use crate::foundation::TypeKey;

// =============================================================================
// Operators
// =============================================================================

/// A binary operator over JSON values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }

    /// Applies the operator to two values.
    ///
    /// Integer arithmetic is checked; `+` also concatenates strings.
    pub fn apply(self, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
        match self {
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Rem => {
                self.arithmetic(lhs, rhs)
            }
            Self::Eq => Ok(Value::Bool(lhs == rhs)),
            Self::Ne => Ok(Value::Bool(lhs != rhs)),
            Self::Lt | Self::Le | Self::Gt | Self::Ge => self.compare(lhs, rhs),
            Self::And | Self::Or => match (lhs, rhs) {
                (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(if self == Self::And {
                    *a && *b
                } else {
                    *a || *b
                })),
                _ => Err(self.mismatch(lhs, rhs)),
            },
        }
    }

    fn arithmetic(self, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
        if let (Self::Add, Value::String(a), Value::String(b)) = (self, lhs, rhs) {
            return Ok(Value::String(format!("{a}{b}")));
        }
        let (Value::Number(a), Value::Number(b)) = (lhs, rhs) else {
            return Err(self.mismatch(lhs, rhs));
        };

        if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
            let result = match self {
                Self::Add => a.checked_add(b),
                Self::Sub => a.checked_sub(b),
                Self::Mul => a.checked_mul(b),
                Self::Div | Self::Rem if b == 0 => return Err(EvalError::DivisionByZero),
                Self::Div => a.checked_div(b),
                Self::Rem => a.checked_rem(b),
                _ => return Err(self.mismatch(lhs, rhs)),
            };
            return result
                .map(Value::from)
                .ok_or(EvalError::Overflow { op: self });
        }

        let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
            return Err(self.mismatch(lhs, rhs));
        };
        let result = match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
            Self::Rem => a % b,
            _ => return Err(self.mismatch(lhs, rhs)),
        };
        Number::from_f64(result)
            .map(Value::Number)
            .ok_or(EvalError::NonFinite { op: self })
    }

    fn compare(self, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
        let ordering = match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b)),
            },
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        };
        let ordering = ordering.ok_or_else(|| self.mismatch(lhs, rhs))?;
        let holds = match self {
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            _ => ordering != Ordering::Less,
        };
        Ok(Value::Bool(holds))
    }

    fn mismatch(self, lhs: &Value, rhs: &Value) -> EvalError {
        EvalError::TypeMismatch {
            op: self,
            lhs: json_type(lhs),
            rhs: json_type(rhs),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Reads `field` from an object, or an index from an array.
pub(crate) fn member_of(value: &Value, field: &str) -> Result<Value, EvalError> {
    let found = match value {
        Value::Object(map) => map.get(field),
        Value::Array(items) => field.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    };
    found.cloned().ok_or_else(|| EvalError::MissingMember {
        field: field.to_string(),
    })
}

// =============================================================================
// Expressions
// =============================================================================

/// An argument expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// A literal value.
    Constant(Value),
    /// An open template parameter, bound at call time.
    Parameter(usize),
    /// A value captured from the caller's scope.
    Captured { name: String, value: Value },
    /// Field access on another expression.
    Member { target: Box<Expr>, field: String },
    /// A binary operation.
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn constant(value: impl Into<Value>) -> Self {
        Self::Constant(value.into())
    }

    pub fn parameter(index: usize) -> Self {
        Self::Parameter(index)
    }

    /// A named value captured from the caller's scope.
    pub fn captured(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Captured {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Accesses `field` on this expression.
    pub fn member(self, field: impl Into<String>) -> Self {
        Self::Member {
            target: Box::new(self),
            field: field.into(),
        }
    }

    pub fn binary(self, op: BinaryOp, rhs: impl Into<Expr>) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(self),
            rhs: Box::new(rhs.into()),
        }
    }

    pub fn equals(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Eq, rhs)
    }

    pub fn not_equals(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ne, rhs)
    }

    pub fn less_than(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, rhs)
    }

    pub fn less_or_equal(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, rhs)
    }

    pub fn greater_than(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, rhs)
    }

    pub fn greater_or_equal(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, rhs)
    }

    pub fn and(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::And, rhs)
    }

    pub fn or(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Or, rhs)
    }

    /// Returns the literal if this is a constant.
    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            Self::Constant(value) => Some(value),
            _ => None,
        }
    }

    /// A chain of member accesses rooted at a captured value or constant.
    pub fn is_simple_member_access(&self) -> bool {
        match self {
            Self::Member { target, .. } => match target.as_ref() {
                Self::Captured { .. } | Self::Constant(_) => true,
                inner => inner.is_simple_member_access(),
            },
            _ => false,
        }
    }

    /// The dotted path of a member access, e.g. `filter.page`.
    pub fn member_path(&self) -> Option<String> {
        match self {
            Self::Captured { name, .. } => Some(name.clone()),
            Self::Constant(_) => Some(String::new()),
            Self::Member { target, field } => {
                let root = target.member_path()?;
                Some(if root.is_empty() {
                    field.clone()
                } else {
                    format!("{root}.{field}")
                })
            }
            _ => None,
        }
    }

    /// The lowest parameter index referenced by this expression.
    pub fn first_parameter(&self) -> Option<usize> {
        match self {
            Self::Parameter(index) => Some(*index),
            Self::Constant(_) | Self::Captured { .. } => None,
            Self::Member { target, .. } => target.first_parameter(),
            Self::Binary { lhs, rhs, .. } => match (lhs.first_parameter(), rhs.first_parameter()) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            },
        }
    }

    /// Evaluates the expression with the given parameter values.
    pub fn evaluate(&self, params: &[Value]) -> Result<Value, EvalError> {
        match self {
            Self::Constant(value) | Self::Captured { value, .. } => Ok(value.clone()),
            Self::Parameter(index) => params
                .get(*index)
                .cloned()
                .ok_or(EvalError::UnboundParameter(*index)),
            Self::Member { target, field } => member_of(&target.evaluate(params)?, field),
            Self::Binary { op, lhs, rhs } => op.apply(&lhs.evaluate(params)?, &rhs.evaluate(params)?),
        }
    }
}

macro_rules! impl_expr_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Expr {
                fn from(value: $ty) -> Self {
                    Self::Constant(Value::from(value))
                }
            }
        )*
    };
}

impl_expr_from!(
    bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, String, &str, Value
);

macro_rules! impl_expr_op {
    ($($trait:ident :: $method:ident => $op:ident),* $(,)?) => {
        $(
            impl<R: Into<Expr>> ops::$trait<R> for Expr {
                type Output = Expr;

                fn $method(self, rhs: R) -> Expr {
                    self.binary(BinaryOp::$op, rhs)
                }
            }
        )*
    };
}

impl_expr_op!(
    Add::add => Add,
    Sub::sub => Sub,
    Mul::mul => Mul,
    Div::div => Div,
    Rem::rem => Rem,
);

// =============================================================================
// Call Expressions
// =============================================================================

/// A call of `method` on a handler type with argument expressions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallExpr {
    handler: TypeKey,
    method: String,
    arguments: Vec<Expr>,
}

impl CallExpr {
    /// Starts a call of `method` on handler type `H`.
    pub fn on<H: Any>(method: impl Into<String>) -> Self {
        Self::new(TypeKey::of::<H>(), method)
    }

    pub fn new(handler: TypeKey, method: impl Into<String>) -> Self {
        Self {
            handler,
            method: method.into(),
            arguments: Vec::new(),
        }
    }

    /// Appends an argument.
    pub fn arg(mut self, argument: impl Into<Expr>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    pub fn handler(&self) -> TypeKey {
        self.handler
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn arguments(&self) -> &[Expr] {
        &self.arguments
    }

    /// Returns the same call with different arguments.
    pub fn with_arguments(&self, arguments: Vec<Expr>) -> Self {
        Self {
            handler: self.handler,
            method: self.method.clone(),
            arguments,
        }
    }
}

impl fmt::Display for CallExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}::{}/{}",
            self.handler.short_name(),
            self.method,
            self.arguments.len()
        )
    }
}
