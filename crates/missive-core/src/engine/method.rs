//! Function shapes that can be registered as handler methods.
//!
//! Handler methods are plain Rust methods. The traits in this module are
//! implemented for every function of a supported shape, for 0 to 12 extra
//! parameters, in the same way extractor-based web frameworks implement
//! their handler traits:
//!
//! - [`HandlerFn`]: `fn(&H, &mut C, A1, .., An) -> O` for container handlers
//!   of commands and events. `A1..An` are owned values supplied by the
//!   resolver.
//! - [`SelfHandlerFn`]: `fn(&mut C, A1, .., An) -> O` for payloads that handle
//!   themselves.
//! - [`QueryFn`]: `fn(&H, A1, .., An) -> O` for query methods. The arguments
//!   are deserialized from JSON and the output is serialized back.
//!
//! The `Marker` parameter is a function pointer type naming the argument and
//! output types. It only exists to keep the implementations apart.

use std::any::{Any, type_name};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{BoxError, ExecutionError, InvokeError, InvokeResult};
use crate::foundation::{Resolved, TypeKey};

// =============================================================================
// Method Output
// =============================================================================

/// A value a handler method may return.
///
/// `Result<T, E>` separates the handler's failure from its value; every other
/// output is a success.
pub trait MethodOutput: 'static {
    /// The successful value.
    type Ok: 'static;

    fn into_result(self) -> Result<Self::Ok, ExecutionError>;
}

macro_rules! impl_plain_output {
    ($($ty:ty),* $(,)?) => {
        $(
            impl MethodOutput for $ty {
                type Ok = Self;

                fn into_result(self) -> Result<Self, ExecutionError> {
                    Ok(self)
                }
            }
        )*
    };
}

impl_plain_output!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
    Value,
);

impl<T: 'static> MethodOutput for Option<T> {
    type Ok = Self;

    fn into_result(self) -> Result<Self, ExecutionError> {
        Ok(self)
    }
}

impl<T: 'static> MethodOutput for Vec<T> {
    type Ok = Self;

    fn into_result(self) -> Result<Self, ExecutionError> {
        Ok(self)
    }
}

impl<T, E> MethodOutput for Result<T, E>
where
    T: 'static,
    E: Into<BoxError> + 'static,
{
    type Ok = T;

    fn into_result(self) -> Result<T, ExecutionError> {
        self.map_err(ExecutionError::new)
    }
}

// =============================================================================
// Argument Conversion
// =============================================================================

/// A tuple of query arguments that can be built from JSON values.
pub trait ValueArgs: Sized + 'static {
    /// Number of elements in the tuple.
    const ARITY: usize;

    /// Types of the tuple elements, in order.
    fn param_types() -> Vec<TypeKey>;

    /// Deserializes each value into the matching element.
    fn from_values(values: Vec<Value>) -> InvokeResult<Self>;
}

fn check_arity(expected: usize, actual: usize) -> InvokeResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(InvokeError::Arity { expected, actual })
    }
}

/// Takes a resolved extra parameter out of its box.
pub fn take_extra<T: Any>(extra: Option<Resolved>, position: usize) -> InvokeResult<T> {
    let Some(extra) = extra else {
        return Err(InvokeError::Argument {
            position,
            expected: type_name::<T>(),
            reason: "no value was supplied".to_string(),
        });
    };
    extra
        .downcast::<T>()
        .map(|value| *value)
        .map_err(|_| InvokeError::Argument {
            position,
            expected: type_name::<T>(),
            reason: "resolved value has a different type".to_string(),
        })
}

fn take_value<T: DeserializeOwned>(value: Option<Value>, position: usize) -> InvokeResult<T> {
    let value = value.unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| InvokeError::Argument {
        position,
        expected: type_name::<T>(),
        reason: e.to_string(),
    })
}

// =============================================================================
// Method Traits
// =============================================================================

/// A container method handling a `C` payload on a `&H` instance.
pub trait HandlerFn<H, C, Marker>: Send + Sync + 'static {
    /// Types of the parameters after the payload.
    fn extra_params() -> Vec<TypeKey>;

    /// Type of the successful output.
    fn output() -> TypeKey;

    /// Calls the method. `extras` must hold one value per extra parameter.
    fn call(&self, handler: &H, content: &mut C, extras: Vec<Resolved>) -> InvokeResult<()>;
}

/// A method of the payload type itself.
pub trait SelfHandlerFn<C, Marker>: Send + Sync + 'static {
    fn extra_params() -> Vec<TypeKey>;

    fn output() -> TypeKey;

    fn call(&self, content: &mut C, extras: Vec<Resolved>) -> InvokeResult<()>;
}

/// A query method on a `&H` instance.
pub trait QueryFn<H, Marker>: Send + Sync + 'static {
    /// The argument tuple.
    type Args: ValueArgs;
    /// The successful output.
    type Output: Serialize + 'static;

    fn call(&self, handler: &H, args: Self::Args) -> Result<Self::Output, ExecutionError>;
}

macro_rules! count {
    () => { 0usize };
    ($head:ident $($tail:ident)*) => { 1usize + count!($($tail)*) };
}

macro_rules! impl_method_fns {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, H, C, O, $($ty,)*> HandlerFn<H, C, fn($($ty,)*) -> O> for F
        where
            F: Fn(&H, &mut C, $($ty,)*) -> O + Send + Sync + 'static,
            H: 'static,
            C: 'static,
            O: MethodOutput,
            $( $ty: Any, )*
        {
            fn extra_params() -> Vec<TypeKey> {
                vec![$(TypeKey::of::<$ty>()),*]
            }

            fn output() -> TypeKey {
                TypeKey::of::<O::Ok>()
            }

            fn call(&self, handler: &H, content: &mut C, extras: Vec<Resolved>) -> InvokeResult<()> {
                check_arity(count!($($ty)*), extras.len())?;
                let mut extras = extras.into_iter();
                let mut position = 0usize;
                $(
                    position += 1;
                    let $ty = take_extra::<$ty>(extras.next(), position)?;
                )*

                (self)(handler, content, $($ty,)*)
                    .into_result()
                    .map(drop)
                    .map_err(InvokeError::Handler)
            }
        }

        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, C, O, $($ty,)*> SelfHandlerFn<C, fn($($ty,)*) -> O> for F
        where
            F: Fn(&mut C, $($ty,)*) -> O + Send + Sync + 'static,
            C: 'static,
            O: MethodOutput,
            $( $ty: Any, )*
        {
            fn extra_params() -> Vec<TypeKey> {
                vec![$(TypeKey::of::<$ty>()),*]
            }

            fn output() -> TypeKey {
                TypeKey::of::<O::Ok>()
            }

            fn call(&self, content: &mut C, extras: Vec<Resolved>) -> InvokeResult<()> {
                check_arity(count!($($ty)*), extras.len())?;
                let mut extras = extras.into_iter();
                let mut position = 0usize;
                $(
                    position += 1;
                    let $ty = take_extra::<$ty>(extras.next(), position)?;
                )*

                (self)(content, $($ty,)*)
                    .into_result()
                    .map(drop)
                    .map_err(InvokeError::Handler)
            }
        }

        #[allow(non_snake_case)]
        impl<F, H, O, $($ty,)*> QueryFn<H, fn($($ty,)*) -> O> for F
        where
            F: Fn(&H, $($ty,)*) -> O + Send + Sync + 'static,
            H: 'static,
            O: MethodOutput,
            O::Ok: Serialize,
            $( $ty: DeserializeOwned + 'static, )*
        {
            type Args = ($($ty,)*);
            type Output = O::Ok;

            fn call(&self, handler: &H, args: Self::Args) -> Result<Self::Output, ExecutionError> {
                let ($($ty,)*) = args;
                (self)(handler, $($ty,)*).into_result()
            }
        }

        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<$($ty,)*> ValueArgs for ($($ty,)*)
        where
            $( $ty: DeserializeOwned + 'static, )*
        {
            const ARITY: usize = count!($($ty)*);

            fn param_types() -> Vec<TypeKey> {
                vec![$(TypeKey::of::<$ty>()),*]
            }

            fn from_values(values: Vec<Value>) -> InvokeResult<Self> {
                check_arity(Self::ARITY, values.len())?;
                let mut values = values.into_iter();
                let mut position = 0usize;
                $(
                    position += 1;
                    let $ty = take_value::<$ty>(values.next(), position - 1)?;
                )*
                Ok(($($ty,)*))
            }
        }
    };
}

impl_method_fns!();
impl_method_fns!(T1);
impl_method_fns!(T1, T2);
impl_method_fns!(T1, T2, T3);
impl_method_fns!(T1, T2, T3, T4);
impl_method_fns!(T1, T2, T3, T4, T5);
impl_method_fns!(T1, T2, T3, T4, T5, T6);
impl_method_fns!(T1, T2, T3, T4, T5, T6, T7);
impl_method_fns!(T1, T2, T3, T4, T5, T6, T7, T8);
impl_method_fns!(T1, T2, T3, T4, T5, T6, T7, T8, T9);
impl_method_fns!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10);
impl_method_fns!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11);
impl_method_fns!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12);
