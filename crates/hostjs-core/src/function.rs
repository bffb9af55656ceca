//! Native call boundary
//!
//! Any `Fn(A1, ..., An) -> R` with up to eight parameters becomes an
//! engine-callable function when each parameter implements [`FromArg`] and
//! the return type implements [`IntoReturn`]. A [`Context`] parameter is
//! filled with the calling context and does not consume an argument.
//!
//! ```
//! use hostjs::{Context, Value};
//!
//! let ctx = Context::new().unwrap();
//! let add = ctx.new_function("add", |a: i32, b: i32| a + b).unwrap();
//! let sum = add
//!     .call(&[Value::new(&ctx, 2).unwrap(), Value::new(&ctx, 3).unwrap()])
//!     .unwrap();
//! assert_eq!(sum.to::<i32>().unwrap(), 5);
//! ```
//!
//! Arguments are positional and arity is fixed: a call with more arguments
//! than positional parameters fails without running the body. Host
//! failures, `Err` returns and panics alike become a script-level
//! `InternalError` carrying the message; they never unwind into the engine.

use std::any::Any;
use std::fmt::Display;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use hostjs_engine::{CallFrame, Engine, EngineResult, ErrorKind, NativeCallback, RawValue};
use tracing::trace;

use crate::context::Context;
use crate::convert::{FromJs, IntoJs, Json};
use crate::error::{HostError, HostResult};
use crate::value::Value;

/// Binding of one native parameter.
pub trait FromArg: Sized {
    /// Whether the parameter consumes a positional argument.
    const POSITIONAL: bool = true;

    /// `arg` is the borrowed argument, `None` when the caller passed fewer.
    fn from_arg(ctx: &Context, arg: Option<RawValue>) -> HostResult<Self>;
}

impl FromArg for Context {
    const POSITIONAL: bool = false;

    fn from_arg(ctx: &Context, _arg: Option<RawValue>) -> HostResult<Self> {
        Ok(ctx.clone())
    }
}

impl FromArg for Value {
    fn from_arg(ctx: &Context, arg: Option<RawValue>) -> HostResult<Self> {
        Ok(match arg {
            Some(raw) => Value::from_raw(ctx, raw),
            None => Value::empty(ctx),
        })
    }
}

/// Absent and `undefined` arguments bind `None`. Wrapping a parameter that
/// consumes no argument (`Option<Context>`) always binds `Some`.
impl<T: FromArg> FromArg for Option<T> {
    const POSITIONAL: bool = T::POSITIONAL;

    fn from_arg(ctx: &Context, arg: Option<RawValue>) -> HostResult<Self> {
        if !T::POSITIONAL {
            return T::from_arg(ctx, arg).map(Some);
        }
        match arg {
            None | Some(RawValue::Undefined) => Ok(None),
            Some(_) => T::from_arg(ctx, arg).map(Some),
        }
    }
}

fn converted<T: FromJs>(ctx: &Context, arg: Option<RawValue>) -> HostResult<T> {
    Value::from_arg(ctx, arg)?.to::<T>()
}

macro_rules! impl_from_arg_via_from_js {
    ($($ty:ty),*) => {
        $(
            impl FromArg for $ty {
                fn from_arg(ctx: &Context, arg: Option<RawValue>) -> HostResult<Self> {
                    converted(ctx, arg)
                }
            }
        )*
    };
}

impl_from_arg_via_from_js!(bool, i32, u32, i64, u64, usize, f64, String, serde_json::Value);

impl<T: FromJs> FromArg for Vec<T> {
    fn from_arg(ctx: &Context, arg: Option<RawValue>) -> HostResult<Self> {
        converted(ctx, arg)
    }
}

impl<T: serde::de::DeserializeOwned> FromArg for Json<T> {
    fn from_arg(ctx: &Context, arg: Option<RawValue>) -> HostResult<Self> {
        converted(ctx, arg)
    }
}

/// What a native function may return.
pub trait IntoReturn {
    fn into_return(self, ctx: &Context) -> HostResult<RawValue>;
}

impl<T: IntoJs> IntoReturn for T {
    fn into_return(self, ctx: &Context) -> HostResult<RawValue> {
        self.into_js(ctx)
    }
}

/// `Err` is a host failure; its message reaches the script.
impl<T: IntoJs, E: Display> IntoReturn for Result<T, E> {
    fn into_return(self, ctx: &Context) -> HostResult<RawValue> {
        match self {
            Ok(value) => value.into_js(ctx),
            Err(err) => Err(HostError::internal(err.to_string())),
        }
    }
}

/// A Rust function callable from scripts; implemented for closures and
/// functions of up to eight [`FromArg`] parameters.
pub trait NativeFunction<Args, R>: 'static {
    /// Number of positional parameters.
    const ARITY: usize;

    fn invoke(&self, ctx: &Context, args: &[RawValue]) -> HostResult<R>;
}

macro_rules! impl_native_function {
    ($($arg:ident),*) => {
        impl<F, R, $($arg,)*> NativeFunction<($($arg,)*), R> for F
        where
            F: Fn($($arg),*) -> R + 'static,
            $($arg: FromArg,)*
        {
            const ARITY: usize = 0 $(+ <$arg as FromArg>::POSITIONAL as usize)*;

            #[allow(non_snake_case, unused_variables, unused_mut)]
            fn invoke(&self, ctx: &Context, args: &[RawValue]) -> HostResult<R> {
                let mut args = args.iter().copied();
                $(
                    let $arg = if <$arg as FromArg>::POSITIONAL {
                        <$arg as FromArg>::from_arg(ctx, args.next())?
                    } else {
                        <$arg as FromArg>::from_arg(ctx, None)?
                    };
                )*
                Ok(self($($arg),*))
            }
        }
    };
}

impl_native_function!();
impl_native_function!(A1);
impl_native_function!(A1, A2);
impl_native_function!(A1, A2, A3);
impl_native_function!(A1, A2, A3, A4);
impl_native_function!(A1, A2, A3, A4, A5);
impl_native_function!(A1, A2, A3, A4, A5, A6);
impl_native_function!(A1, A2, A3, A4, A5, A6, A7);
impl_native_function!(A1, A2, A3, A4, A5, A6, A7, A8);

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("native function panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("native function panicked: {message}")
    } else {
        "native function panicked".to_string()
    }
}

/// Entry point the engine calls for every wrapped function.
fn dispatch<F, Args, R>(frame: &CallFrame<'_>, function: &F) -> EngineResult<RawValue>
where
    F: NativeFunction<Args, R>,
    R: IntoReturn,
{
    let engine = &frame.engine;
    trace!(ctx = %frame.ctx, args = frame.args.len(), "native call");
    if frame.args.len() > F::ARITY {
        let error = HostError::TooManyArguments {
            expected: F::ARITY,
            got: frame.args.len(),
        };
        return Err(throw_host_error(&**engine, &error));
    }
    let ctx = match Context::view(Rc::clone(engine), frame.ctx) {
        Ok(ctx) => ctx,
        Err(error) => return Err(throw_host_error(&**engine, &error)),
    };

    let outcome = catch_unwind(AssertUnwindSafe(|| -> HostResult<RawValue> {
        ctx.execute_timeout_check()?;
        let this = Value::from_raw(&ctx, frame.this);
        ctx.push_this(&this)?;
        let _pop = scopeguard::guard(&ctx, |ctx| ctx.pop_this());
        function.invoke(&ctx, frame.args)?.into_return(&ctx)
    }));
    match outcome {
        Ok(Ok(raw)) => Ok(raw),
        Ok(Err(error)) => Err(throw_host_error(&**engine, &error)),
        Err(panic) => {
            let error = HostError::internal(panic_message(panic));
            Err(throw_host_error(&**engine, &error))
        }
    }
}

fn throw_host_error(engine: &dyn Engine, error: &HostError) -> hostjs_engine::PendingException {
    trace!(%error, "native call failed");
    let message = match error {
        HostError::Internal(message) => message.clone(),
        other => other.to_string(),
    };
    engine.throw_error(ErrorKind::InternalError, &message)
}

impl Context {
    /// Wrap a Rust function as a script function of this context.
    pub fn new_function<F, Args, R>(&self, name: &str, function: F) -> HostResult<Value>
    where
        F: NativeFunction<Args, R>,
        Args: 'static,
        R: IntoReturn + 'static,
    {
        let callback: NativeCallback =
            Rc::new(move |frame: &CallFrame<'_>| dispatch::<F, Args, R>(frame, &function));
        let engine = self.engine();
        let raw = self.check(engine.new_function(
            self.id(),
            name,
            F::ARITY as u32,
            callback,
            Vec::new(),
        ))?;
        Ok(Value::from_owned(self, raw))
    }

    /// Define a native function as a property of the global object.
    pub fn register_global<F, Args, R>(&self, name: &str, function: F) -> HostResult<()>
    where
        F: NativeFunction<Args, R>,
        Args: 'static,
        R: IntoReturn + 'static,
    {
        let function = self.new_function(name, function)?;
        self.global()?.add(name, function)?;
        Ok(())
    }
}
