//! Synchronous settlement of thenables
//!
//! [`resolve`] blocks on a promise by draining the job queue. It only works
//! for computations the job queue can finish on its own: nothing here
//! drives timers, I/O or any other external event source.
//!
//! Rejections come back as data: `{ok: false, msg}`, built by
//! [`make_error`], not as a host error.

use tracing::debug;

use crate::context::Context;
use crate::error::HostResult;
use crate::value::Value;

/// Global stash slot holding the resolution shim.
const SHIM_SLOT: &str = "__hostjs_resolve";
/// Global stash slot: `true` once the thenable fulfilled.
const OK_SLOT: &str = "__hostjs_settled_ok";
/// Global stash slot: fulfilment value or rejection reason.
const VALUE_SLOT: &str = "__hostjs_settled_value";

/// Settle `value` synchronously.
///
/// Non-thenables are returned as they are after the job queue has been
/// drained. A thenable that rejects, or fulfils with an error object, yields
/// `{ok: false, msg}`; one that never settles yields
/// `{ok: false, msg: "undefined"}`.
pub fn resolve(ctx: &Context, value: &Value) -> HostResult<Value> {
    if !value.has("then")? {
        ctx.execute_jobs();
        return Ok(value.clone().detach());
    }

    let stash = ctx.global_stash();
    let shim = resolution_shim(ctx, &stash)?;
    stash.add(OK_SLOT, false)?;
    stash.add(VALUE_SLOT, ())?;

    shim.call(&[value.clone()])?;
    ctx.execute_jobs();

    let ok = stash.get(OK_SLOT)?.is_truthy();
    let settled = stash.get(VALUE_SLOT)?.detach();
    stash.add(VALUE_SLOT, ())?;

    if !ok || settled.is_error() {
        return make_error(ctx, &settled.to_error_message());
    }
    Ok(settled)
}

/// The context's resolution shim, created on first use.
fn resolution_shim(ctx: &Context, stash: &Value) -> HostResult<Value> {
    if stash.has(SHIM_SLOT)? {
        return Ok(stash.get(SHIM_SLOT)?.detach());
    }
    let shim = ctx.new_function("resolve", |ctx: Context, thenable: Value| -> HostResult<()> {
        let on_fulfilled =
            ctx.new_function("onFulfilled", |ctx: Context, value: Value| settle(&ctx, true, value))?;
        let on_rejected =
            ctx.new_function("onRejected", |ctx: Context, reason: Value| settle(&ctx, false, reason))?;
        thenable.call_prop("then", &[on_fulfilled, on_rejected])?;
        Ok(())
    })?;
    stash.add(SHIM_SLOT, &shim)?;
    debug!(ctx = %ctx.id(), "installed resolution shim");
    Ok(shim)
}

fn settle(ctx: &Context, ok: bool, value: Value) -> HostResult<()> {
    let stash = ctx.global_stash();
    stash.add(OK_SLOT, ok)?;
    stash.add(VALUE_SLOT, value)?;
    Ok(())
}

/// `{ok: false, msg}`
pub fn make_error(ctx: &Context, message: &str) -> HostResult<Value> {
    let result = Value::new_object(ctx)?;
    result.add("ok", false)?;
    result.add("msg", message)?;
    Ok(result)
}

/// `{ok: true}`
pub fn make_success(ctx: &Context) -> HostResult<Value> {
    let result = Value::new_object(ctx)?;
    result.add("ok", true)?;
    Ok(result)
}

/// `{ok: true, msg}`
pub fn make_success_with(ctx: &Context, message: &str) -> HostResult<Value> {
    let result = make_success(ctx)?;
    result.add("msg", message)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use hostjs_engine::ErrorKind;

    use super::*;

    /// A pending promise plus its resolving functions.
    fn deferred(ctx: &Context) -> (Value, Value, Value) {
        let capability = ctx.engine().new_promise_capability(ctx.id()).unwrap();
        (
            Value::from_owned(ctx, capability.promise),
            Value::from_owned(ctx, capability.resolve),
            Value::from_owned(ctx, capability.reject),
        )
    }

    #[test]
    fn test_plain_value_passes_through() {
        let ctx = Context::new().unwrap();
        let value = Value::new(&ctx, 42).unwrap();
        let resolved = resolve(&ctx, &value).unwrap();
        assert_eq!(resolved.to::<i32>().unwrap(), 42);
    }

    #[test]
    fn test_fulfilled_promise_yields_value() {
        let ctx = Context::new().unwrap();
        let (promise, fulfil, _) = deferred(&ctx);
        fulfil.call(&[Value::new(&ctx, "done").unwrap()]).unwrap();

        let resolved = resolve(&ctx, &promise).unwrap();
        assert_eq!(resolved.to::<String>().unwrap(), "done");
    }

    #[test]
    fn test_rejection_becomes_data() {
        let ctx = Context::new().unwrap();
        let (promise, _, reject) = deferred(&ctx);
        let error = ctx.engine().new_error(ErrorKind::Error, "boom").unwrap();
        reject.call(&[Value::from_owned(&ctx, error)]).unwrap();

        let resolved = resolve(&ctx, &promise).unwrap();
        assert_eq!(resolved.to_json().unwrap(), r#"{"ok":false,"msg":"boom"}"#);
    }

    #[test]
    fn test_pending_promise_reports_undefined() {
        let ctx = Context::new().unwrap();
        let (promise, _, _) = deferred(&ctx);
        let resolved = resolve(&ctx, &promise).unwrap();
        assert_eq!(
            resolved.to_json().unwrap(),
            r#"{"ok":false,"msg":"undefined"}"#
        );
    }

    #[test]
    fn test_shim_installed_once() {
        let ctx = Context::new().unwrap();
        for expected in 0..3 {
            let (promise, fulfil, _) = deferred(&ctx);
            fulfil.call(&[Value::new(&ctx, expected).unwrap()]).unwrap();
            let resolved = resolve(&ctx, &promise).unwrap();
            assert_eq!(resolved.to::<i32>().unwrap(), expected);
        }
        let stash = ctx.global_stash();
        assert!(stash.get(SHIM_SLOT).unwrap().is_function());
    }

    #[test]
    fn test_result_helpers() {
        let ctx = Context::new().unwrap();
        assert_eq!(make_success(&ctx).unwrap().to_json().unwrap(), r#"{"ok":true}"#);
        assert_eq!(
            make_success_with(&ctx, "saved").unwrap().to_json().unwrap(),
            r#"{"ok":true,"msg":"saved"}"#
        );
        assert_eq!(
            make_error(&ctx, "bad").unwrap().to_json().unwrap(),
            r#"{"ok":false,"msg":"bad"}"#
        );
    }
}
