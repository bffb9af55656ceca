//! Integration tests for contexts, async settlement and compiled units

use std::cell::Cell;
use std::rc::Rc;

use hostjs::promise::{make_error, resolve};
use hostjs::{Context, HostError, RuntimeConfig, Value};
use tracing_subscriber::filter::EnvFilter;

/// Route `RUST_LOG`-filtered logs to the test output.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Pending promise with its resolving functions.
fn deferred(ctx: &Context) -> (Value, Value, Value) {
    let capability = ctx.engine().new_promise_capability(ctx.id()).unwrap();
    (
        Value::from_owned(ctx, capability.promise),
        Value::from_owned(ctx, capability.resolve),
        Value::from_owned(ctx, capability.reject),
    )
}

#[test]
fn test_resolve_fulfilled_promise() {
    let ctx = Context::new().unwrap();
    let (promise, fulfil, _) = deferred(&ctx);
    fulfil
        .call(&[Value::from_json(&ctx, r#"{"rows":3}"#).unwrap()])
        .unwrap();

    let settled = resolve(&ctx, &promise).unwrap();
    assert_eq!(settled.to_json().unwrap(), r#"{"rows":3}"#);
}

#[test]
fn test_resolve_rejected_promise_as_data() {
    let ctx = Context::new().unwrap();
    let (promise, _, reject) = deferred(&ctx);
    reject.call(&[Value::new(&ctx, "boom").unwrap()]).unwrap();

    let settled = resolve(&ctx, &promise).unwrap();
    assert!(!settled.get("ok").unwrap().to::<bool>().unwrap());
    assert_eq!(settled.get("msg").unwrap().to::<String>().unwrap(), "boom");
}

#[test]
fn test_resolve_settles_after_later_jobs() {
    let ctx = Context::new().unwrap();
    let (inner, fulfil_inner, _) = deferred(&ctx);
    let (outer, fulfil_outer, _) = deferred(&ctx);
    fulfil_outer.call(std::slice::from_ref(&inner)).unwrap();
    fulfil_inner.call(&[Value::new(&ctx, 99).unwrap()]).unwrap();

    let settled = resolve(&ctx, &outer).unwrap();
    assert_eq!(settled.to::<i32>().unwrap(), 99);
}

#[test]
fn test_native_function_can_drain_promises() {
    let ctx = Context::new().unwrap();
    let (promise, _, reject) = deferred(&ctx);
    reject
        .call(&[Value::from_json(&ctx, r#"{"message":"denied"}"#).unwrap()])
        .unwrap();

    let wait = ctx
        .new_function("wait", |ctx: Context, pending: Value| {
            resolve(&ctx, &pending)
        })
        .unwrap();
    let result = wait.call(&[promise]).unwrap();
    assert_eq!(
        result.to_json().unwrap(),
        make_error(&ctx, "denied").unwrap().to_json().unwrap()
    );
}

#[test]
fn test_failing_reaction_does_not_stop_draining() {
    init_tracing();
    let ctx = Context::new().unwrap();
    let (first, fulfil_first, _) = deferred(&ctx);
    let (second, fulfil_second, _) = deferred(&ctx);

    let fail = ctx
        .new_function("fail", || -> Result<(), String> { Err("job failed".into()) })
        .unwrap();
    first.call_prop("then", &[fail]).unwrap();
    fulfil_first.call(&[]).unwrap();
    fulfil_second.call(&[Value::new(&ctx, "later").unwrap()]).unwrap();

    assert!(ctx.execute_jobs() >= 1);
    let settled = resolve(&ctx, &second).unwrap();
    assert_eq!(settled.to::<String>().unwrap(), "later");
}

#[test]
fn test_sibling_contexts_share_hidden_metadata() {
    let ctx = Context::new().unwrap();
    let sibling = ctx.new_sibling().unwrap();
    assert!(sibling.same_runtime(&ctx));
    assert!(!sibling.is_runtime_owner());

    let object = Value::new_object(&ctx).unwrap();
    object.add_hidden("owner", "root").unwrap();

    let seen = ctx.xfer_between_contexts(&object, &sibling).unwrap();
    assert!(seen.has_hidden("owner"));
    assert_eq!(sibling.hidden_entry_count(), 1);

    sibling.global().unwrap().add("marker", 1).unwrap();
    assert!(!ctx.global().unwrap().has("marker").unwrap());
}

#[test]
fn test_runtime_outlives_root_handle() {
    let value = {
        let ctx = Context::new().unwrap();
        Value::from_json(&ctx, r#"{"still":"here"}"#).unwrap()
    };
    assert_eq!(value.get("still").unwrap().to::<String>().unwrap(), "here");
}

#[test]
fn test_memory_ceiling_error_is_readable() {
    init_tracing();
    let ctx = Context::new().unwrap();
    ctx.engine()
        .set_memory_limit(Some(ctx.memory_usage() + 64 * 1024));

    let err = Value::new(&ctx, "x".repeat(1 << 20)).unwrap_err();
    assert!(matches!(err, HostError::Exception { ref message } if message.contains("out of memory")));

    ctx.engine().set_memory_limit(None);
    assert!(Value::new(&ctx, "fits now").is_ok());
}

#[test]
fn test_compile_dump_load_execute() {
    let ctx = Context::new().unwrap();
    let unit = ctx
        .compile("({greeting: 'hi', count: 1 + 1})", "config.js")
        .unwrap();
    let bytes = ctx.dump_function(&unit).unwrap();

    let restored = ctx.load_function(&bytes).unwrap();
    let value = ctx.call_compiled(&restored).unwrap();
    assert_eq!(value.get("count").unwrap().to::<u32>().unwrap(), 2);
    assert_eq!(value.get("greeting").unwrap().to::<String>().unwrap(), "hi");

    let err = ctx.load_function(&bytes[..3]).unwrap_err();
    assert!(err.is_exception());
}

#[test]
fn test_resolve_script_promise_chain() {
    let ctx = Context::new().unwrap();
    let promise = ctx
        .eval("Promise.resolve(20).then((n) => n + 1)", "chain.js")
        .unwrap();
    assert!(promise.is_object());

    let settled = resolve(&ctx, &promise).unwrap();
    assert_eq!(settled.to::<i32>().unwrap(), 21);
}

#[test]
fn test_resolve_script_thenable() {
    let ctx = Context::new().unwrap();
    let thenable = ctx
        .eval("({ then(resolve) { resolve(7); } })", "thenable.js")
        .unwrap();
    let settled = resolve(&ctx, &thenable).unwrap();
    assert_eq!(settled.to::<i32>().unwrap(), 7);
}

#[test]
fn test_script_error_carries_its_location() {
    let ctx = Context::new().unwrap();
    let err = ctx
        .eval("function run() { throw new Error('bad input'); }\nrun();", "thrower.js")
        .unwrap_err();
    let HostError::Exception { message } = err else {
        panic!("expected a script exception, got {err:?}");
    };
    assert!(message.contains("bad input"));
    assert!(message.contains("thrower.js"));
}

#[test]
fn test_interrupt_stops_running_script() {
    let stop = Rc::new(Cell::new(false));
    let flag = Rc::clone(&stop);
    let ctx = Context::builder()
        .interrupt_handler(move || flag.get())
        .build()
        .unwrap();
    assert_eq!(ctx.eval("1 + 1", "sum.js").unwrap().to::<i32>().unwrap(), 2);

    stop.set(true);
    let err = ctx.eval("for (;;) {}", "spin.js").unwrap_err();
    assert!(err.to_string().contains("interrupted"));

    stop.set(false);
    assert_eq!(ctx.eval("'alive'", "after.js").unwrap().to::<String>().unwrap(), "alive");
}

#[test]
fn test_config_from_json() {
    let config = RuntimeConfig::from_json(r#"{"strip_debug":true}"#).unwrap();
    assert!(config.strip_debug);
    assert_eq!(config.memory_limit, RuntimeConfig::default().memory_limit);

    let ctx = Context::with_config(config).unwrap();
    assert!(ctx.config().strip_debug);
}
