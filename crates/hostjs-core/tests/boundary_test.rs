//! Integration tests for the native call boundary

use std::cell::Cell;
use std::rc::Rc;

use hostjs::{Context, HostError, HostResult, Json, Value};
use serde::{Deserialize, Serialize};

fn args(ctx: &Context, values: &[i32]) -> Vec<Value> {
    values.iter().map(|n| Value::new(ctx, *n).unwrap()).collect()
}

#[test]
fn test_extra_arguments_fail_without_running_body() {
    let ctx = Context::new().unwrap();
    let calls = Rc::new(Cell::new(0));
    let seen = Rc::clone(&calls);
    let one = ctx
        .new_function("one", move |n: i32| {
            seen.set(seen.get() + 1);
            n
        })
        .unwrap();

    let err = one.call(&args(&ctx, &[1, 2])).unwrap_err();
    assert_eq!(
        err.to_string(),
        "too many arguments: expected at most 1, got 2"
    );
    assert_eq!(calls.get(), 0);

    assert_eq!(one.call(&args(&ctx, &[9])).unwrap().to::<i32>().unwrap(), 9);
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_optional_trailing_parameters() {
    let ctx = Context::new().unwrap();
    let describe = ctx
        .new_function("describe", |name: String, age: Option<i32>| match age {
            Some(age) => format!("{name} ({age})"),
            None => name,
        })
        .unwrap();

    let name = Value::new(&ctx, "ada").unwrap();
    let short = describe.call(std::slice::from_ref(&name)).unwrap();
    assert_eq!(short.to::<String>().unwrap(), "ada");

    let full = describe
        .call(&[name, Value::new(&ctx, 36).unwrap()])
        .unwrap();
    assert_eq!(full.to::<String>().unwrap(), "ada (36)");
}

#[test]
fn test_context_parameter_consumes_no_argument() {
    let ctx = Context::new().unwrap();
    let depth = ctx
        .new_function("depth", |ctx: Context, extra: i32| {
            ctx.this_depth() as i32 + extra
        })
        .unwrap();
    let result = depth.call(&args(&ctx, &[10])).unwrap();
    assert_eq!(result.to::<i32>().unwrap(), 11);
}

#[test]
fn test_host_error_becomes_script_exception() {
    let ctx = Context::new().unwrap();
    let fail = ctx
        .new_function("fail", |reason: String| -> HostResult<()> {
            Err(HostError::internal(reason))
        })
        .unwrap();
    let err = fail.call(&[Value::new(&ctx, "boom").unwrap()]).unwrap_err();
    assert!(err.is_exception());
    assert_eq!(err.to_string(), "boom");
    assert_eq!(ctx.this_depth(), 0);
}

#[test]
fn test_argument_conversion_failure_is_reported() {
    let ctx = Context::new().unwrap();
    let double = ctx.new_function("double", |n: i32| n * 2).unwrap();
    let err = double
        .call(&[Value::new(&ctx, "two").unwrap()])
        .unwrap_err();
    assert_eq!(err.to_string(), "type mismatch: expected number, got string");
}

#[test]
fn test_panic_keeps_this_stack_balanced() {
    let ctx = Context::new().unwrap();
    let explode = ctx
        .new_function("explode", || -> i32 { panic!("kaboom") })
        .unwrap();
    let receiver = Value::new_object(&ctx).unwrap();

    let err = explode.call_with_this(&receiver, &[]).unwrap_err();
    assert_eq!(err.to_string(), "native function panicked: kaboom");
    assert_eq!(ctx.this_depth(), 0);
    assert!(ctx.current_this().is_undefined());
}

#[test]
fn test_nested_calls_see_their_own_receiver() {
    let ctx = Context::new().unwrap();
    let inner = ctx
        .new_function("inner", |ctx: Context| -> HostResult<String> {
            assert_eq!(ctx.this_depth(), 2);
            ctx.current_this().get("name")?.to::<String>()
        })
        .unwrap();
    let outer = ctx
        .new_function(
            "outer",
            |ctx: Context, inner: Value| -> HostResult<String> {
                let nested = Value::from_json(&ctx, r#"{"name":"inner"}"#)?;
                let from_inner = inner.call_with_this(&nested, &[])?.to::<String>()?;
                let own = ctx.current_this().get("name")?.to::<String>()?;
                Ok(format!("{own}/{from_inner}"))
            },
        )
        .unwrap();

    let receiver = Value::from_json(&ctx, r#"{"name":"outer"}"#).unwrap();
    let result = outer.call_with_this(&receiver, &[inner]).unwrap();
    assert_eq!(result.to::<String>().unwrap(), "outer/inner");
    assert_eq!(ctx.this_depth(), 0);
}

#[test]
fn test_interrupt_aborts_at_call_entry() {
    let stop = Rc::new(Cell::new(false));
    let flag = Rc::clone(&stop);
    let ctx = Context::builder()
        .interrupt_handler(move || flag.get())
        .build()
        .unwrap();
    let ping = ctx.new_function("ping", || "pong").unwrap();

    assert_eq!(ping.call(&[]).unwrap().to::<String>().unwrap(), "pong");

    stop.set(true);
    let err = ping.call(&[]).unwrap_err();
    assert!(err.to_string().contains("interrupted"));
    assert!(ctx.execute_timeout_check().is_err());
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Order {
    id: u32,
    items: Vec<String>,
}

#[test]
fn test_serde_arguments_and_returns() {
    let ctx = Context::new().unwrap();
    let tag = ctx
        .new_function("tag", |Json(mut order): Json<Order>| {
            order.items.push("gift-wrap".to_string());
            Json(order)
        })
        .unwrap();
    let input = Value::from_json(&ctx, r#"{"id":7,"items":["book"]}"#).unwrap();
    let output = tag.call(&[input]).unwrap();
    assert_eq!(
        output.to::<Json<Order>>().unwrap().0,
        Order {
            id: 7,
            items: vec!["book".to_string(), "gift-wrap".to_string()],
        }
    );
}

#[test]
fn test_call_prop_on_non_function() {
    let ctx = Context::new().unwrap();
    let object = Value::from_json(&ctx, r#"{"run":1}"#).unwrap();
    assert!(matches!(
        object.call_prop("run", &[]),
        Err(HostError::TypeMismatch { .. })
    ));
}

#[test]
fn test_values_from_another_runtime_are_rejected() {
    let home = Context::new().unwrap();
    let away = Context::new().unwrap();

    let who = home
        .new_function("who", |value: Value| value.get("who")?.to::<String>())
        .unwrap();
    let local = Value::from_json(&home, r#"{"who":"local"}"#).unwrap();
    let foreign = Value::from_json(&away, r#"{"who":"foreign"}"#).unwrap();

    let name = who.call(std::slice::from_ref(&local)).unwrap();
    assert_eq!(name.to::<String>().unwrap(), "local");
    assert!(matches!(
        who.call(std::slice::from_ref(&foreign)),
        Err(HostError::ContextMismatch)
    ));
    assert!(matches!(
        who.call_with_this(&foreign, &[]),
        Err(HostError::ContextMismatch)
    ));
    assert_eq!(home.this_depth(), 0);
}

#[test]
fn test_sibling_values_cross_freely() {
    let ctx = Context::new().unwrap();
    let sibling = ctx.new_sibling().unwrap();
    let length = ctx
        .new_function("length", |items: Vec<i32>| items.len())
        .unwrap();
    let items = Value::from_json(&sibling, "[1,2,3]").unwrap();
    let result = length.call(&[items]).unwrap();
    assert_eq!(result.to::<usize>().unwrap(), 3);
}
