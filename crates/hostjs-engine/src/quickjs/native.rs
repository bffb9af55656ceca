//! Entry points QuickJS calls back into

use std::ffi::c_void;
use std::os::raw::c_int;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use rquickjs::qjs;

use crate::engine::{CallFrame, Engine, NativeCallback};
use crate::error::ErrorKind;
use crate::value::{ContextId, RawValue};

use super::QuickJs;
use super::tags::*;

/// A host function registered with the runtime.
#[derive(Clone)]
pub(super) struct NativeEntry {
    pub callback: NativeCallback,
    /// Owned units, released with the entry.
    pub data: Rc<[RawValue]>,
    pub ctx: ContextId,
    /// The function object itself, not owned.
    pub callee: qjs::JSValue,
}

unsafe fn engine_of<'a>(ctx: *mut qjs::JSContext) -> &'a QuickJs {
    unsafe { &*(qjs::JS_GetRuntimeOpaque(qjs::JS_GetRuntime(ctx)) as *const QuickJs) }
}

unsafe fn values<'a>(argc: c_int, argv: *mut qjs::JSValue) -> &'a [qjs::JSValue] {
    if argc <= 0 || argv.is_null() {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(argv, argc as usize) }
    }
}

/// `JSCFunctionData` behind every native function; the single data slot
/// holds the entry id.
pub(super) unsafe extern "C" fn call(
    ctx: *mut qjs::JSContext,
    this: qjs::JSValue,
    argc: c_int,
    argv: *mut qjs::JSValue,
    _magic: c_int,
    data: *mut qjs::JSValue,
) -> qjs::JSValue {
    let engine = unsafe { engine_of(ctx) };
    let id = unsafe { qjs::JS_VALUE_GET_INT(*data) } as u32;
    let args = unsafe { values(argc, argv) };
    match catch_unwind(AssertUnwindSafe(|| engine.dispatch(id, this, args))) {
        Ok(result) => result,
        Err(_) => {
            engine.throw_error(ErrorKind::InternalError, "native function panicked");
            exception()
        }
    }
}

/// Job body for `Engine::enqueue_job`: `argv[0]` called with the rest.
pub(super) unsafe extern "C" fn run_job(
    ctx: *mut qjs::JSContext,
    argc: c_int,
    argv: *mut qjs::JSValue,
) -> qjs::JSValue {
    let Some((func, args)) = unsafe { values(argc, argv) }.split_first() else {
        return undefined();
    };
    let mut args = args.to_vec();
    unsafe { qjs::JS_Call(ctx, *func, undefined(), args.len() as c_int, args.as_mut_ptr()) }
}

pub(super) unsafe extern "C" fn interrupt(_rt: *mut qjs::JSRuntime, opaque: *mut c_void) -> c_int {
    let engine = unsafe { &*(opaque as *const QuickJs) };
    if engine.quiet.get() {
        return 0;
    }
    let handler = engine.interrupt.borrow().clone();
    match handler {
        Some(handler) => catch_unwind(AssertUnwindSafe(|| handler())).map_or(1, c_int::from),
        None => 0,
    }
}

impl QuickJs {
    fn dispatch(&self, id: u32, this: qjs::JSValue, args: &[qjs::JSValue]) -> qjs::JSValue {
        let entry = self.natives.borrow().get(&id).cloned();
        let (Some(entry), Some(engine)) = (entry, self.this.upgrade()) else {
            self.throw_error(ErrorKind::InternalError, "native function is no longer available");
            return exception();
        };
        let call = ActiveCall::enter(self, &entry, this, args);
        let frame = CallFrame {
            engine: engine as Rc<dyn Engine>,
            ctx: entry.ctx,
            callee: call.callee,
            this: call.this,
            args: &call.args,
            data: &entry.data,
        };
        match (entry.callback)(&frame) {
            Ok(result) => self.into_js(result),
            Err(_) => exception(),
        }
    }
}

/// Host units taken for one native call, given back when it returns or
/// unwinds.
struct ActiveCall<'a> {
    engine: &'a QuickJs,
    callee: RawValue,
    this: RawValue,
    args: Vec<RawValue>,
}

impl<'a> ActiveCall<'a> {
    fn enter(
        engine: &'a QuickJs,
        entry: &NativeEntry,
        this: qjs::JSValue,
        args: &[qjs::JSValue],
    ) -> Self {
        engine.active.borrow_mut().push(entry.callee);
        let adopt = |value: qjs::JSValue| engine.adopt(engine.dup_js(value));
        Self {
            engine,
            callee: adopt(entry.callee),
            this: adopt(this),
            args: args.iter().map(|arg| adopt(*arg)).collect(),
        }
    }
}

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.engine.active.borrow_mut().pop();
        self.engine.free(self.callee);
        self.engine.free(self.this);
        for arg in &self.args {
            self.engine.free(*arg);
        }
    }
}
