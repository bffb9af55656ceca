//! QuickJS-backed engine
//!
//! [`QuickJs`] drives one QuickJS runtime through the raw `rquickjs::qjs`
//! bindings. Host-held values live in a handle table: each boxed value has
//! one slot holding a single QuickJS reference, and a `RawValue::Ref` names
//! that slot. Reference counts reported to the host add the units in the
//! slot to the references QuickJS holds internally.
//!
//! Operations that take no context run in the primary context, which is
//! also the one handed out by the first [`Engine::new_context`] call.

mod native;
mod table;
mod tags;

use std::cell::{Cell, RefCell};
use std::ffi::{CStr, CString, c_void};
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::rc::{Rc, Weak};

use rquickjs::qjs;
use rustc_hash::FxHashMap;

use crate::engine::{Engine, InterruptHandler, NativeCallback, PromiseCapability};
use crate::error::{AllocationError, EngineResult, ErrorKind, PendingException};
use crate::value::{ContextId, ObjectId, PropertyKey, RawValue, ValueType};

use self::native::NativeEntry;
use self::table::Table;
use self::tags::*;

const PRIMARY: ContextId = ContextId(0);

/// `JS_WRITE_OBJ_STRIP_SOURCE | JS_WRITE_OBJ_STRIP_DEBUG`
const WRITE_STRIP: c_int = (1 << 4) | (1 << 5);

/// Script helpers captured before any user code runs.
const HELPERS: &CStr = c"[Array.isArray, Object.keys, (value) => typeof value]";

struct Helpers {
    is_array: qjs::JSValue,
    keys: qjs::JSValue,
    type_of: qjs::JSValue,
}

impl Helpers {
    unsafe fn new(ctx: *mut qjs::JSContext) -> Option<Self> {
        unsafe {
            let list = qjs::JS_Eval(
                ctx,
                HELPERS.as_ptr(),
                HELPERS.to_bytes().len() as _,
                c"<hostjs>".as_ptr(),
                qjs::JS_EVAL_TYPE_GLOBAL as c_int,
            );
            if is_exception(list) {
                return None;
            }
            let helpers = Self {
                is_array: qjs::JS_GetPropertyUint32(ctx, list, 0),
                keys: qjs::JS_GetPropertyUint32(ctx, list, 1),
                type_of: qjs::JS_GetPropertyUint32(ctx, list, 2),
            };
            qjs::JS_FreeValue(ctx, list);
            Some(helpers)
        }
    }

    unsafe fn free(&self, ctx: *mut qjs::JSContext) {
        unsafe {
            qjs::JS_FreeValue(ctx, self.is_array);
            qjs::JS_FreeValue(ctx, self.keys);
            qjs::JS_FreeValue(ctx, self.type_of);
        }
    }
}

/// A QuickJS runtime behind the [`Engine`] interface.
///
/// ```
/// use hostjs_engine::{Engine, QuickJs};
///
/// let engine = QuickJs::new().unwrap();
/// let ctx = engine.new_context().unwrap();
/// let unit = engine.compile(ctx, "[1, 2, 3].length", "len.js").unwrap();
/// let length = engine.eval_function(ctx, unit).unwrap();
/// assert_eq!(length.as_f64(), Some(3.0));
/// engine.free(unit);
/// ```
pub struct QuickJs {
    rt: *mut qjs::JSRuntime,
    primary: *mut qjs::JSContext,
    primary_taken: Cell<bool>,
    contexts: RefCell<FxHashMap<ContextId, *mut qjs::JSContext>>,
    next_context: Cell<u32>,
    table: RefCell<Table>,
    natives: RefCell<FxHashMap<u32, NativeEntry>>,
    next_native: Cell<u32>,
    /// Callees of the native calls in progress, not owned.
    active: RefCell<Vec<qjs::JSValue>>,
    interrupt: RefCell<Option<InterruptHandler>>,
    /// Suppresses the interrupt handler while internal helpers run.
    quiet: Cell<bool>,
    limit: Cell<Option<usize>>,
    helpers: Helpers,
    closed: Cell<bool>,
    this: Weak<QuickJs>,
}

impl QuickJs {
    pub fn new() -> Result<Rc<Self>, AllocationError> {
        let rt = unsafe { qjs::JS_NewRuntime() };
        if rt.is_null() {
            return Err(AllocationError);
        }
        let primary = unsafe { qjs::JS_NewContext(rt) };
        if primary.is_null() {
            unsafe { qjs::JS_FreeRuntime(rt) };
            return Err(AllocationError);
        }
        let Some(helpers) = (unsafe { Helpers::new(primary) }) else {
            unsafe {
                qjs::JS_FreeContext(primary);
                qjs::JS_FreeRuntime(rt);
            }
            return Err(AllocationError);
        };

        let mut contexts = FxHashMap::default();
        contexts.insert(PRIMARY, primary);
        let engine = Rc::new_cyclic(|this| Self {
            rt,
            primary,
            primary_taken: Cell::new(false),
            contexts: RefCell::new(contexts),
            next_context: Cell::new(1),
            table: RefCell::default(),
            natives: RefCell::default(),
            next_native: Cell::new(0),
            active: RefCell::default(),
            interrupt: RefCell::new(None),
            quiet: Cell::new(false),
            limit: Cell::new(None),
            helpers,
            closed: Cell::new(false),
            this: this.clone(),
        });
        let opaque = Rc::as_ptr(&engine) as *mut c_void;
        unsafe {
            qjs::JS_SetRuntimeOpaque(rt, opaque);
            qjs::JS_SetInterruptHandler(rt, Some(native::interrupt), opaque);
        }
        Ok(engine)
    }

    /// Number of slots in the handle table currently held by the host.
    pub fn live_handles(&self) -> usize {
        self.table.borrow().live()
    }

    fn context(&self, id: ContextId) -> EngineResult<*mut qjs::JSContext> {
        let ctx = self.contexts.borrow().get(&id).copied();
        ctx.ok_or_else(|| {
            self.throw_error(ErrorKind::InternalError, &format!("unknown context {id}"))
        })
    }

    // ---- handle conversions ----------------------------------------------

    /// QuickJS view of `raw`, borrowed from the table.
    fn borrow(&self, raw: RawValue) -> qjs::JSValue {
        match raw {
            RawValue::Undefined => undefined(),
            RawValue::Null => make(TAG_NULL, 0),
            RawValue::Bool(value) => make(TAG_BOOL, i32::from(value)),
            RawValue::Int(value) => make(TAG_INT, value),
            RawValue::Float(value) => unsafe { qjs::JS_NewFloat64(value) },
            RawValue::Ref(id) => self.table.borrow().get(id).unwrap_or_else(undefined),
        }
    }

    /// Hand one QuickJS reference over to the table.
    fn adopt(&self, value: qjs::JSValue) -> RawValue {
        let adopted = self.table.borrow_mut().adopt(value);
        if let Some(surplus) = adopted.surplus {
            self.free_js(surplus);
        }
        adopted.raw
    }

    fn adopt_result(&self, value: qjs::JSValue) -> EngineResult<RawValue> {
        if is_exception(value) {
            Err(PendingException)
        } else {
            Ok(self.adopt(value))
        }
    }

    /// Owned QuickJS value for `raw`; consumes the host unit.
    fn into_js(&self, raw: RawValue) -> qjs::JSValue {
        let value = self.dup_js(self.borrow(raw));
        self.free(raw);
        value
    }

    fn dup_js(&self, value: qjs::JSValue) -> qjs::JSValue {
        unsafe { qjs::JS_DupValue(self.primary, value) }
    }

    fn free_js(&self, value: qjs::JSValue) {
        unsafe { qjs::JS_FreeValue(self.primary, value) }
    }

    /// Borrowed QuickJS object behind `raw`, if it is one.
    fn object(&self, raw: RawValue) -> Option<qjs::JSValue> {
        let value = self.borrow(raw);
        (tag_of(value) == TAG_OBJECT).then_some(value)
    }

    fn string_of(&self, value: qjs::JSValue) -> EngineResult<String> {
        let mut len = 0usize;
        let text = unsafe { qjs::JS_ToCStringLen(self.primary, &mut len, value) };
        if text.is_null() {
            return Err(PendingException);
        }
        let bytes = unsafe { std::slice::from_raw_parts(text.cast::<u8>(), len) };
        let result = String::from_utf8_lossy(bytes).into_owned();
        unsafe { qjs::JS_FreeCString(self.primary, text) };
        Ok(result)
    }

    fn discard_exception(&self) {
        if self.has_exception() {
            let exception = unsafe { qjs::JS_GetException(self.primary) };
            self.free_js(exception);
        }
    }

    /// Call one of the captured helpers; the result is owned.
    fn call_helper(&self, helper: qjs::JSValue, arg: qjs::JSValue) -> EngineResult<qjs::JSValue> {
        let mut argv = [arg];
        let quiet = self.quiet.replace(true);
        let result =
            unsafe { qjs::JS_Call(self.primary, helper, undefined(), 1, argv.as_mut_ptr()) };
        self.quiet.set(quiet);
        if is_exception(result) {
            Err(PendingException)
        } else {
            Ok(result)
        }
    }

    fn atom(&self, key: &PropertyKey) -> EngineResult<Atom<'_>> {
        let atom = unsafe {
            match key {
                PropertyKey::Index(index) => qjs::JS_NewAtomUInt32(self.primary, *index),
                PropertyKey::Name(name) => {
                    qjs::JS_NewAtomLen(self.primary, name.as_ptr().cast::<c_char>(), name.len() as _)
                }
            }
        };
        if atom == 0 {
            Err(PendingException)
        } else {
            Ok(Atom { engine: self, atom })
        }
    }

    fn define_value(
        &self,
        ctx: *mut qjs::JSContext,
        target: qjs::JSValue,
        name: &CStr,
        value: qjs::JSValue,
    ) -> EngineResult<()> {
        let flags = qjs::JS_PROP_CONFIGURABLE as c_int;
        let status =
            unsafe { qjs::JS_DefinePropertyValueStr(ctx, target, name.as_ptr(), value, flags) };
        if status < 0 {
            Err(PendingException)
        } else {
            Ok(())
        }
    }

    fn apply_limit(&self, limit: Option<usize>) {
        unsafe { qjs::JS_SetMemoryLimit(self.rt, limit.unwrap_or(usize::MAX) as _) };
    }

    fn c_string(&self, text: &str, what: &str) -> EngineResult<CString> {
        CString::new(text).map_err(|_| {
            self.throw_error(ErrorKind::SyntaxError, &format!("{what} contains a NUL byte"))
        })
    }

    fn type_from_script(&self, value: qjs::JSValue) -> ValueType {
        let name = match self.call_helper(self.helpers.type_of, value) {
            Ok(name) => name,
            Err(_) => {
                self.discard_exception();
                return ValueType::Object;
            }
        };
        let text = self.string_of(name);
        self.free_js(name);
        match text.as_deref() {
            Ok("string") => ValueType::String,
            Ok("symbol") => ValueType::Symbol,
            Ok("bigint") => ValueType::BigInt,
            Ok("number") => ValueType::Number,
            Ok("boolean") => ValueType::Boolean,
            Ok("function") => ValueType::Function,
            Ok("undefined") => ValueType::Undefined,
            _ => ValueType::Object,
        }
    }
}

/// Property atom released on drop.
struct Atom<'a> {
    engine: &'a QuickJs,
    atom: qjs::JSAtom,
}

impl Drop for Atom<'_> {
    fn drop(&mut self) {
        unsafe { qjs::JS_FreeAtom(self.engine.primary, self.atom) };
    }
}

fn constructor_name(kind: ErrorKind) -> &'static CStr {
    match kind {
        ErrorKind::Error => c"Error",
        ErrorKind::TypeError => c"TypeError",
        ErrorKind::RangeError => c"RangeError",
        ErrorKind::ReferenceError => c"ReferenceError",
        ErrorKind::SyntaxError => c"SyntaxError",
        ErrorKind::InternalError => c"InternalError",
    }
}

impl Engine for QuickJs {
    fn new_context(&self) -> EngineResult<ContextId> {
        if !self.primary_taken.replace(true) {
            return Ok(PRIMARY);
        }
        let ctx = unsafe { qjs::JS_NewContext(self.rt) };
        if ctx.is_null() {
            return Err(self.throw_error(ErrorKind::InternalError, "out of memory"));
        }
        let id = ContextId(self.next_context.get());
        self.next_context.set(id.0 + 1);
        self.contexts.borrow_mut().insert(id, ctx);
        Ok(id)
    }

    fn free_context(&self, id: ContextId) {
        // the primary context lives as long as the runtime
        if id == PRIMARY {
            return;
        }
        let ctx = self.contexts.borrow_mut().remove(&id);
        if let Some(ctx) = ctx {
            unsafe { qjs::JS_FreeContext(ctx) };
        }
    }

    fn shutdown(&self) {
        if self.closed.replace(true) {
            return;
        }
        // dropped outside the borrow: callbacks may own values
        let natives = std::mem::take(&mut *self.natives.borrow_mut());
        drop(natives);
        self.interrupt.borrow_mut().take();
        let values = self.table.borrow_mut().drain();
        for value in values {
            self.free_js(value);
        }
        self.discard_exception();
    }

    fn global_object(&self, ctx: ContextId) -> EngineResult<RawValue> {
        let ctx = self.context(ctx)?;
        Ok(self.adopt(unsafe { qjs::JS_GetGlobalObject(ctx) }))
    }

    fn new_object(&self) -> EngineResult<RawValue> {
        self.adopt_result(unsafe { qjs::JS_NewObject(self.primary) })
    }

    fn new_array(&self) -> EngineResult<RawValue> {
        self.adopt_result(unsafe { qjs::JS_NewArray(self.primary) })
    }

    fn new_string(&self, value: &str) -> EngineResult<RawValue> {
        let string = unsafe {
            qjs::JS_NewStringLen(self.primary, value.as_ptr().cast::<c_char>(), value.len() as _)
        };
        self.adopt_result(string)
    }

    fn new_error(&self, kind: ErrorKind, message: &str) -> EngineResult<RawValue> {
        let ctx = self.primary;
        unsafe {
            let text = qjs::JS_NewStringLen(ctx, message.as_ptr().cast::<c_char>(), message.len() as _);
            if is_exception(text) {
                return Err(PendingException);
            }
            let global = qjs::JS_GetGlobalObject(ctx);
            let constructor = qjs::JS_GetPropertyStr(ctx, global, constructor_name(kind).as_ptr());
            qjs::JS_FreeValue(ctx, global);
            let error = if flag(qjs::JS_IsFunction(ctx, constructor)) != 0 {
                let mut argv = [text];
                qjs::JS_CallConstructor(ctx, constructor, 1, argv.as_mut_ptr())
            } else {
                let error = qjs::JS_NewError(ctx);
                if !is_exception(error) {
                    qjs::JS_SetPropertyStr(ctx, error, c"message".as_ptr(), qjs::JS_DupValue(ctx, text));
                }
                error
            };
            qjs::JS_FreeValue(ctx, constructor);
            qjs::JS_FreeValue(ctx, text);
            self.adopt_result(error)
        }
    }

    fn dup(&self, value: RawValue) -> RawValue {
        if let RawValue::Ref(id) = value {
            self.table.borrow_mut().dup(id);
        }
        value
    }

    fn free(&self, value: RawValue) {
        if let RawValue::Ref(id) = value {
            let released = self.table.borrow_mut().release(id);
            if let Some(released) = released {
                self.free_js(released);
            }
        }
    }

    fn ref_count(&self, value: RawValue) -> u32 {
        match value {
            RawValue::Ref(id) => self.table.borrow().ref_count(id),
            _ => 0,
        }
    }

    fn identity(&self, value: RawValue) -> Option<ObjectId> {
        value
            .object_id()
            .filter(|id| self.table.borrow().is_live(*id))
    }

    fn has_property(&self, target: RawValue, key: &PropertyKey) -> EngineResult<bool> {
        let Some(object) = self.object(target) else {
            return Ok(false);
        };
        let atom = self.atom(key)?;
        let found = flag(unsafe { qjs::JS_HasProperty(self.primary, object, atom.atom) });
        if found < 0 {
            Err(PendingException)
        } else {
            Ok(found > 0)
        }
    }

    fn get_property(&self, target: RawValue, key: &PropertyKey) -> EngineResult<RawValue> {
        let target = self.borrow(target);
        let atom = self.atom(key)?;
        self.adopt_result(unsafe { qjs::JS_GetProperty(self.primary, target, atom.atom) })
    }

    fn set_property(&self, target: RawValue, key: &PropertyKey, value: RawValue) -> EngineResult<()> {
        let atom = match self.atom(key) {
            Ok(atom) => atom,
            Err(err) => {
                self.free(value);
                return Err(err);
            }
        };
        let target = self.borrow(target);
        let value = self.into_js(value);
        let status = unsafe { qjs::JS_SetProperty(self.primary, target, atom.atom, value) };
        if status < 0 {
            Err(PendingException)
        } else {
            Ok(())
        }
    }

    fn delete_property(&self, target: RawValue, key: &PropertyKey) -> EngineResult<bool> {
        let target = self.borrow(target);
        let atom = self.atom(key)?;
        let status = unsafe { qjs::JS_DeleteProperty(self.primary, target, atom.atom, 0) };
        if status < 0 {
            Err(PendingException)
        } else {
            Ok(status > 0)
        }
    }

    fn own_keys(&self, target: RawValue) -> EngineResult<Vec<PropertyKey>> {
        let Some(object) = self.object(target) else {
            return Ok(Vec::new());
        };
        let names = self.call_helper(self.helpers.keys, object)?;
        let count = unsafe { qjs::JS_GetPropertyStr(self.primary, names, c"length".as_ptr()) };
        let count = self.adopt_result(count).and_then(|count| self.to_number(count));
        let result = count.and_then(|count| {
            (0..count as u32)
                .map(|index| {
                    let name = unsafe { qjs::JS_GetPropertyUint32(self.primary, names, index) };
                    if is_exception(name) {
                        return Err(PendingException);
                    }
                    let text = self.string_of(name);
                    self.free_js(name);
                    text.map(PropertyKey::from)
                })
                .collect()
        });
        self.free_js(names);
        result
    }

    fn define_accessor(
        &self,
        target: RawValue,
        name: &str,
        getter: RawValue,
        setter: RawValue,
    ) -> EngineResult<()> {
        let getter = self.into_js(getter);
        let setter = self.into_js(setter);
        let atom = match self.atom(&PropertyKey::from(name)) {
            Ok(atom) => atom,
            Err(err) => {
                self.free_js(getter);
                self.free_js(setter);
                return Err(err);
            }
        };
        let target = self.borrow(target);
        let flags = (qjs::JS_PROP_ENUMERABLE | qjs::JS_PROP_CONFIGURABLE) as c_int;
        let status = unsafe {
            qjs::JS_DefinePropertyGetSet(self.primary, target, atom.atom, getter, setter, flags)
        };
        if status < 0 {
            Err(PendingException)
        } else {
            Ok(())
        }
    }

    fn type_of(&self, value: RawValue) -> ValueType {
        let id = match value {
            RawValue::Undefined => return ValueType::Undefined,
            RawValue::Null => return ValueType::Null,
            RawValue::Bool(_) => return ValueType::Boolean,
            RawValue::Int(_) | RawValue::Float(_) => return ValueType::Number,
            RawValue::Ref(id) => id,
        };
        let Some(value) = self.table.borrow().get(id) else {
            return ValueType::Undefined;
        };
        match tag_of(value) {
            TAG_STRING => ValueType::String,
            TAG_SYMBOL => ValueType::Symbol,
            TAG_BIG_INT => ValueType::BigInt,
            TAG_OBJECT if flag(unsafe { qjs::JS_IsFunction(self.primary, value) }) != 0 => {
                ValueType::Function
            }
            TAG_OBJECT | TAG_FUNCTION_BYTECODE | TAG_MODULE => ValueType::Object,
            _ => self.type_from_script(value),
        }
    }

    fn is_array(&self, value: RawValue) -> bool {
        let Some(object) = self.object(value) else {
            return false;
        };
        match self.call_helper(self.helpers.is_array, object) {
            Ok(result) => tag_of(result) == TAG_BOOL && unsafe { qjs::JS_VALUE_GET_INT(result) } != 0,
            Err(_) => {
                self.discard_exception();
                false
            }
        }
    }

    fn is_error(&self, value: RawValue) -> bool {
        self.object(value)
            .is_some_and(|object| flag(unsafe { qjs::JS_IsError(self.primary, object) }) != 0)
    }

    fn is_promise(&self, value: RawValue) -> bool {
        self.object(value)
            .is_some_and(|object| unsafe { qjs::JS_PromiseState(self.primary, object) } as i32 >= 0)
    }

    fn array_length(&self, value: RawValue) -> Option<u32> {
        if !self.is_array(value) {
            return None;
        }
        let length = match self.get_property(value, &PropertyKey::from("length")) {
            Ok(length) => length,
            Err(_) => {
                self.discard_exception();
                return None;
            }
        };
        length.as_f64().map(|length| length as u32)
    }

    fn to_string(&self, value: RawValue) -> EngineResult<String> {
        self.string_of(self.borrow(value))
    }

    fn to_number(&self, value: RawValue) -> EngineResult<f64> {
        let mut number = 0.0;
        let status = unsafe { qjs::JS_ToFloat64(self.primary, &mut number, self.borrow(value)) };
        if status < 0 {
            Err(PendingException)
        } else {
            Ok(number)
        }
    }

    fn to_bool(&self, value: RawValue) -> bool {
        flag(unsafe { qjs::JS_ToBool(self.primary, self.borrow(value)) }) > 0
    }

    fn new_function(
        &self,
        ctx: ContextId,
        name: &str,
        length: u32,
        callback: NativeCallback,
        data: Vec<RawValue>,
    ) -> EngineResult<RawValue> {
        let release_data = |data: &[RawValue]| data.iter().for_each(|value| self.free(*value));
        let js_ctx = match self.context(ctx) {
            Ok(js_ctx) => js_ctx,
            Err(err) => {
                release_data(&data);
                return Err(err);
            }
        };
        let id = self.next_native.get();
        self.next_native.set(id.wrapping_add(1));
        // declared length stays zero so QuickJS never pads missing arguments
        let mut slot = make(TAG_INT, id as i32);
        let function = unsafe {
            qjs::JS_NewCFunctionData(js_ctx, Some(native::call), 0, 0, 1, &mut slot)
        };
        if is_exception(function) {
            release_data(&data);
            return Err(PendingException);
        }
        let named = unsafe {
            qjs::JS_NewStringLen(js_ctx, name.as_ptr().cast::<c_char>(), name.len() as _)
        };
        let described = if is_exception(named) {
            Err(PendingException)
        } else {
            self.define_value(js_ctx, function, c"name", named).and_then(|()| {
                self.define_value(js_ctx, function, c"length", make(TAG_INT, length as i32))
            })
        };
        if let Err(err) = described {
            self.free_js(function);
            release_data(&data);
            return Err(err);
        }
        self.natives.borrow_mut().insert(
            id,
            NativeEntry {
                callback,
                data: data.into(),
                ctx,
                callee: function,
            },
        );
        Ok(self.adopt(function))
    }

    fn call(&self, func: RawValue, this: RawValue, args: &[RawValue]) -> EngineResult<RawValue> {
        let func = self.borrow(func);
        let this = self.borrow(this);
        let mut argv: Vec<qjs::JSValue> = args.iter().map(|arg| self.borrow(*arg)).collect();
        let argc = argv.len() as c_int;
        let result = unsafe { qjs::JS_Call(self.primary, func, this, argc, argv.as_mut_ptr()) };
        self.adopt_result(result)
    }

    fn active_function(&self) -> RawValue {
        let top = self.active.borrow().last().copied();
        match top {
            Some(callee) => self.adopt(self.dup_js(callee)),
            None => RawValue::Undefined,
        }
    }

    fn throw(&self, value: RawValue) -> PendingException {
        let value = self.into_js(value);
        unsafe { qjs::JS_Throw(self.primary, value) };
        PendingException
    }

    fn throw_error(&self, kind: ErrorKind, message: &str) -> PendingException {
        self.apply_limit(None);
        let error = self.new_error(kind, message);
        self.apply_limit(self.limit.get());
        match error {
            Ok(error) => self.throw(error),
            Err(pending) => pending,
        }
    }

    fn take_exception(&self) -> RawValue {
        if !self.has_exception() {
            return RawValue::Undefined;
        }
        self.adopt(unsafe { qjs::JS_GetException(self.primary) })
    }

    fn has_exception(&self) -> bool {
        flag(unsafe { qjs::JS_HasException(self.primary) }) != 0
    }

    fn to_json(&self, value: RawValue) -> EngineResult<Option<String>> {
        let json = unsafe {
            qjs::JS_JSONStringify(self.primary, self.borrow(value), undefined(), undefined())
        };
        if is_exception(json) {
            return Err(PendingException);
        }
        if tag_of(json) == TAG_UNDEFINED {
            return Ok(None);
        }
        let text = self.string_of(json);
        self.free_js(json);
        text.map(Some)
    }

    fn parse_json(&self, text: &str) -> EngineResult<RawValue> {
        let source = self.c_string(text, "JSON text")?;
        let value = unsafe {
            qjs::JS_ParseJSON(self.primary, source.as_ptr(), text.len() as _, c"<json>".as_ptr())
        };
        self.adopt_result(value)
    }

    fn enqueue_job(&self, func: RawValue, args: Vec<RawValue>) {
        let mut argv: Vec<qjs::JSValue> = std::iter::once(func)
            .chain(args.iter().copied())
            .map(|value| self.borrow(value))
            .collect();
        let argc = argv.len() as c_int;
        let status = unsafe {
            qjs::JS_EnqueueJob(self.primary, Some(native::run_job), argc, argv.as_mut_ptr())
        };
        if status < 0 {
            self.discard_exception();
        }
        self.free(func);
        for arg in args {
            self.free(arg);
        }
    }

    fn execute_pending_job(&self) -> EngineResult<bool> {
        let mut ctx = ptr::null_mut();
        match unsafe { qjs::JS_ExecutePendingJob(self.rt, &mut ctx) } {
            status if status < 0 => Err(PendingException),
            0 => Ok(false),
            _ => Ok(true),
        }
    }

    fn has_pending_jobs(&self) -> bool {
        flag(unsafe { qjs::JS_IsJobPending(self.rt) }) != 0
    }

    fn set_interrupt_handler(&self, handler: Option<InterruptHandler>) {
        *self.interrupt.borrow_mut() = handler;
    }

    fn interrupt_handler(&self) -> Option<InterruptHandler> {
        self.interrupt.borrow().clone()
    }

    fn set_memory_limit(&self, limit: Option<usize>) {
        self.limit.set(limit);
        self.apply_limit(limit);
    }

    fn memory_limit(&self) -> Option<usize> {
        self.limit.get()
    }

    fn memory_usage(&self) -> usize {
        let mut usage = std::mem::MaybeUninit::<qjs::JSMemoryUsage>::zeroed();
        unsafe {
            qjs::JS_ComputeMemoryUsage(self.rt, usage.as_mut_ptr());
            usage.assume_init().malloc_size as usize
        }
    }

    fn new_promise_capability(&self, ctx: ContextId) -> EngineResult<PromiseCapability> {
        let ctx = self.context(ctx)?;
        let mut resolving = [undefined(), undefined()];
        let promise = unsafe { qjs::JS_NewPromiseCapability(ctx, resolving.as_mut_ptr()) };
        let promise = self.adopt_result(promise)?;
        Ok(PromiseCapability {
            promise,
            resolve: self.adopt(resolving[0]),
            reject: self.adopt(resolving[1]),
        })
    }

    fn compile(&self, ctx: ContextId, source: &str, filename: &str) -> EngineResult<RawValue> {
        let ctx = self.context(ctx)?;
        let code = self.c_string(source, "source")?;
        let file = self.c_string(filename, "file name")?;
        let flags = (qjs::JS_EVAL_TYPE_GLOBAL | qjs::JS_EVAL_FLAG_COMPILE_ONLY) as c_int;
        let unit = unsafe { qjs::JS_Eval(ctx, code.as_ptr(), source.len() as _, file.as_ptr(), flags) };
        self.adopt_result(unit)
    }

    fn eval_function(&self, ctx: ContextId, unit: RawValue) -> EngineResult<RawValue> {
        let ctx = self.context(ctx)?;
        let unit = self.borrow(unit);
        if !matches!(tag_of(unit), TAG_FUNCTION_BYTECODE | TAG_MODULE) {
            return Err(self.throw_error(ErrorKind::TypeError, "value is not a compiled unit"));
        }
        let result = unsafe { qjs::JS_EvalFunction(ctx, self.dup_js(unit)) };
        self.adopt_result(result)
    }

    fn write_object(&self, unit: RawValue, strip_debug: bool) -> EngineResult<Vec<u8>> {
        let unit = self.borrow(unit);
        if !matches!(tag_of(unit), TAG_FUNCTION_BYTECODE | TAG_MODULE) {
            return Err(self.throw_error(ErrorKind::TypeError, "value is not a compiled unit"));
        }
        let mut flags = qjs::JS_WRITE_OBJ_BYTECODE as c_int;
        if strip_debug {
            flags |= WRITE_STRIP;
        }
        let mut len: qjs::size_t = 0;
        let buffer = unsafe { qjs::JS_WriteObject(self.primary, &mut len, unit, flags) };
        if buffer.is_null() {
            return Err(PendingException);
        }
        let bytes = unsafe { std::slice::from_raw_parts(buffer, len as usize) }.to_vec();
        unsafe { qjs::js_free(self.primary, buffer.cast::<c_void>()) };
        Ok(bytes)
    }

    fn read_object(&self, bytes: &[u8]) -> EngineResult<RawValue> {
        let flags = qjs::JS_READ_OBJ_BYTECODE as c_int;
        let unit = unsafe { qjs::JS_ReadObject(self.primary, bytes.as_ptr(), bytes.len() as _, flags) };
        self.adopt_result(unit)
    }
}

impl Drop for QuickJs {
    fn drop(&mut self) {
        self.shutdown();
        // values adopted after shutdown
        let values = self.table.borrow_mut().drain();
        for value in values {
            self.free_js(value);
        }
        self.discard_exception();
        unsafe {
            self.helpers.free(self.primary);
            for (id, ctx) in self.contexts.borrow_mut().drain() {
                if id != PRIMARY {
                    qjs::JS_FreeContext(ctx);
                }
            }
            qjs::JS_FreeContext(self.primary);
            qjs::JS_FreeRuntime(self.rt);
        }
    }
}
