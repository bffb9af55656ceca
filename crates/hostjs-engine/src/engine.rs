//! The engine capability interface
//!
//! Everything the binding layer needs from a script runtime goes through
//! [`Engine`]. Ownership follows one rule throughout: a method that returns
//! a [`RawValue`] hands the caller one reference unit. A method documented
//! as consuming a value takes one unit from the caller. Every other
//! `RawValue` argument is borrowed.

use std::rc::Rc;

use crate::error::{EngineResult, ErrorKind, PendingException};
use crate::value::{ContextId, ObjectId, PropertyKey, RawValue, ValueType};

/// Host function invoked by the engine.
///
/// Returns one owned unit on success. On failure an exception must already
/// be pending (see [`Engine::throw`]).
pub type NativeCallback = Rc<dyn Fn(&CallFrame<'_>) -> EngineResult<RawValue>>;

/// Interrupt hook polled by the binding layer; `true` requests an abort.
pub type InterruptHandler = Rc<dyn Fn() -> bool>;

/// Everything a native callback can see about the call in progress.
pub struct CallFrame<'a> {
    pub engine: Rc<dyn Engine>,
    /// Realm the callee was created in.
    pub ctx: ContextId,
    /// The function object being invoked.
    pub callee: RawValue,
    pub this: RawValue,
    pub args: &'a [RawValue],
    /// Values bound to the function at creation (borrowed from the callee).
    pub data: &'a [RawValue],
}

impl CallFrame<'_> {
    /// Positional argument, `Undefined` when absent.
    pub fn arg(&self, index: usize) -> RawValue {
        self.args.get(index).copied().unwrap_or_default()
    }
}

/// A pending promise together with its resolving functions.
///
/// All three values are owned by the receiver.
#[derive(Debug, Clone, Copy)]
pub struct PromiseCapability {
    pub promise: RawValue,
    pub resolve: RawValue,
    pub reject: RawValue,
}

/// Capability interface of an embedded, reference-counted script runtime.
///
/// Implementations are single threaded and re-entrant: a native callback
/// may call back into the engine while the engine is invoking it.
pub trait Engine {
    // ---- contexts --------------------------------------------------------

    /// Create a new evaluation context with its own global object.
    fn new_context(&self) -> EngineResult<ContextId>;

    /// Free a context and release its global object.
    fn free_context(&self, ctx: ContextId);

    /// Release runtime-wide state. Called once by the runtime owner.
    fn shutdown(&self);

    /// Global object of `ctx` (owned).
    fn global_object(&self, ctx: ContextId) -> EngineResult<RawValue>;

    // ---- value lifecycle -------------------------------------------------

    fn new_object(&self) -> EngineResult<RawValue>;
    fn new_array(&self) -> EngineResult<RawValue>;
    fn new_string(&self, value: &str) -> EngineResult<RawValue>;
    fn new_error(&self, kind: ErrorKind, message: &str) -> EngineResult<RawValue>;

    /// Take one more reference unit on `value` and return it.
    fn dup(&self, value: RawValue) -> RawValue;

    /// Give back one reference unit.
    fn free(&self, value: RawValue);

    /// Number of reference units currently held on `value`'s cell.
    ///
    /// Zero for scalars and for identities that are no longer live.
    fn ref_count(&self, value: RawValue) -> u32;

    /// Stable identity of a live heap cell.
    fn identity(&self, value: RawValue) -> Option<ObjectId>;

    // ---- property access -------------------------------------------------

    /// `key in target`, walking the prototype chain. `false` for primitives.
    fn has_property(&self, target: RawValue, key: &PropertyKey) -> EngineResult<bool>;

    /// `target[key]` (owned). Accessors are invoked.
    fn get_property(&self, target: RawValue, key: &PropertyKey) -> EngineResult<RawValue>;

    /// `target[key] = value`; consumes `value`, even on failure.
    fn set_property(&self, target: RawValue, key: &PropertyKey, value: RawValue) -> EngineResult<()>;

    /// `delete target[key]`.
    fn delete_property(&self, target: RawValue, key: &PropertyKey) -> EngineResult<bool>;

    /// Own enumerable keys in insertion order (array indices first).
    fn own_keys(&self, target: RawValue) -> EngineResult<Vec<PropertyKey>>;

    /// Install an accessor property; consumes `getter` and `setter`
    /// (`Undefined` leaves that half unset).
    fn define_accessor(
        &self,
        target: RawValue,
        name: &str,
        getter: RawValue,
        setter: RawValue,
    ) -> EngineResult<()>;

    // ---- type queries ----------------------------------------------------

    fn type_of(&self, value: RawValue) -> ValueType;
    fn is_array(&self, value: RawValue) -> bool;
    fn is_error(&self, value: RawValue) -> bool;
    fn is_promise(&self, value: RawValue) -> bool;

    /// Length of an array, `None` for anything else.
    fn array_length(&self, value: RawValue) -> Option<u32>;

    /// Script-level string conversion.
    fn to_string(&self, value: RawValue) -> EngineResult<String>;

    /// Script-level number conversion.
    fn to_number(&self, value: RawValue) -> EngineResult<f64>;

    /// Script-level truthiness.
    fn to_bool(&self, value: RawValue) -> bool;

    // ---- invocation ------------------------------------------------------

    /// Create a native function object in `ctx`; consumes `data`.
    fn new_function(
        &self,
        ctx: ContextId,
        name: &str,
        length: u32,
        callback: NativeCallback,
        data: Vec<RawValue>,
    ) -> EngineResult<RawValue>;

    /// Call `func` with receiver `this`; arguments are borrowed.
    fn call(&self, func: RawValue, this: RawValue, args: &[RawValue]) -> EngineResult<RawValue>;

    /// Function currently executing (owned), `Undefined` at top level.
    fn active_function(&self) -> RawValue;

    // ---- exceptions ------------------------------------------------------

    /// Make `value` the pending exception; consumes `value`.
    fn throw(&self, value: RawValue) -> PendingException;

    /// Allocate an error object and make it the pending exception.
    ///
    /// The allocation bypasses the memory ceiling.
    fn throw_error(&self, kind: ErrorKind, message: &str) -> PendingException;

    /// Remove and return the pending exception (owned), `Undefined` if none.
    fn take_exception(&self) -> RawValue;

    fn has_exception(&self) -> bool;

    // ---- serialization ---------------------------------------------------

    /// `JSON.stringify(value)`; `None` when the value has no JSON form.
    fn to_json(&self, value: RawValue) -> EngineResult<Option<String>>;

    /// `JSON.parse(text)` (owned).
    fn parse_json(&self, text: &str) -> EngineResult<RawValue>;

    // ---- scheduling ------------------------------------------------------

    /// Queue a call of `func` with `args`; consumes both.
    fn enqueue_job(&self, func: RawValue, args: Vec<RawValue>);

    /// Run one pending job. `Ok(false)` when the queue was empty; `Err` when
    /// the job raised an exception, which is left pending.
    fn execute_pending_job(&self) -> EngineResult<bool>;

    fn has_pending_jobs(&self) -> bool;

    fn set_interrupt_handler(&self, handler: Option<InterruptHandler>);
    fn interrupt_handler(&self) -> Option<InterruptHandler>;

    /// Memory ceiling in bytes, `None` for unbounded.
    fn set_memory_limit(&self, limit: Option<usize>);
    fn memory_limit(&self) -> Option<usize>;
    fn memory_usage(&self) -> usize;

    // ---- promises --------------------------------------------------------

    fn new_promise_capability(&self, ctx: ContextId) -> EngineResult<PromiseCapability>;

    // ---- compiled units --------------------------------------------------

    /// Compile without running; returns a compiled unit (owned).
    fn compile(&self, ctx: ContextId, source: &str, filename: &str) -> EngineResult<RawValue>;

    /// Run a compiled unit and return its completion value (owned).
    fn eval_function(&self, ctx: ContextId, unit: RawValue) -> EngineResult<RawValue>;

    /// Serialize a compiled unit.
    fn write_object(&self, unit: RawValue, strip_debug: bool) -> EngineResult<Vec<u8>>;

    /// Deserialize a compiled unit written by [`Engine::write_object`].
    fn read_object(&self, bytes: &[u8]) -> EngineResult<RawValue>;
}
