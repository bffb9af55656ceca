//! Reference engine: a reference-counted object heap
//!
//! `Heap` implements [`Engine`] over a slot table of reference-counted
//! cells. Freeing is iterative (a worklist, not recursion), cycles are not
//! collected, and every allocation is charged against an optional memory
//! ceiling. Compiled units carry JSON documents; running one parses it.

mod bytecode;
mod cell;
mod convert;
mod function;
mod json;
mod object;
mod promise;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;

use crate::engine::{Engine, InterruptHandler, NativeCallback, PromiseCapability};
use crate::error::{EngineResult, ErrorKind, PendingException};
use crate::value::{ContextId, ObjectId, PropertyKey, RawValue, ValueType};

use cell::{CellKind, CellTable, ObjectClass, ObjectData, Property};
use promise::Job;

pub use promise::PromiseStatus;

/// Realm reported for functions that belong to the runtime rather than to
/// a particular context (promise built-ins, resolving functions).
pub const INTRINSIC_REALM: ContextId = ContextId(u32::MAX);

/// In-process engine.
pub struct Heap {
    table: RefCell<CellTable>,
    contexts: RefCell<FxHashMap<ContextId, RawValue>>,
    next_context: Cell<u32>,
    jobs: RefCell<VecDeque<Job>>,
    exception: Cell<Option<RawValue>>,
    interrupt: RefCell<Option<InterruptHandler>>,
    /// Functions currently on the native call stack (borrowed units).
    active: RefCell<Vec<RawValue>>,
    depth: Cell<usize>,
    promise_proto: Cell<Option<ObjectId>>,
    this: Weak<Heap>,
}

impl Heap {
    /// Create a runtime with no memory ceiling.
    pub fn new() -> Rc<Self> {
        let heap = Rc::new_cyclic(|this| Heap {
            table: RefCell::new(CellTable::default()),
            contexts: RefCell::new(FxHashMap::default()),
            next_context: Cell::new(0),
            jobs: RefCell::new(VecDeque::new()),
            exception: Cell::new(None),
            interrupt: RefCell::new(None),
            active: RefCell::new(Vec::new()),
            depth: Cell::new(0),
            promise_proto: Cell::new(None),
            this: this.clone(),
        });
        heap.install_promise_intrinsics();
        heap
    }

    /// Number of live heap cells, intrinsics included.
    pub fn live_cells(&self) -> usize {
        self.table.borrow().live()
    }

    pub(crate) fn weak(&self) -> Weak<Heap> {
        self.this.clone()
    }

    pub(crate) fn alloc(&self, kind: CellKind) -> EngineResult<ObjectId> {
        let mut table = self.table.borrow_mut();
        if table.would_exceed(kind.footprint()) {
            drop(table);
            self.discard(kind);
            return Err(self.out_of_memory());
        }
        Ok(table.insert(kind))
    }

    /// Allocation that ignores the ceiling; used for thrown errors and
    /// intrinsics.
    pub(crate) fn alloc_unchecked(&self, kind: CellKind) -> ObjectId {
        self.table.borrow_mut().insert(kind)
    }

    fn discard(&self, kind: CellKind) {
        let mut children = Vec::new();
        kind.children(&mut children);
        drop(kind);
        for child in children {
            self.release(child);
        }
    }

    pub(crate) fn out_of_memory(&self) -> PendingException {
        self.throw_error(ErrorKind::InternalError, "out of memory")
    }

    pub(crate) fn retain(&self, value: RawValue) -> RawValue {
        self.table.borrow_mut().incref(value);
        value
    }

    /// Give back one unit, freeing cells whose count reaches zero.
    ///
    /// Children of freed cells are pushed on a worklist instead of recursing,
    /// and the freed cells are dropped only after the table borrow ends: a
    /// native callback being dropped may own host handles that call back in.
    pub(crate) fn release(&self, value: RawValue) {
        if value.object_id().is_none() {
            return;
        }
        let mut pending = vec![value];
        let mut graveyard = Vec::new();
        {
            let mut table = self.table.borrow_mut();
            while let Some(value) = pending.pop() {
                let Some(id) = value.object_id() else {
                    continue;
                };
                if let Some(cell) = table.decref(id) {
                    cell.kind.children(&mut pending);
                    graveyard.push(cell);
                }
            }
        }
        #[cfg(feature = "gc_logging")]
        if !graveyard.is_empty() {
            tracing::trace!(target: "hostjs::heap", freed = graveyard.len(), "released cells");
        }
        drop(graveyard);
    }

    pub(crate) fn new_string_value(&self, value: &str) -> EngineResult<RawValue> {
        self.alloc(CellKind::Str(Rc::from(value))).map(RawValue::Ref)
    }

    pub(crate) fn new_array_value(&self) -> EngineResult<RawValue> {
        self.alloc(CellKind::Object(ObjectData::new(ObjectClass::Array(Vec::new()))))
            .map(RawValue::Ref)
    }

    fn error_object(&self, kind: ErrorKind, message: &str, checked: bool) -> EngineResult<RawValue> {
        let make = |value: &str| CellKind::Str(Rc::from(value));
        let (name, message) = if checked {
            let name = self.alloc(make(kind.name()))?;
            match self.alloc(make(message)) {
                Ok(message) => (name, message),
                Err(err) => {
                    self.release(RawValue::Ref(name));
                    return Err(err);
                }
            }
        } else {
            (
                self.alloc_unchecked(make(kind.name())),
                self.alloc_unchecked(make(message)),
            )
        };
        let mut object = ObjectData::new(ObjectClass::Error(kind));
        object
            .props
            .insert("name".into(), Property::data(RawValue::Ref(name), false));
        object
            .props
            .insert("message".into(), Property::data(RawValue::Ref(message), false));
        let kind = CellKind::Object(object);
        if checked {
            self.alloc(kind).map(RawValue::Ref)
        } else {
            Ok(RawValue::Ref(self.alloc_unchecked(kind)))
        }
    }

    pub(crate) fn kind_of(&self, value: RawValue) -> ValueType {
        match value {
            RawValue::Undefined => ValueType::Undefined,
            RawValue::Null => ValueType::Null,
            RawValue::Bool(_) => ValueType::Boolean,
            RawValue::Int(_) | RawValue::Float(_) => ValueType::Number,
            RawValue::Ref(id) => match self.table.borrow().get(id).map(|cell| &cell.kind) {
                Some(CellKind::Str(_)) => ValueType::String,
                Some(CellKind::Object(object)) => match object.class {
                    ObjectClass::Function(_) => ValueType::Function,
                    _ => ValueType::Object,
                },
                None => ValueType::Undefined,
            },
        }
    }

    fn class_matches(&self, value: RawValue, test: impl Fn(&ObjectClass) -> bool) -> bool {
        self.table
            .borrow()
            .object(value)
            .is_some_and(|object| test(&object.class))
    }
}

impl Engine for Heap {
    fn new_context(&self) -> EngineResult<ContextId> {
        let global = self.alloc(CellKind::Object(ObjectData::new(ObjectClass::Global)))?;
        let id = ContextId(self.next_context.get());
        self.next_context.set(id.0 + 1);
        self.contexts.borrow_mut().insert(id, RawValue::Ref(global));
        #[cfg(feature = "gc_logging")]
        tracing::debug!(target: "hostjs::heap", ctx = %id, "context created");
        Ok(id)
    }

    fn free_context(&self, ctx: ContextId) {
        let global = self.contexts.borrow_mut().remove(&ctx);
        if let Some(global) = global {
            self.release(global);
        }
    }

    fn shutdown(&self) {
        let globals: Vec<RawValue> = self.contexts.borrow_mut().drain().map(|(_, g)| g).collect();
        for global in globals {
            self.release(global);
        }
        let jobs: Vec<Job> = self.jobs.borrow_mut().drain(..).collect();
        for job in jobs {
            for value in job.into_values() {
                self.release(value);
            }
        }
        if let Some(exception) = self.exception.take() {
            self.release(exception);
        }
        if let Some(proto) = self.promise_proto.take() {
            self.release(RawValue::Ref(proto));
        }
        self.interrupt.borrow_mut().take();
        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "hostjs::heap",
            live = self.live_cells(),
            bytes = self.memory_usage(),
            "runtime shut down"
        );
    }

    fn global_object(&self, ctx: ContextId) -> EngineResult<RawValue> {
        let global = self.contexts.borrow().get(&ctx).copied();
        match global {
            Some(global) => Ok(self.retain(global)),
            None => Err(self.throw_error(
                ErrorKind::InternalError,
                &format!("context {ctx} has been freed"),
            )),
        }
    }

    fn new_object(&self) -> EngineResult<RawValue> {
        self.alloc(CellKind::Object(ObjectData::new(ObjectClass::Plain)))
            .map(RawValue::Ref)
    }

    fn new_array(&self) -> EngineResult<RawValue> {
        self.new_array_value()
    }

    fn new_string(&self, value: &str) -> EngineResult<RawValue> {
        self.new_string_value(value)
    }

    fn new_error(&self, kind: ErrorKind, message: &str) -> EngineResult<RawValue> {
        self.error_object(kind, message, true)
    }

    fn dup(&self, value: RawValue) -> RawValue {
        self.retain(value)
    }

    fn free(&self, value: RawValue) {
        self.release(value);
    }

    fn ref_count(&self, value: RawValue) -> u32 {
        value
            .object_id()
            .and_then(|id| self.table.borrow().get(id).map(|cell| cell.refs))
            .unwrap_or(0)
    }

    fn identity(&self, value: RawValue) -> Option<ObjectId> {
        let id = value.object_id()?;
        self.table.borrow().get(id).map(|_| id)
    }

    fn has_property(&self, target: RawValue, key: &PropertyKey) -> EngineResult<bool> {
        Ok(self.lookup_property(target, key))
    }

    fn get_property(&self, target: RawValue, key: &PropertyKey) -> EngineResult<RawValue> {
        self.read_property(target, key)
    }

    fn set_property(&self, target: RawValue, key: &PropertyKey, value: RawValue) -> EngineResult<()> {
        self.write_property(target, key, value)
    }

    fn delete_property(&self, target: RawValue, key: &PropertyKey) -> EngineResult<bool> {
        self.remove_property(target, key)
    }

    fn own_keys(&self, target: RawValue) -> EngineResult<Vec<PropertyKey>> {
        Ok(self.enumerate_keys(target))
    }

    fn define_accessor(
        &self,
        target: RawValue,
        name: &str,
        getter: RawValue,
        setter: RawValue,
    ) -> EngineResult<()> {
        self.install_accessor(target, name, getter, setter)
    }

    fn type_of(&self, value: RawValue) -> ValueType {
        self.kind_of(value)
    }

    fn is_array(&self, value: RawValue) -> bool {
        self.class_matches(value, |class| matches!(class, ObjectClass::Array(_)))
    }

    fn is_error(&self, value: RawValue) -> bool {
        self.class_matches(value, |class| matches!(class, ObjectClass::Error(_)))
    }

    fn is_promise(&self, value: RawValue) -> bool {
        self.class_matches(value, |class| matches!(class, ObjectClass::Promise(_)))
    }

    fn array_length(&self, value: RawValue) -> Option<u32> {
        match &self.table.borrow().object(value)?.class {
            ObjectClass::Array(elements) => Some(elements.len() as u32),
            _ => None,
        }
    }

    fn to_string(&self, value: RawValue) -> EngineResult<String> {
        self.string_of(value)
    }

    fn to_number(&self, value: RawValue) -> EngineResult<f64> {
        self.number_of(value)
    }

    fn to_bool(&self, value: RawValue) -> bool {
        self.truthy(value)
    }

    fn new_function(
        &self,
        ctx: ContextId,
        name: &str,
        length: u32,
        callback: NativeCallback,
        data: Vec<RawValue>,
    ) -> EngineResult<RawValue> {
        self.create_function(ctx, name, length, callback, data)
    }

    fn call(&self, func: RawValue, this: RawValue, args: &[RawValue]) -> EngineResult<RawValue> {
        self.invoke(func, this, args)
    }

    fn active_function(&self) -> RawValue {
        let top = self.active.borrow().last().copied();
        top.map(|func| self.retain(func)).unwrap_or_default()
    }

    fn throw(&self, value: RawValue) -> PendingException {
        if let Some(previous) = self.exception.replace(Some(value)) {
            self.release(previous);
        }
        PendingException
    }

    fn throw_error(&self, kind: ErrorKind, message: &str) -> PendingException {
        match self.error_object(kind, message, false) {
            Ok(error) => self.throw(error),
            Err(pending) => pending,
        }
    }

    fn take_exception(&self) -> RawValue {
        self.exception.take().unwrap_or_default()
    }

    fn has_exception(&self) -> bool {
        self.has_exception_pending()
    }

    fn to_json(&self, value: RawValue) -> EngineResult<Option<String>> {
        self.stringify(value)
    }

    fn parse_json(&self, text: &str) -> EngineResult<RawValue> {
        self.parse(text)
    }

    fn enqueue_job(&self, func: RawValue, args: Vec<RawValue>) {
        self.jobs.borrow_mut().push_back(Job::Call { func, args });
    }

    fn execute_pending_job(&self) -> EngineResult<bool> {
        self.run_next_job()
    }

    fn has_pending_jobs(&self) -> bool {
        !self.jobs.borrow().is_empty()
    }

    fn set_interrupt_handler(&self, handler: Option<InterruptHandler>) {
        *self.interrupt.borrow_mut() = handler;
    }

    fn interrupt_handler(&self) -> Option<InterruptHandler> {
        self.interrupt.borrow().clone()
    }

    fn set_memory_limit(&self, limit: Option<usize>) {
        self.table.borrow_mut().limit = limit;
    }

    fn memory_limit(&self) -> Option<usize> {
        self.table.borrow().limit
    }

    fn memory_usage(&self) -> usize {
        self.table.borrow().used
    }

    fn new_promise_capability(&self, _ctx: ContextId) -> EngineResult<PromiseCapability> {
        self.create_promise_capability()
    }

    fn compile(&self, _ctx: ContextId, source: &str, filename: &str) -> EngineResult<RawValue> {
        self.compile_unit(source, filename)
    }

    fn eval_function(&self, _ctx: ContextId, unit: RawValue) -> EngineResult<RawValue> {
        self.run_unit(unit)
    }

    fn write_object(&self, unit: RawValue, strip_debug: bool) -> EngineResult<Vec<u8>> {
        self.serialize_unit(unit, strip_debug)
    }

    fn read_object(&self, bytes: &[u8]) -> EngineResult<RawValue> {
        self.deserialize_unit(bytes)
    }
}
