//! Native function objects and invocation

use std::rc::Rc;

use super::Heap;
use super::cell::{CellKind, FunctionData, ObjectClass, ObjectData, Property};
use crate::engine::{CallFrame, Engine, NativeCallback};
use crate::error::{EngineResult, ErrorKind};
use crate::value::{ContextId, RawValue};

/// Native re-entrancy limit.
const MAX_CALL_DEPTH: usize = 512;

/// Pops the active-function stack even if a callback unwinds.
struct ActiveCall<'a> {
    heap: &'a Heap,
}

impl<'a> ActiveCall<'a> {
    fn enter(heap: &'a Heap, func: RawValue) -> Self {
        heap.depth.set(heap.depth.get() + 1);
        heap.active.borrow_mut().push(func);
        Self { heap }
    }
}

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.heap.active.borrow_mut().pop();
        self.heap.depth.set(self.heap.depth.get() - 1);
    }
}

impl Heap {
    pub(crate) fn create_function(
        &self,
        ctx: ContextId,
        name: &str,
        length: u32,
        callback: NativeCallback,
        data: Vec<RawValue>,
    ) -> EngineResult<RawValue> {
        let name_value = match self.alloc(CellKind::Str(Rc::from(name))) {
            Ok(id) => RawValue::Ref(id),
            Err(pending) => {
                for value in data {
                    self.release(value);
                }
                return Err(pending);
            }
        };
        let mut object = ObjectData::new(ObjectClass::Function(FunctionData {
            name: name.to_string(),
            length,
            ctx,
            callback,
            data,
        }));
        object
            .props
            .insert("name".into(), Property::data(name_value, false));
        object.props.insert(
            "length".into(),
            Property::data(RawValue::number(f64::from(length)), false),
        );
        self.alloc(CellKind::Object(object)).map(RawValue::Ref)
    }

    pub(crate) fn invoke(&self, func: RawValue, this: RawValue, args: &[RawValue]) -> EngineResult<RawValue> {
        let target = {
            let table = self.table.borrow();
            match table.object(func).map(|object| &object.class) {
                Some(ObjectClass::Function(function)) => Some((
                    Rc::clone(&function.callback),
                    function.data.clone(),
                    function.ctx,
                )),
                _ => None,
            }
        };
        let Some((callback, data, ctx)) = target else {
            return Err(self.throw_error(ErrorKind::TypeError, "value is not a function"));
        };
        if self.depth.get() >= MAX_CALL_DEPTH {
            return Err(self.throw_error(
                ErrorKind::RangeError,
                "Maximum call stack size exceeded",
            ));
        }
        let Some(engine) = self.this.upgrade() else {
            return Err(self.throw_error(ErrorKind::InternalError, "runtime is shutting down"));
        };

        let result = {
            let _active = ActiveCall::enter(self, func);
            let frame = CallFrame {
                engine,
                ctx,
                callee: func,
                this,
                args,
                data: &data,
            };
            callback(&frame)
        };
        if result.is_err() && !self.has_exception_pending() {
            return Err(self.throw_error(
                ErrorKind::InternalError,
                "native function failed without raising an exception",
            ));
        }
        result
    }

    pub(crate) fn has_exception_pending(&self) -> bool {
        self.exception.get().is_some()
    }

    /// Name a function was created with.
    pub fn function_name(&self, func: RawValue) -> Option<String> {
        match &self.table.borrow().object(func)?.class {
            ObjectClass::Function(function) => Some(function.name.clone()),
            _ => None,
        }
    }

    /// Declared parameter count of a function.
    pub fn function_length(&self, func: RawValue) -> Option<u32> {
        match &self.table.borrow().object(func)?.class {
            ObjectClass::Function(function) => Some(function.length),
            _ => None,
        }
    }
}
