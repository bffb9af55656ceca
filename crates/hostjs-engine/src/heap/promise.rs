//! Promises and the job queue
//!
//! Settlement never runs reactions directly: each reaction becomes a
//! [`Job`] that waits in the FIFO queue until the host drains it. Resolving
//! with a thenable schedules a job that calls its `then`.

use std::cell::Cell;
use std::rc::Rc;

use super::cell::{CellKind, ObjectClass, ObjectData, PromiseData, PromiseState, Property, Reaction};
use super::{Heap, INTRINSIC_REALM};
use crate::engine::{CallFrame, Engine, NativeCallback, PromiseCapability};
use crate::error::{EngineResult, ErrorKind};
use crate::value::{PropertyKey, RawValue, ValueType};

/// Externally visible promise state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseStatus {
    Pending,
    Fulfilled,
    Rejected,
}

/// Queued continuation. Every value carries one unit owned by the job.
pub(crate) enum Job {
    Reaction {
        handler: RawValue,
        argument: RawValue,
        derived: RawValue,
        rejected: bool,
    },
    Thenable {
        promise: RawValue,
        thenable: RawValue,
        then: RawValue,
    },
    Call {
        func: RawValue,
        args: Vec<RawValue>,
    },
}

impl Job {
    pub(crate) fn into_values(self) -> Vec<RawValue> {
        match self {
            Job::Reaction {
                handler,
                argument,
                derived,
                ..
            } => vec![handler, argument, derived],
            Job::Thenable {
                promise,
                thenable,
                then,
            } => vec![promise, thenable, then],
            Job::Call { func, mut args } => {
                args.push(func);
                args
            }
        }
    }
}

impl Heap {
    pub(crate) fn install_promise_intrinsics(&self) {
        let proto = self.alloc_unchecked(CellKind::Object(ObjectData::new(ObjectClass::Plain)));
        for (name, catch_only) in [("then", false), ("catch", true)] {
            let heap = self.weak();
            let callback: NativeCallback = Rc::new(move |frame: &CallFrame<'_>| {
                let Some(heap) = heap.upgrade() else {
                    return Ok(RawValue::Undefined);
                };
                if catch_only {
                    heap.promise_then(frame.this, RawValue::Undefined, frame.arg(0))
                } else {
                    heap.promise_then(frame.this, frame.arg(0), frame.arg(1))
                }
            });
            let length = if catch_only { 1 } else { 2 };
            let Ok(func) = self.create_function(INTRINSIC_REALM, name, length, callback, Vec::new())
            else {
                continue;
            };
            let mut table = self.table.borrow_mut();
            if let Some(object) = table.object_mut(RawValue::Ref(proto)) {
                object.props.insert(name.to_string(), Property::data(func, false));
            }
        }
        self.promise_proto.set(Some(proto));
    }

    fn new_promise(&self) -> EngineResult<RawValue> {
        let mut object = ObjectData::new(ObjectClass::Promise(PromiseData {
            state: PromiseState::Pending,
            reactions: Vec::new(),
        }));
        if let Some(proto) = self.promise_proto.get() {
            self.retain(RawValue::Ref(proto));
            object.proto = Some(proto);
        }
        self.alloc(CellKind::Object(object)).map(RawValue::Ref)
    }

    pub(crate) fn create_promise_capability(&self) -> EngineResult<PromiseCapability> {
        let promise = self.new_promise()?;
        match self.resolving_functions(promise) {
            Ok((resolve, reject)) => Ok(PromiseCapability {
                promise,
                resolve,
                reject,
            }),
            Err(pending) => {
                self.release(promise);
                Err(pending)
            }
        }
    }

    /// A fresh resolve/reject pair sharing one "already resolved" flag.
    fn resolving_functions(&self, promise: RawValue) -> EngineResult<(RawValue, RawValue)> {
        let done = Rc::new(Cell::new(false));
        let resolve = self.resolving_function(promise, Rc::clone(&done), false)?;
        match self.resolving_function(promise, done, true) {
            Ok(reject) => Ok((resolve, reject)),
            Err(pending) => {
                self.release(resolve);
                Err(pending)
            }
        }
    }

    fn resolving_function(
        &self,
        promise: RawValue,
        done: Rc<Cell<bool>>,
        rejects: bool,
    ) -> EngineResult<RawValue> {
        let heap = self.weak();
        let callback: NativeCallback = Rc::new(move |frame: &CallFrame<'_>| {
            let Some(heap) = heap.upgrade() else {
                return Ok(RawValue::Undefined);
            };
            if done.replace(true) {
                return Ok(RawValue::Undefined);
            }
            let promise = frame.data.first().copied().unwrap_or_default();
            let value = heap.retain(frame.arg(0));
            if rejects {
                heap.settle(promise, PromiseState::Rejected(value));
            } else {
                heap.resolve_promise(promise, value);
            }
            Ok(RawValue::Undefined)
        });
        let data = vec![self.retain(promise)];
        self.create_function(INTRINSIC_REALM, "", 1, callback, data)
    }

    /// Resolve `promise` with `value` (consumed), adopting thenables.
    pub(crate) fn resolve_promise(&self, promise: RawValue, value: RawValue) {
        if value.object_id().is_some() && value.object_id() == promise.object_id() {
            self.release(value);
            let error = self.type_error_value("promise resolved with itself");
            self.settle(promise, PromiseState::Rejected(error));
            return;
        }
        if matches!(self.kind_of(value), ValueType::Object | ValueType::Function) {
            match self.read_property(value, &PropertyKey::from("then")) {
                Ok(then) if self.kind_of(then) == ValueType::Function => {
                    let promise = self.retain(promise);
                    self.jobs.borrow_mut().push_back(Job::Thenable {
                        promise,
                        thenable: value,
                        then,
                    });
                    return;
                }
                Ok(other) => self.release(other),
                Err(_) => {
                    let error = self.take_pending();
                    self.release(value);
                    self.settle(promise, PromiseState::Rejected(error));
                    return;
                }
            }
        }
        self.settle(promise, PromiseState::Fulfilled(value));
    }

    /// Move a pending promise to `outcome` (its value is consumed) and queue
    /// its reactions. Settling twice drops the second outcome.
    fn settle(&self, promise: RawValue, outcome: PromiseState) {
        let reactions = {
            let mut table = self.table.borrow_mut();
            match table.object_mut(promise).map(|object| &mut object.class) {
                Some(ObjectClass::Promise(data)) if matches!(data.state, PromiseState::Pending) => {
                    data.state = outcome;
                    Some(std::mem::take(&mut data.reactions))
                }
                _ => None,
            }
        };
        let Some(reactions) = reactions else {
            if let PromiseState::Fulfilled(value) | PromiseState::Rejected(value) = outcome {
                self.release(value);
            }
            return;
        };
        for reaction in reactions {
            self.schedule_reaction(reaction, outcome);
        }
    }

    /// Queue `reaction` against a settled state; the state's value is
    /// borrowed, the reaction's units move into the job.
    fn schedule_reaction(&self, reaction: Reaction, state: PromiseState) {
        let (handler, unused, argument, rejected) = match state {
            PromiseState::Fulfilled(value) => {
                (reaction.on_fulfilled, reaction.on_rejected, value, false)
            }
            PromiseState::Rejected(value) => {
                (reaction.on_rejected, reaction.on_fulfilled, value, true)
            }
            PromiseState::Pending => return,
        };
        self.release(unused);
        let argument = self.retain(argument);
        self.jobs.borrow_mut().push_back(Job::Reaction {
            handler,
            argument,
            derived: reaction.derived,
            rejected,
        });
    }

    fn promise_then(
        &self,
        this: RawValue,
        on_fulfilled: RawValue,
        on_rejected: RawValue,
    ) -> EngineResult<RawValue> {
        if !self.class_matches(this, |class| matches!(class, ObjectClass::Promise(_))) {
            return Err(self.throw_error(
                ErrorKind::TypeError,
                "Promise.prototype.then called on a non-promise",
            ));
        }
        let derived = self.new_promise()?;
        let callable = |value: RawValue| {
            if self.kind_of(value) == ValueType::Function {
                self.retain(value)
            } else {
                RawValue::Undefined
            }
        };
        let reaction = Reaction {
            on_fulfilled: callable(on_fulfilled),
            on_rejected: callable(on_rejected),
            derived: self.retain(derived),
        };
        let settled = {
            let mut table = self.table.borrow_mut();
            match table.object_mut(this).map(|object| &mut object.class) {
                Some(ObjectClass::Promise(data)) => match data.state {
                    PromiseState::Pending => {
                        data.reactions.push(reaction);
                        None
                    }
                    state => Some(state),
                },
                _ => None,
            }
        };
        if let Some(state) = settled {
            self.schedule_reaction(reaction, state);
        }
        Ok(derived)
    }

    pub(crate) fn run_next_job(&self) -> EngineResult<bool> {
        let job = self.jobs.borrow_mut().pop_front();
        let Some(job) = job else {
            return Ok(false);
        };
        match job {
            Job::Reaction {
                handler,
                argument,
                derived,
                rejected,
            } => {
                if handler.is_undefined() {
                    let passthrough = self.retain(argument);
                    if rejected {
                        self.settle(derived, PromiseState::Rejected(passthrough));
                    } else {
                        self.resolve_promise(derived, passthrough);
                    }
                } else {
                    match self.invoke(handler, RawValue::Undefined, &[argument]) {
                        Ok(result) => self.resolve_promise(derived, result),
                        Err(_) => {
                            let error = self.take_pending();
                            self.settle(derived, PromiseState::Rejected(error));
                        }
                    }
                }
                for value in [handler, argument, derived] {
                    self.release(value);
                }
                Ok(true)
            }
            Job::Thenable {
                promise,
                thenable,
                then,
            } => {
                match self.resolving_functions(promise) {
                    Ok((resolve, reject)) => {
                        match self.invoke(then, thenable, &[resolve, reject]) {
                            Ok(returned) => self.release(returned),
                            Err(_) => {
                                let error = self.take_pending();
                                match self.invoke(reject, RawValue::Undefined, &[error]) {
                                    Ok(returned) => self.release(returned),
                                    Err(_) => {
                                        let stray = self.take_pending();
                                        self.release(stray);
                                    }
                                }
                                self.release(error);
                            }
                        }
                        self.release(resolve);
                        self.release(reject);
                    }
                    Err(_) => {
                        let error = self.take_pending();
                        self.settle(promise, PromiseState::Rejected(error));
                    }
                }
                for value in [promise, thenable, then] {
                    self.release(value);
                }
                Ok(true)
            }
            Job::Call { func, args } => {
                let result = self.invoke(func, RawValue::Undefined, &args);
                self.release(func);
                for arg in args {
                    self.release(arg);
                }
                result.map(|returned| {
                    self.release(returned);
                    true
                })
            }
        }
    }

    fn take_pending(&self) -> RawValue {
        self.exception.take().unwrap_or_default()
    }

    fn type_error_value(&self, message: &str) -> RawValue {
        self.throw_error(ErrorKind::TypeError, message);
        self.take_pending()
    }

    /// State of a promise, `None` for anything else.
    pub fn promise_status(&self, value: RawValue) -> Option<PromiseStatus> {
        match &self.table.borrow().object(value)?.class {
            ObjectClass::Promise(data) => Some(match data.state {
                PromiseState::Pending => PromiseStatus::Pending,
                PromiseState::Fulfilled(_) => PromiseStatus::Fulfilled,
                PromiseState::Rejected(_) => PromiseStatus::Rejected,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::PromiseStatus;
    use crate::engine::{CallFrame, Engine, NativeCallback};
    use crate::heap::Heap;
    use crate::value::{ContextId, PropertyKey, RawValue};

    fn drain(heap: &Heap) -> usize {
        let mut ran = 0;
        while heap.execute_pending_job().unwrap() {
            ran += 1;
        }
        ran
    }

    /// Native callback that records the string form of its first argument.
    fn recorder(heap: &Heap, log: &Rc<RefCell<Vec<String>>>, tag: &'static str) -> RawValue {
        let log = Rc::clone(log);
        let callback: NativeCallback = Rc::new(move |frame: &CallFrame<'_>| {
            let text = frame.engine.to_string(frame.arg(0))?;
            log.borrow_mut().push(format!("{tag}:{text}"));
            Ok(RawValue::Undefined)
        });
        heap.new_function(ContextId(0), tag, 1, callback, Vec::new())
            .unwrap()
    }

    fn call_then(heap: &Heap, promise: RawValue, args: &[RawValue]) -> RawValue {
        let then = heap.get_property(promise, &PropertyKey::from("then")).unwrap();
        let derived = heap.call(then, promise, args).unwrap();
        heap.free(then);
        derived
    }

    #[test]
    fn test_fulfillment_runs_reaction_as_job() {
        let heap = Heap::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let capability = heap.new_promise_capability(ContextId(0)).unwrap();
        let on_ok = recorder(&heap, &log, "ok");
        let derived = call_then(&heap, capability.promise, &[on_ok]);

        heap.call(capability.resolve, RawValue::Undefined, &[RawValue::Int(7)])
            .unwrap();
        assert!(log.borrow().is_empty());
        assert_eq!(heap.promise_status(capability.promise), Some(PromiseStatus::Fulfilled));

        assert!(drain(&heap) >= 1);
        assert_eq!(*log.borrow(), vec!["ok:7".to_string()]);
        assert_eq!(heap.promise_status(derived), Some(PromiseStatus::Fulfilled));

        for value in [derived, on_ok, capability.promise, capability.resolve, capability.reject] {
            heap.free(value);
        }
    }

    #[test]
    fn test_rejection_passes_through_missing_handler() {
        let heap = Heap::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let capability = heap.new_promise_capability(ContextId(0)).unwrap();
        let first = call_then(&heap, capability.promise, &[]);
        let on_err = recorder(&heap, &log, "err");
        let second = call_then(&heap, first, &[RawValue::Undefined, on_err]);

        let reason = heap.new_string("boom").unwrap();
        heap.call(capability.reject, RawValue::Undefined, &[reason]).unwrap();
        heap.free(reason);
        drain(&heap);

        assert_eq!(*log.borrow(), vec!["err:boom".to_string()]);
        assert_eq!(heap.promise_status(first), Some(PromiseStatus::Rejected));
        assert_eq!(heap.promise_status(second), Some(PromiseStatus::Fulfilled));

        for value in [first, second, on_err, capability.promise, capability.resolve, capability.reject] {
            heap.free(value);
        }
    }

    #[test]
    fn test_resolve_with_promise_adopts_state() {
        let heap = Heap::new();
        let outer = heap.new_promise_capability(ContextId(0)).unwrap();
        let inner = heap.new_promise_capability(ContextId(0)).unwrap();

        heap.call(outer.resolve, RawValue::Undefined, &[inner.promise]).unwrap();
        drain(&heap);
        assert_eq!(heap.promise_status(outer.promise), Some(PromiseStatus::Pending));

        heap.call(inner.reject, RawValue::Undefined, &[RawValue::Int(1)]).unwrap();
        drain(&heap);
        assert_eq!(heap.promise_status(outer.promise), Some(PromiseStatus::Rejected));

        for capability in [outer, inner] {
            heap.free(capability.promise);
            heap.free(capability.resolve);
            heap.free(capability.reject);
        }
    }

    #[test]
    fn test_second_resolution_is_ignored() {
        let heap = Heap::new();
        let capability = heap.new_promise_capability(ContextId(0)).unwrap();
        heap.call(capability.reject, RawValue::Undefined, &[RawValue::Int(1)]).unwrap();
        heap.call(capability.resolve, RawValue::Undefined, &[RawValue::Int(2)]).unwrap();
        assert_eq!(heap.promise_status(capability.promise), Some(PromiseStatus::Rejected));
        heap.free(capability.promise);
        heap.free(capability.resolve);
        heap.free(capability.reject);
    }

    #[test]
    fn test_failing_call_job_leaves_exception_pending() {
        let heap = Heap::new();
        heap.enqueue_job(RawValue::Int(5), Vec::new());
        assert!(heap.has_pending_jobs());
        assert!(heap.execute_pending_job().is_err());
        assert!(heap.has_exception());
        let error = heap.take_exception();
        heap.free(error);
        assert!(!heap.execute_pending_job().unwrap());
    }
}
