//! Per-runtime state, reachable from any context of the runtime.
//!
//! The root [`Context`](crate::Context) registers its runtime here on
//! creation and removes it when dropped. Contexts built by the call boundary
//! are views: they only know the engine and a [`ContextId`], and find the
//! heap stash, scratch objects and this-stack through this table.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use hostjs_engine::{ContextId, Engine, RawValue};
use rustc_hash::FxHashMap;

use crate::config::RuntimeConfig;
use crate::stash::HeapStash;

/// State shared by every context of one runtime.
pub(crate) struct RuntimeState {
    pub(crate) stash: RefCell<HeapStash>,
    /// Runtime-wide scratch object (one owned unit).
    pub(crate) scratch: RawValue,
    pub(crate) contexts: RefCell<FxHashMap<ContextId, Rc<ContextSlot>>>,
    pub(crate) sandbox: Option<Rc<dyn Any>>,
    pub(crate) config: RuntimeConfig,
}

/// State of one evaluation context.
pub(crate) struct ContextSlot {
    /// Receivers of the native calls in progress, innermost last. Each entry
    /// holds one unit.
    pub(crate) this_stack: RefCell<Vec<RawValue>>,
    /// Per-context scratch object (one owned unit).
    pub(crate) global_stash: RawValue,
}

impl ContextSlot {
    pub(crate) fn new(global_stash: RawValue) -> Self {
        Self {
            this_stack: RefCell::new(Vec::new()),
            global_stash,
        }
    }
}

type RuntimeKey = usize;

thread_local! {
    static RUNTIMES: RefCell<FxHashMap<RuntimeKey, Rc<RuntimeState>>> =
        RefCell::new(FxHashMap::default());
}

fn runtime_key(engine: &Rc<dyn Engine>) -> RuntimeKey {
    Rc::as_ptr(engine) as *const () as usize
}

pub(crate) fn register(engine: &Rc<dyn Engine>, state: Rc<RuntimeState>) {
    let key = runtime_key(engine);
    RUNTIMES.with(|map| {
        map.borrow_mut().insert(key, state);
    });
}

pub(crate) fn unregister(engine: &Rc<dyn Engine>) -> Option<Rc<RuntimeState>> {
    let key = runtime_key(engine);
    RUNTIMES.with(|map| map.borrow_mut().remove(&key))
}

pub(crate) fn lookup(engine: &Rc<dyn Engine>) -> Option<Rc<RuntimeState>> {
    let key = runtime_key(engine);
    RUNTIMES.with(|map| map.borrow().get(&key).cloned())
}

/// Number of runtimes registered on this thread.
#[cfg(test)]
pub(crate) fn runtime_count() -> usize {
    RUNTIMES.with(|map| map.borrow().len())
}
