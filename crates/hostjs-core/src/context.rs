//! Evaluation contexts
//!
//! A [`Context`] is a cheap, clonable handle. The root context owns the
//! runtime: it registers the per-runtime state (heap stash, scratch objects,
//! sandbox data) and tears everything down when its last clone is dropped.
//! Sibling contexts own an evaluation context on the same runtime. Views,
//! built by the call boundary for every native call, own nothing.
//!
//! Every [`Value`] holds a clone of its context, so a runtime lives at least
//! as long as the handles into it.

use std::any::Any;
use std::fmt;
use std::mem;
use std::rc::Rc;

use hostjs_engine::{ContextId, Engine, EngineResult, InterruptHandler, QuickJs, RawValue};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::error::{HostError, HostResult};
use crate::message::error_message;
use crate::registry::{self, ContextSlot, RuntimeState};
use crate::stash::HeapStash;
use crate::value::Value;

/// Handle to one evaluation context.
#[derive(Clone)]
pub struct Context {
    inner: Rc<ContextInner>,
}

struct ContextInner {
    engine: Rc<dyn Engine>,
    id: ContextId,
    runtime_owner: bool,
    context_owner: bool,
    runtime: Rc<RuntimeState>,
    slot: Rc<ContextSlot>,
    /// Keeps the runtime owner alive while a sibling exists.
    _root: Option<Context>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("runtime_owner", &self.inner.runtime_owner)
            .field("context_owner", &self.inner.context_owner)
            .finish()
    }
}

/// Builder for a root [`Context`] and its runtime.
#[derive(Default)]
pub struct ContextBuilder {
    config: RuntimeConfig,
    interrupt: Option<InterruptHandler>,
    sandbox: Option<Rc<dyn Any>>,
    engine: Option<Rc<dyn Engine>>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole runtime config.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Memory ceiling in bytes; `None` for unbounded.
    pub fn memory_limit(mut self, limit: Option<usize>) -> Self {
        self.config.memory_limit = limit;
        self
    }

    pub fn strip_debug(mut self, strip: bool) -> Self {
        self.config.strip_debug = strip;
        self
    }

    /// Handler polled at every native call entry; returning `true` aborts
    /// the call.
    pub fn interrupt_handler(mut self, handler: impl Fn() -> bool + 'static) -> Self {
        self.interrupt = Some(Rc::new(handler));
        self
    }

    /// Run on `engine` instead of a fresh QuickJS runtime. The engine must
    /// not be in use by another root context.
    pub fn engine(mut self, engine: Rc<dyn Engine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Host data reachable from every context of the runtime through
    /// [`Context::sandbox`].
    pub fn sandbox<T: 'static>(mut self, data: T) -> Self {
        self.sandbox = Some(Rc::new(data));
        self
    }

    /// Create the runtime and its root context.
    pub fn build(self) -> HostResult<Context> {
        let engine: Rc<dyn Engine> = match self.engine {
            Some(engine) => engine,
            None => QuickJs::new().map_err(|err| HostError::internal(err.to_string()))?,
        };
        if registry::lookup(&engine).is_some() {
            return Err(HostError::ContextMismatch);
        }
        let id = engine
            .new_context()
            .map_err(|_| bootstrap_error(&*engine, "context"))?;
        let scratch = engine
            .new_object()
            .map_err(|_| bootstrap_error(&*engine, "heap stash object"))?;
        let global_stash = engine
            .new_object()
            .map_err(|_| bootstrap_error(&*engine, "global stash"))?;

        engine.set_interrupt_handler(self.interrupt);
        engine.set_memory_limit(self.config.memory_limit);

        let slot = Rc::new(ContextSlot::new(global_stash));
        let mut contexts = FxHashMap::default();
        contexts.insert(id, Rc::clone(&slot));
        let runtime = Rc::new(RuntimeState {
            stash: Default::default(),
            scratch,
            contexts: contexts.into(),
            sandbox: self.sandbox,
            config: self.config,
        });
        registry::register(&engine, Rc::clone(&runtime));
        debug!(
            ctx = %id,
            memory_limit = ?runtime.config.memory_limit,
            "runtime created"
        );

        Ok(Context {
            inner: Rc::new(ContextInner {
                engine,
                id,
                runtime_owner: true,
                context_owner: true,
                runtime,
                slot,
                _root: None,
            }),
        })
    }
}

fn bootstrap_error(engine: &dyn Engine, what: &str) -> HostError {
    let exception = engine.take_exception();
    engine.free(exception);
    HostError::internal(format!("failed to create {what}"))
}

impl Context {
    /// Create a runtime with the default config and return its root context.
    pub fn new() -> HostResult<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> HostResult<Self> {
        ContextBuilder::new().config(config).build()
    }

    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    /// Create another evaluation context on the same runtime.
    ///
    /// The sibling shares the heap stash and sandbox data but has its own
    /// global object, global stash and this-stack.
    pub fn new_sibling(&self) -> HostResult<Self> {
        let engine = &self.inner.engine;
        let id = self.check(engine.new_context())?;
        let global_stash = match engine.new_object() {
            Ok(value) => value,
            Err(_) => {
                engine.free_context(id);
                return Err(self.take_exception_error());
            }
        };
        let slot = Rc::new(ContextSlot::new(global_stash));
        self.inner
            .runtime
            .contexts
            .borrow_mut()
            .insert(id, Rc::clone(&slot));
        debug!(ctx = %id, sibling_of = %self.inner.id, "context created");

        Ok(Context {
            inner: Rc::new(ContextInner {
                engine: Rc::clone(engine),
                id,
                runtime_owner: false,
                context_owner: true,
                runtime: Rc::clone(&self.inner.runtime),
                slot,
                _root: Some(self.clone()),
            }),
        })
    }

    /// Non-owning context over `id` on an existing runtime.
    pub fn view(engine: Rc<dyn Engine>, id: ContextId) -> HostResult<Self> {
        let runtime = registry::lookup(&engine).ok_or(HostError::ContextMismatch)?;
        let slot = runtime
            .contexts
            .borrow()
            .get(&id)
            .cloned()
            .ok_or(HostError::ContextMismatch)?;
        Ok(Context {
            inner: Rc::new(ContextInner {
                engine,
                id,
                runtime_owner: false,
                context_owner: false,
                runtime,
                slot,
                _root: None,
            }),
        })
    }

    // ---- accessors -------------------------------------------------------

    pub fn engine(&self) -> &Rc<dyn Engine> {
        &self.inner.engine
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn is_runtime_owner(&self) -> bool {
        self.inner.runtime_owner
    }

    pub fn is_context_owner(&self) -> bool {
        self.inner.context_owner
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.runtime.config
    }

    /// Whether two contexts drive the same runtime.
    pub fn same_runtime(&self, other: &Context) -> bool {
        Rc::ptr_eq(&self.inner.runtime, &other.inner.runtime)
    }

    /// The context's global object.
    pub fn global(&self) -> HostResult<Value> {
        let global = self.check(self.inner.engine.global_object(self.inner.id))?;
        Ok(Value::from_owned(self, global))
    }

    /// Function currently executing, undefined at top level.
    pub fn current_function(&self) -> Value {
        Value::from_owned(self, self.inner.engine.active_function())
    }

    /// Runtime-wide scratch object, shared by every context of the runtime.
    pub fn heap_stash_object(&self) -> Value {
        Value::from_raw(self, self.inner.runtime.scratch)
    }

    /// Scratch object of this evaluation context.
    pub fn global_stash(&self) -> Value {
        Value::from_raw(self, self.inner.slot.global_stash)
    }

    /// Sandbox data registered with [`ContextBuilder::sandbox`].
    pub fn sandbox<T: 'static>(&self) -> Option<Rc<T>> {
        let data = self.inner.runtime.sandbox.clone()?;
        data.downcast::<T>().ok()
    }

    pub fn memory_usage(&self) -> usize {
        self.inner.engine.memory_usage()
    }

    // ---- this-stack ------------------------------------------------------

    /// Push the receiver of a native call. The receiver must live in this
    /// context's runtime.
    pub fn push_this(&self, this: &Value) -> HostResult<()> {
        if !self.same_runtime(this.context()) {
            return Err(HostError::ContextMismatch);
        }
        let raw = this.raw().map_or(RawValue::Undefined, |raw| self.inner.engine.dup(raw));
        self.inner.slot.this_stack.borrow_mut().push(raw);
        Ok(())
    }

    /// Pop the innermost receiver.
    pub fn pop_this(&self) {
        let top = self.inner.slot.this_stack.borrow_mut().pop();
        if let Some(raw) = top {
            self.inner.engine.free(raw);
        }
    }

    /// Receiver of the innermost native call, undefined outside any call.
    pub fn current_this(&self) -> Value {
        let top = self.inner.slot.this_stack.borrow().last().copied();
        Value::from_raw(self, top.unwrap_or_default())
    }

    /// Number of native calls in progress on this context.
    pub fn this_depth(&self) -> usize {
        self.inner.slot.this_stack.borrow().len()
    }

    // ---- scheduling ------------------------------------------------------

    /// Run pending jobs until the queue is empty. A job that throws is
    /// logged and draining continues. Returns the number of jobs run.
    pub fn execute_jobs(&self) -> usize {
        let engine = &self.inner.engine;
        let mut ran = 0;
        loop {
            match engine.execute_pending_job() {
                Ok(false) => break,
                Ok(true) => ran += 1,
                Err(_) => {
                    ran += 1;
                    let error = self.take_exception_error();
                    warn!(ctx = %self.inner.id, %error, "pending job failed");
                }
            }
        }
        ran
    }

    /// Poll the interrupt handler once.
    pub fn execute_timeout_check(&self) -> HostResult<()> {
        match self.inner.engine.interrupt_handler() {
            Some(handler) if handler() => Err(HostError::Interrupted),
            _ => Ok(()),
        }
    }

    // ---- heap stash ------------------------------------------------------

    /// Reclaim hidden metadata of owners nothing else references.
    pub fn compact_heap_stash(&self) -> usize {
        self.inner
            .runtime
            .stash
            .borrow_mut()
            .compact(&*self.inner.engine)
    }

    /// Number of owners with hidden metadata.
    pub fn hidden_entry_count(&self) -> usize {
        self.inner.runtime.stash.borrow().entry_count()
    }

    pub(crate) fn with_stash<T>(&self, f: impl FnOnce(&mut HeapStash, &dyn Engine) -> T) -> T {
        let mut stash = self.inner.runtime.stash.borrow_mut();
        f(&mut stash, &*self.inner.engine)
    }

    // ---- exceptions ------------------------------------------------------

    /// Turn an engine failure into a [`HostError`], taking the pending
    /// exception out of the engine.
    pub fn check<T>(&self, result: EngineResult<T>) -> HostResult<T> {
        result.map_err(|_| self.take_exception_error())
    }

    /// Take the pending exception and extract its message.
    ///
    /// The memory ceiling is lifted while the message is built so that an
    /// out-of-memory exception can still be read.
    pub fn take_exception_error(&self) -> HostError {
        let engine = &self.inner.engine;
        let limit = engine.memory_limit();
        engine.set_memory_limit(None);
        let _restore = scopeguard::guard(limit, |limit| engine.set_memory_limit(limit));

        let exception = engine.take_exception();
        let message = error_message(&**engine, exception);
        engine.free(exception);
        HostError::exception(message)
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        let engine = &self.engine;
        if self.runtime_owner {
            registry::unregister(engine);
            let mut stash = mem::take(&mut *self.runtime.stash.borrow_mut());
            stash.clear(&**engine);
            engine.free(self.runtime.scratch);
        }
        if self.context_owner {
            let leftover: Vec<RawValue> = self.slot.this_stack.borrow_mut().drain(..).collect();
            for raw in leftover {
                engine.free(raw);
            }
            self.runtime.contexts.borrow_mut().remove(&self.id);
            engine.free(self.slot.global_stash);
            engine.free_context(self.id);
            debug!(ctx = %self.id, "context destroyed");
        }
        if self.runtime_owner {
            engine.shutdown();
            debug!("runtime destroyed");
        }
    }
}
