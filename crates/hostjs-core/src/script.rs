//! Compiled units and cross-context transfer

use hostjs_engine::RawValue;
use tracing::debug;

use crate::context::Context;
use crate::error::{HostError, HostResult};
use crate::value::Value;

impl Context {
    /// Compile `source` without running it.
    pub fn compile(&self, source: &str, filename: &str) -> HostResult<Value> {
        let engine = self.engine();
        let unit = self.check(engine.compile(self.id(), source, filename))?;
        Ok(Value::from_owned(self, unit))
    }

    /// Run a unit produced by [`Context::compile`] or
    /// [`Context::load_function`].
    pub fn call_compiled(&self, unit: &Value) -> HostResult<Value> {
        let raw = self.owned_raw(unit)?;
        let engine = self.engine();
        let result = self.check(engine.eval_function(self.id(), raw))?;
        Ok(Value::from_owned(self, result))
    }

    /// Serialize a compiled unit. Debug info is left out when the runtime
    /// was configured with `strip_debug`.
    pub fn dump_function(&self, unit: &Value) -> HostResult<Vec<u8>> {
        let raw = self.owned_raw(unit)?;
        let strip_debug = self.config().strip_debug;
        let bytes = self.check(self.engine().write_object(raw, strip_debug))?;
        debug!(len = bytes.len(), strip_debug, "dumped compiled unit");
        Ok(bytes)
    }

    /// Rebuild a compiled unit from [`Context::dump_function`] output.
    pub fn load_function(&self, bytes: &[u8]) -> HostResult<Value> {
        let unit = self.check(self.engine().read_object(bytes))?;
        Ok(Value::from_owned(self, unit))
    }

    /// Compile and run in one step.
    pub fn eval(&self, source: &str, filename: &str) -> HostResult<Value> {
        let unit = self.compile(source, filename)?;
        self.call_compiled(&unit)
    }

    /// Make `value` usable from `target`.
    ///
    /// Contexts on the same runtime share the value itself. Across runtimes
    /// the value is copied through JSON, so functions and other values
    /// without a JSON form arrive as `undefined`.
    pub fn xfer_between_contexts(&self, value: &Value, target: &Context) -> HostResult<Value> {
        if target.same_runtime(value.context()) {
            let raw = value.raw().unwrap_or_default();
            return Ok(Value::from_raw(target, raw));
        }
        let raw = value.raw().unwrap_or_default();
        let engine = value.context().engine();
        match value.context().check(engine.to_json(raw))? {
            Some(text) => Value::from_json(target, &text),
            None => Ok(Value::undefined(target)),
        }
    }

    fn owned_raw(&self, value: &Value) -> HostResult<RawValue> {
        if !self.same_runtime(value.context()) {
            return Err(HostError::ContextMismatch);
        }
        Ok(value.raw().unwrap_or_default())
    }
}
