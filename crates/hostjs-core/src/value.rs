//! Value handles with write-through property views
//!
//! A [`Value`] owns one reference unit on the engine value it holds and
//! gives it back on drop. A handle obtained with [`Value::get`] also
//! remembers its container and key and holds a unit on the container, so
//! assigning to the handle writes into the container, even when the
//! property did not exist yet.
//!
//! ```
//! use hostjs::{Context, Value};
//!
//! let ctx = Context::new().unwrap();
//! let root = Value::new_object(&ctx).unwrap();
//! root.get("a").unwrap().set(Value::new_object(&ctx).unwrap()).unwrap();
//! root.get("a").unwrap().get("b").unwrap().set("x").unwrap();
//! assert_eq!(root.to_json().unwrap(), r#"{"a":{"b":"x"}}"#);
//! ```

use std::fmt;

use hostjs_engine::{ObjectId, RawValue, ValueType};

use crate::context::Context;
use crate::convert::{FromJs, IntoJs};
use crate::error::{HostError, HostResult};
use crate::function::{IntoReturn, NativeFunction};
use crate::key::{IntoKey, Key};
use crate::message::error_message;
use crate::write_back::WriteBack;

/// Container and key a handle was looked up from (one unit on `value`).
struct Parent {
    value: RawValue,
    key: Key,
}

/// RAII handle to one engine value.
pub struct Value {
    ctx: Context,
    /// `None` for an empty handle, distinct from holding `undefined`.
    raw: Option<RawValue>,
    parent: Option<Parent>,
}

impl Value {
    // ---- construction ----------------------------------------------------

    /// Convert a Rust value into a fresh root-level handle.
    pub fn new<T: IntoJs>(ctx: &Context, value: T) -> HostResult<Self> {
        let raw = value.into_js(ctx)?;
        Ok(Self::from_owned(ctx, raw))
    }

    pub fn new_object(ctx: &Context) -> HostResult<Self> {
        let raw = ctx.check(ctx.engine().new_object())?;
        Ok(Self::from_owned(ctx, raw))
    }

    pub fn new_array(ctx: &Context) -> HostResult<Self> {
        let raw = ctx.check(ctx.engine().new_array())?;
        Ok(Self::from_owned(ctx, raw))
    }

    /// Wrap a native function; see [`Context::new_function`].
    pub fn new_function<F, Args, R>(ctx: &Context, name: &str, function: F) -> HostResult<Self>
    where
        F: NativeFunction<Args, R>,
        Args: 'static,
        R: IntoReturn + 'static,
    {
        ctx.new_function(name, function)
    }

    pub fn undefined(ctx: &Context) -> Self {
        Self::from_owned(ctx, RawValue::Undefined)
    }

    pub fn null(ctx: &Context) -> Self {
        Self::from_owned(ctx, RawValue::Null)
    }

    /// Handle holding no value.
    pub fn empty(ctx: &Context) -> Self {
        Self {
            ctx: ctx.clone(),
            raw: None,
            parent: None,
        }
    }

    /// Wrap a borrowed raw value, taking a unit of its own.
    pub fn from_raw(ctx: &Context, raw: RawValue) -> Self {
        Self::from_owned(ctx, ctx.engine().dup(raw))
    }

    /// Wrap a raw value, adopting the caller's unit.
    pub fn from_owned(ctx: &Context, raw: RawValue) -> Self {
        Self {
            ctx: ctx.clone(),
            raw: Some(raw),
            parent: None,
        }
    }

    /// Parse a JSON document.
    pub fn from_json(ctx: &Context, text: &str) -> HostResult<Self> {
        let raw = ctx.check(ctx.engine().parse_json(text))?;
        Ok(Self::from_owned(ctx, raw))
    }

    // ---- ownership -------------------------------------------------------

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Held value, `None` for an empty handle.
    pub fn raw(&self) -> Option<RawValue> {
        self.raw
    }

    /// Give the held unit to the caller; an empty handle yields `undefined`.
    pub fn release(mut self) -> RawValue {
        self.raw.take().unwrap_or_default()
    }

    /// The same value without the container binding.
    pub fn detach(mut self) -> Value {
        let raw = self.raw.take();
        Value {
            ctx: self.ctx.clone(),
            raw,
            parent: None,
        }
    }

    pub(crate) fn parent(&self) -> Option<(RawValue, &Key)> {
        self.parent.as_ref().map(|parent| (parent.value, &parent.key))
    }

    /// Whether assignments through this handle write into a container.
    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    /// Key this handle was looked up under.
    pub fn parent_key(&self) -> Option<&Key> {
        self.parent.as_ref().map(|parent| &parent.key)
    }

    pub(crate) fn clear_value(&mut self) {
        if let Some(raw) = self.raw.take() {
            self.ctx.engine().free(raw);
        }
    }

    /// Install an owned unit as the held value.
    pub(crate) fn replace_value(&mut self, raw: RawValue) {
        self.clear_value();
        self.raw = Some(raw);
    }

    /// Identity of a heap value, `None` for scalars and empty handles.
    pub fn identity(&self) -> Option<ObjectId> {
        self.ctx.engine().identity(self.raw?)
    }

    /// Units held on the value by everyone, this handle included.
    pub fn ref_count(&self) -> u32 {
        self.raw.map_or(0, |raw| self.ctx.engine().ref_count(raw))
    }

    // ---- property access -------------------------------------------------

    /// Handle bound to `self[key]`, empty when the property is absent.
    pub fn get<K: IntoKey>(&self, key: K) -> HostResult<Value> {
        let key = key.into_key()?;
        let raw = self.raw.ok_or(HostError::EmptyParent)?;
        let engine = self.ctx.engine();
        let property = key.to_property_key();
        let mut child = Value {
            ctx: self.ctx.clone(),
            raw: None,
            parent: Some(Parent {
                value: engine.dup(raw),
                key,
            }),
        };
        if raw.is_undefined() || !self.ctx.check(engine.has_property(raw, &property))? {
            return Ok(child);
        }
        child.raw = Some(self.ctx.check(engine.get_property(raw, &property))?);
        Ok(child)
    }

    /// `key in self`; `false` for empty and nullish handles.
    pub fn has<K: IntoKey>(&self, key: K) -> HostResult<bool> {
        let key = key.into_key()?;
        match self.raw {
            Some(raw) if !raw.is_nullish() => {
                let engine = self.ctx.engine();
                self.ctx.check(engine.has_property(raw, &key.to_property_key()))
            }
            _ => Ok(false),
        }
    }

    /// `delete self[key]`.
    pub fn del<K: IntoKey>(&self, key: K) -> HostResult<bool> {
        let key = key.into_key()?;
        let raw = self.raw.ok_or(HostError::EmptyParent)?;
        let engine = self.ctx.engine();
        self.ctx.check(engine.delete_property(raw, &key.to_property_key()))
    }

    /// `self[key] = value`, returning the bound child.
    pub fn add<K: IntoKey, T: IntoJs>(&self, key: K, value: T) -> HostResult<Value> {
        let mut child = self.get(key)?;
        child.set(value)?;
        Ok(child)
    }

    /// Assign through the handle, writing into the container if bound.
    pub fn set<T: IntoJs>(&mut self, value: T) -> HostResult<()> {
        let mut guard = WriteBack::begin(self);
        guard.install(value)?;
        guard.commit()
    }

    /// Drop the value and, if bound, delete the property from the container.
    pub fn remove(&mut self) -> HostResult<()> {
        self.clear_value();
        match &self.parent {
            Some(parent) => {
                let engine = self.ctx.engine();
                self.ctx
                    .check(engine.delete_property(parent.value, &parent.key.to_property_key()))
                    .map(|_| ())
            }
            None => Ok(()),
        }
    }

    /// Own enumerable properties, in engine order.
    pub fn iterate(&self) -> HostResult<Vec<(Key, Value)>> {
        self.keys()?
            .into_iter()
            .map(|key| {
                let child = self.get(&key)?;
                Ok((key, child))
            })
            .collect()
    }

    /// Own enumerable keys.
    pub fn keys(&self) -> HostResult<Vec<Key>> {
        match self.raw {
            Some(raw) if self.is_object() || self.is_function() => {
                let keys = self.ctx.check(self.ctx.engine().own_keys(raw))?;
                Ok(keys.into_iter().map(Key::from).collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Array length, `None` for anything but an array.
    pub fn len(&self) -> Option<u32> {
        self.ctx.engine().array_length(self.raw?)
    }

    // ---- type predicates -------------------------------------------------

    fn value_type(&self) -> Option<ValueType> {
        self.raw.map(|raw| self.ctx.engine().type_of(raw))
    }

    /// `typeof`-style name, `"empty"` for an empty handle.
    pub fn type_name(&self) -> &'static str {
        self.value_type().map_or("empty", |kind| kind.name())
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_none()
    }

    pub fn is_undefined(&self) -> bool {
        self.raw.is_some_and(|raw| raw.is_undefined())
    }

    pub fn is_null(&self) -> bool {
        self.raw.is_some_and(|raw| raw.is_null())
    }

    pub fn is_boolean(&self) -> bool {
        self.value_type() == Some(ValueType::Boolean)
    }

    pub fn is_number(&self) -> bool {
        self.value_type() == Some(ValueType::Number)
    }

    pub fn is_string(&self) -> bool {
        self.value_type() == Some(ValueType::String)
    }

    pub fn is_function(&self) -> bool {
        self.value_type() == Some(ValueType::Function)
    }

    /// Objects of every kind, arrays and errors included; not functions.
    pub fn is_object(&self) -> bool {
        self.value_type() == Some(ValueType::Object)
    }

    pub fn is_array(&self) -> bool {
        self.raw.is_some_and(|raw| self.ctx.engine().is_array(raw))
    }

    pub fn is_error(&self) -> bool {
        self.raw.is_some_and(|raw| self.ctx.engine().is_error(raw))
    }

    /// Plain key/value objects: objects that are neither arrays nor errors.
    pub fn is_map(&self) -> bool {
        self.is_object() && !self.is_array() && !self.is_error()
    }

    /// Neither empty, `undefined` nor `null`.
    pub fn is_object_coercible(&self) -> bool {
        self.raw.is_some_and(|raw| !raw.is_nullish())
    }

    pub fn is_truthy(&self) -> bool {
        self.raw.is_some_and(|raw| self.ctx.engine().to_bool(raw))
    }

    // ---- conversion ------------------------------------------------------

    pub fn to<T: FromJs>(&self) -> HostResult<T> {
        T::from_js(self)
    }

    /// Script-level string conversion of any value.
    pub fn to_js_string(&self) -> HostResult<String> {
        let raw = self.raw.unwrap_or_default();
        self.ctx.check(self.ctx.engine().to_string(raw))
    }

    /// `JSON.stringify`; values without a JSON form give `"undefined"`.
    pub fn to_json(&self) -> HostResult<String> {
        let raw = self.raw.unwrap_or_default();
        let text = self.ctx.check(self.ctx.engine().to_json(raw))?;
        Ok(text.unwrap_or_else(|| "undefined".to_string()))
    }

    pub fn to_serde(&self) -> HostResult<serde_json::Value> {
        let raw = self.raw.unwrap_or_default();
        match self.ctx.check(self.ctx.engine().to_json(raw))? {
            Some(text) => Ok(serde_json::from_str(&text)?),
            None => Ok(serde_json::Value::Null),
        }
    }

    /// Deep copy through JSON.
    pub fn stringify_parse(&self) -> HostResult<Value> {
        Value::from_json(&self.ctx, &self.to_json()?)
    }

    /// Message of a thrown value; see the crate docs for the format.
    pub fn to_error_message(&self) -> String {
        error_message(&**self.ctx.engine(), self.raw.unwrap_or_default())
    }

    // ---- hidden metadata -------------------------------------------------

    /// Attach host-only `value` under `name`; invisible to scripts.
    pub fn add_hidden<T: IntoJs>(&self, name: &str, value: T) -> HostResult<()> {
        let owner = self.raw.ok_or(HostError::EmptyParent)?;
        let raw = value.into_js(&self.ctx)?;
        let attached = self
            .ctx
            .with_stash(|stash, engine| stash.attach(engine, owner, name, raw));
        self.ctx.engine().free(raw);
        attached
    }

    pub fn has_hidden(&self, name: &str) -> bool {
        match self.raw {
            Some(owner) => self.ctx.with_stash(|stash, engine| stash.has(engine, owner, name)),
            None => false,
        }
    }

    /// Hidden value under `name`, an undefined handle if there is none.
    pub fn get_hidden(&self, name: &str) -> HostResult<Value> {
        if !self.has_hidden(name) {
            return Ok(Value::undefined(&self.ctx));
        }
        let owner = self.raw.ok_or(HostError::EmptyParent)?;
        let raw = self
            .ctx
            .with_stash(|stash, engine| stash.get(engine, owner, name))?;
        Ok(Value::from_raw(&self.ctx, raw))
    }

    // ---- calls -----------------------------------------------------------

    /// Call the held function with an undefined receiver.
    pub fn call(&self, args: &[Value]) -> HostResult<Value> {
        self.call_with_this(&Value::undefined(&self.ctx), args)
    }

    /// Receiver and arguments must live in this value's runtime.
    pub fn call_with_this(&self, this: &Value, args: &[Value]) -> HostResult<Value> {
        let foreign = |value: &Value| !self.ctx.same_runtime(&value.ctx);
        if foreign(this) || args.iter().any(foreign) {
            return Err(HostError::ContextMismatch);
        }
        let func = self.raw.unwrap_or_default();
        let raw_args: Vec<RawValue> = args.iter().map(|arg| arg.raw.unwrap_or_default()).collect();
        let engine = self.ctx.engine();
        let result = self
            .ctx
            .check(engine.call(func, this.raw.unwrap_or_default(), &raw_args))?;
        Ok(Value::from_owned(&self.ctx, result))
    }

    /// `self[name](...args)` with `self` as the receiver.
    pub fn call_prop(&self, name: &str, args: &[Value]) -> HostResult<Value> {
        let method = self.get(name)?;
        if !method.is_function() {
            return Err(HostError::type_mismatch(
                format!("function at '{name}'"),
                method.type_name(),
            ));
        }
        method.call_with_this(self, args)
    }

    /// Install an accessor property built from two function handles.
    /// Pass an undefined handle to leave one side unset.
    pub fn add_getter_setter(&self, name: &str, getter: &Value, setter: &Value) -> HostResult<()> {
        let target = self.raw.ok_or(HostError::EmptyParent)?;
        let getter = getter.into_js(&self.ctx)?;
        let setter = match setter.into_js(&self.ctx) {
            Ok(setter) => setter,
            Err(err) => {
                self.ctx.engine().free(getter);
                return Err(err);
            }
        };
        let engine = self.ctx.engine();
        self.ctx
            .check(engine.define_accessor(target, name, getter, setter))
    }
}

impl Clone for Value {
    fn clone(&self) -> Self {
        let engine = self.ctx.engine();
        Self {
            ctx: self.ctx.clone(),
            raw: self.raw.map(|raw| engine.dup(raw)),
            parent: self.parent.as_ref().map(|parent| Parent {
                value: engine.dup(parent.value),
                key: parent.key.clone(),
            }),
        }
    }
}

impl Drop for Value {
    fn drop(&mut self) {
        let engine = self.ctx.engine();
        if let Some(raw) = self.raw.take() {
            engine.free(raw);
        }
        if let Some(parent) = self.parent.take() {
            engine.free(parent.value);
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.raw {
            None => write!(f, "Value(<empty>)"),
            Some(raw) => match self.ctx.engine().to_string(raw) {
                Ok(text) => write!(f, "Value({text})"),
                Err(_) => {
                    let exception = self.ctx.engine().take_exception();
                    self.ctx.engine().free(exception);
                    write!(f, "Value(<opaque>)")
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_holds_one_unit() {
        let ctx = Context::new().unwrap();
        let object = Value::new_object(&ctx).unwrap();
        assert_eq!(object.ref_count(), 1);
        {
            let copy = object.clone();
            assert_eq!(copy.ref_count(), 2);
        }
        assert_eq!(object.ref_count(), 1);

        let raw = object.clone().release();
        assert_eq!(object.ref_count(), 2);
        ctx.engine().free(raw);
        assert_eq!(object.ref_count(), 1);
    }

    #[test]
    fn test_child_holds_parent_unit() {
        let ctx = Context::new().unwrap();
        let root = Value::new_object(&ctx).unwrap();
        let child = root.get("missing").unwrap();
        assert!(child.is_empty());
        assert!(child.has_parent());
        assert_eq!(child.parent_key(), Some(&Key::Name("missing".into())));
        assert!(!root.has_parent());
        assert_eq!(root.ref_count(), 2);
        drop(child);
        assert_eq!(root.ref_count(), 1);
    }

    #[test]
    fn test_get_on_empty_and_undefined() {
        let ctx = Context::new().unwrap();
        let empty = Value::empty(&ctx);
        assert!(matches!(empty.get("x"), Err(HostError::EmptyParent)));
        assert!(!empty.has("x").unwrap());

        let undefined = Value::undefined(&ctx);
        let child = undefined.get("x").unwrap();
        assert!(child.is_empty());
        assert!(!undefined.has("x").unwrap());
    }

    #[test]
    fn test_negative_key_is_invalid() {
        let ctx = Context::new().unwrap();
        let array = Value::new_array(&ctx).unwrap();
        assert!(matches!(array.get(-1), Err(HostError::InvalidKey(-1))));
    }

    #[test]
    fn test_remove_deletes_from_parent() {
        let ctx = Context::new().unwrap();
        let root = Value::new(&ctx, serde_json::json!({"a": 1, "b": 2})).unwrap();
        let mut a = root.get("a").unwrap();
        a.remove().unwrap();
        assert!(a.is_empty());
        assert!(!root.has("a").unwrap());
        assert_eq!(root.to_json().unwrap(), r#"{"b":2}"#);

        // assigning again recreates the property
        a.set(3).unwrap();
        assert_eq!(root.to_json().unwrap(), r#"{"b":2,"a":3}"#);
    }

    #[test]
    fn test_predicates() {
        let ctx = Context::new().unwrap();
        let array = Value::new(&ctx, vec![1, 2]).unwrap();
        assert!(array.is_array() && array.is_object() && !array.is_map());
        assert_eq!(array.len(), Some(2));

        let map = Value::new_object(&ctx).unwrap();
        assert!(map.is_map() && map.is_truthy() && map.is_object_coercible());
        assert_eq!(map.len(), None);

        let null = Value::null(&ctx);
        assert!(null.is_null() && !null.is_object_coercible() && !null.is_truthy());
        assert_eq!(Value::empty(&ctx).type_name(), "empty");
        assert_eq!(Value::new(&ctx, "s").unwrap().type_name(), "string");
    }

    #[test]
    fn test_iterate_in_insertion_order() {
        let ctx = Context::new().unwrap();
        let object = Value::from_json(&ctx, r#"{"z":1,"a":2}"#).unwrap();
        let pairs: Vec<(String, i32)> = object
            .iterate()
            .unwrap()
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to::<i32>().unwrap()))
            .collect();
        assert_eq!(pairs, vec![("z".to_string(), 1), ("a".to_string(), 2)]);
    }

    #[test]
    fn test_detach_drops_binding() {
        let ctx = Context::new().unwrap();
        let root = Value::new_object(&ctx).unwrap();
        let mut child = root.add("k", 1).unwrap().detach();
        child.set(2).unwrap();
        assert_eq!(root.get("k").unwrap().to::<i32>().unwrap(), 1);
        assert_eq!(root.ref_count(), 1);
    }

    #[test]
    fn test_debug_output() {
        let ctx = Context::new().unwrap();
        assert_eq!(format!("{:?}", Value::new(&ctx, 5).unwrap()), "Value(5)");
        assert_eq!(format!("{:?}", Value::empty(&ctx)), "Value(<empty>)");
    }
}
