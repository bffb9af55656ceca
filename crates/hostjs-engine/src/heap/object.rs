//! Property storage: lookup along the prototype chain, stores, deletes

use std::mem;

use super::Heap;
use super::cell::{
    CellKind, CellTable, ELEMENT_SIZE, ObjectClass, ObjectData, PROPERTY_SIZE, Property,
    PropertySlot,
};
use crate::engine::Engine;
use crate::error::{EngineResult, ErrorKind};
use crate::value::{ObjectId, PropertyKey, RawValue};

/// What a read resolved to; both payloads carry a unit for the reader.
enum Lookup {
    Value(RawValue),
    Getter(RawValue),
}

/// What a write resolved to once the table borrow has ended.
enum Store {
    /// The value was stored; the listed values lost their slot.
    Done(Vec<RawValue>),
    /// An accessor takes the value (unit held on the setter).
    Setter(RawValue),
    Ignored,
    NotObject,
    InvalidLength,
    OutOfMemory,
}

/// Own slot of `object` for `key`, synthesizing the array `length` and the
/// global `globalThis`.
fn own_slot(object: &ObjectData, id: ObjectId, key: &PropertyKey) -> Option<PropertySlot> {
    if let ObjectClass::Array(elements) = &object.class {
        match key {
            PropertyKey::Index(index) => {
                return elements.get(*index as usize).copied().map(PropertySlot::Data);
            }
            PropertyKey::Name(name) if name == "length" => {
                return Some(PropertySlot::Data(RawValue::number(elements.len() as f64)));
            }
            PropertyKey::Name(_) => {}
        }
    }
    if let Some(property) = object.props.get(key.to_name().as_str()) {
        return Some(property.slot);
    }
    match (&object.class, key.as_name()) {
        (ObjectClass::Global, Some("globalThis")) => Some(PropertySlot::Data(RawValue::Ref(id))),
        _ => None,
    }
}

/// Walk the prototype chain starting at `target`.
fn find_slot(table: &CellTable, target: RawValue, key: &PropertyKey) -> Option<PropertySlot> {
    let mut current = target.object_id();
    while let Some(id) = current {
        let cell = table.get(id)?;
        match &cell.kind {
            CellKind::Str(text) => {
                return match key.as_name() {
                    Some("length") => Some(PropertySlot::Data(RawValue::number(
                        text.chars().count() as f64,
                    ))),
                    _ => None,
                };
            }
            CellKind::Object(object) => {
                if let Some(slot) = own_slot(object, id, key) {
                    return Some(slot);
                }
                current = object.proto;
            }
        }
    }
    None
}

fn slot_values(slot: PropertySlot) -> Vec<RawValue> {
    match slot {
        PropertySlot::Data(value) => vec![value],
        PropertySlot::Accessor { getter, setter } => vec![getter, setter],
    }
}

impl Heap {
    pub(crate) fn lookup_property(&self, target: RawValue, key: &PropertyKey) -> bool {
        let table = self.table.borrow();
        if table.object(target).is_none() {
            return false;
        }
        find_slot(&table, target, key).is_some()
    }

    pub(crate) fn read_property(&self, target: RawValue, key: &PropertyKey) -> EngineResult<RawValue> {
        if target.is_nullish() {
            return Err(self.throw_error(
                ErrorKind::TypeError,
                &format!("cannot read property '{key}' of {}", self.kind_of(target)),
            ));
        }
        let lookup = {
            let mut table = self.table.borrow_mut();
            match find_slot(&table, target, key) {
                Some(PropertySlot::Data(value)) => {
                    table.incref(value);
                    Lookup::Value(value)
                }
                Some(PropertySlot::Accessor { getter, .. }) if !getter.is_undefined() => {
                    table.incref(getter);
                    Lookup::Getter(getter)
                }
                _ => Lookup::Value(RawValue::Undefined),
            }
        };
        match lookup {
            Lookup::Value(value) => Ok(value),
            Lookup::Getter(getter) => {
                let result = self.invoke(getter, target, &[]);
                self.release(getter);
                result
            }
        }
    }

    pub(crate) fn write_property(
        &self,
        target: RawValue,
        key: &PropertyKey,
        value: RawValue,
    ) -> EngineResult<()> {
        let plan = {
            let mut table = self.table.borrow_mut();
            plan_store(&mut table, target, key, value)
        };
        match plan {
            Store::Done(displaced) => {
                for old in displaced {
                    self.release(old);
                }
                Ok(())
            }
            Store::Setter(setter) => {
                let result = self.invoke(setter, target, &[value]);
                self.release(setter);
                self.release(value);
                result.map(|returned| self.release(returned))
            }
            Store::Ignored => {
                self.release(value);
                Ok(())
            }
            Store::NotObject => {
                self.release(value);
                Err(self.throw_error(
                    ErrorKind::TypeError,
                    &format!("cannot set property '{key}' of {}", self.kind_of(target)),
                ))
            }
            Store::InvalidLength => {
                self.release(value);
                Err(self.throw_error(ErrorKind::RangeError, "invalid array length"))
            }
            Store::OutOfMemory => {
                self.release(value);
                Err(self.out_of_memory())
            }
        }
    }

    pub(crate) fn remove_property(&self, target: RawValue, key: &PropertyKey) -> EngineResult<bool> {
        if target.is_nullish() {
            return Err(self.throw_error(
                ErrorKind::TypeError,
                &format!("cannot delete property '{key}' of {}", self.kind_of(target)),
            ));
        }
        let removed = {
            let mut table = self.table.borrow_mut();
            let Some(object) = table.object_mut(target) else {
                return Ok(true);
            };
            match (&mut object.class, key) {
                (ObjectClass::Array(elements), PropertyKey::Index(index)) => elements
                    .get_mut(*index as usize)
                    .map(|slot| vec![mem::take(slot)])
                    .unwrap_or_default(),
                (ObjectClass::Array(_), PropertyKey::Name(name)) if name == "length" => {
                    return Ok(false);
                }
                _ => object
                    .props
                    .shift_remove(key.to_name().as_str())
                    .map(|property| slot_values(property.slot))
                    .unwrap_or_default(),
            }
        };
        for value in removed {
            self.release(value);
        }
        Ok(true)
    }

    pub(crate) fn enumerate_keys(&self, target: RawValue) -> Vec<PropertyKey> {
        let table = self.table.borrow();
        let Some(object) = table.object(target) else {
            return Vec::new();
        };
        let mut keys = Vec::new();
        if let ObjectClass::Array(elements) = &object.class {
            keys.extend((0..elements.len() as u32).map(PropertyKey::Index));
        }
        keys.extend(
            object
                .props
                .iter()
                .filter(|(_, property)| property.enumerable)
                .map(|(name, _)| PropertyKey::from(name.as_str())),
        );
        keys
    }

    pub(crate) fn install_accessor(
        &self,
        target: RawValue,
        name: &str,
        getter: RawValue,
        setter: RawValue,
    ) -> EngineResult<()> {
        enum Outcome {
            Installed(Option<PropertySlot>),
            NotObject,
            OutOfMemory,
        }
        let outcome = {
            let mut table = self.table.borrow_mut();
            let exists = table
                .object(target)
                .map(|object| object.props.contains_key(name));
            match exists {
                None => Outcome::NotObject,
                Some(false) if table.would_exceed(PROPERTY_SIZE) => Outcome::OutOfMemory,
                Some(exists) => {
                    let id = target.object_id();
                    let slot = PropertySlot::Accessor { getter, setter };
                    let previous = table.object_mut(target).and_then(|object| {
                        object.props.insert(
                            name.to_string(),
                            Property {
                                slot,
                                enumerable: false,
                            },
                        )
                    });
                    if let (false, Some(id)) = (exists, id) {
                        table.charge(id, PROPERTY_SIZE);
                    }
                    Outcome::Installed(previous.map(|property| property.slot))
                }
            }
        };
        match outcome {
            Outcome::Installed(previous) => {
                for value in previous.map(slot_values).unwrap_or_default() {
                    self.release(value);
                }
                Ok(())
            }
            Outcome::NotObject => {
                self.release(getter);
                self.release(setter);
                Err(self.throw_error(
                    ErrorKind::TypeError,
                    &format!("cannot define property '{name}' on a non-object"),
                ))
            }
            Outcome::OutOfMemory => {
                self.release(getter);
                self.release(setter);
                Err(self.out_of_memory())
            }
        }
    }
}

fn plan_store(table: &mut CellTable, target: RawValue, key: &PropertyKey, value: RawValue) -> Store {
    let Some(id) = target.object_id() else {
        return Store::NotObject;
    };
    let Some(object) = table.object(target) else {
        return Store::NotObject;
    };

    if let ObjectClass::Array(elements) = &object.class {
        match key {
            PropertyKey::Index(index) => {
                let index = *index as usize;
                let grow = (index + 1).saturating_sub(elements.len());
                if grow > 0 && table.would_exceed(grow * ELEMENT_SIZE) {
                    return Store::OutOfMemory;
                }
                let Some(ObjectData {
                    class: ObjectClass::Array(elements),
                    ..
                }) = table.object_mut(target)
                else {
                    return Store::NotObject;
                };
                if grow > 0 {
                    elements.resize(index + 1, RawValue::Undefined);
                }
                let old = mem::replace(&mut elements[index], value);
                if grow > 0 {
                    table.charge(id, grow * ELEMENT_SIZE);
                }
                return Store::Done(vec![old]);
            }
            PropertyKey::Name(name) if name == "length" => {
                let Some(length) = value
                    .as_f64()
                    .filter(|n| n.fract() == 0.0 && *n >= 0.0 && *n < f64::from(u32::MAX))
                else {
                    return Store::InvalidLength;
                };
                let length = length as usize;
                let grow = length.saturating_sub(elements.len());
                if grow > 0 && table.would_exceed(grow * ELEMENT_SIZE) {
                    return Store::OutOfMemory;
                }
                let Some(ObjectData {
                    class: ObjectClass::Array(elements),
                    ..
                }) = table.object_mut(target)
                else {
                    return Store::NotObject;
                };
                let truncated = if length < elements.len() {
                    elements.drain(length..).collect()
                } else {
                    elements.resize(length, RawValue::Undefined);
                    Vec::new()
                };
                if grow > 0 {
                    table.charge(id, grow * ELEMENT_SIZE);
                }
                return Store::Done(truncated);
            }
            PropertyKey::Name(_) => {}
        }
    }

    let name = key.to_name();
    if let Some(slot) = object.props.get(name.as_str()).map(|property| property.slot) {
        return match slot {
            PropertySlot::Data(_) => {
                let previous = table
                    .object_mut(target)
                    .and_then(|object| object.props.get_mut(name.as_str()))
                    .map(|property| mem::replace(&mut property.slot, PropertySlot::Data(value)));
                Store::Done(previous.map(slot_values).unwrap_or_default())
            }
            PropertySlot::Accessor { setter, .. } => setter_plan(table, setter),
        };
    }

    // inherited accessors intercept the store; inherited data is shadowed
    let mut proto = object.proto;
    while let Some(proto_id) = proto {
        let Some(parent) = table.get(proto_id).and_then(|cell| cell.kind.as_object()) else {
            break;
        };
        match parent.props.get(name.as_str()).map(|property| property.slot) {
            Some(PropertySlot::Accessor { setter, .. }) => return setter_plan(table, setter),
            Some(PropertySlot::Data(_)) => break,
            None => proto = parent.proto,
        }
    }

    if table.would_exceed(PROPERTY_SIZE) {
        return Store::OutOfMemory;
    }
    if let Some(object) = table.object_mut(target) {
        object.props.insert(name, Property::data(value, true));
    }
    table.charge(id, PROPERTY_SIZE);
    Store::Done(Vec::new())
}

fn setter_plan(table: &mut CellTable, setter: RawValue) -> Store {
    if setter.is_undefined() {
        Store::Ignored
    } else {
        table.incref(setter);
        Store::Setter(setter)
    }
}
