//! `JSON.stringify` / `JSON.parse` over heap values, via `serde_json`

use std::rc::Rc;

use serde_json::{Map, Number, Value as Json};

use super::Heap;
use super::cell::{CellKind, ObjectClass, ObjectData};
use crate::engine::Engine;
use crate::error::{EngineResult, ErrorKind};
use crate::value::{ObjectId, PropertyKey, RawValue};

const MAX_DEPTH: usize = 256;

/// Largest integer a double represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

enum Shape {
    Str(Rc<str>),
    Array(u32),
    Object,
    Skip,
}

fn number_to_json(value: f64) -> Json {
    if !value.is_finite() {
        return Json::Null;
    }
    if value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER {
        return Json::from(value as i64);
    }
    Number::from_f64(value).map_or(Json::Null, Json::Number)
}

impl Heap {
    pub(crate) fn stringify(&self, value: RawValue) -> EngineResult<Option<String>> {
        let mut stack = Vec::new();
        Ok(self
            .to_serde(value, &mut stack)?
            .map(|json| json.to_string()))
    }

    /// Convert to a `serde_json` tree. `None` marks values JSON omits.
    pub(crate) fn to_serde(
        &self,
        value: RawValue,
        stack: &mut Vec<ObjectId>,
    ) -> EngineResult<Option<Json>> {
        let id = match value {
            RawValue::Undefined => return Ok(None),
            RawValue::Null => return Ok(Some(Json::Null)),
            RawValue::Bool(flag) => return Ok(Some(Json::Bool(flag))),
            RawValue::Int(number) => return Ok(Some(Json::from(number))),
            RawValue::Float(number) => return Ok(Some(number_to_json(number))),
            RawValue::Ref(id) => id,
        };
        let shape = match self.table.borrow().get(id).map(|cell| &cell.kind) {
            Some(CellKind::Str(text)) => Shape::Str(Rc::clone(text)),
            Some(CellKind::Object(object)) => match &object.class {
                ObjectClass::Function(_) => Shape::Skip,
                ObjectClass::Array(elements) => Shape::Array(elements.len() as u32),
                _ => Shape::Object,
            },
            None => Shape::Skip,
        };
        let length = match shape {
            Shape::Str(text) => return Ok(Some(Json::String(text.to_string()))),
            Shape::Skip => return Ok(None),
            Shape::Array(length) => Some(length),
            Shape::Object => None,
        };
        if stack.contains(&id) {
            return Err(self.throw_error(ErrorKind::TypeError, "cyclic object value"));
        }
        if stack.len() >= MAX_DEPTH {
            return Err(self.throw_error(ErrorKind::RangeError, "too much recursion"));
        }
        stack.push(id);
        let converted = match length {
            Some(length) => self.array_to_serde(value, length, stack),
            None => self.object_to_serde(value, stack),
        };
        stack.pop();
        converted.map(Some)
    }

    fn array_to_serde(
        &self,
        array: RawValue,
        length: u32,
        stack: &mut Vec<ObjectId>,
    ) -> EngineResult<Json> {
        let mut items = Vec::with_capacity(length as usize);
        for index in 0..length {
            let element = self.read_property(array, &PropertyKey::Index(index))?;
            let converted = self.to_serde(element, stack);
            self.release(element);
            items.push(converted?.unwrap_or(Json::Null));
        }
        Ok(Json::Array(items))
    }

    fn object_to_serde(&self, object: RawValue, stack: &mut Vec<ObjectId>) -> EngineResult<Json> {
        let mut map = Map::new();
        for key in self.enumerate_keys(object) {
            let property = self.read_property(object, &key)?;
            let converted = self.to_serde(property, stack);
            self.release(property);
            if let Some(json) = converted? {
                map.insert(key.to_name(), json);
            }
        }
        Ok(Json::Object(map))
    }

    pub(crate) fn parse(&self, text: &str) -> EngineResult<RawValue> {
        let json: Json = serde_json::from_str(text).map_err(|err| {
            self.throw_error(ErrorKind::SyntaxError, &format!("JSON.parse: {err}"))
        })?;
        self.from_serde(&json)
    }

    pub(crate) fn from_serde(&self, json: &Json) -> EngineResult<RawValue> {
        match json {
            Json::Null => Ok(RawValue::Null),
            Json::Bool(flag) => Ok(RawValue::Bool(*flag)),
            Json::Number(number) => Ok(match number.as_i64().and_then(|n| i32::try_from(n).ok()) {
                Some(small) => RawValue::Int(small),
                None => RawValue::number(number.as_f64().unwrap_or(f64::NAN)),
            }),
            Json::String(text) => self.new_string_value(text),
            Json::Array(items) => {
                let array = self.new_array_value()?;
                for (index, item) in items.iter().enumerate() {
                    self.fill(array, PropertyKey::Index(index as u32), item)?;
                }
                Ok(array)
            }
            Json::Object(map) => {
                let object = self
                    .alloc(CellKind::Object(ObjectData::new(ObjectClass::Plain)))
                    .map(RawValue::Ref)?;
                for (name, item) in map {
                    self.fill(object, PropertyKey::from(name.as_str()), item)?;
                }
                Ok(object)
            }
        }
    }

    /// Store the conversion of `item` at `key`; frees `container` on failure.
    fn fill(&self, container: RawValue, key: PropertyKey, item: &Json) -> EngineResult<()> {
        let stored = self
            .from_serde(item)
            .and_then(|value| self.write_property(container, &key, value));
        if stored.is_err() {
            self.release(container);
        }
        stored
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use crate::heap::Heap;
    use crate::value::{PropertyKey, RawValue};

    fn round_trip(heap: &Heap, text: &str) -> String {
        let value = heap.parse_json(text).unwrap();
        let json = heap.to_json(value).unwrap().unwrap();
        heap.free(value);
        json
    }

    #[test]
    fn test_round_trip_preserves_order_and_types() {
        let heap = Heap::new();
        assert_eq!(
            round_trip(&heap, r#"{"z":1,"a":[true,null,"s"],"m":{"k":2.5}}"#),
            r#"{"z":1,"a":[true,null,"s"],"m":{"k":2.5}}"#
        );
        assert_eq!(round_trip(&heap, "[]"), "[]");
        assert_eq!(round_trip(&heap, "\"text\""), "\"text\"");
        assert_eq!(round_trip(&heap, "4294967296"), "4294967296");
    }

    #[test]
    fn test_integral_floats_serialize_as_integers() {
        let heap = Heap::new();
        assert_eq!(heap.to_json(RawValue::Float(3.0)).unwrap().as_deref(), Some("3"));
        assert_eq!(heap.to_json(RawValue::Float(f64::NAN)).unwrap().as_deref(), Some("null"));
        assert_eq!(heap.to_json(RawValue::Undefined).unwrap(), None);
    }

    #[test]
    fn test_undefined_members_are_skipped() {
        let heap = Heap::new();
        let object = heap.new_object().unwrap();
        heap.set_property(object, &PropertyKey::from("gone"), RawValue::Undefined)
            .unwrap();
        heap.set_property(object, &PropertyKey::from("kept"), RawValue::Int(1))
            .unwrap();
        assert_eq!(heap.to_json(object).unwrap().as_deref(), Some(r#"{"kept":1}"#));
        heap.free(object);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let heap = Heap::new();
        let object = heap.new_object().unwrap();
        heap.set_property(object, &PropertyKey::from("me"), heap.dup(object))
            .unwrap();
        assert!(heap.to_json(object).is_err());
        let error = heap.take_exception();
        assert_eq!(heap.to_string(error).unwrap(), "TypeError: cyclic object value");
        heap.free(error);
        // break the cycle so the cell can be reclaimed
        heap.delete_property(object, &PropertyKey::from("me")).unwrap();
        heap.free(object);
    }

    #[test]
    fn test_malformed_input_is_syntax_error() {
        let heap = Heap::new();
        let baseline = heap.live_cells();
        assert!(heap.parse_json("{\"a\": [1, 2").is_err());
        let error = heap.take_exception();
        let name = heap.get_property(error, &PropertyKey::from("name")).unwrap();
        assert_eq!(heap.to_string(name).unwrap(), "SyntaxError");
        heap.free(name);
        heap.free(error);
        assert_eq!(heap.live_cells(), baseline);
    }
}
