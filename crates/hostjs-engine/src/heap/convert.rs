//! Script-level conversions: ToString, ToNumber, ToBoolean

use std::rc::Rc;

use super::Heap;
use super::cell::{CellKind, ObjectClass};
use crate::error::EngineResult;
use crate::value::{ObjectId, PropertyKey, RawValue};

enum Shape {
    Str(Rc<str>),
    Array(Vec<RawValue>),
    Error,
    Function(String),
    Promise,
    Unit,
    Object,
}

/// Number formatting following the script language's `Number#toString`.
pub(crate) fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".into();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.into();
    }
    if value == 0.0 {
        return "0".into();
    }
    let magnitude = value.abs();
    if (1e-6..1e21).contains(&magnitude) {
        return value.to_string();
    }
    let formatted = format!("{value:e}");
    match formatted.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => format!("{mantissa}e+{exponent}"),
        _ => formatted,
    }
}

fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    match trimmed {
        "" => 0.0,
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => {
            if let Some(hex) = trimmed
                .strip_prefix("0x")
                .or_else(|| trimmed.strip_prefix("0X"))
            {
                return u64::from_str_radix(hex, 16).map_or(f64::NAN, |n| n as f64);
            }
            let numeric = trimmed
                .bytes()
                .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'));
            if numeric {
                trimmed.parse().unwrap_or(f64::NAN)
            } else {
                f64::NAN
            }
        }
    }
}

impl Heap {
    pub(crate) fn string_of(&self, value: RawValue) -> EngineResult<String> {
        let mut visiting = Vec::new();
        self.string_of_inner(value, &mut visiting)
    }

    fn string_of_inner(&self, value: RawValue, visiting: &mut Vec<ObjectId>) -> EngineResult<String> {
        let id = match value {
            RawValue::Undefined => return Ok("undefined".into()),
            RawValue::Null => return Ok("null".into()),
            RawValue::Bool(flag) => return Ok(flag.to_string()),
            RawValue::Int(number) => return Ok(number.to_string()),
            RawValue::Float(number) => return Ok(format_number(number)),
            RawValue::Ref(id) => id,
        };
        let shape = match self.table.borrow().get(id).map(|cell| &cell.kind) {
            Some(CellKind::Str(text)) => Shape::Str(Rc::clone(text)),
            Some(CellKind::Object(object)) => match &object.class {
                ObjectClass::Array(elements) => Shape::Array(elements.clone()),
                ObjectClass::Error(_) => Shape::Error,
                ObjectClass::Function(function) => Shape::Function(function.name.clone()),
                ObjectClass::Promise(_) => Shape::Promise,
                ObjectClass::Unit(_) => Shape::Unit,
                ObjectClass::Plain | ObjectClass::Global => Shape::Object,
            },
            None => return Ok("undefined".into()),
        };
        Ok(match shape {
            Shape::Str(text) => text.to_string(),
            Shape::Array(elements) => {
                // a self-containing array prints as empty, as in engines
                if visiting.contains(&id) {
                    return Ok(String::new());
                }
                visiting.push(id);
                let parts: EngineResult<Vec<String>> = elements
                    .iter()
                    .map(|element| {
                        if element.is_nullish() {
                            Ok(String::new())
                        } else {
                            self.string_of_inner(*element, visiting)
                        }
                    })
                    .collect();
                visiting.pop();
                parts?.join(",")
            }
            Shape::Error => {
                let name = self.property_text(value, "name")?;
                let message = self.property_text(value, "message")?;
                let name = name.unwrap_or_else(|| "Error".into());
                match message {
                    Some(message) if !message.is_empty() => format!("{name}: {message}"),
                    _ => name,
                }
            }
            Shape::Function(name) => format!("function {name}() {{\n    [native code]\n}}"),
            Shape::Promise => "[object Promise]".into(),
            Shape::Unit => "[object CompiledUnit]".into(),
            Shape::Object => "[object Object]".into(),
        })
    }

    /// String form of `target[name]`, `None` when undefined.
    fn property_text(&self, target: RawValue, name: &str) -> EngineResult<Option<String>> {
        let property = self.read_property(target, &PropertyKey::from(name))?;
        let text = if property.is_undefined() {
            Ok(None)
        } else {
            self.string_of(property).map(Some)
        };
        self.release(property);
        text
    }

    pub(crate) fn number_of(&self, value: RawValue) -> EngineResult<f64> {
        Ok(match value {
            RawValue::Undefined => f64::NAN,
            RawValue::Null => 0.0,
            RawValue::Bool(flag) => f64::from(u8::from(flag)),
            RawValue::Int(number) => f64::from(number),
            RawValue::Float(number) => number,
            RawValue::Ref(id) => {
                let is_array = match self.table.borrow().get(id).map(|cell| &cell.kind) {
                    Some(CellKind::Str(text)) => return Ok(parse_number(text)),
                    Some(CellKind::Object(object)) => {
                        matches!(object.class, ObjectClass::Array(_))
                    }
                    None => false,
                };
                if is_array {
                    parse_number(&self.string_of(value)?)
                } else {
                    f64::NAN
                }
            }
        })
    }

    pub(crate) fn truthy(&self, value: RawValue) -> bool {
        match value {
            RawValue::Undefined | RawValue::Null => false,
            RawValue::Bool(flag) => flag,
            RawValue::Int(number) => number != 0,
            RawValue::Float(number) => number != 0.0 && !number.is_nan(),
            RawValue::Ref(id) => match self.table.borrow().get(id).map(|cell| &cell.kind) {
                Some(CellKind::Str(text)) => !text.is_empty(),
                Some(CellKind::Object(_)) => true,
                None => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::error::ErrorKind;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.1), "0.1");
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(1.5e-9), "1.5e-9");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("  42 "), 42.0);
        assert_eq!(parse_number(""), 0.0);
        assert_eq!(parse_number("0x1f"), 31.0);
        assert!(parse_number("inf").is_nan());
        assert!(parse_number("12px").is_nan());
    }

    #[test]
    fn test_string_forms() {
        let heap = Heap::new();
        let array = heap.parse_json(r#"[1,null,"a",[2,3]]"#).unwrap();
        assert_eq!(heap.to_string(array).unwrap(), "1,,a,2,3");
        assert!(heap.to_number(array).unwrap().is_nan());
        heap.free(array);

        let error = heap.new_error(ErrorKind::RangeError, "").unwrap();
        assert_eq!(heap.to_string(error).unwrap(), "RangeError");
        heap.free(error);

        let object = heap.new_object().unwrap();
        assert_eq!(heap.to_string(object).unwrap(), "[object Object]");
        assert!(heap.to_bool(object));
        heap.free(object);

        let empty = heap.new_string("").unwrap();
        assert!(!heap.to_bool(empty));
        heap.free(empty);
        assert!(!heap.to_bool(RawValue::Float(f64::NAN)));
    }
}
