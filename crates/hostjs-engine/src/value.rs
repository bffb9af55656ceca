//! Raw engine values and identities
//!
//! A [`RawValue`] is what crosses the engine capability interface. Scalars
//! are stored inline; everything else lives in a heap cell and is reached
//! through a [`RawValue::Ref`]. A `Ref` carries no ownership by itself: the
//! holder of a `Ref` is responsible for the reference unit it was handed
//! and must give it back with `Engine::free`.

use std::fmt;

/// Identity of a heap cell.
///
/// The generation is bumped every time a slot is recycled, so an `ObjectId`
/// never names two different cells even when the slot index is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    pub index: u32,
    pub generation: u32,
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Identity of an evaluation context within one runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u32);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx{}", self.0)
    }
}

/// An engine value as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RawValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i32),
    Float(f64),
    /// Reference-counted heap cell (string, object, array, function, ...)
    Ref(ObjectId),
}

impl RawValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, RawValue::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, RawValue::Undefined | RawValue::Null)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, RawValue::Int(_) | RawValue::Float(_))
    }

    /// Heap identity, if this value refers to a cell.
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            RawValue::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// Numeric payload for `Int`/`Float`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Int(i) => Some(f64::from(*i)),
            RawValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Canonical number encoding: integral values that fit `i32` become `Int`.
    pub fn number(value: f64) -> Self {
        if value.fract() == 0.0
            && value >= f64::from(i32::MIN)
            && value <= f64::from(i32::MAX)
            && !(value == 0.0 && value.is_sign_negative())
        {
            RawValue::Int(value as i32)
        } else {
            RawValue::Float(value)
        }
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Bool(value)
    }
}

impl From<i32> for RawValue {
    fn from(value: i32) -> Self {
        RawValue::Int(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::number(value)
    }
}

/// Property key: an array index or a string name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    Index(u32),
    Name(String),
}

impl PropertyKey {
    /// Folds canonical numeric names ("0", "17") into `Index`.
    pub fn normalized(self) -> Self {
        match self {
            PropertyKey::Name(name) => match parse_index(&name) {
                Some(index) => PropertyKey::Index(index),
                None => PropertyKey::Name(name),
            },
            key => key,
        }
    }

    /// String form used as the storage key on ordinary objects.
    pub fn to_name(&self) -> String {
        match self {
            PropertyKey::Index(index) => index.to_string(),
            PropertyKey::Name(name) => name.clone(),
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            PropertyKey::Name(name) => Some(name),
            PropertyKey::Index(_) => None,
        }
    }
}

fn parse_index(name: &str) -> Option<u32> {
    if name.is_empty() || (name.len() > 1 && name.starts_with('0')) {
        return None;
    }
    if !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // u32::MAX is reserved, as for array lengths
    name.parse::<u32>().ok().filter(|index| *index != u32::MAX)
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::Index(index) => write!(f, "{index}"),
            PropertyKey::Name(name) => f.write_str(name),
        }
    }
}

impl From<u32> for PropertyKey {
    fn from(index: u32) -> Self {
        PropertyKey::Index(index)
    }
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        PropertyKey::Name(name.to_string()).normalized()
    }
}

impl From<String> for PropertyKey {
    fn from(name: String) -> Self {
        PropertyKey::Name(name).normalized()
    }
}

/// Result of `typeof`-style classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Object,
    Function,
    Symbol,
    BigInt,
}

impl ValueType {
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Undefined => "undefined",
            ValueType::Null => "null",
            ValueType::Boolean => "boolean",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Object => "object",
            ValueType::Function => "function",
            ValueType::Symbol => "symbol",
            ValueType::BigInt => "bigint",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_canonicalization() {
        assert_eq!(RawValue::number(3.0), RawValue::Int(3));
        assert_eq!(RawValue::number(-7.0), RawValue::Int(-7));
        assert_eq!(RawValue::number(1.5), RawValue::Float(1.5));
        assert!(matches!(RawValue::number(-0.0), RawValue::Float(_)));
        assert!(matches!(RawValue::number(4294967296.0), RawValue::Float(_)));
    }

    #[test]
    fn test_key_normalization() {
        assert_eq!(PropertyKey::from("12"), PropertyKey::Index(12));
        assert_eq!(PropertyKey::from("012"), PropertyKey::Name("012".into()));
        assert_eq!(PropertyKey::from("-1"), PropertyKey::Name("-1".into()));
        assert_eq!(PropertyKey::from("length"), PropertyKey::Name("length".into()));
        assert_eq!(PropertyKey::Index(4).to_name(), "4");
    }
}
