//! Compiled units: compile-only evaluation and the serialized unit format
//!
//! Layout written by `write_object`:
//!
//! ```text
//! "HJSU" | version: u8 | flags: u8 | [name_len: u32 LE | name] | source
//! ```

use std::rc::Rc;

use super::Heap;
use super::cell::{CellKind, CompiledUnit, ObjectClass, ObjectData};
use crate::engine::Engine;
use crate::error::{EngineResult, ErrorKind};
use crate::value::RawValue;

const MAGIC: &[u8; 4] = b"HJSU";
const VERSION: u8 = 1;
const FLAG_FILENAME: u8 = 0b1;

/// Parts of a decoded unit: optional filename, source text.
type UnitParts = (Option<String>, String);

fn encode_unit(source: &str, filename: Option<&str>) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAGIC.len() + 2 + source.len());
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    match filename {
        Some(name) => {
            out.push(FLAG_FILENAME);
            out.extend_from_slice(&(name.len() as u32).to_le_bytes());
            out.extend_from_slice(name.as_bytes());
        }
        None => out.push(0),
    }
    out.extend_from_slice(source.as_bytes());
    out
}

fn decode_unit(bytes: &[u8]) -> Result<UnitParts, &'static str> {
    let rest = bytes.strip_prefix(MAGIC.as_slice()).ok_or("bad magic")?;
    let (&version, rest) = rest.split_first().ok_or("truncated header")?;
    if version != VERSION {
        return Err("unsupported version");
    }
    let (&flags, mut rest) = rest.split_first().ok_or("truncated header")?;
    let filename = if flags & FLAG_FILENAME != 0 {
        let (length, tail) = rest.split_first_chunk::<4>().ok_or("truncated filename")?;
        let length = u32::from_le_bytes(*length) as usize;
        if tail.len() < length {
            return Err("truncated filename");
        }
        let (name, tail) = tail.split_at(length);
        rest = tail;
        Some(String::from_utf8(name.to_vec()).map_err(|_| "filename is not UTF-8")?)
    } else {
        None
    };
    let source = std::str::from_utf8(rest).map_err(|_| "source is not UTF-8")?;
    Ok((filename, source.to_string()))
}

impl Heap {
    pub(crate) fn compile_unit(&self, source: &str, filename: &str) -> EngineResult<RawValue> {
        if let Err(err) = serde_json::from_str::<serde_json::Value>(source) {
            return Err(self.throw_error(ErrorKind::SyntaxError, &format!("{filename}: {err}")));
        }
        self.alloc_unit(source, Some(filename.to_string()))
    }

    fn alloc_unit(&self, source: &str, filename: Option<String>) -> EngineResult<RawValue> {
        let unit = CompiledUnit {
            source: Rc::from(source),
            filename,
        };
        self.alloc(CellKind::Object(ObjectData::new(ObjectClass::Unit(unit))))
            .map(RawValue::Ref)
    }

    fn unit_parts(&self, unit: RawValue) -> EngineResult<(Rc<str>, Option<String>)> {
        let parts = match self.table.borrow().object(unit).map(|object| &object.class) {
            Some(ObjectClass::Unit(unit)) => Some((Rc::clone(&unit.source), unit.filename.clone())),
            _ => None,
        };
        parts.ok_or_else(|| self.throw_error(ErrorKind::TypeError, "value is not a compiled unit"))
    }

    pub(crate) fn run_unit(&self, unit: RawValue) -> EngineResult<RawValue> {
        let (source, _) = self.unit_parts(unit)?;
        self.parse(&source)
    }

    pub(crate) fn serialize_unit(&self, unit: RawValue, strip_debug: bool) -> EngineResult<Vec<u8>> {
        let (source, filename) = self.unit_parts(unit)?;
        let filename = filename.filter(|_| !strip_debug);
        Ok(encode_unit(&source, filename.as_deref()))
    }

    pub(crate) fn deserialize_unit(&self, bytes: &[u8]) -> EngineResult<RawValue> {
        let (filename, source) = decode_unit(bytes).map_err(|reason| {
            self.throw_error(
                ErrorKind::SyntaxError,
                &format!("invalid compiled unit: {reason}"),
            )
        })?;
        if serde_json::from_str::<serde_json::Value>(&source).is_err() {
            return Err(self.throw_error(
                ErrorKind::SyntaxError,
                "invalid compiled unit: corrupt body",
            ));
        }
        self.alloc_unit(&source, filename)
    }

    /// Filename recorded in a compiled unit, if it kept debug info.
    pub fn unit_filename(&self, unit: RawValue) -> Option<String> {
        match &self.table.borrow().object(unit)?.class {
            ObjectClass::Unit(unit) => unit.filename.clone(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::value::ContextId;

    #[test]
    fn test_encode_decode() {
        let bytes = encode_unit("[1,2]", Some("main.json"));
        assert_eq!(&bytes[..4], MAGIC);
        assert_eq!(
            decode_unit(&bytes),
            Ok((Some("main.json".to_string()), "[1,2]".to_string()))
        );

        let stripped = encode_unit("{}", None);
        assert_eq!(decode_unit(&stripped), Ok((None, "{}".to_string())));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode_unit(b"nope"), Err("bad magic"));
        assert_eq!(decode_unit(b"HJSU"), Err("truncated header"));
        assert_eq!(decode_unit(b"HJSU\x09\x00{}"), Err("unsupported version"));
        assert_eq!(decode_unit(b"HJSU\x01\x01\xff\x00\x00\x00ab"), Err("truncated filename"));
    }

    #[test]
    fn test_compile_write_read_run() {
        let heap = Heap::new();
        let ctx = heap.new_context().unwrap();
        let unit = heap.compile(ctx, r#"{"answer":42}"#, "unit.json").unwrap();
        assert_eq!(heap.unit_filename(unit).as_deref(), Some("unit.json"));

        let bytes = heap.write_object(unit, true).unwrap();
        let loaded = heap.read_object(&bytes).unwrap();
        assert_eq!(heap.unit_filename(loaded), None);

        let result = heap.eval_function(ctx, loaded).unwrap();
        assert_eq!(heap.to_json(result).unwrap().as_deref(), Some(r#"{"answer":42}"#));

        for value in [result, loaded, unit] {
            heap.free(value);
        }
    }

    #[test]
    fn test_compile_error_names_file() {
        let heap = Heap::new();
        assert!(heap.compile(ContextId(0), "{oops", "broken.json").is_err());
        let error = heap.take_exception();
        let message = heap.to_string(error).unwrap();
        assert!(message.starts_with("SyntaxError: broken.json: "), "{message}");
        heap.free(error);
    }
}
