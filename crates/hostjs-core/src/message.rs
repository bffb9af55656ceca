//! Human-readable messages for thrown values

use hostjs_engine::{Engine, PropertyKey, RawValue, ValueType};

/// Fields read from a thrown object, in output order. Labelled fields are
/// printed as `label: value`.
const FIELDS: [(&str, bool); 4] = [
    ("stack", false),
    ("message", false),
    ("lineNumber", true),
    ("columnNumber", true),
];

/// Message of a thrown value (borrowed).
///
/// Objects contribute their `stack`, `message`, `lineNumber` and
/// `columnNumber` fields, one per line; empty fields are skipped. Anything
/// else, or an object with none of those fields, falls back to its string
/// conversion.
pub(crate) fn error_message(engine: &dyn Engine, value: RawValue) -> String {
    if matches!(engine.type_of(value), ValueType::Object | ValueType::Function) {
        let lines: Vec<String> = FIELDS
            .iter()
            .filter_map(|(field, labelled)| {
                let text = field_text(engine, value, field)?;
                Some(if *labelled {
                    format!("{field}: {text}")
                } else {
                    text
                })
            })
            .collect();
        if !lines.is_empty() {
            return lines.join("\n");
        }
    }
    engine.to_string(value).unwrap_or_else(|_| {
        discard_exception(engine);
        "unknown error".to_string()
    })
}

fn field_text(engine: &dyn Engine, value: RawValue, field: &str) -> Option<String> {
    let key = PropertyKey::from(field);
    if !engine.has_property(value, &key).unwrap_or(false) {
        return None;
    }
    let property = match engine.get_property(value, &key) {
        Ok(property) => property,
        Err(_) => {
            discard_exception(engine);
            return None;
        }
    };
    let text = if property.is_undefined() {
        None
    } else {
        engine
            .to_string(property)
            .ok()
            .map(|text| text.trim_end_matches('\n').to_string())
            .filter(|text| !text.is_empty())
    };
    if text.is_none() && engine.has_exception() {
        discard_exception(engine);
    }
    engine.free(property);
    text
}

fn discard_exception(engine: &dyn Engine) {
    let exception = engine.take_exception();
    engine.free(exception);
}
