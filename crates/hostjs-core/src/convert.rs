//! Conversions between Rust values and engine values
//!
//! [`IntoJs`] produces one owned reference unit; [`FromJs`] reads through a
//! [`Value`] without taking ownership. [`Json`] carries any serde type across
//! as a JSON document.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use hostjs_engine::{PropertyKey, RawValue};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::context::Context;
use crate::error::{HostError, HostResult};
use crate::value::Value;

/// Conversion of a Rust value into an engine value (one owned unit).
pub trait IntoJs {
    fn into_js(self, ctx: &Context) -> HostResult<RawValue>;
}

/// Conversion of an engine value into a Rust value.
pub trait FromJs: Sized {
    fn from_js(value: &Value) -> HostResult<Self>;
}

/// Serde bridge: `Json(data)` converts through its JSON form.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl IntoJs for () {
    fn into_js(self, _ctx: &Context) -> HostResult<RawValue> {
        Ok(RawValue::Undefined)
    }
}

impl IntoJs for bool {
    fn into_js(self, _ctx: &Context) -> HostResult<RawValue> {
        Ok(RawValue::Bool(self))
    }
}

impl IntoJs for i32 {
    fn into_js(self, _ctx: &Context) -> HostResult<RawValue> {
        Ok(RawValue::Int(self))
    }
}

macro_rules! impl_into_js_for_number {
    ($($ty:ty),*) => {
        $(
            impl IntoJs for $ty {
                fn into_js(self, _ctx: &Context) -> HostResult<RawValue> {
                    Ok(RawValue::number(self as f64))
                }
            }
        )*
    };
}

impl_into_js_for_number!(u32, i64, u64, usize, f32, f64);

impl IntoJs for &str {
    fn into_js(self, ctx: &Context) -> HostResult<RawValue> {
        ctx.check(ctx.engine().new_string(self))
    }
}

impl IntoJs for String {
    fn into_js(self, ctx: &Context) -> HostResult<RawValue> {
        self.as_str().into_js(ctx)
    }
}

impl IntoJs for &String {
    fn into_js(self, ctx: &Context) -> HostResult<RawValue> {
        self.as_str().into_js(ctx)
    }
}

impl IntoJs for Value {
    fn into_js(self, ctx: &Context) -> HostResult<RawValue> {
        same_runtime(ctx, &self)?;
        Ok(self.release())
    }
}

impl IntoJs for &Value {
    fn into_js(self, ctx: &Context) -> HostResult<RawValue> {
        same_runtime(ctx, self)?;
        Ok(self.raw().map_or(RawValue::Undefined, |raw| ctx.engine().dup(raw)))
    }
}

fn same_runtime(ctx: &Context, value: &Value) -> HostResult<()> {
    if ctx.same_runtime(value.context()) {
        Ok(())
    } else {
        Err(HostError::ContextMismatch)
    }
}

impl<T: IntoJs> IntoJs for Option<T> {
    fn into_js(self, ctx: &Context) -> HostResult<RawValue> {
        match self {
            Some(value) => value.into_js(ctx),
            None => Ok(RawValue::Undefined),
        }
    }
}

/// Store each converted item into `container`; frees it on failure.
fn fill<K, T>(
    ctx: &Context,
    container: RawValue,
    items: impl IntoIterator<Item = (K, T)>,
) -> HostResult<RawValue>
where
    K: Into<PropertyKey>,
    T: IntoJs,
{
    let engine = ctx.engine();
    for (key, item) in items {
        let stored = item
            .into_js(ctx)
            .and_then(|raw| ctx.check(engine.set_property(container, &key.into(), raw)));
        if let Err(err) = stored {
            engine.free(container);
            return Err(err);
        }
    }
    Ok(container)
}

impl<T: IntoJs> IntoJs for Vec<T> {
    fn into_js(self, ctx: &Context) -> HostResult<RawValue> {
        let array = ctx.check(ctx.engine().new_array())?;
        fill(
            ctx,
            array,
            self.into_iter()
                .enumerate()
                .map(|(index, item)| (index as u32, item)),
        )
    }
}

impl<T: IntoJs> IntoJs for BTreeMap<String, T> {
    fn into_js(self, ctx: &Context) -> HostResult<RawValue> {
        let object = ctx.check(ctx.engine().new_object())?;
        fill(ctx, object, self)
    }
}

impl<T: IntoJs, S: BuildHasher> IntoJs for HashMap<String, T, S> {
    fn into_js(self, ctx: &Context) -> HostResult<RawValue> {
        let object = ctx.check(ctx.engine().new_object())?;
        fill(ctx, object, self)
    }
}

impl IntoJs for serde_json::Value {
    fn into_js(self, ctx: &Context) -> HostResult<RawValue> {
        ctx.check(ctx.engine().parse_json(&self.to_string()))
    }
}

impl<T: Serialize> IntoJs for Json<T> {
    fn into_js(self, ctx: &Context) -> HostResult<RawValue> {
        let text = serde_json::to_string(&self.0)?;
        ctx.check(ctx.engine().parse_json(&text))
    }
}

// ---- FromJs ---------------------------------------------------------------

fn mismatch(expected: &str, value: &Value) -> HostError {
    HostError::type_mismatch(expected, value.type_name())
}

impl FromJs for Value {
    fn from_js(value: &Value) -> HostResult<Self> {
        Ok(value.clone())
    }
}

impl FromJs for bool {
    fn from_js(value: &Value) -> HostResult<Self> {
        match value.raw() {
            Some(RawValue::Bool(flag)) => Ok(flag),
            _ => Err(mismatch("boolean", value)),
        }
    }
}

impl FromJs for f64 {
    fn from_js(value: &Value) -> HostResult<Self> {
        value
            .raw()
            .and_then(|raw| raw.as_f64())
            .ok_or_else(|| mismatch("number", value))
    }
}

macro_rules! impl_from_js_for_int {
    ($($ty:ty),*) => {
        $(
            impl FromJs for $ty {
                fn from_js(value: &Value) -> HostResult<Self> {
                    let number = f64::from_js(value)?;
                    if number.fract() != 0.0
                        || number < <$ty>::MIN as f64
                        || number > <$ty>::MAX as f64
                    {
                        return Err(HostError::type_mismatch(stringify!($ty), number.to_string()));
                    }
                    Ok(number as $ty)
                }
            }
        )*
    };
}

impl_from_js_for_int!(i32, u32, i64, u64, usize);

impl FromJs for String {
    fn from_js(value: &Value) -> HostResult<Self> {
        match value.raw() {
            Some(raw) if value.is_string() => {
                let ctx = value.context();
                ctx.check(ctx.engine().to_string(raw))
            }
            _ => Err(mismatch("string", value)),
        }
    }
}

impl<T: FromJs> FromJs for Option<T> {
    fn from_js(value: &Value) -> HostResult<Self> {
        if value.is_empty() || value.is_undefined() || value.is_null() {
            Ok(None)
        } else {
            T::from_js(value).map(Some)
        }
    }
}

impl<T: FromJs> FromJs for Vec<T> {
    fn from_js(value: &Value) -> HostResult<Self> {
        let length = value.len().ok_or_else(|| mismatch("array", value))?;
        (0..length)
            .map(|index| value.get(index)?.to::<T>())
            .collect()
    }
}

fn entries<T: FromJs>(value: &Value) -> HostResult<Vec<(String, T)>> {
    if !value.is_map() {
        return Err(mismatch("object", value));
    }
    value
        .iterate()?
        .into_iter()
        .map(|(key, item)| Ok((key.to_string(), item.to::<T>()?)))
        .collect()
}

impl<T: FromJs> FromJs for BTreeMap<String, T> {
    fn from_js(value: &Value) -> HostResult<Self> {
        Ok(entries(value)?.into_iter().collect())
    }
}

impl<T: FromJs, S: BuildHasher + Default> FromJs for HashMap<String, T, S> {
    fn from_js(value: &Value) -> HostResult<Self> {
        Ok(entries(value)?.into_iter().collect())
    }
}

impl FromJs for serde_json::Value {
    fn from_js(value: &Value) -> HostResult<Self> {
        value.to_serde()
    }
}

impl<T: DeserializeOwned> FromJs for Json<T> {
    fn from_js(value: &Value) -> HostResult<Self> {
        Ok(Json(serde_json::from_value(value.to_serde()?)?))
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    fn round_trip<T: IntoJs + FromJs>(ctx: &Context, value: T) -> T {
        let raw = value.into_js(ctx).unwrap();
        Value::from_owned(ctx, raw).to::<T>().unwrap()
    }

    #[test]
    fn test_scalars() {
        let ctx = Context::new().unwrap();
        assert!(round_trip(&ctx, true));
        assert_eq!(round_trip(&ctx, -12i32), -12);
        assert_eq!(round_trip(&ctx, 3_000_000_000u32), 3_000_000_000);
        assert_eq!(round_trip(&ctx, 0.25f64), 0.25);
        assert_eq!(round_trip(&ctx, String::from("héllo")), "héllo");
    }

    #[test]
    fn test_containers() {
        let ctx = Context::new().unwrap();
        assert_eq!(
            round_trip(&ctx, vec![String::from("a"), String::from("b")]),
            vec!["a", "b"]
        );
        let mut map = BTreeMap::new();
        map.insert(String::from("x"), vec![1, 2]);
        map.insert(String::from("y"), Vec::new());
        assert_eq!(round_trip(&ctx, map.clone()), map);
        assert_eq!(round_trip(&ctx, Some(4)), Some(4));
        assert_eq!(round_trip::<Option<i32>>(&ctx, None), None);
    }

    #[test]
    fn test_mismatches() {
        let ctx = Context::new().unwrap();
        let text = Value::new(&ctx, "7").unwrap();
        assert!(matches!(
            text.to::<i32>(),
            Err(HostError::TypeMismatch { expected, actual }) if expected == "number" && actual == "string"
        ));
        let fraction = Value::new(&ctx, 1.5).unwrap();
        assert!(fraction.to::<i32>().is_err());
        let array = Value::new(&ctx, vec![1]).unwrap();
        assert!(array.to::<BTreeMap<String, i32>>().is_err());
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Patient {
        id: String,
        active: bool,
        tags: Vec<String>,
    }

    #[test]
    fn test_serde_bridge() {
        let ctx = Context::new().unwrap();
        let patient = Patient {
            id: "p1".into(),
            active: true,
            tags: vec!["vip".into()],
        };
        let value = Value::new(&ctx, Json(&patient)).unwrap();
        assert_eq!(value.get("id").unwrap().to::<String>().unwrap(), "p1");
        assert_eq!(value.to::<Json<Patient>>().unwrap().0, patient);

        let json = serde_json::json!({"n": 1, "list": [true, null]});
        let value = Value::new(&ctx, json.clone()).unwrap();
        assert_eq!(value.to::<serde_json::Value>().unwrap(), json);
    }

    #[test]
    fn test_cross_runtime_value_is_rejected() {
        let first = Context::new().unwrap();
        let second = Context::new().unwrap();
        let object = Value::new_object(&first).unwrap();
        assert!(matches!(
            (&object).into_js(&second),
            Err(HostError::ContextMismatch)
        ));
    }
}
