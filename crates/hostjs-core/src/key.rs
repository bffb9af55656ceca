//! Property keys accepted by [`Value`](crate::Value) indexing

use std::fmt;

use hostjs_engine::PropertyKey;

use crate::error::{HostError, HostResult};

/// Key a handle was looked up with, remembered for write-back.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Index(u32),
    Name(String),
}

impl Key {
    pub(crate) fn to_property_key(&self) -> PropertyKey {
        match self {
            Key::Index(index) => PropertyKey::Index(*index),
            Key::Name(name) => PropertyKey::from(name.as_str()),
        }
    }
}

impl From<PropertyKey> for Key {
    fn from(key: PropertyKey) -> Self {
        match key {
            PropertyKey::Index(index) => Key::Index(index),
            PropertyKey::Name(name) => Key::Name(name),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(index) => write!(f, "{index}"),
            Key::Name(name) => f.write_str(name),
        }
    }
}

/// Conversion into a [`Key`]. Integer keys must fit a `u32` array index.
pub trait IntoKey {
    fn into_key(self) -> HostResult<Key>;
}

impl IntoKey for Key {
    fn into_key(self) -> HostResult<Key> {
        Ok(self)
    }
}

impl IntoKey for &Key {
    fn into_key(self) -> HostResult<Key> {
        Ok(self.clone())
    }
}

impl IntoKey for &str {
    fn into_key(self) -> HostResult<Key> {
        Ok(Key::Name(self.to_string()))
    }
}

impl IntoKey for String {
    fn into_key(self) -> HostResult<Key> {
        Ok(Key::Name(self))
    }
}

impl IntoKey for &String {
    fn into_key(self) -> HostResult<Key> {
        Ok(Key::Name(self.clone()))
    }
}

macro_rules! impl_into_key_for_int {
    ($($ty:ty),*) => {
        $(
            impl IntoKey for $ty {
                #[allow(clippy::unnecessary_fallible_conversions)]
                fn into_key(self) -> HostResult<Key> {
                    // u32::MAX is not an array index
                    match u32::try_from(self) {
                        Ok(index) if index != u32::MAX => Ok(Key::Index(index)),
                        _ => Err(HostError::InvalidKey(i64::try_from(self).unwrap_or(i64::MAX))),
                    }
                }
            }
        )*
    };
}

impl_into_key_for_int!(i32, i64, u32, u64, usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_keys() {
        assert_eq!(3i32.into_key().unwrap(), Key::Index(3));
        assert_eq!(7usize.into_key().unwrap(), Key::Index(7));
        assert!(matches!((-1i32).into_key(), Err(HostError::InvalidKey(-1))));
        assert!(matches!((-5i64).into_key(), Err(HostError::InvalidKey(-5))));
        assert!(matches!(u32::MAX.into_key(), Err(HostError::InvalidKey(_))));
    }

    #[test]
    fn test_name_keys() {
        assert_eq!("a".into_key().unwrap(), Key::Name("a".into()));
        assert_eq!(Key::Name("a".into()).to_string(), "a");
        // canonical digit names address elements
        assert_eq!(
            Key::Name("2".into()).to_property_key(),
            PropertyKey::Index(2)
        );
    }
}
