//! Value Codec
//!
//! Byte representation of cached values. Integer scalars use a fixed
//! 8-byte little-endian layout, strings are stored as raw UTF-8 and every
//! other type goes through JSON. There is no embedded type tag: a store must
//! always decode with the type it encoded.

pub use bytes::Bytes;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CacheError, Result};

/// Conversion between a typed value and its stored bytes
pub trait Codec: Sized {
    fn encode(&self) -> Result<Bytes>;
    fn decode(bytes: &[u8]) -> Result<Self>;
}

macro_rules! fixed_width_codec {
    ($($t:ty),* $(,)?) => {
        $(
            impl Codec for $t {
                fn encode(&self) -> Result<Bytes> {
                    Ok(Bytes::copy_from_slice(&(*self as u64).to_le_bytes()))
                }

                fn decode(bytes: &[u8]) -> Result<Self> {
                    let raw: [u8; 8] = bytes.try_into().map_err(|_| {
                        CacheError::encoding(
                            concat!("decode ", stringify!($t)),
                            format!("expected 8 bytes, got {}", bytes.len()),
                        )
                    })?;
                    Ok(u64::from_le_bytes(raw) as $t)
                }
            }
        )*
    };
}

fixed_width_codec!(i64, u64, isize, usize);

impl Codec for String {
    fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(self.as_bytes()))
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(bytes.to_vec()).map_err(|e| CacheError::encoding("decode String", e))
    }
}

impl Codec for Bytes {
    fn encode(&self) -> Result<Bytes> {
        Ok(self.clone())
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(Bytes::copy_from_slice(bytes))
    }
}

/// JSON encoding used by [`json_codec!`]
pub fn to_json<T: Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| CacheError::UnsupportedType {
            type_name: std::any::type_name::<T>(),
            reason: e.to_string(),
        })
}

pub fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        CacheError::encoding(format!("decode {}", std::any::type_name::<T>()), e)
    })
}

/// Implement [`Codec`] through JSON for serde types.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Post { id: i64, title: String }
/// shardcache::json_codec!(Post);
/// ```
#[macro_export]
macro_rules! json_codec {
    ($($t:ty),+ $(,)?) => {
        $(
            impl $crate::codec::Codec for $t {
                fn encode(&self) -> $crate::Result<$crate::codec::Bytes> {
                    $crate::codec::to_json(self)
                }

                fn decode(bytes: &[u8]) -> $crate::Result<Self> {
                    $crate::codec::from_json(bytes)
                }
            }
        )+
    };
}

json_codec!(serde_json::Value);

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Post {
        id: i64,
        title: String,
    }

    json_codec!(Post);

    #[test]
    fn test_integers_are_fixed_width_little_endian() {
        assert_eq!(42i64.encode().unwrap().as_ref(), &[42, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(i64::decode(&(-7i64).encode().unwrap()).unwrap(), -7);
        assert_eq!(u64::decode(&u64::MAX.encode().unwrap()).unwrap(), u64::MAX);
        assert_eq!(usize::decode(&10_001usize.encode().unwrap()).unwrap(), 10_001);
    }

    #[test]
    fn test_wrong_width_is_an_error() {
        let err = i64::decode(b"abc").unwrap_err();
        assert!(matches!(err, CacheError::Encoding { .. }));
    }

    #[test]
    fn test_strings_are_raw_bytes() {
        let encoded = "2002 JK".to_string().encode().unwrap();
        assert_eq!(encoded.as_ref(), b"2002 JK");
        assert_eq!(String::decode(&encoded).unwrap(), "2002 JK");
        assert!(String::decode(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_structs_use_json() {
        let post = Post {
            id: 1001,
            title: "Post 1".to_string(),
        };
        let encoded = post.encode().unwrap();
        assert_eq!(encoded.as_ref(), br#"{"id":1001,"title":"Post 1"}"#);
        assert_eq!(Post::decode(&encoded).unwrap(), post);
        assert!(Post::decode(b"not json").is_err());
    }
}
