//! Amino-JSON decoding for THORNode REST payloads.
//!
//! Amino encodes 64-bit integers as decimal strings and Go nil slices as `null`; the helpers here
//! accept both spellings and always encode integers back as strings.

use std::fmt::Display;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

/// Decodes an application payload returned by THORNode.
pub fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(buf)
}

/// `#[serde(with = "amino_int")]` for `i64`/`u64` fields.
pub mod amino_int {
    use super::*;
    use serde::Serializer;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntRepr<T> {
        Number(T),
        Text(String),
    }

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr + Deserialize<'de>,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        match IntRepr::<T>::deserialize(deserializer)? {
            IntRepr::Number(value) => Ok(value),
            IntRepr::Text(raw) => raw.trim().parse::<T>().map_err(|err| {
                serde::de::Error::custom(format!("invalid integer string {raw:?}: {err}"))
            }),
        }
    }
}

/// Treats an explicit `null` as the type's default.
pub fn null_as_default<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: Default + Deserialize<'de>,
    D: Deserializer<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
