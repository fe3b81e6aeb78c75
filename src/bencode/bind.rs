use std::collections::BTreeMap;

use bytes::Bytes;

use super::error::BencodeError;
use super::value::Value;

/// Conversion out of a decoded bencode value into a typed field.
///
/// Record types implement this to bind a dictionary into themselves with
/// [`required`] and [`optional`]: keys the record does not declare are
/// ignored (forward compatibility), a declared non-optional key that is
/// absent fails with [`BencodeError::MissingKey`], and a present value of
/// the wrong kind fails with [`BencodeError::UnexpectedType`].
pub trait FromBencode: Sized {
    fn from_bencode(value: &Value) -> Result<Self, BencodeError>;
}

/// Binds the value under `key`, failing with `MissingKey` when absent.
pub fn required<T: FromBencode>(
    dict: &BTreeMap<Bytes, Value>,
    key: &'static str,
) -> Result<T, BencodeError> {
    match dict.get(key.as_bytes()) {
        Some(value) => T::from_bencode(value),
        None => Err(BencodeError::MissingKey(key)),
    }
}

/// Binds the value under `key`, mapping an absent key to `None`.
pub fn optional<T: FromBencode>(
    dict: &BTreeMap<Bytes, Value>,
    key: &'static str,
) -> Result<Option<T>, BencodeError> {
    match dict.get(key.as_bytes()) {
        Some(value) => T::from_bencode(value).map(Some),
        None => Ok(None),
    }
}

/// Borrows a value as a dictionary for nested binding.
pub fn as_dict(value: &Value) -> Result<&BTreeMap<Bytes, Value>, BencodeError> {
    value.as_dict().ok_or(BencodeError::UnexpectedType("dict"))
}

impl FromBencode for i64 {
    fn from_bencode(value: &Value) -> Result<Self, BencodeError> {
        value
            .as_integer()
            .ok_or(BencodeError::UnexpectedType("integer"))
    }
}

impl FromBencode for u64 {
    fn from_bencode(value: &Value) -> Result<Self, BencodeError> {
        let n = i64::from_bencode(value)?;
        u64::try_from(n).map_err(|_| BencodeError::UnexpectedType("non-negative integer"))
    }
}

impl FromBencode for u32 {
    fn from_bencode(value: &Value) -> Result<Self, BencodeError> {
        let n = i64::from_bencode(value)?;
        u32::try_from(n).map_err(|_| BencodeError::UnexpectedType("32-bit integer"))
    }
}

impl FromBencode for u16 {
    fn from_bencode(value: &Value) -> Result<Self, BencodeError> {
        let n = i64::from_bencode(value)?;
        u16::try_from(n).map_err(|_| BencodeError::UnexpectedType("16-bit integer"))
    }
}

impl FromBencode for Bytes {
    fn from_bencode(value: &Value) -> Result<Self, BencodeError> {
        value
            .as_bytes()
            .cloned()
            .ok_or(BencodeError::UnexpectedType("byte string"))
    }
}

// Text is an opt-in interpretation; the decoder itself never applies it.
impl FromBencode for String {
    fn from_bencode(value: &Value) -> Result<Self, BencodeError> {
        value
            .as_str()
            .map(String::from)
            .ok_or(BencodeError::UnexpectedType("utf-8 string"))
    }
}

impl<T: FromBencode> FromBencode for Vec<T> {
    fn from_bencode(value: &Value) -> Result<Self, BencodeError> {
        value
            .as_list()
            .ok_or(BencodeError::UnexpectedType("list"))?
            .iter()
            .map(T::from_bencode)
            .collect()
    }
}
