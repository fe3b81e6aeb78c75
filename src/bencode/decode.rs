use std::collections::BTreeMap;

use bytes::Bytes;

use super::error::BencodeError;
use super::value::Value;

const MAX_DEPTH: usize = 64;

/// Decodes a single bencode value from a byte slice.
///
/// The input must contain exactly one complete value; anything left over
/// fails with [`BencodeError::TrailingBytes`].
///
/// Byte strings come back as raw octets. Whether they are text is the
/// caller's business.
///
/// # Errors
///
/// - [`BencodeError::UnexpectedEnd`] on premature end of input
/// - [`BencodeError::BadInteger`] on a malformed integer body
/// - [`BencodeError::BadLength`] on a non-numeric string length
/// - [`BencodeError::BadKey`] on a non-string dictionary key
/// - [`BencodeError::TrailingBytes`] if octets remain after the value
///
/// # Examples
///
/// ```
/// use bittide::bencode::decode;
///
/// assert_eq!(decode(b"i-45e").unwrap().as_integer(), Some(-45));
///
/// let dict = decode(b"d3:cow3:moo4:spam4:eggse").unwrap();
/// assert_eq!(dict.get(b"cow").and_then(|v| v.as_str()), Some("moo"));
/// ```
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let mut pos = 0;
    let value = decode_value(data, &mut pos, 0)?;

    if pos != data.len() {
        return Err(BencodeError::TrailingBytes);
    }

    Ok(value)
}

/// Returns the raw byte span of the value stored under `key` in a
/// top-level dictionary, without building any [`Value`].
///
/// This is how the info-hash is computed over the *original* bytes of the
/// `info` subtree: decode-then-re-encode could reorder keys or drop data
/// and silently change the hash.
///
/// Returns `Ok(None)` when the dictionary is well-formed but the key is
/// absent.
///
/// # Examples
///
/// ```
/// use bittide::bencode::raw_dict_value;
///
/// let data = b"d3:foo3:bar4:infod1:ai1eee";
/// assert_eq!(raw_dict_value(data, b"info").unwrap(), Some(&b"d1:ai1ee"[..]));
/// assert_eq!(raw_dict_value(data, b"nope").unwrap(), None);
/// ```
pub fn raw_dict_value<'a>(
    data: &'a [u8],
    key: &[u8],
) -> Result<Option<&'a [u8]>, BencodeError> {
    if data.first() != Some(&b'd') {
        return Err(BencodeError::UnexpectedType("dict"));
    }

    let mut pos = 1;
    loop {
        match data.get(pos) {
            None => return Err(BencodeError::UnexpectedEnd),
            Some(b'e') => return Ok(None),
            Some(_) => {}
        }

        let entry_key = match decode_value(data, &mut pos, 1)? {
            Value::Bytes(b) => b,
            _ => return Err(BencodeError::BadKey),
        };

        let start = pos;
        skip_value(data, &mut pos, 1)?;

        if entry_key.as_ref() == key {
            return Ok(Some(&data[start..pos]));
        }
    }
}

fn decode_value(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    if depth > MAX_DEPTH {
        return Err(BencodeError::NestingTooDeep);
    }

    match data.get(*pos) {
        None => Err(BencodeError::UnexpectedEnd),
        Some(b'i') => decode_integer(data, pos),
        Some(b'l') => decode_list(data, pos, depth),
        Some(b'd') => decode_dict(data, pos, depth),
        Some(b'0'..=b'9') => decode_bytes(data, pos),
        Some(&b) => Err(BencodeError::UnexpectedByte(b)),
    }
}

// Walks over one value without materialising it.
fn skip_value(data: &[u8], pos: &mut usize, depth: usize) -> Result<(), BencodeError> {
    if depth > MAX_DEPTH {
        return Err(BencodeError::NestingTooDeep);
    }

    match data.get(*pos) {
        None => Err(BencodeError::UnexpectedEnd),
        Some(b'i') => decode_integer(data, pos).map(|_| ()),
        Some(b'0'..=b'9') => decode_bytes(data, pos).map(|_| ()),
        Some(b'l') | Some(b'd') => {
            let is_dict = data[*pos] == b'd';
            *pos += 1;
            while data.get(*pos) != Some(&b'e') {
                if *pos >= data.len() {
                    return Err(BencodeError::UnexpectedEnd);
                }
                if is_dict {
                    match data.get(*pos) {
                        Some(b'0'..=b'9') => skip_value(data, pos, depth + 1)?,
                        Some(_) => return Err(BencodeError::BadKey),
                        None => return Err(BencodeError::UnexpectedEnd),
                    }
                    skip_value(data, pos, depth + 1)?;
                } else {
                    skip_value(data, pos, depth + 1)?;
                }
            }
            *pos += 1;
            Ok(())
        }
        Some(&b) => Err(BencodeError::UnexpectedByte(b)),
    }
}

fn decode_integer(data: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    *pos += 1;

    let start = *pos;
    while *pos < data.len() && data[*pos] != b'e' {
        *pos += 1;
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEnd);
    }

    let body = &data[start..*pos];
    let int_str = std::str::from_utf8(body)
        .map_err(|_| BencodeError::BadInteger("non-ascii body".into()))?;

    if int_str.is_empty() || int_str == "-" {
        return Err(BencodeError::BadInteger("empty body".into()));
    }

    // "-0" and leading zeros have no canonical meaning; reject them.
    if int_str.starts_with("-0") || (int_str.starts_with('0') && int_str.len() > 1) {
        return Err(BencodeError::BadInteger(int_str.into()));
    }

    let value: i64 = int_str
        .parse()
        .map_err(|_| BencodeError::BadInteger(int_str.into()))?;

    *pos += 1;
    Ok(Value::Integer(value))
}

fn decode_bytes(data: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    let start = *pos;
    while *pos < data.len() && data[*pos] != b':' {
        *pos += 1;
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEnd);
    }

    let len: usize = std::str::from_utf8(&data[start..*pos])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(BencodeError::BadLength)?;

    *pos += 1;

    if *pos + len > data.len() {
        return Err(BencodeError::UnexpectedEnd);
    }

    let bytes = Bytes::copy_from_slice(&data[*pos..*pos + len]);
    *pos += len;

    Ok(Value::Bytes(bytes))
}

fn decode_list(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    *pos += 1;
    let mut list = Vec::new();

    while *pos < data.len() && data[*pos] != b'e' {
        list.push(decode_value(data, pos, depth + 1)?);
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEnd);
    }

    *pos += 1;
    Ok(Value::List(list))
}

fn decode_dict(data: &[u8], pos: &mut usize, depth: usize) -> Result<Value, BencodeError> {
    *pos += 1;
    let mut dict = BTreeMap::new();

    while *pos < data.len() && data[*pos] != b'e' {
        if !data[*pos].is_ascii_digit() {
            return Err(BencodeError::BadKey);
        }

        let key = match decode_value(data, pos, depth + 1)? {
            Value::Bytes(b) => b,
            _ => return Err(BencodeError::BadKey),
        };

        let value = decode_value(data, pos, depth + 1)?;
        dict.insert(key, value);
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEnd);
    }

    *pos += 1;
    Ok(Value::Dict(dict))
}
