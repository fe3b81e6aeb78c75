use super::value::Value;

/// Encodes a bencode value into its canonical byte form.
///
/// Encoding is total on [`Value`]: integers come out in minimal decimal
/// form, and dictionary keys are emitted in ascending byte-lexicographic
/// order regardless of how the dictionary was assembled (the `BTreeMap`
/// iteration order). That is the only sorting discipline — no locale, no
/// case folding.
///
/// `encode(decode(x)) == x` holds exactly when `x` was canonical to begin
/// with.
///
/// # Examples
///
/// ```
/// use bittide::bencode::{encode, Value};
/// use std::collections::BTreeMap;
///
/// let mut dict = BTreeMap::new();
/// dict.insert("ken".into(), Value::List(vec![]));
/// dict.insert("ben".into(), Value::Integer(123));
/// assert_eq!(encode(&Value::Dict(dict)), b"d3:beni123e3:kenlee");
/// ```
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value(value, &mut buf);
    buf
}

fn encode_value(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Integer(i) => {
            buf.push(b'i');
            buf.extend_from_slice(i.to_string().as_bytes());
            buf.push(b'e');
        }
        Value::Bytes(b) => {
            buf.extend_from_slice(b.len().to_string().as_bytes());
            buf.push(b':');
            buf.extend_from_slice(b);
        }
        Value::List(l) => {
            buf.push(b'l');
            for item in l {
                encode_value(item, buf);
            }
            buf.push(b'e');
        }
        Value::Dict(d) => {
            buf.push(b'd');
            for (key, val) in d {
                buf.extend_from_slice(key.len().to_string().as_bytes());
                buf.push(b':');
                buf.extend_from_slice(key);
                encode_value(val, buf);
            }
            buf.push(b'e');
        }
    }
}
