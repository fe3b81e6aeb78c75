use thiserror::Error;

/// Errors produced by the bencode decoder, encoder and binding layer.
///
/// # Examples
///
/// ```
/// use bittide::bencode::{decode, BencodeError};
///
/// // Truncated input
/// assert!(matches!(decode(b"4:ben"), Err(BencodeError::UnexpectedEnd)));
///
/// // Data left over after a complete value
/// assert!(matches!(decode(b"2:ben"), Err(BencodeError::TrailingBytes)));
///
/// // Empty integer body
/// assert!(matches!(decode(b"ie"), Err(BencodeError::BadInteger(_))));
/// ```
#[derive(Debug, Error)]
pub enum BencodeError {
    /// Input ended before a complete value was parsed.
    #[error("unexpected end of input")]
    UnexpectedEnd,

    /// Integer body is malformed (empty, non-numeric, `-0`, leading zeros,
    /// or out of the 64-bit range).
    #[error("bad integer: {0}")]
    BadInteger(String),

    /// Byte-string length prefix is not a valid number.
    #[error("bad string length")]
    BadLength,

    /// Dictionary key is not a byte-string.
    #[error("bad dictionary key")]
    BadKey,

    /// Octets remain after the top-level value.
    #[error("trailing bytes after value")]
    TrailingBytes,

    /// A non-optional key was absent while binding into a record.
    #[error("missing key: {0}")]
    MissingKey(&'static str),

    /// A value had a different kind than the binding target expects.
    #[error("unexpected type, wanted {0}")]
    UnexpectedType(&'static str),

    /// A byte that starts no production.
    #[error("unexpected byte: 0x{0:02x}")]
    UnexpectedByte(u8),

    /// Recursion limit (64 levels) exceeded.
    #[error("nesting too deep")]
    NestingTooDeep,
}
