use crate::bencode::BencodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetainfoError {
    #[error("bencode error: {0}")]
    Bencode(#[from] BencodeError),

    /// The info dict must carry exactly one of `length` and `files`.
    #[error("info dict needs exactly one of length and files")]
    IncompleteInfo,

    /// An info-hash was not 20 bytes.
    #[error("bad info hash")]
    BadInfoHash,

    #[error("invalid field: {0}")]
    InvalidField(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
