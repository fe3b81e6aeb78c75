//! Bencode encoding and decoding (BEP-3)
//!
//! Bencode is the self-delimiting format BitTorrent uses for metainfo
//! files and tracker responses. The decoder is strict and returns raw
//! bytes; [`bind`] layers typed record binding on top of it.

mod bind;
mod decode;
mod encode;
mod error;
mod value;

pub use bind::{as_dict, optional, required, FromBencode};
pub use decode::{decode, raw_dict_value};
pub use encode::encode;
pub use error::BencodeError;
pub use value::Value;
