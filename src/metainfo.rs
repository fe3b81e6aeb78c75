//! Torrent metainfo (BEP-3)
//!
//! Parses `.torrent` descriptors, exposes the file layout and piece
//! geometry, and computes the info-hash over the verbatim `info` subtree.

mod error;
mod info_hash;
mod torrent;

pub use error::MetainfoError;
pub use info_hash::InfoHash;
pub use torrent::{FileEntry, Info, Metainfo};
