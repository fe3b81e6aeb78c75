use std::fmt;

use sha1::{Digest, Sha1};

use super::error::MetainfoError;

/// The SHA-1 of a torrent's canonically-bencoded `info` dictionary.
///
/// This 20-byte digest is what identifies a torrent on the wire: it is
/// carried in the handshake, sent to trackers, and used as the lookup key
/// for locally owned torrents.
///
/// # Examples
///
/// ```
/// use bittide::metainfo::InfoHash;
///
/// let hash = InfoHash::from_hex("c12fe1c06bba254a9dc9f519b335aa7c1367a88a").unwrap();
/// assert_eq!(hash.to_hex(), "c12fe1c06bba254a9dc9f519b335aa7c1367a88a");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    /// Hashes the raw bytes of an `info` subtree.
    ///
    /// The bytes must be the *original* encoded subtree, not a re-encoding
    /// of a decoded value.
    pub fn from_info_bytes(info_bytes: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(info_bytes);
        Self(hasher.finalize().into())
    }

    /// Builds an info-hash from 20 stored bytes.
    ///
    /// # Errors
    ///
    /// [`MetainfoError::BadInfoHash`] when the slice is not 20 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MetainfoError> {
        let arr: [u8; 20] = bytes.try_into().map_err(|_| MetainfoError::BadInfoHash)?;
        Ok(Self(arr))
    }

    /// Parses a 40-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, MetainfoError> {
        if s.len() != 40 {
            return Err(MetainfoError::BadInfoHash);
        }
        let bytes = hex_decode(s).ok_or(MetainfoError::BadInfoHash)?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex_encode(&self.0)
    }

    /// Percent-encodes the hash byte-exact for a tracker announce query.
    ///
    /// Every byte outside the URL-unreserved set becomes `%XX`.
    pub fn url_encode(&self) -> String {
        crate::tracker::percent_encode(&self.0)
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
