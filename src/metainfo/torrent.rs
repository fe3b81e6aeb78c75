use std::path::PathBuf;

use bytes::Bytes;

use crate::bencode::{self, as_dict, optional, required, BencodeError, FromBencode, Value};

use super::error::MetainfoError;
use super::info_hash::InfoHash;

/// A parsed `.torrent` descriptor.
///
/// The verbatim source buffer is retained so the descriptor can be stored
/// and re-parsed later without any re-encoding.
///
/// # Examples
///
/// ```no_run
/// use bittide::metainfo::Metainfo;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let data = std::fs::read("example.torrent")?;
/// let metainfo = Metainfo::from_bytes(&data)?;
///
/// println!("{}: {} bytes, {}", metainfo.info.name, metainfo.total_length(), metainfo.info_hash);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// Tracker announce URL.
    pub announce: String,
    /// Optional comment.
    pub comment: Option<String>,
    /// Name/version of the creating program.
    pub created_by: Option<String>,
    /// Unix timestamp of creation.
    pub creation_date: Option<i64>,
    /// Declared text encoding of the descriptor.
    pub encoding: Option<String>,
    /// The info dictionary.
    pub info: Info,
    /// SHA-1 of the verbatim `info` subtree bytes.
    pub info_hash: InfoHash,
    raw: Bytes,
    raw_info: Bytes,
}

/// The decoded `info` dictionary: name, piece geometry and file layout.
#[derive(Debug, Clone)]
pub struct Info {
    /// Suggested name for the file or directory.
    pub name: String,
    /// Bytes per piece (a power of two except possibly for odd torrents).
    pub piece_length: u64,
    /// Per-piece SHA-1 digests.
    pub pieces: Vec<[u8; 20]>,
    /// Normalised file list with running offsets; one entry for a
    /// single-file torrent.
    pub files: Vec<FileEntry>,
    /// Sum of all file lengths.
    pub total_length: u64,
    /// Whether the source declared `length` rather than `files`.
    pub single_file: bool,
    /// Trackers-only flag.
    pub private: bool,
}

/// A file within a torrent, with its byte offset into the piece space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub length: u64,
    pub offset: u64,
}

// Pre-normalisation shapes the binding layer fills in.
struct RawInfo {
    name: String,
    piece_length: u64,
    pieces: Bytes,
    length: Option<u64>,
    files: Option<Vec<RawFile>>,
    private: Option<i64>,
}

struct RawFile {
    length: u64,
    path: Vec<String>,
}

impl FromBencode for RawInfo {
    fn from_bencode(value: &Value) -> Result<Self, BencodeError> {
        let dict = as_dict(value)?;
        Ok(RawInfo {
            name: required(dict, "name")?,
            piece_length: required(dict, "piece length")?,
            pieces: required(dict, "pieces")?,
            length: optional(dict, "length")?,
            files: optional(dict, "files")?,
            private: optional(dict, "private")?,
        })
    }
}

impl FromBencode for RawFile {
    fn from_bencode(value: &Value) -> Result<Self, BencodeError> {
        let dict = as_dict(value)?;
        Ok(RawFile {
            length: required(dict, "length")?,
            path: required(dict, "path")?,
        })
    }
}

impl Metainfo {
    /// Parses a torrent descriptor from its raw bytes.
    ///
    /// The info-hash is computed over the original bytes of the `info`
    /// subtree as they appear in `data`, never over a re-encoding, so it
    /// survives unknown keys and any source quirks verbatim.
    ///
    /// # Errors
    ///
    /// Fails when the buffer is not a bencode dict, when required fields
    /// are absent, when `pieces` is not a multiple of 20 bytes, or when
    /// the info dict does not carry exactly one of `length`/`files`
    /// ([`MetainfoError::IncompleteInfo`]).
    pub fn from_bytes(data: &[u8]) -> Result<Self, MetainfoError> {
        let value = bencode::decode(data)?;
        let dict = as_dict(&value)?;

        let raw_info_slice = bencode::raw_dict_value(data, b"info")?
            .ok_or(BencodeError::MissingKey("info"))?;
        let info_hash = InfoHash::from_info_bytes(raw_info_slice);

        let bound: RawInfo = required(dict, "info")?;
        let info = normalize_info(bound)?;

        Ok(Self {
            announce: required(dict, "announce")?,
            comment: optional(dict, "comment")?,
            created_by: optional(dict, "created by")?,
            creation_date: optional(dict, "creation date")?,
            encoding: optional(dict, "encoding")?,
            info,
            info_hash,
            raw: Bytes::copy_from_slice(data),
            raw_info: Bytes::copy_from_slice(raw_info_slice),
        })
    }

    /// Reads a whole descriptor stream into a buffer and parses it.
    ///
    /// The buffer is retained verbatim; see [`Metainfo::raw`].
    pub fn from_reader<R: std::io::Read>(mut reader: R) -> Result<Self, MetainfoError> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(&data)
    }

    /// The verbatim descriptor bytes, as read from the source.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// The verbatim bytes of the `info` subtree.
    pub fn raw_info(&self) -> &Bytes {
        &self.raw_info
    }

    /// Total payload length across all files.
    pub fn total_length(&self) -> u64 {
        self.info.total_length
    }

    /// Number of pieces in the torrent.
    pub fn num_pieces(&self) -> usize {
        self.info.pieces.len()
    }
}

fn normalize_info(raw: RawInfo) -> Result<Info, MetainfoError> {
    if raw.pieces.len() % 20 != 0 {
        return Err(MetainfoError::InvalidField("pieces"));
    }

    let pieces: Vec<[u8; 20]> = raw
        .pieces
        .chunks_exact(20)
        .map(|chunk| {
            let mut arr = [0u8; 20];
            arr.copy_from_slice(chunk);
            arr
        })
        .collect();

    let (files, total_length, single_file) = match (raw.length, raw.files) {
        (Some(length), None) => {
            let file = FileEntry {
                path: PathBuf::from(&raw.name),
                length,
                offset: 0,
            };
            (vec![file], length, true)
        }
        (None, Some(raw_files)) => {
            let mut files = Vec::with_capacity(raw_files.len());
            let mut offset = 0u64;

            for raw_file in raw_files {
                let path: PathBuf = std::iter::once(raw.name.clone())
                    .chain(raw_file.path)
                    .collect();

                files.push(FileEntry {
                    path,
                    length: raw_file.length,
                    offset,
                });

                offset += raw_file.length;
            }

            (files, offset, false)
        }
        // Neither, or both.
        _ => return Err(MetainfoError::IncompleteInfo),
    };

    Ok(Info {
        name: raw.name,
        piece_length: raw.piece_length,
        pieces,
        files,
        total_length,
        single_file,
        private: raw.private == Some(1),
    })
}
