use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bytes::Bytes;

use crate::bencode::{self, as_dict, required, BencodeError, FromBencode, Value};
use crate::peer::PeerId;

use super::error::TrackerError;

/// A peer as reported by a tracker.
///
/// The protocol peer-id is present in the list-of-dicts response form and
/// absent in the compact form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: Option<PeerId>,
    pub addr: SocketAddr,
}

/// The optional `event` query parameter of an announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Started,
    Completed,
    Stopped,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Started => "started",
            Event::Completed => "completed",
            Event::Stopped => "stopped",
        }
    }
}

/// A parsed announce response.
///
/// The raw body is kept so the response can be persisted verbatim and
/// re-parsed later.
#[derive(Debug, Clone)]
pub struct Announce {
    /// Seconds until the tracker wants to hear from us again.
    pub interval: u32,
    pub peers: Vec<PeerInfo>,
    raw: Bytes,
}

impl Announce {
    /// The verbatim response body.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }
}

struct RawStandardPeer {
    peer_id: Bytes,
    ip: String,
    port: u16,
}

impl FromBencode for RawStandardPeer {
    fn from_bencode(value: &Value) -> Result<Self, BencodeError> {
        let dict = as_dict(value)?;
        Ok(RawStandardPeer {
            peer_id: required(dict, "peer id")?,
            ip: required(dict, "ip")?,
            port: required(dict, "port")?,
        })
    }
}

/// Parses an announce body, standard shape first, compact on structural
/// mismatch.
///
/// A valid `failure reason` short-circuits to [`TrackerError::Failure`]
/// no matter what else the body carries.
pub fn parse_announce(data: &[u8]) -> Result<Announce, TrackerError> {
    let value = bencode::decode(data).map_err(|_| TrackerError::UnparsableResponse)?;
    let dict = value.as_dict().ok_or(TrackerError::UnparsableResponse)?;

    if let Some(reason) = dict.get(b"failure reason".as_slice()).and_then(|v| v.as_str()) {
        return Err(TrackerError::Failure(reason.to_string()));
    }

    let interval: u32 = required(dict, "interval").map_err(|_| TrackerError::UnparsableResponse)?;

    let peers_value = dict
        .get(b"peers".as_slice())
        .ok_or(TrackerError::UnparsableResponse)?;

    let peers = match Vec::<RawStandardPeer>::from_bencode(peers_value) {
        Ok(raw_peers) => standard_peers(raw_peers),
        Err(_) => {
            let body = peers_value
                .as_bytes()
                .ok_or(TrackerError::UnparsableResponse)?;
            compact_peers(body)
        }
    };

    Ok(Announce {
        interval,
        peers,
        raw: Bytes::copy_from_slice(data),
    })
}

fn standard_peers(raw_peers: Vec<RawStandardPeer>) -> Vec<PeerInfo> {
    raw_peers
        .into_iter()
        .filter_map(|raw| {
            // Peers whose address does not parse are dropped, not fatal.
            let ip: IpAddr = raw.ip.parse().ok()?;
            Some(PeerInfo {
                id: PeerId::from_bytes(&raw.peer_id),
                addr: SocketAddr::new(ip, raw.port),
            })
        })
        .collect()
}

// 6-octet records: IPv4 address then big-endian port. A trailing partial
// record is discarded.
fn compact_peers(body: &[u8]) -> Vec<PeerInfo> {
    body.chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            PeerInfo {
                id: None,
                addr: SocketAddr::new(IpAddr::V4(ip), port),
            }
        })
        .collect()
}

/// Percent-encodes raw bytes for a query string, byte-exact.
///
/// Only the URL-unreserved set passes through; everything else becomes
/// `%XX`. This is what makes 20-byte binary `info_hash`/`peer_id` values
/// safe to transport.
pub fn percent_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes.iter().fold(String::new(), |mut s, &b| {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' || b == b'~' {
            s.push(b as char);
        } else {
            let _ = write!(s, "%{:02X}", b);
        }
        s
    })
}
