use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::SystemTime;

use bytes::Bytes;

use crate::metainfo::InfoHash;
use crate::peer::PeerId;

/// Our own identity: the protocol peer-id we present to the swarm.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub id: i64,
    pub protocol_id: PeerId,
    pub created_at: SystemTime,
}

/// A torrent we own, with its verbatim metainfo blob.
#[derive(Debug, Clone)]
pub struct TorrentRecord {
    pub id: i64,
    pub name: String,
    pub announce: String,
    pub size: u64,
    pub info_hash: InfoHash,
    pub created_at: SystemTime,
    pub paused: bool,
    /// Download directory.
    pub location: PathBuf,
    pub progress: u32,
    /// The `.torrent` bytes exactly as opened, for later re-parsing.
    pub raw_metainfo: Bytes,
}

/// One announce cycle: what we told the tracker and what came back.
#[derive(Debug, Clone)]
pub struct AnnounceRecord {
    pub id: i64,
    pub torrent_id: i64,
    pub announced_at: SystemTime,
    /// When the next announce should run.
    pub scheduled_at: Option<SystemTime>,
    /// The verbatim response body, when the tracker answered.
    pub raw_response: Option<Bytes>,
    /// The failure, when it did not.
    pub error: Option<String>,
    pub done: bool,
}

/// A peer we know about for one torrent.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: i64,
    pub torrent_id: i64,
    /// Absent for peers learned from compact tracker responses until a
    /// handshake teaches us their id.
    pub protocol_id: Option<PeerId>,
    pub addr: SocketAddr,
    pub reachable: bool,
}

/// Durable state of one peer connection; primary key is
/// `(torrent_id, remote_peer_id)`.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub torrent_id: i64,
    /// Database id of the remote [`PeerRecord`].
    pub remote_peer_id: i64,
    pub am_choking: bool,
    pub peer_choking: bool,
    pub am_interested: bool,
    pub peer_interested: bool,
    pub download_rate: f32,
    pub upload_rate: f32,
    pub last_activity: SystemTime,
}

impl ConnectionRecord {
    /// A fresh connection: both sides choking, neither interested.
    pub fn initial(torrent_id: i64, remote_peer_id: i64) -> Self {
        Self {
            torrent_id,
            remote_peer_id,
            am_choking: true,
            peer_choking: true,
            am_interested: false,
            peer_interested: false,
            download_rate: 0.0,
            upload_rate: 0.0,
            last_activity: SystemTime::now(),
        }
    }
}

/// Where a piece lives and how its download went.
///
/// Carried for the out-of-scope scheduler; the core only records.
#[derive(Debug, Clone)]
pub struct PieceRecord {
    pub id: i64,
    pub torrent_id: i64,
    pub located_at_peer_id: i64,
    pub came_from_peer_id: Option<i64>,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
    pub index: u32,
    pub length: u32,
}
