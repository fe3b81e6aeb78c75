//! Client orchestration
//!
//! The loop around the core: client identity, torrent registration,
//! announce persistence and peer-record ingestion. Piece scheduling and
//! disk I/O live outside this crate.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::metainfo::{InfoHash, Metainfo, MetainfoError};
use crate::peer::PeerId;
use crate::store::{
    AnnounceRecord, AnnounceRepository, ClientRecord, ClientRepository, PeerRecord,
    PeerRepository, StoreError, TorrentRecord, TorrentRepository,
};
use crate::tracker::{self, AnnounceRequest, Event, TrackerClient, TrackerError};

/// How soon to retry after a failed announce.
const ANNOUNCE_RETRY: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Metainfo(#[from] MetainfoError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The torrent is already registered.
    #[error("torrent {0} already exists")]
    TorrentExists(InfoHash),

    /// An announce record without a stored response cannot be processed.
    #[error("announce record carries no response")]
    EmptyAnnounce,
}

/// The stateful shell around the protocol core.
pub struct Client {
    identity: ClientRecord,
    port: u16,
    tracker: TrackerClient,
    clients: Arc<dyn ClientRepository>,
    torrents: Arc<dyn TorrentRepository>,
    announces: Arc<dyn AnnounceRepository>,
    peers: Arc<dyn PeerRepository>,
}

impl Client {
    /// Loads the most recent client identity, creating one on first run.
    pub async fn initialize(
        config: &Config,
        port: u16,
        clients: Arc<dyn ClientRepository>,
        torrents: Arc<dyn TorrentRepository>,
        announces: Arc<dyn AnnounceRepository>,
        peers: Arc<dyn PeerRepository>,
    ) -> Result<Self, ClientError> {
        let identity = match clients.get_last().await? {
            Some(record) => record,
            None => {
                info!("first run, creating client identity");
                let mut record = ClientRecord {
                    id: 0,
                    protocol_id: PeerId::generate(),
                    created_at: SystemTime::now(),
                };
                clients.create(&mut record).await?;
                record
            }
        };

        debug!(peer_id = %identity.protocol_id, "client initialized");

        Ok(Self {
            identity,
            port,
            tracker: TrackerClient::from_config(config)?,
            clients,
            torrents,
            announces,
            peers,
        })
    }

    /// The protocol peer-id this client presents to the swarm.
    pub fn protocol_id(&self) -> PeerId {
        self.identity.protocol_id
    }

    /// Registers a torrent: parses the descriptor, creates its download
    /// directory, and persists the record with the verbatim bytes.
    ///
    /// # Errors
    ///
    /// [`ClientError::TorrentExists`] when a torrent with the same
    /// info-hash is already registered.
    pub async fn open_torrent(
        &self,
        data: &[u8],
        download_dir: &Path,
    ) -> Result<TorrentRecord, ClientError> {
        let metainfo = Metainfo::from_bytes(data)?;

        if let Some(existing) = self
            .torrents
            .get_by_info_hash(&metainfo.info_hash)
            .await?
        {
            return Err(ClientError::TorrentExists(existing.info_hash));
        }

        let location = download_dir.join(&metainfo.info.name);
        tokio::fs::create_dir_all(&location).await?;

        let mut record = TorrentRecord {
            id: 0,
            name: metainfo.info.name.clone(),
            announce: metainfo.announce.clone(),
            size: metainfo.total_length(),
            info_hash: metainfo.info_hash,
            created_at: SystemTime::now(),
            paused: false,
            location,
            progress: 0,
            raw_metainfo: Bytes::copy_from_slice(data),
        };

        info!(name = %record.name, hash = %record.info_hash, "registering torrent");
        self.torrents.create(&mut record).await?;

        Ok(record)
    }

    /// Runs one announce cycle and persists the outcome.
    ///
    /// A tracker failure is not an error here: the record carries the
    /// failure text and a one-minute retry time instead of a response.
    /// On success the retry time honours the tracker's interval.
    pub async fn announce(
        &self,
        torrent: &TorrentRecord,
        event: Option<Event>,
    ) -> Result<AnnounceRecord, ClientError> {
        let announced_at = SystemTime::now();

        let request = AnnounceRequest {
            announce: torrent.announce.clone(),
            info_hash: torrent.info_hash,
            peer_id: self.identity.protocol_id,
            port: self.port,
            uploaded: 0,
            downloaded: 0,
            left: torrent.size,
            event,
        };

        let mut record = AnnounceRecord {
            id: 0,
            torrent_id: torrent.id,
            announced_at,
            scheduled_at: Some(announced_at + ANNOUNCE_RETRY),
            raw_response: None,
            error: None,
            done: false,
        };

        match self.tracker.announce(&request).await {
            Ok(response) => {
                record.scheduled_at =
                    Some(announced_at + Duration::from_secs(u64::from(response.interval)));
                record.raw_response = Some(response.raw().clone());
            }
            Err(err) => {
                warn!(torrent = %torrent.name, error = %err, "announce failed");
                record.error = Some(err.to_string());
            }
        }

        self.announces.create(&mut record).await?;
        Ok(record)
    }

    /// Re-parses a stored announce response and upserts peer records.
    ///
    /// Peers already known by protocol id (or, for id-less compact
    /// peers, by address) get their rows refreshed; the rest are created.
    pub async fn process_announce(
        &self,
        record: &AnnounceRecord,
    ) -> Result<Vec<PeerRecord>, ClientError> {
        if let Some(error) = &record.error {
            warn!(announce = record.id, error = %error, "skipping failed announce");
            return Err(ClientError::EmptyAnnounce);
        }
        let raw = record.raw_response.as_ref().ok_or(ClientError::EmptyAnnounce)?;

        let announce = tracker::parse_announce(raw)?;
        let known = self.peers.get_by_torrent(record.torrent_id).await?;

        let mut fresh = Vec::new();
        for peer in announce.peers {
            let existing = match peer.id {
                Some(id) => known.iter().find(|row| row.protocol_id == Some(id)),
                None => known.iter().find(|row| row.addr == peer.addr),
            };

            if let Some(row) = existing {
                if row.addr != peer.addr {
                    let mut updated = row.clone();
                    updated.addr = peer.addr;
                    self.peers.update(&updated).await?;
                }
                continue;
            }

            let mut row = PeerRecord {
                id: 0,
                torrent_id: record.torrent_id,
                protocol_id: peer.id,
                addr: peer.addr,
                reachable: true,
            };
            self.peers.create(&mut row).await?;
            debug!(torrent = record.torrent_id, addr = %row.addr, "new peer");
            fresh.push(row);
        }

        Ok(fresh)
    }

    /// The repositories this client writes to, for embedders that share
    /// them with a [`crate::manager::ConnectionManager`].
    pub fn repositories(
        &self,
    ) -> (
        Arc<dyn ClientRepository>,
        Arc<dyn TorrentRepository>,
        Arc<dyn AnnounceRepository>,
        Arc<dyn PeerRepository>,
    ) {
        (
            Arc::clone(&self.clients),
            Arc::clone(&self.torrents),
            Arc::clone(&self.announces),
            Arc::clone(&self.peers),
        )
    }
}
