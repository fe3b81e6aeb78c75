//! In-memory repositories.
//!
//! The default backing for tests and for embedders that do not need
//! durability; a relational backend implements the same traits outside
//! this crate.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::metainfo::InfoHash;
use crate::peer::PeerId;

use super::error::StoreError;
use super::records::{
    AnnounceRecord, ClientRecord, ConnectionRecord, PeerRecord, PieceRecord, TorrentRecord,
};
use super::repos::{
    AnnounceRepository, ClientRepository, ConnectionRepository, PeerRepository, PieceRepository,
    TorrentRepository,
};

fn next_id(counter: &AtomicI64) -> i64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

#[derive(Default)]
pub struct MemoryClientRepository {
    rows: RwLock<Vec<ClientRecord>>,
    ids: AtomicI64,
}

#[async_trait]
impl ClientRepository for MemoryClientRepository {
    async fn create(&self, client: &mut ClientRecord) -> Result<(), StoreError> {
        client.id = next_id(&self.ids);
        self.rows.write().push(client.clone());
        Ok(())
    }

    async fn get_last(&self) -> Result<Option<ClientRecord>, StoreError> {
        Ok(self.rows.read().last().cloned())
    }
}

#[derive(Default)]
pub struct MemoryTorrentRepository {
    rows: RwLock<Vec<TorrentRecord>>,
    ids: AtomicI64,
}

#[async_trait]
impl TorrentRepository for MemoryTorrentRepository {
    async fn create(&self, torrent: &mut TorrentRecord) -> Result<(), StoreError> {
        torrent.id = next_id(&self.ids);
        self.rows.write().push(torrent.clone());
        Ok(())
    }

    async fn update(&self, torrent: &TorrentRecord) -> Result<(), StoreError> {
        let mut rows = self.rows.write();
        match rows.iter_mut().find(|row| row.id == torrent.id) {
            Some(row) => {
                *row = torrent.clone();
                Ok(())
            }
            None => Err(StoreError::Backend(format!(
                "no torrent with id {}",
                torrent.id
            ))),
        }
    }

    async fn get_all(&self) -> Result<Vec<TorrentRecord>, StoreError> {
        Ok(self.rows.read().clone())
    }

    async fn get_by_info_hash(
        &self,
        info_hash: &InfoHash,
    ) -> Result<Option<TorrentRecord>, StoreError> {
        Ok(self
            .rows
            .read()
            .iter()
            .find(|row| row.info_hash == *info_hash)
            .cloned())
    }
}

#[derive(Default)]
pub struct MemoryAnnounceRepository {
    rows: RwLock<Vec<AnnounceRecord>>,
    ids: AtomicI64,
}

#[async_trait]
impl AnnounceRepository for MemoryAnnounceRepository {
    async fn create(&self, announce: &mut AnnounceRecord) -> Result<(), StoreError> {
        announce.id = next_id(&self.ids);
        self.rows.write().push(announce.clone());
        Ok(())
    }

    async fn update(&self, announce: &AnnounceRecord) -> Result<(), StoreError> {
        let mut rows = self.rows.write();
        match rows.iter_mut().find(|row| row.id == announce.id) {
            Some(row) => {
                *row = announce.clone();
                Ok(())
            }
            None => Err(StoreError::Backend(format!(
                "no announce with id {}",
                announce.id
            ))),
        }
    }

    async fn get_by_torrent(&self, torrent_id: i64) -> Result<Vec<AnnounceRecord>, StoreError> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|row| row.torrent_id == torrent_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryPeerRepository {
    rows: RwLock<Vec<PeerRecord>>,
    ids: AtomicI64,
}

#[async_trait]
impl PeerRepository for MemoryPeerRepository {
    async fn create(&self, peer: &mut PeerRecord) -> Result<(), StoreError> {
        peer.id = next_id(&self.ids);
        self.rows.write().push(peer.clone());
        Ok(())
    }

    async fn update(&self, peer: &PeerRecord) -> Result<(), StoreError> {
        let mut rows = self.rows.write();
        match rows.iter_mut().find(|row| row.id == peer.id) {
            Some(row) => {
                *row = peer.clone();
                Ok(())
            }
            None => Err(StoreError::Backend(format!("no peer with id {}", peer.id))),
        }
    }

    async fn get_by_torrent(&self, torrent_id: i64) -> Result<Vec<PeerRecord>, StoreError> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|row| row.torrent_id == torrent_id)
            .cloned()
            .collect())
    }

    async fn get_by_torrent_and_peer_id(
        &self,
        torrent_id: i64,
        protocol_id: &PeerId,
    ) -> Result<Option<PeerRecord>, StoreError> {
        Ok(self
            .rows
            .read()
            .iter()
            .find(|row| row.torrent_id == torrent_id && row.protocol_id == Some(*protocol_id))
            .cloned())
    }
}

#[derive(Default)]
pub struct MemoryConnectionRepository {
    rows: RwLock<Vec<ConnectionRecord>>,
}

#[async_trait]
impl ConnectionRepository for MemoryConnectionRepository {
    async fn upsert(&self, connection: &ConnectionRecord) -> Result<(), StoreError> {
        let mut rows = self.rows.write();
        match rows.iter_mut().find(|row| {
            row.torrent_id == connection.torrent_id
                && row.remote_peer_id == connection.remote_peer_id
        }) {
            Some(row) => *row = connection.clone(),
            None => rows.push(connection.clone()),
        }
        Ok(())
    }

    async fn get_by_torrent(&self, torrent_id: i64) -> Result<Vec<ConnectionRecord>, StoreError> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|row| row.torrent_id == torrent_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryPieceRepository {
    rows: RwLock<Vec<PieceRecord>>,
    ids: AtomicI64,
}

#[async_trait]
impl PieceRepository for MemoryPieceRepository {
    async fn create(&self, piece: &mut PieceRecord) -> Result<(), StoreError> {
        piece.id = next_id(&self.ids);
        self.rows.write().push(piece.clone());
        Ok(())
    }

    async fn update(&self, piece: &PieceRecord) -> Result<(), StoreError> {
        let mut rows = self.rows.write();
        match rows.iter_mut().find(|row| row.id == piece.id) {
            Some(row) => {
                *row = piece.clone();
                Ok(())
            }
            None => Err(StoreError::Backend(format!("no piece with id {}", piece.id))),
        }
    }

    async fn get_by_torrent(&self, torrent_id: i64) -> Result<Vec<PieceRecord>, StoreError> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|row| row.torrent_id == torrent_id)
            .cloned()
            .collect())
    }
}

/// One of everything, shareable.
pub struct MemoryStore {
    pub clients: Arc<MemoryClientRepository>,
    pub torrents: Arc<MemoryTorrentRepository>,
    pub announces: Arc<MemoryAnnounceRepository>,
    pub peers: Arc<MemoryPeerRepository>,
    pub connections: Arc<MemoryConnectionRepository>,
    pub pieces: Arc<MemoryPieceRepository>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(MemoryClientRepository::default()),
            torrents: Arc::new(MemoryTorrentRepository::default()),
            announces: Arc::new(MemoryAnnounceRepository::default()),
            peers: Arc::new(MemoryPeerRepository::default()),
            connections: Arc::new(MemoryConnectionRepository::default()),
            pieces: Arc::new(MemoryPieceRepository::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}
