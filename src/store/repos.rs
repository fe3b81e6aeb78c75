use async_trait::async_trait;

use crate::metainfo::InfoHash;
use crate::peer::PeerId;

use super::error::StoreError;
use super::records::{
    AnnounceRecord, ClientRecord, ConnectionRecord, PeerRecord, PieceRecord, TorrentRecord,
};

/// `create` assigns the record's id in place; the backend owns id
/// allocation.
#[async_trait]
pub trait ClientRepository: Send + Sync {
    async fn create(&self, client: &mut ClientRecord) -> Result<(), StoreError>;
    /// The most recently created client identity.
    async fn get_last(&self) -> Result<Option<ClientRecord>, StoreError>;
}

#[async_trait]
pub trait TorrentRepository: Send + Sync {
    async fn create(&self, torrent: &mut TorrentRecord) -> Result<(), StoreError>;
    async fn update(&self, torrent: &TorrentRecord) -> Result<(), StoreError>;
    async fn get_all(&self) -> Result<Vec<TorrentRecord>, StoreError>;
    async fn get_by_info_hash(
        &self,
        info_hash: &InfoHash,
    ) -> Result<Option<TorrentRecord>, StoreError>;
}

#[async_trait]
pub trait AnnounceRepository: Send + Sync {
    async fn create(&self, announce: &mut AnnounceRecord) -> Result<(), StoreError>;
    async fn update(&self, announce: &AnnounceRecord) -> Result<(), StoreError>;
    async fn get_by_torrent(&self, torrent_id: i64) -> Result<Vec<AnnounceRecord>, StoreError>;
}

#[async_trait]
pub trait PeerRepository: Send + Sync {
    async fn create(&self, peer: &mut PeerRecord) -> Result<(), StoreError>;
    async fn update(&self, peer: &PeerRecord) -> Result<(), StoreError>;
    async fn get_by_torrent(&self, torrent_id: i64) -> Result<Vec<PeerRecord>, StoreError>;
    async fn get_by_torrent_and_peer_id(
        &self,
        torrent_id: i64,
        protocol_id: &PeerId,
    ) -> Result<Option<PeerRecord>, StoreError>;
}

#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    /// Insert or overwrite under `(torrent_id, remote_peer_id)`.
    async fn upsert(&self, connection: &ConnectionRecord) -> Result<(), StoreError>;
    async fn get_by_torrent(&self, torrent_id: i64) -> Result<Vec<ConnectionRecord>, StoreError>;
}

#[async_trait]
pub trait PieceRepository: Send + Sync {
    async fn create(&self, piece: &mut PieceRecord) -> Result<(), StoreError>;
    async fn update(&self, piece: &PieceRecord) -> Result<(), StoreError>;
    async fn get_by_torrent(&self, torrent_id: i64) -> Result<Vec<PieceRecord>, StoreError>;
}
