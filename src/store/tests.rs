use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::SystemTime;

use bytes::Bytes;

use super::*;
use crate::metainfo::InfoHash;
use crate::peer::PeerId;

fn torrent(info_hash: InfoHash) -> TorrentRecord {
    TorrentRecord {
        id: 0,
        name: "test".into(),
        announce: "http://tracker.test/".into(),
        size: 1024,
        info_hash,
        created_at: SystemTime::now(),
        paused: false,
        location: PathBuf::from("/tmp/downloads"),
        progress: 0,
        raw_metainfo: Bytes::from_static(b"d4:test4:teste"),
    }
}

fn peer(torrent_id: i64, protocol_id: Option<PeerId>) -> PeerRecord {
    PeerRecord {
        id: 0,
        torrent_id,
        protocol_id,
        addr: "10.0.0.1:6881".parse::<SocketAddr>().unwrap(),
        reachable: true,
    }
}

#[tokio::test]
async fn test_client_get_last() {
    let store = MemoryStore::new();
    assert!(store.clients.get_last().await.unwrap().is_none());

    let mut first = ClientRecord {
        id: 0,
        protocol_id: PeerId::generate(),
        created_at: SystemTime::now(),
    };
    let mut second = ClientRecord {
        id: 0,
        protocol_id: PeerId::generate(),
        created_at: SystemTime::now(),
    };

    store.clients.create(&mut first).await.unwrap();
    store.clients.create(&mut second).await.unwrap();
    assert_ne!(first.id, second.id);

    let last = store.clients.get_last().await.unwrap().unwrap();
    assert_eq!(last.id, second.id);
    assert_eq!(last.protocol_id, second.protocol_id);
}

#[tokio::test]
async fn test_torrent_lookup_by_info_hash() {
    let store = MemoryStore::new();
    let hash = InfoHash([5u8; 20]);

    let mut record = torrent(hash);
    store.torrents.create(&mut record).await.unwrap();
    assert!(record.id > 0);

    let found = store.torrents.get_by_info_hash(&hash).await.unwrap();
    assert_eq!(found.unwrap().id, record.id);

    let missing = store
        .torrents
        .get_by_info_hash(&InfoHash([6u8; 20]))
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_torrent_get_all() {
    let store = MemoryStore::new();
    assert!(store.torrents.get_all().await.unwrap().is_empty());

    let mut first = torrent(InfoHash([1u8; 20]));
    let mut second = torrent(InfoHash([2u8; 20]));
    store.torrents.create(&mut first).await.unwrap();
    store.torrents.create(&mut second).await.unwrap();

    assert_eq!(store.torrents.get_all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_torrent_update() {
    let store = MemoryStore::new();
    let mut record = torrent(InfoHash([5u8; 20]));
    store.torrents.create(&mut record).await.unwrap();

    record.progress = 50;
    store.torrents.update(&record).await.unwrap();

    let found = store
        .torrents
        .get_by_info_hash(&record.info_hash)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.progress, 50);

    let unknown = torrent(InfoHash([9u8; 20]));
    assert!(store.torrents.update(&unknown).await.is_err());
}

#[tokio::test]
async fn test_peer_lookup_by_torrent_and_id() {
    let store = MemoryStore::new();
    let id = PeerId([4u8; 20]);

    let mut with_id = peer(1, Some(id));
    let mut without_id = peer(1, None);
    let mut other_torrent = peer(2, Some(id));
    store.peers.create(&mut with_id).await.unwrap();
    store.peers.create(&mut without_id).await.unwrap();
    store.peers.create(&mut other_torrent).await.unwrap();

    let found = store
        .peers
        .get_by_torrent_and_peer_id(1, &id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, with_id.id);

    // Id-less rows never match an id lookup.
    assert!(store
        .peers
        .get_by_torrent_and_peer_id(1, &PeerId([0u8; 20]))
        .await
        .unwrap()
        .is_none());

    assert_eq!(store.peers.get_by_torrent(1).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_connection_upsert_keyed_by_torrent_and_peer() {
    let store = MemoryStore::new();

    let mut conn = ConnectionRecord::initial(1, 7);
    assert!(conn.am_choking && conn.peer_choking);
    assert!(!conn.am_interested && !conn.peer_interested);

    store.connections.upsert(&conn).await.unwrap();
    conn.am_interested = true;
    store.connections.upsert(&conn).await.unwrap();

    let rows = store.connections.get_by_torrent(1).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].am_interested);

    // A different peer under the same torrent is a second row.
    store
        .connections
        .upsert(&ConnectionRecord::initial(1, 8))
        .await
        .unwrap();
    assert_eq!(store.connections.get_by_torrent(1).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_piece_records() {
    let store = MemoryStore::new();

    let mut piece = PieceRecord {
        id: 0,
        torrent_id: 5,
        located_at_peer_id: 2,
        came_from_peer_id: None,
        started_at: None,
        finished_at: None,
        index: 3,
        length: 16384,
    };
    store.pieces.create(&mut piece).await.unwrap();

    piece.came_from_peer_id = Some(2);
    piece.started_at = Some(SystemTime::now());
    store.pieces.update(&piece).await.unwrap();

    let rows = store.pieces.get_by_torrent(5).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].came_from_peer_id, Some(2));
    assert!(store.pieces.get_by_torrent(6).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_announce_records() {
    let store = MemoryStore::new();

    let mut record = AnnounceRecord {
        id: 0,
        torrent_id: 3,
        announced_at: SystemTime::now(),
        scheduled_at: None,
        raw_response: Some(Bytes::from_static(b"d8:intervali1800e5:peers0:e")),
        error: None,
        done: false,
    };
    store.announces.create(&mut record).await.unwrap();

    record.done = true;
    store.announces.update(&record).await.unwrap();

    let rows = store.announces.get_by_torrent(3).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].done);
}
