use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::*;
use crate::metainfo::InfoHash;

const MAX_FRAME: usize = 16 * 1024 * 1024 + 9;

fn spec_info_hash() -> InfoHash {
    let mut bytes = [0u8; 20];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = i as u8;
    }
    InfoHash(bytes)
}

#[test]
fn test_peer_id_generate() {
    let id1 = PeerId::generate();
    let id2 = PeerId::generate();
    assert_ne!(id1.0, id2.0);
    assert_eq!(id1.client_tag(), Some("BD0001"));
}

#[test]
fn test_handshake_wire_layout() {
    // info_hash 0x00..0x13, peer_id 0x41..0x54 ("A".."T").
    let peer_id = PeerId(*b"ABCDEFGHIJKLMNOPQRST");
    let frame = Handshake::new(spec_info_hash(), peer_id).encode();

    assert_eq!(frame.len(), 68);
    assert_eq!(frame[0], 0x13);
    assert_eq!(&frame[1..20], b"BitTorrent protocol");
    assert_eq!(&frame[20..28], &[0u8; 8]);
    assert_eq!(&frame[28..48], spec_info_hash().as_bytes());
    assert_eq!(&frame[48..68], b"ABCDEFGHIJKLMNOPQRST");
}

#[test]
fn test_handshake_decode_roundtrip() {
    let handshake = Handshake::new(spec_info_hash(), PeerId([7u8; 20]));
    let decoded = Handshake::decode(&handshake.encode()).unwrap();
    assert_eq!(decoded, handshake);
}

#[test]
fn test_handshake_decode_rejects_bad_length_byte() {
    let mut frame = Handshake::new(spec_info_hash(), PeerId([7u8; 20]))
        .encode()
        .to_vec();
    // The 0x19 variant seen in the wild is a bug, not a dialect.
    frame[0] = 0x19;
    assert!(matches!(
        Handshake::decode(&frame),
        Err(PeerError::HandshakeMismatch)
    ));
}

#[test]
fn test_handshake_decode_short() {
    assert!(matches!(
        Handshake::decode(&[0x13; 20]),
        Err(PeerError::ShortPayload)
    ));
}

#[test]
fn test_request_wire_layout() {
    let frame = Message::Request {
        index: 0,
        begin: 1,
        length: 5,
    }
    .encode();

    assert_eq!(
        frame.as_ref(),
        &[0x00, 0x00, 0x00, 0x0D, 0x06, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 5]
    );
}

#[test]
fn test_message_roundtrip_all_kinds() {
    let messages = vec![
        Message::KeepAlive,
        Message::Choke,
        Message::Unchoke,
        Message::Interested,
        Message::NotInterested,
        Message::Have { piece: 42 },
        Message::Bitfield(Bytes::from_static(&[0b1010_0000])),
        Message::Request {
            index: 1,
            begin: 0,
            length: 16384,
        },
        Message::Piece {
            index: 3,
            begin: 16384,
            data: Bytes::from_static(b"block bytes"),
        },
        Message::Cancel {
            index: 1,
            begin: 0,
            length: 16384,
        },
    ];

    for message in messages {
        let decoded = Message::decode(message.encode()).unwrap();
        assert_eq!(decoded, message);
    }
}

#[test]
fn test_message_decode_keepalive() {
    assert_eq!(
        Message::decode(Bytes::from_static(&[0, 0, 0, 0])).unwrap(),
        Message::KeepAlive
    );
}

#[test]
fn test_message_decode_unknown_id() {
    // A DHT port announcement; id 9 is outside this protocol core.
    let frame = Bytes::from_static(&[0, 0, 0, 3, 9, 0x1A, 0xE1]);
    assert!(matches!(
        Message::decode(frame),
        Err(PeerError::UnknownMessageId(9))
    ));
}

#[test]
fn test_message_decode_short_payload() {
    // Declares five payload octets, carries two.
    let frame = Bytes::from_static(&[0, 0, 0, 5, 4, 0, 0]);
    assert!(matches!(
        Message::decode(frame),
        Err(PeerError::ShortPayload)
    ));

    // A request frame with a truncated body.
    let frame = Bytes::from_static(&[0, 0, 0, 5, 6, 0, 0, 0, 1]);
    assert!(matches!(
        Message::decode(frame),
        Err(PeerError::ShortPayload)
    ));
}

#[tokio::test]
async fn test_transport_framing() {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let mut sender = PeerTransport::new(near, MAX_FRAME);
    let mut receiver = PeerTransport::new(far, MAX_FRAME);

    sender
        .send_message(&Message::Have { piece: 9 })
        .await
        .unwrap();
    sender.send_message(&Message::KeepAlive).await.unwrap();
    sender
        .send_message(&Message::Piece {
            index: 1,
            begin: 2,
            data: Bytes::from_static(b"xyz"),
        })
        .await
        .unwrap();

    assert_eq!(
        receiver.read_message().await.unwrap(),
        Message::Have { piece: 9 }
    );
    assert_eq!(receiver.read_message().await.unwrap(), Message::KeepAlive);
    assert_eq!(
        receiver.read_message().await.unwrap(),
        Message::Piece {
            index: 1,
            begin: 2,
            data: Bytes::from_static(b"xyz"),
        }
    );
}

#[tokio::test]
async fn test_transport_rejects_oversize_frame() {
    let (near, far) = tokio::io::duplex(1024);
    let mut sender = PeerTransport::new(near, MAX_FRAME);
    // Tiny cap on the receiving side.
    let mut receiver = PeerTransport::new(far, 8);

    sender
        .send_message(&Message::Bitfield(Bytes::from_static(&[0xFF; 16])))
        .await
        .unwrap();

    assert!(matches!(
        receiver.read_message().await,
        Err(PeerError::ProtocolViolation("oversize frame"))
    ));
}

#[tokio::test]
async fn test_transport_eof_mid_frame_is_short_payload() {
    let (near, far) = tokio::io::duplex(1024);
    let mut receiver = PeerTransport::new(far, MAX_FRAME);

    let task = tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;
        let mut near = near;
        // Length prefix says 13 bytes; deliver 3 and hang up.
        near.write_all(&[0, 0, 0, 13, 6, 0, 0]).await.unwrap();
        near.shutdown().await.unwrap();
        drop(near);
    });

    assert!(matches!(
        receiver.read_message().await,
        Err(PeerError::ShortPayload)
    ));
    task.await.unwrap();
}

#[tokio::test]
async fn test_initiator_handshake_ok() {
    let (near, far) = tokio::io::duplex(1024);
    let info_hash = spec_info_hash();
    let local = PeerId([1u8; 20]);
    let remote = PeerId([2u8; 20]);

    let responder = tokio::spawn(async move {
        let mut transport = PeerTransport::new(far, MAX_FRAME);
        let theirs = transport.read_handshake().await.unwrap();
        assert_eq!(theirs.peer_id, PeerId([1u8; 20]));
        transport
            .send_handshake(&Handshake::new(theirs.info_hash, PeerId([2u8; 20])))
            .await
            .unwrap();
    });

    let mut transport = PeerTransport::new(near, MAX_FRAME);
    let received = transport
        .initiate(&Handshake::new(info_hash, local), Some(remote))
        .await
        .unwrap();

    assert_eq!(received.peer_id, remote);
    responder.await.unwrap();
}

#[tokio::test]
async fn test_initiator_rejects_wrong_info_hash() {
    let (near, far) = tokio::io::duplex(1024);

    let responder = tokio::spawn(async move {
        let mut transport = PeerTransport::new(far, MAX_FRAME);
        let _ = transport.read_handshake().await.unwrap();
        let _ = transport
            .send_handshake(&Handshake::new(InfoHash([0xEE; 20]), PeerId([2u8; 20])))
            .await;
    });

    let mut transport = PeerTransport::new(near, MAX_FRAME);
    let result = transport
        .initiate(&Handshake::new(spec_info_hash(), PeerId([1u8; 20])), None)
        .await;

    assert!(matches!(result, Err(PeerError::HandshakeMismatch)));
    responder.await.unwrap();
}

#[tokio::test]
async fn test_initiator_rejects_unexpected_peer_id() {
    let (near, far) = tokio::io::duplex(1024);
    let info_hash = spec_info_hash();

    let responder = tokio::spawn(async move {
        let mut transport = PeerTransport::new(far, MAX_FRAME);
        let theirs = transport.read_handshake().await.unwrap();
        let _ = transport
            .send_handshake(&Handshake::new(theirs.info_hash, PeerId([9u8; 20])))
            .await;
    });

    let mut transport = PeerTransport::new(near, MAX_FRAME);
    let result = transport
        .initiate(
            &Handshake::new(info_hash, PeerId([1u8; 20])),
            Some(PeerId([2u8; 20])),
        )
        .await;

    assert!(matches!(result, Err(PeerError::HandshakeMismatch)));
    responder.await.unwrap();
}

#[test]
fn test_choke_state_initial_values() {
    let state = ChokeState::default();
    assert!(state.am_choking);
    assert!(!state.am_interested);
    assert!(state.peer_choking);
    assert!(!state.peer_interested);
}

#[test]
fn test_bitfield_bits() {
    let mut bf = Bitfield::new(10);
    assert!(!bf.has(0));

    bf.set(0);
    bf.set(9);
    assert!(bf.has(0));
    assert!(bf.has(9));
    assert_eq!(bf.count(), 2);

    bf.clear(0);
    assert!(!bf.has(0));

    // MSB-first: piece 0 is the high bit of byte 0.
    let bf = Bitfield::from_bytes(&[0x80, 0x01], 16);
    assert!(bf.has(0));
    assert!(!bf.has(1));
    assert!(bf.has(15));
}

#[test]
fn test_bitfield_clears_spare_bits() {
    let bf = Bitfield::from_bytes(&[0xFF, 0xFF], 12);
    assert_eq!(bf.count(), 12);
    assert_eq!(bf.as_bytes(), &[0xFF, 0xF0]);
}

fn session_params(idle_ms: u64, keep_alive_ms: u64) -> SessionParams {
    SessionParams {
        key: SessionKey {
            peer_id: PeerId([3u8; 20]),
            info_hash: spec_info_hash(),
        },
        num_pieces: Some(16),
        keep_alive_interval: Duration::from_millis(keep_alive_ms),
        idle_timeout: Duration::from_millis(idle_ms),
    }
}

async fn next_event(events: &mut mpsc::Receiver<PeerEvent>) -> SessionEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event wait")
        .expect("events channel open")
        .event
}

#[tokio::test]
async fn test_session_tracks_remote_state() {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let (events_tx, mut events_rx) = mpsc::channel(32);
    let (closed_tx, _closed_rx) = mpsc::channel(4);

    let handle = spawn(
        PeerTransport::new(near, MAX_FRAME),
        session_params(60_000, 60_000),
        events_tx,
        closed_tx,
    );

    let mut remote = PeerTransport::new(far, MAX_FRAME);
    remote
        .send_message(&Message::Bitfield(Bytes::from_static(&[0xFF, 0x00])))
        .await
        .unwrap();
    remote.send_message(&Message::Have { piece: 9 }).await.unwrap();
    remote.send_message(&Message::Unchoke).await.unwrap();
    remote.send_message(&Message::Interested).await.unwrap();

    match next_event(&mut events_rx).await {
        SessionEvent::Bitfield(bf) => {
            assert_eq!(bf.piece_count(), 16);
            assert_eq!(bf.count(), 8);
        }
        other => panic!("expected bitfield, got {:?}", other),
    }
    assert!(matches!(next_event(&mut events_rx).await, SessionEvent::Have(9)));
    assert!(matches!(
        next_event(&mut events_rx).await,
        SessionEvent::PeerChoked(false)
    ));
    assert!(matches!(
        next_event(&mut events_rx).await,
        SessionEvent::PeerInterested(true)
    ));

    handle.close().await;
}

#[tokio::test]
async fn test_session_rejects_late_bitfield() {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let (events_tx, mut events_rx) = mpsc::channel(32);
    let (closed_tx, mut closed_rx) = mpsc::channel(4);

    let _handle = spawn(
        PeerTransport::new(near, MAX_FRAME),
        session_params(60_000, 60_000),
        events_tx,
        closed_tx,
    );

    let mut remote = PeerTransport::new(far, MAX_FRAME);
    remote.send_message(&Message::Unchoke).await.unwrap();
    remote
        .send_message(&Message::Bitfield(Bytes::from_static(&[0x00, 0x00])))
        .await
        .unwrap();

    assert!(matches!(
        next_event(&mut events_rx).await,
        SessionEvent::PeerChoked(false)
    ));
    match next_event(&mut events_rx).await {
        SessionEvent::Closed(Some(reason)) => assert!(reason.contains("bitfield")),
        other => panic!("expected closed, got {:?}", other),
    }

    let key = timeout(Duration::from_secs(5), closed_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(key.peer_id, PeerId([3u8; 20]));
}

#[tokio::test]
async fn test_session_drops_request_while_choking() {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let (events_tx, mut events_rx) = mpsc::channel(32);
    let (closed_tx, _closed_rx) = mpsc::channel(4);

    let handle = spawn(
        PeerTransport::new(near, MAX_FRAME),
        session_params(60_000, 60_000),
        events_tx,
        closed_tx,
    );

    let mut remote = PeerTransport::new(far, MAX_FRAME);
    remote
        .send_message(&Message::Request {
            index: 0,
            begin: 0,
            length: 16384,
        })
        .await
        .unwrap();

    // A marker message proves the request above was seen and dropped
    // before we unchoke.
    remote.send_message(&Message::Interested).await.unwrap();
    assert!(matches!(
        next_event(&mut events_rx).await,
        SessionEvent::PeerInterested(true)
    ));

    // Unchoke the peer, then request again.
    handle.set_choking(false).await.unwrap();
    assert_eq!(remote.read_message().await.unwrap(), Message::Unchoke);

    remote
        .send_message(&Message::Request {
            index: 1,
            begin: 0,
            length: 16384,
        })
        .await
        .unwrap();

    // Only the post-unchoke request surfaces.
    match next_event(&mut events_rx).await {
        SessionEvent::Request(block) => assert_eq!(block.index, 1),
        other => panic!("expected request, got {:?}", other),
    }

    handle.close().await;
}

#[tokio::test]
async fn test_session_oversize_request_is_fatal() {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let (events_tx, mut events_rx) = mpsc::channel(32);
    let (closed_tx, _closed_rx) = mpsc::channel(4);

    let _handle = spawn(
        PeerTransport::new(near, MAX_FRAME),
        session_params(60_000, 60_000),
        events_tx,
        closed_tx,
    );

    let mut remote = PeerTransport::new(far, MAX_FRAME);
    remote
        .send_message(&Message::Request {
            index: 0,
            begin: 0,
            length: MAX_BLOCK_LEN + 1,
        })
        .await
        .unwrap();

    match next_event(&mut events_rx).await {
        SessionEvent::Closed(Some(reason)) => assert!(reason.contains("oversize block")),
        other => panic!("expected closed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_session_oversize_cancel_is_fatal() {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let (events_tx, mut events_rx) = mpsc::channel(32);
    let (closed_tx, _closed_rx) = mpsc::channel(4);

    let handle = spawn(
        PeerTransport::new(near, MAX_FRAME),
        session_params(60_000, 60_000),
        events_tx,
        closed_tx,
    );

    let mut remote = PeerTransport::new(far, MAX_FRAME);

    // Unchoke first so the cancel would otherwise be forwarded.
    handle.set_choking(false).await.unwrap();
    assert_eq!(remote.read_message().await.unwrap(), Message::Unchoke);

    remote
        .send_message(&Message::Cancel {
            index: 0,
            begin: 0,
            length: MAX_BLOCK_LEN + 1,
        })
        .await
        .unwrap();

    match next_event(&mut events_rx).await {
        SessionEvent::Closed(Some(reason)) => assert!(reason.contains("oversize block")),
        other => panic!("expected closed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_session_have_out_of_range_is_fatal() {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let (events_tx, mut events_rx) = mpsc::channel(32);
    let (closed_tx, _closed_rx) = mpsc::channel(4);

    let _handle = spawn(
        PeerTransport::new(near, MAX_FRAME),
        session_params(60_000, 60_000),
        events_tx,
        closed_tx,
    );

    let mut remote = PeerTransport::new(far, MAX_FRAME);
    remote.send_message(&Message::Have { piece: 99 }).await.unwrap();

    match next_event(&mut events_rx).await {
        SessionEvent::Closed(Some(reason)) => assert!(reason.contains("out of range")),
        other => panic!("expected closed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_session_sends_keep_alive() {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let (events_tx, _events_rx) = mpsc::channel(32);
    let (closed_tx, _closed_rx) = mpsc::channel(4);

    let handle = spawn(
        PeerTransport::new(near, MAX_FRAME),
        session_params(60_000, 100),
        events_tx,
        closed_tx,
    );

    let mut remote = PeerTransport::new(far, MAX_FRAME);
    let message = timeout(Duration::from_secs(5), remote.read_message())
        .await
        .expect("keep-alive wait")
        .unwrap();
    assert_eq!(message, Message::KeepAlive);

    handle.close().await;
}

#[tokio::test]
async fn test_session_idle_death() {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let (events_tx, mut events_rx) = mpsc::channel(32);
    let (closed_tx, mut closed_rx) = mpsc::channel(4);

    let handle = spawn(
        PeerTransport::new(near, MAX_FRAME),
        session_params(150, 60_000),
        events_tx,
        closed_tx,
    );

    // Keep the far end open but silent.
    let _far = far;

    match next_event(&mut events_rx).await {
        SessionEvent::Closed(Some(reason)) => assert!(reason.contains("idle")),
        other => panic!("expected idle death, got {:?}", other),
    }

    assert!(timeout(Duration::from_secs(5), closed_rx.recv())
        .await
        .unwrap()
        .is_some());

    // The driver has announced its death; give its task a beat to drop
    // the command channel.
    for _ in 0..100 {
        if !handle.is_open() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!handle.is_open());
}

#[tokio::test]
async fn test_session_send_flips_local_flags_on_wire() {
    // The local intent flags are observable through behaviour: after
    // Unchoke goes out, requests get through; Choke turns them back off.
    let (near, far) = tokio::io::duplex(64 * 1024);
    let (events_tx, mut events_rx) = mpsc::channel(32);
    let (closed_tx, _closed_rx) = mpsc::channel(4);

    let handle = spawn(
        PeerTransport::new(near, MAX_FRAME),
        session_params(60_000, 60_000),
        events_tx,
        closed_tx,
    );

    let mut remote = PeerTransport::new(far, MAX_FRAME);

    handle.set_choking(false).await.unwrap();
    assert_eq!(remote.read_message().await.unwrap(), Message::Unchoke);
    handle.set_choking(true).await.unwrap();
    assert_eq!(remote.read_message().await.unwrap(), Message::Choke);

    remote
        .send_message(&Message::Request {
            index: 2,
            begin: 0,
            length: 1,
        })
        .await
        .unwrap();
    remote.send_message(&Message::Interested).await.unwrap();

    // The request was dropped again; the next event is the interest flip.
    assert!(matches!(
        next_event(&mut events_rx).await,
        SessionEvent::PeerInterested(true)
    ));

    handle.close().await;
}
