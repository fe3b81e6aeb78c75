use std::net::{IpAddr, Ipv4Addr};

use super::*;
use crate::metainfo::InfoHash;
use crate::peer::PeerId;

fn request() -> AnnounceRequest {
    AnnounceRequest {
        announce: "http://tracker.test/announce".into(),
        info_hash: InfoHash(*b"\x00\x01\x02\x03\x04\x05\x06\x07\x08\x09\x0a\x0b\x0c\x0d\x0e\x0f\x10\x11\x12\x13"),
        peer_id: PeerId(*b"ABCDEFGHIJKLMNOPQRST"),
        port: 6881,
        uploaded: 1,
        downloaded: 2,
        left: 3,
        event: None,
    }
}

#[test]
fn test_percent_encoding_is_byte_exact() {
    assert_eq!(percent_encode(b"abc-_.~"), "abc-_.~");
    assert_eq!(percent_encode(&[0x00, 0x1a, 0xff]), "%00%1A%FF");
    assert_eq!(percent_encode(b" /"), "%20%2F");
}

#[test]
fn test_build_announce_url() {
    let url = super::http::build_announce_url(&request()).unwrap();
    assert_eq!(
        url,
        "http://tracker.test/announce?info_hash=%00%01%02%03%04%05%06%07%08%09%0A%0B%0C%0D%0E%0F%10%11%12%13\
         &peer_id=ABCDEFGHIJKLMNOPQRST&port=6881&uploaded=1&downloaded=2&left=3"
    );
}

#[test]
fn test_build_announce_url_with_event() {
    let mut req = request();
    req.event = Some(Event::Started);
    let url = super::http::build_announce_url(&req).unwrap();
    assert!(url.ends_with("&event=started"));
}

#[test]
fn test_build_announce_url_rejects_non_http() {
    let mut req = request();
    req.announce = "udp://tracker.test:80".into();
    assert!(matches!(
        super::http::build_announce_url(&req),
        Err(TrackerError::InvalidUrl(_))
    ));
}

#[test]
fn test_parse_standard_response() {
    let mut body = Vec::new();
    body.extend_from_slice(b"d8:intervali1800e5:peersl");
    body.extend_from_slice(b"d2:ip8:10.0.0.17:peer id20:ABCDEFGHIJKLMNOPQRST4:porti6881ee");
    body.extend_from_slice(b"d2:ip3:bad7:peer id20:ABCDEFGHIJKLMNOPQRST4:porti1ee");
    body.extend_from_slice(b"ee");

    let announce = parse_announce(&body).unwrap();
    assert_eq!(announce.interval, 1800);
    // The unparsable address was skipped.
    assert_eq!(announce.peers.len(), 1);

    let peer = &announce.peers[0];
    assert_eq!(peer.addr.ip(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
    assert_eq!(peer.addr.port(), 6881);
    assert_eq!(peer.id, Some(PeerId(*b"ABCDEFGHIJKLMNOPQRST")));
    assert_eq!(announce.raw(), &body[..]);
}

#[test]
fn test_parse_compact_response() {
    // 192.168.0.1:6881 and 10.0.0.2:6881.
    let mut body = Vec::new();
    body.extend_from_slice(b"d8:intervali1800e5:peers12:");
    body.extend_from_slice(&[0xC0, 0xA8, 0x00, 0x01, 0x1A, 0xE1]);
    body.extend_from_slice(&[0x0A, 0x00, 0x00, 0x02, 0x1A, 0xE1]);
    body.push(b'e');

    let announce = parse_announce(&body).unwrap();
    assert_eq!(announce.interval, 1800);
    assert_eq!(announce.peers.len(), 2);
    assert_eq!(
        announce.peers[0].addr.ip(),
        IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1))
    );
    assert_eq!(announce.peers[0].addr.port(), 6881);
    assert_eq!(announce.peers[0].id, None);
    assert_eq!(
        announce.peers[1].addr.ip(),
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))
    );
}

#[test]
fn test_parse_compact_drops_trailing_remainder() {
    let mut body = Vec::new();
    body.extend_from_slice(b"d8:intervali60e5:peers8:");
    body.extend_from_slice(&[0xC0, 0xA8, 0x00, 0x01, 0x1A, 0xE1, 0x7F, 0x00]);
    body.push(b'e');

    let announce = parse_announce(&body).unwrap();
    assert_eq!(announce.peers.len(), 1);
}

#[test]
fn test_parse_failure_reason_wins() {
    // Even with interval and peers present, a failure reason is a failure.
    let body = b"d14:failure reason9:overload!8:intervali1800e5:peers0:e";
    assert!(matches!(
        parse_announce(body),
        Err(TrackerError::Failure(msg)) if msg == "overload!"
    ));
}

#[test]
fn test_parse_failure_reason_alone() {
    let body = b"d14:failure reason11:not allowede";
    assert!(matches!(parse_announce(body), Err(TrackerError::Failure(_))));
}

#[test]
fn test_parse_unparsable() {
    assert!(matches!(
        parse_announce(b"not bencode"),
        Err(TrackerError::UnparsableResponse)
    ));
    assert!(matches!(
        parse_announce(b"i42e"),
        Err(TrackerError::UnparsableResponse)
    ));
    // Missing interval.
    assert!(matches!(
        parse_announce(b"d5:peers0:e"),
        Err(TrackerError::UnparsableResponse)
    ));
    // Peers is neither a list nor bytes.
    assert!(matches!(
        parse_announce(b"d8:intervali60e5:peersi7ee"),
        Err(TrackerError::UnparsableResponse)
    ));
}

#[tokio::test]
async fn test_announce_cancelled_by_close() {
    use std::time::Duration;

    let client = TrackerClient::new(Duration::from_secs(30)).unwrap();
    client.close();

    // The cancel wins before any network activity.
    let result = client.announce(&request()).await;
    assert!(matches!(result, Err(TrackerError::Cancelled)));
}

#[test]
fn test_parse_empty_compact_peers() {
    let announce = parse_announce(b"d8:intervali1800e5:peers0:e").unwrap();
    assert!(announce.peers.is_empty());
}
