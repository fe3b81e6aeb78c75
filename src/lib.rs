//! bittide - a BitTorrent 1.0 client core
//!
//! The wire-level and encoding-level subsystems of a BitTorrent client,
//! built to be byte-exact against third-party peers and trackers.
//!
//! # Modules
//!
//! - [`bencode`] - canonical bencode codec and typed binding
//! - [`metainfo`] - `.torrent` parsing and the info-hash
//! - [`tracker`] - HTTP announce requests and response parsing
//! - [`peer`] - handshake, message framing, per-peer session state
//! - [`manager`] - session de-duplication and connection lifecycle
//! - [`store`] - repository contracts the core persists through
//! - [`client`] - the orchestration shell tying the pieces together

pub mod bencode;
pub mod client;
pub mod config;
pub mod manager;
pub mod metainfo;
pub mod peer;
pub mod store;
pub mod tracker;

pub use bencode::{decode, encode, BencodeError, Value};
pub use client::{Client, ClientError};
pub use config::Config;
pub use manager::{ConnectionManager, ManagerError};
pub use metainfo::{InfoHash, Metainfo, MetainfoError};
pub use peer::{
    Bitfield, BlockRequest, ChokeState, Handshake, Message, PeerError, PeerEvent, PeerId,
    SessionEvent, SessionHandle, SessionKey,
};
pub use store::{MemoryStore, StoreError};
pub use tracker::{Announce, AnnounceRequest, PeerInfo, TrackerClient, TrackerError};
