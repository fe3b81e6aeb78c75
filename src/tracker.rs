//! HTTP tracker protocol (BEP-3)
//!
//! Announce requests with byte-exact percent-encoding of the binary
//! parameters, and parsing of both the standard and the compact response
//! forms.

mod error;
mod http;
mod response;

pub use error::TrackerError;
pub use http::{AnnounceRequest, TrackerClient};
pub use response::{parse_announce, percent_encode, Announce, Event, PeerInfo};

#[cfg(test)]
mod tests;
