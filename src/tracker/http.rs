use std::time::Duration;

use reqwest::Client;
use tokio::sync::watch;
use tracing::debug;

use crate::config::Config;
use crate::metainfo::InfoHash;
use crate::peer::PeerId;

use super::error::TrackerError;
use super::response::{parse_announce, percent_encode, Announce, Event};

/// Everything an announce needs to say about us.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    /// The tracker announce URL from the metainfo.
    pub announce: String,
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    /// The port we accept peer connections on.
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    /// Octets still missing from the payload.
    pub left: u64,
    pub event: Option<Event>,
}

/// An HTTP tracker client.
///
/// # Examples
///
/// ```no_run
/// use bittide::tracker::{AnnounceRequest, Event, TrackerClient};
/// use bittide::metainfo::InfoHash;
/// use bittide::peer::PeerId;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let tracker = TrackerClient::new(std::time::Duration::from_secs(30))?;
/// let response = tracker
///     .announce(&AnnounceRequest {
///         announce: "http://tracker.example.com/announce".into(),
///         info_hash: InfoHash([0u8; 20]),
///         peer_id: PeerId::generate(),
///         port: 6881,
///         uploaded: 0,
///         downloaded: 0,
///         left: 1000,
///         event: Some(Event::Started),
///     })
///     .await?;
/// println!("{} peers, next announce in {}s", response.peers.len(), response.interval);
/// # Ok(())
/// # }
/// ```
pub struct TrackerClient {
    http: Client,
    shutdown: watch::Sender<bool>,
}

impl TrackerClient {
    pub fn new(timeout: Duration) -> Result<Self, TrackerError> {
        let http = Client::builder().timeout(timeout).build()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self { http, shutdown })
    }

    pub fn from_config(config: &Config) -> Result<Self, TrackerError> {
        Self::new(config.tracker_timeout)
    }

    /// Aborts announces in flight; they return
    /// [`TrackerError::Cancelled`] rather than a network error. Later
    /// announces are cancelled immediately.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Runs one announce cycle against the tracker.
    ///
    /// # Errors
    ///
    /// [`TrackerError::Http`] for a non-2xx status,
    /// [`TrackerError::Failure`] when the tracker reports a failure
    /// reason, [`TrackerError::UnparsableResponse`] when the body matches
    /// neither response shape. Network errors propagate as
    /// [`TrackerError::Request`].
    pub async fn announce(&self, request: &AnnounceRequest) -> Result<Announce, TrackerError> {
        let mut shutdown = self.shutdown.subscribe();

        tokio::select! {
            biased;
            _ = shutdown.wait_for(|closed| *closed) => Err(TrackerError::Cancelled),
            result = self.perform(request) => result,
        }
    }

    async fn perform(&self, request: &AnnounceRequest) -> Result<Announce, TrackerError> {
        let url = build_announce_url(request)?;

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::Http(status.as_u16()));
        }

        let body = response.bytes().await?;
        let announce = parse_announce(&body)?;

        debug!(
            url = %request.announce,
            peers = announce.peers.len(),
            interval = announce.interval,
            "announce ok"
        );

        Ok(announce)
    }
}

pub(crate) fn build_announce_url(request: &AnnounceRequest) -> Result<String, TrackerError> {
    if !request.announce.starts_with("http://") && !request.announce.starts_with("https://") {
        return Err(TrackerError::InvalidUrl(request.announce.clone()));
    }

    let separator = if request.announce.contains('?') { '&' } else { '?' };

    let mut url = format!(
        "{}{}info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}",
        request.announce,
        separator,
        percent_encode(request.info_hash.as_bytes()),
        percent_encode(request.peer_id.as_bytes()),
        request.port,
        request.uploaded,
        request.downloaded,
        request.left,
    );

    if let Some(event) = request.event {
        url.push_str("&event=");
        url.push_str(event.as_str());
    }

    Ok(url)
}
