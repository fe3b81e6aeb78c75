//! Connection manager
//!
//! Owns the live-sessions table keyed by (remote peer-id, info-hash),
//! arbitrates dialling against accepting, and keeps the durable peer and
//! connection records in step with what happens on the wire.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::metainfo::{InfoHash, Metainfo};
use crate::peer::{
    self, Handshake, PeerError, PeerEvent, PeerId, PeerTransport, SessionHandle, SessionKey,
    SessionParams,
};
use crate::store::{
    ConnectionRecord, ConnectionRepository, PeerRecord, PeerRepository, StoreError, TorrentRecord,
    TorrentRepository,
};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The dial or the TCP connect deadline failed.
    #[error("peer unreachable")]
    PeerUnreachable,

    /// A session already exists under this key. Callers going through
    /// [`ConnectionManager::get_or_connect`] never see this; it leaks
    /// only out of the low-level registration path.
    #[error("duplicate session for peer {}", .0.peer_id)]
    DuplicateSession(SessionKey),
}

enum Slot {
    /// A dial for this key is in flight; wait and adopt its result.
    Pending(Arc<Notify>),
    Live(SessionHandle),
}

/// De-duplicates peer sessions and drives their lifecycle.
///
/// Cheap to clone. At most one live session exists per
/// (remote peer-id, info-hash) at any instant; concurrent dials for one
/// key collapse onto a single winner.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    local_id: PeerId,
    config: Config,
    sessions: Arc<DashMap<SessionKey, Slot>>,
    /// In-flight dials to peers whose protocol id is still unknown,
    /// keyed by the peer's durable row id.
    pending_dials: DashMap<(i64, InfoHash), Arc<Notify>>,
    torrents: Arc<dyn TorrentRepository>,
    peers: Arc<dyn PeerRepository>,
    connections: Arc<dyn ConnectionRepository>,
    events: mpsc::Sender<PeerEvent>,
    closed_tx: mpsc::Sender<SessionKey>,
}

impl ConnectionManager {
    /// Builds a manager and starts its teardown reaper.
    ///
    /// Session events fan in on `events`; the caller keeps the receiver.
    pub fn new(
        local_id: PeerId,
        config: Config,
        torrents: Arc<dyn TorrentRepository>,
        peers: Arc<dyn PeerRepository>,
        connections: Arc<dyn ConnectionRepository>,
        events: mpsc::Sender<PeerEvent>,
    ) -> Self {
        let sessions = Arc::new(DashMap::new());
        let (closed_tx, closed_rx) = mpsc::channel(64);

        tokio::spawn(run_reaper(
            Arc::clone(&sessions),
            Arc::clone(&torrents),
            Arc::clone(&peers),
            Arc::clone(&connections),
            closed_rx,
        ));

        Self {
            inner: Arc::new(Inner {
                local_id,
                config,
                sessions,
                pending_dials: DashMap::new(),
                torrents,
                peers,
                connections,
                events,
                closed_tx,
            }),
        }
    }

    /// Number of live sessions right now.
    pub fn live_sessions(&self) -> usize {
        self.inner
            .sessions
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Live(h) if h.is_open()))
            .count()
    }

    /// Returns the existing session for (peer, info-hash) or dials one.
    ///
    /// Concurrent callers for the same key serialise: exactly one dial
    /// goes out, the rest adopt the winner's session. The peer record
    /// must already be persisted (its `id` keys the durable connection
    /// row).
    pub async fn get_or_connect(
        &self,
        peer: &PeerRecord,
        info_hash: InfoHash,
    ) -> Result<SessionHandle, ManagerError> {
        match peer.protocol_id {
            Some(remote_id) => {
                let key = SessionKey {
                    peer_id: remote_id,
                    info_hash,
                };
                self.get_or_connect_keyed(peer, key).await
            }
            None => self.connect_unknown_id(peer, info_hash).await,
        }
    }

    async fn get_or_connect_keyed(
        &self,
        peer: &PeerRecord,
        key: SessionKey,
    ) -> Result<SessionHandle, ManagerError> {
        enum Claim {
            Existing(SessionHandle),
            Wait(Arc<Notify>),
            Won(Arc<Notify>),
        }

        let notify = loop {
            // The entry guard is a shard lock: taken only for these O(1)
            // inspections, never held across an await.
            let claim = match self.inner.sessions.entry(key) {
                Entry::Occupied(entry) => {
                    if matches!(entry.get(), Slot::Live(h) if !h.is_open()) {
                        entry.remove();
                        None
                    } else {
                        match entry.get() {
                            Slot::Live(handle) => Some(Claim::Existing(handle.clone())),
                            Slot::Pending(notify) => Some(Claim::Wait(Arc::clone(notify))),
                        }
                    }
                }
                Entry::Vacant(vacant) => {
                    let notify = Arc::new(Notify::new());
                    vacant.insert(Slot::Pending(Arc::clone(&notify)));
                    Some(Claim::Won(notify))
                }
            };

            match claim {
                None => continue,
                Some(Claim::Existing(handle)) => {
                    debug!(peer = %key.peer_id, "adopting existing session");
                    return Ok(handle);
                }
                Some(Claim::Wait(notify)) => {
                    // Re-check after a wakeup or a short while; the
                    // timeout covers a notify that fired before we
                    // started listening.
                    let _ = timeout(Duration::from_millis(100), notify.notified()).await;
                    continue;
                }
                Some(Claim::Won(notify)) => break notify,
            }
        };

        let result = self.dial_and_spawn(peer, key).await;

        match result {
            Ok(handle) => {
                self.inner.sessions.insert(key, Slot::Live(handle.clone()));
                notify.notify_waiters();
                Ok(handle)
            }
            Err(err) => {
                self.inner.sessions.remove(&key);
                notify.notify_waiters();
                Err(err)
            }
        }
    }

    async fn connect_unknown_id(
        &self,
        peer: &PeerRecord,
        info_hash: InfoHash,
    ) -> Result<SessionHandle, ManagerError> {
        let dial_key = (peer.id, info_hash);

        let notify = loop {
            // A finished dial for this peer has taught the store its
            // protocol id; from here the keyed path de-duplicates.
            if let Some(remote_id) = self.stored_protocol_id(peer).await? {
                let key = SessionKey {
                    peer_id: remote_id,
                    info_hash,
                };
                return self.get_or_connect_keyed(peer, key).await;
            }

            enum Claim {
                Wait(Arc<Notify>),
                Won(Arc<Notify>),
            }

            let claim = match self.inner.pending_dials.entry(dial_key) {
                Entry::Occupied(entry) => Claim::Wait(Arc::clone(entry.get())),
                Entry::Vacant(vacant) => {
                    let notify = Arc::new(Notify::new());
                    vacant.insert(Arc::clone(&notify));
                    Claim::Won(notify)
                }
            };

            match claim {
                Claim::Wait(notify) => {
                    let _ = timeout(Duration::from_millis(100), notify.notified()).await;
                    continue;
                }
                Claim::Won(notify) => break notify,
            }
        };

        let result = self.dial_unknown(peer, info_hash).await;

        self.inner.pending_dials.remove(&dial_key);
        notify.notify_waiters();
        result
    }

    async fn dial_unknown(
        &self,
        peer: &PeerRecord,
        info_hash: InfoHash,
    ) -> Result<SessionHandle, ManagerError> {
        let (key, transport) = self.establish(peer, info_hash, None).await?;

        // Now that the handshake taught us the remote id, the session may
        // turn out to already exist.
        if let Some(existing) = self.lookup_live(&key) {
            return Ok(existing);
        }

        self.persist_initial_connection(peer.torrent_id, peer.id)
            .await?;

        let num_pieces = self.torrent_piece_count(&info_hash).await?;
        let handle = self.spawn_session(key, transport, num_pieces);
        let registered = self.register(key, handle.clone());

        // The learned id reaches the store only after the session is in
        // the table: a waiter that reads the id must find the session.
        let mut updated = peer.clone();
        updated.protocol_id = Some(key.peer_id);
        self.inner.peers.update(&updated).await?;

        match registered {
            Ok(()) => Ok(handle),
            Err(_) => {
                // Lost a race against another establishment; adopt the
                // winner and fold our fresh session.
                handle.close().await;
                self.lookup_live(&key)
                    .ok_or(ManagerError::DuplicateSession(key))
            }
        }
    }

    // What the store currently knows as this peer row's protocol id.
    async fn stored_protocol_id(&self, peer: &PeerRecord) -> Result<Option<PeerId>, ManagerError> {
        Ok(self
            .inner
            .peers
            .get_by_torrent(peer.torrent_id)
            .await?
            .into_iter()
            .find(|row| row.id == peer.id)
            .and_then(|row| row.protocol_id))
    }

    async fn dial_and_spawn(
        &self,
        peer: &PeerRecord,
        key: SessionKey,
    ) -> Result<SessionHandle, ManagerError> {
        let (learned_key, transport) = self
            .establish(peer, key.info_hash, Some(key.peer_id))
            .await?;

        self.persist_initial_connection(peer.torrent_id, peer.id)
            .await?;

        let num_pieces = self.torrent_piece_count(&key.info_hash).await?;

        info!(peer = %learned_key.peer_id, addr = %peer.addr, "session established");
        Ok(self.spawn_session(learned_key, transport, num_pieces))
    }

    // TCP connect plus initiator handshake, both under their deadlines.
    async fn establish(
        &self,
        peer: &PeerRecord,
        info_hash: InfoHash,
        expected: Option<PeerId>,
    ) -> Result<(SessionKey, PeerTransport<TcpStream>), ManagerError> {
        let config = &self.inner.config;

        let stream = timeout(config.dial_timeout, TcpStream::connect(peer.addr))
            .await
            .map_err(|_| ManagerError::PeerUnreachable)?
            .map_err(|_| ManagerError::PeerUnreachable)?;

        let mut transport = PeerTransport::new(stream, config.max_frame_len);
        let own = Handshake::new(info_hash, self.inner.local_id);

        let remote = timeout(config.handshake_timeout, transport.initiate(&own, expected))
            .await
            .map_err(|_| PeerError::Timeout("handshake"))??;

        Ok((
            SessionKey {
                peer_id: remote.peer_id,
                info_hash,
            },
            transport,
        ))
    }

    /// Handles one inbound connection: responder handshake, torrent
    /// lookup, peer and connection upserts, table insertion.
    ///
    /// Generic over the stream so it runs over test pipes as well as
    /// accepted sockets.
    pub async fn accept_peer<S>(
        &self,
        stream: S,
        addr: std::net::SocketAddr,
    ) -> Result<SessionHandle, ManagerError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
    {
        let config = &self.inner.config;
        let mut transport = PeerTransport::new(stream, config.max_frame_len);

        let remote = timeout(config.handshake_timeout, transport.read_handshake())
            .await
            .map_err(|_| PeerError::Timeout("handshake"))??;

        let torrent = self
            .inner
            .torrents
            .get_by_info_hash(&remote.info_hash)
            .await?;
        let torrent = match torrent {
            Some(torrent) => torrent,
            None => {
                warn!(peer = %remote.peer_id, hash = %remote.info_hash, "unknown info hash, severing");
                transport.severe().await;
                return Err(PeerError::UnknownInfoHash.into());
            }
        };

        let own = Handshake::new(remote.info_hash, self.inner.local_id);
        timeout(config.handshake_timeout, transport.send_handshake(&own))
            .await
            .map_err(|_| PeerError::Timeout("handshake"))??;

        let peer_record = self.upsert_peer(torrent.id, remote.peer_id, addr).await?;
        self.persist_initial_connection(torrent.id, peer_record.id)
            .await?;

        let key = SessionKey {
            peer_id: remote.peer_id,
            info_hash: remote.info_hash,
        };

        info!(peer = %key.peer_id, %addr, "inbound session established");

        let handle = self.spawn_session(key, transport, record_piece_count(&torrent));
        match self.register(key, handle.clone()) {
            Ok(()) => Ok(handle),
            Err(err) => {
                handle.close().await;
                Err(err)
            }
        }
    }

    /// Accept loop for a listen socket; runs until the listener dies.
    pub async fn run_listener(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let manager = self.clone();
                    tokio::spawn(async move {
                        if let Err(err) = manager.accept_peer(stream, addr).await {
                            debug!(%addr, error = %err, "inbound connection rejected");
                        }
                    });
                }
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    return;
                }
            }
        }
    }

    fn spawn_session<S>(
        &self,
        key: SessionKey,
        transport: PeerTransport<S>,
        num_pieces: Option<usize>,
    ) -> SessionHandle
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
    {
        let config = &self.inner.config;
        peer::spawn(
            transport,
            SessionParams {
                key,
                num_pieces,
                keep_alive_interval: config.keep_alive_interval,
                idle_timeout: config.idle_timeout,
            },
            self.inner.events.clone(),
            self.inner.closed_tx.clone(),
        )
    }

    // Piece count of an owned torrent, for the session's have/bitfield
    // range checks.
    async fn torrent_piece_count(
        &self,
        info_hash: &InfoHash,
    ) -> Result<Option<usize>, ManagerError> {
        let torrent = self.inner.torrents.get_by_info_hash(info_hash).await?;
        Ok(torrent.as_ref().and_then(record_piece_count))
    }

    fn lookup_live(&self, key: &SessionKey) -> Option<SessionHandle> {
        match self.inner.sessions.get(key) {
            Some(slot) => match slot.value() {
                Slot::Live(handle) if handle.is_open() => Some(handle.clone()),
                _ => None,
            },
            None => None,
        }
    }

    // Exactly-one-per-key is enforced here.
    fn register(&self, key: SessionKey, handle: SessionHandle) -> Result<(), ManagerError> {
        match self.inner.sessions.entry(key) {
            Entry::Occupied(mut entry) => {
                if matches!(entry.get(), Slot::Live(h) if h.is_open()) {
                    return Err(ManagerError::DuplicateSession(key));
                }
                entry.insert(Slot::Live(handle));
                Ok(())
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Live(handle));
                Ok(())
            }
        }
    }

    async fn upsert_peer(
        &self,
        torrent_id: i64,
        protocol_id: PeerId,
        addr: std::net::SocketAddr,
    ) -> Result<PeerRecord, ManagerError> {
        let existing = self
            .inner
            .peers
            .get_by_torrent_and_peer_id(torrent_id, &protocol_id)
            .await?;

        match existing {
            Some(mut record) => {
                if record.addr != addr {
                    record.addr = addr;
                    self.inner.peers.update(&record).await?;
                }
                Ok(record)
            }
            None => {
                // The remote knows us but we have never seen it;
                // register it.
                let mut record = PeerRecord {
                    id: 0,
                    torrent_id,
                    protocol_id: Some(protocol_id),
                    addr,
                    reachable: true,
                };
                self.inner.peers.create(&mut record).await?;
                Ok(record)
            }
        }
    }

    async fn persist_initial_connection(
        &self,
        torrent_id: i64,
        remote_peer_id: i64,
    ) -> Result<(), ManagerError> {
        self.inner
            .connections
            .upsert(&ConnectionRecord::initial(torrent_id, remote_peer_id))
            .await?;
        Ok(())
    }
}

fn record_piece_count(torrent: &TorrentRecord) -> Option<usize> {
    if torrent.raw_metainfo.is_empty() {
        return None;
    }
    match Metainfo::from_bytes(&torrent.raw_metainfo) {
        Ok(metainfo) => Some(metainfo.num_pieces()),
        Err(err) => {
            debug!(torrent = torrent.id, error = %err, "stored metainfo unparsable");
            None
        }
    }
}

// Removes ended sessions from the table and stamps the durable
// connection record with a terminal last-activity time.
async fn run_reaper(
    sessions: Arc<DashMap<SessionKey, Slot>>,
    torrents: Arc<dyn TorrentRepository>,
    peers: Arc<dyn PeerRepository>,
    connections: Arc<dyn ConnectionRepository>,
    mut closed_rx: mpsc::Receiver<SessionKey>,
) {
    while let Some(key) = closed_rx.recv().await {
        sessions.remove(&key);
        debug!(peer = %key.peer_id, "session reaped");

        let result = record_teardown(&*torrents, &*peers, &*connections, &key).await;
        if let Err(err) = result {
            warn!(error = %err, "teardown bookkeeping failed");
        }
    }
}

async fn record_teardown(
    torrents: &dyn TorrentRepository,
    peers: &dyn PeerRepository,
    connections: &dyn ConnectionRepository,
    key: &SessionKey,
) -> Result<(), ManagerError> {
    let Some(torrent) = torrents.get_by_info_hash(&key.info_hash).await? else {
        return Ok(());
    };
    let Some(peer) = peers
        .get_by_torrent_and_peer_id(torrent.id, &key.peer_id)
        .await?
    else {
        return Ok(());
    };

    let mut record = connections
        .get_by_torrent(torrent.id)
        .await?
        .into_iter()
        .find(|row| row.remote_peer_id == peer.id)
        .unwrap_or_else(|| ConnectionRecord::initial(torrent.id, peer.id));

    record.last_activity = SystemTime::now();
    connections.upsert(&record).await?;
    Ok(())
}
