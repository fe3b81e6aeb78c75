use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::metainfo::InfoHash;

use super::bitfield::Bitfield;
use super::error::PeerError;
use super::message::{BlockRequest, Message, MAX_BLOCK_LEN};
use super::peer_id::PeerId;
use super::transport::{FrameReader, FrameWriter, PeerTransport};

/// Identifies one live session: who, about which torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub peer_id: PeerId,
    pub info_hash: InfoHash,
}

/// The four flow-control booleans both endpoints track.
///
/// `peer_*` describes the remote's view of us as the remote reported it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChokeState {
    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_choking: bool,
    pub peer_interested: bool,
}

impl Default for ChokeState {
    fn default() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}

/// What a session reports to its consumer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    PeerChoked(bool),
    PeerInterested(bool),
    Have(u32),
    Bitfield(Bitfield),
    Request(BlockRequest),
    Cancel(BlockRequest),
    Block { index: u32, begin: u32, data: Bytes },
    /// Terminal; carries the error that killed the session, if any.
    Closed(Option<String>),
}

/// A session event tagged with the session it came from.
#[derive(Debug, Clone)]
pub struct PeerEvent {
    pub key: SessionKey,
    pub event: SessionEvent,
}

enum Command {
    Send(Message),
    Close,
}

/// Per-session knobs and identity.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub key: SessionKey,
    /// Piece count when the torrent geometry is known; otherwise derived
    /// from the remote bitfield.
    pub num_pieces: Option<usize>,
    pub keep_alive_interval: Duration,
    pub idle_timeout: Duration,
}

/// Handle to a running session.
///
/// Cheap to clone; all clones address the same driver task. Dropping
/// every clone closes the session.
#[derive(Clone)]
pub struct SessionHandle {
    key: SessionKey,
    commands: mpsc::Sender<Command>,
}

impl SessionHandle {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Queues a message for the writer; the driver flips our own
    /// choke/interest flags to match what is sent.
    pub async fn send(&self, message: Message) -> Result<(), PeerError> {
        self.commands
            .send(Command::Send(message))
            .await
            .map_err(|_| PeerError::ConnectionClosed)
    }

    pub async fn set_choking(&self, choking: bool) -> Result<(), PeerError> {
        let msg = if choking { Message::Choke } else { Message::Unchoke };
        self.send(msg).await
    }

    pub async fn set_interested(&self, interested: bool) -> Result<(), PeerError> {
        let msg = if interested {
            Message::Interested
        } else {
            Message::NotInterested
        };
        self.send(msg).await
    }

    pub async fn request(&self, block: BlockRequest) -> Result<(), PeerError> {
        self.send(Message::Request {
            index: block.index,
            begin: block.begin,
            length: block.length,
        })
        .await
    }

    /// Asks the driver to tear the session down.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close).await;
    }

    /// Whether the driver is still alive.
    pub fn is_open(&self) -> bool {
        !self.commands.is_closed()
    }
}

/// Spawns the task pair for a handshaken connection and returns the
/// handle.
///
/// One task reads and decodes frames, the other owns the state, the
/// write half and the timers. They share nothing; frames, commands and
/// events all travel over bounded channels.
pub fn spawn<S>(
    transport: PeerTransport<S>,
    params: SessionParams,
    events: mpsc::Sender<PeerEvent>,
    closed: mpsc::Sender<SessionKey>,
) -> SessionHandle
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
{
    let (reader, writer) = transport.into_split();
    let (frame_tx, frame_rx) = mpsc::channel(32);
    let (cmd_tx, cmd_rx) = mpsc::channel(32);

    let reader_task = tokio::spawn(run_reader(reader, frame_tx));

    let driver = Driver {
        key: params.key,
        state: ChokeState::default(),
        availability: params.num_pieces.map(Bitfield::new),
        known_pieces: params.num_pieces,
        saw_non_keepalive: false,
        keep_alive_interval: params.keep_alive_interval,
        idle_timeout: params.idle_timeout,
        writer,
        frames: frame_rx,
        commands: cmd_rx,
        events,
        closed,
    };
    tokio::spawn(driver.run(reader_task));

    SessionHandle {
        key: params.key,
        commands: cmd_tx,
    }
}

async fn run_reader<S>(
    mut reader: FrameReader<S>,
    frames: mpsc::Sender<Result<Message, PeerError>>,
) where
    S: AsyncRead + AsyncWrite,
{
    loop {
        let result = reader.read_message().await;
        let failed = result.is_err();
        if frames.send(result).await.is_err() || failed {
            return;
        }
    }
}

struct Driver<S> {
    key: SessionKey,
    state: ChokeState,
    availability: Option<Bitfield>,
    known_pieces: Option<usize>,
    saw_non_keepalive: bool,
    keep_alive_interval: Duration,
    idle_timeout: Duration,
    writer: FrameWriter<S>,
    frames: mpsc::Receiver<Result<Message, PeerError>>,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<PeerEvent>,
    closed: mpsc::Sender<SessionKey>,
}

impl<S: AsyncRead + AsyncWrite> Driver<S> {
    async fn run(mut self, reader_task: tokio::task::JoinHandle<()>) {
        let tick_period = (self.keep_alive_interval.min(self.idle_timeout) / 4)
            .max(Duration::from_millis(25));
        let mut tick = tokio::time::interval(tick_period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut last_inbound = Instant::now();
        let mut last_outbound = Instant::now();

        let outcome: Option<PeerError> = loop {
            tokio::select! {
                frame = self.frames.recv() => match frame {
                    Some(Ok(message)) => {
                        last_inbound = Instant::now();
                        match self.on_message(message).await {
                            Ok(()) => {}
                            Err(err) => break Some(err),
                        }
                    }
                    Some(Err(err)) => break Some(err),
                    None => break None,
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send(message)) => {
                        self.apply_send_intent(&message);
                        if let Err(err) = self.writer.send_message(&message).await {
                            break Some(err);
                        }
                        last_outbound = Instant::now();
                    }
                    Some(Command::Close) | None => break None,
                },
                _ = tick.tick() => {
                    if last_inbound.elapsed() >= self.idle_timeout {
                        break Some(PeerError::Timeout("idle"));
                    }
                    if last_outbound.elapsed() >= self.keep_alive_interval {
                        if let Err(err) = self.writer.send_message(&Message::KeepAlive).await {
                            break Some(err);
                        }
                        last_outbound = Instant::now();
                    }
                }
            }
        };

        reader_task.abort();
        self.writer.shutdown().await;

        if let Some(err) = &outcome {
            debug!(peer = %self.key.peer_id, error = %err, "session ended");
        } else {
            trace!(peer = %self.key.peer_id, "session closed");
        }

        let _ = self
            .events
            .send(PeerEvent {
                key: self.key,
                event: SessionEvent::Closed(outcome.map(|e| e.to_string())),
            })
            .await;
        let _ = self.closed.send(self.key).await;
    }

    async fn on_message(&mut self, message: Message) -> Result<(), PeerError> {
        // Keep-alives refresh the idle deadline and consume nothing else,
        // including the bitfield-must-be-first slot.
        if matches!(message, Message::KeepAlive) {
            return Ok(());
        }

        let first = !self.saw_non_keepalive;
        self.saw_non_keepalive = true;

        match message {
            Message::KeepAlive => {}
            Message::Choke => {
                self.state.peer_choking = true;
                self.emit(SessionEvent::PeerChoked(true)).await;
            }
            Message::Unchoke => {
                self.state.peer_choking = false;
                self.emit(SessionEvent::PeerChoked(false)).await;
            }
            Message::Interested => {
                self.state.peer_interested = true;
                self.emit(SessionEvent::PeerInterested(true)).await;
            }
            Message::NotInterested => {
                self.state.peer_interested = false;
                self.emit(SessionEvent::PeerInterested(false)).await;
            }
            Message::Have { piece } => {
                self.on_have(piece)?;
                self.emit(SessionEvent::Have(piece)).await;
            }
            Message::Bitfield(bits) => {
                if !first {
                    return Err(PeerError::ProtocolViolation("bitfield after first message"));
                }
                let bitfield = self.on_bitfield(&bits)?;
                self.emit(SessionEvent::Bitfield(bitfield)).await;
            }
            Message::Request {
                index,
                begin,
                length,
            } => {
                if length > MAX_BLOCK_LEN {
                    return Err(PeerError::ProtocolViolation("oversize block"));
                }
                if self.state.am_choking {
                    // Requests from a peer we are choking are not serviced.
                    debug!(peer = %self.key.peer_id, index, "request while choked, dropping");
                    return Ok(());
                }
                self.emit(SessionEvent::Request(BlockRequest {
                    index,
                    begin,
                    length,
                }))
                .await;
            }
            Message::Cancel {
                index,
                begin,
                length,
            } => {
                // Same layout, same bound as request.
                if length > MAX_BLOCK_LEN {
                    return Err(PeerError::ProtocolViolation("oversize block"));
                }
                if self.state.am_choking {
                    return Ok(());
                }
                self.emit(SessionEvent::Cancel(BlockRequest {
                    index,
                    begin,
                    length,
                }))
                .await;
            }
            Message::Piece { index, begin, data } => {
                self.emit(SessionEvent::Block { index, begin, data }).await;
            }
        }

        Ok(())
    }

    fn on_have(&mut self, piece: u32) -> Result<(), PeerError> {
        let index = piece as usize;

        if let Some(count) = self.known_pieces {
            if index >= count {
                return Err(PeerError::ProtocolViolation("have index out of range"));
            }
        }

        let bitfield = self
            .availability
            .get_or_insert_with(|| Bitfield::new(index + 1));
        bitfield.grow(index + 1);
        bitfield.set(index);
        Ok(())
    }

    fn on_bitfield(&mut self, bits: &Bytes) -> Result<Bitfield, PeerError> {
        let bitfield = match self.known_pieces {
            Some(count) => {
                if bits.len() != Bitfield::wire_len(count) {
                    return Err(PeerError::ProtocolViolation("bad bitfield length"));
                }
                Bitfield::from_bytes(bits, count)
            }
            None => Bitfield::from_raw(bits),
        };

        self.availability = Some(bitfield.clone());
        Ok(bitfield)
    }

    fn apply_send_intent(&mut self, message: &Message) {
        match message {
            Message::Choke => self.state.am_choking = true,
            Message::Unchoke => self.state.am_choking = false,
            Message::Interested => self.state.am_interested = true,
            Message::NotInterested => self.state.am_interested = false,
            _ => {}
        }
    }

    async fn emit(&self, event: SessionEvent) {
        // A consumer that went away is not a session error.
        let _ = self
            .events
            .send(PeerEvent {
                key: self.key,
                event,
            })
            .await;
    }
}
