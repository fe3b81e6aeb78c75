use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use super::error::PeerError;
use super::message::{Handshake, Message, HANDSHAKE_LEN};
use super::peer_id::PeerId;

/// Framed access to a peer byte stream.
///
/// Generic over the stream so sessions run equally over TCP sockets and
/// in-memory duplex pipes. The transport itself has no deadlines; callers
/// wrap the futures in [`tokio::time::timeout`] where the protocol
/// demands one, which also keeps every operation cancellable.
pub struct PeerTransport<S> {
    stream: S,
    read_buf: BytesMut,
    max_frame_len: usize,
}

impl<S: AsyncRead + AsyncWrite + Unpin> PeerTransport<S> {
    pub fn new(stream: S, max_frame_len: usize) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(32 * 1024),
            max_frame_len,
        }
    }

    pub async fn send_handshake(&mut self, handshake: &Handshake) -> Result<(), PeerError> {
        self.stream.write_all(&handshake.encode()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn read_handshake(&mut self) -> Result<Handshake, PeerError> {
        while self.read_buf.len() < HANDSHAKE_LEN {
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(PeerError::ConnectionClosed);
            }
        }

        let data = self.read_buf.split_to(HANDSHAKE_LEN);
        Handshake::decode(&data)
    }

    /// Runs the initiator side of the handshake interlock.
    ///
    /// Sends our frame, reads the reply, and requires the remote
    /// info-hash to equal ours — and, when `expected_remote` is known,
    /// the remote peer-id to match it. On mismatch the stream is shut
    /// down and [`PeerError::HandshakeMismatch`] is returned.
    pub async fn initiate(
        &mut self,
        handshake: &Handshake,
        expected_remote: Option<PeerId>,
    ) -> Result<Handshake, PeerError> {
        self.send_handshake(handshake).await?;

        let remote = self.read_handshake().await?;

        let hash_ok = remote.info_hash == handshake.info_hash;
        let id_ok = expected_remote.map_or(true, |expected| remote.peer_id == expected);

        if !hash_ok || !id_ok {
            let _ = self.stream.shutdown().await;
            return Err(PeerError::HandshakeMismatch);
        }

        Ok(remote)
    }

    /// Tears the stream down; used when a responder rejects the
    /// info-hash before ever answering.
    pub async fn severe(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    pub async fn send_message(&mut self, message: &Message) -> Result<(), PeerError> {
        self.stream.write_all(&message.encode()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn read_message(&mut self) -> Result<Message, PeerError> {
        read_frame(&mut self.stream, &mut self.read_buf, self.max_frame_len).await
    }

    /// Splits into the session's reader/writer halves.
    pub fn into_split(self) -> (FrameReader<S>, FrameWriter<S>) {
        let (read, write) = tokio::io::split(self.stream);
        (
            FrameReader {
                stream: read,
                read_buf: self.read_buf,
                max_frame_len: self.max_frame_len,
            },
            FrameWriter { stream: write },
        )
    }
}

/// The read half of a split transport.
pub struct FrameReader<S> {
    stream: ReadHalf<S>,
    read_buf: BytesMut,
    max_frame_len: usize,
}

impl<S: AsyncRead + AsyncWrite> FrameReader<S> {
    pub async fn read_message(&mut self) -> Result<Message, PeerError> {
        read_frame(&mut self.stream, &mut self.read_buf, self.max_frame_len).await
    }
}

/// The write half of a split transport.
pub struct FrameWriter<S> {
    stream: WriteHalf<S>,
}

impl<S: AsyncRead + AsyncWrite> FrameWriter<S> {
    pub async fn send_message(&mut self, message: &Message) -> Result<(), PeerError> {
        self.stream.write_all(&message.encode()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

// Reads one whole length-prefixed frame into an owned buffer sized from
// the prefix, then hands it to the message codec.
async fn read_frame<R: AsyncRead + Unpin>(
    stream: &mut R,
    read_buf: &mut BytesMut,
    max_frame_len: usize,
) -> Result<Message, PeerError> {
    while read_buf.len() < 4 {
        let n = stream.read_buf(read_buf).await?;
        if n == 0 {
            return Err(PeerError::ConnectionClosed);
        }
    }

    let length =
        u32::from_be_bytes([read_buf[0], read_buf[1], read_buf[2], read_buf[3]]) as usize;

    if length > max_frame_len {
        return Err(PeerError::ProtocolViolation("oversize frame"));
    }

    let total = 4 + length;
    while read_buf.len() < total {
        let n = stream.read_buf(read_buf).await?;
        if n == 0 {
            // The peer hung up in the middle of a frame.
            return Err(PeerError::ShortPayload);
        }
    }

    Message::decode(read_buf.split_to(total).freeze())
}
