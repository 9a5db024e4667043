use std::time::Duration;

use dfi_shared::constants::{PROTOCOL_MAGIC, PROTOCOL_VERSION};
use dfi_shared::{Message, Tag};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{NetError, Result};
use crate::framing::{read_frame, write_frame, MAX_FRAME_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    HandshakeSent,
    CapabilitiesExchanged,
    Open,
    Closed,
}

/// A framed message stream over any byte transport.
///
/// Compression is only applied to outgoing messages once the session is
/// open; incoming messages are inflated according to their own envelope.
pub struct Connection<S> {
    stream: S,
    state: SessionState,
    compression: String,
    max_frame: usize,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            state: SessionState::Unauthenticated,
            compression: String::new(),
            max_frame: MAX_FRAME_SIZE,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub fn compression(&self) -> &str {
        &self.compression
    }

    /// Move to [`SessionState::Open`] using the negotiated algorithm.
    pub(crate) fn open(&mut self, compression: String) {
        self.compression = compression;
        self.state = SessionState::Open;
    }

    pub(crate) fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub async fn write_preamble(&mut self) -> Result<()> {
        let mut preamble = [0u8; 4];
        preamble[..2].copy_from_slice(&PROTOCOL_MAGIC.to_be_bytes());
        preamble[2..].copy_from_slice(&PROTOCOL_VERSION.to_be_bytes());
        self.stream.write_all(&preamble).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn read_preamble(&mut self) -> Result<()> {
        let mut preamble = [0u8; 4];
        match self.stream.read_exact(&mut preamble).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(NetError::Closed)
            }
            Err(e) => return Err(e.into()),
        }

        let magic = i16::from_be_bytes([preamble[0], preamble[1]]);
        let version = i16::from_be_bytes([preamble[2], preamble[3]]);
        if magic != PROTOCOL_MAGIC {
            return Err(NetError::Handshake(format!("bad magic {magic:#06x}")));
        }
        if version != PROTOCOL_VERSION {
            return Err(NetError::Handshake(format!(
                "unsupported protocol version {version}"
            )));
        }
        Ok(())
    }

    pub async fn send(&mut self, mut msg: Message) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(NetError::Closed);
        }
        if self.state == SessionState::Open {
            msg.compress(&self.compression)?;
        }
        // the receiver fills this in itself
        msg.from = None;

        let bytes = msg.to_bytes()?;
        write_frame(&mut self.stream, &bytes).await
    }

    /// Read one raw frame. Errors here leave the stream unusable.
    pub async fn recv_frame(&mut self) -> Result<Vec<u8>> {
        if self.state == SessionState::Closed {
            return Err(NetError::Closed);
        }
        read_frame(&mut self.stream, self.max_frame).await
    }

    /// Decode a frame read by [`Connection::recv_frame`].
    pub fn decode(frame: &[u8]) -> Result<Message> {
        let mut msg = Message::from_bytes(frame)?;
        msg.decompress()?;
        Ok(msg)
    }

    pub async fn recv(&mut self) -> Result<Message> {
        let frame = self.recv_frame().await?;
        Self::decode(&frame)
    }

    /// Receive a message that must carry `tag`. A `no` reply becomes
    /// [`NetError::Rejected`].
    pub async fn recv_tag(&mut self, tag: Tag) -> Result<Message> {
        let msg = self.recv().await?;
        if msg.is(tag) {
            return Ok(msg);
        }
        if msg.is(Tag::No) {
            return Err(NetError::Rejected(msg.reason().unwrap_or_default()));
        }
        Err(NetError::UnexpectedResponse {
            expected: tag,
            got: msg.header,
        })
    }

    /// Send `msg` and wait for the reply tagged `expect`.
    pub async fn request(&mut self, msg: Message, expect: Tag, timeout: Duration) -> Result<Message> {
        let exchange = async {
            self.send(msg).await?;
            self.recv_tag(expect).await
        };
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| NetError::Timeout("request"))?
    }

    pub async fn shutdown(&mut self) {
        self.state = SessionState::Closed;
        let _ = self.stream.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfi_shared::protocol::SearchQuery;
    use dfi_shared::Post;

    fn pair() -> (Connection<tokio::io::DuplexStream>, Connection<tokio::io::DuplexStream>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (Connection::new(a), Connection::new(b))
    }

    #[tokio::test]
    async fn preamble_checked() {
        let (mut a, mut b) = pair();
        a.write_preamble().await.unwrap();
        b.read_preamble().await.unwrap();

        let (mut raw, other) = tokio::io::duplex(64);
        let mut b = Connection::new(other);
        raw.write_all(&[0x12, 0x34, 0, 0]).await.unwrap();
        assert!(matches!(b.read_preamble().await, Err(NetError::Handshake(_))));
    }

    #[tokio::test]
    async fn open_session_compresses() {
        let (mut a, mut b) = pair();
        a.open("gzip".into());
        b.open("gzip".into());

        let posts: Vec<Post> = (1..=50)
            .map(|id| Post {
                id,
                title: "repeated title".into(),
                ..Default::default()
            })
            .collect();
        a.send(Message::with_content(Tag::Posts, &posts).unwrap())
            .await
            .unwrap();

        let frame = b.recv_frame().await.unwrap();
        let raw = Message::from_bytes(&frame).unwrap();
        assert_eq!(raw.compression, "gzip");

        let msg = Connection::<tokio::io::DuplexStream>::decode(&frame).unwrap();
        assert_eq!(msg.read::<Vec<Post>>().unwrap(), posts);
    }

    #[tokio::test]
    async fn rejection_surfaces_reason() {
        let (mut a, mut b) = pair();
        b.send(Message::no("go away")).await.unwrap();
        match a.recv_tag(Tag::Posts).await {
            Err(NetError::Rejected(reason)) => assert_eq!(reason, "go away"),
            other => panic!("unexpected {other:?}"),
        }

        b.send(Message::ok()).await.unwrap();
        assert!(matches!(
            a.recv_tag(Tag::Posts).await,
            Err(NetError::UnexpectedResponse { expected: Tag::Posts, .. })
        ));
    }

    #[tokio::test]
    async fn request_times_out_without_reply() {
        let (mut a, _b) = pair();
        let query = SearchQuery {
            query: "x".into(),
            page: 0,
        };
        let msg = Message::with_content(Tag::Search, &query).unwrap();
        assert!(matches!(
            a.request(msg, Tag::Posts, Duration::from_millis(20)).await,
            Err(NetError::Timeout(_))
        ));
    }
}
