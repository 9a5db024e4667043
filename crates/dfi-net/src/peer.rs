use std::time::Duration;

use dfi_shared::capabilities::Capabilities;
use dfi_shared::constants::BUCKET_SIZE;
use dfi_shared::protocol::{RequestPiece, SearchQuery};
use dfi_shared::{Address, Entry, Identity, Message, MessageCollection, Piece, Post, Tag};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::PeerConfig;
use crate::connection::Connection;
use crate::error::{NetError, Result};
use crate::handshake::{self, HandshakeOutcome};

/// An authenticated outbound session with one remote node.
///
/// Requests are strictly sequential: each call sends one message and waits
/// for its reply before returning.
pub struct Peer<S = TcpStream> {
    conn: Connection<S>,
    entry: Entry,
    compression: String,
    request_timeout: Duration,
}

impl Peer<TcpStream> {
    /// Dial `socket_addr` and run the handshake.
    pub async fn connect(
        socket_addr: &str,
        identity: &Identity,
        local: &Entry,
        expected: Option<&Address>,
        config: &PeerConfig,
    ) -> Result<Self> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(socket_addr))
            .await
            .map_err(|_| NetError::Timeout("connect"))??;
        stream.set_nodelay(true)?;

        Self::over(stream, identity, local, &config.capabilities, expected, config).await
    }
}

impl<S> Peer<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Handshake over an already connected stream.
    pub async fn over(
        stream: S,
        identity: &Identity,
        local: &Entry,
        capabilities: &Capabilities,
        expected: Option<&Address>,
        config: &PeerConfig,
    ) -> Result<Self> {
        let mut conn = Connection::new(stream);
        let HandshakeOutcome {
            entry, compression, ..
        } = tokio::time::timeout(
            config.handshake_timeout,
            handshake::initiate(&mut conn, identity, local, capabilities, expected),
        )
        .await
        .map_err(|_| NetError::Timeout("handshake"))??;

        Ok(Self {
            conn,
            entry,
            compression,
            request_timeout: config.request_timeout,
        })
    }

    /// The remote's entry as presented during the handshake.
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn address(&self) -> &Address {
        &self.entry.address
    }

    pub fn compression(&self) -> &str {
        &self.compression
    }

    async fn request<T>(&mut self, tag: Tag, value: &T, expect: Tag) -> Result<Message>
    where
        T: Serialize + ?Sized,
    {
        let msg = Message::with_content(tag, value)?;
        self.conn.request(msg, expect, self.request_timeout).await
    }

    async fn entries(&mut self, tag: Tag, target: &Address) -> Result<Vec<Entry>> {
        let reply = self.request(tag, target, Tag::DhtEntries).await?;
        let mut entries: Vec<Entry> = reply.read()?;
        entries.truncate(BUCKET_SIZE);

        // anything unverifiable is dropped here, never stored
        entries.retain(|e| match e.verify() {
            Ok(()) => true,
            Err(err) => {
                debug!(peer = %self.entry.address.short(), "dropping invalid entry: {err}");
                false
            }
        });
        Ok(entries)
    }

    /// The remote's entry for `target`, or its closest known entries when it
    /// has none.
    pub async fn query(&mut self, target: &Address) -> Result<Vec<Entry>> {
        self.entries(Tag::DhtQuery, target).await
    }

    pub async fn find_closest(&mut self, target: &Address) -> Result<Vec<Entry>> {
        self.entries(Tag::DhtFindClosest, target).await
    }

    pub async fn announce(&mut self, entry: &Entry) -> Result<()> {
        self.request(Tag::DhtAnnounce, entry, Tag::Ok).await?;
        Ok(())
    }

    pub async fn search(&mut self, query: &str, page: u32) -> Result<Vec<Post>> {
        let query = SearchQuery {
            query: query.to_string(),
            page,
        };
        Ok(self.request(Tag::Search, &query, Tag::Posts).await?.read()?)
    }

    pub async fn recent(&mut self, page: u32) -> Result<Vec<Post>> {
        Ok(self.request(Tag::Recent, &page, Tag::Posts).await?.read()?)
    }

    pub async fn popular(&mut self, page: u32) -> Result<Vec<Post>> {
        Ok(self.request(Tag::Popular, &page, Tag::Posts).await?.read()?)
    }

    pub async fn request_hash_list(&mut self, address: &Address) -> Result<MessageCollection> {
        Ok(self
            .request(Tag::RequestHashList, address, Tag::HashList)
            .await?
            .read()?)
    }

    pub async fn request_piece(&mut self, address: &Address, id: u32) -> Result<Piece> {
        let req = RequestPiece {
            address: address.clone(),
            id,
        };
        Ok(self.request(Tag::RequestPiece, &req, Tag::Piece).await?.read()?)
    }

    /// Tell the remote we now seed `address`.
    pub async fn add_peer(&mut self, address: &Address) -> Result<()> {
        self.request(Tag::RequestAddPeer, address, Tag::Ok).await?;
        Ok(())
    }

    pub async fn close(mut self) {
        let _ = self.conn.send(Message::new(Tag::Terminate)).await;
        self.conn.shutdown().await;
    }
}
