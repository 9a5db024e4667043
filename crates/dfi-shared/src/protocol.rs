use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::capabilities::{compress, decompress};
use crate::constants::MAX_MESSAGE_CONTENT_SIZE;
use crate::error::ProtocolError;

/// Every header a message can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    // Handshake
    Header,
    Capabilities,
    Cookie,
    Sig,
    Done,
    Terminate,

    // Replies
    Ok,
    No,

    // Posts
    Search,
    Recent,
    Popular,
    RequestHashList,
    RequestPiece,
    RequestAddPeer,
    Posts,
    HashList,
    Piece,

    // DHT
    DhtEntry,
    DhtEntries,
    DhtQuery,
    DhtAnnounce,
    DhtFindClosest,
}

impl Tag {
    pub const ALL: &'static [Tag] = &[
        Tag::Header,
        Tag::Capabilities,
        Tag::Cookie,
        Tag::Sig,
        Tag::Done,
        Tag::Terminate,
        Tag::Ok,
        Tag::No,
        Tag::Search,
        Tag::Recent,
        Tag::Popular,
        Tag::RequestHashList,
        Tag::RequestPiece,
        Tag::RequestAddPeer,
        Tag::Posts,
        Tag::HashList,
        Tag::Piece,
        Tag::DhtEntry,
        Tag::DhtEntries,
        Tag::DhtQuery,
        Tag::DhtAnnounce,
        Tag::DhtFindClosest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Header => "header",
            Tag::Capabilities => ":ap",
            Tag::Cookie => "cookie",
            Tag::Sig => "sig",
            Tag::Done => "done",
            Tag::Terminate => "term",
            Tag::Ok => "ok",
            Tag::No => "no",
            Tag::Search => "search",
            Tag::Recent => "recent",
            Tag::Popular => "popular",
            Tag::RequestHashList => "req.hashlist",
            Tag::RequestPiece => "req.piece",
            Tag::RequestAddPeer => "req.addpeer",
            Tag::Posts => "posts",
            Tag::HashList => "hashlist",
            Tag::Piece => "piece",
            Tag::DhtEntry => "dht.entry",
            Tag::DhtEntries => "dht.entries",
            Tag::DhtQuery => "dht.query",
            Tag::DhtAnnounce => "dht.announce",
            Tag::DhtFindClosest => "dht.findclosest",
        }
    }

    /// Whether a peer may send this tag as a request once the session is open.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Tag::Search
                | Tag::Recent
                | Tag::Popular
                | Tag::RequestHashList
                | Tag::RequestPiece
                | Tag::RequestAddPeer
                | Tag::DhtQuery
                | Tag::DhtAnnounce
                | Tag::DhtFindClosest
        )
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tag::ALL.iter().copied().find(|t| t.as_str() == s).ok_or(())
    }
}

/// The envelope every frame carries.
///
/// `content` is a MessagePack-encoded payload whose type is implied by the
/// header. `from` is filled in by the receiving session with the
/// authenticated sender and is never trusted from the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub header: String,
    #[serde(with = "serde_bytes", default)]
    pub content: Vec<u8>,
    #[serde(default)]
    pub from: Option<Address>,
    #[serde(default)]
    pub compression: String,
}

impl Message {
    pub fn new(tag: Tag) -> Self {
        Self {
            header: tag.as_str().to_string(),
            ..Default::default()
        }
    }

    pub fn with_content<T: Serialize + ?Sized>(tag: Tag, value: &T) -> Result<Self, ProtocolError> {
        let mut msg = Self::new(tag);
        msg.write(value)?;
        Ok(msg)
    }

    pub fn ok() -> Self {
        Self::new(Tag::Ok)
    }

    /// A negative reply carrying `reason`.
    pub fn no(reason: &str) -> Self {
        let mut msg = Self::new(Tag::No);
        // a short string always encodes
        let _ = msg.write(reason);
        msg
    }

    pub fn tag(&self) -> Option<Tag> {
        self.header.parse().ok()
    }

    pub fn is(&self, tag: Tag) -> bool {
        self.header == tag.as_str()
    }

    pub fn is_ok(&self) -> bool {
        self.is(Tag::Ok)
    }

    /// Encode `value` as the content.
    pub fn write<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ProtocolError> {
        let content = rmp_serde::to_vec_named(value)?;
        if content.len() > MAX_MESSAGE_CONTENT_SIZE {
            return Err(ProtocolError::ContentTooLarge {
                size: content.len(),
                max: MAX_MESSAGE_CONTENT_SIZE,
            });
        }
        self.content = content;
        Ok(())
    }

    /// Decode the content as `T`.
    pub fn read<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        if self.content.is_empty() {
            return Err(ProtocolError::EmptyContent);
        }
        if self.content.len() > MAX_MESSAGE_CONTENT_SIZE {
            return Err(ProtocolError::ContentTooLarge {
                size: self.content.len(),
                max: MAX_MESSAGE_CONTENT_SIZE,
            });
        }
        Ok(rmp_serde::from_slice(&self.content)?)
    }

    /// The reason text of a `no` reply, if it carries one.
    pub fn reason(&self) -> Option<String> {
        if !self.is(Tag::No) {
            return None;
        }
        self.read().ok()
    }

    /// Compress the content with `algorithm`. An empty algorithm is a no-op.
    pub fn compress(&mut self, algorithm: &str) -> Result<(), ProtocolError> {
        if algorithm.is_empty() || !self.compression.is_empty() {
            return Ok(());
        }
        self.content = compress(algorithm, &self.content)?;
        self.compression = algorithm.to_string();
        Ok(())
    }

    /// Undo [`Message::compress`] using the algorithm named in the envelope.
    pub fn decompress(&mut self) -> Result<(), ProtocolError> {
        if self.compression.is_empty() {
            return Ok(());
        }
        self.content = decompress(&self.compression, &self.content, MAX_MESSAGE_CONTENT_SIZE)?;
        self.compression.clear();
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub page: u32,
}

/// Ask for one piece of the collection owned by `address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPiece {
    pub address: Address,
    pub id: u32,
}

/// Sent as the content of `cookie` and `sig`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob(#[serde(with = "serde_bytes")] pub Vec<u8>);
