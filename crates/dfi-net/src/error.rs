use dfi_shared::{
    AddressError, ContentError, DatastoreError, EntryError, IdentityError, ProtocolError, Tag,
};
use dfi_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid entry: {0}")]
    Entry(#[from] EntryError),

    #[error("Content error: {0}")]
    Content(#[from] ContentError),

    #[error("Datastore error: {0}")]
    Datastore(#[from] DatastoreError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out during {0}")]
    Timeout(&'static str),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Peer refused: {0}")]
    Rejected(String),

    #[error("Expected {expected}, got {got}")]
    UnexpectedResponse { expected: Tag, got: String },

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: u64 },

    #[error("Invalid frame length prefix")]
    InvalidFrame,

    #[error("Connection closed")]
    Closed,

    #[error("Piece {0} does not match the hash list")]
    PieceMismatch(u32),

    #[error("Search query too long ({0} bytes)")]
    SearchTooLong(usize),

    #[error("Entry is older than the stored one")]
    StaleEntry,

    #[error("Refusing to connect to ourselves")]
    SelfConnect,

    #[error("Not found")]
    NotFound,

    #[error("Lock poisoned")]
    Poisoned,
}

impl NetError {
    /// Whether the connection this error came from can no longer be used.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            NetError::Io(_)
                | NetError::Timeout(_)
                | NetError::Closed
                | NetError::FrameTooLarge { .. }
                | NetError::InvalidFrame
                | NetError::Handshake(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, NetError>;
