use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Public key is not 32 bytes (got {0})")]
    InvalidKeyLength(usize),

    #[error("Address is not 20 bytes (got {0})")]
    InvalidLength(usize),

    #[error("Invalid address encoding: {0}")]
    Encoding(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntryError {
    #[error("Entry name is too long ({0} > 32)")]
    NameTooLong(usize),

    #[error("Entry description is too long ({0} > 160)")]
    DescTooLong(usize),

    #[error("Entry has too many seeds ({0})")]
    TooManySeeds(usize),

    #[error("Entry is seeding too many addresses ({0})")]
    TooManySeeding(usize),

    #[error("Public key too small: {0}")]
    PublicKeyTooSmall(usize),

    #[error("Signature too small: {0}")]
    SignatureTooSmall(usize),

    #[error("Failed to verify signature")]
    InvalidSignature,

    #[error("Public address must be set")]
    MissingPublicAddress,

    #[error("Public address is too large ({0} chars, 252 max)")]
    PublicAddressTooLong(usize),

    #[error("Address does not derive from the entry's public key")]
    AddressMismatch,
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Key file error: {0}")]
    KeyFile(String),
}

#[derive(Error, Debug)]
pub enum ContentError {
    #[error("Piece full")]
    PieceFull,

    #[error("Title too long ({0} > 144)")]
    TitleTooLong(usize),

    #[error("Tags too long ({0} > 256)")]
    TagsTooLong(usize),

    #[error("Upload date cannot be in the future")]
    FutureUploadDate,

    #[error("Invalid collection data: length {0} is not a multiple of 32")]
    InvalidHashList(usize),

    #[error("Piece {got} added out of order (collection holds {held})")]
    OutOfOrder { got: u32, held: u32 },

    #[error("Invalid hash list")]
    RootMismatch,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Datastore error: {0}")]
    Datastore(#[from] DatastoreError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatastoreError {
    #[error("Record not found")]
    NotFound,

    #[error("Datastore backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Message has no content")]
    EmptyContent,

    #[error("Content too large: {size} bytes (max {max})")]
    ContentTooLarge { size: usize, max: usize },

    #[error("Failed to encode content: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to decode content: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Unsupported compression: {0}")]
    UnsupportedCompression(String),

    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),
}
