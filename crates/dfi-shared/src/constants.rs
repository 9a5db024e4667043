/// Protocol magic sent first on every connection ("zf")
pub const PROTOCOL_MAGIC: i16 = 0x7a66;

/// Wire protocol version
pub const PROTOCOL_VERSION: i16 = 0x0000;

/// Raw address size in bytes
pub const ADDRESS_SIZE: usize = 20;

/// Base58check version byte prepended to encoded addresses
pub const ADDRESS_VERSION: u8 = 0x51;

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Ed25519 signature size in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// SHA3-256 digest size, the unit of a collection hash list
pub const HASH_SIZE: usize = 32;

pub const MAX_ENTRY_NAME_LENGTH: usize = 32;
pub const MAX_ENTRY_DESC_LENGTH: usize = 160;

/// Public addresses must be shorter than this (253 is the longest domain name)
pub const MAX_ENTRY_PUBLIC_ADDRESS_LENGTH: usize = 253;

pub const MAX_ENTRY_SEEDS: usize = 100_000;

/// Hard ceiling on a single message's content (4 MiB)
pub const MAX_MESSAGE_CONTENT_SIZE: usize = 4 * 1024 * 1024;

/// Search queries longer than this are rejected before decoding
pub const MAX_SEARCH_LENGTH: usize = 256;

/// k: how many entries a closest-node query returns
pub const BUCKET_SIZE: usize = 20;

/// Posts per piece
pub const PIECE_SIZE: usize = 1000;

pub const TITLE_MAX: usize = 144;
pub const TAGS_MAX: usize = 256;
pub const MAX_POST_SIZE: usize = TITLE_MAX + TAGS_MAX + 1024;

/// Posts per page for search / recent / popular
pub const SEARCH_PAGE_SIZE: u32 = 25;

/// Entries re-inserted when a routing table is opened
pub const LATEST_ENTRY_COUNT: u32 = 20;

/// Explore job period in seconds (two minutes)
pub const EXPLORE_FREQUENCY_SECS: u64 = 120;

/// Explore channel bound
pub const EXPLORE_BUFFER_SIZE: usize = 100;

/// Seed manager period in seconds (five minutes)
pub const SEED_SEARCH_FREQUENCY_SECS: u64 = 300;

/// Default TCP listen port
pub const DEFAULT_PORT: u16 = 5050;

/// Compression algorithms this build supports, in order of preference
pub const SUPPORTED_COMPRESSION: &[&str] = &["gzip"];
