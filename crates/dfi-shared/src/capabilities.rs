use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::constants::SUPPORTED_COMPRESSION;
use crate::error::ProtocolError;

pub const GZIP: &str = "gzip";

/// What a peer supports, exchanged with the `:ap` message during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Compression algorithms in order of preference.
    pub compression: Vec<String>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            compression: SUPPORTED_COMPRESSION.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Capabilities {
    pub fn none() -> Self {
        Self {
            compression: Vec::new(),
        }
    }
}

/// The first algorithm in the server's preference order that the client also
/// lists, or an empty string when they share none.
pub fn choose_compression(client: &Capabilities, server: &Capabilities) -> String {
    server
        .compression
        .iter()
        .find(|algo| client.compression.contains(algo))
        .cloned()
        .unwrap_or_default()
}

pub fn compress(algorithm: &str, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    match algorithm {
        "" => Ok(data.to_vec()),
        GZIP => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        other => Err(ProtocolError::UnsupportedCompression(other.to_string())),
    }
}

/// Inflate `data`, refusing output larger than `limit` bytes.
pub fn decompress(algorithm: &str, data: &[u8], limit: usize) -> Result<Vec<u8>, ProtocolError> {
    let out = match algorithm {
        "" => data.to_vec(),
        GZIP => {
            let mut out = Vec::new();
            GzDecoder::new(data)
                .take(limit as u64 + 1)
                .read_to_end(&mut out)?;
            out
        }
        other => return Err(ProtocolError::UnsupportedCompression(other.to_string())),
    };

    if out.len() > limit {
        return Err(ProtocolError::ContentTooLarge {
            size: out.len(),
            max: limit,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(list: &[&str]) -> Capabilities {
        Capabilities {
            compression: list.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_server_order_wins() {
        assert_eq!(
            choose_compression(&caps(&["lz4"]), &caps(&["gzip", "lz4"])),
            "lz4"
        );
        assert_eq!(
            choose_compression(&caps(&["lz4", "gzip"]), &caps(&["gzip", "lz4"])),
            "gzip"
        );
        assert_eq!(
            choose_compression(&caps(&["lz4", "zstd"]), &caps(&["gzip", "lz4"])),
            "lz4"
        );
    }

    #[test]
    fn test_no_overlap_is_empty() {
        assert_eq!(choose_compression(&caps(&["zstd"]), &caps(&["gzip"])), "");
        assert_eq!(choose_compression(&caps(&[]), &caps(&["gzip"])), "");
        assert_eq!(choose_compression(&caps(&["gzip"]), &caps(&[])), "");
    }

    #[test]
    fn test_gzip_roundtrip() {
        let data = b"entries entries entries entries".repeat(50);
        let packed = compress(GZIP, &data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(decompress(GZIP, &packed, data.len()).unwrap(), data);
    }

    #[test]
    fn test_decompress_limit() {
        let data = vec![0u8; 10_000];
        let packed = compress(GZIP, &data).unwrap();
        assert!(matches!(
            decompress(GZIP, &packed, 1000),
            Err(ProtocolError::ContentTooLarge { max: 1000, .. })
        ));
    }

    #[test]
    fn test_unknown_algorithm() {
        assert!(matches!(
            compress("lz4", b"x"),
            Err(ProtocolError::UnsupportedCompression(_))
        ));
        assert_eq!(decompress("", b"plain", 16).unwrap(), b"plain");
    }
}
