//! Length-prefixed frames.
//!
//! Every frame starts with an 8-byte buffer holding the body length as an
//! unsigned LEB128 varint, zero-padded. The body follows immediately.

use dfi_shared::constants::MAX_MESSAGE_CONTENT_SIZE;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{NetError, Result};

pub const PREFIX_SIZE: usize = 8;

/// Envelope overhead allowed on top of the content ceiling.
const ENVELOPE_SLACK: usize = 64 * 1024;

pub const MAX_FRAME_SIZE: usize = MAX_MESSAGE_CONTENT_SIZE + ENVELOPE_SLACK;

/// Largest length an 8-byte varint can carry.
const MAX_ENCODABLE: u64 = (1 << 56) - 1;

pub fn encode_length(len: u64) -> Result<[u8; PREFIX_SIZE]> {
    if len > MAX_ENCODABLE {
        return Err(NetError::FrameTooLarge {
            size: len,
            max: MAX_ENCODABLE,
        });
    }

    let mut buf = [0u8; PREFIX_SIZE];
    let mut value = len;
    let mut i = 0;
    while value >= 0x80 {
        buf[i] = (value as u8) | 0x80;
        value >>= 7;
        i += 1;
    }
    buf[i] = value as u8;
    Ok(buf)
}

pub fn decode_length(buf: &[u8; PREFIX_SIZE]) -> Result<u64> {
    let mut value = 0u64;
    for (i, byte) in buf.iter().enumerate() {
        let shift = 7 * i as u32;
        if byte & 0x80 == 0 {
            return Ok(value | (u64::from(*byte) << shift));
        }
        value |= u64::from(byte & 0x7f) << shift;
    }
    Err(NetError::InvalidFrame)
}

pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge {
            size: body.len() as u64,
            max: MAX_FRAME_SIZE as u64,
        });
    }

    let prefix = encode_length(body.len() as u64)?;
    writer.write_all(&prefix).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame body. The length is checked against `max` before any of
/// the body is read.
pub async fn read_frame<R>(reader: &mut R, max: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; PREFIX_SIZE];
    read_exact(reader, &mut prefix).await?;

    let len = decode_length(&prefix)?;
    if len > max as u64 {
        return Err(NetError::FrameTooLarge {
            size: len,
            max: max as u64,
        });
    }

    let mut body = vec![0u8; len as usize];
    read_exact(reader, &mut body).await?;
    Ok(body)
}

async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(NetError::Closed),
        Err(e) => Err(e.into()),
    }
}
