//! Framed binary codec for WAL entries and snapshots.
//!
//! Every frame is:
//! ```text
//! [version: 1 byte][length: 4 bytes LE][payload: N bytes JSON][crc32: 4 bytes LE]
//! ```
//! Files start with a 4-byte magic followed by the codec version.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

/// Current codec version.
pub const CODEC_VERSION: u8 = 1;

/// Magic bytes identifying idlink files.
pub const MAGIC: [u8; 4] = *b"IDLK";

/// Bytes taken by the file header.
pub const HEADER_LEN: u64 = 5;

/// Frames larger than this are treated as corruption (16 MiB).
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

fn invalid(msg: String) -> IoError {
    IoError::new(ErrorKind::InvalidData, msg)
}

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

fn read_array<const N: usize>(reader: &mut impl Read) -> IoResult<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Serializes `value` into a single checksummed frame.
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let payload =
        serde_json::to_vec(value).map_err(|e| invalid(format!("serialization failed: {e}")))?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(invalid(format!(
            "frame of {} bytes exceeds maximum {MAX_FRAME_LEN}",
            payload.len()
        )));
    }
    let len = u32::try_from(payload.len())
        .map_err(|_| invalid("frame length does not fit in u32".to_string()))?;

    let mut out = Vec::with_capacity(payload.len() + 9);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&checksum(&payload).to_le_bytes());
    Ok(out)
}

/// Reads one frame and deserializes it, verifying version and checksum.
///
/// # Errors
/// - `UnexpectedEof` if the frame is cut short (a torn tail write)
/// - `InvalidData` on version mismatch, oversize frames, CRC mismatch or bad JSON
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let [version] = read_array::<1>(reader)?;
    if version != CODEC_VERSION {
        return Err(invalid(format!(
            "unsupported codec version: {version} (expected {CODEC_VERSION})"
        )));
    }

    let len = u32::from_le_bytes(read_array::<4>(reader)?) as usize;
    if len > MAX_FRAME_LEN {
        return Err(invalid(format!(
            "frame of {len} bytes exceeds maximum {MAX_FRAME_LEN}"
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    let stored = u32::from_le_bytes(read_array::<4>(reader)?);
    let computed = checksum(&payload);
    if stored != computed {
        return Err(invalid(format!(
            "CRC mismatch: stored={stored:08x}, computed={computed:08x} (data corrupted)"
        )));
    }

    serde_json::from_slice(&payload).map_err(|e| invalid(format!("deserialization failed: {e}")))
}

/// Writes the file header.
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])
}

/// Reads and validates the file header, returning its version byte.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let magic = read_array::<4>(reader)?;
    if magic != MAGIC {
        return Err(invalid(format!(
            "invalid magic bytes: expected {MAGIC:?}, got {magic:?}"
        )));
    }
    let [version] = read_array::<1>(reader)?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::contact::{Contact, ContactId, LinkPrecedence};

    #[test]
    fn test_contact_frame_decodes() {
        let now = chrono::Utc::now();
        let contact = Contact {
            id: ContactId::new(3),
            email: Some("jennifer@hillvalley.edu".to_string()),
            phone_number: None,
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
            created_at: now,
            updated_at: now,
        };
        let bytes = encode(&contact).unwrap();
        let decoded: Contact = decode(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded, contact);
    }

    #[test]
    fn test_detects_corruption() {
        let mut bytes = encode(&"payload under test".to_string()).unwrap();
        bytes[8] ^= 0xFF;

        let err = decode::<String>(&mut Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_frame_is_unexpected_eof() {
        let bytes = encode(&"cut short".to_string()).unwrap();
        let cut = &bytes[..bytes.len() - 3];

        let err = decode::<String>(&mut Cursor::new(cut)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_rejects_oversized_frame() {
        let mut bad = vec![CODEC_VERSION];
        bad.extend_from_slice(&(200_000_000u32).to_le_bytes());

        let err = decode::<String>(&mut Cursor::new(bad)).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_header() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, HEADER_LEN);
        assert_eq!(read_header(&mut Cursor::new(buf)).unwrap(), CODEC_VERSION);

        let err = read_header(&mut Cursor::new(b"SNAP\x01".to_vec())).unwrap_err();
        assert!(err.to_string().contains("invalid magic"));
    }
}
