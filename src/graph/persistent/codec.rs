//! CRC32-framed records shared by the WAL and the snapshot.
//!
//! A graph file starts with a 4-byte magic naming its kind and a format
//! version byte, followed by frames:
//!
//! ```text
//! [version: u8][payload length: u32 LE][payload: JSON][crc32(payload): u32 LE]
//! ```
//!
//! Frames are self-delimiting so a reader can tell a frame cut short by a
//! crash (`UnexpectedEof`) from a damaged one (`InvalidData`).

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use serde::{de::DeserializeOwned, Serialize};

/// Version written into file headers and frames.
pub const FRAME_VERSION: u8 = 1;

/// Bytes in a file header.
pub const HEADER_LEN: u64 = 5;

/// Version byte, length prefix and trailing checksum.
const FRAME_OVERHEAD: usize = 1 + 4 + 4;

/// One frame holds one node, one edge or one committed transaction.
const MAX_PAYLOAD: usize = 256 * 1024 * 1024;

/// What a graph file holds, told apart by its magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Wal,
    Snapshot,
}

impl FileKind {
    const fn magic(self) -> [u8; 4] {
        match self {
            Self::Wal => *b"WGWL",
            Self::Snapshot => *b"WGSN",
        }
    }
}

fn invalid(message: String) -> IoError {
    IoError::new(ErrorKind::InvalidData, message)
}

/// Encoded size of a frame carrying `payload_len` bytes.
pub const fn frame_len(payload_len: usize) -> u64 {
    (FRAME_OVERHEAD + payload_len) as u64
}

/// Encodes `value` as one frame.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> IoResult<Vec<u8>> {
    let payload =
        serde_json::to_vec(value).map_err(|e| invalid(format!("cannot encode frame: {e}")))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|_| payload.len() <= MAX_PAYLOAD)
        .ok_or_else(|| invalid(format!("frame payload of {} bytes is too large", payload.len())))?;

    let mut frame = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    frame.push(FRAME_VERSION);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(frame)
}

fn read_u32(reader: &mut impl Read) -> IoResult<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

/// Reads one frame and checks it. Returns the payload.
fn read_payload(reader: &mut impl Read) -> IoResult<Vec<u8>> {
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != FRAME_VERSION {
        return Err(invalid(format!("unknown frame version {}", version[0])));
    }

    let len = read_u32(reader)? as usize;
    if len > MAX_PAYLOAD {
        return Err(invalid(format!("frame payload of {len} bytes is too large")));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    let stored = read_u32(reader)?;
    let computed = crc32fast::hash(&payload);
    if stored != computed {
        return Err(invalid(format!(
            "checksum mismatch: stored {stored:08x}, computed {computed:08x}"
        )));
    }
    Ok(payload)
}

/// Decodes one frame. Returns the value and the bytes consumed.
///
/// # Errors
/// - `UnexpectedEof` if the input ends inside the frame
/// - `InvalidData` if the frame is damaged or the payload does not decode
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<(T, u64)> {
    let payload = read_payload(reader)?;
    let value = serde_json::from_slice(&payload)
        .map_err(|e| invalid(format!("cannot decode frame: {e}")))?;
    Ok((value, frame_len(payload.len())))
}

pub fn write_header(writer: &mut impl Write, kind: FileKind) -> IoResult<()> {
    writer.write_all(&kind.magic())?;
    writer.write_all(&[FRAME_VERSION])
}

/// Checks that the file is a `kind` file this build can read.
pub fn read_header(reader: &mut impl Read, kind: FileKind) -> IoResult<()> {
    let mut header = [0u8; 5];
    reader.read_exact(&mut header)?;
    if header[..4] != kind.magic() {
        return Err(invalid(format!(
            "not a {kind:?} file: magic {:?}",
            String::from_utf8_lossy(&header[..4])
        )));
    }
    if header[4] > FRAME_VERSION {
        return Err(invalid(format!(
            "{kind:?} file format {} is newer than supported {FRAME_VERSION}",
            header[4]
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_decode_reports_consumed_bytes() {
        let mut buf = encode("first").unwrap();
        let first_len = buf.len() as u64;
        buf.extend(encode(&vec![1, 2, 3]).unwrap());

        let mut cursor = Cursor::new(buf);
        let (first, consumed): (String, u64) = decode(&mut cursor).unwrap();
        assert_eq!(first, "first");
        assert_eq!(consumed, first_len);
        let (second, _): (Vec<i32>, u64) = decode(&mut cursor).unwrap();
        assert_eq!(second, vec![1, 2, 3]);
    }

    #[test]
    fn test_flipped_payload_byte_is_invalid_data() {
        let mut frame = encode("node payload").unwrap();
        frame[7] ^= 0xFF;
        let err = decode::<String>(&mut Cursor::new(frame)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_short_frame_is_unexpected_eof() {
        let frame = encode("torn write").unwrap();
        let err = decode::<String>(&mut Cursor::new(frame[..frame.len() - 3].to_vec())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_oversized_length_is_rejected() {
        let mut frame = vec![FRAME_VERSION];
        frame.extend_from_slice(&u32::MAX.to_le_bytes());
        let err = decode::<String>(&mut Cursor::new(frame)).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_header_kinds_are_distinct() {
        let mut buf = Vec::new();
        write_header(&mut buf, FileKind::Snapshot).unwrap();
        assert_eq!(buf.len() as u64, HEADER_LEN);

        read_header(&mut Cursor::new(&buf), FileKind::Snapshot).unwrap();
        let err = read_header(&mut Cursor::new(&buf), FileKind::Wal).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_newer_format_is_rejected() {
        let mut buf = b"WGWL".to_vec();
        buf.push(FRAME_VERSION + 1);
        let err = read_header(&mut Cursor::new(buf), FileKind::Wal).unwrap_err();
        assert!(err.to_string().contains("newer"));
    }
}
