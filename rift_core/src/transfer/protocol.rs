//! Binary framing for data-channel messages.
//!
//! All integers are big-endian at fixed offsets:
//!
//! ```text
//! metadata: type:u32 | fileSize:u64 | totalChunks:u32 | nameLen:u32 | typeLen:u32 | name | type
//! chunk:    type:u32 | payloadSize:u32 | chunkIndex:u32 | payload
//! ```

use super::constants::{
    CHUNK_HEADER_SIZE, MESSAGE_TYPE_CHUNK, MESSAGE_TYPE_METADATA, METADATA_HEADER_SIZE,
};
use crate::error::{Result, RiftError};
use bytes::{BufMut, Bytes, BytesMut};

/// File description sent once, before any chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub total_chunks: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: u32,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Metadata(Metadata),
    Chunk(Chunk),
}

/// Number of chunks needed for `file_size` bytes; zero for an empty file.
pub fn chunk_count(file_size: u64, chunk_size: usize) -> Result<u32> {
    if chunk_size == 0 {
        return Err(RiftError::Config("chunk_size must be > 0".to_string()));
    }
    let count = file_size.div_ceil(chunk_size as u64);
    u32::try_from(count).map_err(|_| {
        RiftError::Config(format!(
            "{} bytes needs {} chunks, more than the frame format can index",
            file_size, count
        ))
    })
}

pub fn encode_metadata(metadata: &Metadata) -> Bytes {
    let name = metadata.file_name.as_bytes();
    let mime = metadata.mime_type.as_bytes();

    let mut buf = BytesMut::with_capacity(METADATA_HEADER_SIZE + name.len() + mime.len());
    buf.put_u32(MESSAGE_TYPE_METADATA);
    buf.put_u64(metadata.file_size);
    buf.put_u32(metadata.total_chunks);
    buf.put_u32(name.len() as u32);
    buf.put_u32(mime.len() as u32);
    buf.put_slice(name);
    buf.put_slice(mime);
    buf.freeze()
}

pub fn encode_chunk(index: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(CHUNK_HEADER_SIZE + payload.len());
    buf.put_u32(MESSAGE_TYPE_CHUNK);
    buf.put_u32(payload.len() as u32);
    buf.put_u32(index);
    buf.put_slice(payload);
    buf.freeze()
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32> {
    buf.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| RiftError::MalformedFrame(format!("no u32 at offset {}", offset)))
}

fn read_u64(buf: &[u8], offset: usize) -> Result<u64> {
    buf.get(offset..offset + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_be_bytes)
        .ok_or_else(|| RiftError::MalformedFrame(format!("no u64 at offset {}", offset)))
}

fn read_str(buf: &[u8], offset: usize, len: usize, field: &str) -> Result<String> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| RiftError::MalformedFrame(format!("{} length overflows", field)))?;
    let raw = buf.get(offset..end).ok_or_else(|| {
        RiftError::MalformedFrame(format!(
            "{} declares {} bytes but frame has {}",
            field,
            len,
            buf.len().saturating_sub(offset)
        ))
    })?;
    String::from_utf8(raw.to_vec())
        .map_err(|_| RiftError::MalformedFrame(format!("{} is not valid UTF-8", field)))
}

pub fn decode_metadata(buf: &[u8]) -> Result<Metadata> {
    if buf.len() < METADATA_HEADER_SIZE {
        return Err(RiftError::MalformedFrame(format!(
            "metadata frame is {} bytes, header needs {}",
            buf.len(),
            METADATA_HEADER_SIZE
        )));
    }
    let message_type = read_u32(buf, 0)?;
    if message_type != MESSAGE_TYPE_METADATA {
        return Err(RiftError::MalformedFrame(format!(
            "expected metadata frame, got type {}",
            message_type
        )));
    }

    let file_size = read_u64(buf, 4)?;
    let total_chunks = read_u32(buf, 12)?;
    let name_len = read_u32(buf, 16)? as usize;
    let type_len = read_u32(buf, 20)? as usize;

    let file_name = read_str(buf, METADATA_HEADER_SIZE, name_len, "fileName")?;
    let mime_type = read_str(buf, METADATA_HEADER_SIZE + name_len, type_len, "fileType")?;

    Ok(Metadata {
        file_name,
        file_size,
        mime_type,
        total_chunks,
    })
}

/// Payload is sliced out of `buf` without copying.
pub fn decode_chunk(buf: &Bytes) -> Result<Chunk> {
    if buf.len() < CHUNK_HEADER_SIZE {
        return Err(RiftError::MalformedFrame(format!(
            "chunk frame is {} bytes, header needs {}",
            buf.len(),
            CHUNK_HEADER_SIZE
        )));
    }
    let message_type = read_u32(buf, 0)?;
    if message_type != MESSAGE_TYPE_CHUNK {
        return Err(RiftError::MalformedFrame(format!(
            "expected chunk frame, got type {}",
            message_type
        )));
    }

    let size = read_u32(buf, 4)? as usize;
    let index = read_u32(buf, 8)?;
    let end = CHUNK_HEADER_SIZE.checked_add(size).ok_or_else(|| {
        RiftError::MalformedFrame(format!("chunk {} payload size overflows", index))
    })?;
    if end > buf.len() {
        return Err(RiftError::MalformedFrame(format!(
            "chunk {} declares {} payload bytes but frame has {}",
            index,
            size,
            buf.len() - CHUNK_HEADER_SIZE
        )));
    }

    Ok(Chunk {
        index,
        payload: buf.slice(CHUNK_HEADER_SIZE..end),
    })
}

pub fn decode_frame(buf: &Bytes) -> Result<Frame> {
    match read_u32(buf, 0)? {
        MESSAGE_TYPE_METADATA => decode_metadata(buf).map(Frame::Metadata),
        MESSAGE_TYPE_CHUNK => decode_chunk(buf).map(Frame::Chunk),
        other => Err(RiftError::MalformedFrame(format!(
            "unknown message type {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> Metadata {
        Metadata {
            file_name: "holiday photo.jpg".to_string(),
            file_size: 100_000,
            mime_type: "image/jpeg".to_string(),
            total_chunks: 7,
        }
    }

    #[test]
    fn test_metadata_layout_is_bit_exact() {
        let frame = encode_metadata(&Metadata {
            file_name: "a.txt".to_string(),
            file_size: 0x0102_0304_0506_0708,
            mime_type: "text/plain".to_string(),
            total_chunks: 9,
        });

        assert_eq!(frame.len(), METADATA_HEADER_SIZE + 5 + 10);
        assert_eq!(&frame[0..4], &[0, 0, 0, 0]);
        assert_eq!(&frame[4..12], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&frame[12..16], &[0, 0, 0, 9]);
        assert_eq!(&frame[16..20], &[0, 0, 0, 5]);
        assert_eq!(&frame[20..24], &[0, 0, 0, 10]);
        assert_eq!(&frame[24..29], b"a.txt");
        assert_eq!(&frame[29..], b"text/plain");
    }

    #[test]
    fn test_chunk_layout_is_bit_exact() {
        let frame = encode_chunk(258, b"xyz");
        assert_eq!(
            &frame[..],
            &[0, 0, 0, 1, 0, 0, 0, 3, 0, 0, 1, 2, b'x', b'y', b'z']
        );
    }

    #[test]
    fn test_metadata_roundtrip_with_unicode_name() {
        let metadata = Metadata {
            file_name: "résumé 🦀.pdf".to_string(),
            ..sample_metadata()
        };
        let decoded = decode_metadata(&encode_metadata(&metadata)).unwrap();
        assert_eq!(decoded, metadata);
    }

    #[test]
    fn test_chunk_roundtrip_empty_and_full_payload() {
        let empty = decode_chunk(&encode_chunk(0, &[])).unwrap();
        assert_eq!(empty.index, 0);
        assert!(empty.payload.is_empty());

        let payload = vec![0xAB; 16 * 1024];
        let full = decode_chunk(&encode_chunk(u32::MAX, &payload)).unwrap();
        assert_eq!(full.index, u32::MAX);
        assert_eq!(full.payload, payload);
    }

    #[test]
    fn test_decode_frame_dispatches_on_type() {
        let metadata = sample_metadata();
        assert_eq!(
            decode_frame(&encode_metadata(&metadata)).unwrap(),
            Frame::Metadata(metadata)
        );
        assert!(matches!(
            decode_frame(&encode_chunk(3, b"abc")).unwrap(),
            Frame::Chunk(Chunk { index: 3, .. })
        ));
    }

    #[test]
    fn test_oversize_file_name_length_is_malformed() {
        let mut raw = BytesMut::from(&encode_metadata(&sample_metadata())[..]);
        raw[16..20].copy_from_slice(&10_000u32.to_be_bytes());
        let err = decode_frame(&raw.freeze()).unwrap_err();
        assert!(matches!(err, RiftError::MalformedFrame(_)));
    }

    #[test]
    fn test_oversize_payload_size_is_malformed() {
        let mut raw = BytesMut::from(&encode_chunk(0, b"abcd")[..]);
        raw[4..8].copy_from_slice(&5u32.to_be_bytes());
        assert!(matches!(
            decode_chunk(&raw.freeze()),
            Err(RiftError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_max_payload_size_is_malformed() {
        let mut raw = BytesMut::from(&encode_chunk(3, b"abcd")[..]);
        raw[4..8].copy_from_slice(&u32::MAX.to_be_bytes());
        let raw = raw.freeze();
        assert!(matches!(decode_chunk(&raw), Err(RiftError::MalformedFrame(_))));
        assert!(matches!(decode_frame(&raw), Err(RiftError::MalformedFrame(_))));
    }

    #[test]
    fn test_short_buffers_are_malformed() {
        assert!(decode_frame(&Bytes::from_static(&[0, 0])).is_err());
        assert!(decode_frame(&Bytes::from_static(&[0, 0, 0, 1, 0, 0])).is_err());
        assert!(decode_frame(&Bytes::from(vec![0u8; METADATA_HEADER_SIZE - 1])).is_err());
    }

    #[test]
    fn test_unknown_type_and_bad_utf8_are_malformed() {
        let unknown = Bytes::from_static(&[0, 0, 0, 7, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            decode_frame(&unknown),
            Err(RiftError::MalformedFrame(_))
        ));

        let mut raw = BytesMut::from(&encode_metadata(&Metadata {
            file_name: "ab".to_string(),
            ..sample_metadata()
        })[..]);
        raw[24] = 0xFF;
        raw[25] = 0xFE;
        assert!(matches!(
            decode_metadata(&raw),
            Err(RiftError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        let mut raw = BytesMut::from(&encode_chunk(1, b"data")[..]);
        raw.put_slice(b"garbage");
        let chunk = decode_chunk(&raw.freeze()).unwrap();
        assert_eq!(chunk.payload, Bytes::from_static(b"data"));
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0, 16_384).unwrap(), 0);
        assert_eq!(chunk_count(1, 16_384).unwrap(), 1);
        assert_eq!(chunk_count(16_384, 16_384).unwrap(), 1);
        assert_eq!(chunk_count(100_000, 16_384).unwrap(), 7);
        assert!(chunk_count(10, 0).is_err());
        assert!(chunk_count(u64::MAX, 1).is_err());
    }
}
