//! Frame encoding and decoding for the peer data channel.
//!
//! ```text
//! control: [0x00][UTF-8 JSON control message]
//! chunk:   [0x01][u32 LE header len][UTF-8 JSON header][raw bytes]
//! ```
//!
//! The chunk header is `{"fileId","index","total","length"}`. Exactly
//! `length` bytes are taken after the header; anything beyond is ignored.
//! Decoding never panics: every malformed input becomes a [`FrameError`].

use crate::error::FrameError;
use crate::message::ControlMessage;
use crate::{CHUNK_MARKER, CHUNK_PREFIX_SIZE, CONTROL_MARKER};
use serde::{Deserialize, Serialize};

/// Chunk header as carried on the wire
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkHeader<'a> {
    file_id: std::borrow::Cow<'a, str>,
    #[serde(alias = "i")]
    index: u32,
    #[serde(alias = "t")]
    total: u32,
    #[serde(alias = "len")]
    length: usize,
}

/// A decoded chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    /// File identifier
    pub file_id: String,
    /// Chunk index
    pub index: u32,
    /// Total chunks declared by the sender
    pub total: u32,
    /// Chunk bytes
    pub data: Vec<u8>,
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Control message
    Control(ControlMessage),
    /// File chunk
    Chunk(ChunkFrame),
}

/// Encode a control message.
#[must_use]
pub fn encode_control(msg: &ControlMessage) -> Vec<u8> {
    let mut out = vec![CONTROL_MARKER];
    if let Err(e) = serde_json::to_writer(&mut out, msg) {
        tracing::error!(error = %e, "control message encoding failed");
    }
    out
}

/// Encode a chunk frame.
#[must_use]
pub fn encode_chunk(file_id: &str, index: u32, total: u32, data: &[u8]) -> Vec<u8> {
    let header = ChunkHeader {
        file_id: file_id.into(),
        index,
        total,
        length: data.len(),
    };
    let header = match serde_json::to_vec(&header) {
        Ok(header) => header,
        Err(e) => {
            tracing::error!(file = %file_id, index, error = %e, "chunk header encoding failed");
            return vec![CHUNK_MARKER];
        }
    };

    let mut out = Vec::with_capacity(CHUNK_PREFIX_SIZE + header.len() + data.len());
    out.push(CHUNK_MARKER);
    out.extend_from_slice(&(header.len() as u32).to_le_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(data);
    out
}

/// Decode a frame.
///
/// # Errors
///
/// Returns [`FrameError`] on an empty buffer, a truncated chunk, invalid
/// JSON, an unknown control `type`, or an unknown marker that does not parse
/// as a legacy marker-less control message.
pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
    let (&marker, rest) = bytes.split_first().ok_or(FrameError::Empty)?;

    match marker {
        CONTROL_MARKER => Ok(Frame::Control(serde_json::from_slice(rest)?)),
        CHUNK_MARKER => decode_chunk(bytes).map(Frame::Chunk),
        other => serde_json::from_slice::<ControlMessage>(bytes)
            .map(Frame::Control)
            .map_err(|_| FrameError::InvalidMarker(other)),
    }
}

fn decode_chunk(bytes: &[u8]) -> Result<ChunkFrame, FrameError> {
    if bytes.len() < CHUNK_PREFIX_SIZE {
        return Err(FrameError::TooShort {
            expected: CHUNK_PREFIX_SIZE,
            actual: bytes.len(),
        });
    }

    let mut len = [0u8; 4];
    len.copy_from_slice(&bytes[1..CHUNK_PREFIX_SIZE]);
    let header_len = u32::from_le_bytes(len) as usize;

    let header_end = CHUNK_PREFIX_SIZE.saturating_add(header_len);
    let header_bytes = bytes
        .get(CHUNK_PREFIX_SIZE..header_end)
        .ok_or(FrameError::TooShort {
            expected: header_end,
            actual: bytes.len(),
        })?;
    let header: ChunkHeader<'_> = serde_json::from_slice(header_bytes)?;

    let data_end = header_end.saturating_add(header.length);
    let data = bytes.get(header_end..data_end).ok_or(FrameError::TooShort {
        expected: data_end,
        actual: bytes.len(),
    })?;

    Ok(ChunkFrame {
        file_id: header.file_id.into_owned(),
        index: header.index,
        total: header.total,
        data: data.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_round_trip() {
        let msg = ControlMessage::FileComplete {
            file_id: "f-1-2-abcd".into(),
        };
        let bytes = encode_control(&msg);
        assert_eq!(bytes[0], CONTROL_MARKER);
        assert_eq!(decode(&bytes).unwrap(), Frame::Control(msg));
    }

    #[test]
    fn test_chunk_layout() {
        let bytes = encode_chunk("f", 3, 4, &[9, 8, 7]);
        assert_eq!(bytes[0], CHUNK_MARKER);

        let header_len = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
        let header: serde_json::Value =
            serde_json::from_slice(&bytes[5..5 + header_len]).unwrap();
        assert_eq!(header["fileId"], "f");
        assert_eq!(header["index"], 3);
        assert_eq!(header["total"], 4);
        assert_eq!(header["length"], 3);
        assert_eq!(&bytes[5 + header_len..], &[9, 8, 7]);
    }

    #[test]
    fn test_chunk_round_trip() {
        let data: Vec<u8> = (0..=255).collect();
        let bytes = encode_chunk("file-id", 7, 9, &data);
        match decode(&bytes).unwrap() {
            Frame::Chunk(chunk) => {
                assert_eq!(chunk.file_id, "file-id");
                assert_eq!(chunk.index, 7);
                assert_eq!(chunk.total, 9);
                assert_eq!(chunk.data, data);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut bytes = encode_chunk("f", 0, 1, &[1, 2]);
        bytes.extend_from_slice(&[0xFF, 0xFF]);
        match decode(&bytes).unwrap() {
            Frame::Chunk(chunk) => assert_eq!(chunk.data, vec![1, 2]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_truncated_chunk_rejected() {
        let bytes = encode_chunk("f", 0, 1, &[1, 2, 3, 4]);
        assert!(matches!(
            decode(&bytes[..bytes.len() - 1]),
            Err(FrameError::TooShort { .. })
        ));
        assert!(matches!(decode(&bytes[..3]), Err(FrameError::TooShort { .. })));
    }

    #[test]
    fn test_bare_chunk_marker_rejected() {
        assert!(matches!(
            decode(&[CHUNK_MARKER]),
            Err(FrameError::TooShort { expected: CHUNK_PREFIX_SIZE, actual: 1 })
        ));
    }

    #[test]
    fn test_huge_header_length_rejected() {
        let mut bytes = vec![CHUNK_MARKER];
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(b"{}");
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(matches!(decode(&[]), Err(FrameError::Empty)));
        assert!(matches!(decode(&[0x00, b'{']), Err(FrameError::Json(_))));
        assert!(matches!(decode(&[0x07, 1, 2]), Err(FrameError::InvalidMarker(0x07))));
        assert!(decode(b"\x00{\"type\":\"choke\"}").is_err());
    }

    #[test]
    fn test_legacy_markerless_control() {
        let frame = decode(br#"{"type":"transfer-complete"}"#).unwrap();
        assert_eq!(frame, Frame::Control(ControlMessage::TransferComplete));
    }

    #[test]
    fn test_legacy_short_header_keys() {
        let header = br#"{"fileId":"f","i":1,"t":2,"len":1}"#;
        let mut bytes = vec![CHUNK_MARKER];
        bytes.extend_from_slice(&(header.len() as u32).to_le_bytes());
        bytes.extend_from_slice(header);
        bytes.push(42);

        match decode(&bytes).unwrap() {
            Frame::Chunk(chunk) => {
                assert_eq!((chunk.index, chunk.total), (1, 2));
                assert_eq!(chunk.data, vec![42]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
