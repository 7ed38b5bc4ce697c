//! Wire framing for the relay.
//!
//! Every message on a connection is an 8-byte header followed by the payload:
//!
//! ```text
//! [payload length: u32 LE] [route id: u32 LE] [payload: length bytes]
//! ```
//!
//! The length is checked against the configured maximum from the header alone,
//! so an oversized frame is rejected before any of its payload is read.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::types::RouteId;

/// Size of the fixed frame header in bytes
pub const HEADER_LEN: usize = 8;

/// Default payload ceiling (10 MiB)
pub const DEFAULT_MAX_PAYLOAD: u32 = 10 * 1024 * 1024;

/// Errors that make a connection unusable
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("declared payload of {declared} bytes exceeds limit of {max} bytes")]
    OversizedPayload { declared: u32, max: u32 },

    #[error("stream closed after {received} of {expected} bytes")]
    Truncated { expected: usize, received: usize },

    #[error("payload of {len} bytes does not fit the u32 length field")]
    PayloadTooLarge { len: usize },

    #[error("connection I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub payload_len: u32,
    pub route: RouteId,
}

impl FrameHeader {
    pub fn parse(raw: [u8; HEADER_LEN]) -> Self {
        let [l0, l1, l2, l3, r0, r1, r2, r3] = raw;
        Self {
            payload_len: u32::from_le_bytes([l0, l1, l2, l3]),
            route: u32::from_le_bytes([r0, r1, r2, r3]),
        }
    }

    /// Reject headers whose payload would not fit the configured limit
    pub fn check(&self, max_payload: u32) -> Result<(), ProtocolError> {
        if self.payload_len > max_payload {
            return Err(ProtocolError::OversizedPayload {
                declared: self.payload_len,
                max: max_payload,
            });
        }
        Ok(())
    }
}

/// One route-tagged message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub route: RouteId,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(route: RouteId, payload: impl Into<Bytes>) -> Self {
        Self {
            route,
            payload: payload.into(),
        }
    }

    /// Serialize a value as the JSON payload of a frame
    pub fn json<T: serde::Serialize + ?Sized>(route: RouteId, value: &T) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self::new(route, payload))
    }

    /// Encode header and payload into a single contiguous buffer
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        encode(self.route, &self.payload)
    }
}

/// Encode a route id and payload into wire bytes.
pub fn encode(route: RouteId, payload: &[u8]) -> Result<Bytes, ProtocolError> {
    let len = wire_len(payload.len())?;
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32_le(len);
    buf.put_u32_le(route);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

fn wire_len(len: usize) -> Result<u32, ProtocolError> {
    u32::try_from(len).map_err(|_| ProtocolError::PayloadTooLarge { len })
}

/// Decode a frame from an already-read header and a reader positioned at the payload.
pub async fn decode<R>(
    header: [u8; HEADER_LEN],
    payload_reader: &mut R,
    max_payload: u32,
) -> Result<Frame, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let header = FrameHeader::parse(header);
    header.check(max_payload)?;

    let expected = header.payload_len as usize;
    let mut payload = vec![0u8; expected];
    let received = read_full(payload_reader, &mut payload).await?;
    if received < expected {
        return Err(ProtocolError::Truncated { expected, received });
    }

    Ok(Frame {
        route: header.route,
        payload: Bytes::from(payload),
    })
}

/// Read the next frame from a stream.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly on a frame boundary.
pub async fn read_frame<R>(reader: &mut R, max_payload: u32) -> Result<Option<Frame>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let received = read_full(reader, &mut header).await?;
    if received == 0 {
        return Ok(None);
    }
    if received < HEADER_LEN {
        return Err(ProtocolError::Truncated {
            expected: HEADER_LEN,
            received,
        });
    }

    decode(header, reader, max_payload).await.map(Some)
}

/// Fill `buf` as far as the stream allows, returning how many bytes arrived
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        for (route, payload) in [
            (1u32, &b""[..]),
            (601, &br#"{"user_id":"u1"}"#[..]),
            (u32::MAX, &[0u8, 255, 7, 9][..]),
        ] {
            let wire = encode(route, payload).unwrap();
            let mut reader = &wire[..];
            let frame = read_frame(&mut reader, DEFAULT_MAX_PAYLOAD)
                .await
                .unwrap()
                .expect("frame");
            assert_eq!(frame.route, route);
            assert_eq!(&frame.payload[..], payload);
            assert!(reader.is_empty());
        }
    }

    #[test]
    fn test_header_layout_is_little_endian() {
        let wire = encode(0x0102_0304, b"abc").unwrap();
        assert_eq!(&wire[..HEADER_LEN], &[3, 0, 0, 0, 4, 3, 2, 1]);
        assert_eq!(&wire[HEADER_LEN..], b"abc");
    }

    #[test]
    fn test_length_must_fit_header() {
        assert_eq!(wire_len(0).unwrap(), 0);
        assert_eq!(wire_len(u32::MAX as usize).unwrap(), u32::MAX);
        if let Some(len) = (u32::MAX as usize).checked_add(1) {
            assert!(matches!(
                wire_len(len),
                Err(ProtocolError::PayloadTooLarge { len: l }) if l == len
            ));
        }
    }

    #[tokio::test]
    async fn test_oversized_rejected_before_payload_is_read() {
        let mut header = Vec::new();
        header.extend_from_slice(&20_000_000u32.to_le_bytes());
        header.extend_from_slice(&601u32.to_le_bytes());
        // No payload follows: if the codec tried to read it we'd see Truncated instead.
        let mut reader = &header[..];

        let err = read_frame(&mut reader, 10_485_760).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::OversizedPayload {
                declared: 20_000_000,
                max: 10_485_760
            }
        ));
    }

    #[tokio::test]
    async fn test_length_at_limit_is_accepted() {
        let wire = encode(5, &[1u8; 16]).unwrap();
        let mut reader = &wire[..];
        let frame = read_frame(&mut reader, 16).await.unwrap().unwrap();
        assert_eq!(frame.payload.len(), 16);

        let wire = encode(5, &[1u8; 17]).unwrap();
        let mut reader = &wire[..];
        assert!(matches!(
            read_frame(&mut reader, 16).await,
            Err(ProtocolError::OversizedPayload { declared: 17, .. })
        ));
    }

    #[tokio::test]
    async fn test_truncated_payload() {
        let wire = encode(7, b"hello world").unwrap();
        let mut reader = &wire[..wire.len() - 3];
        let err = read_frame(&mut reader, DEFAULT_MAX_PAYLOAD).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                expected: 11,
                received: 8
            }
        ));
    }

    #[tokio::test]
    async fn test_truncated_header() {
        let mut reader = &[1u8, 0, 0][..];
        let err = read_frame(&mut reader, DEFAULT_MAX_PAYLOAD).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { expected: 8, received: 3 }));
    }

    #[tokio::test]
    async fn test_clean_eof_is_not_an_error() {
        let mut reader = &b""[..];
        assert!(read_frame(&mut reader, DEFAULT_MAX_PAYLOAD).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_back_to_back_frames() {
        let mut wire = encode(1, b"first").unwrap().to_vec();
        wire.extend_from_slice(&encode(2, b"second").unwrap());
        let mut reader = &wire[..];

        let a = read_frame(&mut reader, DEFAULT_MAX_PAYLOAD).await.unwrap().unwrap();
        let b = read_frame(&mut reader, DEFAULT_MAX_PAYLOAD).await.unwrap().unwrap();
        assert_eq!((a.route, &a.payload[..]), (1, &b"first"[..]));
        assert_eq!((b.route, &b.payload[..]), (2, &b"second"[..]));
        assert!(read_frame(&mut reader, DEFAULT_MAX_PAYLOAD).await.unwrap().is_none());
    }
}
