//! Binary format for audio datagrams on the data channel.
//!
//! One packet per UDP datagram, no fragmentation. All integers are
//! little-endian:
//!
//! ```text
//! Offset  Len  Field
//! ------  ---  -----
//!  0       8   timestamp (i64)
//!  8       4   sequence number (u32)
//! 12       4   payload length N (u32)
//! 16       N   payload bytes
//! ```
//!
//! Bytes after the declared payload are ignored.

use std::net::SocketAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::ProtocolError;

/// A single audio datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    /// Sender-side capture time in Unix epoch milliseconds.
    pub timestamp: i64,
    /// Assigned by the sender, one higher per packet. The relay never
    /// looks at it.
    pub sequence: u32,
    /// Raw audio bytes, forwarded untouched.
    pub payload: Bytes,
    /// Where the datagram came from. Filled in by the receiver, never
    /// serialized.
    pub sender: Option<SocketAddr>,
}

impl AudioPacket {
    /// Size of the fixed header in bytes.
    pub const HEADER_LEN: usize = 16;

    /// Creates a packet without a sender address.
    pub fn new(timestamp: i64, sequence: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            timestamp,
            sequence,
            payload: payload.into(),
            sender: None,
        }
    }

    /// Attaches the datagram's source address.
    pub fn with_sender(mut self, sender: SocketAddr) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Total encoded length.
    pub fn encoded_len(&self) -> usize {
        Self::HEADER_LEN + self.payload.len()
    }

    /// Encodes the header followed by the exact payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_i64_le(self.timestamp);
        buf.put_u32_le(self.sequence);
        // A UDP datagram can't carry more than u32::MAX bytes.
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decodes a datagram.
    ///
    /// # Errors
    /// Returns `ProtocolError::Truncated` if the datagram is shorter than
    /// the header or than the payload length it declares.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < Self::HEADER_LEN {
            return Err(ProtocolError::Truncated {
                expected: Self::HEADER_LEN,
                actual: data.len(),
            });
        }

        let mut buf = data;
        let timestamp = buf.get_i64_le();
        let sequence = buf.get_u32_le();
        let len = buf.get_u32_le() as usize;

        if buf.remaining() < len {
            return Err(ProtocolError::Truncated {
                expected: Self::HEADER_LEN + len,
                actual: data.len(),
            });
        }

        Ok(Self {
            timestamp,
            sequence,
            payload: Bytes::copy_from_slice(&buf[..len]),
            sender: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_packet_round_trip_reproduces_fields() {
        let packet = AudioPacket::new(1000, 42, vec![1u8, 2, 3]);

        let decoded = AudioPacket::decode(&packet.encode()).unwrap();

        assert_eq!(decoded.timestamp, 1000);
        assert_eq!(decoded.sequence, 42);
        assert_eq!(decoded.payload.as_ref(), &[1, 2, 3]);
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_audio_packet_encode_layout_is_little_endian() {
        let packet = AudioPacket::new(0x0102, 0x0A0B, vec![0xFF]);

        let bytes = packet.encode();

        assert_eq!(bytes.len(), AudioPacket::HEADER_LEN + 1);
        assert_eq!(&bytes[0..8], &[0x02, 0x01, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[0x0B, 0x0A, 0, 0]);
        assert_eq!(&bytes[12..16], &[1, 0, 0, 0]);
        assert_eq!(bytes[16], 0xFF);
    }

    #[test]
    fn test_audio_packet_negative_timestamp_survives() {
        let packet = AudioPacket::new(-5, 0, Vec::<u8>::new());
        let decoded = AudioPacket::decode(&packet.encode()).unwrap();
        assert_eq!(decoded.timestamp, -5);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_audio_packet_decode_short_header_returns_truncated() {
        let result = AudioPacket::decode(&[0u8; 10]);
        assert!(matches!(
            result,
            Err(ProtocolError::Truncated {
                expected: 16,
                actual: 10
            })
        ));
    }

    #[test]
    fn test_audio_packet_decode_short_payload_returns_truncated() {
        let mut bytes = AudioPacket::new(1, 1, vec![9u8; 8]).encode().to_vec();
        bytes.truncate(AudioPacket::HEADER_LEN + 3);

        let result = AudioPacket::decode(&bytes);

        assert!(matches!(
            result,
            Err(ProtocolError::Truncated {
                expected: 24,
                actual: 19
            })
        ));
    }

    #[test]
    fn test_audio_packet_decode_ignores_trailing_bytes() {
        let mut bytes = AudioPacket::new(7, 8, vec![1u8, 2]).encode().to_vec();
        bytes.extend_from_slice(&[0xAA, 0xBB]);

        let decoded = AudioPacket::decode(&bytes).unwrap();

        assert_eq!(decoded.payload.as_ref(), &[1, 2]);
    }

    #[test]
    fn test_audio_packet_sender_is_not_serialized() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let packet = AudioPacket::new(1, 2, vec![3u8]).with_sender(addr);

        let decoded = AudioPacket::decode(&packet.encode()).unwrap();

        assert_eq!(packet.encoded_len(), AudioPacket::HEADER_LEN + 1);
        assert_eq!(decoded.sender, None);
    }
}
