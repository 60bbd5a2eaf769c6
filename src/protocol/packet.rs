//! Packet framing: header layout, build and parse.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{FramingError, Result};
use crate::types::{DeviceId, ID_LENGTH};
use crate::PROTOCOL_VERSION;

use super::{checksum, MsgType, CHECKSUM_OFFSET, HEADER_SIZE, MAX_PAYLOAD_SIZE, PACKET_MAGIC};

/// Parsed packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Protocol version.
    pub version: u8,
    /// Raw message type byte; see [`PacketHeader::msg_type`].
    pub msg_type_raw: u8,
    /// Sender device id.
    pub src_id: DeviceId,
    /// Payload length.
    pub payload_len: u16,
    /// Stored checksum.
    pub checksum: u16,
}

impl PacketHeader {
    /// The message type, if the byte maps to a known kind.
    ///
    /// Unknown types are a routing concern, not a framing error; the
    /// dispatcher drops them with a counter.
    pub fn msg_type(&self) -> Option<MsgType> {
        MsgType::from_u8(self.msg_type_raw)
    }
}

/// A complete owned packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Decode a packet from wire bytes, verifying magic, version and CRC.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let (header, payload) = parse(frame)?;
        Ok(Self {
            header,
            payload: payload.to_vec(),
        })
    }

    /// Re-encode this packet. The checksum is recomputed.
    pub fn encode(&self) -> Result<Vec<u8>> {
        build_raw(self.header.msg_type_raw, self.header.src_id, &self.payload)
    }
}

/// Build a framed packet: header, payload, checksum.
pub fn build(msg_type: MsgType, src_id: DeviceId, payload: &[u8]) -> Result<Vec<u8>> {
    build_raw(msg_type as u8, src_id, payload)
}

fn build_raw(msg_type: u8, src_id: DeviceId, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FramingError::LengthOverflow {
            len: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        }
        .into());
    }

    let mut frame = vec![0u8; HEADER_SIZE + payload.len()];
    LittleEndian::write_u16(&mut frame[0..2], PACKET_MAGIC);
    frame[2] = PROTOCOL_VERSION;
    frame[3] = msg_type;
    frame[4..4 + ID_LENGTH].copy_from_slice(src_id.as_bytes());
    LittleEndian::write_u16(&mut frame[12..14], payload.len() as u16);
    // Checksum field stays zero while the CRC is computed.
    frame[HEADER_SIZE..].copy_from_slice(payload);

    let crc = checksum(&frame);
    LittleEndian::write_u16(&mut frame[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2], crc);

    Ok(frame)
}

/// Parse a framed packet, returning the header and a view of the payload.
///
/// Rejects short buffers, bad magic, version mismatch, payload lengths that
/// overflow the buffer, and CRC mismatches. Pure and stateless.
pub fn parse(frame: &[u8]) -> Result<(PacketHeader, &[u8])> {
    if frame.len() < HEADER_SIZE {
        return Err(FramingError::ShortBuffer.into());
    }

    let magic = LittleEndian::read_u16(&frame[0..2]);
    if magic != PACKET_MAGIC {
        return Err(FramingError::BadMagic(magic).into());
    }

    let version = frame[2];
    if version != PROTOCOL_VERSION {
        return Err(FramingError::BadVersion {
            expected: PROTOCOL_VERSION,
            got: version,
        }
        .into());
    }

    let payload_len = LittleEndian::read_u16(&frame[12..14]) as usize;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(FramingError::LengthOverflow {
            len: payload_len,
            max: MAX_PAYLOAD_SIZE,
        }
        .into());
    }
    if frame.len() < HEADER_SIZE + payload_len {
        return Err(FramingError::ShortBuffer.into());
    }

    let stored = LittleEndian::read_u16(&frame[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2]);
    let computed = checksum(&frame[..HEADER_SIZE + payload_len]);
    if computed != stored {
        return Err(FramingError::CrcMismatch { computed, stored }.into());
    }

    let mut src = [0u8; ID_LENGTH];
    src.copy_from_slice(&frame[4..4 + ID_LENGTH]);

    let header = PacketHeader {
        version,
        msg_type_raw: frame[3],
        src_id: DeviceId::from_wire(src),
        payload_len: payload_len as u16,
        checksum: stored,
    };

    Ok((header, &frame[HEADER_SIZE..HEADER_SIZE + payload_len]))
}

#[cfg(test)]
mod tests {
    use super::super::MAX_PACKET_SIZE;
    use super::*;
    use crate::error::Error;

    fn src() -> DeviceId {
        "12345678".parse().unwrap()
    }

    #[test]
    fn test_build_layout() {
        let frame = build(MsgType::CallRequest, src(), b"87654321").unwrap();
        assert_eq!(frame.len(), HEADER_SIZE + 8);
        // Magic "WT" little-endian on the wire.
        assert_eq!(&frame[0..2], &[0x54, 0x57]);
        assert_eq!(frame[2], PROTOCOL_VERSION);
        assert_eq!(frame[3], 0x10);
        assert_eq!(&frame[4..12], b"12345678");
        assert_eq!(LittleEndian::read_u16(&frame[12..14]), 8);
    }

    #[test]
    fn test_roundtrip() {
        let frame = build(MsgType::CallRequest, src(), b"87654321").unwrap();
        let (header, payload) = parse(&frame).unwrap();
        assert_eq!(header.msg_type(), Some(MsgType::CallRequest));
        assert_eq!(header.src_id.as_str(), "12345678");
        assert_eq!(payload, b"87654321");

        // Re-encoding an owned packet reproduces the original bytes.
        let packet = Packet::decode(&frame).unwrap();
        assert_eq!(packet.encode().unwrap(), frame);
    }

    #[test]
    fn test_rejects_short_buffer() {
        let err = parse(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, Error::Framing(FramingError::ShortBuffer)));
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut frame = build(MsgType::Ping, src(), &[]).unwrap();
        frame[0] = 0x00;
        assert!(matches!(
            parse(&frame).unwrap_err(),
            Error::Framing(FramingError::BadMagic(_))
        ));
    }

    #[test]
    fn test_rejects_bad_version() {
        let mut frame = build(MsgType::Ping, src(), &[]).unwrap();
        frame[2] = 99;
        assert!(matches!(
            parse(&frame).unwrap_err(),
            Error::Framing(FramingError::BadVersion { got: 99, .. })
        ));
    }

    #[test]
    fn test_rejects_truncated_payload() {
        let frame = build(MsgType::VoiceData, src(), &[1, 2, 3, 4]).unwrap();
        assert!(matches!(
            parse(&frame[..frame.len() - 1]).unwrap_err(),
            Error::Framing(FramingError::ShortBuffer)
        ));
    }

    #[test]
    fn test_detects_bit_flip() {
        let frame = build(MsgType::VoiceData, src(), &[0xAA; 32]).unwrap();
        for offset in 0..frame.len() {
            // Flips inside the checksum field change the stored value instead.
            if offset == CHECKSUM_OFFSET || offset == CHECKSUM_OFFSET + 1 {
                continue;
            }
            let mut tampered = frame.clone();
            tampered[offset] ^= 0x04;
            assert!(parse(&tampered).is_err(), "flip at {offset} not caught");
        }
    }

    #[test]
    fn test_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert!(matches!(
            build(MsgType::VoiceData, src(), &payload).unwrap_err(),
            Error::Framing(FramingError::LengthOverflow { .. })
        ));
    }

    #[test]
    fn test_max_payload_accepted() {
        let payload = vec![0x42u8; MAX_PAYLOAD_SIZE];
        let frame = build(MsgType::VoiceData, src(), &payload).unwrap();
        assert_eq!(frame.len(), MAX_PACKET_SIZE);
        let (header, body) = parse(&frame).unwrap();
        assert_eq!(header.payload_len as usize, MAX_PAYLOAD_SIZE);
        assert_eq!(body, payload.as_slice());
    }
}
