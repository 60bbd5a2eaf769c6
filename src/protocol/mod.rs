//! Wire protocol for Wavetalk.
//!
//! Defines the packet format, message taxonomy, and payload codecs.
//!
//! ## Packet Format
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Magic (2) │ Version (1) │ Type (1) │ Source ID (8)               │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ Payload Length (2) │ Checksum (2) │ Payload ...                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Multi-byte integers are little-endian. The checksum is CRC-16/CCITT
//! (poly 0x1021, init 0xFFFF, unreflected, no final XOR) over header and
//! payload with the checksum field zeroed.

mod message;
mod packet;

pub use message::{
    Ack, CallRequest, Codec, DiscoverRequest, DiscoverResponse, ErrorCode, ErrorReport,
    FreqAnnounce, FreqInvite, FreqJoinRequest, FreqJoinResponse, FreqKick, KeyConfirm,
    KeyExchange, MemberList, MsgType, QualityReport, VoiceFrame, MAX_VOICE_PAYLOAD,
};
pub use packet::{build, parse, Packet, PacketHeader};

use crc::{Crc, CRC_16_IBM_3740};

use crate::PROTOCOL_VERSION;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 16;

/// Packet magic: "WT" read little-endian.
pub const PACKET_MAGIC: u16 = 0x5754;

/// Maximum packet size on the wire.
pub const MAX_PACKET_SIZE: usize = 256;

/// Maximum payload size.
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;

/// Byte offset of the checksum field within the header.
pub const CHECKSUM_OFFSET: usize = 14;

/// CRC-16/CCITT, table-driven.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute the packet checksum over a buffer with the checksum field zeroed.
///
/// `frame` is the full packet; the two bytes at [`CHECKSUM_OFFSET`] are
/// treated as zero regardless of their current content.
pub fn checksum(frame: &[u8]) -> u16 {
    let mut digest = CRC16.digest();
    if frame.len() <= CHECKSUM_OFFSET {
        digest.update(frame);
    } else {
        digest.update(&frame[..CHECKSUM_OFFSET]);
        digest.update(&[0, 0]);
        digest.update(&frame[CHECKSUM_OFFSET + 2..]);
    }
    digest.finalize()
}

/// Plain CRC-16/CCITT over a byte slice.
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Verify protocol version compatibility.
pub fn is_compatible_version(version: u8) -> bool {
    version == PROTOCOL_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_check_value() {
        // CRC-16/IBM-3740 check value for "123456789".
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_checksum_ignores_stored_value() {
        let mut frame = vec![0u8; HEADER_SIZE + 4];
        frame[0] = 0x54;
        frame[1] = 0x57;
        let a = checksum(&frame);
        frame[CHECKSUM_OFFSET] = 0xAB;
        frame[CHECKSUM_OFFSET + 1] = 0xCD;
        assert_eq!(checksum(&frame), a);
    }
}
