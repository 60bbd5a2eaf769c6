//! Message taxonomy and typed payload codecs.
//!
//! Payload layouts are fixed-width and little-endian. Id fields are 8 ASCII
//! digits; names and passwords are zero-padded fixed-size fields.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{FramingError, Result};
use crate::types::{
    DeviceId, DeviceInfo, FrequencyId, FrequencyInfo, FrequencyProtection, FrequencyType,
    MemberInfo, ID_LENGTH, NAME_MAX_LENGTH, PASSWORD_MAX_LENGTH,
};

use super::MAX_PAYLOAD_SIZE;

/// Size of the voice-frame header preceding the audio bytes.
const VOICE_HEADER: usize = 10;

/// Maximum audio bytes a single voice packet can carry.
pub const MAX_VOICE_PAYLOAD: usize = MAX_PAYLOAD_SIZE - VOICE_HEADER;

/// Message kind, grouped by nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    // Discovery
    DiscoverRequest = 0x01,
    DiscoverResponse = 0x02,
    Heartbeat = 0x03,
    Goodbye = 0x04,

    // Call control (1-on-1)
    CallRequest = 0x10,
    CallAccept = 0x11,
    CallReject = 0x12,
    CallEnd = 0x13,
    CallHold = 0x14,
    CallResume = 0x15,

    // Frequency control (group)
    FreqAnnounce = 0x20,
    FreqJoinRequest = 0x21,
    FreqJoinAccept = 0x22,
    FreqJoinReject = 0x23,
    FreqLeave = 0x24,
    FreqKick = 0x25,
    FreqClose = 0x26,
    FreqInvite = 0x27,
    FreqUpdate = 0x28,
    FreqMemberList = 0x29,

    // Voice
    VoiceData = 0x30,
    VoiceStart = 0x31,
    VoiceEnd = 0x32,
    VoiceSilence = 0x33,
    VoiceDtx = 0x34,

    // Control
    Mute = 0x40,
    Unmute = 0x41,
    Ping = 0x42,
    Pong = 0x43,
    Ack = 0x44,
    Nack = 0x45,
    RetransmitRequest = 0x46,

    // Status
    StatusUpdate = 0x50,
    QualityReport = 0x51,
    ErrorReport = 0x52,

    // Security
    KeyExchange = 0x60,
    KeyConfirm = 0x61,
    Rekey = 0x62,
}

impl MsgType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x01 => Self::DiscoverRequest,
            0x02 => Self::DiscoverResponse,
            0x03 => Self::Heartbeat,
            0x04 => Self::Goodbye,
            0x10 => Self::CallRequest,
            0x11 => Self::CallAccept,
            0x12 => Self::CallReject,
            0x13 => Self::CallEnd,
            0x14 => Self::CallHold,
            0x15 => Self::CallResume,
            0x20 => Self::FreqAnnounce,
            0x21 => Self::FreqJoinRequest,
            0x22 => Self::FreqJoinAccept,
            0x23 => Self::FreqJoinReject,
            0x24 => Self::FreqLeave,
            0x25 => Self::FreqKick,
            0x26 => Self::FreqClose,
            0x27 => Self::FreqInvite,
            0x28 => Self::FreqUpdate,
            0x29 => Self::FreqMemberList,
            0x30 => Self::VoiceData,
            0x31 => Self::VoiceStart,
            0x32 => Self::VoiceEnd,
            0x33 => Self::VoiceSilence,
            0x34 => Self::VoiceDtx,
            0x40 => Self::Mute,
            0x41 => Self::Unmute,
            0x42 => Self::Ping,
            0x43 => Self::Pong,
            0x44 => Self::Ack,
            0x45 => Self::Nack,
            0x46 => Self::RetransmitRequest,
            0x50 => Self::StatusUpdate,
            0x51 => Self::QualityReport,
            0x52 => Self::ErrorReport,
            0x60 => Self::KeyExchange,
            0x61 => Self::KeyConfirm,
            0x62 => Self::Rekey,
            _ => return None,
        })
    }

    /// Voice-channel messages: best-effort, never acknowledged.
    pub fn is_voice(self) -> bool {
        matches!(
            self,
            Self::VoiceData | Self::VoiceStart | Self::VoiceEnd | Self::VoiceSilence | Self::VoiceDtx
        )
    }

    /// Control messages that must be retransmitted until acknowledged.
    pub fn requires_ack(self) -> bool {
        matches!(
            self,
            Self::CallRequest
                | Self::CallAccept
                | Self::CallReject
                | Self::CallEnd
                | Self::CallHold
                | Self::CallResume
                | Self::FreqJoinRequest
                | Self::FreqJoinAccept
                | Self::FreqJoinReject
                | Self::FreqLeave
                | Self::FreqKick
                | Self::FreqClose
                | Self::FreqInvite
                | Self::KeyExchange
                | Self::KeyConfirm
                | Self::Rekey
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::DiscoverRequest => "DISCOVER_REQUEST",
            Self::DiscoverResponse => "DISCOVER_RESPONSE",
            Self::Heartbeat => "HEARTBEAT",
            Self::Goodbye => "GOODBYE",
            Self::CallRequest => "CALL_REQUEST",
            Self::CallAccept => "CALL_ACCEPT",
            Self::CallReject => "CALL_REJECT",
            Self::CallEnd => "CALL_END",
            Self::CallHold => "CALL_HOLD",
            Self::CallResume => "CALL_RESUME",
            Self::FreqAnnounce => "FREQ_ANNOUNCE",
            Self::FreqJoinRequest => "FREQ_JOIN_REQUEST",
            Self::FreqJoinAccept => "FREQ_JOIN_ACCEPT",
            Self::FreqJoinReject => "FREQ_JOIN_REJECT",
            Self::FreqLeave => "FREQ_LEAVE",
            Self::FreqKick => "FREQ_KICK",
            Self::FreqClose => "FREQ_CLOSE",
            Self::FreqInvite => "FREQ_INVITE",
            Self::FreqUpdate => "FREQ_UPDATE",
            Self::FreqMemberList => "FREQ_MEMBER_LIST",
            Self::VoiceData => "VOICE_DATA",
            Self::VoiceStart => "VOICE_START",
            Self::VoiceEnd => "VOICE_END",
            Self::VoiceSilence => "VOICE_SILENCE",
            Self::VoiceDtx => "VOICE_DTX",
            Self::Mute => "MUTE",
            Self::Unmute => "UNMUTE",
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::RetransmitRequest => "RETRANSMIT_REQ",
            Self::StatusUpdate => "STATUS_UPDATE",
            Self::QualityReport => "QUALITY_REPORT",
            Self::ErrorReport => "ERROR",
            Self::KeyExchange => "KEY_EXCHANGE",
            Self::KeyConfirm => "KEY_CONFIRM",
            Self::Rekey => "REKEY",
        }
    }
}

/// Protocol-level error codes carried in reject and error payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    None = 0x0000,
    Unknown = 0x0001,
    InvalidPacket = 0x0002,
    CrcMismatch = 0x0003,
    UnsupportedVersion = 0x0004,
    Authentication = 0x0010,
    Encryption = 0x0011,
    KeyExpired = 0x0012,
    PermissionDenied = 0x0020,
    FrequencyFull = 0x0021,
    FrequencyClosed = 0x0022,
    WrongPassword = 0x0023,
    Busy = 0x0024,
    Timeout = 0x0030,
    BufferOverflow = 0x0031,
}

impl ErrorCode {
    pub fn from_u16(v: u16) -> Self {
        match v {
            0x0000 => Self::None,
            0x0002 => Self::InvalidPacket,
            0x0003 => Self::CrcMismatch,
            0x0004 => Self::UnsupportedVersion,
            0x0010 => Self::Authentication,
            0x0011 => Self::Encryption,
            0x0012 => Self::KeyExpired,
            0x0020 => Self::PermissionDenied,
            0x0021 => Self::FrequencyFull,
            0x0022 => Self::FrequencyClosed,
            0x0023 => Self::WrongPassword,
            0x0024 => Self::Busy,
            0x0030 => Self::Timeout,
            0x0031 => Self::BufferOverflow,
            _ => Self::Unknown,
        }
    }
}

/// Audio codec identifier in voice frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Codec {
    Pcm16k = 0x00,
    #[default]
    Pcm8k = 0x01,
    Opus = 0x10,
    OpusDtx = 0x11,
}

impl Codec {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Self::Pcm16k),
            0x01 => Some(Self::Pcm8k),
            0x10 => Some(Self::Opus),
            0x11 => Some(Self::OpusDtx),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Codec helpers
// ---------------------------------------------------------------------------

fn need(buf: &[u8], len: usize) -> Result<()> {
    if buf.len() < len {
        return Err(FramingError::Malformed.into());
    }
    Ok(())
}

fn read_id(buf: &[u8]) -> [u8; ID_LENGTH] {
    let mut id = [0u8; ID_LENGTH];
    id.copy_from_slice(&buf[..ID_LENGTH]);
    id
}

fn write_name(out: &mut Vec<u8>, name: &str) {
    let bytes = name.as_bytes();
    let n = bytes.len().min(NAME_MAX_LENGTH);
    out.extend_from_slice(&bytes[..n]);
    out.resize(out.len() + NAME_MAX_LENGTH - n, 0);
}

fn read_name(buf: &[u8]) -> String {
    let end = buf[..NAME_MAX_LENGTH]
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(NAME_MAX_LENGTH);
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Discovery scan request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverRequest {
    pub include_frequencies: bool,
    pub include_devices: bool,
}

impl DiscoverRequest {
    pub fn encode(&self) -> Vec<u8> {
        vec![u8::from(self.include_frequencies), u8::from(self.include_devices)]
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        need(buf, 2)?;
        Ok(Self {
            include_frequencies: buf[0] != 0,
            include_devices: buf[1] != 0,
        })
    }
}

/// Discovery response: either a device or a frequency announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoverResponse {
    Device {
        id: DeviceId,
        name: String,
        available: bool,
    },
    Frequency {
        id: FrequencyId,
        freq_type: FrequencyType,
        protection: FrequencyProtection,
        member_count: u8,
    },
}

impl DiscoverResponse {
    const TAG_DEVICE: u8 = 0;
    const TAG_FREQUENCY: u8 = 1;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + ID_LENGTH + NAME_MAX_LENGTH + 1);
        match self {
            Self::Device { id, name, available } => {
                out.push(Self::TAG_DEVICE);
                out.extend_from_slice(id.as_bytes());
                write_name(&mut out, name);
                out.push(u8::from(*available));
            }
            Self::Frequency {
                id,
                freq_type,
                protection,
                member_count,
            } => {
                out.push(Self::TAG_FREQUENCY);
                out.extend_from_slice(id.as_bytes());
                out.push(*freq_type as u8);
                out.push(*protection as u8);
                out.push(*member_count);
            }
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        need(buf, 1 + ID_LENGTH)?;
        let body = &buf[1..];
        match buf[0] {
            Self::TAG_DEVICE => {
                need(body, ID_LENGTH + NAME_MAX_LENGTH + 1)?;
                Ok(Self::Device {
                    id: DeviceId::from_wire(read_id(body)),
                    name: read_name(&body[ID_LENGTH..]),
                    available: body[ID_LENGTH + NAME_MAX_LENGTH] != 0,
                })
            }
            Self::TAG_FREQUENCY => {
                need(body, ID_LENGTH + 3)?;
                Ok(Self::Frequency {
                    id: FrequencyId::from_wire(read_id(body)),
                    freq_type: FrequencyType::from_u8(body[ID_LENGTH])
                        .ok_or(FramingError::Malformed)?,
                    protection: FrequencyProtection::from_u8(body[ID_LENGTH + 1])
                        .ok_or(FramingError::Malformed)?,
                    member_count: body[ID_LENGTH + 2],
                })
            }
            _ => Err(FramingError::Malformed.into()),
        }
    }

    /// View this response as a scan-result entry with the given signal.
    pub fn into_scan_result(self, signal_dbm: i8) -> crate::types::ScanResult {
        match self {
            Self::Device { id, name, available } => {
                crate::types::ScanResult::Device(DeviceInfo {
                    id,
                    name,
                    signal_dbm,
                    available,
                })
            }
            Self::Frequency {
                id,
                freq_type,
                protection,
                member_count,
            } => crate::types::ScanResult::Frequency(FrequencyInfo {
                id,
                freq_type,
                protection,
                member_count,
                signal_dbm,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Call control
// ---------------------------------------------------------------------------

/// Request a 1-on-1 call. Responses echo the caller id as the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRequest {
    pub target_id: DeviceId,
}

impl CallRequest {
    pub fn encode(&self) -> Vec<u8> {
        self.target_id.as_bytes().to_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        need(buf, ID_LENGTH)?;
        Ok(Self {
            target_id: DeviceId::from_wire(read_id(buf)),
        })
    }
}

// ---------------------------------------------------------------------------
// Frequency control
// ---------------------------------------------------------------------------

/// Announcement of an existing frequency.
///
/// Carries the creation timestamp so that colliding frequency ids resolve
/// toward the earlier creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreqAnnounce {
    pub freq_id: FrequencyId,
    pub freq_type: FrequencyType,
    pub protection: FrequencyProtection,
    pub member_count: u8,
    pub created_at_ms: u64,
}

impl FreqAnnounce {
    pub const SIZE: usize = ID_LENGTH + 3 + 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(self.freq_id.as_bytes());
        out.push(self.freq_type as u8);
        out.push(self.protection as u8);
        out.push(self.member_count);
        out.extend_from_slice(&self.created_at_ms.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        need(buf, Self::SIZE)?;
        Ok(Self {
            freq_id: FrequencyId::from_wire(read_id(buf)),
            freq_type: FrequencyType::from_u8(buf[ID_LENGTH]).ok_or(FramingError::Malformed)?,
            protection: FrequencyProtection::from_u8(buf[ID_LENGTH + 1])
                .ok_or(FramingError::Malformed)?,
            member_count: buf[ID_LENGTH + 2],
            created_at_ms: LittleEndian::read_u64(&buf[ID_LENGTH + 3..ID_LENGTH + 11]),
        })
    }
}

/// Request to join a frequency. Password is zero-padded; all-zero means none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreqJoinRequest {
    pub freq_id: FrequencyId,
    pub password: Option<String>,
}

impl FreqJoinRequest {
    pub const SIZE: usize = ID_LENGTH + PASSWORD_MAX_LENGTH;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(self.freq_id.as_bytes());
        let mut pw = [0u8; PASSWORD_MAX_LENGTH];
        if let Some(p) = &self.password {
            let n = p.len().min(PASSWORD_MAX_LENGTH);
            pw[..n].copy_from_slice(&p.as_bytes()[..n]);
        }
        out.extend_from_slice(&pw);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        need(buf, Self::SIZE)?;
        let pw = &buf[ID_LENGTH..ID_LENGTH + PASSWORD_MAX_LENGTH];
        let end = pw.iter().position(|&b| b == 0).unwrap_or(PASSWORD_MAX_LENGTH);
        let password = if end == 0 {
            None
        } else {
            Some(String::from_utf8_lossy(&pw[..end]).into_owned())
        };
        Ok(Self {
            freq_id: FrequencyId::from_wire(read_id(buf)),
            password,
        })
    }
}

/// Join accept/reject body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreqJoinResponse {
    pub freq_id: FrequencyId,
    pub accepted: bool,
    pub member_count: u8,
    pub admin_id: DeviceId,
    pub reason: ErrorCode,
}

impl FreqJoinResponse {
    pub const SIZE: usize = ID_LENGTH + 2 + ID_LENGTH + 2;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(self.freq_id.as_bytes());
        out.push(u8::from(self.accepted));
        out.push(self.member_count);
        out.extend_from_slice(self.admin_id.as_bytes());
        out.extend_from_slice(&(self.reason as u16).to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        need(buf, Self::SIZE)?;
        Ok(Self {
            freq_id: FrequencyId::from_wire(read_id(buf)),
            accepted: buf[ID_LENGTH] != 0,
            member_count: buf[ID_LENGTH + 1],
            admin_id: DeviceId::from_wire(read_id(&buf[ID_LENGTH + 2..])),
            reason: ErrorCode::from_u16(LittleEndian::read_u16(
                &buf[ID_LENGTH + 2 + ID_LENGTH..],
            )),
        })
    }
}

/// Invitation to join a frequency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreqInvite {
    pub freq_id: FrequencyId,
    pub inviter_id: DeviceId,
    pub inviter_name: String,
}

impl FreqInvite {
    pub const SIZE: usize = ID_LENGTH + ID_LENGTH + NAME_MAX_LENGTH;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(self.freq_id.as_bytes());
        out.extend_from_slice(self.inviter_id.as_bytes());
        write_name(&mut out, &self.inviter_name);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        need(buf, Self::SIZE)?;
        Ok(Self {
            freq_id: FrequencyId::from_wire(read_id(buf)),
            inviter_id: DeviceId::from_wire(read_id(&buf[ID_LENGTH..])),
            inviter_name: read_name(&buf[2 * ID_LENGTH..]),
        })
    }
}

/// Admin removing a member from a frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreqKick {
    pub freq_id: FrequencyId,
    pub target_id: DeviceId,
}

impl FreqKick {
    pub const SIZE: usize = 2 * ID_LENGTH;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(self.freq_id.as_bytes());
        out.extend_from_slice(self.target_id.as_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        need(buf, Self::SIZE)?;
        Ok(Self {
            freq_id: FrequencyId::from_wire(read_id(buf)),
            target_id: DeviceId::from_wire(read_id(&buf[ID_LENGTH..])),
        })
    }
}

/// Full member list broadcast by the frequency admin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberList {
    pub freq_id: FrequencyId,
    pub members: Vec<MemberInfo>,
}

impl MemberList {
    const ENTRY_SIZE: usize = ID_LENGTH + NAME_MAX_LENGTH + 3;

    /// Members that fit one packet.
    pub const MAX_MEMBERS: usize = (MAX_PAYLOAD_SIZE - ID_LENGTH - 1) / Self::ENTRY_SIZE;

    pub fn encode(&self) -> Vec<u8> {
        let count = self.members.len().min(Self::MAX_MEMBERS);
        let mut out = Vec::with_capacity(ID_LENGTH + 1 + count * Self::ENTRY_SIZE);
        out.extend_from_slice(self.freq_id.as_bytes());
        out.push(count as u8);
        for m in &self.members[..count] {
            out.extend_from_slice(m.id.as_bytes());
            write_name(&mut out, &m.name);
            out.push(u8::from(m.is_admin));
            out.push(u8::from(m.is_muted));
            out.push(m.signal_dbm as u8);
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        need(buf, ID_LENGTH + 1)?;
        let freq_id = FrequencyId::from_wire(read_id(buf));
        let count = buf[ID_LENGTH] as usize;
        need(buf, ID_LENGTH + 1 + count * Self::ENTRY_SIZE)?;

        let mut members = Vec::with_capacity(count);
        let mut at = ID_LENGTH + 1;
        for _ in 0..count {
            let entry = &buf[at..at + Self::ENTRY_SIZE];
            members.push(MemberInfo {
                id: DeviceId::from_wire(read_id(entry)),
                name: read_name(&entry[ID_LENGTH..]),
                is_admin: entry[ID_LENGTH + NAME_MAX_LENGTH] != 0,
                is_muted: entry[ID_LENGTH + NAME_MAX_LENGTH + 1] != 0,
                signal_dbm: entry[ID_LENGTH + NAME_MAX_LENGTH + 2] as i8,
            });
            at += Self::ENTRY_SIZE;
        }

        Ok(Self { freq_id, members })
    }
}

// ---------------------------------------------------------------------------
// Voice
// ---------------------------------------------------------------------------

/// One voice frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceFrame {
    /// Capture timestamp in milliseconds.
    pub capture_timestamp: u32,
    /// Frame sequence number (wraps mod 2^16).
    pub sequence: u16,
    pub codec: Codec,
    pub frame_duration_ms: u8,
    pub audio: Vec<u8>,
}

impl VoiceFrame {
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.audio.len() > MAX_VOICE_PAYLOAD {
            return Err(FramingError::LengthOverflow {
                len: self.audio.len(),
                max: MAX_VOICE_PAYLOAD,
            }
            .into());
        }
        let mut out = Vec::with_capacity(VOICE_HEADER + self.audio.len());
        out.extend_from_slice(&self.capture_timestamp.to_le_bytes());
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.push(self.codec as u8);
        out.push(self.frame_duration_ms);
        out.extend_from_slice(&(self.audio.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.audio);
        Ok(out)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        need(buf, VOICE_HEADER)?;
        let audio_len = LittleEndian::read_u16(&buf[8..10]) as usize;
        need(buf, VOICE_HEADER + audio_len)?;
        Ok(Self {
            capture_timestamp: LittleEndian::read_u32(&buf[0..4]),
            sequence: LittleEndian::read_u16(&buf[4..6]),
            codec: Codec::from_u8(buf[6]).ok_or(FramingError::Malformed)?,
            frame_duration_ms: buf[7],
            audio: buf[VOICE_HEADER..VOICE_HEADER + audio_len].to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// Control / status
// ---------------------------------------------------------------------------

/// Acknowledgment of an ACK-required control packet.
///
/// The v1 header has no sequence field, so the acked packet is identified by
/// its type and header checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub acked_type: u8,
    pub acked_checksum: u16,
}

impl Ack {
    pub const SIZE: usize = 3;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.push(self.acked_type);
        out.extend_from_slice(&self.acked_checksum.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        need(buf, Self::SIZE)?;
        Ok(Self {
            acked_type: buf[0],
            acked_checksum: LittleEndian::read_u16(&buf[1..3]),
        })
    }
}

/// Error notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorReport {
    const MESSAGE_MAX: usize = 64;

    pub fn encode(&self) -> Vec<u8> {
        let bytes = self.message.as_bytes();
        let n = bytes.len().min(Self::MESSAGE_MAX);
        let mut out = Vec::with_capacity(3 + n);
        out.extend_from_slice(&(self.code as u16).to_le_bytes());
        out.push(n as u8);
        out.extend_from_slice(&bytes[..n]);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        need(buf, 3)?;
        let len = buf[2] as usize;
        need(buf, 3 + len)?;
        Ok(Self {
            code: ErrorCode::from_u16(LittleEndian::read_u16(&buf[0..2])),
            message: String::from_utf8_lossy(&buf[3..3 + len]).into_owned(),
        })
    }
}

/// Link quality statistics report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QualityReport {
    pub packets_sent: u16,
    pub packets_received: u16,
    pub packets_lost: u16,
    pub avg_latency_ms: u16,
    pub jitter_ms: u16,
    pub rssi: i8,
    pub link_quality: u8,
}

impl QualityReport {
    pub const SIZE: usize = 12;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.packets_sent.to_le_bytes());
        out.extend_from_slice(&self.packets_received.to_le_bytes());
        out.extend_from_slice(&self.packets_lost.to_le_bytes());
        out.extend_from_slice(&self.avg_latency_ms.to_le_bytes());
        out.extend_from_slice(&self.jitter_ms.to_le_bytes());
        out.push(self.rssi as u8);
        out.push(self.link_quality);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        need(buf, Self::SIZE)?;
        Ok(Self {
            packets_sent: LittleEndian::read_u16(&buf[0..2]),
            packets_received: LittleEndian::read_u16(&buf[2..4]),
            packets_lost: LittleEndian::read_u16(&buf[4..6]),
            avg_latency_ms: LittleEndian::read_u16(&buf[6..8]),
            jitter_ms: LittleEndian::read_u16(&buf[8..10]),
            rssi: buf[10] as i8,
            link_quality: buf[11],
        })
    }
}

// ---------------------------------------------------------------------------
// Security
// ---------------------------------------------------------------------------

/// ECDH key-exchange offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyExchange {
    pub public_key: [u8; 32],
    pub salt: [u8; 12],
    pub key_id: u32,
}

impl KeyExchange {
    pub const SIZE: usize = 32 + 12 + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.public_key);
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.key_id.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        need(buf, Self::SIZE)?;
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&buf[0..32]);
        let mut salt = [0u8; 12];
        salt.copy_from_slice(&buf[32..44]);
        Ok(Self {
            public_key,
            salt,
            key_id: LittleEndian::read_u32(&buf[44..48]),
        })
    }
}

/// Confirmation that a newly derived key is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyConfirm {
    pub key_id: u32,
}

impl KeyConfirm {
    pub const SIZE: usize = 4;

    pub fn encode(&self) -> Vec<u8> {
        self.key_id.to_le_bytes().to_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        need(buf, Self::SIZE)?;
        Ok(Self {
            key_id: LittleEndian::read_u32(&buf[0..4]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_roundtrip() {
        for raw in 0u8..=0xFF {
            if let Some(t) = MsgType::from_u8(raw) {
                assert_eq!(t as u8, raw);
            }
        }
        assert_eq!(MsgType::CallRequest as u8, 0x10);
        assert_eq!(MsgType::FreqMemberList as u8, 0x29);
        assert_eq!(MsgType::KeyExchange as u8, 0x60);
    }

    #[test]
    fn test_ack_classification() {
        assert!(MsgType::CallRequest.requires_ack());
        assert!(MsgType::KeyExchange.requires_ack());
        assert!(!MsgType::VoiceData.requires_ack());
        assert!(!MsgType::Ping.requires_ack());
        assert!(MsgType::VoiceData.is_voice());
        assert!(MsgType::VoiceDtx.is_voice());
        assert!(!MsgType::Ack.is_voice());
    }

    #[test]
    fn test_call_request_codec() {
        let req = CallRequest {
            target_id: "87654321".parse().unwrap(),
        };
        let bytes = req.encode();
        assert_eq!(bytes.len(), ID_LENGTH);
        assert_eq!(CallRequest::decode(&bytes).unwrap(), req);
    }

    #[test]
    fn test_join_request_password() {
        let with = FreqJoinRequest {
            freq_id: "11112222".parse().unwrap(),
            password: Some("hunter2".into()),
        };
        let decoded = FreqJoinRequest::decode(&with.encode()).unwrap();
        assert_eq!(decoded, with);

        let without = FreqJoinRequest {
            freq_id: "11112222".parse().unwrap(),
            password: None,
        };
        let decoded = FreqJoinRequest::decode(&without.encode()).unwrap();
        assert_eq!(decoded.password, None);
    }

    #[test]
    fn test_voice_frame_codec() {
        let frame = VoiceFrame {
            capture_timestamp: 123_456,
            sequence: 42,
            codec: Codec::Pcm8k,
            frame_duration_ms: 20,
            audio: vec![0x11; 160],
        };
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes.len(), 10 + 160);
        assert_eq!(VoiceFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_voice_frame_too_large() {
        let frame = VoiceFrame {
            capture_timestamp: 0,
            sequence: 0,
            codec: Codec::Pcm8k,
            frame_duration_ms: 20,
            audio: vec![0; MAX_VOICE_PAYLOAD + 1],
        };
        assert!(frame.encode().is_err());
    }

    #[test]
    fn test_member_list_codec() {
        let list = MemberList {
            freq_id: "55556666".parse().unwrap(),
            members: vec![
                MemberInfo {
                    id: "12345678".parse().unwrap(),
                    name: "Alice".into(),
                    is_admin: true,
                    is_muted: false,
                    signal_dbm: -70,
                },
                MemberInfo {
                    id: "87654321".parse().unwrap(),
                    name: "Bob".into(),
                    is_admin: false,
                    is_muted: true,
                    signal_dbm: -90,
                },
            ],
        };
        let decoded = MemberList::decode(&list.encode()).unwrap();
        assert_eq!(decoded, list);
    }

    #[test]
    fn test_member_list_fits_packet() {
        let list = MemberList {
            freq_id: "55556666".parse().unwrap(),
            members: (0..20)
                .map(|i| MemberInfo {
                    id: format!("{:08}", 10_000_000 + i).parse().unwrap(),
                    name: format!("member{i}"),
                    is_admin: false,
                    is_muted: false,
                    signal_dbm: -80,
                })
                .collect(),
        };
        let bytes = list.encode();
        assert!(bytes.len() <= MAX_PAYLOAD_SIZE);
        let decoded = MemberList::decode(&bytes).unwrap();
        assert_eq!(decoded.members.len(), MemberList::MAX_MEMBERS.min(20));
    }

    #[test]
    fn test_key_exchange_codec() {
        let ke = KeyExchange {
            public_key: [7u8; 32],
            salt: [9u8; 12],
            key_id: 0xDEAD_BEEF,
        };
        assert_eq!(KeyExchange::decode(&ke.encode()).unwrap(), ke);
    }

    #[test]
    fn test_announce_codec() {
        let a = FreqAnnounce {
            freq_id: "10203040".parse().unwrap(),
            freq_type: FrequencyType::Visible,
            protection: FrequencyProtection::Password,
            member_count: 5,
            created_at_ms: 1_712_345_678_901,
        };
        assert_eq!(FreqAnnounce::decode(&a.encode()).unwrap(), a);
    }

    #[test]
    fn test_discover_response_codec() {
        let d = DiscoverResponse::Device {
            id: "12345678".parse().unwrap(),
            name: "WT-PRO".into(),
            available: true,
        };
        assert_eq!(DiscoverResponse::decode(&d.encode()).unwrap(), d);

        let f = DiscoverResponse::Frequency {
            id: "99887766".parse().unwrap(),
            freq_type: FrequencyType::Hidden,
            protection: FrequencyProtection::Both,
            member_count: 3,
        };
        assert_eq!(DiscoverResponse::decode(&f.encode()).unwrap(), f);
    }

    #[test]
    fn test_truncated_payloads_rejected() {
        assert!(VoiceFrame::decode(&[0u8; 5]).is_err());
        assert!(FreqJoinRequest::decode(&[0u8; 8]).is_err());
        assert!(Ack::decode(&[0u8; 2]).is_err());
        assert!(KeyExchange::decode(&[0u8; 40]).is_err());
    }
}
