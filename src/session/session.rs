//! One logical conversation: state, crypto epoch, counters, audio rings.
//!
//! `Session` is the IO-free core the worker task drives: inbound messages
//! and timer edges come in, [`Action`]s come out. Everything that touches
//! the radio, the event stream, or the slot table happens in the worker.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::audio::{now_ms, AudioFrame, FrameConsumer, FrameProducer};
use crate::config::KeyPolicyConfig;
use crate::crypto::{secure_compare, CryptoContext, KeyPair};
use crate::error::{CryptoError, Error, SessionError};
use crate::events::EngineEvent;
use crate::protocol::{
    CallRequest, Codec, ErrorCode, FreqAnnounce, FreqInvite, FreqJoinRequest, FreqJoinResponse,
    FreqKick, KeyConfirm, KeyExchange, MemberList, MsgType, PacketHeader, VoiceFrame,
};
use crate::types::{
    Connection, DeviceId, FrequencyId, MemberInfo, PeerKey, SessionRole, ID_LENGTH,
};

use super::state::{SessionState, StateTracker};

/// Most members a frequency admits.
pub const MAX_FREQ_MEMBERS: usize = 100;

/// Audio bytes per voice packet: half a capture frame (80 samples, 10 ms).
///
/// A full 20 ms PCM16 frame is 320 bytes and cannot fit the 256-byte packet
/// (240-byte payload minus the voice header), so captured frames leave the
/// radio as two sample-aligned chunks. Compressed codecs fit whole.
pub const WIRE_VOICE_BYTES: usize = 160;

/// What the worker should do after feeding the session an input.
#[derive(Debug)]
pub enum Action {
    /// Transmit a packet. Reliable sends go through the ACK/retransmit path.
    Send {
        msg: MsgType,
        payload: Vec<u8>,
        reliable: bool,
    },
    /// Surface an event to the UI.
    Event(EngineEvent),
    /// Session is done; the worker tears down and exits.
    Teardown,
}

/// Session statistics the slot snapshot reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionCounters {
    pub voice_tx: u64,
    pub voice_rx: u64,
    pub voice_dropped_state: u64,
    pub voice_drop_crypto: u64,
}

pub struct Session {
    pub slot: usize,
    local_id: DeviceId,
    device_name: String,
    connection: Connection,
    role: SessionRole,
    state: StateTracker,

    crypto: CryptoContext,
    /// Previous key epoch, kept until the first packet authenticates under
    /// the new key.
    prev_crypto: Option<CryptoContext>,
    pending_keypair: Option<KeyPair>,
    pending_salt: [u8; 12],
    /// Per-sender replay watermarks for group sessions.
    member_floors: HashMap<DeviceId, u64>,
    /// The side that opened the session drives handshakes and rekeys.
    initiator: bool,

    tx_voice_seq: u16,
    pub muted: bool,
    pub audio_active: bool,
    pub talking: bool,

    members: Vec<MemberInfo>,
    pending_joins: Vec<DeviceId>,
    password: Option<String>,
    key_policy: KeyPolicyConfig,
    created_at_ms: u64,

    last_activity: Instant,
    counters: SessionCounters,

    rx_producer: FrameProducer,
    tx_consumer: FrameConsumer,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        slot: usize,
        local_id: DeviceId,
        device_name: String,
        connection: Connection,
        role: SessionRole,
        initiator: bool,
        password: Option<String>,
        key_policy: KeyPolicyConfig,
        rx_producer: FrameProducer,
        tx_consumer: FrameConsumer,
    ) -> Self {
        let mut crypto = CryptoContext::new(key_policy.clone());

        // Group sessions derive a shared key from the frequency password,
        // salted with the frequency id. Calls agree keys in-band via ECDH.
        if let (Connection::Frequency(info), Some(pw)) = (&connection, &password) {
            crypto.agree_from_password(pw.as_bytes(), info.id.as_bytes());
        }

        let mut members = Vec::new();
        if role == SessionRole::Admin {
            members.push(MemberInfo {
                id: local_id,
                name: device_name.clone(),
                is_admin: true,
                is_muted: false,
                signal_dbm: 0,
            });
        }

        Self {
            slot,
            local_id,
            device_name,
            connection,
            role,
            state: StateTracker::new(),
            crypto,
            prev_crypto: None,
            pending_keypair: None,
            pending_salt: [0u8; 12],
            member_floors: HashMap::new(),
            initiator,
            tx_voice_seq: 0,
            muted: false,
            audio_active: false,
            talking: false,
            members,
            pending_joins: Vec::new(),
            password,
            key_policy,
            created_at_ms: u64::from(now_ms()),
            last_activity: Instant::now(),
            counters: SessionCounters::default(),
            rx_producer,
            tx_consumer,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.state()
    }

    pub fn peer_key(&self) -> PeerKey {
        self.connection.peer_key()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn is_admin(&self) -> bool {
        self.role == SessionRole::Admin
    }

    pub fn members(&self) -> &[MemberInfo] {
        &self.members
    }

    pub fn member_count(&self) -> u8 {
        match &self.connection {
            Connection::Frequency(_) => self.members.len().max(1) as u8,
            Connection::Call(_) => 2,
        }
    }

    pub fn pending_joins(&self) -> &[DeviceId] {
        &self.pending_joins
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn counters(&self) -> SessionCounters {
        self.counters
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn key_id(&self) -> u32 {
        self.crypto.key_id()
    }

    fn freq_id(&self) -> Option<FrequencyId> {
        match &self.connection {
            Connection::Frequency(info) => Some(info.id),
            Connection::Call(_) => None,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle edges driven by the worker
    // -----------------------------------------------------------------------

    /// Send the opening request and enter WAITING.
    pub fn begin_outbound(&mut self) -> Vec<Action> {
        self.state.transition(SessionState::Waiting);
        match &self.connection {
            Connection::Call(peer) => vec![Action::Send {
                msg: MsgType::CallRequest,
                payload: CallRequest { target_id: peer.id }.encode(),
                reliable: true,
            }],
            Connection::Frequency(info) => vec![Action::Send {
                msg: MsgType::FreqJoinRequest,
                payload: FreqJoinRequest {
                    freq_id: info.id,
                    password: self.password.clone(),
                }
                .encode(),
                reliable: true,
            }],
        }
    }

    /// Enter INCOMING for an unsolicited request.
    pub fn begin_incoming(&mut self) -> Vec<Action> {
        self.state.transition(SessionState::Incoming);
        match &self.connection {
            Connection::Call(peer) => vec![Action::Event(EngineEvent::IncomingCall {
                slot: self.slot,
                from: peer.id,
            })],
            Connection::Frequency(_) => Vec::new(),
        }
    }

    /// Admin creating a frequency is CONNECTED from the start.
    pub fn begin_admin(&mut self) -> Vec<Action> {
        self.state.transition(SessionState::Connected);
        vec![Action::Event(EngineEvent::Connected {
            slot: self.slot,
            peer: self.peer_key(),
        })]
    }

    /// Local user accepted the incoming request.
    pub fn accept(&mut self) -> Vec<Action> {
        if self.state() != SessionState::Incoming {
            return Vec::new();
        }
        self.state.transition(SessionState::Connected);
        let mut actions = vec![Action::Event(EngineEvent::Connected {
            slot: self.slot,
            peer: self.peer_key(),
        })];
        match &self.connection {
            Connection::Call(peer) => actions.insert(
                0,
                Action::Send {
                    msg: MsgType::CallAccept,
                    payload: peer.id.as_bytes().to_vec(),
                    reliable: true,
                },
            ),
            Connection::Frequency(_) => {}
        }
        actions
    }

    /// Local user rejected the incoming request.
    pub fn reject(&mut self) -> Vec<Action> {
        if self.state() != SessionState::Incoming {
            return Vec::new();
        }
        self.state.transition(SessionState::Idle);
        let mut actions = Vec::new();
        if let Connection::Call(peer) = &self.connection {
            actions.push(Action::Send {
                msg: MsgType::CallReject,
                payload: peer.id.as_bytes().to_vec(),
                reliable: true,
            });
        }
        actions.push(Action::Teardown);
        actions
    }

    /// WAITING expired.
    pub fn timeout(&mut self) -> Vec<Action> {
        self.state.transition(SessionState::Idle);
        vec![
            Action::Event(EngineEvent::Timeout { slot: self.slot }),
            Action::Teardown,
        ]
    }

    /// No inbound packets within the inactivity window.
    pub fn watchdog_expired(&mut self) -> Vec<Action> {
        warn!(slot = self.slot, "Inactivity watchdog expired");
        self.state.transition(SessionState::Idle);
        vec![
            Action::Event(EngineEvent::LinkLost { slot: self.slot }),
            Action::Teardown,
        ]
    }

    /// Graceful local disconnect: notify the peer if connected, then exit.
    pub fn stop(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state() == SessionState::Connected {
            let (msg, payload) = match (&self.connection, self.role) {
                (Connection::Call(_), _) => (MsgType::CallEnd, Vec::new()),
                (Connection::Frequency(info), SessionRole::Admin) => {
                    (MsgType::FreqClose, info.id.as_bytes().to_vec())
                }
                (Connection::Frequency(info), SessionRole::Client) => {
                    (MsgType::FreqLeave, info.id.as_bytes().to_vec())
                }
            };
            actions.push(Action::Send {
                msg,
                payload,
                reliable: false,
            });
        }
        self.state.transition(SessionState::Idle);
        actions.push(Action::Teardown);
        actions
    }

    /// Periodic keep-alive while connected and otherwise idle.
    pub fn heartbeat(&self) -> Vec<Action> {
        if self.state() != SessionState::Connected {
            return Vec::new();
        }
        vec![Action::Send {
            msg: MsgType::Heartbeat,
            payload: Vec::new(),
            reliable: false,
        }]
    }

    /// Poll the key-refresh predicate; the initiator opens a new handshake.
    pub fn maybe_rekey(&mut self) -> Vec<Action> {
        if self.state() != SessionState::Connected || !self.initiator {
            return Vec::new();
        }
        if !self.crypto.needs_refresh() || self.pending_keypair.is_some() {
            return Vec::new();
        }
        debug!(slot = self.slot, "Key refresh due, starting handshake");
        self.start_handshake()
    }

    /// Start an ECDH handshake (initial agreement or rekey).
    pub fn start_handshake(&mut self) -> Vec<Action> {
        if self.freq_id().is_some() {
            // Group keys come from the password KDF, not per-peer ECDH.
            return Vec::new();
        }
        let keypair = KeyPair::generate();
        let salt: [u8; 12] = crate::crypto::random_bytes();
        let offer = KeyExchange {
            public_key: *keypair.public.as_bytes(),
            salt,
            key_id: 0,
        };
        self.pending_keypair = Some(keypair);
        self.pending_salt = salt;
        vec![Action::Send {
            msg: MsgType::KeyExchange,
            payload: offer.encode(),
            reliable: true,
        }]
    }

    /// Admin decision on a queued join request.
    pub fn decide_join(&mut self, device: DeviceId, accept: bool) -> Vec<Action> {
        let Some(pos) = self.pending_joins.iter().position(|d| *d == device) else {
            return Vec::new();
        };
        self.pending_joins.remove(pos);
        if accept {
            self.admit_member(device)
        } else {
            self.reject_join(ErrorCode::PermissionDenied)
        }
    }

    /// Admin removing a member.
    pub fn kick(&mut self, device: DeviceId) -> Vec<Action> {
        let Some(freq_id) = self.freq_id() else {
            return Vec::new();
        };
        if !self.is_admin() {
            return Vec::new();
        }
        self.members.retain(|m| m.id != device);
        let mut actions = vec![Action::Send {
            msg: MsgType::FreqKick,
            payload: FreqKick {
                freq_id,
                target_id: device,
            }
            .encode(),
            reliable: true,
        }];
        actions.extend(self.broadcast_members());
        actions
    }

    /// Invite a device to this frequency.
    pub fn invite(&self, device: DeviceId) -> Vec<Action> {
        let Some(freq_id) = self.freq_id() else {
            return Vec::new();
        };
        let _ = device; // invitations are broadcast; the target matches on id
        vec![Action::Send {
            msg: MsgType::FreqInvite,
            payload: FreqInvite {
                freq_id,
                inviter_id: self.local_id,
                inviter_name: self.device_name.clone(),
            }
            .encode(),
            // Broadcast: only the invited device would ack, so best-effort.
            reliable: false,
        }]
    }

    /// Mute or unmute the local microphone, notifying the peer.
    pub fn set_muted(&mut self, muted: bool) -> Vec<Action> {
        if self.muted == muted {
            return Vec::new();
        }
        self.muted = muted;
        if self.state() != SessionState::Connected {
            return Vec::new();
        }
        vec![Action::Send {
            msg: if muted { MsgType::Mute } else { MsgType::Unmute },
            payload: Vec::new(),
            reliable: false,
        }]
    }

    /// Signal the start or end of a local talk burst.
    pub fn set_talking(&mut self, talking: bool) -> Vec<Action> {
        if self.state() != SessionState::Connected || self.talking == talking {
            self.talking = talking && self.state() == SessionState::Connected;
            return Vec::new();
        }
        self.talking = talking;
        vec![Action::Send {
            msg: if talking {
                MsgType::VoiceStart
            } else {
                MsgType::VoiceEnd
            },
            payload: Vec::new(),
            reliable: false,
        }]
    }

    // -----------------------------------------------------------------------
    // Voice TX path
    // -----------------------------------------------------------------------

    /// Drain captured frames and emit voice packets.
    ///
    /// Voice leaves only from the audio-active slot while transmitting and
    /// not muted; otherwise captured frames are discarded. Each 20 ms
    /// capture frame goes out as [`WIRE_VOICE_BYTES`]-sized chunks so the
    /// packet size limit holds.
    pub fn pump_voice(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        while let Ok(frame) = self.tx_consumer.read() {
            if self.state() != SessionState::Connected
                || !self.audio_active
                || self.muted
                || !self.talking
            {
                continue;
            }

            for chunk in frame.audio().chunks(WIRE_VOICE_BYTES) {
                let sequence = self.tx_voice_seq;
                self.tx_voice_seq = self.tx_voice_seq.wrapping_add(1);

                let voice = VoiceFrame {
                    capture_timestamp: frame.timestamp_ms,
                    sequence,
                    codec: Codec::Pcm8k,
                    // PCM16 at 8 kHz: 16 bytes per millisecond.
                    frame_duration_ms: (chunk.len() / 16) as u8,
                    audio: chunk.to_vec(),
                };
                let Ok(body) = voice.encode() else {
                    trace!(slot = self.slot, "Voice frame too large for the wire");
                    continue;
                };

                let payload = if self.crypto.is_agreed() {
                    match self
                        .crypto
                        .seal(&body, &voice_aad(MsgType::VoiceData, self.local_id))
                    {
                        Ok(sealed) => sealed,
                        Err(e) => {
                            warn!(slot = self.slot, error = %e, "Voice seal failed");
                            continue;
                        }
                    }
                } else {
                    body
                };

                self.counters.voice_tx += 1;
                actions.push(Action::Send {
                    msg: MsgType::VoiceData,
                    payload,
                    reliable: false,
                });
            }
        }
        actions
    }

    // -----------------------------------------------------------------------
    // Inbound handling
    // -----------------------------------------------------------------------

    /// Feed one routed inbound message through the session.
    pub fn handle_inbound(
        &mut self,
        header: &PacketHeader,
        msg: MsgType,
        payload: &[u8],
        rssi: i16,
    ) -> Vec<Action> {
        self.last_activity = Instant::now();
        let src = header.src_id;

        match msg {
            MsgType::VoiceData => self.on_voice(src, payload),
            MsgType::VoiceStart | MsgType::VoiceEnd => {
                vec![Action::Event(EngineEvent::PeerTalking {
                    slot: self.slot,
                    talking: msg == MsgType::VoiceStart,
                })]
            }
            MsgType::VoiceSilence | MsgType::VoiceDtx => Vec::new(),

            MsgType::CallAccept => self.on_call_accept(),
            MsgType::CallReject => self.teardown_with(SessionError::Rejected("call rejected".into())),
            MsgType::CallEnd => self.teardown_with(SessionError::Rejected("peer ended".into())),
            MsgType::Goodbye => {
                if self.freq_id().is_some() {
                    if self.is_admin() {
                        self.on_member_left(src)
                    } else {
                        Vec::new()
                    }
                } else {
                    self.teardown_with(SessionError::Rejected("peer ended".into()))
                }
            }
            MsgType::CallHold | MsgType::CallResume => Vec::new(),

            MsgType::FreqJoinAccept => self.on_join_accept(payload),
            MsgType::FreqJoinReject => self.on_join_reject(payload),
            MsgType::FreqJoinRequest => self.on_join_request(src, payload, rssi),
            MsgType::FreqLeave => self.on_member_left(src),
            MsgType::FreqKick => self.on_kick(payload),
            MsgType::FreqClose => self.teardown_with(SessionError::FrequencyClosed),
            MsgType::FreqMemberList => self.on_member_list(payload),
            MsgType::FreqUpdate => self.on_freq_update(payload),
            MsgType::FreqAnnounce => self.on_announce(payload),

            MsgType::Mute | MsgType::Unmute => {
                self.set_member_muted(src, msg == MsgType::Mute);
                Vec::new()
            }
            MsgType::Heartbeat | MsgType::StatusUpdate | MsgType::QualityReport => Vec::new(),

            MsgType::KeyExchange => self.on_key_exchange(payload),
            MsgType::KeyConfirm => self.on_key_confirm(payload),
            MsgType::Rekey => self.start_handshake(),

            // Dispatcher-level traffic never reaches a session.
            MsgType::DiscoverRequest
            | MsgType::DiscoverResponse
            | MsgType::CallRequest
            | MsgType::FreqInvite
            | MsgType::Ping
            | MsgType::Pong
            | MsgType::Ack
            | MsgType::Nack
            | MsgType::RetransmitRequest
            | MsgType::ErrorReport => Vec::new(),
        }
    }

    fn teardown_with(&mut self, reason: SessionError) -> Vec<Action> {
        self.state.transition(SessionState::Idle);
        vec![
            Action::Event(EngineEvent::Ended {
                slot: self.slot,
                reason,
            }),
            Action::Teardown,
        ]
    }

    fn on_voice(&mut self, src: DeviceId, payload: &[u8]) -> Vec<Action> {
        if self.state() != SessionState::Connected {
            self.counters.voice_dropped_state += 1;
            return Vec::new();
        }

        let body = if self.crypto.is_agreed() {
            match self.open_voice(src, payload) {
                Ok(body) => body,
                Err(e) => {
                    self.counters.voice_drop_crypto += 1;
                    trace!(slot = self.slot, error = %e, "Dropped undecryptable voice");
                    return Vec::new();
                }
            }
        } else {
            payload.to_vec()
        };

        let Ok(voice) = VoiceFrame::decode(&body) else {
            self.counters.voice_drop_crypto += 1;
            return Vec::new();
        };

        let frame = AudioFrame::from_samples(&voice.audio, voice.sequence, voice.capture_timestamp);
        // A full ring drops the frame; overrun is recoverable.
        let _ = self.rx_producer.write_frame(&frame);
        self.counters.voice_rx += 1;
        Vec::new()
    }

    fn open_voice(&mut self, src: DeviceId, payload: &[u8]) -> crate::error::Result<Vec<u8>> {
        let aad = voice_aad(MsgType::VoiceData, src);

        let result = if self.freq_id().is_some() {
            let floor = self.member_floors.entry(src).or_insert(0);
            self.crypto.open_with_floor(payload, &aad, floor)
        } else {
            self.crypto.open(payload, &aad)
        };

        match result {
            Ok(body) => {
                // First packet under the new key retires the old epoch.
                self.prev_crypto = None;
                Ok(body)
            }
            Err(Error::Crypto(CryptoError::AuthFailed)) => {
                if let Some(prev) = self.prev_crypto.as_mut() {
                    prev.open(payload, &aad)
                } else {
                    Err(CryptoError::AuthFailed.into())
                }
            }
            Err(e) => Err(e),
        }
    }

    fn on_call_accept(&mut self) -> Vec<Action> {
        if self.state() != SessionState::Waiting {
            return Vec::new();
        }
        self.state.transition(SessionState::Connected);
        let mut actions = vec![Action::Event(EngineEvent::Connected {
            slot: self.slot,
            peer: self.peer_key(),
        })];
        if self.initiator {
            actions.extend(self.start_handshake());
        }
        actions
    }

    fn on_join_accept(&mut self, payload: &[u8]) -> Vec<Action> {
        if self.state() != SessionState::Waiting {
            return Vec::new();
        }
        let Ok(resp) = FreqJoinResponse::decode(payload) else {
            return Vec::new();
        };
        if !resp.accepted {
            return self.on_join_reject(payload);
        }
        if let Connection::Frequency(info) = &mut self.connection {
            info.member_count = resp.member_count;
        }
        self.state.transition(SessionState::Connected);
        vec![Action::Event(EngineEvent::Connected {
            slot: self.slot,
            peer: self.peer_key(),
        })]
    }

    fn on_join_reject(&mut self, payload: &[u8]) -> Vec<Action> {
        if self.state() != SessionState::Waiting {
            return Vec::new();
        }
        let reason = FreqJoinResponse::decode(payload)
            .map(|r| match r.reason {
                ErrorCode::WrongPassword => SessionError::WrongPassword,
                ErrorCode::FrequencyFull => SessionError::FrequencyFull,
                ErrorCode::FrequencyClosed => SessionError::FrequencyClosed,
                ErrorCode::PermissionDenied => SessionError::PermissionDenied,
                _ => SessionError::Rejected("join rejected".into()),
            })
            .unwrap_or(SessionError::Rejected("join rejected".into()));

        self.state.transition(SessionState::Idle);
        vec![
            Action::Event(EngineEvent::Rejected {
                slot: self.slot,
                reason,
            }),
            Action::Teardown,
        ]
    }

    fn on_join_request(&mut self, src: DeviceId, payload: &[u8], rssi: i16) -> Vec<Action> {
        if !self.is_admin() || self.state() != SessionState::Connected {
            return Vec::new();
        }
        let Some(freq_id) = self.freq_id() else {
            return Vec::new();
        };
        let Ok(req) = FreqJoinRequest::decode(payload) else {
            return Vec::new();
        };
        if req.freq_id != freq_id {
            return Vec::new();
        }

        if self.members.len() >= MAX_FREQ_MEMBERS {
            return self.reject_join(ErrorCode::FrequencyFull);
        }

        let protection = match &self.connection {
            Connection::Frequency(info) => info.protection,
            Connection::Call(_) => return Vec::new(),
        };

        if protection.wants_password() {
            let supplied = req.password.unwrap_or_default();
            let expected = self.password.clone().unwrap_or_default();
            if !secure_compare(supplied.as_bytes(), expected.as_bytes()) {
                return self.reject_join(ErrorCode::WrongPassword);
            }
        }

        if protection.wants_approval() {
            if !self.pending_joins.contains(&src) {
                self.pending_joins.push(src);
            }
            return vec![Action::Event(EngineEvent::JoinPending {
                slot: self.slot,
                freq: freq_id,
                from: src,
            })];
        }

        let _ = rssi;
        self.admit_member(src)
    }

    fn admit_member(&mut self, device: DeviceId) -> Vec<Action> {
        let Some(freq_id) = self.freq_id() else {
            return Vec::new();
        };
        if !self.members.iter().any(|m| m.id == device) {
            self.members.push(MemberInfo {
                id: device,
                name: String::new(),
                is_admin: false,
                is_muted: false,
                signal_dbm: 0,
            });
        }
        if let Connection::Frequency(info) = &mut self.connection {
            info.member_count = self.members.len() as u8;
        }

        let mut actions = vec![Action::Send {
            msg: MsgType::FreqJoinAccept,
            payload: FreqJoinResponse {
                freq_id,
                accepted: true,
                member_count: self.members.len() as u8,
                admin_id: self.local_id,
                reason: ErrorCode::None,
            }
            .encode(),
            reliable: true,
        }];
        actions.extend(self.broadcast_members());
        actions
    }

    fn reject_join(&self, reason: ErrorCode) -> Vec<Action> {
        let Some(freq_id) = self.freq_id() else {
            return Vec::new();
        };
        vec![Action::Send {
            msg: MsgType::FreqJoinReject,
            payload: FreqJoinResponse {
                freq_id,
                accepted: false,
                member_count: self.members.len() as u8,
                admin_id: self.local_id,
                reason,
            }
            .encode(),
            reliable: true,
        }]
    }

    fn broadcast_members(&self) -> Vec<Action> {
        let Some(freq_id) = self.freq_id() else {
            return Vec::new();
        };
        vec![
            Action::Send {
                msg: MsgType::FreqMemberList,
                payload: MemberList {
                    freq_id,
                    members: self.members.clone(),
                }
                .encode(),
                reliable: false,
            },
            Action::Event(EngineEvent::MemberList {
                slot: self.slot,
                freq: freq_id,
                members: self.members.clone(),
            }),
        ]
    }

    fn on_member_left(&mut self, src: DeviceId) -> Vec<Action> {
        if !self.is_admin() {
            return Vec::new();
        }
        self.members.retain(|m| m.id != src);
        self.member_floors.remove(&src);
        if let Connection::Frequency(info) = &mut self.connection {
            info.member_count = self.members.len() as u8;
        }
        self.broadcast_members()
    }

    fn on_kick(&mut self, payload: &[u8]) -> Vec<Action> {
        let Ok(kick) = FreqKick::decode(payload) else {
            return Vec::new();
        };
        if kick.target_id == self.local_id {
            return self.teardown_with(SessionError::PermissionDenied);
        }
        self.members.retain(|m| m.id != kick.target_id);
        Vec::new()
    }

    fn on_member_list(&mut self, payload: &[u8]) -> Vec<Action> {
        let Ok(list) = MemberList::decode(payload) else {
            return Vec::new();
        };
        if Some(list.freq_id) != self.freq_id() {
            return Vec::new();
        }
        self.members = list.members.clone();
        if let Connection::Frequency(info) = &mut self.connection {
            info.member_count = list.members.len() as u8;
        }
        vec![Action::Event(EngineEvent::MemberList {
            slot: self.slot,
            freq: list.freq_id,
            members: list.members,
        })]
    }

    fn on_freq_update(&mut self, payload: &[u8]) -> Vec<Action> {
        let Ok(update) = FreqAnnounce::decode(payload) else {
            return Vec::new();
        };
        if let Connection::Frequency(info) = &mut self.connection {
            if info.id == update.freq_id {
                info.member_count = update.member_count;
                info.protection = update.protection;
                info.freq_type = update.freq_type;
            }
        }
        Vec::new()
    }

    fn on_announce(&mut self, payload: &[u8]) -> Vec<Action> {
        // Collision tie-break: an announcement of our own frequency id with
        // an earlier creation time wins precedence.
        let Ok(announce) = FreqAnnounce::decode(payload) else {
            return Vec::new();
        };
        if !self.is_admin() || Some(announce.freq_id) != self.freq_id() {
            return Vec::new();
        }
        if announce.created_at_ms < self.created_at_ms {
            return vec![Action::Event(EngineEvent::FrequencyCollision {
                slot: self.slot,
                freq: announce.freq_id,
                earlier_created_ms: announce.created_at_ms,
            })];
        }
        Vec::new()
    }

    fn set_member_muted(&mut self, src: DeviceId, muted: bool) {
        if let Some(member) = self.members.iter_mut().find(|m| m.id == src) {
            member.is_muted = muted;
        }
    }

    fn on_key_exchange(&mut self, payload: &[u8]) -> Vec<Action> {
        let Ok(offer) = KeyExchange::decode(payload) else {
            return Vec::new();
        };
        let peer_public = crate::crypto::PublicKey::from_bytes(offer.public_key);

        if let Some(keypair) = self.pending_keypair.take() {
            // We initiated: the peer answered with its public key.
            let Ok(shared) = keypair.secret.diffie_hellman(&peer_public) else {
                warn!(slot = self.slot, "Peer sent a low-order key, handshake aborted");
                return Vec::new();
            };
            self.retire_current_key();
            self.crypto.agree_from_shared(&shared, Some(&self.pending_salt));
            return vec![
                Action::Send {
                    msg: MsgType::KeyConfirm,
                    payload: KeyConfirm {
                        key_id: self.crypto.key_id(),
                    }
                    .encode(),
                    reliable: true,
                },
                Action::Event(EngineEvent::KeyRefreshed {
                    slot: self.slot,
                    key_id: self.crypto.key_id(),
                }),
            ];
        }

        // Peer initiated: answer with our ephemeral public key.
        let keypair = KeyPair::generate();
        let Ok(shared) = keypair.secret.diffie_hellman(&peer_public) else {
            warn!(slot = self.slot, "Rejected low-order peer key");
            return Vec::new();
        };
        self.retire_current_key();
        self.crypto.agree_from_shared(&shared, Some(&offer.salt));

        vec![
            Action::Send {
                msg: MsgType::KeyExchange,
                payload: KeyExchange {
                    public_key: *keypair.public.as_bytes(),
                    salt: offer.salt,
                    key_id: self.crypto.key_id(),
                }
                .encode(),
                reliable: true,
            },
            Action::Event(EngineEvent::KeyRefreshed {
                slot: self.slot,
                key_id: self.crypto.key_id(),
            }),
        ]
    }

    fn retire_current_key(&mut self) {
        if self.crypto.is_agreed() {
            let fresh = CryptoContext::new(self.key_policy.clone());
            self.prev_crypto = Some(std::mem::replace(&mut self.crypto, fresh));
        }
    }

    fn on_key_confirm(&mut self, payload: &[u8]) -> Vec<Action> {
        if let Ok(confirm) = KeyConfirm::decode(payload) {
            if confirm.key_id != self.crypto.key_id() {
                debug!(
                    slot = self.slot,
                    got = confirm.key_id,
                    have = self.crypto.key_id(),
                    "Key confirm for a different epoch"
                );
            }
        }
        Vec::new()
    }
}

/// AAD binding sealed payloads to their message type and sender.
pub fn voice_aad(msg: MsgType, src: DeviceId) -> [u8; 1 + ID_LENGTH] {
    let mut aad = [0u8; 1 + ID_LENGTH];
    aad[0] = msg as u8;
    aad[1..].copy_from_slice(src.as_bytes());
    aad
}
