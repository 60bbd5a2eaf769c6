//! Protocol dispatcher: single inbound routing path, single serialized
//! outbound send path, ACK bookkeeping for reliable control messages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::config::RetryConfig;
use crate::error::{Error, FramingError, Result};
use crate::events::EngineEvent;
use crate::protocol::{
    self, Ack, CallRequest, DiscoverRequest, DiscoverResponse, FreqAnnounce, FreqInvite,
    FreqJoinRequest, FreqKick, MemberList, MsgType, PacketHeader,
};
use crate::transport::{RadioTransport, RxFrame};
use crate::types::{
    DeviceId, FrequencyId, FrequencyProtection, FrequencyType, PeerKey, ScanResult,
};

/// Bound on the scan-results snapshot.
pub const MAX_SCAN_RESULTS: usize = 20;

/// One parsed message routed to a session worker.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub header: PacketHeader,
    pub msg: MsgType,
    pub payload: Vec<u8>,
    pub rssi: i16,
}

/// Announcement data for a frequency this device administers.
#[derive(Debug, Clone)]
pub struct FreqDescriptor {
    pub freq_id: FrequencyId,
    pub freq_type: FrequencyType,
    pub protection: FrequencyProtection,
    pub member_count: u8,
    pub created_at_ms: u64,
}

/// Routing entry for one live session.
#[derive(Clone)]
pub struct SessionRoute {
    pub slot: usize,
    pub tx: mpsc::Sender<Inbound>,
    /// Present for admin frequency sessions; drives discovery announces.
    pub descriptor: Option<FreqDescriptor>,
}

/// Maps peers and frequency members to session workers.
#[derive(Default)]
pub struct Registry {
    routes: RwLock<HashMap<PeerKey, SessionRoute>>,
    /// Frequency members by device id, so voice from any member reaches the
    /// owning frequency session.
    members: RwLock<HashMap<DeviceId, PeerKey>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer: PeerKey, route: SessionRoute) {
        self.routes.write().insert(peer, route);
    }

    pub fn unregister(&self, peer: &PeerKey) {
        self.routes.write().remove(peer);
        self.members.write().retain(|_, v| v != peer);
    }

    pub fn route(&self, peer: &PeerKey) -> Option<mpsc::Sender<Inbound>> {
        self.routes.read().get(peer).map(|r| r.tx.clone())
    }

    pub fn slot_of(&self, peer: &PeerKey) -> Option<usize> {
        self.routes.read().get(peer).map(|r| r.slot)
    }

    /// Route for a device: a direct call session, or the frequency session
    /// this device is a member of.
    pub fn route_for_device(&self, device: DeviceId) -> Option<mpsc::Sender<Inbound>> {
        if let Some(tx) = self.route(&PeerKey::Device(device)) {
            return Some(tx);
        }
        let peer = self.members.read().get(&device).copied()?;
        self.route(&peer)
    }

    /// Replace the member index for a frequency session.
    pub fn set_members(&self, freq: PeerKey, devices: &[DeviceId]) {
        let mut members = self.members.write();
        members.retain(|_, v| *v != freq);
        for d in devices {
            members.insert(*d, freq);
        }
    }

    /// Update announce data after membership changes.
    pub fn update_descriptor(&self, peer: &PeerKey, member_count: u8) {
        if let Some(route) = self.routes.write().get_mut(peer) {
            if let Some(desc) = route.descriptor.as_mut() {
                desc.member_count = member_count;
            }
        }
    }

    /// Descriptors of visible frequencies we administer.
    pub fn visible_descriptors(&self) -> Vec<FreqDescriptor> {
        self.routes
            .read()
            .values()
            .filter_map(|r| r.descriptor.clone())
            .filter(|d| d.freq_type == FrequencyType::Visible)
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.routes.read().len()
    }
}

/// Monotonic protocol counters.
#[derive(Default)]
pub struct ProtocolCounters {
    pub packets_rx: AtomicU64,
    pub packets_tx: AtomicU64,
    pub invalid_packets: AtomicU64,
    pub crc_failures: AtomicU64,
    pub unknown_types: AtomicU64,
    pub dropped_voice: AtomicU64,
    pub acks_matched: AtomicU64,
    pub acks_expired: AtomicU64,
    pub channel_busy: AtomicU64,
}

/// Snapshot of [`ProtocolCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolStats {
    pub packets_rx: u64,
    pub packets_tx: u64,
    pub invalid_packets: u64,
    pub crc_failures: u64,
    pub unknown_types: u64,
    pub dropped_voice: u64,
    pub acks_matched: u64,
    pub acks_expired: u64,
    pub channel_busy: u64,
}

impl ProtocolCounters {
    pub fn snapshot(&self) -> ProtocolStats {
        ProtocolStats {
            packets_rx: self.packets_rx.load(Ordering::Relaxed),
            packets_tx: self.packets_tx.load(Ordering::Relaxed),
            invalid_packets: self.invalid_packets.load(Ordering::Relaxed),
            crc_failures: self.crc_failures.load(Ordering::Relaxed),
            unknown_types: self.unknown_types.load(Ordering::Relaxed),
            dropped_voice: self.dropped_voice.load(Ordering::Relaxed),
            acks_matched: self.acks_matched.load(Ordering::Relaxed),
            acks_expired: self.acks_expired.load(Ordering::Relaxed),
            channel_busy: self.channel_busy.load(Ordering::Relaxed),
        }
    }
}

type PendingAcks = Arc<Mutex<HashMap<(u8, u16), oneshot::Sender<()>>>>;

/// The single outbound path. Cloneable; transmits are serialized by an
/// internal mutex and atomic at frame granularity.
#[derive(Clone)]
pub struct SendHandle {
    radio: Arc<dyn RadioTransport>,
    tx_lock: Arc<tokio::sync::Mutex<()>>,
    local_id: DeviceId,
    retry: RetryConfig,
    pending: PendingAcks,
    events: broadcast::Sender<EngineEvent>,
    counters: Arc<ProtocolCounters>,
}

impl SendHandle {
    pub fn new(
        radio: Arc<dyn RadioTransport>,
        local_id: DeviceId,
        retry: RetryConfig,
        events: broadcast::Sender<EngineEvent>,
        counters: Arc<ProtocolCounters>,
    ) -> Self {
        Self {
            radio,
            tx_lock: Arc::new(tokio::sync::Mutex::new(())),
            local_id,
            retry,
            pending: Arc::new(Mutex::new(HashMap::new())),
            events,
            counters,
        }
    }

    pub fn local_id(&self) -> DeviceId {
        self.local_id
    }

    async fn send_frame(&self, frame: &[u8]) -> Result<()> {
        let _guard = self.tx_lock.lock().await;
        self.radio.send(frame).await?;
        self.counters.packets_tx.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Fire-and-forget send.
    pub async fn send(&self, msg: MsgType, payload: &[u8]) -> Result<()> {
        let frame = protocol::build(msg, self.local_id, payload)?;
        self.send_frame(&frame).await
    }

    /// Voice send: consults the channel-activity advisory, then transmits
    /// best-effort. No ACK, no retransmit.
    pub async fn send_voice(&self, msg: MsgType, payload: &[u8]) -> Result<()> {
        if !self.radio.channel_is_free() {
            self.counters.channel_busy.fetch_add(1, Ordering::Relaxed);
        }
        self.send(msg, payload).await
    }

    /// Reliable send: retransmits with exponential backoff until an ACK for
    /// this packet's (type, checksum) arrives, then gives up.
    ///
    /// On give-up, `slot` (when known) surfaces a `LinkLost` event.
    pub async fn send_reliable(
        &self,
        msg: MsgType,
        payload: &[u8],
        slot: Option<usize>,
    ) -> Result<()> {
        let frame = protocol::build(msg, self.local_id, payload)?;
        let (header, _) = protocol::parse(&frame)?;
        let key = (header.msg_type_raw, header.checksum);

        let (ack_tx, mut ack_rx) = oneshot::channel();
        self.pending.lock().insert(key, ack_tx);

        self.send_frame(&frame).await?;

        let this = self.clone();
        tokio::spawn(async move {
            for attempt in 0..this.retry.attempts {
                let delay = this.retry.base_delay * 2u32.pow(attempt);
                tokio::select! {
                    _ = &mut ack_rx => {
                        this.counters.acks_matched.fetch_add(1, Ordering::Relaxed);
                        trace!(msg = ?msg, "Reliable send acknowledged");
                        return;
                    }
                    () = tokio::time::sleep(delay) => {}
                }

                if attempt + 1 < this.retry.attempts {
                    debug!(msg = ?msg, attempt = attempt + 1, "Retransmitting");
                    if this.send_frame(&frame).await.is_err() {
                        break;
                    }
                }
            }

            this.pending.lock().remove(&key);
            this.counters.acks_expired.fetch_add(1, Ordering::Relaxed);
            warn!(msg = ?msg, "Reliable send gave up");
            if let Some(slot) = slot {
                let _ = this.events.send(EngineEvent::LinkLost { slot });
            }
        });

        Ok(())
    }

    /// Complete a pending reliable send.
    fn complete_ack(&self, ack: &Ack) {
        let key = (ack.acked_type, ack.acked_checksum);
        if let Some(waiter) = self.pending.lock().remove(&key) {
            let _ = waiter.send(());
        }
    }
}

/// Unsolicited requests the engine must bind to a dial slot.
#[derive(Debug, Clone)]
pub enum Unsolicited {
    Call { from: DeviceId, rssi: i16 },
}

/// Inbound router.
pub struct Dispatcher {
    local_id: DeviceId,
    device_name: String,
    visible: AtomicBool,
    send: SendHandle,
    registry: Arc<Registry>,
    events: broadcast::Sender<EngineEvent>,
    scan: Mutex<Vec<ScanResult>>,
    counters: Arc<ProtocolCounters>,
    incoming_tx: mpsc::Sender<Unsolicited>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_id: DeviceId,
        device_name: String,
        visible: bool,
        send: SendHandle,
        registry: Arc<Registry>,
        events: broadcast::Sender<EngineEvent>,
        counters: Arc<ProtocolCounters>,
        incoming_tx: mpsc::Sender<Unsolicited>,
    ) -> Self {
        Self {
            local_id,
            device_name,
            visible: AtomicBool::new(visible),
            send,
            registry,
            events,
            scan: Mutex::new(Vec::new()),
            counters,
            incoming_tx,
        }
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Relaxed);
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ProtocolStats {
        self.counters.snapshot()
    }

    /// Current scan-results snapshot.
    pub fn scan_results(&self) -> Vec<ScanResult> {
        self.scan.lock().clone()
    }

    pub fn clear_scan_results(&self) {
        self.scan.lock().clear();
    }

    /// Consume radio frames until the channel closes.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<RxFrame>) {
        while let Some(frame) = rx.recv().await {
            self.handle_frame(frame).await;
        }
        debug!("Dispatcher RX channel closed");
    }

    async fn handle_frame(&self, frame: RxFrame) {
        let (header, payload) = match protocol::parse(&frame.bytes) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.counters.invalid_packets.fetch_add(1, Ordering::Relaxed);
                if matches!(e, Error::Framing(FramingError::CrcMismatch { .. })) {
                    self.counters.crc_failures.fetch_add(1, Ordering::Relaxed);
                }
                trace!(error = %e, "Dropped invalid packet");
                return;
            }
        };

        // Everything on the channel is heard by everyone; skip our own TX.
        if header.src_id == self.local_id {
            return;
        }
        self.counters.packets_rx.fetch_add(1, Ordering::Relaxed);

        let Some(msg) = header.msg_type() else {
            self.counters.unknown_types.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let payload = payload.to_vec();
        self.route(header, msg, payload, frame.rssi).await;
    }

    async fn route(&self, header: PacketHeader, msg: MsgType, payload: Vec<u8>, rssi: i16) {
        let src = header.src_id;

        match msg {
            MsgType::Ack => {
                if let Ok(ack) = Ack::decode(&payload) {
                    self.send.complete_ack(&ack);
                }
            }

            MsgType::Ping => {
                let _ = self.send.send(MsgType::Pong, src.as_bytes()).await;
            }
            MsgType::Pong | MsgType::Nack | MsgType::RetransmitRequest => {}

            MsgType::DiscoverRequest => self.answer_discovery(&payload).await,

            MsgType::DiscoverResponse => {
                if let Ok(resp) = DiscoverResponse::decode(&payload) {
                    self.push_scan_result(resp.into_scan_result(rssi as i8));
                }
            }

            MsgType::FreqAnnounce => {
                if let Ok(announce) = FreqAnnounce::decode(&payload) {
                    self.push_scan_result(ScanResult::Frequency(crate::types::FrequencyInfo {
                        id: announce.freq_id,
                        freq_type: announce.freq_type,
                        protection: announce.protection,
                        member_count: announce.member_count,
                        signal_dbm: rssi as i8,
                    }));
                    // Collision check for frequencies we administer.
                    let peer = PeerKey::Frequency(announce.freq_id);
                    self.forward(&peer, header, msg, payload, rssi).await;
                }
            }

            MsgType::FreqInvite => {
                if let Ok(invite) = FreqInvite::decode(&payload) {
                    let _ = self.events.send(EngineEvent::Invited {
                        freq: invite.freq_id,
                        inviter: invite.inviter_id,
                        inviter_name: invite.inviter_name,
                    });
                    self.ack_if_required(&header, msg).await;
                }
            }

            MsgType::CallRequest => {
                let Ok(req) = CallRequest::decode(&payload) else {
                    return;
                };
                if req.target_id != self.local_id {
                    return;
                }
                self.ack_if_required(&header, msg).await;

                let peer = PeerKey::Device(src);
                if let Some(tx) = self.registry.route(&peer) {
                    // Duplicate of a request we are already handling.
                    let _ = tx
                        .send(Inbound {
                            header,
                            msg,
                            payload,
                            rssi,
                        })
                        .await;
                } else if let Err(e) = self
                    .incoming_tx
                    .send(Unsolicited::Call { from: src, rssi })
                    .await
                {
                    warn!(error = %e, "Incoming-call channel closed");
                }
            }

            MsgType::CallAccept | MsgType::CallReject => {
                // Responses are addressed: the payload echoes the caller id.
                if payload.len() >= crate::types::ID_LENGTH
                    && payload[..crate::types::ID_LENGTH] != self.local_id.as_bytes()[..]
                {
                    return;
                }
                self.route_device(src, header, msg, payload, rssi).await;
            }

            MsgType::FreqJoinRequest => {
                let Ok(req) = FreqJoinRequest::decode(&payload) else {
                    return;
                };
                let peer = PeerKey::Frequency(req.freq_id);
                if self.registry.route(&peer).is_some() {
                    self.ack_if_required(&header, msg).await;
                    self.forward(&peer, header, msg, payload, rssi).await;
                }
            }

            MsgType::FreqJoinAccept
            | MsgType::FreqJoinReject
            | MsgType::FreqLeave
            | MsgType::FreqClose
            | MsgType::FreqUpdate => {
                // These carry the frequency id first in the payload.
                if payload.len() < crate::types::ID_LENGTH {
                    return;
                }
                let mut id = [0u8; crate::types::ID_LENGTH];
                id.copy_from_slice(&payload[..crate::types::ID_LENGTH]);
                let peer = PeerKey::Frequency(FrequencyId::from_wire(id));
                if self.registry.route(&peer).is_some() {
                    self.ack_if_required(&header, msg).await;
                    self.forward(&peer, header, msg, payload, rssi).await;
                }
            }

            MsgType::FreqKick => {
                let Ok(kick) = FreqKick::decode(&payload) else {
                    return;
                };
                let peer = PeerKey::Frequency(kick.freq_id);
                if self.registry.route(&peer).is_some() {
                    self.ack_if_required(&header, msg).await;
                    self.forward(&peer, header, msg, payload, rssi).await;
                }
            }

            MsgType::FreqMemberList => {
                if let Ok(list) = MemberList::decode(&payload) {
                    let peer = PeerKey::Frequency(list.freq_id);
                    self.forward(&peer, header, msg, payload, rssi).await;
                }
            }

            MsgType::VoiceData
            | MsgType::VoiceStart
            | MsgType::VoiceEnd
            | MsgType::VoiceSilence
            | MsgType::VoiceDtx => {
                if let Some(tx) = self.registry.route_for_device(src) {
                    let _ = tx
                        .send(Inbound {
                            header,
                            msg,
                            payload,
                            rssi,
                        })
                        .await;
                } else {
                    self.counters.dropped_voice.fetch_add(1, Ordering::Relaxed);
                }
            }

            MsgType::CallEnd
            | MsgType::CallHold
            | MsgType::CallResume
            | MsgType::Heartbeat
            | MsgType::Goodbye
            | MsgType::Mute
            | MsgType::Unmute
            | MsgType::StatusUpdate
            | MsgType::QualityReport
            | MsgType::ErrorReport
            | MsgType::KeyExchange
            | MsgType::KeyConfirm
            | MsgType::Rekey => {
                self.route_device(src, header, msg, payload, rssi).await;
            }
        }
    }

    /// Route a device-addressed message to its call session or owning
    /// frequency session.
    async fn route_device(
        &self,
        src: DeviceId,
        header: PacketHeader,
        msg: MsgType,
        payload: Vec<u8>,
        rssi: i16,
    ) {
        if let Some(tx) = self.registry.route_for_device(src) {
            self.ack_if_required(&header, msg).await;
            let _ = tx
                .send(Inbound {
                    header,
                    msg,
                    payload,
                    rssi,
                })
                .await;
        }
    }

    async fn forward(
        &self,
        peer: &PeerKey,
        header: PacketHeader,
        msg: MsgType,
        payload: Vec<u8>,
        rssi: i16,
    ) {
        if let Some(tx) = self.registry.route(peer) {
            let _ = tx
                .send(Inbound {
                    header,
                    msg,
                    payload,
                    rssi,
                })
                .await;
        }
    }

    async fn ack_if_required(&self, header: &PacketHeader, msg: MsgType) {
        if !msg.requires_ack() {
            return;
        }
        let ack = Ack {
            acked_type: header.msg_type_raw,
            acked_checksum: header.checksum,
        };
        let _ = self.send.send(MsgType::Ack, &ack.encode()).await;
    }

    async fn answer_discovery(&self, payload: &[u8]) {
        if !self.is_visible() {
            return;
        }
        let request = DiscoverRequest::decode(payload).unwrap_or(DiscoverRequest {
            include_frequencies: true,
            include_devices: true,
        });

        if request.include_devices {
            let response = DiscoverResponse::Device {
                id: self.local_id,
                name: self.device_name.clone(),
                available: true,
            };
            let _ = self
                .send
                .send(MsgType::DiscoverResponse, &response.encode())
                .await;
        }

        if request.include_frequencies {
            for desc in self.registry.visible_descriptors() {
                let announce = FreqAnnounce {
                    freq_id: desc.freq_id,
                    freq_type: desc.freq_type,
                    protection: desc.protection,
                    member_count: desc.member_count,
                    created_at_ms: desc.created_at_ms,
                };
                let _ = self
                    .send
                    .send(MsgType::FreqAnnounce, &announce.encode())
                    .await;
            }
        }
    }

    fn push_scan_result(&self, result: ScanResult) {
        let mut scan = self.scan.lock();

        // Replace an existing entry for the same peer.
        let same = |entry: &ScanResult| match (entry, &result) {
            (ScanResult::Device(a), ScanResult::Device(b)) => a.id == b.id,
            (ScanResult::Frequency(a), ScanResult::Frequency(b)) => a.id == b.id,
            _ => false,
        };
        if let Some(pos) = scan.iter().position(same) {
            scan[pos] = result.clone();
        } else if scan.len() < MAX_SCAN_RESULTS {
            scan.push(result.clone());
        } else {
            return;
        }
        drop(scan);

        let _ = self.events.send(EngineEvent::ScanResult(result));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_member_routing() {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::channel(4);
        let freq: FrequencyId = "12121212".parse().unwrap();
        let peer = PeerKey::Frequency(freq);

        registry.register(
            peer,
            SessionRoute {
                slot: 3,
                tx,
                descriptor: None,
            },
        );
        let member: DeviceId = "34343434".parse().unwrap();
        registry.set_members(peer, &[member]);

        assert!(registry.route_for_device(member).is_some());
        assert_eq!(registry.slot_of(&peer), Some(3));

        registry.unregister(&peer);
        assert!(registry.route_for_device(member).is_none());
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_visible_descriptors_filter() {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::channel(4);
        registry.register(
            PeerKey::Frequency("11110000".parse().unwrap()),
            SessionRoute {
                slot: 0,
                tx: tx.clone(),
                descriptor: Some(FreqDescriptor {
                    freq_id: "11110000".parse().unwrap(),
                    freq_type: FrequencyType::Visible,
                    protection: FrequencyProtection::None,
                    member_count: 1,
                    created_at_ms: 5,
                }),
            },
        );
        registry.register(
            PeerKey::Frequency("22220000".parse().unwrap()),
            SessionRoute {
                slot: 1,
                tx,
                descriptor: Some(FreqDescriptor {
                    freq_id: "22220000".parse().unwrap(),
                    freq_type: FrequencyType::Hidden,
                    protection: FrequencyProtection::None,
                    member_count: 1,
                    created_at_ms: 6,
                }),
            },
        );

        let visible = registry.visible_descriptors();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].freq_id.as_str(), "11110000");
    }
}
