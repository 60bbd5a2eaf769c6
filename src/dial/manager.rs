//! The 15-position dial manager.
//!
//! Owns the slot array and cursor. All composite mutation happens under one
//! manager-level mutex; worker lifecycle transitions go through the same
//! lock from the worker tasks.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::audio::{AudioHal, AudioRing};
use crate::config::EngineConfig;
use crate::dispatcher::{FreqDescriptor, Registry, SendHandle, SessionRoute};
use crate::error::{DialError, Error, Result};
use crate::events::EngineEvent;
use crate::protocol::MsgType;
use crate::session::{self, Session, SessionCommand, StartMode, WorkerContext};
use crate::storage::Storage;
use crate::types::{
    Connection, ConnectionKind, DeviceId, DeviceInfo, FrequencyId, FrequencyInfo,
    FrequencyProtection, FrequencyType, SessionRole,
};

use super::slot::{
    DialState, HalAudio, SlotConfig, SlotSnapshot, SlotState, WorkerHandle, DIAL_POSITIONS,
    MAX_DIAL_WORKERS,
};

/// Capacity of a worker's command channel.
const CMD_CHANNEL: usize = 16;

/// Capacity of a worker's inbound packet channel.
const INBOUND_CHANNEL: usize = 64;

pub struct DialManager {
    state: Arc<Mutex<DialState>>,
    local_id: DeviceId,
    config: Arc<EngineConfig>,
    send: SendHandle,
    registry: Arc<Registry>,
    events: broadcast::Sender<EngineEvent>,
    storage: Arc<dyn Storage>,
    hal: Arc<dyn AudioHal>,
}

impl DialManager {
    pub fn new(
        local_id: DeviceId,
        config: Arc<EngineConfig>,
        send: SendHandle,
        registry: Arc<Registry>,
        events: broadcast::Sender<EngineEvent>,
        storage: Arc<dyn Storage>,
        hal: Arc<dyn AudioHal>,
    ) -> Self {
        let manager = Self {
            state: Arc::new(Mutex::new(DialState::new())),
            local_id,
            config,
            send,
            registry,
            events,
            storage,
            hal,
        };
        manager.rehydrate();
        manager
    }

    /// Load saved slot metadata. Runtime state starts fresh; nothing
    /// reconnects automatically.
    fn rehydrate(&self) {
        let persisted = match self.storage.load() {
            Ok(state) => state.slots,
            Err(e) => {
                warn!(error = %e, "Could not load saved slots");
                return;
            }
        };

        let mut state = self.state.lock();
        let mut loaded = 0;
        for saved in persisted {
            if saved.position < DIAL_POSITIONS {
                state.slots[saved.position].config = Some(saved.config);
                state.slots[saved.position].state = SlotState::Saved;
                loaded += 1;
            }
        }
        if loaded > 0 {
            info!(loaded, "Rehydrated saved dial slots");
        }
    }

    fn persist(&self) -> Result<()> {
        let mut persisted = self.storage.load()?;
        {
            let state = self.state.lock();
            for (i, slot) in state.slots.iter().enumerate() {
                persisted.set_slot(i, slot.config.clone());
            }
        }
        self.storage.save(&persisted)
    }

    fn check_position(position: usize) -> Result<()> {
        if position >= DIAL_POSITIONS {
            return Err(DialError::InvalidPosition(position).into());
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Cursor
    // -----------------------------------------------------------------------

    pub fn position(&self) -> usize {
        self.state.lock().position
    }

    /// Move the cursor with wraparound. Audio focus follows onto connected
    /// slots.
    pub async fn rotate(&self, direction: i32) -> usize {
        let new_pos = {
            let state = self.state.lock();
            let len = DIAL_POSITIONS as i32;
            ((state.position as i32 + direction).rem_euclid(len)) as usize
        };
        let _ = self.set_position(new_pos).await;
        new_pos
    }

    pub async fn set_position(&self, position: usize) -> Result<()> {
        Self::check_position(position)?;
        let connected = {
            let mut state = self.state.lock();
            state.position = position;
            state.slots[position].state == SlotState::Connected
        };
        debug!(position, "Dial position changed");
        if connected {
            self.set_active_audio(position).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Slot configuration
    // -----------------------------------------------------------------------

    /// Save a code into a slot, tearing down any session it holds.
    pub async fn save(
        &self,
        position: usize,
        kind: ConnectionKind,
        code: &str,
        name: &str,
        password: Option<String>,
    ) -> Result<()> {
        Self::check_position(position)?;
        if !crate::types::DeviceId::validate_format(code) {
            return Err(Error::Config(format!("not an 8-digit code: {code:?}")));
        }

        self.disconnect(position).await?;

        {
            let mut state = self.state.lock();
            let slot = &mut state.slots[position];
            slot.config = Some(SlotConfig {
                kind,
                code: code.to_string(),
                name: if name.is_empty() {
                    format!("Slot {}", position + 1)
                } else {
                    name.to_string()
                },
                password,
            });
            slot.state = SlotState::Saved;
        }
        info!(position, code, ?kind, "Saved slot");
        self.persist()
    }

    /// Clear a slot, tearing down any session it holds.
    pub async fn clear(&self, position: usize) -> Result<()> {
        Self::check_position(position)?;
        self.disconnect(position).await?;
        {
            let mut state = self.state.lock();
            let slot = &mut state.slots[position];
            slot.config = None;
            slot.state = SlotState::Empty;
            slot.muted = false;
            slot.is_admin = false;
            slot.member_count = 0;
        }
        info!(position, "Cleared slot");
        self.persist()
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Connect the saved code at `position` by spawning its worker.
    pub async fn connect(&self, position: usize) -> Result<()> {
        Self::check_position(position)?;

        let (connection, password) = {
            let state = self.state.lock();
            let slot = &state.slots[position];

            let Some(config) = slot.config.as_ref() else {
                return Err(DialError::SlotUnconfigured(position).into());
            };
            if slot.state == SlotState::Connected {
                return Ok(());
            }
            if slot.worker.is_some() || state.active_workers >= MAX_DIAL_WORKERS {
                if state.active_workers >= MAX_DIAL_WORKERS {
                    return Err(DialError::SlotLimitReached.into());
                }
                // A worker is already establishing this slot.
                return Ok(());
            }

            let connection = match config.kind {
                ConnectionKind::Device => Connection::Call(DeviceInfo {
                    id: config.code.parse()?,
                    name: config.name.clone(),
                    signal_dbm: 0,
                    available: true,
                }),
                ConnectionKind::Frequency => Connection::Frequency(FrequencyInfo {
                    id: config.code.parse()?,
                    freq_type: FrequencyType::Visible,
                    protection: if config.password.is_some() {
                        FrequencyProtection::Password
                    } else {
                        FrequencyProtection::None
                    },
                    member_count: 0,
                    signal_dbm: 0,
                }),
            };
            (connection, config.password.clone())
        };

        self.spawn_worker(
            position,
            StartMode::Outbound,
            connection,
            SessionRole::Client,
            true,
            password,
        )
    }

    /// Create a frequency with a fresh random id; this device is its admin.
    pub async fn create_frequency(
        &self,
        position: usize,
        name: &str,
        freq_type: FrequencyType,
        protection: FrequencyProtection,
        password: Option<String>,
    ) -> Result<FrequencyId> {
        Self::check_position(position)?;
        if protection.wants_password() && password.is_none() {
            return Err(Error::Config("protected frequency needs a password".into()));
        }

        let freq_id = FrequencyId::generate();
        self.save(
            position,
            ConnectionKind::Frequency,
            freq_id.as_str(),
            name,
            password.clone(),
        )
        .await?;

        let connection = Connection::Frequency(FrequencyInfo {
            id: freq_id,
            freq_type,
            protection,
            member_count: 1,
            signal_dbm: 0,
        });

        self.spawn_worker(
            position,
            StartMode::Admin,
            connection,
            SessionRole::Admin,
            true,
            password,
        )?;
        info!(position, freq = %freq_id, "Created frequency");
        Ok(freq_id)
    }

    /// Bind an unsolicited incoming call to a slot and surface the event.
    ///
    /// Preference order: a slot already saved with the caller's code, the
    /// current position when free, any free slot. When everything is busy
    /// the caller gets an immediate reject.
    pub async fn handle_incoming_call(&self, from: DeviceId, rssi: i16) -> Result<()> {
        // A retransmitted request may race its own binding.
        if self
            .registry
            .route(&crate::types::PeerKey::Device(from))
            .is_some()
        {
            return Ok(());
        }

        let position = {
            let state = self.state.lock();
            let saved = state.slots.iter().position(|s| {
                s.worker.is_none()
                    && s.config
                        .as_ref()
                        .is_some_and(|c| c.kind == ConnectionKind::Device && c.code == from.as_str())
            });
            let current_free = (state.slots[state.position].worker.is_none()
                && state.active_workers < MAX_DIAL_WORKERS)
                .then_some(state.position);
            saved
                .or(current_free)
                .or_else(|| state.slots.iter().position(|s| s.worker.is_none()))
                .filter(|_| state.active_workers < MAX_DIAL_WORKERS)
        };

        let Some(position) = position else {
            debug!(%from, "All slots busy, rejecting incoming call");
            return self
                .send
                .send(MsgType::CallReject, from.as_bytes())
                .await;
        };

        let connection = Connection::Call(DeviceInfo {
            id: from,
            name: String::new(),
            signal_dbm: rssi.clamp(-127, 0) as i8,
            available: true,
        });

        self.spawn_worker(
            position,
            StartMode::Incoming,
            connection,
            SessionRole::Client,
            false,
            None,
        )
    }

    fn spawn_worker(
        &self,
        position: usize,
        start: StartMode,
        connection: Connection,
        role: SessionRole,
        initiator: bool,
        password: Option<String>,
    ) -> Result<()> {
        let rx_ring = AudioRing::with_jitter_depth(self.config.audio.jitter_depth);
        let tx_ring = AudioRing::new();
        let (rx_producer, rx_consumer) = rx_ring.split().expect("fresh ring");
        let (tx_producer, tx_consumer) = tx_ring.split().expect("fresh ring");

        let session = Session::new(
            position,
            self.local_id,
            self.config.device_name.clone(),
            connection.clone(),
            role,
            initiator,
            password,
            self.config.key_policy.clone(),
            rx_producer,
            tx_consumer,
        );

        let peer = session.peer_key();
        let created_at_ms = session.created_at_ms();
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL);

        // Admin frequencies announce themselves in discovery scans.
        let descriptor = match (&connection, role) {
            (Connection::Frequency(info), SessionRole::Admin) => Some(FreqDescriptor {
                freq_id: info.id,
                freq_type: info.freq_type,
                protection: info.protection,
                member_count: info.member_count,
                created_at_ms,
            }),
            _ => None,
        };

        {
            let mut state = self.state.lock();
            let slot = &mut state.slots[position];
            slot.state = SlotState::Connecting;
            slot.worker = Some(WorkerHandle {
                cmd_tx,
                join: None,
                peer,
            });
            slot.hal_audio = Some(HalAudio {
                capture: tx_producer,
                playback: rx_consumer,
            });
            state.active_workers += 1;
        }

        self.registry.register(
            peer,
            SessionRoute {
                slot: position,
                tx: inbound_tx,
                descriptor,
            },
        );

        let ctx = WorkerContext {
            session,
            start,
            config: self.config.session.clone(),
            send: self.send.clone(),
            registry: self.registry.clone(),
            events: self.events.clone(),
            dial: self.state.clone(),
        };
        let join = tokio::spawn(session::worker::run(ctx, cmd_rx, inbound_rx));

        if let Some(handle) = self.state.lock().slots[position].worker.as_mut() {
            handle.join = Some(join);
        }

        debug!(position, peer = %peer, "Spawned slot worker");
        Ok(())
    }

    /// Stop the worker at `position` and wait for it to release everything.
    pub async fn disconnect(&self, position: usize) -> Result<()> {
        Self::check_position(position)?;

        let (cmd_tx, join, was_audio) = {
            let mut state = self.state.lock();
            let slot = &mut state.slots[position];
            let Some(handle) = slot.worker.as_mut() else {
                // Explicit disconnect is also how an ERROR slot is cleared.
                slot.state = slot.resting_state();
                return Ok(());
            };
            (
                handle.cmd_tx.clone(),
                handle.join.take(),
                slot.audio_active,
            )
        };

        if was_audio {
            let _ = self.hal.stop_capture().await;
            let _ = self.hal.stop_playback().await;
        }

        let _ = cmd_tx.send(SessionCommand::Stop).await;
        if let Some(join) = join {
            if let Err(e) = join.await {
                warn!(position, error = %e, "Worker join failed");
            }
        }

        let mut state = self.state.lock();
        let slot = &mut state.slots[position];
        slot.state = slot.resting_state();
        Ok(())
    }

    /// Tear everything down and wait for quiescence.
    pub async fn disconnect_all(&self) {
        for position in 0..DIAL_POSITIONS {
            let _ = self.disconnect(position).await;
        }
    }

    // -----------------------------------------------------------------------
    // Audio focus, mute, incoming decisions, PTT
    // -----------------------------------------------------------------------

    /// Make `position` the unique audio-active slot and re-bind the HAL.
    pub async fn set_active_audio(&self, position: usize) -> Result<()> {
        Self::check_position(position)?;

        // Return the HAL halves to whichever slot held focus.
        let capture = self.hal.stop_capture().await;
        let playback = self.hal.stop_playback().await;

        let (commands, hal_audio) = {
            let mut state = self.state.lock();

            if let (Some(capture), Some(playback)) = (capture, playback) {
                if let Some(old) = state.slots.iter_mut().find(|s| s.audio_active) {
                    old.hal_audio = Some(HalAudio { capture, playback });
                }
            }

            let mut commands = Vec::new();
            for (i, slot) in state.slots.iter_mut().enumerate() {
                let active = i == position;
                if slot.audio_active != active {
                    if let Some(handle) = slot.worker.as_ref() {
                        commands.push((handle.cmd_tx.clone(), active));
                    }
                }
                slot.audio_active = active;
            }

            (commands, state.slots[position].hal_audio.take())
        };

        for (tx, active) in commands {
            let _ = tx.send(SessionCommand::SetAudioActive(active)).await;
        }

        if let Some(hal_audio) = hal_audio {
            self.hal.start_capture(hal_audio.capture).await;
            self.hal.start_playback(hal_audio.playback).await;
        }

        debug!(position, "Audio focus moved");
        Ok(())
    }

    pub async fn set_muted(&self, position: usize, muted: bool) -> Result<()> {
        Self::check_position(position)?;
        let cmd_tx = {
            let mut state = self.state.lock();
            let slot = &mut state.slots[position];
            slot.muted = muted;
            slot.worker.as_ref().map(|h| h.cmd_tx.clone())
        };
        if let Some(tx) = cmd_tx {
            let _ = tx.send(SessionCommand::SetMuted(muted)).await;
        }
        Ok(())
    }

    /// Push-to-talk edge for the audio-active slot.
    pub async fn set_talking(&self, talking: bool) -> Result<()> {
        let cmd_tx = {
            let state = self.state.lock();
            state
                .slots
                .iter()
                .find(|s| s.audio_active)
                .and_then(|s| s.worker.as_ref())
                .map(|h| h.cmd_tx.clone())
        };
        if let Some(tx) = cmd_tx {
            let _ = tx.send(SessionCommand::SetTalking(talking)).await;
        }
        Ok(())
    }

    async fn command(&self, position: usize, command: SessionCommand) -> Result<()> {
        Self::check_position(position)?;
        let cmd_tx = {
            let state = self.state.lock();
            state.slots[position]
                .worker
                .as_ref()
                .map(|h| h.cmd_tx.clone())
        };
        let Some(tx) = cmd_tx else {
            return Err(DialError::SlotUnconfigured(position).into());
        };
        tx.send(command)
            .await
            .map_err(|_| Error::Internal("worker command channel closed".into()))
    }

    /// Accept the incoming request bound to `position`.
    pub async fn accept_incoming(&self, position: usize) -> Result<()> {
        self.command(position, SessionCommand::Accept).await
    }

    /// Reject the incoming request bound to `position`.
    pub async fn reject_incoming(&self, position: usize) -> Result<()> {
        self.command(position, SessionCommand::Reject).await
    }

    /// Admin decision on a pending join request.
    pub async fn decide_join(&self, position: usize, device: DeviceId, accept: bool) -> Result<()> {
        self.command(position, SessionCommand::DecideJoin { device, accept })
            .await
    }

    /// Invite a device to the frequency at `position`.
    pub async fn invite(&self, position: usize, device: DeviceId) -> Result<()> {
        self.command(position, SessionCommand::Invite(device)).await
    }

    /// Kick a member from the frequency at `position` (admin only).
    pub async fn kick(&self, position: usize, device: DeviceId) -> Result<()> {
        self.command(position, SessionCommand::Kick(device)).await
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn active_workers(&self) -> usize {
        self.state.lock().active_workers
    }

    /// UI snapshot of every slot plus the cursor.
    pub fn snapshot(&self) -> (Vec<SlotSnapshot>, usize) {
        let state = self.state.lock();
        let snapshots = state
            .slots
            .iter()
            .enumerate()
            .map(|(i, slot)| SlotSnapshot::from_slot(i, slot, state.position))
            .collect();
        (snapshots, state.position)
    }

    /// Invariant check: worker presence matches the busy states and the
    /// audio-active slot is unique. Exposed for tests and debug asserts.
    pub fn check_invariants(&self) -> bool {
        let state = self.state.lock();
        let worker_count = state.slots.iter().filter(|s| s.worker.is_some()).count();
        let audio_count = state.slots.iter().filter(|s| s.audio_active).count();
        let states_match = state.slots.iter().all(|s| {
            match s.state {
                SlotState::Connected | SlotState::Connecting => s.worker.is_some(),
                SlotState::Empty | SlotState::Saved | SlotState::Error => s.worker.is_none(),
            }
        });
        worker_count == state.active_workers
            && state.active_workers <= MAX_DIAL_WORKERS
            && audio_count <= 1
            && states_match
    }
}
