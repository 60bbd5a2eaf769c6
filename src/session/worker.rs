//! Per-slot session worker task.
//!
//! One tokio task per connected slot. The worker owns the [`Session`], feeds
//! it commands, routed inbound messages, and timer edges, and performs the
//! IO its [`Action`]s call for. Cancellation is a `Stop` command: the worker
//! notifies the peer if connected, drops its crypto material (zeroized on
//! drop), releases its rings, updates the slot table, and exits; the dial
//! manager awaits the join handle for quiescence.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::audio::FRAME_DURATION_MS;
use crate::config::SessionConfig;
use crate::dial::{DialState, SlotState};
use crate::dispatcher::{Inbound, Registry, SendHandle};
use crate::events::EngineEvent;
use crate::types::{Connection, DeviceId, PeerKey, SessionRole};

use super::session::{Action, Session};
use super::state::SessionState;

/// Commands the dial manager and UI send a worker.
#[derive(Debug)]
pub enum SessionCommand {
    /// Accept an INCOMING request.
    Accept,
    /// Reject an INCOMING request; the worker exits.
    Reject,
    /// Tear the session down; the worker exits.
    Stop,
    SetMuted(bool),
    SetAudioActive(bool),
    SetTalking(bool),
    DecideJoin { device: DeviceId, accept: bool },
    Invite(DeviceId),
    Kick(DeviceId),
}

/// How the worker enters the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Send the opening request and wait for the answer.
    Outbound,
    /// An unsolicited request was bound to this slot.
    Incoming,
    /// We created the frequency; CONNECTED from the start.
    Admin,
}

/// Everything a worker needs besides its channels.
pub struct WorkerContext {
    pub session: Session,
    pub start: StartMode,
    pub config: SessionConfig,
    pub send: SendHandle,
    pub registry: Arc<Registry>,
    pub events: broadcast::Sender<EngineEvent>,
    pub dial: Arc<Mutex<DialState>>,
}

/// Worker task body.
pub async fn run(
    ctx: WorkerContext,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    mut inbound_rx: mpsc::Receiver<Inbound>,
) {
    let WorkerContext {
        mut session,
        start,
        config,
        send,
        registry,
        events,
        dial,
    } = ctx;

    let slot = session.slot;
    let peer = session.peer_key();
    info!(slot, peer = %peer, mode = ?start, "Session worker started");

    let opening = match start {
        StartMode::Outbound => session.begin_outbound(),
        StartMode::Incoming => session.begin_incoming(),
        StartMode::Admin => session.begin_admin(),
    };

    let mut fatal: Option<String> = None;
    let mut teardown = process_actions(slot, &send, &events, opening, &mut fatal).await;
    sync_slot(&dial, &registry, &session);

    // WAITING expires; INCOMING waits for the user; CONNECTED is watched by
    // the inactivity watchdog.
    let waiting_deadline = Instant::now() + config.call_timeout;
    let mut last_rx = Instant::now();

    let mut voice_tick = interval(Duration::from_millis(u64::from(FRAME_DURATION_MS)));
    let mut heartbeat = interval(config.heartbeat_interval);
    let mut refresh_poll = interval(config.key_refresh_poll);

    while !teardown {
        let actions: Vec<Action> = tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(SessionCommand::Accept) => session.accept(),
                Some(SessionCommand::Reject) => session.reject(),
                Some(SessionCommand::Stop) | None => session.stop(),
                Some(SessionCommand::SetMuted(muted)) => session.set_muted(muted),
                Some(SessionCommand::SetAudioActive(active)) => {
                    session.audio_active = active;
                    Vec::new()
                }
                Some(SessionCommand::SetTalking(talking)) => session.set_talking(talking),
                Some(SessionCommand::DecideJoin { device, accept }) => {
                    session.decide_join(device, accept)
                }
                Some(SessionCommand::Invite(device)) => session.invite(device),
                Some(SessionCommand::Kick(device)) => session.kick(device),
            },

            inbound = inbound_rx.recv() => match inbound {
                Some(inbound) => {
                    last_rx = Instant::now();
                    record_rx(&dial, slot, &inbound);
                    session.handle_inbound(
                        &inbound.header,
                        inbound.msg,
                        &inbound.payload,
                        inbound.rssi,
                    )
                }
                None => {
                    warn!(slot, "Inbound channel closed, stopping worker");
                    session.stop()
                }
            },

            () = sleep_until(waiting_deadline),
                if session.state() == SessionState::Waiting =>
            {
                debug!(slot, "WAITING timed out");
                session.timeout()
            }

            _ = voice_tick.tick() => {
                if session.state() == SessionState::Connected
                    && last_rx.elapsed() > config.inactivity_timeout
                {
                    session.watchdog_expired()
                } else {
                    session.pump_voice()
                }
            }

            _ = heartbeat.tick() => session.heartbeat(),

            _ = refresh_poll.tick() => session.maybe_rekey(),
        };

        record_tx(&dial, slot, &actions);
        teardown = process_actions(slot, &send, &events, actions, &mut fatal).await;
        sync_slot(&dial, &registry, &session);

        // A dead transport freezes the slot in ERROR until an explicit
        // disconnect clears it.
        if let Some(message) = fatal.take() {
            dial.lock().slots[slot].state = SlotState::Error;
            let _ = events.send(EngineEvent::SlotError {
                slot,
                message,
            });
            teardown = true;
        }
    }

    // Quiescence: unroute, release audio, update the slot table, exit.
    registry.unregister(&peer);
    {
        let mut dial = dial.lock();
        let state = &mut *dial;
        let slot_entry = &mut state.slots[slot];
        slot_entry.worker = None;
        slot_entry.hal_audio = None;
        slot_entry.audio_active = false;
        slot_entry.connected_at = None;
        if slot_entry.state != SlotState::Error {
            slot_entry.state = slot_entry.resting_state();
        }
        state.active_workers = state.active_workers.saturating_sub(1);
    }
    info!(slot, peer = %peer, "Session worker exited");
    // Dropping the session zeroizes its crypto contexts and frees the rings.
}

/// Execute a batch of session actions. Returns true when the worker is done.
async fn process_actions(
    slot: usize,
    send: &SendHandle,
    events: &broadcast::Sender<EngineEvent>,
    actions: Vec<Action>,
    fatal: &mut Option<String>,
) -> bool {
    let mut teardown = false;
    for action in actions {
        match action {
            Action::Send {
                msg,
                payload,
                reliable,
            } => {
                let result = if reliable {
                    send.send_reliable(msg, &payload, Some(slot)).await
                } else if msg.is_voice() {
                    send.send_voice(msg, &payload).await
                } else {
                    send.send(msg, &payload).await
                };
                if let Err(e) = result {
                    warn!(slot, msg = ?msg, error = %e, "Send failed");
                    if matches!(e, crate::error::Error::Transport(_)) {
                        *fatal = Some(e.to_string());
                    }
                }
            }
            Action::Event(event) => {
                let _ = events.send(event);
            }
            Action::Teardown => teardown = true,
        }
    }
    teardown
}

/// Mirror session state into the slot table and routing registry.
fn sync_slot(dial: &Arc<Mutex<DialState>>, registry: &Arc<Registry>, session: &Session) {
    let slot = session.slot;
    let peer = session.peer_key();

    {
        let mut dial = dial.lock();
        let entry = &mut dial.slots[slot];
        let new_state = match session.state() {
            SessionState::Connected => SlotState::Connected,
            SessionState::Waiting | SessionState::Incoming => SlotState::Connecting,
            SessionState::Idle => entry.state, // exit cleanup settles it
        };
        if entry.state != SlotState::Error {
            if new_state == SlotState::Connected && entry.state != SlotState::Connected {
                entry.connected_at = Some(std::time::Instant::now());
            }
            entry.state = new_state;
        }
        entry.is_admin = session.is_admin();
        entry.member_count = session.member_count();
        entry.muted = session.muted;
    }

    // Frequency sessions keep the member index current so member voice
    // routes here. The local id never arrives inbound (the dispatcher drops
    // own-source frames), so it may stay in the index harmlessly.
    if let (Connection::Frequency(_), PeerKey::Frequency(_)) = (session.connection(), peer) {
        let devices: Vec<DeviceId> = session.members().iter().map(|m| m.id).collect();
        registry.set_members(peer, &devices);
        if session.role() == SessionRole::Admin {
            registry.update_descriptor(&peer, session.member_count());
        }
    }
}

/// Track per-slot RX statistics.
fn record_rx(dial: &Arc<Mutex<DialState>>, slot: usize, inbound: &Inbound) {
    let mut dial = dial.lock();
    let entry = &mut dial.slots[slot];
    entry.bytes_received += inbound.payload.len() as u64;
    entry.signal_dbm = inbound.rssi.clamp(-127, 0) as i8;
}

/// Track per-slot TX statistics.
fn record_tx(dial: &Arc<Mutex<DialState>>, slot: usize, actions: &[Action]) {
    let bytes: u64 = actions
        .iter()
        .map(|a| match a {
            Action::Send { payload, .. } => payload.len() as u64,
            _ => 0,
        })
        .sum();
    if bytes > 0 {
        dial.lock().slots[slot].bytes_sent += bytes;
    }
}
