//! Top-level engine: wires identity, dispatcher, dial manager, and the
//! event stream together and exposes the UI-facing surface.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::audio::AudioHal;
use crate::config::EngineConfig;
use crate::dial::{DialManager, SlotSnapshot};
use crate::dispatcher::{
    Dispatcher, ProtocolCounters, ProtocolStats, Registry, SendHandle, Unsolicited,
};
use crate::error::Result;
use crate::events::EngineEvent;
use crate::identity::DeviceIdentity;
use crate::protocol::{DiscoverRequest, MsgType};
use crate::storage::Storage;
use crate::transport::{RadioTransport, RxFrame};
use crate::types::{DeviceId, FrequencyId, FrequencyProtection, FrequencyType, ScanResult};

/// Capacity of the engine event stream.
const EVENT_CHANNEL: usize = 256;

/// Capacity of the unsolicited-request channel.
const INCOMING_CHANNEL: usize = 16;

/// The real-time communication engine.
///
/// Owns every core subsystem; collaborators (radio driver, audio codec, UI,
/// storage) plug in at the seams defined in their modules.
pub struct Engine {
    config: Arc<EngineConfig>,
    identity: Mutex<DeviceIdentity>,
    dial: Arc<DialManager>,
    dispatcher: Arc<Dispatcher>,
    send: SendHandle,
    events: broadcast::Sender<EngineEvent>,
    counters: Arc<ProtocolCounters>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Assemble an engine. Call [`Engine::start`] to begin receiving.
    pub fn new(
        config: EngineConfig,
        identity: DeviceIdentity,
        radio: Arc<dyn RadioTransport>,
        hal: Arc<dyn AudioHal>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let local_id = identity.id();

        let (events, _) = broadcast::channel(EVENT_CHANNEL);
        let counters = Arc::new(ProtocolCounters::default());
        let registry = Arc::new(Registry::new());

        let send = SendHandle::new(
            radio,
            local_id,
            config.retry.clone(),
            events.clone(),
            counters.clone(),
        );

        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_CHANNEL);
        let dispatcher = Arc::new(Dispatcher::new(
            local_id,
            config.device_name.clone(),
            config.visible,
            send.clone(),
            registry.clone(),
            events.clone(),
            counters.clone(),
            incoming_tx,
        ));

        let dial = Arc::new(DialManager::new(
            local_id,
            config.clone(),
            send.clone(),
            registry,
            events.clone(),
            storage,
            hal,
        ));

        let engine = Self {
            config,
            identity: Mutex::new(identity),
            dial: dial.clone(),
            dispatcher,
            send,
            events,
            counters,
            tasks: Mutex::new(Vec::new()),
        };
        engine.spawn_incoming_task(dial, incoming_rx);

        info!(id = %local_id, "Engine assembled");
        Ok(engine)
    }

    fn spawn_incoming_task(
        &self,
        dial: Arc<DialManager>,
        mut incoming_rx: mpsc::Receiver<Unsolicited>,
    ) {
        let task = tokio::spawn(async move {
            while let Some(request) = incoming_rx.recv().await {
                match request {
                    Unsolicited::Call { from, rssi } => {
                        if let Err(e) = dial.handle_incoming_call(from, rssi).await {
                            warn!(%from, error = %e, "Failed to bind incoming call");
                        }
                    }
                }
            }
        });
        self.tasks.lock().push(task);
    }

    /// Start consuming radio frames.
    pub fn start(&self, rx_frames: mpsc::Receiver<RxFrame>) {
        let dispatcher = self.dispatcher.clone();
        let task = tokio::spawn(dispatcher.run(rx_frames));
        self.tasks.lock().push(task);
    }

    // -----------------------------------------------------------------------
    // UI surface
    // -----------------------------------------------------------------------

    pub fn device_id(&self) -> DeviceId {
        self.send.local_id()
    }

    /// Issue an auth token for the given timestamp.
    pub fn auth_token(&self, timestamp: u32) -> Result<String> {
        self.identity.lock().auth_token(timestamp)
    }

    /// Verify a peer's auth token.
    pub fn verify_auth_token(
        &self,
        token: &str,
        expected: DeviceId,
        max_age_seconds: u32,
        now: u32,
    ) -> bool {
        self.identity
            .lock()
            .verify_auth_token(token, expected, max_age_seconds, now)
    }

    /// Subscribe to the engine event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// The dial manager (connect, disconnect, rotate, save, mute, ...).
    pub fn dial(&self) -> &Arc<DialManager> {
        &self.dial
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Control whether this device answers discovery requests.
    pub fn set_visible(&self, visible: bool) {
        self.dispatcher.set_visible(visible);
    }

    /// Broadcast a discovery request and reset the scan snapshot.
    pub async fn scan(&self, include_frequencies: bool, include_devices: bool) -> Result<()> {
        self.dispatcher.clear_scan_results();
        let request = DiscoverRequest {
            include_frequencies,
            include_devices,
        };
        self.send
            .send(MsgType::DiscoverRequest, &request.encode())
            .await
    }

    /// Snapshot of discovery results collected since the last scan.
    pub fn scan_results(&self) -> Vec<ScanResult> {
        self.dispatcher.scan_results()
    }

    /// Snapshot of all dial slots plus the cursor position.
    pub fn slots(&self) -> (Vec<SlotSnapshot>, usize) {
        self.dial.snapshot()
    }

    /// Create a frequency on a slot; this device becomes its admin.
    pub async fn create_frequency(
        &self,
        position: usize,
        name: &str,
        freq_type: FrequencyType,
        protection: FrequencyProtection,
        password: Option<String>,
    ) -> Result<FrequencyId> {
        self.dial
            .create_frequency(position, name, freq_type, protection, password)
            .await
    }

    pub fn stats(&self) -> ProtocolStats {
        self.counters.snapshot()
    }

    /// Tear down every session and stop background tasks.
    pub async fn shutdown(&self) {
        self.dial.disconnect_all().await;
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!("Engine shut down");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("device_id", &self.device_id())
            .field("active_workers", &self.dial.active_workers())
            .finish_non_exhaustive()
    }
}
