//! Group frequency scenarios: create, join with password, member lists,
//! and the encrypted voice path end to end.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;

use async_trait::async_trait;
use wavetalk::audio::{AudioHal, FrameConsumer, FrameProducer};
use wavetalk::config::EngineConfig;
use wavetalk::engine::Engine;
use wavetalk::error::SessionError;
use wavetalk::events::EngineEvent;
use wavetalk::identity::{DeviceIdentity, NoHardware};
use wavetalk::storage::MemoryStore;
use wavetalk::transport::{LoopbackRadio, RadioTransport, RxFrame};
use wavetalk::types::{ConnectionKind, FrequencyProtection, FrequencyType};

const WAIT: Duration = Duration::from_secs(10);

/// Test HAL that parks the ring halves where the test can drive them.
#[derive(Default)]
struct TestAudio {
    capture: Arc<Mutex<Option<FrameProducer>>>,
    playback: Arc<Mutex<Option<FrameConsumer>>>,
}

impl TestAudio {
    fn handles(
        &self,
    ) -> (
        Arc<Mutex<Option<FrameProducer>>>,
        Arc<Mutex<Option<FrameConsumer>>>,
    ) {
        (self.capture.clone(), self.playback.clone())
    }
}

#[async_trait]
impl AudioHal for TestAudio {
    async fn start_capture(&self, sink: FrameProducer) {
        *self.capture.lock() = Some(sink);
    }

    async fn stop_capture(&self) -> Option<FrameProducer> {
        self.capture.lock().take()
    }

    async fn start_playback(&self, source: FrameConsumer) {
        *self.playback.lock() = Some(source);
    }

    async fn stop_playback(&self) -> Option<FrameConsumer> {
        self.playback.lock().take()
    }
}

fn make_engine(
    id: &str,
    radio: Arc<dyn RadioTransport>,
    rx: mpsc::Receiver<RxFrame>,
    hal: Arc<dyn AudioHal>,
) -> Engine {
    let storage = Arc::new(MemoryStore::new());
    let mut identity = DeviceIdentity::init(storage.clone(), &NoHardware).unwrap();
    identity.set_custom(id).unwrap();

    let engine = Engine::new(EngineConfig::default(), identity, radio, hal, storage).unwrap();
    engine.start(rx);
    engine
}

async fn next_matching<F>(
    rx: &mut tokio::sync::broadcast::Receiver<EngineEvent>,
    mut pred: F,
) -> EngineEvent
where
    F: FnMut(&EngineEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event stream closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event did not arrive")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_password_join_and_member_list() {
    let (radio_a, rx_a, radio_b, rx_b) = LoopbackRadio::pair();
    let admin = make_engine("11111111", radio_a, rx_a, Arc::new(TestAudio::default()));
    let member = make_engine("22222222", radio_b, rx_b, Arc::new(TestAudio::default()));

    let mut admin_events = admin.subscribe();
    let mut member_events = member.subscribe();

    let freq = admin
        .create_frequency(
            0,
            "ops",
            FrequencyType::Visible,
            FrequencyProtection::Password,
            Some("sierra7".into()),
        )
        .await
        .unwrap();

    // The admin session is CONNECTED from creation.
    next_matching(&mut admin_events, |e| {
        matches!(e, EngineEvent::Connected { .. })
    })
    .await;

    // Member joins with the right password.
    member
        .dial()
        .save(
            3,
            ConnectionKind::Frequency,
            freq.as_str(),
            "ops",
            Some("sierra7".into()),
        )
        .await
        .unwrap();
    member.dial().connect(3).await.unwrap();

    next_matching(&mut member_events, |e| {
        matches!(e, EngineEvent::Connected { slot: 3, .. })
    })
    .await;

    // Both sides converge on a two-member roster.
    let event = next_matching(&mut member_events, |e| {
        matches!(e, EngineEvent::MemberList { .. })
    })
    .await;
    let EngineEvent::MemberList { members, .. } = event else {
        unreachable!();
    };
    assert_eq!(members.len(), 2);
    assert!(members.iter().any(|m| m.id.as_str() == "11111111" && m.is_admin));
    assert!(members.iter().any(|m| m.id.as_str() == "22222222"));

    let (slots, _) = admin.slots();
    assert!(slots[0].is_admin);
    assert_eq!(slots[0].member_count, 2);

    admin.shutdown().await;
    member.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wrong_password_rejected() {
    let (radio_a, rx_a, radio_b, rx_b) = LoopbackRadio::pair();
    let admin = make_engine("11111111", radio_a, rx_a, Arc::new(TestAudio::default()));
    let member = make_engine("22222222", radio_b, rx_b, Arc::new(TestAudio::default()));

    let mut member_events = member.subscribe();

    let freq = admin
        .create_frequency(
            0,
            "ops",
            FrequencyType::Visible,
            FrequencyProtection::Password,
            Some("sierra7".into()),
        )
        .await
        .unwrap();

    member
        .dial()
        .save(
            0,
            ConnectionKind::Frequency,
            freq.as_str(),
            "ops",
            Some("wrong".into()),
        )
        .await
        .unwrap();
    member.dial().connect(0).await.unwrap();

    let event = next_matching(&mut member_events, |e| {
        matches!(e, EngineEvent::Rejected { .. })
    })
    .await;
    let EngineEvent::Rejected { reason, .. } = event else {
        unreachable!();
    };
    assert_eq!(reason, SessionError::WrongPassword);

    admin.shutdown().await;
    member.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_approval_join_waits_for_admin() {
    let (radio_a, rx_a, radio_b, rx_b) = LoopbackRadio::pair();
    let admin = make_engine("11111111", radio_a, rx_a, Arc::new(TestAudio::default()));
    let member = make_engine("22222222", radio_b, rx_b, Arc::new(TestAudio::default()));

    let mut admin_events = admin.subscribe();
    let mut member_events = member.subscribe();

    let freq = admin
        .create_frequency(
            0,
            "ops",
            FrequencyType::Hidden,
            FrequencyProtection::Approval,
            None,
        )
        .await
        .unwrap();

    member
        .dial()
        .save(0, ConnectionKind::Frequency, freq.as_str(), "ops", None)
        .await
        .unwrap();
    member.dial().connect(0).await.unwrap();

    // The request parks in the admin's approval queue.
    let event = next_matching(&mut admin_events, |e| {
        matches!(e, EngineEvent::JoinPending { .. })
    })
    .await;
    let EngineEvent::JoinPending { slot, from, .. } = event else {
        unreachable!();
    };
    assert_eq!(from.as_str(), "22222222");

    admin.dial().decide_join(slot, from, true).await.unwrap();

    next_matching(&mut member_events, |e| {
        matches!(e, EngineEvent::Connected { .. })
    })
    .await;

    admin.shutdown().await;
    member.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_group_voice_travels_encrypted() {
    let (radio_a, rx_a, radio_b, rx_b) = LoopbackRadio::pair();
    let admin_hal = Arc::new(TestAudio::default());
    let member_hal = Arc::new(TestAudio::default());
    let (_admin_capture, admin_playback) = admin_hal.handles();
    let (member_capture, _member_playback) = member_hal.handles();

    let admin = make_engine("11111111", radio_a, rx_a, admin_hal);
    let member = make_engine("22222222", radio_b, rx_b, member_hal);

    let mut admin_events = admin.subscribe();
    let mut member_events = member.subscribe();

    let freq = admin
        .create_frequency(
            0,
            "ops",
            FrequencyType::Visible,
            FrequencyProtection::Password,
            Some("sierra7".into()),
        )
        .await
        .unwrap();
    admin.dial().set_active_audio(0).await.unwrap();

    member
        .dial()
        .save(
            0,
            ConnectionKind::Frequency,
            freq.as_str(),
            "ops",
            Some("sierra7".into()),
        )
        .await
        .unwrap();
    member.dial().connect(0).await.unwrap();
    next_matching(&mut member_events, |e| {
        matches!(e, EngineEvent::Connected { .. })
    })
    .await;

    // Wait until the admin indexed the new member so voice routes.
    next_matching(&mut admin_events, |e| {
        matches!(e, EngineEvent::MemberList { .. })
    })
    .await;

    // Member starts a talk burst; the admin hearing VOICE_START confirms
    // the worker observed the push-to-talk edge.
    member.dial().set_active_audio(0).await.unwrap();
    member.dial().set_talking(true).await.unwrap();
    next_matching(&mut admin_events, |e| {
        matches!(
            e,
            EngineEvent::PeerTalking {
                talking: true,
                ..
            }
        )
    })
    .await;

    // "Capture" three frames; the 20 ms pump ships them encrypted.
    {
        let capture = member_capture.lock();
        let producer = capture.as_ref().expect("capture bound");
        for i in 0..3u8 {
            producer.write(&[0x40 + i; 320], None).unwrap();
        }
    }

    let frame = timeout(WAIT, async {
        loop {
            let got = {
                let playback = admin_playback.lock();
                playback.as_ref().and_then(|c| c.read().ok())
            };
            if let Some(frame) = got {
                return frame;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("voice never arrived");

    // Capture frames travel as 160-byte (10 ms) wire chunks.
    assert_eq!(frame.audio()[0] & 0xF0, 0x40, "payload survived the trip");
    assert_eq!(frame.audio().len(), wavetalk::session::WIRE_VOICE_BYTES);

    admin.shutdown().await;
    member.shutdown().await;
}
